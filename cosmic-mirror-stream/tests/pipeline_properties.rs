//! Property-based tests for the demultiplexer and the frame hand-off
//!
//! These tests verify correctness properties using proptest.

use cosmic_mirror_stream::{find_units, Frame, NalBuffer, OwnedNal, StreamState};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;

/// Drain `chunks` through a buffer, flushing the tail at the end
fn demux_chunked(chunks: &[&[u8]]) -> Vec<OwnedNal> {
    let mut buffer = NalBuffer::new();
    let mut units = Vec::new();
    for chunk in chunks {
        buffer.extend(chunk);
        units.extend(buffer.drain_units());
    }
    units.extend(buffer.flush());
    units
}

/// Split `bytes` at the given (unsorted, possibly repeated) cut points
fn split_at_cuts(bytes: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
    let mut cuts: Vec<usize> = cuts.iter().map(|c| c % (bytes.len() + 1)).collect();
    cuts.sort_unstable();
    let mut pieces = Vec::new();
    let mut last = 0;
    for cut in cuts {
        pieces.push(bytes[last..cut].to_vec());
        last = cut;
    }
    pieces.push(bytes[last..].to_vec());
    pieces
}

/// A unit whose payload contains no zero byte, so no accidental start codes
fn unit_strategy() -> impl Strategy<Value = Vec<u8>> {
    (1u8..=12, prop::collection::vec(1u8..=255, 0..200)).prop_map(|(nal_type, payload)| {
        let mut unit = vec![0, 0, 0, 1, 0x60 | nal_type];
        unit.extend(payload);
        unit
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    // Every unit written is recovered once, in order, regardless of how the
    // stream is cut into reads
    #[test]
    fn test_demux_recovers_every_unit(
        units in prop::collection::vec(unit_strategy(), 1..20),
        cuts in prop::collection::vec(any::<usize>(), 0..30),
    ) {
        let stream = units.concat();
        let pieces = split_at_cuts(&stream, &cuts);
        let slices: Vec<&[u8]> = pieces.iter().map(Vec::as_slice).collect();

        let recovered = demux_chunked(&slices);
        let recovered: Vec<Vec<u8>> = recovered.into_iter().map(|unit| unit.data).collect();
        prop_assert_eq!(recovered, units);
    }

    // Arbitrary bytes: chunked demux matches a single pass over the whole
    // stream
    #[test]
    fn test_demux_chunk_boundary_invariance(
        stream in prop::collection::vec(prop_oneof![Just(0u8), Just(1u8), any::<u8>()], 0..400),
        cuts in prop::collection::vec(any::<usize>(), 0..40),
    ) {
        let pieces = split_at_cuts(&stream, &cuts);
        let slices: Vec<&[u8]> = pieces.iter().map(Vec::as_slice).collect();

        prop_assert_eq!(demux_chunked(&slices), demux_chunked(&[stream.as_slice()]));
    }

    // Reported units are ordered, non-overlapping and inside the consumed
    // prefix
    #[test]
    fn test_find_units_stays_within_consumed(
        stream in prop::collection::vec(prop_oneof![Just(0u8), Just(1u8), any::<u8>()], 0..400),
    ) {
        let (units, consumed) = find_units(&stream);
        prop_assert!(consumed <= stream.len());

        let mut previous_end = 0;
        for unit in &units {
            prop_assert!(unit.start >= previous_end);
            prop_assert!(unit.end <= consumed);
            prop_assert!(unit.size() > 4);
            prop_assert_eq!(&stream[unit.start..unit.start + 4], &[0u8, 0, 0, 1][..]);
            prop_assert_eq!(unit.nal_type, stream[unit.start + 4] & 0x1F);
            previous_end = unit.end;
        }
        if units.is_empty() {
            prop_assert!(consumed == 0 || stream[consumed..].starts_with(&[0, 0, 0, 1]));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    // Concurrent producer and consumer: every observed frame was pushed,
    // observations never go backwards, and the last push wins
    #[test]
    fn test_handoff_concurrent_sequencing(count in 1u64..400, new_only in any::<bool>()) {
        let state = Arc::new(StreamState::new());
        let producer_state = Arc::clone(&state);

        let producer = thread::spawn(move || {
            for sequence in 0..count {
                producer_state.push(Frame::new(1, 1, vec![0; 4], sequence));
            }
        });

        let mut observed = Vec::new();
        while !producer.is_finished() {
            let frame = if new_only { state.pull_if_new() } else { state.pull() };
            if let Some(frame) = frame {
                observed.push(frame.sequence);
            }
        }
        producer.join().unwrap();

        prop_assert!(observed.windows(2).all(|pair| pair[0] <= pair[1]));
        if new_only {
            prop_assert!(observed.windows(2).all(|pair| pair[0] < pair[1]));
        }
        prop_assert!(observed.iter().all(|sequence| *sequence < count));
        prop_assert_eq!(state.pull().unwrap().sequence, count - 1);
        prop_assert_eq!(state.frames_pushed(), count);
    }
}
