//! H.264 Annex-B demultiplexing
//!
//! The capture server sends a raw elementary stream with no framing other than
//! the 4-byte start code `00 00 00 01` in front of every NAL unit. Socket reads
//! cut that stream at arbitrary points, so units are only reported once the
//! *next* start code has arrived:
//!
//! ```text
//! | 00 00 00 01 | 67 ... SPS | 00 00 00 01 | 68 ... PPS | 00 00 00 01 | 65 ... (partial)
//! ^ unit 0                   ^ unit 1                   ^ consumed_up_to
//! ```
//!
//! [`find_units`] is stateless. Continuation state lives in the caller's
//! accumulation buffer, which [`NalBuffer`] wraps for the common case.

use serde::{Deserialize, Serialize};

/// Annex-B start code delimiting NAL units
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// NAL unit type, classified for bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NalKind {
    /// Type 1: coded slice of a non-IDR picture
    NonIdrSlice,
    /// Type 2: slice data partition A
    PartitionA,
    /// Type 3: slice data partition B
    PartitionB,
    /// Type 4: slice data partition C
    PartitionC,
    /// Type 5: coded slice of an IDR picture
    IdrSlice,
    /// Type 6: supplemental enhancement information
    Sei,
    /// Type 7: sequence parameter set
    Sps,
    /// Type 8: picture parameter set
    Pps,
    /// Type 9: access unit delimiter
    AccessUnitDelimiter,
    /// Type 10: end of sequence
    EndOfSequence,
    /// Type 11: end of stream
    EndOfStream,
    /// Type 12: filler data
    Filler,
    /// Any other type (0, 13..=31)
    Unknown(u8),
}

impl NalKind {
    /// Classify the 5-bit `nal_unit_type`
    #[must_use]
    pub fn from_type(nal_type: u8) -> Self {
        match nal_type & 0x1F {
            1 => Self::NonIdrSlice,
            2 => Self::PartitionA,
            3 => Self::PartitionB,
            4 => Self::PartitionC,
            5 => Self::IdrSlice,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::AccessUnitDelimiter,
            10 => Self::EndOfSequence,
            11 => Self::EndOfStream,
            12 => Self::Filler,
            other => Self::Unknown(other),
        }
    }

    /// Human-readable name
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::NonIdrSlice => "Coded slice of a non-IDR picture".to_string(),
            Self::PartitionA => "Coded slice data partition A".to_string(),
            Self::PartitionB => "Coded slice data partition B".to_string(),
            Self::PartitionC => "Coded slice data partition C".to_string(),
            Self::IdrSlice => "Coded slice of an IDR picture".to_string(),
            Self::Sei => "Supplemental enhancement information (SEI)".to_string(),
            Self::Sps => "Sequence parameter set (SPS)".to_string(),
            Self::Pps => "Picture parameter set (PPS)".to_string(),
            Self::AccessUnitDelimiter => "Access unit delimiter".to_string(),
            Self::EndOfSequence => "End of sequence".to_string(),
            Self::EndOfStream => "End of stream".to_string(),
            Self::Filler => "Filler data".to_string(),
            Self::Unknown(t) => format!("Unknown ({t})"),
        }
    }

    /// SPS or PPS
    #[must_use]
    pub fn is_parameter_set(&self) -> bool {
        matches!(self, Self::Sps | Self::Pps)
    }

    /// Slice carrying picture data (types 1 and 5)
    #[must_use]
    pub fn is_slice(&self) -> bool {
        matches!(self, Self::NonIdrSlice | Self::IdrSlice)
    }

    /// IDR slice
    #[must_use]
    pub fn is_keyframe(&self) -> bool {
        matches!(self, Self::IdrSlice)
    }
}

/// A complete NAL unit located inside an accumulation buffer
///
/// Offsets are relative to the buffer passed to [`find_units`]; `start` points
/// at the start code, `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit {
    /// Raw 5-bit `nal_unit_type`
    pub nal_type: u8,
    /// Offset of the leading start code
    pub start: usize,
    /// Offset one past the last payload byte
    pub end: usize,
}

impl NalUnit {
    /// Classified type
    #[must_use]
    pub fn kind(&self) -> NalKind {
        NalKind::from_type(self.nal_type)
    }

    /// Payload bytes (without start code)
    #[must_use]
    pub fn payload<'a>(&self, buffer: &'a [u8]) -> &'a [u8] {
        &buffer[self.start + START_CODE.len()..self.end]
    }

    /// Payload prefixed with its start code, as decoders expect it
    #[must_use]
    pub fn annex_b<'a>(&self, buffer: &'a [u8]) -> &'a [u8] {
        &buffer[self.start..self.end]
    }

    /// Size including the start code
    #[must_use]
    pub fn size(&self) -> usize {
        self.end - self.start
    }
}

/// Find the next start code at or after `from`
fn next_start_code(buffer: &[u8], from: usize) -> Option<usize> {
    if buffer.len() < START_CODE.len() || from > buffer.len() - START_CODE.len() {
        return None;
    }
    buffer[from..]
        .windows(START_CODE.len())
        .position(|window| window == START_CODE)
        .map(|pos| from + pos)
}

/// Split an Annex-B buffer into complete NAL units
///
/// Returns the units in stream order and the offset up to which the buffer
/// may be trimmed. Bytes from `consumed_up_to` onward (the start code of the
/// trailing, possibly incomplete unit) must be kept for the next call.
///
/// Units with an empty payload (two adjacent start codes) are skipped but
/// still consumed. Bytes before the first start code are consumed along with
/// the first complete unit.
#[must_use]
pub fn find_units(buffer: &[u8]) -> (Vec<NalUnit>, usize) {
    let mut units = Vec::new();

    let Some(mut current) = next_start_code(buffer, 0) else {
        return (units, 0);
    };
    let mut consumed = 0;

    while let Some(next) = next_start_code(buffer, current + START_CODE.len()) {
        let payload_start = current + START_CODE.len();
        if payload_start < next {
            units.push(NalUnit {
                nal_type: buffer[payload_start] & 0x1F,
                start: current,
                end: next,
            });
        }
        consumed = next;
        current = next;
    }

    (units, consumed)
}

/// An owned NAL unit taken out of a [`NalBuffer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedNal {
    /// Raw 5-bit `nal_unit_type`
    pub nal_type: u8,
    /// Unit bytes including the leading start code
    pub data: Vec<u8>,
}

impl OwnedNal {
    /// Classified type
    #[must_use]
    pub fn kind(&self) -> NalKind {
        NalKind::from_type(self.nal_type)
    }

    /// Payload bytes (without start code)
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[START_CODE.len()..]
    }
}

/// Accumulation buffer feeding [`find_units`]
///
/// Bytes are appended per socket read; complete units are drained and the
/// buffer is trimmed to the trailing partial unit.
#[derive(Debug, Default)]
pub struct NalBuffer {
    pending: Vec<u8>,
    max_pending: Option<usize>,
}

impl NalBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the number of bytes kept while waiting for units to complete
    ///
    /// A stream that never delimits a unit would otherwise grow the buffer
    /// without bound.
    #[must_use]
    pub fn with_max_pending(mut self, max: usize) -> Self {
        self.max_pending = Some(max);
        self
    }

    /// Append a received chunk
    ///
    /// Past the pending limit, bytes ahead of the first start code are
    /// discarded; without any start code only a possible split start code
    /// prefix is kept. A single partial unit larger than the limit is
    /// dropped whole. Returns the number of bytes discarded.
    pub fn extend(&mut self, chunk: &[u8]) -> usize {
        self.pending.extend_from_slice(chunk);
        let Some(max) = self.max_pending else {
            return 0;
        };
        if self.pending.len() <= max {
            return 0;
        }

        let discard = match next_start_code(&self.pending, 0) {
            Some(0) if next_start_code(&self.pending, 1).is_some() => 0,
            Some(0) => self.pending.len(),
            Some(start) => start,
            None => self.pending.len().saturating_sub(START_CODE.len() - 1),
        };
        self.pending.drain(..discard);
        discard
    }

    /// Drain every complete unit, keeping the trailing partial unit
    pub fn drain_units(&mut self) -> Vec<OwnedNal> {
        let (units, consumed) = find_units(&self.pending);
        let owned = units
            .iter()
            .map(|unit| OwnedNal {
                nal_type: unit.nal_type,
                data: unit.annex_b(&self.pending).to_vec(),
            })
            .collect();
        self.pending.drain(..consumed);
        owned
    }

    /// Take the trailing unit at end of stream
    ///
    /// Returns `None` when nothing but (optional) garbage without a start code
    /// or an empty unit is pending.
    pub fn flush(&mut self) -> Option<OwnedNal> {
        let pending = std::mem::take(&mut self.pending);
        let start = next_start_code(&pending, 0)?;
        let payload_start = start + START_CODE.len();
        if payload_start >= pending.len() {
            return None;
        }
        Some(OwnedNal {
            nal_type: pending[payload_start] & 0x1F,
            data: pending[start..].to_vec(),
        })
    }

    /// Bytes waiting for the next start code
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(nal_header: u8, body: &[u8]) -> Vec<u8> {
        let mut out = START_CODE.to_vec();
        out.push(nal_header);
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_short_or_empty_buffer_yields_nothing() {
        assert_eq!(find_units(&[]), (vec![], 0));
        assert_eq!(find_units(&[0x00, 0x00, 0x01]), (vec![], 0));
        assert_eq!(find_units(&[0x12, 0x34, 0x56, 0x78, 0x9a]), (vec![], 0));
    }

    #[test]
    fn test_single_unit_is_incomplete_tail() {
        let buffer = unit(0x67, &[1, 2, 3]);
        let (units, consumed) = find_units(&buffer);
        assert!(units.is_empty());
        assert_eq!(consumed, 0);
    }

    #[test]
    fn test_units_delimited_by_next_start_code() {
        let mut buffer = unit(0x67, &[0xAA, 0xBB]);
        buffer.extend(unit(0x68, &[0xCC]));
        buffer.extend(unit(0x65, &[0xDD, 0xEE, 0xFF]));

        let (units, consumed) = find_units(&buffer);
        assert_eq!(units.len(), 2);

        assert_eq!(units[0].nal_type, 7);
        assert_eq!(units[0].kind(), NalKind::Sps);
        assert_eq!((units[0].start, units[0].end), (0, 7));
        assert_eq!(units[0].payload(&buffer), &[0x67, 0xAA, 0xBB]);

        assert_eq!(units[1].kind(), NalKind::Pps);
        assert_eq!((units[1].start, units[1].end), (7, 13));
        assert_eq!(units[1].annex_b(&buffer), &[0, 0, 0, 1, 0x68, 0xCC]);

        // The IDR slice is still open
        assert_eq!(consumed, 13);
    }

    #[test]
    fn test_leading_garbage_is_consumed_with_first_unit() {
        let mut buffer = vec![0xFF, 0xEE];
        buffer.extend(unit(0x41, &[1]));
        buffer.extend(unit(0x41, &[2]));

        let (units, consumed) = find_units(&buffer);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].start, 2);
        assert_eq!(units[0].kind(), NalKind::NonIdrSlice);
        assert_eq!(consumed, 8);
    }

    #[test]
    fn test_empty_unit_is_skipped_but_consumed() {
        let mut buffer = START_CODE.to_vec();
        buffer.extend(unit(0x06, &[9]));
        buffer.extend(START_CODE);

        let (units, consumed) = find_units(&buffer);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].kind(), NalKind::Sei);
        assert_eq!(consumed, 10);
    }

    #[test]
    fn test_type_uses_low_five_bits() {
        // nal_ref_idc bits set: 0x65 = 0b0110_0101 -> type 5
        assert_eq!(NalKind::from_type(0x65), NalKind::IdrSlice);
        assert_eq!(NalKind::from_type(0x41), NalKind::NonIdrSlice);
        assert_eq!(NalKind::from_type(0x18), NalKind::Unknown(24));
        assert!(NalKind::IdrSlice.is_keyframe());
        assert!(NalKind::NonIdrSlice.is_slice());
        assert!(!NalKind::Sei.is_slice());
        assert!(NalKind::Pps.is_parameter_set());
        assert_eq!(NalKind::Unknown(24).name(), "Unknown (24)");
    }

    #[test]
    fn test_buffer_keeps_partial_unit_across_reads() {
        let mut stream = unit(0x67, &[1, 2, 3, 4]);
        stream.extend(unit(0x68, &[5, 6]));
        stream.extend(unit(0x65, &[7, 8, 9]));

        let mut buffer = NalBuffer::new();
        // Split inside the second start code
        assert_eq!(buffer.extend(&stream[..10]), 0);
        assert!(buffer.drain_units().is_empty());

        buffer.extend(&stream[10..]);
        let units = buffer.drain_units();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].kind(), NalKind::Sps);
        assert_eq!(units[0].payload(), &[0x67, 1, 2, 3, 4]);
        assert_eq!(units[1].kind(), NalKind::Pps);

        let tail = buffer.flush().unwrap();
        assert_eq!(tail.kind(), NalKind::IdrSlice);
        assert_eq!(tail.data, unit(0x65, &[7, 8, 9]));
        assert_eq!(buffer.pending_len(), 0);
        assert!(buffer.flush().is_none());
    }

    #[test]
    fn test_pending_limit_discards_undelimited_data() {
        let mut buffer = NalBuffer::new().with_max_pending(8);
        assert_eq!(buffer.extend(&[0xAB; 6]), 0);
        assert_eq!(buffer.extend(&[0xAB; 6]), 9);
        assert_eq!(buffer.pending_len(), 3);
    }

    #[test]
    fn test_pending_limit_keeps_partial_unit() {
        let mut buffer = NalBuffer::new().with_max_pending(16);
        let mut chunk = vec![0xAB; 10];
        chunk.extend(unit(0x65, &[1, 2, 3, 4]));
        assert_eq!(buffer.extend(&chunk), 10);
        assert_eq!(buffer.pending_len(), 9);

        buffer.extend(&unit(0x41, &[5]));
        let units = buffer.drain_units();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].data, unit(0x65, &[1, 2, 3, 4]));
        assert_eq!(buffer.flush().unwrap().data, unit(0x41, &[5]));
    }

    #[test]
    fn test_pending_limit_keeps_split_start_code() {
        let mut buffer = NalBuffer::new().with_max_pending(8);
        let mut chunk = vec![0xAB; 9];
        chunk.extend([0, 0, 0]);
        assert_eq!(buffer.extend(&chunk), 9);

        buffer.extend(&[1, 0x67, 0x42]);
        buffer.extend(&unit(0x68, &[0xCE]));
        let units = buffer.drain_units();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].kind(), NalKind::Sps);
        assert_eq!(units[0].data, unit(0x67, &[0x42]));
    }

    #[test]
    fn test_pending_limit_drops_oversized_unit() {
        let mut buffer = NalBuffer::new().with_max_pending(8);
        assert_eq!(buffer.extend(&unit(0x65, &[9; 10])), 15);
        assert_eq!(buffer.pending_len(), 0);
    }
}
