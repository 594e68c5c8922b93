//! COSMIC window front end
//!
//! The window samples the session's frame slot on a timer, resizes itself
//! when the device rotates, and turns clicks on the picture into taps.

use crate::controller::MirrorController;
use anyhow::{Context, Result};
use cosmic::app::{Core, Task};
use cosmic::iced::widget::{image, mouse_area};
use cosmic::iced::{ContentFit, Length, Point, Subscription};
use cosmic::widget::{button, column, container, text};
use cosmic::{ApplicationExt, Element};
use cosmic_mirror_stream::{
    Frame, PresentationLoop, RenderSurface, Size as ViewSize, TickOutcome,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

/// Window size that shows `view` unclipped
///
/// The header bar is hidden, so the window is exactly the picture.
fn window_size_for(view: ViewSize) -> cosmic::iced::Size {
    cosmic::iced::Size::new(view.width as f32, view.height as f32)
}

/// Window start-up data
#[derive(Clone)]
pub struct GuiFlags {
    controller: Arc<Mutex<MirrorController>>,
    title: String,
}

/// Collects what one presentation tick asked of the window
#[derive(Default)]
struct TickEffects {
    frame: Option<image::Handle>,
    resize: Option<ViewSize>,
    closed: bool,
}

impl RenderSurface for TickEffects {
    fn resize(&mut self, size: ViewSize) {
        self.resize = Some(size);
    }

    fn present(&mut self, frame: &Frame, _view: ViewSize) {
        self.frame = Some(image::Handle::from_rgba(
            frame.width,
            frame.height,
            frame.data.clone(),
        ));
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

struct MirrorApp {
    core: Core,
    controller: Arc<Mutex<MirrorController>>,
    presentation: PresentationLoop,
    frame: Option<image::Handle>,
    cursor: Option<Point>,
    status: String,
    tick_interval: Duration,
}

#[derive(Debug, Clone)]
enum Message {
    Tick,
    CursorMoved(Point),
    Pressed,
    Close,
}

impl MirrorApp {
    fn controller(&self) -> std::sync::MutexGuard<'_, MirrorController> {
        self.controller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn shutdown(&self) -> ! {
        let mut controller = self.controller();
        controller.stop();
        let (receiver, taps) = controller.statistics();
        let presented = self.presentation.statistics();
        info!(
            "Mirroring finished: {} frames decoded, {} shown, {} taps sent",
            receiver.frames_decoded, presented.frames_presented, taps.succeeded
        );
        std::process::exit(0);
    }
}

impl cosmic::Application for MirrorApp {
    type Executor = cosmic::executor::Default;
    type Flags = GuiFlags;
    type Message = Message;
    const APP_ID: &'static str = "com.system76.CosmicMirror";

    fn core(&self) -> &Core {
        &self.core
    }

    fn core_mut(&mut self) -> &mut Core {
        &mut self.core
    }

    fn init(mut core: Core, flags: Self::Flags) -> (Self, Task<Message>) {
        // Window content must match the view size or clicks map off target
        core.window.show_headerbar = false;
        core.window.content_container = false;

        let presentation = flags
            .controller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .presentation();
        let tick_interval = presentation.config().tick_interval();

        let mut app = Self {
            core,
            controller: flags.controller,
            presentation,
            frame: None,
            cursor: None,
            status: "Waiting for video stream...".to_string(),
            tick_interval,
        };
        let task = match app.core.main_window_id() {
            Some(id) => app.set_window_title(flags.title, id),
            None => Task::none(),
        };

        (app, task)
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::Tick => {
                let mut effects = TickEffects::default();
                let outcome = self.presentation.tick(&mut effects);

                if let Some(handle) = effects.frame {
                    self.frame = Some(handle);
                }
                if effects.closed || outcome == TickOutcome::Teardown {
                    info!("Video stream ended, closing window");
                    self.shutdown();
                }
                if let Some(size) = effects.resize {
                    info!(
                        "Device is {}, resizing window to {}",
                        self.presentation.orientation(),
                        size
                    );
                    if let Some(id) = self.core.main_window_id() {
                        return cosmic::iced::window::resize(id, window_size_for(size));
                    }
                }
                Task::none()
            }
            Message::CursorMoved(position) => {
                self.cursor = Some(position);
                Task::none()
            }
            Message::Pressed => {
                if let Some(position) = self.cursor {
                    let tapped = self.controller().on_click(
                        &self.presentation,
                        f64::from(position.x),
                        f64::from(position.y),
                    );
                    match tapped {
                        Some(point) => self.status = format!("Tap at {point}"),
                        None => debug!("Click at {:?} outside the device view", position),
                    }
                }
                Task::none()
            }
            Message::Close => self.shutdown(),
        }
    }

    fn view(&self) -> Element<'_, Message> {
        if let Some(handle) = &self.frame {
            let view = self.presentation.view_size();
            let picture = image(handle.clone())
                .width(Length::Fixed(view.width as f32))
                .height(Length::Fixed(view.height as f32))
                .content_fit(ContentFit::Fill);

            mouse_area(picture)
                .on_move(Message::CursorMoved)
                .on_press(Message::Pressed)
                .into()
        } else {
            container(
                column()
                    .push(text("COSMIC Mirror").size(24))
                    .push(text(&self.status))
                    .push(button::text("Close").on_press(Message::Close))
                    .padding(20)
                    .spacing(10)
                    .align_x(cosmic::iced::Alignment::Center),
            )
            .width(Length::Fill)
            .height(Length::Fill)
            .align_x(cosmic::iced::Alignment::Center)
            .align_y(cosmic::iced::Alignment::Center)
            .into()
        }
    }

    fn subscription(&self) -> Subscription<Self::Message> {
        if self.presentation.is_torn_down() {
            return Subscription::none();
        }
        cosmic::iced::time::every(self.tick_interval).map(|_| Message::Tick)
    }
}

/// Open the mirror window for a started session
///
/// Blocks until the window closes. Must run on the main thread, outside
/// any async runtime.
pub fn run(controller: MirrorController) -> Result<()> {
    let config = controller.config();
    let view = config.window_size();
    let title = config.window.title.clone();

    let flags = GuiFlags {
        controller: Arc::new(Mutex::new(controller)),
        title,
    };
    let settings = cosmic::app::Settings::default().size(window_size_for(view));

    cosmic::app::run::<MirrorApp>(settings, flags).context("Mirror window failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_matches_view() {
        let size = window_size_for(ViewSize::new(800, 360));
        assert_eq!(size.width, 800.0);
        assert_eq!(size.height, 360.0);
    }
}
