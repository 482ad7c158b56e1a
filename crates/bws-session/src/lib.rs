//! Verification and enrollment sessions against the BWS webservice.
//!
//! A [`Session`] is fed [`Event`]s (camera frames, timers, finished jobs)
//! and reports to a [`View`]. [`drive`] runs one on tokio channels: one for
//! executor events, one for camera frames.

pub mod executor;
pub mod mode;
pub mod ports;
pub mod session;
pub mod settings;

pub use executor::{
    deliver, BackgroundWork, Event, Executor, TaskHandle, TaskOutput, Timer, TokioExecutor,
};
pub use mode::{challenge_pairs, CapturePair, EnrollmentPolicy, Mode};
pub use ports::{FaceDetector, Frame, Message, UnavailableFaceDetector, View};
pub use session::{ImageDetectionState, PermissionState, Session, SessionError, Stage};
pub use settings::SessionSettings;

use tokio::sync::mpsc;

/// Feed events and camera frames to `session` until the attempt ends.
/// Returns the outcome, or `false` when the event senders are gone first.
///
/// Once every frame sender is dropped the session is told so; an attempt
/// still waiting for a frame then ends unsuccessfully instead of hanging.
pub async fn drive<E: Executor, V: View>(
    session: &mut Session<E, V>,
    events: &mut mpsc::UnboundedReceiver<Event>,
    frames: &mut mpsc::UnboundedReceiver<Frame>,
) -> Result<bool, SessionError> {
    let mut frames_open = true;
    loop {
        if !frames_open {
            session.on_frames_exhausted();
        }
        if let Some(success) = session.outcome() {
            return Ok(success);
        }
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => session.handle_event(event)?,
                None => {
                    tracing::warn!(
                        session = %session.id(),
                        "event source closed before the attempt ended"
                    );
                    return Ok(false);
                }
            },
            frame = frames.recv(), if frames_open => match frame {
                Some(frame) => session.handle_event(Event::Frame(frame))?,
                None => {
                    tracing::debug!(session = %session.id(), "frame source closed");
                    frames_open = false;
                }
            },
        }
    }
}
