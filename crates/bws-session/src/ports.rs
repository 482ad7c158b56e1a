//! Collaborators the session talks to but does not implement: the UI, the
//! camera and the on-device face detector.

use bws_core::{BwsError, GrayscaleImage, MovementDirection, Warning};

/// A camera frame, already converted to luminance.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: GrayscaleImage,
    /// Clockwise rotation needed to bring the frame upright.
    pub rotation_degrees: u32,
}

impl Frame {
    pub fn upright(image: GrayscaleImage) -> Self {
        Self {
            image,
            rotation_degrees: 0,
        }
    }
}

/// Informational banner shown while the attempt runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    Initializing,
    FindingFace,
    LookIntoCamera,
    /// Ask for a small natural movement; no direction required.
    MoveHeadSlightly,
    TurnHead(MovementDirection),
    Uploading,
    Verifying,
    Enrolling,
}

impl Message {
    pub fn user_text(self) -> String {
        match self {
            Message::Initializing => "Initializing...".to_string(),
            Message::FindingFace => "Looking for your face...".to_string(),
            Message::LookIntoCamera => "Please look into the camera.".to_string(),
            Message::MoveHeadSlightly => "Please move your head slightly.".to_string(),
            Message::TurnHead(MovementDirection::Any) => {
                "Please move your head slightly.".to_string()
            }
            Message::TurnHead(direction) => format!("Please turn your head {direction}."),
            Message::Uploading => "Uploading images...".to_string(),
            Message::Verifying => "Verifying...".to_string(),
            Message::Enrolling => "Enrolling...".to_string(),
        }
    }
}

/// Notifications to the UI layer, one per user-visible state.
pub trait View {
    fn request_camera_permission(&mut self);
    fn show_camera_permission_denied(&mut self);
    fn show_message(&mut self, message: Message);
    fn hide_message(&mut self);
    fn show_movement_indicator(&mut self, direction: MovementDirection);
    fn hide_movement_indicator(&mut self);
    fn show_warning(&mut self, warning: Warning);
    fn show_error(&mut self, error: &BwsError);
    fn show_verification_success(&mut self);
    fn show_enrollment_success(&mut self);
    /// Leave the capture screen, reporting the result to the caller.
    fn navigate_back(&mut self, success: bool);
}

/// On-device face presence check used to gate the first capture.
pub trait FaceDetector {
    /// False while the detector is still loading or unavailable.
    fn is_ready(&self) -> bool;
    fn contains_face(&mut self, image: &GrayscaleImage) -> bool;
}

/// Detector for hosts without on-device face detection. Never ready, so the
/// face wait is skipped and the webservice's own check applies.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableFaceDetector;

impl FaceDetector for UnavailableFaceDetector {
    fn is_ready(&self) -> bool {
        false
    }

    fn contains_face(&mut self, _image: &GrayscaleImage) -> bool {
        false
    }
}
