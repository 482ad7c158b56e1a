use std::time::Duration;

/// Timing and retry limits of a capture session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// How long to wait for a locally detected face before capturing anyway.
    pub face_detection_timeout: Duration,
    /// How long to wait for movement after the reference image.
    pub motion_detection_timeout: Duration,
    /// Delay before replaying a pair or restarting a capture sequence.
    pub retry_delay: Duration,
    /// Failed image uploads tolerated within one attempt.
    pub max_failed_uploads: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            face_detection_timeout: Duration::from_secs(4),
            motion_detection_timeout: Duration::from_secs(12),
            retry_delay: Duration::from_secs(3),
            max_failed_uploads: 3,
        }
    }
}
