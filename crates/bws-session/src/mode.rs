use bws_client::BwsTask;
use bws_core::{BwsToken, MovementDirection};

/// Poses of one reference/motion image pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturePair {
    /// Pose of the reference image.
    pub current: MovementDirection,
    /// Pose the user moves to for the motion image.
    pub destination: MovementDirection,
}

impl CapturePair {
    pub const fn new(current: MovementDirection, destination: MovementDirection) -> Self {
        Self {
            current,
            destination,
        }
    }
}

/// Enrollment capture sequence. One prompted turn per pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentPolicy {
    pub pairs: Vec<CapturePair>,
}

impl Default for EnrollmentPolicy {
    fn default() -> Self {
        use MovementDirection::*;
        Self {
            pairs: vec![
                CapturePair::new(Any, Up),
                CapturePair::new(Any, Down),
                CapturePair::new(Any, Left),
                CapturePair::new(Any, Right),
            ],
        }
    }
}

/// What kind of attempt a session runs. Verification and enrollment share
/// the capture/upload flow and differ only in these policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Verify,
    Enroll(EnrollmentPolicy),
}

impl Mode {
    pub fn enroll() -> Self {
        Mode::Enroll(EnrollmentPolicy::default())
    }

    /// Completion call made once every pair is uploaded.
    pub fn task(&self) -> BwsTask {
        match self {
            Mode::Verify => BwsTask::Verify,
            Mode::Enroll(_) => BwsTask::Enroll,
        }
    }

    /// Verification waits for a face before the first capture; enrollment
    /// goes straight to movement prompts.
    pub fn waits_for_face(&self) -> bool {
        matches!(self, Mode::Verify)
    }

    /// Image pairs for the next capture sequence.
    ///
    /// For challenge-response tokens the row is chosen by the number of
    /// failed verify calls so far, so each retry uses a fresh row.
    pub fn capture_pairs(&self, token: &BwsToken, failed_operations: u32) -> Vec<CapturePair> {
        match self {
            Mode::Enroll(policy) => policy.pairs.clone(),
            Mode::Verify => match token.challenges() {
                Some(matrix) if !matrix.is_empty() => {
                    let row = &matrix[failed_operations as usize % matrix.len()];
                    challenge_pairs(row)
                }
                _ => vec![CapturePair::new(MovementDirection::Any, MovementDirection::Any)],
            },
        }
    }
}

/// Walk a challenge row two directions at a time. A trailing single
/// direction is paired with `Any`.
pub fn challenge_pairs(row: &[MovementDirection]) -> Vec<CapturePair> {
    row.chunks(2)
        .map(|chunk| {
            CapturePair::new(
                chunk[0],
                chunk.get(1).copied().unwrap_or(MovementDirection::Any),
            )
        })
        .collect()
}
