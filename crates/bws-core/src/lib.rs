//! Core types for remote biometric capture against the BioID Web Service
//! (BWS): token model, grayscale frames, local motion screening and the
//! error taxonomy shared by the client and the capture session.

pub mod direction;
pub mod error;
pub mod frame;
pub mod motion;
pub mod token;

pub use direction::MovementDirection;
pub use error::{BwsError, Disposition, ErrorClass, Warning};
pub use frame::{GrayscaleImage, ImageError};
pub use motion::MotionResult;
pub use token::{BwsToken, ChallengeMatrix, Claims, EnrollmentToken, VerificationToken};
