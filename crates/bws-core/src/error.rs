use thiserror::Error;

/// Failures raised by the webservice client, the token model and the token
/// provider. The orchestrator decides retry, abort or escalate from
/// [`BwsError::disposition`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BwsError {
    // ── Transport ────────────────────────────────────────────────────────────
    #[error("no connection to the biometric webservice: {0}")]
    NoConnection(String),
    #[error("technical error from the biometric webservice: {0}")]
    Technical(String),

    // ── Credential ───────────────────────────────────────────────────────────
    #[error("the webservice rejected the supplied credentials")]
    WrongCredentials,
    #[error("this device is not registered with the webservice")]
    DeviceNotRegistered,

    // ── Quality ──────────────────────────────────────────────────────────────
    #[error("no face found in the uploaded image")]
    NoFaceFound,
    #[error("multiple faces found in the uploaded image")]
    MultipleFacesFound,
    #[error("no valid samples were uploaded")]
    NoSamples,

    // ── Biometric outcome ────────────────────────────────────────────────────
    #[error("the user was not recognized")]
    NotRecognized,
    #[error("live detection failed")]
    LiveDetectionFailed,
    #[error("challenge response failed")]
    ChallengeResponseFailed,
    #[error("no enrollment on file for this user")]
    NoEnrollment,

    // ── Validation ───────────────────────────────────────────────────────────
    #[error("invalid token: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transport,
    Credential,
    Quality,
    BiometricOutcome,
    Validation,
}

/// User-facing warning. Either a [`BwsError`] with a warn-and-retry policy or
/// a local capture failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Warning {
    NotRecognized,
    ChallengeResponseFailed,
    LiveDetectionFailed,
    NoFaceFound,
    MultipleFacesFound,
    NoSamples,
    MotionDetectionFailed,
}

impl Warning {
    pub fn user_message(self) -> &'static str {
        match self {
            Warning::NotRecognized => "You were not recognized. Please try again.",
            Warning::ChallengeResponseFailed => {
                "The requested head movements were not detected. Please follow the arrows."
            }
            Warning::LiveDetectionFailed => {
                "We could not confirm that you are a live person. Please move your head slightly."
            }
            Warning::NoFaceFound => "No face was found. Please look into the camera.",
            Warning::MultipleFacesFound => "More than one face was found. Make sure you are alone.",
            Warning::NoSamples => "No usable images were captured. Please try again.",
            Warning::MotionDetectionFailed => {
                "No movement was detected. Please move your head as indicated."
            }
        }
    }
}

/// How the orchestrator treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Show the warning; the attempt continues or retries per policy.
    Warning(Warning),
    /// Show the error; the attempt aborts and the caller is told immediately.
    Error,
    /// Not handled; escalates to the host and terminates it.
    Fatal,
}

impl BwsError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BwsError::NoConnection(_) | BwsError::Technical(_) => ErrorClass::Transport,
            BwsError::WrongCredentials | BwsError::DeviceNotRegistered => ErrorClass::Credential,
            BwsError::NoFaceFound | BwsError::MultipleFacesFound | BwsError::NoSamples => {
                ErrorClass::Quality
            }
            BwsError::NotRecognized
            | BwsError::LiveDetectionFailed
            | BwsError::ChallengeResponseFailed
            | BwsError::NoEnrollment => ErrorClass::BiometricOutcome,
            BwsError::Validation(_) => ErrorClass::Validation,
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            BwsError::NotRecognized => Disposition::Warning(Warning::NotRecognized),
            BwsError::ChallengeResponseFailed => {
                Disposition::Warning(Warning::ChallengeResponseFailed)
            }
            BwsError::LiveDetectionFailed => Disposition::Warning(Warning::LiveDetectionFailed),
            BwsError::NoFaceFound => Disposition::Warning(Warning::NoFaceFound),
            BwsError::MultipleFacesFound => Disposition::Warning(Warning::MultipleFacesFound),
            BwsError::NoSamples => Disposition::Warning(Warning::NoSamples),
            BwsError::NoConnection(_)
            | BwsError::Technical(_)
            | BwsError::WrongCredentials
            | BwsError::NoEnrollment
            | BwsError::DeviceNotRegistered => Disposition::Error,
            BwsError::Validation(_) => Disposition::Fatal,
        }
    }

    /// Text shown to the user. Fatal errors have none; they never reach a screen.
    pub fn user_message(&self) -> Option<&'static str> {
        match self.disposition() {
            Disposition::Warning(w) => Some(w.user_message()),
            Disposition::Error => Some(match self {
                BwsError::NoConnection(_) => {
                    "No connection to the server. Check your network and try again later."
                }
                BwsError::WrongCredentials => "The app is not authorized to use the service.",
                BwsError::DeviceNotRegistered => "This device is not registered.",
                BwsError::NoEnrollment => "You are not enrolled yet. Please enroll first.",
                _ => "The server reported a problem. Please try again later.",
            }),
            Disposition::Fatal => None,
        }
    }
}
