//! Mapping of webservice responses onto [`BwsError`].
//!
//! Status codes, JSON field names and error code strings are the contract
//! with the webservice and are matched verbatim.

use bws_core::BwsError;
use serde::Deserialize;

use crate::transport::HttpResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NoFace,
    MultipleFaces,
}

/// Result of an image upload that reached the webservice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Accepted,
    /// The image failed the server-side quality check.
    Rejected(RejectReason),
}

impl UploadOutcome {
    pub fn into_result(self) -> Result<(), BwsError> {
        match self {
            UploadOutcome::Accepted => Ok(()),
            UploadOutcome::Rejected(RejectReason::NoFace) => Err(BwsError::NoFaceFound),
            UploadOutcome::Rejected(RejectReason::MultipleFaces) => {
                Err(BwsError::MultipleFacesFound)
            }
        }
    }
}

#[derive(Deserialize)]
struct UploadBody {
    #[serde(rename = "Accepted")]
    accepted: bool,
    #[serde(rename = "Error", default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct FinalizeBody {
    #[serde(rename = "Success")]
    success: bool,
    #[serde(rename = "Error", default)]
    error: Option<String>,
}

pub fn interpret_token_response(response: &HttpResponse) -> Result<String, BwsError> {
    match response.status {
        200 => Ok(response.body.trim().to_string()),
        status => Err(BwsError::Technical(format!(
            "token request failed with HTTP {status}"
        ))),
    }
}

pub fn interpret_upload_response(response: &HttpResponse) -> Result<UploadOutcome, BwsError> {
    match response.status {
        200 => {}
        401 => return Err(BwsError::WrongCredentials),
        status => {
            return Err(BwsError::Technical(format!(
                "upload failed with HTTP {status}"
            )))
        }
    }

    let body: UploadBody = serde_json::from_str(&response.body)
        .map_err(|e| BwsError::Technical(format!("malformed upload response: {e}")))?;

    if body.accepted {
        return Ok(UploadOutcome::Accepted);
    }

    let reason = match body.error.as_deref() {
        Some("NoFaceFound") => RejectReason::NoFace,
        Some("MultipleFacesFound") => RejectReason::MultipleFaces,
        other => {
            // Unknown quality codes are reported as "no face". This may hide
            // new server-side codes.
            tracing::warn!(code = ?other, "upload quality check code remapped to NoFaceFound");
            RejectReason::NoFace
        }
    };
    Ok(UploadOutcome::Rejected(reason))
}

pub fn interpret_finalize_response(response: &HttpResponse) -> Result<(), BwsError> {
    match response.status {
        200 => {}
        400 => return Err(BwsError::NoSamples),
        401 => return Err(BwsError::WrongCredentials),
        status => {
            return Err(BwsError::Technical(format!(
                "verify/enroll failed with HTTP {status}"
            )))
        }
    }

    let body: FinalizeBody = serde_json::from_str(&response.body)
        .map_err(|e| BwsError::Technical(format!("malformed verify/enroll response: {e}")))?;

    if body.success {
        return Ok(());
    }

    match body.error.as_deref() {
        None => Err(BwsError::NotRecognized),
        Some("LiveDetectionFailed") => Err(BwsError::LiveDetectionFailed),
        Some("ChallengeResponseFailed") => Err(BwsError::ChallengeResponseFailed),
        Some("NoTemplateAvailable") => Err(BwsError::NoEnrollment),
        Some(code) => Err(BwsError::Technical(format!(
            "unexpected verify/enroll error code {code:?}"
        ))),
    }
}
