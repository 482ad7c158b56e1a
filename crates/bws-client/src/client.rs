use base64::{engine::general_purpose::STANDARD, Engine as _};
use bws_core::{
    BwsError, BwsToken, EnrollmentToken, GrayscaleImage, MovementDirection, VerificationToken,
};

use crate::response::{
    interpret_finalize_response, interpret_token_response, interpret_upload_response,
    UploadOutcome,
};
use crate::settings::ClientSettings;
use crate::transport::{HttpRequest, HttpTransport, UreqTransport};

const ACCEPT_JSON: &str = "application/json";

/// Biometric operation a token is issued for, and the matching
/// completion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BwsTask {
    Verify,
    Enroll,
}

impl BwsTask {
    /// Value of the `task` query parameter and the completion path segment.
    pub fn as_str(self) -> &'static str {
        match self {
            BwsTask::Verify => "verify",
            BwsTask::Enroll => "enroll",
        }
    }
}

/// Issues BWS tokens. May block; called from a background context.
pub trait TokenProvider: Send + Sync {
    fn request_verification_token(&self) -> Result<VerificationToken, BwsError>;
    fn request_enrollment_token(&self) -> Result<EnrollmentToken, BwsError>;
}

/// Image upload and verify/enroll completion. Blocking.
pub trait BwsApi: Send + Sync {
    fn upload_image(
        &self,
        image: &GrayscaleImage,
        token: &BwsToken,
        direction: MovementDirection,
        index: u32,
    ) -> Result<UploadOutcome, BwsError>;

    fn finalize(&self, token: &BwsToken, task: BwsTask) -> Result<(), BwsError>;
}

/// Value of the upload `trait` query parameter for a token.
pub fn trait_parameter(token: &BwsToken) -> &'static str {
    if token.has_face_trait() && token.has_periocular_trait() {
        "Face,Periocular"
    } else if token.has_periocular_trait() {
        "Periocular"
    } else {
        "Face"
    }
}

/// Client for the BWS extension API.
pub struct WebserviceClient<T: HttpTransport = UreqTransport> {
    settings: ClientSettings,
    transport: T,
}

impl WebserviceClient<UreqTransport> {
    pub fn new(settings: ClientSettings) -> Self {
        let transport = UreqTransport::new(settings.connect_timeout);
        Self::with_transport(settings, transport)
    }
}

impl<T: HttpTransport> WebserviceClient<T> {
    pub fn with_transport(settings: ClientSettings, transport: T) -> Self {
        Self {
            settings,
            transport,
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    fn send(&self, request: &HttpRequest) -> Result<crate::transport::HttpResponse, BwsError> {
        self.transport.execute(request).map_err(|e| {
            tracing::warn!(url = %request.url, error = %e, "webservice unreachable");
            BwsError::NoConnection(e.to_string())
        })
    }

    /// Ask the webservice for a token for `bcid`. Returns the raw token text.
    pub fn request_token(&self, bcid: &str, task: BwsTask) -> Result<String, BwsError> {
        let credentials = format!("{}:{}", self.settings.app_id, self.settings.app_secret);
        let request = HttpRequest::get(self.settings.url("token"), self.settings.read_timeout)
            .query("id", self.settings.app_id.as_str())
            .query("bcid", bcid)
            .query("task", task.as_str())
            .header("Authorization", format!("Basic {}", STANDARD.encode(credentials)))
            .header("Accept", "text/plain");

        let response = self.send(&request)?;
        let raw = interpret_token_response(&response)?;
        tracing::info!(bcid, task = task.as_str(), "token issued");
        Ok(raw)
    }
}

impl<T: HttpTransport> TokenProvider for WebserviceClient<T> {
    fn request_verification_token(&self) -> Result<VerificationToken, BwsError> {
        let raw = self.request_token(&self.settings.bcid, BwsTask::Verify)?;
        VerificationToken::decode(&raw)
    }

    fn request_enrollment_token(&self) -> Result<EnrollmentToken, BwsError> {
        let raw = self.request_token(&self.settings.bcid, BwsTask::Enroll)?;
        EnrollmentToken::decode(&raw)
    }
}

impl<T: HttpTransport> BwsApi for WebserviceClient<T> {
    fn upload_image(
        &self,
        image: &GrayscaleImage,
        token: &BwsToken,
        direction: MovementDirection,
        index: u32,
    ) -> Result<UploadOutcome, BwsError> {
        let body = image
            .to_data_url()
            .map_err(|e| BwsError::Technical(format!("image encoding failed: {e}")))?;

        let request =
            HttpRequest::post(self.settings.url("upload"), body, self.settings.upload_timeout)
                .query("tag", direction.as_str())
                .query("index", index.to_string())
            .query("trait", trait_parameter(token))
            .header("Authorization", format!("Bearer {}", token.raw()))
            .header("Content-Type", "text/plain")
            .header("Accept", ACCEPT_JSON);

        let response = self.send(&request)?;
        let outcome = interpret_upload_response(&response)?;
        tracing::debug!(
            token = %token.fingerprint(),
            index,
            direction = %direction,
            outcome = ?outcome,
            "image uploaded"
        );
        Ok(outcome)
    }

    fn finalize(&self, token: &BwsToken, task: BwsTask) -> Result<(), BwsError> {
        let request = HttpRequest::get(self.settings.url(task.as_str()), self.settings.read_timeout)
            .header("Authorization", format!("Bearer {}", token.raw()))
            .header("Accept", ACCEPT_JSON);

        let response = self.send(&request)?;
        let result = interpret_finalize_response(&response);
        tracing::info!(
            token = %token.fingerprint(),
            task = task.as_str(),
            success = result.is_ok(),
            "biometric operation completed"
        );
        result
    }
}
