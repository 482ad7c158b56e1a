use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://bws.bioid.com/extension/";

/// Webservice endpoint, credentials and timeouts.
#[derive(Clone)]
pub struct ClientSettings {
    /// Base URL of the BWS extension API.
    pub endpoint: String,
    /// Application identifier used for token issuance.
    pub app_id: String,
    /// Application secret, sent as HTTP Basic credentials with `app_id`.
    pub app_secret: String,
    /// Biometric class id of the subject the tokens are issued for.
    pub bcid: String,
    pub connect_timeout: Duration,
    /// Read timeout for token and verify/enroll calls.
    pub read_timeout: Duration,
    /// Read timeout for image uploads, which carry a PNG payload.
    pub upload_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            app_id: String::new(),
            app_secret: String::new(),
            bcid: String::new(),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(15),
            upload_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientSettings {
    /// Absolute URL of an API operation, e.g. `url("upload")`.
    pub fn url(&self, operation: &str) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), operation)
    }
}

impl std::fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSettings")
            .field("endpoint", &self.endpoint)
            .field("app_id", &self.app_id)
            .field("app_secret", &"<redacted>")
            .field("bcid", &self.bcid)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("upload_timeout", &self.upload_timeout)
            .finish()
    }
}
