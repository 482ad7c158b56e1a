//! Protocol client for the BWS extension API: token issuance, image upload
//! and verify/enroll completion, with response codes mapped onto
//! [`bws_core::BwsError`].

pub mod client;
pub mod response;
pub mod settings;
pub mod transport;

pub use client::{trait_parameter, BwsApi, BwsTask, TokenProvider, WebserviceClient};
pub use response::{RejectReason, UploadOutcome};
pub use settings::ClientSettings;
pub use transport::{
    HttpRequest, HttpResponse, HttpTransport, Method, TransportError, UreqTransport,
};
