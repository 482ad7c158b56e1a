//! BWS token model.
//!
//! A BWS token is a compact signed string of the form
//! `header.payload.signature`. The payload is URL-safe base64 of a flat JSON
//! object carrying the task bitfield, the trait bitfield, the expiration and,
//! for challenge-response verification, a textual matrix of head movements.
//!
//! The signature is never checked on the client; the raw string is handed
//! back to the webservice verbatim as a bearer credential and the server
//! enforces signature and expiry.

use std::fmt;
use std::ops::Deref;

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::direction::MovementDirection;
use crate::error::BwsError;

/// Low four bits of the task field: maximum number of verify/enroll tries.
pub const TASK_MAX_TRIES_MASK: u32 = 0x0F;
pub const TASK_IDENTIFY: u32 = 0x10;
pub const TASK_ENROLL: u32 = 0x20;
pub const TASK_LIVE_DETECTION: u32 = 0x100;
pub const TASK_CHALLENGE_RESPONSE: u32 = 0x200;
pub const TASK_AUTO_ENROLL: u32 = 0x1000;

pub const TRAIT_FACE: u32 = 0x1;
pub const TRAIT_PERIOCULAR: u32 = 0x2;
pub const TRAIT_VOICE: u32 = 0x4;

/// Used when the max-tries nibble of the task field is zero.
pub const DEFAULT_MAX_TRIES: u32 = 3;

// JWT payloads normally drop the padding; tolerate it either way.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Jagged matrix of head movements; one row per verification try.
pub type ChallengeMatrix = Vec<Vec<MovementDirection>>;

/// Decoded token claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub task: u32,
    pub traits: u32,
    /// Absolute expiration, seconds since the Unix epoch.
    pub exp: i64,
    pub challenge: Option<ChallengeMatrix>,
}

impl Claims {
    /// JSON payload form of these claims. The challenge matrix is emitted as
    /// a JSON string holding the matrix, the way the webservice issues it.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("task".into(), Value::from(self.task));
        map.insert("traits".into(), Value::from(self.traits));
        map.insert("exp".into(), Value::from(self.exp));
        if let Some(matrix) = &self.challenge {
            let encoded = serde_json::to_string(matrix).unwrap_or_else(|_| "[]".to_string());
            map.insert("challenge".into(), Value::String(encoded));
        }
        Value::Object(map)
    }

    fn from_payload(payload: &[u8]) -> Result<Self, BwsError> {
        let map: Map<String, Value> = serde_json::from_slice(payload)
            .map_err(|e| BwsError::Validation(format!("token payload is not a JSON object: {e}")))?;

        let task = required_u32(&map, "task")?;
        let traits = required_u32(&map, "traits")?;
        let exp = map
            .get("exp")
            .and_then(Value::as_i64)
            .ok_or_else(|| BwsError::Validation("missing or invalid claim 'exp'".into()))?;

        let challenge = map
            .get("challenge")
            .and_then(Value::as_str)
            .and_then(parse_challenge);

        Ok(Self {
            task,
            traits,
            exp,
            challenge,
        })
    }
}

fn required_u32(map: &Map<String, Value>, key: &str) -> Result<u32, BwsError> {
    map.get(key)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| BwsError::Validation(format!("missing or invalid claim '{key}'")))
}

/// Parse the challenge claim. Anything unparseable means "no challenge".
fn parse_challenge(text: &str) -> Option<ChallengeMatrix> {
    let rows: Vec<Vec<String>> = match serde_json::from_str(text) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring unparseable challenge claim");
            return None;
        }
    };

    let matrix = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|name| name.parse::<MovementDirection>().ok())
                .collect::<Option<Vec<_>>>()
        })
        .collect::<Option<ChallengeMatrix>>()?;

    // Empty rows cannot drive a capture sequence.
    if matrix.is_empty() || matrix.iter().any(Vec::is_empty) {
        return None;
    }
    Some(matrix)
}

/// A decoded BWS token. Immutable once constructed.
#[derive(Clone, PartialEq, Eq)]
pub struct BwsToken {
    raw: String,
    claims: Claims,
}

impl BwsToken {
    /// Split `raw` into its three segments and decode the payload claims.
    pub fn decode(raw: &str) -> Result<Self, BwsError> {
        let raw = raw.trim();
        let segments: Vec<&str> = raw.split('.').collect();
        if segments.len() != 3 {
            return Err(BwsError::Validation(format!(
                "expected 3 token segments, found {}",
                segments.len()
            )));
        }

        let payload = PAYLOAD_ENGINE
            .decode(segments[1])
            .map_err(|e| BwsError::Validation(format!("token payload is not base64url: {e}")))?;
        let claims = Claims::from_payload(&payload)?;

        Ok(Self {
            raw: raw.to_string(),
            claims,
        })
    }

    /// The signed token string, used verbatim as the bearer credential.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn task_bits(&self) -> u32 {
        self.claims.task
    }

    pub fn trait_bits(&self) -> u32 {
        self.claims.traits
    }

    pub fn expiration(&self) -> i64 {
        self.claims.exp
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp(self.claims.exp, 0)
    }

    pub fn is_enrollment(&self) -> bool {
        self.claims.task & TASK_ENROLL != 0
    }

    pub fn is_identification(&self) -> bool {
        self.claims.task & TASK_IDENTIFY != 0
    }

    pub fn is_live_detection_enabled(&self) -> bool {
        self.claims.task & TASK_LIVE_DETECTION != 0
    }

    pub fn is_auto_enroll_enabled(&self) -> bool {
        self.claims.task & TASK_AUTO_ENROLL != 0
    }

    /// True iff the challenge claim decoded to a usable matrix.
    pub fn is_challenge_response(&self) -> bool {
        self.claims.challenge.is_some()
    }

    pub fn challenges(&self) -> Option<&ChallengeMatrix> {
        self.claims.challenge.as_ref()
    }

    pub fn max_tries(&self) -> u32 {
        match self.claims.task & TASK_MAX_TRIES_MASK {
            0 => DEFAULT_MAX_TRIES,
            n => n,
        }
    }

    pub fn has_face_trait(&self) -> bool {
        self.claims.traits & TRAIT_FACE != 0
    }

    pub fn has_periocular_trait(&self) -> bool {
        self.claims.traits & TRAIT_PERIOCULAR != 0
    }

    pub fn has_voice_trait(&self) -> bool {
        self.claims.traits & TRAIT_VOICE != 0
    }

    /// Short hex digest of the raw token, safe to log.
    pub fn fingerprint(&self) -> String {
        Sha256::digest(self.raw.as_bytes())[..8]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

impl fmt::Debug for BwsToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BwsToken")
            .field("fingerprint", &self.fingerprint())
            .field("claims", &self.claims)
            .finish()
    }
}

/// Token for plain or challenge-response verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationToken(BwsToken);

impl VerificationToken {
    /// Decode and reject tokens issued for enrollment or identification.
    pub fn decode(raw: &str) -> Result<Self, BwsError> {
        let token = BwsToken::decode(raw)?;
        if token.is_enrollment() || token.is_identification() {
            return Err(BwsError::Validation(format!(
                "token task {:#x} is not a verification task",
                token.task_bits()
            )));
        }
        Ok(Self(token))
    }

    pub fn into_inner(self) -> BwsToken {
        self.0
    }
}

impl Deref for VerificationToken {
    type Target = BwsToken;

    fn deref(&self) -> &BwsToken {
        &self.0
    }
}

/// Token for enrollment. Task bits are not validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentToken(BwsToken);

impl EnrollmentToken {
    pub fn decode(raw: &str) -> Result<Self, BwsError> {
        BwsToken::decode(raw).map(Self)
    }

    pub fn into_inner(self) -> BwsToken {
        self.0
    }
}

impl Deref for EnrollmentToken {
    type Target = BwsToken;

    fn deref(&self) -> &BwsToken {
        &self.0
    }
}
