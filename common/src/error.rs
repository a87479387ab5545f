use thiserror::Error;

/// Transient sensor failure. Callers retry a bounded number of times and
/// then degrade to a zero reading; this never takes the device down.
#[derive(Debug, Clone, Error)]
#[error("sensor read failed: {0}")]
pub struct SensorError(pub String);

/// A key-value commit did not go through. Values committed earlier remain
/// visible; in-memory state stays authoritative until the next save.
#[derive(Debug, Clone, Error)]
#[error("config commit failed: {0}")]
pub struct PersistError(pub String);

#[derive(Debug, Clone, Error)]
pub enum NetworkJoinError {
    #[error("association with `{ssid}` failed: {reason}")]
    Association { ssid: String, reason: String },
    /// The bounded wait for an address assignment expired. Counts as a
    /// failed attempt toward the retry cap.
    #[error("timed out waiting for address assignment")]
    AddressTimeout,
    #[error("join abandoned after {0} attempts")]
    RetriesExhausted(u32),
}

#[derive(Debug, Clone, Error)]
pub enum RequestError {
    #[error("missing or malformed field `{0}`")]
    BadField(&'static str),
    #[error("request body too large")]
    BodyTooLarge,
    #[error("request body is empty")]
    EmptyBody,
}
