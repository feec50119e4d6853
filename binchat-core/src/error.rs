//! Core error helpers
//!
//! Re-exports binchat-error and adds constructors for the failures the
//! transport, executor and session log raise.

pub use binchat_error::{Error, ErrorKind, ErrorStatus, Result};

/// The turn loop was driven before `connect()`
pub fn not_connected() -> Error {
    Error::new(ErrorKind::NotConnected, "Client not connected. Call connect() first.")
}

/// A history append happened before `start_new_session()`
pub fn no_active_session() -> Error {
    Error::new(ErrorKind::NoActiveSession, "No active session. Call start_new_session() first.")
}

/// The agent request was not accepted
pub fn transport_failed(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::TransportFailed, message)
}

/// The response stream errored mid-way
pub fn stream_failed(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::StreamFailed, message)
}

/// Map an HTTP status returned by the agent backend to an error
pub fn http_status(status: u16, body: impl Into<String>) -> Error {
    let body = body.into();
    let err = match status {
        401 | 403 => Error::new(ErrorKind::AuthenticationFailed, body),
        429 => Error::new(ErrorKind::RateLimited, body),
        500..=599 => transport_failed(body),
        _ => transport_failed(body).permanent(),
    };
    err.with_context("status", status.to_string())
}

/// Create a NetworkFailed error
pub fn network_failed(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::NetworkFailed, message)
}

/// The executor thread hung up
pub fn channel_closed(name: impl Into<String>) -> Error {
    let name = name.into();
    Error::new(ErrorKind::ChannelClosed, format!("channel '{}' closed", name))
        .with_context("channel", name)
}

/// A script engine failure, before it is rendered into `Script error: ...`
pub fn script_failed(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::ScriptFailed, message)
}

/// A log entry could not be encoded
pub fn serialization_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::SerializationFailed, message)
}

/// Filesystem or thread-spawn failure with a readable message
pub fn io_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::IoFailed, message)
}

/// A setting named `key` has an unusable value
pub fn config_invalid(key: &'static str, message: impl Into<String>) -> Error {
    Error::new(ErrorKind::ConfigInvalid, message).with_context("key", key)
}

/// No stored entries for the session id
pub fn session_not_found(session_id: impl Into<String>) -> Error {
    let session_id = session_id.into();
    Error::new(ErrorKind::SessionNotFound, format!("session '{}' not found", session_id))
        .with_context("session_id", session_id)
}
