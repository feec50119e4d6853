use crate::ErrorStatus;
use std::fmt;

/// What went wrong.
///
/// Precondition kinds are API misuse and are raised to the caller. Agent
/// kinds end a turn loop call. Script kinds never leave the executor except
/// as text. Log and io kinds come from the session log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Driven before `connect()` succeeded
    NotConnected,
    /// Session log append before `start_new_session()`
    NoActiveSession,

    /// The agent rejected or dropped a request
    TransportFailed,
    /// The response stream broke mid-way
    StreamFailed,
    NetworkFailed,
    RateLimited,
    AuthenticationFailed,

    /// A fragment raised while executing
    ScriptFailed,
    /// The thread owning the database (or a worker) has gone away
    ChannelClosed,

    SessionNotFound,
    SerializationFailed,

    FileNotFound,
    PermissionDenied,
    IoFailed,

    ConfigInvalid,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        use ErrorKind::*;
        match self {
            NotConnected => "NotConnected",
            NoActiveSession => "NoActiveSession",
            TransportFailed => "TransportFailed",
            StreamFailed => "StreamFailed",
            NetworkFailed => "NetworkFailed",
            RateLimited => "RateLimited",
            AuthenticationFailed => "AuthenticationFailed",
            ScriptFailed => "ScriptFailed",
            ChannelClosed => "ChannelClosed",
            SessionNotFound => "SessionNotFound",
            SerializationFailed => "SerializationFailed",
            FileNotFound => "FileNotFound",
            PermissionDenied => "PermissionDenied",
            IoFailed => "IoFailed",
            ConfigInvalid => "ConfigInvalid",
        }
    }

    /// Status a fresh error of this kind starts with
    pub fn default_status(&self) -> ErrorStatus {
        use ErrorKind::*;
        match self {
            TransportFailed | StreamFailed | NetworkFailed | RateLimited => ErrorStatus::Temporary,
            _ => ErrorStatus::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.default_status().is_retryable()
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, ErrorKind::NotConnected | ErrorKind::NoActiveSession)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
