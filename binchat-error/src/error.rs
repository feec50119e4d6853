use crate::{ErrorKind, ErrorStatus};
use std::fmt;

/// The error returned by every fallible binchat operation.
///
/// `message` is what a user sees (the turn loop hands it to the sink as is).
/// The operation trail and context are for logs.
///
/// ```rust
/// use binchat_error::{Error, ErrorKind};
///
/// let err = Error::new(ErrorKind::TransportFailed, "overloaded")
///     .with_operation("AnthropicTransport::query")
///     .with_context("status", "529");
///
/// assert!(err.is_retryable());
/// assert_eq!(
///     err.to_string(),
///     "TransportFailed (temporary) at AnthropicTransport::query [status=529]: overloaded"
/// );
/// ```
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: ErrorStatus,
    /// Innermost operation first
    trail: Vec<&'static str>,
    context: Vec<(&'static str, String)>,
    source: Option<anyhow::Error>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: kind.default_status(),
            trail: Vec::new(),
            context: Vec::new(),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> ErrorStatus {
        self.status
    }

    pub fn is_retryable(&self) -> bool {
        self.status.is_retryable()
    }

    /// Outermost operation, or `""` if none was recorded
    pub fn operation(&self) -> &'static str {
        self.trail.last().copied().unwrap_or("")
    }

    /// Every operation the error passed through, innermost first
    pub fn trail(&self) -> &[&'static str] {
        &self.trail
    }

    pub fn context(&self) -> &[(&'static str, String)] {
        &self.context
    }

    /// Record the operation the error is passing through
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        self.trail.push(operation);
        self
    }

    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Attach the underlying error. Set at most once.
    pub fn set_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "source already set");
        self.source = Some(source.into());
        self
    }

    /// Retrying cannot help, whatever the kind says
    pub fn permanent(mut self) -> Self {
        self.status = ErrorStatus::Permanent;
        self
    }

    /// Retries ran out
    pub fn persist(mut self) -> Self {
        self.status = self.status.persist();
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind, self.status)?;
        if !self.trail.is_empty() {
            write!(f, " at {}", self.trail.iter().rev().copied().collect::<Vec<_>>().join(" <- "))?;
        }
        if !self.context.is_empty() {
            let pairs: Vec<String> = self.context.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            write!(f, " [{}]", pairs.join(", "))?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({}): {}", self.kind, self.status, self.message)?;
        for op in self.trail.iter().rev() {
            writeln!(f, "  at {}", op)?;
        }
        for (key, value) in &self.context {
            writeln!(f, "  {} = {}", key, value)?;
        }
        if let Some(source) = &self.source {
            writeln!(f, "  caused by: {:?}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            _ => ErrorKind::IoFailed,
        };
        Error::new(kind, err.to_string()).set_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_follows_kind() {
        assert_eq!(Error::new(ErrorKind::StreamFailed, "eof").status(), ErrorStatus::Temporary);
        assert_eq!(Error::new(ErrorKind::NotConnected, "x").status(), ErrorStatus::Permanent);

        let err = Error::new(ErrorKind::TransportFailed, "bad request").permanent();
        assert!(!err.is_retryable());

        let err = Error::new(ErrorKind::RateLimited, "slow down").persist();
        assert_eq!(err.status(), ErrorStatus::Persistent);
    }

    #[test]
    fn test_trail() {
        let err = Error::new(ErrorKind::IoFailed, "disk full")
            .with_operation("FileBackend::append_line")
            .with_operation("SessionLog::append_user_message");

        assert_eq!(err.operation(), "SessionLog::append_user_message");
        assert_eq!(err.trail(), &["FileBackend::append_line", "SessionLog::append_user_message"]);
        assert!(err
            .to_string()
            .contains("at SessionLog::append_user_message <- FileBackend::append_line"));
    }

    #[test]
    fn test_display_is_single_line() {
        let err = Error::new(ErrorKind::NoActiveSession, "call start_new_session() first")
            .with_context("target", "/tmp/a.i64")
            .with_context("entry", "user");

        let display = err.to_string();
        assert!(!display.contains('\n'));
        assert_eq!(
            display,
            "NoActiveSession (permanent) [target=/tmp/a.i64, entry=user]: call start_new_session() first"
        );
        assert_eq!(err.message(), "call start_new_session() first");
    }

    #[test]
    fn test_debug_lists_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = Error::from(io).with_operation("FileBackend::prepare_session");

        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(std::error::Error::source(&err).is_some());
        let debug = format!("{:?}", err);
        assert!(debug.contains("at FileBackend::prepare_session"));
        assert!(debug.contains("caused by"));
    }
}
