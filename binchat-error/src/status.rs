//! Error status - how the caller should treat an error

use std::fmt;

/// Whether retrying the failed operation can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorStatus {
    /// Retrying will not help
    Permanent,
    /// Retrying may succeed
    Temporary,
    /// Was temporary, but retries were exhausted
    Persistent,
}

impl ErrorStatus {
    /// Check if the status allows a retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorStatus::Temporary)
    }

    /// Temporary errors become persistent once retries run out
    pub fn persist(self) -> Self {
        match self {
            ErrorStatus::Temporary => ErrorStatus::Persistent,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStatus::Permanent => "permanent",
            ErrorStatus::Temporary => "temporary",
            ErrorStatus::Persistent => "persistent",
        }
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_only_moves_temporary() {
        assert_eq!(ErrorStatus::Temporary.persist(), ErrorStatus::Persistent);
        assert_eq!(ErrorStatus::Permanent.persist(), ErrorStatus::Permanent);
        assert_eq!(ErrorStatus::Persistent.persist(), ErrorStatus::Persistent);
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorStatus::Temporary.to_string(), "temporary");
    }
}
