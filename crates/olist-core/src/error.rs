use std::fmt;

/// Machine-readable error codes surfaced to error handlers and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    InvalidListName,
    TransportFailed,
    LockContention,
    LockInterrupted,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1002",
            Self::InvalidListName => "E2001",
            Self::TransportFailed => "E5001",
            Self::LockContention => "E5002",
            Self::LockInterrupted => "E5003",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidListName => "Invalid list name",
            Self::TransportFailed => "Remote store unreachable",
            Self::LockContention => "Lock contention",
            Self::LockInterrupted => "Lock acquisition interrupted",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to users.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in .olist/config.toml and retry."),
            Self::InvalidListName => Some("Use a plain name without path separators or a leading dot."),
            Self::TransportFailed => {
                Some("Check that the watchpath is reachable; pending edits are kept and retried.")
            }
            Self::LockContention => Some(
                "Another client holds the list lock. Stale locks are evicted automatically after the staleness threshold.",
            ),
            Self::LockInterrupted => None,
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
