//! Error types for the ringtap library

use thiserror::Error;

/// Result type alias for ringtap operations
pub type Result<T> = std::result::Result<T, RingtapError>;

/// Main error type for ringtap
#[derive(Error, Debug)]
pub enum RingtapError {
    /// I/O errors from mmap, file, or socket operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The ring has no free slot and the caller requested a hard failure
    /// instead of the normal silent-drop overrun behavior.
    #[error("ring buffer is full")]
    RingFull,

    /// Invalid configuration parameter
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration problem
        message: String,
    },

    /// Operation requires administrator capability
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation
        message: String,
    },

    /// A byte-code filter program failed validation
    #[error("invalid filter program: {reason}")]
    InvalidFilter {
        /// Reason the program was rejected
        reason: String,
    },

    /// A pattern exceeds the matcher's supported length
    #[error("pattern too long: {length} bytes (max {max})")]
    PatternTooLong {
        /// Length of the rejected pattern
        length: usize,
        /// Maximum supported pattern length
        max: usize,
    },

    /// A search was attempted on a matcher that has not been compiled
    #[error("automaton has not been compiled")]
    AutomatonNotCompiled,

    /// The automaton kind does not support searching (TRIE mode)
    #[error("search is not implemented for this automaton kind")]
    SearchNotImplemented,

    /// A malformed bloom-filter rule string (`+tag=value` / `-tag=value`)
    #[error("malformed bloom rule: {rule}")]
    MalformedBloomRule {
        /// The offending rule text
        rule: String,
    },

    /// Generic error for conditions that should not occur in a correctly
    /// functioning system.
    #[error("unexpected error: {message}")]
    Unexpected {
        /// Description of the unexpected condition
        message: String,
    },
}

impl RingtapError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig { message: message.into() }
    }

    /// Create a new permission error
    pub fn permission(message: impl Into<String>) -> Self {
        Self::PermissionDenied { message: message.into() }
    }

    /// Create a new filter validation error
    pub fn invalid_filter(reason: impl Into<String>) -> Self {
        Self::InvalidFilter { reason: reason.into() }
    }

    /// Create a new malformed bloom rule error
    pub fn malformed_bloom_rule(rule: impl Into<String>) -> Self {
        Self::MalformedBloomRule { rule: rule.into() }
    }

    /// Create a new unexpected-condition error
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected { message: message.into() }
    }

    /// Whether retrying the same operation later might succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::RingFull | Self::Io(_))
    }
}
