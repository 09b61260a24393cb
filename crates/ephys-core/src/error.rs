//! Error handling for the ephys workspace
//!
//! One error type shared by the signal model and the statistics crate. Every
//! failure is a precondition or consistency violation surfaced immediately;
//! nothing in the core retries.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ephys operations
pub type EphysResult<T> = Result<T, EphysError>;

/// Error type for all ephys operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EphysError {
    /// Signal construction or access violated a Signal invariant
    #[error("Invalid signal: {reason}")]
    InvalidSignal {
        /// Description of the violated invariant
        reason: String,
    },

    /// Two arrays that must agree in shape do not
    #[error("Shape mismatch in {context}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        /// Where the mismatch was detected
        context: &'static str,
        /// Expected shape
        expected: Vec<usize>,
        /// Shape actually found
        found: Vec<usize>,
    },

    /// None of LFP, MUA or spikes was supplied
    #[error("At least one of LFP, MUA or spikes must be present")]
    MissingSignal,

    /// Event name not present in the event table
    #[error("Unknown event '{event}'")]
    UnknownEvent {
        /// Requested event name
        event: String,
    },

    /// Open-ended time-lock requested on the last declared event
    #[error("Event '{event}' has no successor and no fixed duration was given")]
    NoSuccessorEvent {
        /// Requested event name
        event: String,
    },

    /// Event table construction failed
    #[error("Invalid event table: {reason}")]
    InvalidEvents {
        /// Description of the problem
        reason: String,
    },

    /// Channel selection was out of range or not strictly increasing
    #[error("Invalid channel selection: {reason}")]
    ChannelSelection {
        /// Description of the problem
        reason: String,
    },

    /// Element is incompatible with an established statistic
    #[error("Incompatible element for {kind}: {reason}")]
    IncompatibleElement {
        /// Statistic kind that rejected the element
        kind: &'static str,
        /// Description of the mismatch
        reason: String,
    },

    /// Operation needs a payload but nothing has been accumulated yet
    #[error("Statistic {kind} has no accumulated data")]
    EmptyStatistic {
        /// Statistic kind
        kind: &'static str,
    },

    /// Channel-table literal could not be parsed
    #[error("Literal parse error at offset {offset} in {input:?}: {reason}")]
    LiteralParse {
        /// Text being parsed
        input: String,
        /// Byte offset of the failure
        offset: usize,
        /// Description of the failure
        reason: String,
    },

    /// Invalid configuration value
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Description of the configuration error
        message: String,
    },

    /// Persisted state is missing, inconsistent or corrupt
    #[error("Corrupt persisted state at {}: {reason}", path.display())]
    Persistence {
        /// Path of the offending file or directory
        path: PathBuf,
        /// Description of the problem
        reason: String,
    },

    /// Persisted statistic was written by a different kind
    #[error("Expected persisted statistic of kind {expected}, found {found}")]
    KindMismatch {
        /// Kind requested by the caller
        expected: &'static str,
        /// Kind recorded on disk
        found: String,
    },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure reported by an external frequency transform
    #[error(transparent)]
    Transform(#[from] anyhow::Error),
}

impl EphysError {
    /// Persistence error for `path`
    pub fn persistence(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        EphysError::Persistence {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience macro for creating invalid-signal errors
#[macro_export]
macro_rules! signal_error {
    ($($arg:tt)*) => {
        $crate::error::EphysError::InvalidSignal {
            reason: format!($($arg)*),
        }
    };
}

/// Convenience macro for creating channel-selection errors
#[macro_export]
macro_rules! selection_error {
    ($($arg:tt)*) => {
        $crate::error::EphysError::ChannelSelection {
            reason: format!($($arg)*),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = EphysError::ShapeMismatch {
            context: "time lock",
            expected: vec![2, 500, 3],
            found: vec![2, 499, 3],
        };
        let display = format!("{}", error);
        assert!(display.contains("Shape mismatch"));
        assert!(display.contains("500"));
        assert!(display.contains("499"));
    }

    #[test]
    fn test_macros() {
        let error = signal_error!("times has {} entries, data has {}", 3, 4);
        assert!(matches!(
            error,
            EphysError::InvalidSignal { ref reason } if reason == "times has 3 entries, data has 4"
        ));

        let error = selection_error!("index {} out of range", 9);
        assert!(error.to_string().contains("index 9 out of range"));
    }

    #[test]
    fn test_transform_error_is_transparent() {
        let error: EphysError = anyhow::anyhow!("taper window longer than epoch").into();
        assert_eq!(error.to_string(), "taper window longer than epoch");
    }
}
