use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide error type.
///
/// Every failure from the configfs layer is passed through unchanged to the
/// caller; there are no retries and no recovery beyond releasing the session
/// handle. The variants map one-to-one onto the lifecycle steps so a caller
/// can tell which step aborted the pipeline.
#[derive(Error, Debug)]
pub enum GadgetError {
    #[error("ConfigFS gadget root not available at {}", .0.display())]
    SessionInit(PathBuf),

    #[error("Failed to create {kind} at {}: {source}", .path.display())]
    Create {
        kind: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to attach function to configuration at {}: {source}", .path.display())]
    Attach {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No USB Device Controller (UDC) found")]
    NoUdc,

    #[error("Failed to enable gadget {gadget}: {reason}")]
    Enable { gadget: String, reason: String },

    #[error("Failed to disable gadget {gadget}: {reason}")]
    Disable { gadget: String, reason: String },

    #[error("Failed to remove {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read attribute {}: {source}", .path.display())]
    AttributeRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    AttributeWrite {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, GadgetError>;
