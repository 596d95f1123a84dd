//! Store-side error types.

use thiserror::Error;

/// Errors loading app manifests.
#[derive(Error, Debug)]
pub enum PolicyError {
    /// Manifest directory could not be walked
    #[error("failed to scan manifest directory: {0}")]
    Io(#[from] std::io::Error),
}
