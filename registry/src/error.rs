//! Registry errors.

use cartpilot_core::error::{CopilotError, ErrorKind, InteractError};
use thiserror::Error;

/// Errors from registry lookup and resolution.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The page id is not in the registry.
    #[error("page '{0}' not registered")]
    PageNotFound(String),
    /// The chain id is not on the page. Fatal for the calling phase.
    #[error("chain '{chain_id}' not found on page '{page_id}'")]
    ChainNotFound {
        /// Page that was searched.
        page_id: String,
        /// Missing chain id.
        chain_id: String,
    },
    /// A registry entry names an active version that does not exist.
    #[error("page '{page_id}' has no version '{version}'")]
    VersionMissing {
        /// Page with the dangling reference.
        page_id: String,
        /// The missing version label.
        version: String,
    },
    /// Registry files could not be read.
    #[error("registry I/O error: {0}")]
    Io(String),
    /// Registry files did not parse.
    #[error("registry parse error: {0}")]
    Parse(String),
    /// The interactor failed below the resolver (transport fault, not a
    /// plain miss: misses resolve to `None`).
    #[error(transparent)]
    Interact(#[from] InteractError),
}

impl From<RegistryError> for CopilotError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Interact(inner) => inner.into(),
            RegistryError::ChainNotFound { .. } | RegistryError::PageNotFound(_) => {
                Self::new(ErrorKind::SelectorFailed, err.to_string())
            },
            RegistryError::VersionMissing { .. }
            | RegistryError::Parse(_)
            | RegistryError::Io(_) => Self::new(ErrorKind::Corruption, err.to_string()),
        }
    }
}
