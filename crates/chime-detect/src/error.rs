//! Error types for chime-detect

use thiserror::Error;

use crate::events::TabId;

/// Result type alias using chime-detect Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while tracking tabs
#[derive(Error, Debug)]
pub enum Error {
    /// The tab no longer accepts messages (closed or navigated away)
    #[error("Tab {0} is gone")]
    TabGone(TabId),

    /// A streaming endpoint pattern could not be compiled
    #[error("Invalid endpoint pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl Error {
    /// Check if this error means the tab should be torn down
    pub fn is_tab_gone(&self) -> bool {
        matches!(self, Error::TabGone(_))
    }
}
