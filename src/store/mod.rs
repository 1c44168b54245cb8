//! Local persistence behind narrow repository interfaces.
//!
//! Each store has an in-memory implementation (tests, simulations) and a
//! JSON-file implementation rooted in the config directory.

pub mod catalog;
pub mod preferences;
pub mod repository;

use thiserror::Error;

pub use catalog::Catalog;
pub use preferences::{JsonPreferences, MemoryPreferences, PreferencesStore};
pub use repository::{JsonRepository, Keyed, MemoryRepository, Repository};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed data: {0}")]
    Json(#[from] serde_json::Error),
}
