pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod identity;
pub mod models;
pub mod normalize;
pub mod ocr;
pub mod protocol;
pub mod reconcile;
pub mod store;
pub mod summary;

pub use classify::classify;
pub use config::AudienceConfig;
pub use error::AudienceError;
pub use extract::{extract_all, AccountMatch};
pub use identity::{resolve_identity, IdentitySource};
pub use models::{Observation, Platform, UNPARSED_FOLLOWERS};
pub use ocr::{create_engine, OcrBackendConfig, OcrEngine, OcrError};
pub use reconcile::reconcile;
pub use store::{InMemoryObservationStore, ObservationStore, PgObservationStore};
pub use summary::summarize;
