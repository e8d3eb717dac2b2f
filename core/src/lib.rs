pub mod archive;
pub mod config;
pub mod diagnostics;
pub mod enrichment;
pub mod error;
pub mod importer;
pub mod matching;
pub mod models;
pub mod pairing;
pub mod registry;
pub mod text;
pub mod upload;

pub use config::{ApiConfig, ImportConfig};
pub use error::CoreError;
pub use importer::{import_archive, import_from_source, plan_import, ImportOutcome, ImportPlan};
pub use models::{ImportSummary, MediaRecord};
pub use pairing::{PairingMap, PairingModel};
pub use upload::{upload_channels, UploadOrchestrator, UploadProgress};
