#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod aggregate;
pub mod config;
pub mod dataset;
pub mod folds;
pub mod heap;
pub mod ingest;
pub mod mdr;
pub mod partition;
pub mod pipeline;
pub mod queue;
pub mod report;
#[path = "../shared/files.rs"]
pub mod shared_files;
pub mod types;
pub mod shared {
    pub use super::shared_files as files;
}
