pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod import;
pub mod ingest;
pub mod parser;

pub use config::Settings;
pub use error::{Error, Result};
pub use parser::{collate_transcript, CollatedQuestion};
