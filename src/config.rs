use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;
use crate::parser::tuning::Tuning;

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "mcq.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: PathBuf,
    pub tuning: Tuning,
    pub chunking: Chunking,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: PathBuf::from("data/mcq.sqlite"),
            tuning: Tuning::default(),
            chunking: Chunking::default(),
        }
    }
}

/// How transcripts are split for the external extractor.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Chunking {
    pub target_chars: usize,
    pub overlap_lines: usize,
}

impl Default for Chunking {
    fn default() -> Self {
        Chunking {
            target_chars: 25_000,
            overlap_lines: 10,
        }
    }
}

/// Defaults, then the TOML file, then `MCQ_*` environment variables.
///
/// An explicit `path` must exist; the default `mcq.toml` is optional. Nested
/// keys use a double underscore: `MCQ_TUNING__SIMILARITY_THRESHOLD=70`.
pub fn load(path: Option<&Path>) -> Result<Settings> {
    let file = match path {
        Some(p) => File::from(p).required(true),
        None => File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
    };
    let settings = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix("MCQ")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;
    Ok(settings)
}
