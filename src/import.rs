use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::ingest::decode_lossy;
use crate::parser::{dedup_by_stem, CollatedQuestion};

/// Validate one batch of external extractor output: a JSON array of
/// `{stem_text, options}` objects.
///
/// Bad items are skipped with a warning rather than failing the batch. Only a
/// non-array document is an error. Empty `options` are allowed here.
pub fn parse_extracted_batch(json: &str) -> Result<Vec<CollatedQuestion>> {
    let value: Value = serde_json::from_str(json)?;
    let Value::Array(items) = value else {
        return Err(Error::InvalidImport(
            "expected a JSON array of {stem_text, options} objects".into(),
        ));
    };

    let mut questions = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            warn!(item = idx + 1, "skipping non-object item");
            continue;
        };
        let stem = match obj.get("stem_text").and_then(Value::as_str) {
            Some(s) if !s.trim().is_empty() => s,
            _ => {
                warn!(item = idx + 1, "skipping item with missing or empty stem_text");
                continue;
            }
        };
        let options = match obj.get("options") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(opts)) => {
                let strings: Vec<String> = opts
                    .iter()
                    .filter_map(|o| o.as_str().map(str::to_string))
                    .collect();
                if strings.len() != opts.len() {
                    debug!(item = idx + 1, dropped = opts.len() - strings.len(), "non-string options dropped");
                }
                strings
            }
            Some(_) => {
                warn!(item = idx + 1, "skipping item whose options are not a list");
                continue;
            }
        };
        questions.push(CollatedQuestion::new(stem, options));
    }
    debug!(items = items.len(), valid = questions.len(), "parsed extractor batch");
    Ok(questions)
}

pub fn read_batch(path: &Path) -> Result<Vec<CollatedQuestion>> {
    let bytes = std::fs::read(path)?;
    parse_extracted_batch(&decode_lossy(&bytes))
}

/// Concatenate batches in order, keeping the first question for each stem.
pub fn merge_batches(batches: Vec<Vec<CollatedQuestion>>) -> Vec<CollatedQuestion> {
    dedup_by_stem(batches.into_iter().flatten().collect())
}
