pub mod associate;
pub mod options;
pub mod similarity;
pub mod stems;
pub mod transcript;
pub mod tuning;

use itertools::Itertools;
use serde::Serialize;
use tracing::debug;

use associate::AssociationMethod;
use tuning::Tuning;

/// A question stem with its answer options.
///
/// Serializes to the `{stem_text, options}` shape the external extractor also
/// produces; provenance fields are only present for transcript collation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollatedQuestion {
    pub stem_text: String,
    pub options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stem_sequence_id: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<OptionSource>,
}

impl CollatedQuestion {
    pub fn new(stem_text: impl Into<String>, options: Vec<String>) -> Self {
        CollatedQuestion {
            stem_text: stem_text.into(),
            options,
            stem_sequence_id: None,
            sources: Vec::new(),
        }
    }
}

/// Where one block of a question's options came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OptionSource {
    pub sequence_id: usize,
    pub method: AssociationMethod,
}

/// Keep the first question for each stem, compared lowercased and trimmed.
pub fn dedup_by_stem(questions: Vec<CollatedQuestion>) -> Vec<CollatedQuestion> {
    questions
        .into_iter()
        .unique_by(|q| q.stem_text.trim().to_lowercase())
        .collect()
}

/// Four passes: transcript → messages → stem flags → collated questions.
pub fn collate_transcript(text: &str, tuning: &Tuning) -> Vec<CollatedQuestion> {
    let mut messages = transcript::read_messages(text);
    stems::annotate(&mut messages, tuning);
    let questions = associate::associate(&messages, tuning);
    debug!(
        messages = messages.len(),
        stems = messages.iter().filter(|m| m.is_stem).count(),
        questions = questions.len(),
        "collated transcript"
    );
    questions
}
