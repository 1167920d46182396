use std::io::Write;

use tracing::warn;

use crate::error::Result;
use crate::parser::CollatedQuestion;

pub const OPTION_COLUMNS: usize = 4;
pub const HEADER: [&str; OPTION_COLUMNS + 1] =
    ["Stem Text", "Option 1", "Option 2", "Option 3", "Option 4"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExportSummary {
    pub rows: usize,
    /// Options past the fourth column, summed over all rows.
    pub dropped_options: usize,
}

/// One row per question with fixed option columns. Missing options are left
/// empty; extra ones are dropped.
pub fn write_csv<W: Write>(out: &mut W, questions: &[CollatedQuestion]) -> Result<ExportSummary> {
    let mut summary = ExportSummary::default();
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(HEADER)?;

    for q in questions {
        let mut fields = Vec::with_capacity(OPTION_COLUMNS + 1);
        fields.push(q.stem_text.as_str());
        for i in 0..OPTION_COLUMNS {
            fields.push(q.options.get(i).map_or("", String::as_str));
        }
        if q.options.len() > OPTION_COLUMNS {
            let extra = q.options.len() - OPTION_COLUMNS;
            warn!(stem = %q.stem_text, extra, "options beyond column 4 not exported");
            summary.dropped_options += extra;
        }
        wtr.write_record(&fields)?;
        summary.rows += 1;
    }
    wtr.flush()?;
    Ok(summary)
}
