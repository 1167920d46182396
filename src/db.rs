use std::path::Path;

use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection};

use crate::error::Result;
use crate::parser::CollatedQuestion;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS collated_questions (
            id           INTEGER PRIMARY KEY,
            stem_text    TEXT NOT NULL,
            options      TEXT NOT NULL DEFAULT '[]',
            source       TEXT NOT NULL CHECK(source IN ('heuristic','extractor')),
            processed_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_questions_processed ON collated_questions(processed_at);
        ",
    )?;
    Ok(())
}

/// Which pipeline produced a stored batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Heuristic,
    Extractor,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Heuristic => "heuristic",
            Source::Extractor => "extractor",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredQuestion {
    pub id: i64,
    pub stem_text: String,
    pub options: Vec<String>,
    pub source: String,
    pub processed_at: String,
}

impl StoredQuestion {
    pub fn to_question(&self) -> CollatedQuestion {
        CollatedQuestion::new(self.stem_text.clone(), self.options.clone())
    }
}

/// Overwrite-all: the stored set always reflects the latest run.
pub fn replace_questions(
    conn: &Connection,
    questions: &[CollatedQuestion],
    source: Source,
) -> Result<usize> {
    let processed_at = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM collated_questions", [])?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO collated_questions (stem_text, options, source, processed_at)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for q in questions {
            let options = serde_json::to_string(&q.options)?;
            count += stmt.execute(params![q.stem_text, options, source.as_str(), processed_at])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

const SELECT_COLUMNS: &str = "SELECT id, stem_text, options, source, processed_at FROM collated_questions";

type RawRow = (i64, String, String, String, String);

fn decode(rows: Vec<RawRow>) -> Result<Vec<StoredQuestion>> {
    rows.into_iter()
        .map(|(id, stem_text, options, source, processed_at)| -> Result<StoredQuestion> {
            Ok(StoredQuestion {
                id,
                stem_text,
                options: serde_json::from_str(&options)?,
                source,
                processed_at,
            })
        })
        .collect()
}

fn row_tuple(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

/// Newest batch first, then insertion order.
pub fn fetch_questions(conn: &Connection, limit: usize) -> Result<Vec<StoredQuestion>> {
    let sql = format!("{} ORDER BY processed_at DESC, id LIMIT ?1", SELECT_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([limit as i64], row_tuple)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    decode(rows)
}

pub fn fetch_by_ids(conn: &Connection, ids: &[i64]) -> Result<Vec<StoredQuestion>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; ids.len()].join(",");
    let sql = format!("{} WHERE id IN ({}) ORDER BY id", SELECT_COLUMNS, placeholders);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(ids.iter()), row_tuple)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    decode(rows)
}

pub fn count_questions(conn: &Connection) -> Result<usize> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM collated_questions", [], |r| r.get(0))?;
    Ok(n as usize)
}

pub struct Stats {
    pub total: usize,
    pub heuristic: usize,
    pub extractor: usize,
    pub latest: Option<String>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let (heuristic, extractor, latest): (i64, i64, Option<String>) = conn.query_row(
        "SELECT
            COALESCE(SUM(source = 'heuristic'), 0),
            COALESCE(SUM(source = 'extractor'), 0),
            MAX(processed_at)
         FROM collated_questions",
        [],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;
    Ok(Stats {
        total: count_questions(conn)?,
        heuristic: heuristic as usize,
        extractor: extractor as usize,
        latest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn q(stem: &str, options: &[&str]) -> CollatedQuestion {
        CollatedQuestion::new(stem, options.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn replace_overwrites_previous_batch() {
        let conn = conn();
        let first = vec![q("Capital of France?", &["Paris", "Lyon"]), q("Capital of Spain?", &["Madrid"])];
        assert_eq!(replace_questions(&conn, &first, Source::Heuristic).unwrap(), 2);
        assert_eq!(count_questions(&conn).unwrap(), 2);

        let second = vec![q("Largest organ?", &[])];
        assert_eq!(replace_questions(&conn, &second, Source::Extractor).unwrap(), 1);
        let stored = fetch_questions(&conn, 10).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].stem_text, "Largest organ?");
        assert!(stored[0].options.is_empty());
        assert_eq!(stored[0].source, "extractor");
    }

    #[test]
    fn fetch_order_and_limit() {
        let conn = conn();
        let batch = vec![q("one?", &["a"]), q("two?", &["b"]), q("three?", &["c"])];
        replace_questions(&conn, &batch, Source::Heuristic).unwrap();
        let stored = fetch_questions(&conn, 2).unwrap();
        let stems: Vec<&str> = stored.iter().map(|s| s.stem_text.as_str()).collect();
        assert_eq!(stems, vec!["one?", "two?"]);
        assert_eq!(stored[0].to_question(), q("one?", &["a"]));
    }

    #[test]
    fn fetch_selected_ids() {
        let conn = conn();
        let batch = vec![q("one?", &["a"]), q("two?", &["b"]), q("three?", &["c"])];
        replace_questions(&conn, &batch, Source::Heuristic).unwrap();
        let ids: Vec<i64> = fetch_questions(&conn, 10).unwrap().iter().map(|s| s.id).collect();

        let picked = fetch_by_ids(&conn, &[ids[2], ids[0], 9999]).unwrap();
        let stems: Vec<&str> = picked.iter().map(|s| s.stem_text.as_str()).collect();
        assert_eq!(stems, vec!["one?", "three?"]);
        assert!(fetch_by_ids(&conn, &[]).unwrap().is_empty());
    }

    #[test]
    fn stats_by_source() {
        let conn = conn();
        let empty = get_stats(&conn).unwrap();
        assert_eq!(empty.total, 0);
        assert!(empty.latest.is_none());

        replace_questions(&conn, &[q("one?", &["a"])], Source::Heuristic).unwrap();
        let s = get_stats(&conn).unwrap();
        assert_eq!((s.total, s.heuristic, s.extractor), (1, 1, 0));
        assert!(s.latest.is_some());
    }
}
