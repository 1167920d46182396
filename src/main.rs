use std::fs;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use mcq_collator::db::{self, Source};
use mcq_collator::ingest::{self, DateRange};
use mcq_collator::parser::associate::AssociationMethod;
use mcq_collator::parser::{self, CollatedQuestion};
use mcq_collator::{config, export, import, Settings};

#[derive(Parser)]
#[command(name = "mcq", about = "Collate recalled exam MCQs from chat-export transcripts")]
struct Cli {
    /// Settings file (default: ./mcq.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collate questions from one or more transcripts
    Extract {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// First day to keep (YYYY-MM-DD), needs --end
        #[arg(long, requires = "end")]
        start: Option<String>,
        /// Last day to keep (YYYY-MM-DD), needs --start
        #[arg(long, requires = "start")]
        end: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
        /// Replace stored questions with this run's results
        #[arg(long)]
        save: bool,
    },
    /// Show the date span covered by a transcript
    Analyze { file: PathBuf },
    /// Split a transcript into overlapping chunks for the external extractor
    Chunk {
        file: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Validate external extractor JSON and replace stored questions with it
    Import {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Stored questions table
    List {
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Write stored questions as CSV
    Export {
        /// Question ids, comma separated (default: all)
        #[arg(long, value_delimiter = ',')]
        ids: Vec<i64>,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show storage statistics
    Stats,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = config::load(cli.config.as_deref()).context("loading settings")?;

    let result = match cli.command {
        Commands::Extract {
            files,
            start,
            end,
            json,
            save,
        } => {
            let range = match (start, end) {
                (Some(s), Some(e)) => {
                    DateRange::inclusive(ingest::parse_day(&s)?, ingest::parse_day(&e)?)
                }
                _ => None,
            };
            let outcomes = extract_files(&files, range.as_ref(), &settings);

            let mut batches = Vec::new();
            let mut failed = 0;
            for (path, outcome) in files.iter().zip(outcomes) {
                match outcome {
                    Ok(file) => {
                        info!(
                            file = %path.display(),
                            lines_seen = file.lines_seen,
                            lines_kept = file.lines_kept,
                            questions = file.questions.len(),
                            "collated"
                        );
                        batches.push(file.questions);
                    }
                    Err(e) => {
                        warn!(file = %path.display(), "skipped: {:#}", e);
                        failed += 1;
                    }
                }
            }
            if batches.is_empty() {
                bail!("no transcript could be read");
            }
            let questions = parser::dedup_by_stem(batches.into_iter().flatten().collect());

            if json {
                println!("{}", serde_json::to_string_pretty(&questions)?);
            } else {
                print_collated(&questions);
            }
            if failed > 0 {
                println!("{} file(s) could not be read.", failed);
            }

            if save {
                let conn = open_db(&settings)?;
                let saved = db::replace_questions(&conn, &questions, Source::Heuristic)?;
                println!("Saved {} questions to {}", saved, settings.db_path.display());
            }
            Ok(())
        }
        Commands::Analyze { file } => {
            let text = read(&file)?;
            match ingest::scan_date_span(&text) {
                Some(span) => {
                    println!("Start:      {}", span.earliest.format("%Y-%m-%d"));
                    println!("End:        {}", span.latest.format("%Y-%m-%d"));
                    println!(
                        "Timestamps: {} (lines {} to {} of {})",
                        span.timestamped_lines, span.first_line, span.last_line, span.total_lines
                    );
                    Ok(())
                }
                None => bail!("no valid timestamps found in {}", file.display()),
            }
        }
        Commands::Chunk { file, out_dir } => {
            let text = read(&file)?;
            let chunks = ingest::chunk_transcript(&text, &settings.chunking);
            fs::create_dir_all(&out_dir)
                .with_context(|| format!("creating {}", out_dir.display()))?;
            for (i, chunk) in chunks.iter().enumerate() {
                let path = out_dir.join(format!("chunk_{:03}.txt", i + 1));
                fs::write(&path, chunk).with_context(|| format!("writing {}", path.display()))?;
            }
            println!("Wrote {} chunks to {}", chunks.len(), out_dir.display());
            Ok(())
        }
        Commands::Import { files } => {
            let mut batches = Vec::new();
            for path in &files {
                match import::read_batch(path) {
                    Ok(batch) => {
                        info!(file = %path.display(), questions = batch.len(), "batch accepted");
                        batches.push(batch);
                    }
                    Err(e) => warn!(file = %path.display(), "batch rejected: {}", e),
                }
            }
            if batches.is_empty() {
                bail!("no valid batch among {} file(s)", files.len());
            }
            let accepted = batches.len();
            let questions = import::merge_batches(batches);
            let conn = open_db(&settings)?;
            let saved = db::replace_questions(&conn, &questions, Source::Extractor)?;
            println!(
                "Imported {} unique questions from {}/{} files.",
                saved,
                accepted,
                files.len()
            );
            Ok(())
        }
        Commands::List { limit } => {
            let conn = open_db(&settings)?;
            let rows = db::fetch_questions(&conn, limit)?;
            if rows.is_empty() {
                println!("No stored questions. Run 'extract --save' or 'import' first.");
                return Ok(());
            }

            println!("{:>5} | {:<60} | {:>4} | {:<9}", "id", "Stem", "Opts", "Source");
            println!("{}", "-".repeat(88));
            for r in &rows {
                println!(
                    "{:>5} | {:<60} | {:>4} | {:<9}",
                    r.id,
                    truncate(&one_line(&r.stem_text), 60),
                    r.options.len(),
                    r.source
                );
            }
            println!("\n{} questions | processed {}", rows.len(), rows[0].processed_at);
            Ok(())
        }
        Commands::Export { ids, output } => {
            let conn = open_db(&settings)?;
            let rows = if ids.is_empty() {
                let total = db::count_questions(&conn)?;
                db::fetch_questions(&conn, total)?
            } else {
                db::fetch_by_ids(&conn, &ids)?
            };
            if rows.is_empty() {
                bail!("no stored questions match");
            }
            let questions: Vec<CollatedQuestion> = rows.iter().map(|r| r.to_question()).collect();

            match output {
                Some(path) => {
                    let file = fs::File::create(&path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    let summary = export::write_csv(&mut BufWriter::new(file), &questions)?;
                    println!("Exported {} rows to {}", summary.rows, path.display());
                    if summary.dropped_options > 0 {
                        println!(
                            "{} options beyond column 4 were left out.",
                            summary.dropped_options
                        );
                    }
                }
                None => {
                    let summary = export::write_csv(&mut io::stdout().lock(), &questions)?;
                    info!(rows = summary.rows, dropped_options = summary.dropped_options, "exported");
                }
            }
            Ok(())
        }
        Commands::Stats => {
            let conn = open_db(&settings)?;
            let s = db::get_stats(&conn)?;
            println!("Total:     {}", s.total);
            println!("Heuristic: {}", s.heuristic);
            println!("Extractor: {}", s.extractor);
            println!("Processed: {}", s.latest.as_deref().unwrap_or("-"));
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("\nDone in {}", format_duration(elapsed));
    }

    result
}

struct FileOutcome {
    lines_seen: usize,
    lines_kept: usize,
    questions: Vec<CollatedQuestion>,
}

/// One pipeline run per file, in parallel. Results come back in input order.
fn extract_files(
    files: &[PathBuf],
    range: Option<&DateRange>,
    settings: &Settings,
) -> Vec<anyhow::Result<FileOutcome>> {
    use indicatif::{ProgressBar, ProgressStyle};
    use rayon::prelude::*;

    let pb = ProgressBar::new(files.len() as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }

    let outcomes = files
        .par_iter()
        .map(|path| {
            let outcome = extract_one(path, range, settings);
            pb.inc(1);
            outcome
        })
        .collect();

    pb.finish_and_clear();
    outcomes
}

fn extract_one(
    path: &Path,
    range: Option<&DateRange>,
    settings: &Settings,
) -> anyhow::Result<FileOutcome> {
    let text = read(path)?;
    let (text, lines_seen, lines_kept) = match range {
        Some(range) => {
            let filtered = ingest::filter_by_date_range(&text, range);
            (filtered.text, filtered.lines_seen, filtered.lines_kept)
        }
        None => {
            let lines = text.lines().count();
            (text, lines, lines)
        }
    };
    Ok(FileOutcome {
        lines_seen,
        lines_kept,
        questions: parser::collate_transcript(&text, &settings.tuning),
    })
}

fn read(path: &Path) -> anyhow::Result<String> {
    ingest::read_transcript(path).with_context(|| format!("reading {}", path.display()))
}

fn open_db(settings: &Settings) -> anyhow::Result<rusqlite::Connection> {
    let conn = db::connect(&settings.db_path)
        .with_context(|| format!("opening {}", settings.db_path.display()))?;
    db::init_schema(&conn)?;
    Ok(conn)
}

fn print_collated(questions: &[CollatedQuestion]) {
    if questions.is_empty() {
        println!("No questions found.");
        return;
    }

    println!("{:>3} | {:<60} | {:>4} | {:<24}", "#", "Stem", "Opts", "Linked by");
    println!("{}", "-".repeat(100));
    for (i, q) in questions.iter().enumerate() {
        let linked = q
            .sources
            .iter()
            .map(|s| method_label(&s.method))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{:>3} | {:<60} | {:>4} | {:<24}",
            i + 1,
            truncate(&one_line(&q.stem_text), 60),
            q.options.len(),
            truncate(&linked, 24)
        );
    }
    println!("\n{} questions", questions.len());
}

fn method_label(method: &AssociationMethod) -> String {
    match method {
        AssociationMethod::Internal => "internal".into(),
        AssociationMethod::Adjacent => "adjacent".into(),
        AssociationMethod::Similarity { score } => format!("similarity {}", score),
    }
}

fn one_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        format!("{}m {}s", secs / 60, secs % 60)
    }
}
