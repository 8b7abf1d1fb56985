//! Record event source adapters.
//!
//! Sources read raw events from their origin, parse the envelope, and hand
//! [`RepoEvent`]s to the pipeline. Live firehose subscription is handled by
//! a separate service; this module covers file-based backfill.

use crate::error::{Error, Result};
use crate::event::RepoEvent;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

/// A source of record events.
pub trait EventSource {
    /// Human-readable name for this source (used in logs and metrics).
    fn name(&self) -> &'static str;

    /// Process events from this source, calling the handler for each one.
    ///
    /// The handler returns `Ok(true)` to continue processing, `Ok(false)`
    /// to stop gracefully, or `Err` to abort with an error.
    fn process<F>(&mut self, handler: F) -> Result<SourceStats>
    where
        F: FnMut(RepoEvent) -> Result<bool>;
}

/// Statistics from processing an event source.
#[derive(Debug, Clone, Default)]
pub struct SourceStats {
    /// Total events encountered (before parsing).
    pub total_events: usize,

    /// Events handed to the pipeline.
    pub emitted_events: usize,

    /// Events that failed envelope parsing.
    pub parse_errors: usize,

    /// For file-based sources: number of files processed.
    pub files_processed: usize,

    /// For file-based sources: total bytes read.
    pub bytes_read: usize,
}

/// Configuration for the JSONL source.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    /// Input file or directory path.
    pub input: PathBuf,

    /// Continue processing on errors (log and skip bad lines).
    pub continue_on_error: bool,

    /// Limit number of files to process (for testing).
    pub limit: Option<usize>,

    /// Progress reporting interval (events).
    pub progress_interval: usize,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            continue_on_error: true,
            limit: None,
            progress_interval: 10_000,
        }
    }
}

/// JSONL file event source: one JSON event envelope per line.
pub struct JsonlSource {
    config: JsonlConfig,
}

impl JsonlSource {
    /// Create a new JSONL source with the given configuration.
    pub fn new(config: JsonlConfig) -> Self {
        Self { config }
    }

    /// Collect files to process based on input path.
    fn collect_files(&self) -> Result<Vec<PathBuf>> {
        let input = &self.config.input;
        let mut files = Vec::new();

        if input.is_file() {
            files.push(input.clone());
        } else if input.is_dir() {
            let mut entries: Vec<_> = fs::read_dir(input)?
                .filter_map(|e| e.ok())
                .filter(|e| {
                    let path = e.path();
                    path.is_file()
                        && path
                            .extension()
                            .is_some_and(|ext| ext == "jsonl" || ext == "json" || ext == "ndjson")
                })
                .map(|e| e.path())
                .collect();

            // Sort for deterministic processing order
            entries.sort();
            files = entries;
        } else {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Input path does not exist: {}", input.display()),
            )));
        }

        if let Some(limit) = self.config.limit {
            files.truncate(limit);
        }

        Ok(files)
    }

    /// Process a single JSONL file.
    fn process_file<F>(
        &self,
        file_path: &PathBuf,
        handler: &mut F,
        stats: &mut SourceStats,
    ) -> Result<bool>
    where
        F: FnMut(RepoEvent) -> Result<bool>,
    {
        let file = File::open(file_path)?;
        let reader = BufReader::new(file);

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = match line_result {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!("Line {}: I/O error: {}", line_num + 1, e);
                    stats.parse_errors += 1;
                    if self.config.continue_on_error {
                        continue;
                    } else {
                        return Err(Error::Io(e));
                    }
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            stats.total_events += 1;

            let event = match serde_json::from_str::<RepoEvent>(&line) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("Line {}: JSON parse error: {}", line_num + 1, e);
                    stats.parse_errors += 1;
                    if self.config.continue_on_error {
                        continue;
                    } else {
                        return Err(Error::Json(e));
                    }
                }
            };

            stats.emitted_events += 1;

            match handler(event) {
                Ok(true) => {} // Continue
                Ok(false) => {
                    tracing::info!("Handler signaled stop");
                    return Ok(false);
                }
                Err(e) => {
                    if self.config.continue_on_error {
                        tracing::warn!("Handler error: {}", e);
                    } else {
                        return Err(e);
                    }
                }
            }

            if stats.total_events % self.config.progress_interval == 0 {
                tracing::info!(
                    "Progress: {} events, {} emitted, {} parse errors",
                    stats.total_events,
                    stats.emitted_events,
                    stats.parse_errors
                );
            }
        }

        Ok(true)
    }
}

impl EventSource for JsonlSource {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn process<F>(&mut self, mut handler: F) -> Result<SourceStats>
    where
        F: FnMut(RepoEvent) -> Result<bool>,
    {
        let mut stats = SourceStats::default();

        let files = self.collect_files()?;
        tracing::info!("Found {} JSONL files to process", files.len());

        for (file_idx, file_path) in files.iter().enumerate() {
            tracing::info!(
                "[{}/{}] Processing: {}",
                file_idx + 1,
                files.len(),
                file_path.display()
            );

            let file_size = fs::metadata(file_path)?.len() as usize;
            stats.bytes_read += file_size;

            match self.process_file(file_path, &mut handler, &mut stats) {
                Ok(true) => {
                    stats.files_processed += 1;
                }
                Ok(false) => {
                    stats.files_processed += 1;
                    break;
                }
                Err(e) => {
                    tracing::warn!("Error processing {}: {}", file_path.display(), e);
                    if !self.config.continue_on_error {
                        return Err(e);
                    }
                }
            }
        }

        Ok(stats)
    }
}
