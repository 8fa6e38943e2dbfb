use log::{error, info, warn};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::change_detector;
use crate::db::{self, DbPool};
use crate::metadata_extractor::{validate, MetadataSource};

/// Outcome of one ingestion pass. `skipped` counts both unchanged files and
/// files rejected by validation; `errored` counts files lost to batch-level
/// extraction or store failures.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestionReport {
    pub inserted: usize,
    pub skipped: usize,
    pub errored: usize,
}

impl IngestionReport {
    fn merge(&mut self, other: IngestionReport) {
        self.inserted += other.inserted;
        self.skipped += other.skipped;
        self.errored += other.errored;
    }
}

pub struct IngestionPipeline<'a> {
    pool: &'a DbPool,
    extractor: &'a dyn MetadataSource,
    batch_size: usize,
}

impl<'a> IngestionPipeline<'a> {
    pub fn new(pool: &'a DbPool, extractor: &'a dyn MetadataSource, batch_size: usize) -> Self {
        Self {
            pool,
            extractor,
            batch_size: batch_size.max(1),
        }
    }

    /// Process directory roots sequentially and sum their reports. A root
    /// that fails outright is logged and does not abort the remaining roots.
    pub fn ingest_all(&self, roots: &[PathBuf]) -> IngestionReport {
        let mut report = IngestionReport::default();
        for root in roots {
            match self.ingest(root) {
                Ok(root_report) => report.merge(root_report),
                Err(e) => error!("Ingestion of {} failed: {}", root.display(), e),
            }
        }
        report
    }

    /// Walk one directory tree, re-extracting only files whose mtime changed
    /// since the last successful ingestion. Extraction happens in batches of
    /// `batch_size` paths; each batch is committed as one transaction.
    pub fn ingest(&self, root: &Path) -> Result<IngestionReport, Box<dyn std::error::Error>> {
        let mut report = IngestionReport::default();

        if !root.exists() {
            warn!("Media directory does not exist: {}", root.display());
            return Ok(report);
        }

        info!("Scanning directory: {}", root.display());

        let mut batch: Vec<(PathBuf, i64)> = Vec::new();
        self.walk(root, &mut batch, &mut report)?;
        if !batch.is_empty() {
            self.flush(&batch, &mut report);
        }

        info!(
            "Finished {}: {} inserted, {} skipped, {} errored",
            root.display(),
            report.inserted,
            report.skipped,
            report.errored
        );
        Ok(report)
    }

    fn walk(
        &self,
        dir: &Path,
        batch: &mut Vec<(PathBuf, i64)>,
        report: &mut IngestionReport,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read directory {}: {}", dir.display(), e);
                return Ok(());
            }
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();

            if path.is_dir() {
                self.walk(&path, batch, report)?;
            } else if path.is_file() {
                let mtime = match file_mtime(&path) {
                    Some(mtime) => mtime,
                    None => {
                        warn!("Cannot stat {}", path.display());
                        report.errored += 1;
                        continue;
                    }
                };

                let last_known = db::get_last_modified(self.pool, &path.to_string_lossy())?;
                if !change_detector::needs_processing(last_known, mtime) {
                    report.skipped += 1;
                    continue;
                }

                batch.push((path, mtime));
                if batch.len() >= self.batch_size {
                    self.flush(batch, report);
                    batch.clear();
                }
            }
        }

        Ok(())
    }

    /// Extract, validate and commit one batch. Batches are independent: any
    /// failure here lands in the report and the traversal keeps going.
    fn flush(&self, batch: &[(PathBuf, i64)], report: &mut IngestionReport) {
        let paths: Vec<PathBuf> = batch.iter().map(|(path, _)| path.clone()).collect();

        let entries = match self.extractor.extract_batch(&paths) {
            Ok(entries) => entries,
            Err(e) => {
                // No partial credit: every path in the batch is an error.
                error!("Metadata extraction failed for batch of {}: {}", batch.len(), e);
                report.errored += batch.len();
                return;
            }
        };

        let mtimes: HashMap<String, i64> = batch
            .iter()
            .map(|(path, mtime)| (path.to_string_lossy().into_owned(), *mtime))
            .collect();

        let mut records = Vec::new();
        let mut seen = 0usize;
        for entry in &entries {
            let Some(&mtime) = mtimes.get(&entry.source_file) else {
                warn!("Extractor returned unrequested path: {}", entry.source_file);
                continue;
            };
            seen += 1;

            match validate(entry, mtime) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("Skipping {}: {}", entry.source_file, e);
                    report.skipped += 1;
                }
            }
        }

        // Files the tool returned nothing for (unreadable, truncated, ...).
        report.errored += batch.len().saturating_sub(seen);

        if records.is_empty() {
            return;
        }

        match db::upsert_batch(self.pool, &records) {
            Ok(count) => report.inserted += count,
            Err(e) => {
                error!("Failed to commit batch of {}: {}", records.len(), e);
                report.errored += records.len();
            }
        }
    }
}

fn file_mtime(path: &Path) -> Option<i64> {
    fs::metadata(path)
        .ok()?
        .modified()
        .ok()?
        .duration_since(std::time::UNIX_EPOCH)
        .ok()
        .map(|duration| duration.as_secs() as i64)
}
