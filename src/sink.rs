use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::SinkError;
use crate::record::CanonicalJobRecord;

/// Per-source output buffer. Drops records whose `(source, jobid)` was already seen.
#[derive(Debug, Default)]
pub struct JobSink {
    seen: HashSet<(String, String)>,
    records: Vec<CanonicalJobRecord>,
    duplicates: usize,
}

impl JobSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record; `false` when it duplicates an earlier one.
    pub fn push(&mut self, record: CanonicalJobRecord) -> bool {
        let key = (record.source.clone(), record.jobid.clone());
        if !self.seen.insert(key) {
            debug!(source = %record.source, jobid = %record.jobid, "duplicate dropped");
            self.duplicates += 1;
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn records(&self) -> &[CanonicalJobRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Write `<dir>/<source>_jobs.json` atomically: a temp file in `dir` is persisted
    /// over the target only once fully written.
    pub fn write_json(&self, dir: &Path, source: &str) -> Result<PathBuf, SinkError> {
        let path = dir.join(format!("{}_jobs.json", source.to_lowercase()));
        let io = |source: std::io::Error| SinkError::Io {
            path: path.display().to_string(),
            source,
        };

        std::fs::create_dir_all(dir).map_err(io)?;
        let json = serde_json::to_string_pretty(&self.records)?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(io)?;
        tmp.write_all(json.as_bytes()).map_err(io)?;
        tmp.write_all(b"\n").map_err(io)?;
        tmp.as_file().sync_all().map_err(io)?;
        tmp.persist(&path).map_err(|e| io(e.error))?;

        info!("Saved {} records to {}", self.records.len(), path.display());
        Ok(path)
    }
}
