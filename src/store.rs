//! Stage store: the fixed-size table of stage records on disk.
//!
//! The file holds exactly one line per stage, in index order, with fields in
//! the positional order of the active protocol version. Saving a stage
//! rewrites that one line and leaves every other byte of the file alone.

use std::path::{Path, PathBuf};

use crate::error::{Result, TunerError};
use crate::schema::{self, ProtocolVersion};
use crate::stage::StageRecord;
use crate::textfile;

#[derive(Debug, Clone)]
pub struct StageStore {
    path: PathBuf,
    version: ProtocolVersion,
}

impl StageStore {
    pub fn new(path: impl Into<PathBuf>, version: ProtocolVersion) -> Self {
        Self {
            path: path.into(),
            version,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn stage_count(&self) -> usize {
        self.version.stage_count()
    }

    pub fn check_index(&self, index: usize) -> Result<()> {
        let count = self.stage_count();
        if index >= count {
            return Err(TunerError::OutOfRange { index, count });
        }
        Ok(())
    }

    fn corrupt(&self, reason: impl Into<String>) -> TunerError {
        TunerError::CorruptStore {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    fn format_record(&self, record: &StageRecord) -> Result<String> {
        // every stage field is always present on a StageRecord
        schema::format_line(self.version.stage_fields(), record)
            .map_err(|field| self.corrupt(format!("record has no value for {}", field)))
    }

    fn parse_record(&self, index: usize, line: &str) -> Result<StageRecord> {
        let mut record = StageRecord::default();
        schema::parse_line(self.version.stage_fields(), line, &mut record)
            .map_err(|reason| self.corrupt(format!("line {}: {}", index + 1, reason)))?;
        Ok(record)
    }

    /// Split store contents into its N lines, terminators included.
    fn split_lines<'a>(&self, content: &'a str) -> Result<Vec<&'a str>> {
        let lines: Vec<&str> = content.split_inclusive('\n').collect();
        if lines.len() != self.stage_count() {
            return Err(self.corrupt(format!(
                "expected {} lines for the {} protocol, found {}",
                self.stage_count(),
                self.version,
                lines.len()
            )));
        }
        Ok(lines)
    }

    fn read_lines(&self) -> Result<String> {
        textfile::read_locked(&self.path)?
            .ok_or_else(|| self.corrupt("store file does not exist"))
    }

    /// Write N default records. Leaves an existing store alone unless `force`.
    /// Returns whether the file was written.
    pub fn initialize(&self, force: bool) -> Result<bool> {
        let default_line = self.format_record(&StageRecord::default())?;
        let count = self.stage_count();
        let mut written = false;
        textfile::update_locked(&self.path, |current| match current {
            Some(existing) if !force => Ok(existing.to_string()),
            _ => {
                written = true;
                Ok(format!("{}\n", default_line).repeat(count))
            }
        })?;
        if written {
            log::info!(target: "stage_store", "Initialized {} with {} default stages", self.path.display(), count);
        }
        Ok(written)
    }

    /// Load the record at `index`.
    pub fn load(&self, index: usize) -> Result<StageRecord> {
        self.check_index(index)?;
        let content = self.read_lines()?;
        let lines = self.split_lines(&content)?;
        let record = self.parse_record(index, lines[index])?;
        log::debug!(target: "stage_store", "Loaded stage {}: {:?}", index, record);
        Ok(record)
    }

    /// Load every record in index order.
    pub fn load_all(&self) -> Result<Vec<StageRecord>> {
        let content = self.read_lines()?;
        self.split_lines(&content)?
            .into_iter()
            .enumerate()
            .map(|(index, line)| self.parse_record(index, line))
            .collect()
    }

    /// Replace line `index` with `record`; all other lines stay byte-identical.
    pub fn save(&self, index: usize, record: &StageRecord) -> Result<()> {
        self.check_index(index)?;
        let new_line = self.format_record(record)?;
        textfile::update_locked(&self.path, |current| {
            let content = current.ok_or_else(|| self.corrupt("store file does not exist"))?;
            let lines = self.split_lines(content)?;
            let mut out = String::with_capacity(content.len() + new_line.len());
            for (i, line) in lines.iter().enumerate() {
                if i == index {
                    out.push_str(&new_line);
                    out.push_str(line_ending(line));
                } else {
                    out.push_str(line);
                }
            }
            Ok(out)
        })?;
        log::info!(target: "stage_store", "Saved stage {} to {}", index, self.path.display());
        Ok(())
    }

    /// Rewrite the whole store. `records` must hold exactly N entries.
    pub fn save_all(&self, records: &[StageRecord]) -> Result<()> {
        if records.len() != self.stage_count() {
            return Err(TunerError::OutOfRange {
                index: records.len(),
                count: self.stage_count(),
            });
        }
        let mut out = String::new();
        for record in records {
            out.push_str(&self.format_record(record)?);
            out.push('\n');
        }
        textfile::update_locked(&self.path, |_| Ok(out))?;
        log::info!(target: "stage_store", "Saved all {} stages to {}", records.len(), self.path.display());
        Ok(())
    }
}

fn line_ending(line: &str) -> &str {
    if line.ends_with("\r\n") {
        "\r\n"
    } else if line.ends_with('\n') {
        "\n"
    } else {
        ""
    }
}
