//! Run-wide parameters and their single-line file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TunerError};
use crate::schema::{self, Field, FieldSink, FieldSource, ProtocolVersion, Value};
use crate::stage::PidGains;
use crate::textfile;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Stage index the robot starts the course from.
    pub start_position: usize,
    /// Course-wide PID gains, legacy protocol only.
    pub gains: Option<PidGains>,
}

impl GlobalConfig {
    pub fn default_for(version: ProtocolVersion) -> Self {
        match version {
            ProtocolVersion::Legacy => GlobalConfig {
                start_position: 0,
                gains: Some(PidGains::default()),
            },
            ProtocolVersion::Extended => GlobalConfig::default(),
        }
    }
}

impl FieldSource for GlobalConfig {
    fn value(&self, field: Field) -> Option<Value> {
        match field {
            Field::StartPosition => i64::try_from(self.start_position).ok().map(Value::Int),
            Field::PGain | Field::IGain | Field::DGain => self.gains.as_ref().and_then(|g| g.value(field)),
            _ => None,
        }
    }
}

impl FieldSink for GlobalConfig {
    fn set_value(&mut self, field: Field, value: Value) -> std::result::Result<(), String> {
        match (field, value) {
            (Field::StartPosition, Value::Int(v)) => {
                self.start_position =
                    usize::try_from(v).map_err(|_| format!("start position {} is negative", v))?;
            }
            (Field::PGain, Value::Float(v)) => self.gains.get_or_insert_with(PidGains::default).p = v,
            (Field::IGain, Value::Float(v)) => self.gains.get_or_insert_with(PidGains::default).i = v,
            (Field::DGain, Value::Float(v)) => self.gains.get_or_insert_with(PidGains::default).d = v,
            (field, value) => return Err(format!("{} cannot hold {:?}", field.name(), value)),
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GlobalStore {
    path: PathBuf,
    version: ProtocolVersion,
}

impl GlobalStore {
    pub fn new(path: impl Into<PathBuf>, version: ProtocolVersion) -> Self {
        Self {
            path: path.into(),
            version,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn corrupt(&self, reason: impl Into<String>) -> TunerError {
        TunerError::CorruptGlobalConfig {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    fn format(&self, config: &GlobalConfig) -> Result<String> {
        schema::format_line(self.version.global_fields(), config)
            .map(|line| line + "\n")
            .map_err(|field| self.corrupt(format!("{} is required by the {} protocol", field, self.version)))
    }

    pub fn initialize(&self, force: bool) -> Result<bool> {
        let line = self.format(&GlobalConfig::default_for(self.version))?;
        let mut written = false;
        textfile::update_locked(&self.path, |current| match current {
            Some(existing) if !force => Ok(existing.to_string()),
            _ => {
                written = true;
                Ok(line)
            }
        })?;
        if written {
            log::info!(target: "global_config", "Initialized {}", self.path.display());
        }
        Ok(written)
    }

    pub fn load(&self) -> Result<GlobalConfig> {
        let content = textfile::read_locked(&self.path)?
            .ok_or_else(|| self.corrupt("global config file does not exist"))?;
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        let line = lines.next().ok_or_else(|| self.corrupt("file is empty"))?;
        if lines.next().is_some() {
            return Err(self.corrupt("expected a single line"));
        }
        let mut config = GlobalConfig::default();
        schema::parse_line(self.version.global_fields(), line, &mut config).map_err(|reason| self.corrupt(reason))?;
        let count = self.version.stage_count();
        if config.start_position >= count {
            return Err(self.corrupt(format!(
                "start position {} outside 0..{}",
                config.start_position, count
            )));
        }
        log::debug!(target: "global_config", "Loaded {:?}", config);
        Ok(config)
    }

    pub fn save(&self, config: &GlobalConfig) -> Result<()> {
        let count = self.version.stage_count();
        if config.start_position >= count {
            return Err(TunerError::OutOfRange {
                index: config.start_position,
                count,
            });
        }
        let line = self.format(config)?;
        textfile::update_locked(&self.path, |_| Ok(line))?;
        log::info!(target: "global_config", "Saved start position {} to {}", config.start_position, self.path.display());
        Ok(())
    }
}
