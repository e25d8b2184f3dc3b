//! Snapshots of a run that are sufficient for an exact resume.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, SamplerError},
    pool::ChainPool,
    sampler::SamplerState,
};

/// Format version of the checkpoint files written by this crate.
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    /// Number of completed rounds.
    pub round: u64,
    /// Phase in which the run continues.
    pub state: SamplerState,
    /// Wall time spent sampling before the checkpoint.
    pub elapsed: Duration,
    pub names: Vec<String>,
    /// Chain histories, proposal states and all random number generators.
    pub pool: ChainPool,
}

impl Checkpoint {
    /// Read and parse a checkpoint file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .context("Could not read checkpoint")
            .map_err(|err| SamplerError::checkpoint(path, err))?;
        let checkpoint: Self = serde_json::from_str(&contents)
            .context("Could not parse checkpoint")
            .map_err(|err| SamplerError::checkpoint(path, err))?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(SamplerError::checkpoint(
                path,
                anyhow!(
                    "Unsupported checkpoint version {}, expected {}",
                    checkpoint.version,
                    CHECKPOINT_VERSION
                ),
            ));
        }
        Ok(checkpoint)
    }

    /// Write the checkpoint to a temporary file next to `path` and move it
    /// into place, so that an existing checkpoint is only replaced by a
    /// complete one.
    pub fn store(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .context("Could not create checkpoint directory")
                .map_err(|err| SamplerError::checkpoint(parent, err))?;
        }
        let json = serde_json::to_string(self)
            .context("Could not serialize checkpoint")
            .map_err(|err| SamplerError::checkpoint(path, err))?;
        let tmp = temporary_path(path);
        fs::write(&tmp, json)
            .context("Could not write checkpoint")
            .map_err(|err| SamplerError::checkpoint(&tmp, err))?;
        fs::rename(&tmp, path)
            .context("Could not move checkpoint into place")
            .map_err(|err| SamplerError::checkpoint(path, err))
    }
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
