//! Per-trial diagnostic persistence: the campaign log (one space-delimited
//! row per trial, readable back as `icalc x0 .. xN energy` columns), the
//! eigenvalue-spectrum container, and the JSON record dropped into each
//! trial's working directory.
//!
//! The log and the spectrum container are the only resources shared across
//! trials, so every append opens the file, writes one entry, and closes it
//! again. No handle outlives a single append.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiagnosticsError {
    #[error("diagnostic i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("campaign log append failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("spectrum container append failed: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error("trial record serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything one evaluation produced. Written once at the end of the trial,
/// never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialRecord {
    /// Zero-padded iteration label, also the working-directory name.
    pub label: String,
    pub icalc: u64,
    pub x: Vec<f64>,
    pub energy: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evals: Option<Vec<f64>>,
}

/// Space-delimited campaign log, one row per trial.
pub struct CampaignLog {
    path: PathBuf,
}

impl CampaignLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one row, writing the header first when the log is new.
    pub fn append(&self, record: &TrialRecord) -> Result<(), DiagnosticsError> {
        let is_new = !self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b' ')
            .has_headers(false)
            .from_writer(file);
        if is_new {
            let mut header = vec!["icalc".to_string()];
            header.extend((0..record.x.len()).map(|i| format!("x{i}")));
            header.push("energy".to_string());
            writer.write_record(&header)?;
        }
        let mut row = vec![record.icalc.to_string()];
        row.extend(record.x.iter().map(|v| format!("{v:.12e}")));
        row.push(format!("{:.12e}", record.energy));
        writer.write_record(&row)?;
        writer.flush()?;
        Ok(())
    }
}

/// Eigenvalue spectra keyed by trial label, one dataset per trial in a
/// shared container file.
pub struct SpectrumLog {
    path: PathBuf,
}

impl SpectrumLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends the spectrum of one trial under its label.
    pub fn append(&self, label: &str, evals: &[f64]) -> Result<(), DiagnosticsError> {
        let file = hdf5::File::append(&self.path)?;
        file.new_dataset_builder()
            .with_data(evals)
            .create(label)?;
        file.flush()?;
        Ok(())
    }

    /// Reads one trial's spectrum back.
    pub fn read(&self, label: &str) -> Result<Vec<f64>, DiagnosticsError> {
        let file = hdf5::File::open(&self.path)?;
        let data = file.dataset(label)?.read_1d::<f64>()?;
        Ok(data.to_vec())
    }
}

/// Drops the immutable JSON record into the trial's working directory.
pub fn write_trial_json(workdir: &Path, record: &TrialRecord) -> Result<(), DiagnosticsError> {
    let text = serde_json::to_string_pretty(record)?;
    std::fs::write(workdir.join("trial.json"), text)?;
    Ok(())
}
