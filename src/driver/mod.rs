//! Top-level trial driver. For each optimizer-proposed exponent vector it
//! allocates an isolated working directory, generates the orbital container,
//! runs the external engine on it, collects the scalar energy, and applies
//! the retention policy. The trial counter lives here and nowhere else.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::error::EngineError;
use crate::engine::orbitals::OrbitalGenerator;
use crate::engine::qemp2::{Qemp2Config, Qemp2Engine};
use crate::io::diagnostics::{self, CampaignLog, DiagnosticsError, SpectrumLog, TrialRecord};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Diagnostics(#[from] DiagnosticsError),

    #[error("failed to allocate trial directory {dir}: {source}")]
    Allocate {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to clean up {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Every option the driver recognizes, with its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialConfig {
    /// Campaign root; trial directories are created underneath.
    pub root: PathBuf,
    /// Keep the trial working directory after a successful trial.
    pub keep_workdir: bool,
    /// Keep the orbital container after a successful trial. Off by default,
    /// the container dominates a trial's disk footprint.
    pub keep_orbitals: bool,
    /// Capture the eigenvalue spectrum into the shared diagnostics container.
    pub capture_evals: bool,
    /// Campaign log path; no log is written when unset.
    pub log_path: Option<PathBuf>,
    /// Shared eigenvalue container; required for `capture_evals` to persist.
    pub evals_path: Option<PathBuf>,
    /// Container filename inside each trial directory.
    pub orbital_filename: String,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("opt"),
            keep_workdir: true,
            keep_orbitals: false,
            capture_evals: false,
            log_path: None,
            evals_path: None,
            orbital_filename: "pyscf.orbitals.h5".to_string(),
        }
    }
}

/// Removes the trial directory on drop unless disarmed. Cancellation (the
/// evaluation future dropped mid-trial) always cleans up; on ordinary
/// failure the driver disarms the guard first when the retention policy
/// says to keep the directory.
struct WorkdirGuard {
    path: PathBuf,
    armed: bool,
}

impl WorkdirGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for WorkdirGuard {
    fn drop(&mut self) {
        if !self.armed || !self.path.exists() {
            return;
        }
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            // The original failure (or the cancellation) still propagates;
            // the leaked directory is only worth a warning.
            warn!("cleanup of {} failed: {err}", self.path.display());
        }
    }
}

pub struct TrialDriver {
    config: TrialConfig,
    engine: Qemp2Config,
    generator: Arc<dyn OrbitalGenerator>,
    /// Source of trial identity. Incremented exactly once per evaluation and
    /// never reused, failed trials included.
    counter: AtomicU64,
    /// Serializes appends to the shared diagnostic files. Only ever held
    /// across synchronous open-append-close sections, never across an await.
    diag_lock: Mutex<()>,
}

impl TrialDriver {
    /// Validates the campaign-level engine parameters up front, so a
    /// misconfigured driver is rejected before it can consume a trial
    /// identity. The per-trial parameters (`ngto`, `gto_h5`) are filled in
    /// by `run_trial` and checked there.
    pub fn new(
        config: TrialConfig,
        engine: Qemp2Config,
        generator: Arc<dyn OrbitalGenerator>,
    ) -> Result<Self, DriverError> {
        engine.validate_campaign()?;
        Ok(Self {
            config,
            engine,
            generator,
            counter: AtomicU64::new(0),
            diag_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &TrialConfig {
        &self.config
    }

    /// Trials evaluated so far (including failed ones).
    pub fn trial_count(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Evaluates one trial and returns the scalar energy.
    ///
    /// Failures propagate unchanged; no error is ever downgraded to a
    /// placeholder energy. Independent calls may run concurrently, each
    /// suspension point is scoped to its own trial's subprocesses.
    pub async fn evaluate(&self, x: &[f64]) -> Result<f64, DriverError> {
        let icalc = self.counter.fetch_add(1, Ordering::SeqCst);
        let label = format!("{icalc:04}");
        let workdir = self.config.root.join(&label);
        std::fs::create_dir_all(&workdir).map_err(|source| DriverError::Allocate {
            dir: workdir.clone(),
            source,
        })?;
        info!("trial {label}: allocated {}", workdir.display());

        let mut guard = WorkdirGuard::new(workdir.clone());
        match self.run_trial(&label, icalc, &workdir, x).await {
            Ok(energy) => {
                guard.disarm();
                self.apply_retention(&workdir)?;
                Ok(energy)
            }
            Err(err) => {
                // A failed trial's directory holds the engine log a user
                // needs for post-mortem, so the retention policy applies
                // here too. Cancellation still cleans up unconditionally.
                if self.config.keep_workdir {
                    guard.disarm();
                }
                Err(err)
            }
        }
    }

    async fn run_trial(
        &self,
        label: &str,
        icalc: u64,
        workdir: &Path,
        x: &[f64],
    ) -> Result<f64, DriverError> {
        // GENERATE_ORBITALS: the container is closed and flushed before the
        // engine is allowed to read it.
        let orbital_path = workdir.join(&self.config.orbital_filename);
        let norb = self.generator.generate(workdir, &orbital_path, x).await?;
        info!("trial {label}: {norb} orbitals from {}", self.generator.name());

        // RUN_ENGINE
        let mut engine_config = self.engine.clone();
        engine_config.ngto = Some(norb);
        if engine_config.gto_h5.is_none() {
            engine_config.gto_h5 = Some(self.config.orbital_filename.clone());
        }
        let engine = Qemp2Engine::new(engine_config)?;
        engine.write_input(workdir)?;
        engine.execute(workdir).await?;
        let result = engine.read_results(workdir, self.config.capture_evals)?;

        // COLLECT
        let record = TrialRecord {
            label: label.to_string(),
            icalc,
            x: x.to_vec(),
            energy: result.energy,
            evals: result.evals,
        };
        diagnostics::write_trial_json(workdir, &record)?;
        if let Some(log_path) = &self.config.log_path {
            let _guard = self.lock_diagnostics();
            CampaignLog::new(log_path).append(&record)?;
        }
        if self.config.capture_evals {
            if let (Some(evals_path), Some(evals)) = (&self.config.evals_path, &record.evals) {
                let _guard = self.lock_diagnostics();
                SpectrumLog::new(evals_path).append(label, evals)?;
            }
        }

        info!("trial {label}: energy = {:.8}", record.energy);
        Ok(record.energy)
    }

    fn lock_diagnostics(&self) -> std::sync::MutexGuard<'_, ()> {
        self.diag_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// RETAIN | CLEANUP after a successful trial. Deletion failures are
    /// surfaced, not swallowed.
    fn apply_retention(&self, workdir: &Path) -> Result<(), DriverError> {
        if !self.config.keep_orbitals {
            let orbital_path = workdir.join(&self.config.orbital_filename);
            if orbital_path.exists() {
                std::fs::remove_file(&orbital_path).map_err(|source| DriverError::Cleanup {
                    path: orbital_path.clone(),
                    source,
                })?;
            }
        }
        if !self.config.keep_workdir {
            std::fs::remove_dir_all(workdir).map_err(|source| DriverError::Cleanup {
                path: workdir.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }
}
