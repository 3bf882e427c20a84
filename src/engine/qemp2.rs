//! Adapter for the external MP2 driver: renders its input deck, runs it as a
//! child process without blocking concurrent trials, and parses the energy
//! (and optionally the eigenvalue spectrum) out of its log.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::engine::error::EngineError;

pub const ENGINE_NAME: &str = "qemp2";

/// Token substituted with the trial working directory in command templates.
pub const DIR_PLACEHOLDER: &str = "{DIR}";

/// Marker line carrying the correlation energy, of the form
/// `EMP2 (Ha) : (<re>, <im>)`.
pub const ENERGY_MARKER: &str = "EMP2 (Ha)";

/// Header of the eigenvalue block, followed by lines of plain floats.
pub const EVALS_MARKER: &str = "MP2 eigenvalues (Ha)";

/// Every option the engine recognizes, with its default. Required parameters
/// are `Option`s so a missing one can be reported by name; there is no
/// open-ended key-value escape hatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Qemp2Config {
    /// Basename of the input/output deck pair (`<label>.in` / `<label>.out`).
    pub label: String,
    /// Scratch directory of the converged scf run.
    pub outdir: Option<String>,
    /// Number of orbitals the driver keeps.
    pub nks: Option<u32>,
    /// Filename of the orbital exchange container, relative to the workdir.
    pub gto_h5: Option<String>,
    /// How many orbitals to read from the container. Set per trial.
    pub ngto: Option<u32>,
    pub eigcut: f64,
    pub nextracut: f64,
    pub verbose: bool,
    /// Command template; `{DIR}` resolves to the trial working directory.
    pub command: Option<String>,
}

impl Default for Qemp2Config {
    fn default() -> Self {
        Self {
            label: "qemp2".to_string(),
            outdir: None,
            nks: None,
            gto_h5: None,
            ngto: None,
            eigcut: 1e-3,
            nextracut: 1e-6,
            verbose: true,
            command: None,
        }
    }
}

impl Qemp2Config {
    /// Checks the parameters that must be known before any trial runs.
    /// `gto_h5` and `ngto` are filled in per trial and not required here.
    pub fn validate_campaign(&self) -> Result<(), EngineError> {
        let mut keys = Vec::new();
        if self.outdir.is_none() {
            keys.push("outdir");
        }
        if self.nks.is_none() {
            keys.push("nks");
        }
        if keys.is_empty() {
            Ok(())
        } else {
            Err(EngineError::MissingParameters { keys })
        }
    }

    /// Checks every required deck parameter and reports all missing ones at
    /// once, not just the first.
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut keys = Vec::new();
        if self.outdir.is_none() {
            keys.push("outdir");
        }
        if self.nks.is_none() {
            keys.push("nks");
        }
        if self.gto_h5.is_none() {
            keys.push("gto_h5");
        }
        if self.ngto.is_none() {
            keys.push("ngto");
        }
        if keys.is_empty() {
            Ok(())
        } else {
            Err(EngineError::MissingParameters { keys })
        }
    }
}

/// Result record parsed from the engine log. `energy` is mandatory on
/// success; `evals` is present only when the adapter was asked to capture
/// the spectrum and the engine printed one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResult {
    pub energy: f64,
    pub evals: Option<Vec<f64>>,
}

pub struct Qemp2Engine {
    config: Qemp2Config,
}

impl Qemp2Engine {
    /// Validates the deck parameters up front; the command template is only
    /// needed (and checked) at execution time.
    pub fn new(config: Qemp2Config) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Qemp2Config {
        &self.config
    }

    pub fn input_path(&self, workdir: &Path) -> PathBuf {
        workdir.join(format!("{}.in", self.config.label))
    }

    pub fn output_path(&self, workdir: &Path) -> PathBuf {
        workdir.join(format!("{}.out", self.config.label))
    }

    /// Renders the fixed input deck into `<label>.in`. Strings are
    /// single-quoted, numbers unquoted, booleans in Fortran spelling.
    pub fn write_input(&self, workdir: &Path) -> Result<(), EngineError> {
        self.config.validate()?;
        let c = &self.config;
        // validate() guarantees the required fields below.
        let text = format!(
            "&inputpp\n  \
             outdir = '{}'\n  \
             run_type = 'mp2_driver'\n  \
             diag_type = 'keep_occ'\n  \
             number_of_orbitals = {}\n  \
             h5_add_orbs = '{}'\n  \
             read_from_h5 = {}\n  \
             eigcut = {:e}\n  \
             nextracut = {:e}\n  \
             verbose = {}\n/\n",
            c.outdir.as_deref().unwrap_or_default(),
            c.nks.unwrap_or_default(),
            c.gto_h5.as_deref().unwrap_or_default(),
            c.ngto.unwrap_or_default(),
            c.eigcut,
            c.nextracut,
            if c.verbose { ".true." } else { ".false." },
        );
        std::fs::write(self.input_path(workdir), text)?;
        debug!("wrote input deck {}", self.input_path(workdir).display());
        Ok(())
    }

    fn resolved_argv(&self, workdir: &Path) -> Result<Vec<String>, EngineError> {
        let template = self
            .config
            .command
            .as_deref()
            .ok_or(EngineError::MissingCommand { name: ENGINE_NAME })?;
        let argv = resolve_template(template, &[(DIR_PLACEHOLDER, &workdir.to_string_lossy())]);
        if argv.is_empty() {
            return Err(EngineError::MissingCommand { name: ENGINE_NAME });
        }
        Ok(argv)
    }

    /// Runs the engine in `workdir`, streaming its stdout into `<label>.out`.
    ///
    /// Suspends until the child exits; other trials keep running. A spawn
    /// failure and a nonzero exit are distinct failure classes.
    pub async fn execute(&self, workdir: &Path) -> Result<(), EngineError> {
        let argv = self.resolved_argv(workdir)?;
        let command_line = argv.join(" ");
        info!("running `{command_line}` in {}", workdir.display());

        let out_file = std::fs::File::create(self.output_path(workdir))?;
        let mut child = tokio::process::Command::new(&argv[0])
            .args(&argv[1..])
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(out_file))
            .spawn()
            .map_err(|source| EngineError::Launch {
                command: command_line.clone(),
                source,
            })?;

        let status = child.wait().await?;
        if !status.success() {
            return Err(EngineError::Execution {
                name: ENGINE_NAME,
                command: command_line,
                dir: workdir.to_path_buf(),
                code: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }

    /// Parses `<label>.out` into a result record.
    pub fn read_results(
        &self,
        workdir: &Path,
        capture_evals: bool,
    ) -> Result<EngineResult, EngineError> {
        let path = self.output_path(workdir);
        let text = std::fs::read_to_string(&path)?;
        parse_output(&text, capture_evals).map_err(|err| match err {
            EngineError::MissingMarker { marker, .. } => EngineError::MissingMarker { marker, path },
            other => other,
        })
    }
}

/// Splits a command template on whitespace and substitutes placeholders per
/// token. Argument-vector launching: no shell, no quoting hazards.
pub fn resolve_template(template: &str, substitutions: &[(&str, &str)]) -> Vec<String> {
    template
        .split_whitespace()
        .map(|token| {
            let mut tok = token.to_string();
            for (placeholder, value) in substitutions {
                tok = tok.replace(placeholder, value);
            }
            tok
        })
        .collect()
}

fn parse_energy_line(line: &str) -> Result<f64, EngineError> {
    let value = line.split(':').nth(1).ok_or_else(|| EngineError::Parse {
        reason: "energy line has no `:` separator".to_string(),
        line: line.to_string(),
    })?;
    // The engine prints a complex pair `(<re>, <im>)`; the first real
    // component is the energy.
    let first = value.split(',').next().unwrap_or(value);
    let token = first.trim().trim_start_matches('(').trim();
    token.parse::<f64>().map_err(|_| EngineError::Parse {
        reason: "malformed energy value".to_string(),
        line: line.to_string(),
    })
}

fn parse_eval_line(line: &str) -> Result<Vec<f64>, EngineError> {
    line.split_whitespace()
        .map(|t| {
            t.parse::<f64>().map_err(|_| EngineError::Parse {
                reason: "malformed eigenvalue".to_string(),
                line: line.to_string(),
            })
        })
        .collect()
}

/// Line-oriented parse of the engine log. The energy marker is load-bearing:
/// its absence is a hard failure even if the process exited zero.
pub fn parse_output(text: &str, capture_evals: bool) -> Result<EngineResult, EngineError> {
    let mut evals: Option<Vec<f64>> = None;
    let mut energy: Option<f64> = None;

    let mut lines = text.lines().peekable();
    while let Some(line) = lines.next() {
        if line.contains(ENERGY_MARKER) {
            energy = Some(parse_energy_line(line)?);
            break;
        }
        if line.contains(EVALS_MARKER) {
            let mut block = Vec::new();
            while let Some(next) = lines.peek() {
                let trimmed = next.trim();
                if trimmed.is_empty()
                    || !trimmed
                        .split_whitespace()
                        .all(|t| t.parse::<f64>().is_ok())
                {
                    break;
                }
                block.extend(parse_eval_line(lines.next().unwrap_or_default())?);
            }
            if capture_evals {
                evals = Some(block);
            }
        }
    }

    let energy = energy.ok_or(EngineError::MissingMarker {
        marker: ENERGY_MARKER,
        path: PathBuf::new(),
    })?;
    Ok(EngineResult { energy, evals })
}
