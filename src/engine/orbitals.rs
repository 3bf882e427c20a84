//! Orbital generation for one trial: either computed in process (plane-wave
//! layout) or delegated to an external writer subprocess. One capability,
//! selected by configuration; the orchestrator does not care which.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, info};
use nalgebra::{Matrix3, Vector3};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::core::grids::{self, DEFAULT_KMIN, DEFAULT_NSH};
use crate::engine::error::EngineError;
use crate::engine::qemp2::{resolve_template, DIR_PLACEHOLDER};
use crate::io::orbsg::OrbsgWriter;

pub const WRITER_NAME: &str = "orbital_writer";

/// Token substituted with the container path in the writer's command template.
pub const ORBITAL_PLACEHOLDER: &str = "{ORBITAL_FILE}";

/// Produces the orbital container for one trial and reports how many
/// orbitals it holds.
#[async_trait]
pub trait OrbitalGenerator: Send + Sync {
    async fn generate(
        &self,
        workdir: &Path,
        orbital_path: &Path,
        x: &[f64],
    ) -> Result<u32, EngineError>;

    fn name(&self) -> &str;
}

/// In-process generator for the pure plane-wave layout: every momentum
/// inside the cutoff becomes a delta function on the Fourier grid. The
/// Gaussian half of a mixed basis needs the external writer; evaluating
/// those orbitals is not this crate's physics.
#[derive(Debug, Clone)]
pub struct PlaneWaveGenerator {
    /// Reciprocal lattice, rows are the reciprocal vectors (1/bohr).
    pub reciprocal: Matrix3<f64>,
    pub kpoints: Vec<Vector3<f64>>,
    pub mesh: [usize; 3],
    /// Momentum cutoff (1/bohr).
    pub kcut: f64,
    pub nsh: i64,
    pub kmin: f64,
}

impl PlaneWaveGenerator {
    pub fn new(
        reciprocal: Matrix3<f64>,
        kpoints: Vec<Vector3<f64>>,
        mesh: [usize; 3],
        kcut: f64,
    ) -> Self {
        Self {
            reciprocal,
            kpoints,
            mesh,
            kcut,
            nsh: DEFAULT_NSH,
            kmin: DEFAULT_KMIN,
        }
    }
}

#[async_trait]
impl OrbitalGenerator for PlaneWaveGenerator {
    async fn generate(
        &self,
        _workdir: &Path,
        orbital_path: &Path,
        _x: &[f64],
    ) -> Result<u32, EngineError> {
        let nnr = self.mesh[0] * self.mesh[1] * self.mesh[2];
        let mut writer =
            OrbsgWriter::create(orbital_path, &self.reciprocal, &self.kpoints, self.mesh)?;
        let mut norbs = Vec::with_capacity(self.kpoints.len());
        let mut total = 0u32;
        for (ik, kpt) in self.kpoints.iter().enumerate() {
            let gvecs =
                grids::select_pw_gvectors(&self.reciprocal, self.kcut, kpt, self.nsh, self.kmin)?;
            for (ib, g) in gvecs.iter().enumerate() {
                let mut coeffs = vec![Complex64::new(0.0, 0.0); nnr];
                coeffs[grids::flat_grid_index(g, self.mesh)] = Complex64::new(1.0, 0.0);
                writer.put_band(ik, ib, &coeffs)?;
            }
            debug!("k-point {ik}: {} plane waves below kc = {}", gvecs.len(), self.kcut);
            total += gvecs.len() as u32;
            norbs.push(gvecs.len());
        }
        writer.finish(&norbs)?;
        Ok(total)
    }

    fn name(&self) -> &str {
        "plane-wave (in-process)"
    }
}

/// Configuration of the external orbital writer. The command template must
/// carry both placeholders; that is checked before anything is spawned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalWriterConfig {
    pub command: Option<String>,
}

/// Delegates orbital generation to a second external process. The writer
/// reports exactly one integer (the orbital count) on its standard output;
/// anything else is a hard failure.
pub struct ExternalOrbitalWriter {
    command: String,
}

impl ExternalOrbitalWriter {
    pub fn new(config: ExternalWriterConfig) -> Result<Self, EngineError> {
        let command = config
            .command
            .ok_or(EngineError::MissingCommand { name: WRITER_NAME })?;
        for placeholder in [DIR_PLACEHOLDER, ORBITAL_PLACEHOLDER] {
            if !command.contains(placeholder) {
                return Err(EngineError::MissingPlaceholder {
                    template: command,
                    placeholder,
                });
            }
        }
        Ok(Self { command })
    }
}

#[async_trait]
impl OrbitalGenerator for ExternalOrbitalWriter {
    async fn generate(
        &self,
        workdir: &Path,
        orbital_path: &Path,
        x: &[f64],
    ) -> Result<u32, EngineError> {
        // The writer reads the trial exponents from the working directory.
        let xfile = workdir.join("x.dat");
        let body: String = x.iter().map(|v| format!("{v:.12e}\n")).collect();
        std::fs::write(&xfile, body)?;

        let argv = resolve_template(
            &self.command,
            &[
                (DIR_PLACEHOLDER, &workdir.to_string_lossy()),
                (ORBITAL_PLACEHOLDER, &orbital_path.to_string_lossy()),
            ],
        );
        let command_line = argv.join(" ");
        info!("running `{command_line}` in {}", workdir.display());

        let child = tokio::process::Command::new(&argv[0])
            .args(&argv[1..])
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| EngineError::Launch {
                command: command_line.clone(),
                source,
            })?;

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(EngineError::Execution {
                name: WRITER_NAME,
                command: command_line,
                dir: workdir.to_path_buf(),
                code: output.status.code().unwrap_or(-1),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let token = stdout.trim();
        token.parse::<u32>().map_err(|_| EngineError::Parse {
            reason: "orbital writer stdout is not a single integer".to_string(),
            line: token.to_string(),
        })
    }

    fn name(&self) -> &str {
        WRITER_NAME
    }
}
