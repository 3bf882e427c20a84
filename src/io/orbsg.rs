use std::path::Path;

use nalgebra::{Matrix3, Vector3};
use ndarray::Array2;
use num_complex::Complex64;
use thiserror::Error;

/// Top-level group of the orbital exchange container. The external engines
/// enumerate datasets by name, so the layout below is byte-exact protocol,
/// not a serialization detail.
pub const TOP_GROUP: &str = "OrbsG";

/// Tolerance for coefficients that must read back as exactly zero beyond a
/// declared plane-wave cutoff. Allows for rounding in the producer's FFT.
pub const ZERO_TOL: f64 = 1e-12;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("container access failed: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error("k-point {ik} declares {declared} orbitals but {present} coefficient datasets are present")]
    OrbitalCountMismatch {
        ik: usize,
        declared: usize,
        present: usize,
    },

    #[error("k-point {ik} band {ib} has a nonzero coefficient beyond the {npw}-plane-wave cutoff")]
    NonzeroBeyondCutoff { ik: usize, ib: usize, npw: usize },

    #[error("writer closed with {got} bands for k-point {ik}, declared {declared}")]
    DeclaredCountMismatch {
        ik: usize,
        declared: usize,
        got: usize,
    },

    #[error("dataset `{name}` is malformed: {reason}")]
    Malformed { name: String, reason: String },
}

fn band_name(ik: usize, ib: usize) -> String {
    format!("kp{ik}_b{ib}")
}

fn gvec_name(ik: usize) -> String {
    format!("kp{ik}_g")
}

/// Streaming writer for the orbital container.
///
/// Header datasets go to disk at creation; each coefficient dataset is
/// written as it is produced. For large systems this container dominates a
/// trial's disk I/O, so the full orbital set is never buffered in memory.
pub struct OrbsgWriter {
    file: hdf5::File,
    group: hdf5::Group,
    nkpts: usize,
    bands_written: Vec<usize>,
}

impl OrbsgWriter {
    pub fn create(
        path: &Path,
        reciprocal: &Matrix3<f64>,
        kpoints: &[Vector3<f64>],
        mesh: [usize; 3],
    ) -> Result<Self, CodecError> {
        let file = hdf5::File::create(path)?;
        let group = file.create_group(TOP_GROUP)?;

        let recip = Array2::from_shape_fn((3, 3), |(i, j)| reciprocal[(i, j)]);
        group
            .new_dataset_builder()
            .with_data(&recip)
            .create("reciprocal_vectors")?;

        group
            .new_dataset::<i64>()
            .create("number_of_kpoints")?
            .write_scalar(&(kpoints.len() as i64))?;

        let kp = Array2::from_shape_fn((kpoints.len(), 3), |(i, j)| kpoints[i][j]);
        group.new_dataset_builder().with_data(&kp).create("kpoints")?;

        let meshv: Vec<i64> = mesh.iter().map(|&m| m as i64).collect();
        group
            .new_dataset_builder()
            .with_data(meshv.as_slice())
            .create("fft_grid")?;

        group
            .new_dataset::<i64>()
            .create("grid_type")?
            .write_scalar(&0)?;

        Ok(Self {
            file,
            group,
            nkpts: kpoints.len(),
            bands_written: vec![0; kpoints.len()],
        })
    }

    /// The container would happily accept a dataset named after an
    /// undeclared k-point, so the writer rejects it first.
    fn check_kpoint(&self, ik: usize, name: String) -> Result<(), CodecError> {
        if ik >= self.nkpts {
            return Err(CodecError::Malformed {
                name,
                reason: format!("k-point {ik} out of range, container declares {}", self.nkpts),
            });
        }
        Ok(())
    }

    /// Declares the plane-wave G-vectors of k-point `ik` (mixed-basis layout).
    /// Readers use this dataset's length as the momentum cutoff for the
    /// zero-tail check.
    pub fn put_gvectors(&self, ik: usize, gvecs: &[Vector3<i64>]) -> Result<(), CodecError> {
        self.check_kpoint(ik, gvec_name(ik))?;
        let data = Array2::from_shape_fn((gvecs.len(), 3), |(i, j)| gvecs[i][j]);
        self.group
            .new_dataset_builder()
            .with_data(&data)
            .create(gvec_name(ik).as_str())?;
        Ok(())
    }

    /// Writes one (k-point, band) coefficient dataset, interleaved as
    /// `(real, imaginary)` per grid point.
    pub fn put_band(
        &mut self,
        ik: usize,
        ib: usize,
        coeffs: &[Complex64],
    ) -> Result<(), CodecError> {
        self.check_kpoint(ik, band_name(ik, ib))?;
        let data = Array2::from_shape_fn((coeffs.len(), 2), |(i, j)| {
            if j == 0 {
                coeffs[i].re
            } else {
                coeffs[i].im
            }
        });
        self.group
            .new_dataset_builder()
            .with_data(&data)
            .create(band_name(ik, ib).as_str())?;
        self.bands_written[ik] += 1;
        Ok(())
    }

    /// Writes the per-k-point orbital counts and flushes the container.
    /// The declared counts must match what was actually written.
    pub fn finish(self, norbs: &[usize]) -> Result<(), CodecError> {
        if norbs.len() != self.nkpts {
            return Err(CodecError::Malformed {
                name: "number_of_orbitals".into(),
                reason: format!("{} entries for {} k-points", norbs.len(), self.nkpts),
            });
        }
        for (ik, (&declared, &got)) in norbs.iter().zip(&self.bands_written).enumerate() {
            if declared != got {
                return Err(CodecError::DeclaredCountMismatch { ik, declared, got });
            }
        }
        let counts: Vec<i64> = norbs.iter().map(|&n| n as i64).collect();
        self.group
            .new_dataset_builder()
            .with_data(counts.as_slice())
            .create("number_of_orbitals")?;
        self.file.flush()?;
        Ok(())
    }
}

/// Fully decoded orbital container.
#[derive(Debug, Clone)]
pub struct OrbitalData {
    /// Reciprocal lattice, rows are the reciprocal vectors.
    pub reciprocal: Matrix3<f64>,
    pub kpoints: Vec<Vector3<f64>>,
    /// Fourier grid shape, present in the plane-wave layout.
    pub mesh: Option<[usize; 3]>,
    /// Declared orbital count per k-point.
    pub norbs: Vec<usize>,
    /// Plane-wave G-vectors per k-point, when the mixed layout declares them.
    pub gvectors: Vec<Option<Vec<Vector3<i64>>>>,
    /// Per k-point, per band complex coefficients. Truncated to the
    /// plane-wave count when G-vectors declare a cutoff.
    pub coefficients: Vec<Vec<Vec<Complex64>>>,
}

pub fn read_orbitals(path: &Path) -> Result<OrbitalData, CodecError> {
    let file = hdf5::File::open(path)?;
    let group = file.group(TOP_GROUP)?;

    let recip = group.dataset("reciprocal_vectors")?.read_2d::<f64>()?;
    if recip.shape() != [3, 3] {
        return Err(CodecError::Malformed {
            name: "reciprocal_vectors".into(),
            reason: format!("shape {:?}, expected [3, 3]", recip.shape()),
        });
    }
    let reciprocal = Matrix3::from_fn(|i, j| recip[[i, j]]);

    let nk = group
        .dataset("number_of_kpoints")?
        .read_scalar::<i64>()? as usize;
    let kp = group.dataset("kpoints")?.read_2d::<f64>()?;
    if kp.shape() != [nk, 3] {
        return Err(CodecError::Malformed {
            name: "kpoints".into(),
            reason: format!("shape {:?} for {} k-points", kp.shape(), nk),
        });
    }
    let kpoints: Vec<Vector3<f64>> = (0..nk)
        .map(|i| Vector3::new(kp[[i, 0]], kp[[i, 1]], kp[[i, 2]]))
        .collect();

    let mesh = if group.link_exists("fft_grid") {
        let m = group.dataset("fft_grid")?.read_1d::<i64>()?;
        if m.len() != 3 {
            return Err(CodecError::Malformed {
                name: "fft_grid".into(),
                reason: format!("{} entries, expected 3", m.len()),
            });
        }
        Some([m[0] as usize, m[1] as usize, m[2] as usize])
    } else {
        None
    };

    let counts = group.dataset("number_of_orbitals")?.read_1d::<i64>()?;
    if counts.len() != nk {
        return Err(CodecError::Malformed {
            name: "number_of_orbitals".into(),
            reason: format!("{} entries for {} k-points", counts.len(), nk),
        });
    }
    let norbs: Vec<usize> = counts.iter().map(|&n| n as usize).collect();

    let members = group.member_names()?;

    let mut gvectors = Vec::with_capacity(nk);
    let mut coefficients = Vec::with_capacity(nk);
    for (ik, &declared) in norbs.iter().enumerate() {
        // Positional addressing: the dataset key carries both indices, so the
        // declared count can be checked against what is actually present.
        let prefix = format!("kp{ik}_b");
        let present = members
            .iter()
            .filter(|name| {
                name.strip_prefix(&prefix)
                    .map_or(false, |rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
            })
            .count();
        if present != declared {
            return Err(CodecError::OrbitalCountMismatch {
                ik,
                declared,
                present,
            });
        }

        let gv = if group.link_exists(&gvec_name(ik)) {
            let raw = group.dataset(&gvec_name(ik))?.read_2d::<i64>()?;
            Some(
                (0..raw.shape()[0])
                    .map(|i| Vector3::new(raw[[i, 0]], raw[[i, 1]], raw[[i, 2]]))
                    .collect::<Vec<_>>(),
            )
        } else {
            None
        };
        let npw = gv.as_ref().map(|g| g.len());

        let mut bands = Vec::with_capacity(declared);
        for ib in 0..declared {
            let name = band_name(ik, ib);
            let raw = group.dataset(&name)?.read_2d::<f64>()?;
            if raw.shape()[1] != 2 {
                return Err(CodecError::Malformed {
                    name,
                    reason: format!("second axis has {} entries, expected 2", raw.shape()[1]),
                });
            }
            let mut coeffs: Vec<Complex64> = (0..raw.shape()[0])
                .map(|i| Complex64::new(raw[[i, 0]], raw[[i, 1]]))
                .collect();
            if let Some(npw) = npw {
                if npw > coeffs.len() {
                    return Err(CodecError::Malformed {
                        name,
                        reason: format!(
                            "{} samples for a declared plane-wave count of {npw}",
                            coeffs.len()
                        ),
                    });
                }
                if coeffs[npw..].iter().any(|c| c.norm() > ZERO_TOL) {
                    return Err(CodecError::NonzeroBeyondCutoff { ik, ib, npw });
                }
                coeffs.truncate(npw);
            }
            bands.push(coeffs);
        }
        gvectors.push(gv);
        coefficients.push(bands);
    }

    Ok(OrbitalData {
        reciprocal,
        kpoints,
        mesh,
        norbs,
        gvectors,
        coefficients,
    })
}
