//! Text support for the plane-wave engine's deck pair: `key = value` reads
//! from the input deck and lattice / k-point / FFT-mesh extraction from the
//! converged scf log. Only the handful of markers the orbital writer needs.

use std::f64::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};

use nalgebra::{Matrix3, Vector3};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeckError {
    #[error("failed to read deck file: {0}")]
    Io(#[from] std::io::Error),

    #[error("marker `{marker}` not found in {path}")]
    MissingMarker { marker: &'static str, path: PathBuf },

    #[error("could not parse `{line}`: {reason}")]
    Malformed { line: String, reason: String },
}

fn malformed(line: &str, reason: &str) -> DeckError {
    DeckError::Malformed {
        line: line.to_string(),
        reason: reason.to_string(),
    }
}

/// Substring between the first `(` and the following `)`.
fn between_parens(s: &str) -> Option<&str> {
    let start = s.find('(')? + 1;
    let end = s[start..].find(')')? + start;
    Some(&s[start..end])
}

/// First `key = value` occurrence in a `&namelist`-style input deck, with
/// surrounding quotes stripped.
pub fn read_input_value(path: &Path, key: &'static str) -> Result<String, DeckError> {
    let text = fs::read_to_string(path)?;
    for line in text.lines() {
        let Some((lhs, rhs)) = line.split_once('=') else {
            continue;
        };
        if lhs.trim() == key {
            let value = rhs.trim().trim_matches(|c| c == '\'' || c == '"');
            return Ok(value.to_string());
        }
    }
    Err(DeckError::MissingMarker {
        marker: key,
        path: path.to_path_buf(),
    })
}

/// Lattice parameter alat (bohr) from the scf log.
pub fn read_lattice_parameter(path: &Path) -> Result<f64, DeckError> {
    const MARKER: &str = "lattice parameter (alat)";
    let text = fs::read_to_string(path)?;
    for line in text.lines() {
        if !line.contains(MARKER) {
            continue;
        }
        let rhs = line
            .split('=')
            .nth(1)
            .ok_or_else(|| malformed(line, "no `=` separator"))?;
        let token = rhs
            .split_whitespace()
            .next()
            .ok_or_else(|| malformed(line, "no value after `=`"))?;
        return token
            .parse::<f64>()
            .map_err(|_| malformed(line, "alat is not a number"));
    }
    Err(DeckError::MissingMarker {
        marker: MARKER,
        path: path.to_path_buf(),
    })
}

/// FFT mesh from the `FFT dimensions: ( n1, n2, n3)` line.
pub fn read_fft_mesh(path: &Path) -> Result<[usize; 3], DeckError> {
    const MARKER: &str = "FFT dimensions";
    let text = fs::read_to_string(path)?;
    for line in text.lines() {
        if !line.contains(MARKER) {
            continue;
        }
        let inner = between_parens(line).ok_or_else(|| malformed(line, "no parenthesized mesh"))?;
        let dims: Vec<usize> = inner
            .split(',')
            .map(|t| t.trim().parse::<usize>())
            .collect::<Result<_, _>>()
            .map_err(|_| malformed(line, "mesh entry is not an integer"))?;
        if dims.len() != 3 {
            return Err(malformed(line, "expected three mesh entries"));
        }
        return Ok([dims[0], dims[1], dims[2]]);
    }
    Err(DeckError::MissingMarker {
        marker: MARKER,
        path: path.to_path_buf(),
    })
}

/// Reciprocal lattice vectors in cartesian 1/bohr, from the
/// `reciprocal axes: (cart. coord. in units 2 pi/alat)` block. Rows of the
/// returned matrix are b1, b2, b3.
pub fn read_reciprocal_vectors(path: &Path) -> Result<Matrix3<f64>, DeckError> {
    const MARKER: &str = "reciprocal axes";
    let alat = read_lattice_parameter(path)?;
    let blat = 2.0 * PI / alat;
    let text = fs::read_to_string(path)?;
    let mut lines = text.lines();
    for line in lines.by_ref() {
        if line.contains(MARKER) {
            let mut rows = [Vector3::zeros(); 3];
            for row in rows.iter_mut() {
                let bline = lines
                    .next()
                    .ok_or_else(|| malformed(line, "truncated reciprocal axes block"))?;
                let rhs = bline
                    .split_once('=')
                    .map(|(_, rhs)| rhs)
                    .ok_or_else(|| malformed(bline, "no `=` separator"))?;
                let inner = between_parens(rhs)
                    .ok_or_else(|| malformed(bline, "no parenthesized vector"))?;
                let comps: Vec<f64> = inner
                    .split_whitespace()
                    .map(|t| t.parse::<f64>())
                    .collect::<Result<_, _>>()
                    .map_err(|_| malformed(bline, "vector component is not a number"))?;
                if comps.len() != 3 {
                    return Err(malformed(bline, "expected three components"));
                }
                *row = Vector3::new(comps[0], comps[1], comps[2]) * blat;
            }
            return Ok(Matrix3::from_rows(&[
                rows[0].transpose(),
                rows[1].transpose(),
                rows[2].transpose(),
            ]));
        }
    }
    Err(DeckError::MissingMarker {
        marker: MARKER,
        path: path.to_path_buf(),
    })
}

/// One k-point of the scf run, in cartesian 1/bohr.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KPoint {
    pub kvec: Vector3<f64>,
    pub weight: f64,
}

/// Parses one `k(  i) = (  kx ky kz), wk = w` line. `ik` cross-checks the
/// 1-based index printed by the engine.
fn parse_kline(line: &str, ik: usize) -> Result<(Vector3<f64>, f64), DeckError> {
    let mut pieces = line.split('=');
    let (Some(head), Some(kvect), Some(wkt)) = (pieces.next(), pieces.next(), pieces.next())
    else {
        return Err(malformed(line, "expected `k(i) = (...), wk = w`"));
    };
    let idx: usize = between_parens(head)
        .and_then(|t| t.trim().parse().ok())
        .ok_or_else(|| malformed(line, "bad k-point index"))?;
    if idx != ik + 1 {
        return Err(malformed(line, "k-point index out of sequence"));
    }
    let comps: Vec<f64> = between_parens(kvect)
        .ok_or_else(|| malformed(line, "no parenthesized k-vector"))?
        .split_whitespace()
        .map(|t| t.parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| malformed(line, "k-vector component is not a number"))?;
    if comps.len() != 3 {
        return Err(malformed(line, "expected three k-vector components"));
    }
    let wk: f64 = wkt
        .trim()
        .parse()
        .map_err(|_| malformed(line, "weight is not a number"))?;
    Ok((Vector3::new(comps[0], comps[1], comps[2]), wk))
}

/// K-point list from the scf log, scaled from the engine's 2pi/alat units to
/// cartesian 1/bohr.
pub fn read_kpoints(path: &Path) -> Result<Vec<KPoint>, DeckError> {
    const MARKER: &str = "number of k points";
    let alat = read_lattice_parameter(path)?;
    let blat = 2.0 * PI / alat;
    let text = fs::read_to_string(path)?;
    let mut lines = text.lines();
    for line in lines.by_ref() {
        if !line.contains(MARKER) {
            continue;
        }
        let rhs = line
            .split('=')
            .nth(1)
            .ok_or_else(|| malformed(line, "no `=` separator"))?;
        let nk: usize = rhs
            .split_whitespace()
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| malformed(line, "k-point count is not an integer"))?;
        // Units line must confirm 2pi/alat before any k-vector is trusted.
        let units = lines
            .next()
            .ok_or_else(|| malformed(line, "truncated k-point block"))?;
        if !units.contains("2pi/alat") {
            return Err(malformed(units, "expected coordinates in 2pi/alat units"));
        }
        let mut kpts = Vec::with_capacity(nk);
        for ik in 0..nk {
            let kline = lines
                .next()
                .ok_or_else(|| malformed(line, "truncated k-point block"))?;
            let (kvec, weight) = parse_kline(kline, ik)?;
            kpts.push(KPoint {
                kvec: kvec * blat,
                weight,
            });
        }
        return Ok(kpts);
    }
    Err(DeckError::MissingMarker {
        marker: MARKER,
        path: path.to_path_buf(),
    })
}
