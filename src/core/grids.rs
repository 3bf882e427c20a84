use nalgebra::{Matrix3, Vector3};
use thiserror::Error;

/// Half-width of the G-vector search cube.
pub const DEFAULT_NSH: i64 = 5;
/// Magnitude below which a candidate is treated as the Gamma point and dropped.
pub const DEFAULT_KMIN: f64 = 1e-3;

#[derive(Debug, Error, PartialEq)]
pub enum GridError {
    #[error("momentum cutoff {kc} not reachable inside the nsh = {nsh} search cube; increase nsh")]
    CutoffBeyondShell { kc: f64, nsh: i64 },
}

/// Integer offsets covering the cube `[-nsh, nsh]^3`, first axis slowest.
pub fn cubic_gvectors(nsh: i64) -> Vec<Vector3<i64>> {
    let side = 2 * nsh + 1;
    let mut out = Vec::with_capacity((side * side * side) as usize);
    for i in -nsh..=nsh {
        for j in -nsh..=nsh {
            for k in -nsh..=nsh {
                out.push(Vector3::new(i, j, k));
            }
        }
    }
    out
}

/// Integer G-vectors whose momentum `k = kpt + G . raxes` falls strictly
/// inside the shell `kmin < |k| < kc`. Rows of `raxes` are the reciprocal
/// lattice vectors.
///
/// The search cube must extend past the cutoff, otherwise plane waves near
/// `kc` would be silently dropped; that case is an error, not a truncation.
pub fn select_pw_gvectors(
    raxes: &Matrix3<f64>,
    kc: f64,
    kpt: &Vector3<f64>,
    nsh: i64,
    kmin: f64,
) -> Result<Vec<Vector3<i64>>, GridError> {
    let mut selected = Vec::new();
    let mut kmax = 0.0f64;
    for g in cubic_gvectors(nsh) {
        let gf = g.map(|v| v as f64);
        let kvec = kpt + raxes.transpose() * gf;
        let kmag = kvec.norm();
        kmax = kmax.max(kmag);
        if kmin < kmag && kmag < kc {
            selected.push(g);
        }
    }
    if kmax <= kc {
        return Err(GridError::CutoffBeyondShell { kc, nsh });
    }
    Ok(selected)
}

/// Flat position of integer G on the container's Fourier grid.
///
/// The container stores each grid with its axes reversed relative to
/// `(m0, m1, m2)` row-major order, which makes the first grid axis the
/// fastest-varying one here. Negative components wrap periodically.
pub fn flat_grid_index(g: &Vector3<i64>, mesh: [usize; 3]) -> usize {
    let wrap = |v: i64, m: usize| v.rem_euclid(m as i64) as usize;
    let gx = wrap(g.x, mesh[0]);
    let gy = wrap(g.y, mesh[1]);
    let gz = wrap(g.z, mesh[2]);
    gx + mesh[0] * (gy + mesh[1] * gz)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_has_expected_size() {
        assert_eq!(cubic_gvectors(1).len(), 27);
        assert_eq!(cubic_gvectors(2).len(), 125);
    }

    #[test]
    fn gamma_point_simple_cubic_shell() {
        let raxes = Matrix3::identity();
        let kpt = Vector3::zeros();
        // |k| = 1 (6 vectors) and sqrt(2) (12 vectors) lie below 1.5;
        // G = 0 is excluded by kmin.
        let g = select_pw_gvectors(&raxes, 1.5, &kpt, 1, DEFAULT_KMIN).unwrap();
        assert_eq!(g.len(), 18);
        let g = select_pw_gvectors(&raxes, 1.2, &kpt, 1, DEFAULT_KMIN).unwrap();
        assert_eq!(g.len(), 6);
    }

    #[test]
    fn unreachable_cutoff_is_an_error() {
        let raxes = Matrix3::identity();
        let kpt = Vector3::zeros();
        let err = select_pw_gvectors(&raxes, 10.0, &kpt, 1, DEFAULT_KMIN).unwrap_err();
        assert_eq!(err, GridError::CutoffBeyondShell { kc: 10.0, nsh: 1 });
    }

    #[test]
    fn grid_index_wraps_negative_components() {
        let mesh = [4, 4, 4];
        assert_eq!(flat_grid_index(&Vector3::new(0, 0, 0), mesh), 0);
        assert_eq!(flat_grid_index(&Vector3::new(1, 0, 0), mesh), 1);
        assert_eq!(flat_grid_index(&Vector3::new(0, 0, 1), mesh), 16);
        assert_eq!(flat_grid_index(&Vector3::new(-1, 0, 0), mesh), 3);
        assert_eq!(flat_grid_index(&Vector3::new(0, -1, -1), mesh), 4 * 3 + 16 * 3);
    }
}
