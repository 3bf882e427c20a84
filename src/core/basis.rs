use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BasisError {
    #[error("lmax = {0} leaves no contracted shells (need lmax >= 2)")]
    NoContractedShells(usize),

    #[error("exponent vector has {got} entries, basis shape needs {want}")]
    DimensionMismatch { want: usize, got: usize },
}

/// Shape of a trial Gaussian basis.
///
/// Channel `l` carries `lmax - l` shells, so the flat exponent vector seen by
/// the outer optimizer is channel-major: `index(n, l) = offset(l) + n` with
/// `offset(l) = l * (2 * lmax - l + 1) / 2`.
///
/// Within each of the first `lmax - 1` channels (the ones holding at least two
/// shells) the exponents must strictly increase with shell index: tighter
/// shells carry larger exponents than looser ones. The optimizer's
/// step-acceptance test relies on this ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasisShape {
    lmax: usize,
}

impl BasisShape {
    /// A shape with `lmax < 2` has no channel with two or more shells, so the
    /// ordering constraint is vacuous and the input is rejected outright.
    pub fn new(lmax: usize) -> Result<Self, BasisError> {
        if lmax < 2 {
            return Err(BasisError::NoContractedShells(lmax));
        }
        Ok(Self { lmax })
    }

    pub fn lmax(&self) -> usize {
        self.lmax
    }

    /// Number of shells in angular-momentum channel `l`.
    pub fn num_shells(&self, l: usize) -> usize {
        self.lmax - l
    }

    /// Total length of the flat exponent vector.
    pub fn num_params(&self) -> usize {
        self.lmax * (self.lmax + 1) / 2
    }

    /// Flat position of shell `n` in channel `l`.
    pub fn index(&self, n: usize, l: usize) -> usize {
        l * (2 * self.lmax - l + 1) / 2 + n
    }

    fn check_len(&self, x: &[f64]) -> Result<(), BasisError> {
        let want = self.num_params();
        if x.len() != want {
            return Err(BasisError::DimensionMismatch { want, got: x.len() });
        }
        Ok(())
    }

    /// Cheap ordering check used before accepting an optimizer step.
    ///
    /// Returns on the first violation found; `repair` is the one that scans
    /// every channel exhaustively.
    pub fn is_feasible(&self, x: &[f64]) -> Result<bool, BasisError> {
        self.check_len(x)?;
        for l in 0..self.lmax - 1 {
            for n in 1..self.num_shells(l) {
                if x[self.index(n, l)] <= x[self.index(n - 1, l)] {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Restores the per-channel shell ordering in place.
    ///
    /// Works channel by channel, shell by shell in increasing order, swapping
    /// the two offending values whenever a violation is found and re-checking
    /// downward until the new shell settles. Swapping (rather than clamping)
    /// keeps the multiset of exponent values intact, so the optimizer's step
    /// size is not silently shrunk. Idempotent: a second call is a no-op.
    pub fn repair(&self, x: &mut [f64]) -> Result<(), BasisError> {
        self.check_len(x)?;
        for l in 0..self.lmax - 1 {
            let base = self.index(0, l);
            for n in 1..self.num_shells(l) {
                let mut m = n;
                while m > 0 && x[base + m] <= x[base + m - 1] {
                    x.swap(base + m, base + m - 1);
                    m -= 1;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_is_channel_major() {
        let shape = BasisShape::new(3).unwrap();
        // Channel 0 holds 3 shells, channel 1 holds 2, channel 2 holds 1.
        assert_eq!(shape.num_params(), 6);
        assert_eq!(shape.index(0, 0), 0);
        assert_eq!(shape.index(1, 0), 1);
        assert_eq!(shape.index(2, 0), 2);
        assert_eq!(shape.index(0, 1), 3);
        assert_eq!(shape.index(1, 1), 4);
        assert_eq!(shape.index(0, 2), 5);
    }

    #[test]
    fn shells_per_channel() {
        let shape = BasisShape::new(4).unwrap();
        assert_eq!(shape.num_shells(0), 4);
        assert_eq!(shape.num_shells(3), 1);
        assert_eq!(shape.num_params(), 10);
    }
}
