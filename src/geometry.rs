//! Process-wide immutable geometry: global sizes, coordinate system and
//! spatial symmetry class (spec §3).
//!
//! Semtex keeps this information behind static `Geometry::` class methods;
//! here it is an ordinary `Arc<Geometry>` threaded through every component
//! that needs it, following the teacher's habit of handing a `&SpaceBase`
//! into every basis/solver constructor rather than reaching for global
//! state.

use crate::error::{alert, Result, Severity};

/// Coordinate system used for the metric / divergence / curl operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordSys {
    Cartesian,
    Cylindrical,
}

/// Spatial symmetry class: how many velocity components are evolved and
/// whether the Fourier expansion keeps a half-period Z-reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymmetryClass {
    /// 2 components, 2D (no Fourier expansion, n_z == 1).
    TwoDTwoC,
    /// 3 components, 2D base + Fourier direction.
    TwoDThreeC,
    /// 3 components, fully 3D.
    ThreeDThreeC,
}

impl SymmetryClass {
    pub fn n_velocity_components(self) -> usize {
        match self {
            SymmetryClass::TwoDTwoC => 2,
            SymmetryClass::TwoDThreeC | SymmetryClass::ThreeDThreeC => 3,
        }
    }
}

/// Process-wide geometry, built once at session bring-up.
#[derive(Debug, Clone)]
pub struct Geometry {
    /// Polynomial order per element edge (GLL points per direction).
    pub n_p: usize,
    /// Number of spectral elements.
    pub n_el: usize,
    /// Total number of Fourier planes (1, or even).
    pub n_z: usize,
    /// Number of MPI ranks.
    pub n_proc: usize,
    /// Number of Fourier planes held on this rank (n_z / n_proc).
    pub n_z_local: usize,
    pub coord: CoordSys,
    pub symmetry: SymmetryClass,
    /// Half-period Z-reflection (only meaningful for n_z > 1).
    pub z_reflect: bool,
}

fn round_up(n: usize, multiple: usize) -> usize {
    if multiple == 0 {
        return n;
    }
    let rem = n % multiple;
    if rem == 0 {
        n
    } else {
        n + (multiple - rem)
    }
}

impl Geometry {
    /// Construct and validate process-wide geometry.
    ///
    /// # Errors
    /// Returns a fatal configuration error (never a panic, per spec §7) if
    /// `n_z` is neither 1 nor even, or if `n_proc` does not evenly divide
    /// `n_z/2`.
    pub fn new(
        n_p: usize,
        n_el: usize,
        n_z: usize,
        n_proc: usize,
        coord: CoordSys,
        symmetry: SymmetryClass,
        z_reflect: bool,
    ) -> Result<Self> {
        let routine = "Geometry::new";
        if n_z != 1 && n_z % 2 != 0 {
            alert(routine, "n_z must be 1 or even", Severity::Error)?;
        }
        if n_z > 1 {
            if n_proc == 0 || (n_z / 2) % n_proc != 0 {
                alert(
                    routine,
                    "n_proc must evenly divide n_z/2",
                    Severity::Error,
                )?;
            }
        } else if n_proc != 1 {
            alert(
                routine,
                "2D problems (n_z == 1) require n_proc == 1",
                Severity::Error,
            )?;
        }
        let n_z_local = if n_z == 1 { 1 } else { n_z / n_proc };
        if n_z > 1 && n_z_local < 2 {
            alert(
                routine,
                "n_z_local must be >= 2 for a genuine 3D problem",
                Severity::Error,
            )?;
        }
        Ok(Geometry {
            n_p,
            n_el,
            n_z,
            n_proc,
            n_z_local,
            coord,
            symmetry,
            z_reflect,
        })
    }

    /// Total element-local points in one plane: n_p^2 * n_el.
    pub fn n_plane(&self) -> usize {
        self.n_p * self.n_p * self.n_el
    }

    /// Plane stride, rounded up to a multiple of 2*n_proc so every rank's
    /// transpose block lines up on a whole-plane boundary.
    pub fn plane_size(&self) -> usize {
        round_up(self.n_plane(), 2 * self.n_proc.max(1))
    }

    pub fn cylindrical(&self) -> bool {
        matches!(self.coord, CoordSys::Cylindrical)
    }

    /// Number of complex Fourier modes held locally (n_z_local / 2), 0 if 2D.
    pub fn n_mode_proc(&self) -> usize {
        if self.n_z == 1 {
            0
        } else {
            self.n_z_local / 2
        }
    }

    /// Nyquist plane index (second plane, root rank only) is never evolved.
    pub fn has_nyquist(&self, rank: usize) -> bool {
        rank == 0 && self.n_z > 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_basic() {
        assert_eq!(round_up(10, 4), 12);
        assert_eq!(round_up(8, 4), 8);
        assert_eq!(round_up(0, 4), 0);
    }

    #[test]
    fn rejects_bad_nz() {
        let g = Geometry::new(5, 4, 3, 1, CoordSys::Cartesian, SymmetryClass::TwoDTwoC, false);
        assert!(g.is_err());
    }

    #[test]
    fn derived_sizes() {
        let g = Geometry::new(5, 4, 1, 1, CoordSys::Cartesian, SymmetryClass::TwoDTwoC, false)
            .unwrap();
        assert_eq!(g.n_plane(), 25 * 4);
        assert_eq!(g.plane_size(), 100);
    }

    #[test]
    fn n_z_local_requires_two_planes() {
        let g = Geometry::new(
            5,
            4,
            8,
            4,
            CoordSys::Cartesian,
            SymmetryClass::TwoDThreeC,
            false,
        );
        assert!(g.is_err());
    }
}
