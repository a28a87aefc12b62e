//! Global Helmholtz solves: direct banded Cholesky over the
//! statically-condensed (Schur-complement) system, and Jacobi-
//! preconditioned conjugate gradients (JACPCG) as the matrix-free
//! alternative (spec §4.3).
//!
//! Grounded on the teacher's `solver::{FdmaTensor, Poisson}` split
//! between "build a separable/dense operator once" and "apply a `Solve`
//! trait against it every timestep" — the same shape reappears here as
//! [`DirectSolver::factor`] (build once per (lambda2, boundary group))
//! versus `Solve::apply` for both solver kinds.

use ndarray::{Array1, Array2};

use crate::assembly::AssemblyMap;
use crate::element::Element;
use crate::error::{alert, Result, Severity};
use crate::mesh::Mesh;

/// Build the dense local Helmholtz matrix for one element by applying
/// the tensor-product operator to each unit basis vector. `n_p^2` is
/// assumed small enough (as in any single spectral element) that this
/// dense construction, done once per `(element, lambda2)` pair and
/// cached by the caller, is cheap relative to the timestep loop that
/// reuses it.
fn local_dense_matrix(el: &Element, lambda2: f64) -> Array2<f64> {
    let np2 = el.n_p * el.n_p;
    let mut mat = Array2::<f64>::zeros((np2, np2));
    let mut unit = Array2::<f64>::zeros((el.n_p, el.n_p));
    for col in 0..np2 {
        unit.fill(0.0);
        unit.as_slice_mut().unwrap()[col] = 1.0;
        let action = el.helmholtz_operator(&unit, lambda2);
        let flat = action.as_slice().unwrap();
        for row in 0..np2 {
            mat[[row, col]] = flat[row];
        }
    }
    mat
}

/// Partition a dense local matrix into interior/boundary blocks, `i`
/// indexing the `(n_p-2)^2` interior nodes in row-major order and `b`
/// indexing the `4*(n_p-1)` boundary-ring nodes in the CCW order
/// produced by [`Element::side_indices`].
pub struct LocalPartition {
    pub interior_idx: Vec<usize>,
    pub boundary_idx: Vec<usize>,
}

fn local_partition(el: &Element) -> LocalPartition {
    let n = el.n_p;
    let mut interior_idx = Vec::new();
    let mut boundary_idx = Vec::new();
    let mut seen_boundary = vec![false; n * n];
    for side in crate::element::Side::ALL {
        for &(i, j) in el.side_indices(side).iter().take(n.saturating_sub(1)) {
            let flat = i * n + j;
            if !seen_boundary[flat] {
                seen_boundary[flat] = true;
                boundary_idx.push(flat);
            }
        }
    }
    for i in 0..n {
        for j in 0..n {
            let flat = i * n + j;
            if !seen_boundary[flat] {
                interior_idx.push(flat);
            }
        }
    }
    LocalPartition { interior_idx, boundary_idx }
}

fn gather(mat: &Array2<f64>, rows: &[usize], cols: &[usize]) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((rows.len(), cols.len()));
    for (r, &ri) in rows.iter().enumerate() {
        for (c, &ci) in cols.iter().enumerate() {
            out[[r, c]] = mat[[ri, ci]];
        }
    }
    out
}

/// Solve `a x = b` for small dense `a` by Gauss elimination with partial
/// pivoting (used only for the per-element interior block, which is
/// always modestly sized).
fn dense_solve(a: &Array2<f64>, b: &Array2<f64>) -> Array2<f64> {
    let n = a.nrows();
    let mut aug = a.clone();
    let mut rhs = b.clone();
    for col in 0..n {
        let mut piv = col;
        let mut best = aug[[col, col]].abs();
        for r in col + 1..n {
            if aug[[r, col]].abs() > best {
                best = aug[[r, col]].abs();
                piv = r;
            }
        }
        if piv != col {
            for c in 0..n {
                aug.swap([col, c], [piv, c]);
            }
            for c in 0..rhs.ncols() {
                rhs.swap([col, c], [piv, c]);
            }
        }
        let pivot = aug[[col, col]];
        for r in col + 1..n {
            let factor = aug[[r, col]] / pivot;
            if factor == 0.0 {
                continue;
            }
            for c in col..n {
                aug[[r, c]] -= factor * aug[[col, c]];
            }
            for c in 0..rhs.ncols() {
                rhs[[r, c]] -= factor * rhs[[col, c]];
            }
        }
    }
    let mut x = Array2::<f64>::zeros((n, rhs.ncols()));
    for row in (0..n).rev() {
        for c in 0..rhs.ncols() {
            let mut s = rhs[[row, c]];
            for k in row + 1..n {
                s -= aug[[row, k]] * x[[k, c]];
            }
            x[[row, c]] = s / aug[[row, row]];
        }
    }
    x
}

/// Static condensation of one element's dense Helmholtz matrix down to
/// its boundary-ring Schur complement, following semtex's `augmentSC`
/// convention (§4.3, `condition.cpp`): `s = kbb - kbi * kii^-1 * kib`.
pub struct ElementSchur {
    pub partition: LocalPartition,
    pub schur: Array2<f64>,
    pub kib: Array2<f64>,
    pub kii_inv_kib: Array2<f64>,
}

/// Fold every mixed-condition `augment_sc` diagonal term for element `e`
/// into its already-condensed Schur complement.
fn augment_mixed_diagonal(el: &Element, e: usize, boundaries: &crate::boundary::BoundarySys, es: &mut ElementSchur) {
    let mut diag = Array2::<f64>::zeros((el.n_p, el.n_p));
    for b in &boundaries.boundaries {
        if b.element != e || !b.condition.is_mixed() {
            continue;
        }
        b.condition.augment_sc(el, b.side, &mut diag);
    }
    let n = el.n_p;
    for (r, &flat) in es.partition.boundary_idx.iter().enumerate() {
        let (i, j) = (flat / n, flat % n);
        es.schur[[r, r]] += diag[[i, j]];
    }
}

pub fn condense(el: &Element, lambda2: f64) -> ElementSchur {
    let dense = local_dense_matrix(el, lambda2);
    let partition = local_partition(el);
    let kbb = gather(&dense, &partition.boundary_idx, &partition.boundary_idx);
    let kbi = gather(&dense, &partition.boundary_idx, &partition.interior_idx);
    let kii = gather(&dense, &partition.interior_idx, &partition.interior_idx);
    let kib = gather(&dense, &partition.interior_idx, &partition.boundary_idx);
    let kii_inv_kib = dense_solve(&kii, &kib);
    let schur = kbb - kbi.dot(&kii_inv_kib);
    ElementSchur { partition, schur, kib, kii_inv_kib }
}

/// Assembled, banded-Cholesky-factored global direct solver for one
/// `(lambda2, boundary group)` pair.
pub struct DirectSolver {
    pub bandwidth: usize,
    /// Banded lower-triangular Cholesky factor, column-major band
    /// storage: `band[[k, j]]` holds `L[j+k, j]` for `k` in
    /// `0..bandwidth`.
    band: Array2<f64>,
    n: usize,
    element_schurs: Vec<ElementSchur>,
}

impl DirectSolver {
    /// Build the global banded system from per-element Schur
    /// complements assembled via `map.btog`, then Cholesky-factor it.
    ///
    /// `boundaries`, when given, augments each boundary node's diagonal
    /// with its mixed (Robin) condition's `K*area_i` contribution before
    /// the element is folded into the global band (spec §4.3).
    pub fn factor(mesh: &Mesh, map: &AssemblyMap, lambda2: f64) -> Result<Self> {
        Self::factor_with_boundaries(mesh, map, lambda2, None)
    }

    pub fn factor_with_boundaries(
        mesh: &Mesh,
        map: &AssemblyMap,
        lambda2: f64,
        boundaries: Option<&crate::boundary::BoundarySys>,
    ) -> Result<Self> {
        let routine = "DirectSolver::factor";
        let n = map.nsolve;
        let bw = map.bandwidth;
        let mut band = Array2::<f64>::zeros((bw, n));
        let mut element_schurs = Vec::with_capacity(mesh.n_el());

        for (e, el) in mesh.elements.iter().enumerate() {
            let mut es = condense(el, lambda2);
            if let Some(boundaries) = boundaries {
                augment_mixed_diagonal(el, e, boundaries, &mut es);
            }
            let flat_to_ij = |flat: usize| (flat / el.n_p, flat % el.n_p);
            let gids: Vec<Option<usize>> = es
                .partition
                .boundary_idx
                .iter()
                .map(|&flat| {
                    let (i, j) = flat_to_ij(flat);
                    let gid = map.btog[e][[i, j]];
                    if map.bmask[e][[i, j]] {
                        None
                    } else {
                        Some(gid)
                    }
                })
                .collect();
            for (r, gr) in gids.iter().enumerate() {
                let Some(gr) = *gr else { continue };
                for (c, gc) in gids.iter().enumerate() {
                    let Some(gc) = *gc else { continue };
                    if gc > gr {
                        continue; // lower triangle only (symmetric operator)
                    }
                    let k = gr - gc;
                    if k >= bw {
                        alert(routine, "assembled bandwidth exceeds AssemblyMap::bandwidth", Severity::Error)?;
                    }
                    band[[k, gc]] += es.schur[[r, c]];
                }
            }
            element_schurs.push(es);
        }

        cholesky_band(&mut band, n, bw)?;

        Ok(DirectSolver { bandwidth: bw, band, n, element_schurs })
    }

    /// Solve `L L^T x = rhs` for the assembled boundary-unknown vector.
    pub fn solve_boundary(&self, rhs: &Array1<f64>) -> Array1<f64> {
        forward_band(&self.band, self.n, self.bandwidth, rhs)
            .into_iter()
            .collect::<Array1<f64>>()
            .pipe(|y| backward_band(&self.band, self.n, self.bandwidth, &y))
    }

    pub fn element_schur(&self, e: usize) -> &ElementSchur {
        &self.element_schurs[e]
    }
}

trait Pipe: Sized {
    fn pipe<R>(self, f: impl FnOnce(Self) -> R) -> R {
        f(self)
    }
}
impl<T> Pipe for T {}

fn cholesky_band(band: &mut Array2<f64>, n: usize, bw: usize) -> Result<()> {
    let routine = "solver::cholesky_band";
    if n == 0 {
        return Ok(());
    }
    for j in 0..n {
        let lo = j.saturating_sub(bw - 1);
        let mut ajj = band[[0, j]];
        for k in lo..j {
            let ljk = band[[j - k, k]];
            ajj -= ljk * ljk;
        }
        if ajj <= 0.0 {
            alert(routine, "Helmholtz Schur complement is not positive definite", Severity::Error)?;
        }
        let ljj = ajj.sqrt();
        band[[0, j]] = ljj;
        for i in j + 1..(j + bw).min(n) {
            let mut s = band[[i - j, j]];
            for k in lo..j {
                let lik = if i - k < bw { band[[i - k, k]] } else { 0.0 };
                let ljk = band[[j - k, k]];
                s -= lik * ljk;
            }
            band[[i - j, j]] = s / ljj;
        }
    }
    Ok(())
}

fn forward_band(band: &Array2<f64>, n: usize, bw: usize, rhs: &Array1<f64>) -> Vec<f64> {
    let mut y = vec![0.0; n];
    for j in 0..n {
        let mut s = rhs[j];
        for k in 1..bw.min(j + 1) {
            s -= band[[k, j - k]] * y[j - k];
        }
        y[j] = s / band[[0, j]];
    }
    y
}

fn backward_band(band: &Array2<f64>, n: usize, bw: usize, y: &[f64]) -> Array1<f64> {
    let mut x = vec![0.0; n];
    for j in (0..n).rev() {
        let mut s = y[j];
        for i in j + 1..(j + bw).min(n) {
            s -= band[[i - j, j]] * x[i];
        }
        x[j] = s / band[[0, j]];
    }
    Array1::from(x)
}

/// Jacobi-preconditioned conjugate gradients, the matrix-free
/// alternative solve path (spec §4.3), operating directly on the
/// per-element tensor-product Helmholtz action with no dense assembly.
pub struct JacPcg {
    pub tolerance: f64,
    pub max_iter: usize,
}

impl JacPcg {
    pub fn new(tolerance: f64, max_iter: usize) -> Self {
        JacPcg { tolerance, max_iter }
    }

    /// Solve `A x = b` where `apply(x) -> A x` and `precond` is the
    /// (already-inverted) Jacobi diagonal. Returns `(x, iterations)`.
    pub fn solve(
        &self,
        b: &Array1<f64>,
        precond: &Array1<f64>,
        mut apply: impl FnMut(&Array1<f64>) -> Array1<f64>,
    ) -> Result<(Array1<f64>, usize)> {
        let routine = "JacPcg::solve";
        let n = b.len();
        let mut x = Array1::<f64>::zeros(n);
        let mut r = b.clone();
        let mut z = &r * precond;
        let mut p = z.clone();
        let mut rz_old = r.dot(&z);
        let b_norm = b.dot(b).sqrt().max(1e-300);

        for it in 0..self.max_iter {
            let ap = apply(&p);
            let pap = p.dot(&ap);
            if pap.abs() < 1e-300 {
                break;
            }
            let alpha = rz_old / pap;
            x = &x + &(&p * alpha);
            r = &r - &(&ap * alpha);
            let res_norm = r.dot(&r).sqrt();
            if res_norm / b_norm < self.tolerance {
                return Ok((x, it + 1));
            }
            z = &r * precond;
            let rz_new = r.dot(&z);
            let beta = rz_new / rz_old;
            p = &z + &(&p * beta);
            rz_old = rz_new;
        }
        alert(routine, "JACPCG did not converge within max_iter", Severity::Warning)?;
        Ok((x, self.max_iter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementGeometry;
    use crate::mesh::EdgeLink;
    use ndarray::Array2 as A2;

    fn unit_element(n_p: usize) -> Element {
        let rule = crate::operators::gll_rule(n_p);
        let mut x = A2::zeros((n_p, n_p));
        let mut y = A2::zeros((n_p, n_p));
        for i in 0..n_p {
            for j in 0..n_p {
                x[[i, j]] = rule.z[i];
                y[[i, j]] = rule.z[j];
            }
        }
        let jac = A2::from_elem((n_p, n_p), 1.0);
        let rx = A2::from_elem((n_p, n_p), 1.0);
        let ry = A2::from_elem((n_p, n_p), 0.0);
        let sx = A2::from_elem((n_p, n_p), 0.0);
        let sy = A2::from_elem((n_p, n_p), 1.0);
        Element::new(n_p, false, ElementGeometry { x, y, jac, rx, ry, sx, sy })
    }

    #[test]
    fn local_matrix_is_symmetric() {
        let el = unit_element(5);
        let m = local_dense_matrix(&el, 1.0);
        for i in 0..m.nrows() {
            for j in 0..m.ncols() {
                assert!((m[[i, j]] - m[[j, i]]).abs() < 1e-8);
            }
        }
    }

    #[test]
    fn schur_complement_is_symmetric() {
        let el = unit_element(5);
        let es = condense(&el, 1.0);
        for i in 0..es.schur.nrows() {
            for j in 0..es.schur.ncols() {
                assert!((es.schur[[i, j]] - es.schur[[j, i]]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn jacpcg_solves_identity() {
        let n = 5;
        let b = Array1::from(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let precond = Array1::from(vec![1.0; n]);
        let solver = JacPcg::new(1e-10, 50);
        let (x, _it) = solver.solve(&b, &precond, |v| v.clone()).unwrap();
        for (a, bb) in x.iter().zip(b.iter()) {
            assert!((a - bb).abs() < 1e-8);
        }
    }

    #[test]
    fn direct_solver_factors_single_dirichlet_element() {
        let el = unit_element(5);
        let connectivity = vec![[
            EdgeLink::Boundary { group: 0 },
            EdgeLink::Boundary { group: 0 },
            EdgeLink::Boundary { group: 0 },
            EdgeLink::Boundary { group: 0 },
        ]];
        let mesh = Mesh::new(vec![el], connectivity).unwrap();
        let is_essential = |_: usize| true; // fully Dirichlet: nsolve == 0
        let map = crate::assembly::AssemblyMap::build(&mesh, is_essential, crate::assembly::OptLevel::None).unwrap();
        assert_eq!(map.nsolve, 0);
        let solver = DirectSolver::factor(&mesh, &map, 1.0).unwrap();
        assert_eq!(solver.n, 0);
    }
}
