//! `Field`: an [`crate::auxfield::AuxField`] plus its boundary system and
//! assembly map, with the two Helmholtz solve paths dispatched by
//! `(direct: bool)` (spec §4.3/§4.4), generalising the teacher's
//! `solve_ux`/`solve_uy`/`solve_temp`/`solve_pres` quartet in
//! `examples/navier_periodic.rs` from one fixed global tensor-product
//! solve into a per-mode element-assembled solve.

use ndarray::Array1;

use crate::assembly::AssemblyMap;
use crate::auxfield::AuxField;
use crate::bcmgr::BCmgr;
use crate::boundary::{BoundarySys, Condition};
use crate::error::Result;
use crate::mesh::Mesh;
use crate::solver::{condense, DirectSolver, JacPcg};

/// Computed-BC value at one edge, looked up from [`BCmgr`]'s rolled
/// history for the two run-time-evaluated `Condition` variants (spec
/// §4.3/§4.5): `NaturalComputedPressure` reads the extrapolated HOPBC
/// right-hand side, `MixedComputedOpen` reads the Dong divergence/
/// gradient accumulators.
///
/// `MixedComputedOpen`'s `grad - div` combination is a placeholder for
/// Dong's actual Theta_0 = (1 - tanh(u.n/delta))/2 blending-function
/// formula (eq. 37/38) and its LXD20 scalar-flux extension: that needs
/// the `uhat`/`vhat`/`what`/`chat` reference-velocity history and the
/// `Enux`/`Enuy`/`Theta` accumulators spec §3 lists, none of which
/// `BCmgr` currently rolls. This is an acknowledged gap, not a silent
/// approximation — see DESIGN.md's `bcmgr` entry.
fn computed_edge_value(b: &crate::boundary::Boundary, bcmgr: Option<&BCmgr>) -> Option<Array1<f64>> {
    let bcmgr = bcmgr?;
    match b.condition {
        Condition::NaturalComputedPressure => bcmgr.hopbc_rhs(b.element, b.side),
        Condition::MixedComputedOpen => {
            let div = bcmgr.divu.get(&(b.element, b.side));
            let grad = bcmgr.gradu.get(&(b.element, b.side));
            match (div, grad) {
                (Some(d), Some(g)) => Some(g - d),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Accumulate every natural/mixed boundary's `sum` contribution for one
/// Fourier mode's elements into a global (size-`nsolve`) RHS vector, the
/// `⟨h, w⟩` term of spec §4.3's `Field::solve` contract.
fn add_boundary_integrals(
    mesh: &Mesh,
    map: &AssemblyMap,
    boundaries: &BoundarySys,
    z_plane: usize,
    time: f64,
    bcmgr: Option<&BCmgr>,
    rhs: &mut Array1<f64>,
) -> Result<()> {
    for b in &boundaries.boundaries {
        if b.condition.is_essential() {
            continue;
        }
        let el = &mesh.elements[b.element];
        let mut local = ndarray::Array2::<f64>::zeros((el.n_p, el.n_p));
        let computed = computed_edge_value(b, bcmgr);
        b.condition.sum(el, b.side, z_plane as f64, time, computed.as_ref(), &mut local)?;
        for &(i, j) in el.side_indices(b.side).iter() {
            if map.bmask[b.element][[i, j]] {
                continue;
            }
            rhs[map.btog[b.element][[i, j]]] += local[[i, j]];
        }
    }
    Ok(())
}


pub struct Field {
    pub data: AuxField,
    pub boundaries: Vec<BoundarySys>, // one per Fourier mode
    pub maps: Vec<AssemblyMap>,       // one per Fourier mode
}

impl Field {
    pub fn new(data: AuxField, boundaries: Vec<BoundarySys>, maps: Vec<AssemblyMap>) -> Self {
        Field { data, boundaries, maps }
    }

    /// Direct solve of `(lambda2 * M + K) u = rhs` for Fourier mode
    /// `mode`'s physical plane `z`, via pre-factored static condensation.
    pub fn solve_direct(
        &mut self,
        mesh: &Mesh,
        mode: usize,
        z_plane: usize,
        lambda2: f64,
        rhs_forcing: &AuxField,
        time: f64,
        bcmgr: Option<&BCmgr>,
    ) -> Result<()> {
        let map = &self.maps[mode];
        let boundaries = &self.boundaries[mode];
        let solver = DirectSolver::factor_with_boundaries(mesh, map, lambda2, Some(boundaries))?;

        let mut essential = Array1::<f64>::zeros(map.nglobal);

        for b in &boundaries.boundaries {
            if b.condition.is_essential() {
                let el = &mesh.elements[b.element];
                for &(i, j) in el.side_indices(b.side).iter() {
                    let gid = map.btog[b.element][[i, j]];
                    let value = b.condition.evaluate(el.x[[i, j]], el.y[[i, j]], z_plane as f64, time, None);
                    essential[gid] = value;
                }
            }
        }

        let mut boundary_rhs = Array1::<f64>::zeros(map.nsolve);
        add_boundary_integrals(mesh, map, boundaries, z_plane, time, bcmgr, &mut boundary_rhs)?;
        for (e, el) in mesh.elements.iter().enumerate() {
            let interior_forcing = rhs_forcing.element_slice(z_plane, e);
            let es = condense(el, lambda2);
            let flat_to_ij = |flat: usize| (flat / el.n_p, flat % el.n_p);

            let interior_vals: Vec<f64> = es
                .partition
                .interior_idx
                .iter()
                .map(|&flat| {
                    let (i, j) = flat_to_ij(flat);
                    interior_forcing[[i, j]]
                })
                .collect();
            let interior_vals = ndarray::Array2::from_shape_vec((interior_vals.len(), 1), interior_vals).unwrap();
            let condensed_bnd = es.kib.t().dot(&interior_vals);

            for (r, &flat) in es.partition.boundary_idx.iter().enumerate() {
                let (i, j) = flat_to_ij(flat);
                let gid = map.btog[e][[i, j]];
                if map.bmask[e][[i, j]] {
                    continue;
                }
                boundary_rhs[gid] += condensed_bnd[[r, 0]];
            }
        }

        let x_unknown = solver.solve_boundary(&boundary_rhs);

        for (e, el) in mesh.elements.iter().enumerate() {
            let es = solver.element_schur(e);
            let flat_to_ij = |flat: usize| (flat / el.n_p, flat % el.n_p);
            let mut boundary_vals = ndarray::Array1::<f64>::zeros(es.partition.boundary_idx.len());
            for (r, &flat) in es.partition.boundary_idx.iter().enumerate() {
                let (i, j) = flat_to_ij(flat);
                let gid = map.btog[e][[i, j]];
                boundary_vals[r] = if map.bmask[e][[i, j]] { essential[gid] } else { x_unknown[gid] };
            }
            let mut out = self.data.element_slice(z_plane, e);
            for (r, &flat) in es.partition.boundary_idx.iter().enumerate() {
                let (i, j) = flat_to_ij(flat);
                out[[i, j]] = boundary_vals[r];
            }
            let interior_forcing = rhs_forcing.element_slice(z_plane, e);
            let interior_vals: Vec<f64> = es
                .partition
                .interior_idx
                .iter()
                .map(|&flat| {
                    let (i, j) = flat_to_ij(flat);
                    interior_forcing[[i, j]]
                })
                .collect();
            let bvals = ndarray::Array2::from_shape_vec((boundary_vals.len(), 1), boundary_vals.to_vec()).unwrap();
            let fvals = ndarray::Array2::from_shape_vec((interior_vals.len(), 1), interior_vals).unwrap();
            let interior_solution = &fvals - &es.kii_inv_kib.dot(&bvals);
            for (r, &flat) in es.partition.interior_idx.iter().enumerate() {
                let (i, j) = flat_to_ij(flat);
                out[[i, j]] = interior_solution[[r, 0]];
            }
            self.data.set_element_slice(z_plane, e, &out);
        }
        Ok(())
    }

    /// Matrix-free Jacobi-PCG solve, operating element-by-element on the
    /// tensor-product Helmholtz action with no dense assembly.
    pub fn solve_jacpcg(
        &mut self,
        mesh: &Mesh,
        mode: usize,
        z_plane: usize,
        lambda2: f64,
        rhs_forcing: &AuxField,
        tolerance: f64,
        max_iter: usize,
        time: f64,
        bcmgr: Option<&BCmgr>,
    ) -> Result<usize> {
        let map = &self.maps[mode];
        let boundaries = &self.boundaries[mode];
        let n = map.nsolve;

        let mut b = Array1::<f64>::zeros(n);
        for (e, el) in mesh.elements.iter().enumerate() {
            let f = rhs_forcing.element_slice(z_plane, e);
            let weighted = el.mass_apply(&f);
            for i in 0..el.n_p {
                for j in 0..el.n_p {
                    let gid = map.btog[e][[i, j]];
                    if !map.bmask[e][[i, j]] {
                        b[gid] += weighted[[i, j]];
                    }
                }
            }
        }
        add_boundary_integrals(mesh, map, boundaries, z_plane, time, bcmgr, &mut b)?;

        let mut precond = Array1::<f64>::zeros(n);
        for (e, el) in mesh.elements.iter().enumerate() {
            for i in 0..el.n_p {
                for j in 0..el.n_p {
                    let gid = map.btog[e][[i, j]];
                    if !map.bmask[e][[i, j]] {
                        precond[gid] += el.mass[[i, j]] * lambda2 + el.g11[[i, j]] + el.g22[[i, j]];
                    }
                }
            }
            for b_cond in &boundaries.boundaries {
                if b_cond.element != e || !b_cond.condition.is_mixed() {
                    continue;
                }
                let mut diag = ndarray::Array1::<f64>::zeros(el.n_p * el.n_p);
                b_cond.condition.augment_dg(el, b_cond.side, &mut diag, |i, j| i * el.n_p + j);
                for &(i, j) in el.side_indices(b_cond.side).iter() {
                    if !map.bmask[e][[i, j]] {
                        precond[map.btog[e][[i, j]]] += diag[i * el.n_p + j];
                    }
                }
            }
        }
        precond.mapv_inplace(|v| if v.abs() > 1e-300 { 1.0 / v } else { 1.0 });

        let apply = |x: &Array1<f64>| -> Array1<f64> {
            let mut out = Array1::<f64>::zeros(n);
            for (e, el) in mesh.elements.iter().enumerate() {
                let mut local = ndarray::Array2::<f64>::zeros((el.n_p, el.n_p));
                for i in 0..el.n_p {
                    for j in 0..el.n_p {
                        let gid = map.btog[e][[i, j]];
                        if !map.bmask[e][[i, j]] {
                            local[[i, j]] = x[gid];
                        }
                    }
                }
                let mut action = el.helmholtz_operator(&local, lambda2);
                for b_cond in &boundaries.boundaries {
                    if b_cond.element == e {
                        b_cond.condition.augment_op(el, b_cond.side, &local, &mut action);
                    }
                }
                for i in 0..el.n_p {
                    for j in 0..el.n_p {
                        let gid = map.btog[e][[i, j]];
                        if !map.bmask[e][[i, j]] {
                            out[gid] += action[[i, j]];
                        }
                    }
                }
            }
            out
        };

        let solver = JacPcg::new(tolerance, max_iter);
        let (x, iterations) = solver.solve(&b, &precond, apply)?;

        for (e, el) in mesh.elements.iter().enumerate() {
            let mut out = self.data.element_slice(z_plane, e);
            for i in 0..el.n_p {
                for j in 0..el.n_p {
                    let gid = map.btog[e][[i, j]];
                    if !map.bmask[e][[i, j]] {
                        out[[i, j]] = x[gid];
                    }
                }
            }
            self.data.set_element_slice(z_plane, e, &out);
        }
        Ok(iterations)
    }
}
