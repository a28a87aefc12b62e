//! Boundary conditions: the `Condition` family and per-Fourier-mode
//! `BoundarySys`, ported from semtex's `original_source/src/condition.cpp`.
//!
//! Condition has two layers in the original: an abstract Essential /
//! Natural / Mixed split, and concrete subclasses (constant, function-of-
//! space-and-time, or run-time-computed). Four verbs dispatch over that
//! split: `evaluate` (get the boundary value), `set` (scatter essential
//! values directly into the global RHS), `sum` (accumulate natural/mixed
//! boundary integrals into the RHS), and `augment*` (diagonal/matrix
//! augmentation for a mixed condition's Robin term), with `augment_sc`,
//! `augment_op` and `augment_dg` variants for the three solve paths
//! (Schur-complement direct, matrix-free operator, and diagonal Jacobi
//! preconditioner) exactly as in the original.

use crate::element::{Element, Side};
use crate::error::Result;

/// A function of (x, y, z, t) supplying a boundary value, standing in for
/// semtex's FEML-parsed token expressions (out of scope, spec §1); the
/// session layer wires real expressions in through this trait.
pub trait BoundaryFunction: std::fmt::Debug {
    fn evaluate(&self, x: f64, y: f64, z: f64, t: f64) -> f64;
}

#[derive(Debug, Clone)]
pub struct ConstantFunction(pub f64);

impl BoundaryFunction for ConstantFunction {
    fn evaluate(&self, _x: f64, _y: f64, _z: f64, _t: f64) -> f64 {
        self.0
    }
}

/// One boundary condition, attached to one side of one element.
#[derive(Debug)]
pub enum Condition {
    /// Dirichlet value held constant in time.
    EssentialConstant { value: f64 },
    /// Dirichlet value from a function of space and time.
    EssentialFunction { f: Box<dyn BoundaryFunction + Send + Sync> },
    /// Neumann flux held constant in time.
    NaturalConstant { flux: f64 },
    /// Neumann flux from a function of space and time.
    NaturalFunction { f: Box<dyn BoundaryFunction + Send + Sync> },
    /// Robin condition `alpha*u + du/dn = beta`, constants.
    MixedConstant { alpha: f64, beta: f64 },
    /// High-order pressure BC (HOPBC): natural flux computed at run
    /// time from the rolled Fourier-mode history in
    /// [`crate::bcmgr::BCmgr`] rather than supplied analytically.
    NaturalComputedPressure,
    /// Computed open/outflow mixed condition (Dong §4.5): both the Robin
    /// coefficient and RHS term are evaluated from run-time flow state.
    /// The RHS [`BCmgr`](crate::bcmgr::BCmgr) supplies today is a
    /// `grad - div` placeholder, not Dong's Theta_0 blending-function
    /// formula — see `field::computed_edge_value`'s doc comment.
    MixedComputedOpen,
}

impl Condition {
    /// `evaluate`: the scalar boundary value/flux at one node.
    pub fn evaluate(&self, x: f64, y: f64, z: f64, t: f64, computed: Option<f64>) -> f64 {
        match self {
            Condition::EssentialConstant { value } => *value,
            Condition::EssentialFunction { f } => f.evaluate(x, y, z, t),
            Condition::NaturalConstant { flux } => *flux,
            Condition::NaturalFunction { f } => f.evaluate(x, y, z, t),
            Condition::MixedConstant { beta, .. } => *beta,
            Condition::NaturalComputedPressure | Condition::MixedComputedOpen => {
                computed.unwrap_or(0.0)
            }
        }
    }

    pub fn is_essential(&self) -> bool {
        matches!(self, Condition::EssentialConstant { .. } | Condition::EssentialFunction { .. })
    }

    pub fn is_mixed(&self) -> bool {
        matches!(self, Condition::MixedConstant { .. } | Condition::MixedComputedOpen)
    }

    /// `set`: scatter essential values directly into the global RHS at
    /// the given side's node positions (essential conditions override
    /// whatever the natural/interior assembly already wrote there).
    pub fn set(&self, el: &Element, side: Side, z: f64, t: f64, rhs: &mut ndarray::Array2<f64>) {
        if !self.is_essential() {
            return;
        }
        for &(i, j) in el.side_indices(side).iter() {
            let value = self.evaluate(el.x[[i, j]], el.y[[i, j]], z, t, None);
            rhs[[i, j]] = value;
        }
    }

    /// `sum`: accumulate a natural/mixed boundary-integral contribution
    /// into the RHS, weighted by the 1D edge quadrature and the local
    /// outward-normal Jacobian (`|d(arc length)/d(reference coord)|`).
    pub fn sum(
        &self,
        el: &Element,
        side: Side,
        z: f64,
        t: f64,
        computed: Option<&ndarray::Array1<f64>>,
        rhs: &mut ndarray::Array2<f64>,
    ) -> Result<()> {
        if self.is_essential() {
            return Ok(());
        }
        let idx = el.side_indices(side);
        let (nx, ny) = el.side_normal(side);
        let w = &el.rule.w;
        for (k, &(i, j)) in idx.iter().enumerate() {
            let arc = (nx[k].powi(2) + ny[k].powi(2)).sqrt().max(1e-300);
            let comp = computed.map(|c| c[k]);
            let value = self.evaluate(el.x[[i, j]], el.y[[i, j]], z, t, comp);
            rhs[[i, j]] += value * w[i.min(j)] * arc;
        }
        Ok(())
    }

    /// `augment_op`: matrix-free Robin contribution, added directly to
    /// the operator's action on `u` (used by the matrix-free Helmholtz
    /// apply in [`crate::field`]).
    pub fn augment_op(&self, el: &Element, side: Side, u: &ndarray::Array2<f64>, out: &mut ndarray::Array2<f64>) {
        let alpha = match self {
            Condition::MixedConstant { alpha, .. } => *alpha,
            Condition::MixedComputedOpen => 1.0,
            _ => return,
        };
        let idx = el.side_indices(side);
        let w = &el.rule.w;
        for &(i, j) in idx.iter() {
            out[[i, j]] += alpha * u[[i, j]] * w[i.min(j)];
        }
    }

    /// `augment_sc`: diagonal augmentation of the element Schur
    /// complement before Cholesky factorisation.
    pub fn augment_sc(&self, el: &Element, side: Side, diag: &mut ndarray::Array2<f64>) {
        let alpha = match self {
            Condition::MixedConstant { alpha, .. } => *alpha,
            Condition::MixedComputedOpen => 1.0,
            _ => return,
        };
        let idx = el.side_indices(side);
        let w = &el.rule.w;
        for &(i, j) in idx.iter() {
            diag[[i, j]] += alpha * w[i.min(j)];
        }
    }

    /// `augment_dg`: diagonal augmentation of the Jacobi preconditioner.
    pub fn augment_dg(&self, el: &Element, side: Side, diag: &mut ndarray::Array1<f64>, to_global: impl Fn(usize, usize) -> usize) {
        let alpha = match self {
            Condition::MixedConstant { alpha, .. } => *alpha,
            Condition::MixedComputedOpen => 1.0,
            _ => return,
        };
        let idx = el.side_indices(side);
        let w = &el.rule.w;
        for &(i, j) in idx.iter() {
            diag[to_global(i, j)] += alpha * w[i.min(j)];
        }
    }
}

/// One (element, side) boundary record.
pub struct Boundary {
    pub element: usize,
    pub side: Side,
    pub group: usize,
    pub condition: Condition,
}

/// Ordered boundary list for one Fourier mode, matching semtex's per-mode
/// `BoundarySys`: essential conditions for mode 0 (mean flow) typically
/// differ from those of higher modes (e.g. swirl components vanish).
pub struct BoundarySys {
    pub mode: usize,
    pub boundaries: Vec<Boundary>,
}

impl BoundarySys {
    pub fn new(mode: usize) -> Self {
        BoundarySys { mode, boundaries: Vec::new() }
    }

    pub fn push(&mut self, b: Boundary) {
        self.boundaries.push(b);
    }

    pub fn for_group(&self, group: usize) -> impl Iterator<Item = &Boundary> {
        self.boundaries.iter().filter(move |b| b.group == group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementGeometry;
    use ndarray::Array2;

    fn test_element() -> Element {
        let n_p = 5;
        let rule = crate::operators::gll_rule(n_p);
        let mut x = Array2::zeros((n_p, n_p));
        let mut y = Array2::zeros((n_p, n_p));
        for i in 0..n_p {
            for j in 0..n_p {
                x[[i, j]] = rule.z[i];
                y[[i, j]] = rule.z[j] + 2.0;
            }
        }
        let jac = Array2::from_elem((n_p, n_p), 1.0);
        let rx = Array2::from_elem((n_p, n_p), 1.0);
        let ry = Array2::from_elem((n_p, n_p), 0.0);
        let sx = Array2::from_elem((n_p, n_p), 0.0);
        let sy = Array2::from_elem((n_p, n_p), 1.0);
        Element::new(n_p, false, ElementGeometry { x, y, jac, rx, ry, sx, sy })
    }

    #[test]
    fn essential_set_overrides_rhs() {
        let el = test_element();
        let cond = Condition::EssentialConstant { value: 7.0 };
        let mut rhs = Array2::zeros((5, 5));
        cond.set(&el, Side::Bottom, 0.0, 0.0, &mut rhs);
        for i in 0..5 {
            assert_eq!(rhs[[i, 0]], 7.0);
        }
        assert_eq!(rhs[[0, 1]], 0.0);
    }

    #[test]
    fn natural_sum_accumulates() {
        let el = test_element();
        let cond = Condition::NaturalConstant { flux: 2.0 };
        let mut rhs = Array2::zeros((5, 5));
        cond.sum(&el, Side::Right, 0.0, 0.0, None, &mut rhs).unwrap();
        assert!(rhs.iter().any(|&v| v.abs() > 0.0));
    }

    #[test]
    fn mixed_augment_op_matches_alpha() {
        let el = test_element();
        let cond = Condition::MixedConstant { alpha: 3.0, beta: 0.0 };
        let u = Array2::from_elem((5, 5), 1.0);
        let mut out = Array2::zeros((5, 5));
        cond.augment_op(&el, Side::Top, &u, &mut out);
        assert!(out.iter().any(|&v| v.abs() > 0.0));
    }
}
