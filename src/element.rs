//! One quadrilateral spectral element (spec §3/§4.1/§4.3).
//!
//! Construction of the metric Jacobian and covariant-derivative geometry
//! factors from raw mesh coordinates is an external collaborator (spec
//! §1, "per-element geometric factor construction" is out of scope):
//! `Element::new` takes those factors already built, the same way the
//! teacher's `Field::new` takes an already-built `SpaceBase` rather than
//! deriving basis tables itself.

use ndarray::{Array1, Array2, Zip};

use crate::operators::{gll_rule, GllRule};

/// Which of the four sides of a quadrilateral element, CCW from the
/// bottom. Side `k` runs along the varying index, holding the other
/// index fixed at 0 or `n_p - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Bottom = 0,
    Right = 1,
    Top = 2,
    Left = 3,
}

impl Side {
    pub const ALL: [Side; 4] = [Side::Bottom, Side::Right, Side::Top, Side::Left];
}

/// One spectral element: `n_p x n_p` nodal values on the GLL tensor grid,
/// its metric, and boundary-node index maps.
#[derive(Debug, Clone)]
pub struct Element {
    pub n_p: usize,
    pub cylindrical: bool,
    /// 1D GLL rule shared by both reference directions (r, s).
    pub rule: GllRule,
    /// Physical (x, y) of each node.
    pub x: Array2<f64>,
    pub y: Array2<f64>,
    /// Metric Jacobian at each node.
    pub jac: Array2<f64>,
    /// Mass "diagonal": jac * w_r * w_s, y-premultiplied if cylindrical.
    pub mass: Array2<f64>,
    /// Covariant geometry factors for the weak Laplacian, already
    /// quadrature- and (if cylindrical) y-weighted:
    /// g11 = (rx^2+ry^2)*jac*w*[y], g12 = (rx*sx+ry*sy)*jac*w*[y],
    /// g22 = (sx^2+sy^2)*jac*w*[y].
    pub g11: Array2<f64>,
    pub g12: Array2<f64>,
    pub g22: Array2<f64>,
    /// Plain (unweighted) covariant factors, needed for directional
    /// gradients that are not immediately re-integrated.
    pub rx: Array2<f64>,
    pub ry: Array2<f64>,
    pub sx: Array2<f64>,
    pub sy: Array2<f64>,
}

/// Raw per-node geometry supplied by the (out-of-scope) mesh-metric
/// builder.
pub struct ElementGeometry {
    pub x: Array2<f64>,
    pub y: Array2<f64>,
    pub jac: Array2<f64>,
    pub rx: Array2<f64>,
    pub ry: Array2<f64>,
    pub sx: Array2<f64>,
    pub sy: Array2<f64>,
}

impl Element {
    pub fn new(n_p: usize, cylindrical: bool, geom: ElementGeometry) -> Self {
        let rule = gll_rule(n_p);
        let mut mass = Array2::<f64>::zeros((n_p, n_p));
        for i in 0..n_p {
            for j in 0..n_p {
                mass[[i, j]] = geom.jac[[i, j]] * rule.w[i] * rule.w[j];
            }
        }
        let mut g11 = &geom.rx * &geom.rx + &geom.ry * &geom.ry;
        let mut g12 = &geom.rx * &geom.sx + &geom.ry * &geom.sy;
        let mut g22 = &geom.sx * &geom.sx + &geom.sy * &geom.sy;
        g11 *= &mass;
        g12 *= &mass;
        g22 *= &mass;
        if cylindrical {
            mass *= &geom.y;
            g11 *= &geom.y;
            g12 *= &geom.y;
            g22 *= &geom.y;
        }
        Element {
            n_p,
            cylindrical,
            rule,
            x: geom.x,
            y: geom.y,
            jac: geom.jac,
            mass,
            g11,
            g12,
            g22,
            rx: geom.rx,
            ry: geom.ry,
            sx: geom.sx,
            sy: geom.sy,
        }
    }

    /// Reference-space derivative along r (dv applied on axis 0).
    pub fn d_dr(&self, u: &Array2<f64>) -> Array2<f64> {
        self.rule.dv.dot(u)
    }

    /// Reference-space derivative along s (dt applied on axis 1).
    pub fn d_ds(&self, u: &Array2<f64>) -> Array2<f64> {
        u.dot(&self.rule.dt)
    }

    /// Physical x-derivative via the chain rule.
    pub fn d_dx(&self, u: &Array2<f64>) -> Array2<f64> {
        &self.rx * &self.d_dr(u) + &self.sx * &self.d_ds(u)
    }

    /// Physical y-derivative via the chain rule.
    pub fn d_dy(&self, u: &Array2<f64>) -> Array2<f64> {
        &self.ry * &self.d_dr(u) + &self.sy * &self.d_ds(u)
    }

    /// Directional derivative, dir 0 = x, dir 1 = y.
    pub fn gradient(&self, u: &Array2<f64>, dir: usize) -> Array2<f64> {
        match dir {
            0 => self.d_dx(u),
            1 => self.d_dy(u),
            _ => panic!("Element::gradient: dir must be 0 or 1"),
        }
    }

    /// Apply the local Helmholtz operator `(lambda2 * M + K) u`, the
    /// tensor-product ("batch mxm") form of spec §4.3.
    pub fn helmholtz_operator(&self, u: &Array2<f64>, lambda2: f64) -> Array2<f64> {
        let dudr = self.d_dr(u);
        let duds = self.d_ds(u);
        let wr = &self.g11 * &dudr + &self.g12 * &duds;
        let ws = &self.g12 * &dudr + &self.g22 * &duds;
        let stiffness = self.rule.dt.t().dot(&wr) + ws.dot(&self.rule.dv.t());
        stiffness + &self.mass * lambda2 * u
    }

    /// Weighted mass application: `M u`.
    pub fn mass_apply(&self, u: &Array2<f64>) -> Array2<f64> {
        &self.mass * u
    }

    /// `curl(curl(u))` for an in-plane vector field, via the vector
    /// identity `curl curl u = grad(div u) - lap(u)` (spec §4.5e), needed
    /// by the HOPBC `-nu*n.curlCurl(u)` term. Both derivatives are the
    /// same strong nodal chain-rule derivatives `d_dx`/`d_dy` use
    /// elsewhere in this module, not a weak/integrated form.
    pub fn curl_curl(&self, ux: &Array2<f64>, uy: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
        let div = self.d_dx(ux) + self.d_dy(uy);
        let grad_div_x = self.d_dx(&div);
        let grad_div_y = self.d_dy(&div);
        let lap_x = self.d_dx(&self.d_dx(ux)) + self.d_dy(&self.d_dy(ux));
        let lap_y = self.d_dx(&self.d_dx(uy)) + self.d_dy(&self.d_dy(uy));
        (grad_div_x - lap_x, grad_div_y - lap_y)
    }

    /// Divide by the radial coordinate y (cylindrical forms); nodes with
    /// y == 0 (on-axis) are left at zero rather than producing inf/NaN,
    /// matching the weak-form cancellation used throughout the momentum
    /// equations near the axis.
    pub fn div_y(&self, u: &Array2<f64>) -> Array2<f64> {
        Zip::from(u).and(&self.y).map_collect(|&v, &y| if y.abs() < 1e-14 { 0.0 } else { v / y })
    }

    /// Multiply by the radial coordinate y.
    pub fn mul_y(&self, u: &Array2<f64>) -> Array2<f64> {
        u * &self.y
    }

    /// Indices of the boundary nodes on `side`, in CCW traverse order,
    /// length `n_p`.
    pub fn side_indices(&self, side: Side) -> Vec<(usize, usize)> {
        let n = self.n_p;
        match side {
            Side::Bottom => (0..n).map(|i| (i, 0)).collect(),
            Side::Right => (0..n).map(|j| (n - 1, j)).collect(),
            Side::Top => (0..n).rev().map(|i| (i, n - 1)).collect(),
            Side::Left => (0..n).rev().map(|j| (0, j)).collect(),
        }
    }

    /// Gather nodal values along `side` into a length-`n_p` vector.
    pub fn side_gather(&self, u: &Array2<f64>, side: Side) -> Array1<f64> {
        Array1::from_iter(self.side_indices(side).into_iter().map(|(i, j)| u[[i, j]]))
    }

    /// Outward-pointing (unnormalised) surface-normal components along a
    /// side, computed from the covariant metric restricted to that edge.
    pub fn side_normal(&self, side: Side) -> (Array1<f64>, Array1<f64>) {
        let idx = self.side_indices(side);
        let (sign, from_s): (f64, bool) = match side {
            Side::Bottom => (-1.0, true),
            Side::Top => (1.0, true),
            Side::Right => (1.0, false),
            Side::Left => (-1.0, false),
        };
        let mut nx = Array1::<f64>::zeros(idx.len());
        let mut ny = Array1::<f64>::zeros(idx.len());
        for (k, &(i, j)) in idx.iter().enumerate() {
            // Outward normal proportional to (+/-) (sy, -sx) or (+/-) (-ry, rx)
            // depending on which reference direction runs along the edge.
            if from_s {
                nx[k] = sign * self.sy[[i, j]];
                ny[k] = -sign * self.sx[[i, j]];
            } else {
                nx[k] = -sign * self.ry[[i, j]];
                ny[k] = sign * self.rx[[i, j]];
            }
        }
        let norm = Array1::from_iter(
            nx.iter()
                .zip(ny.iter())
                .map(|(&a, &b)| (a * a + b * b).sqrt().max(1e-300)),
        );
        (nx / &norm, ny / &norm)
    }

    /// L2 norm of a nodal field over this element's area.
    pub fn norm_l2(&self, u: &Array2<f64>) -> f64 {
        Zip::from(u).and(&self.mass).fold(0.0, |acc, &v, &m| acc + v * v * m).sqrt()
    }

    /// L-infinity norm.
    pub fn norm_linf(&self, u: &Array2<f64>) -> f64 {
        u.iter().fold(0.0_f64, |acc, &v| acc.max(v.abs()))
    }

    /// H1 seminorm: sqrt( integral |grad u|^2 ).
    pub fn norm_h1(&self, u: &Array2<f64>) -> f64 {
        let gx = self.d_dx(u);
        let gy = self.d_dy(u);
        let mut acc = 0.0;
        for i in 0..self.n_p {
            for j in 0..self.n_p {
                let w = self.jac[[i, j]] * self.rule.w[i] * self.rule.w[j];
                acc += (gx[[i, j]].powi(2) + gy[[i, j]].powi(2)) * w;
            }
        }
        acc.sqrt()
    }

    /// Probe a nodal field at arbitrary reference coordinates `(r, s)` in
    /// `[-1, 1]^2` via tensor-product Lagrange interpolation.
    pub fn probe(&self, u: &Array2<f64>, r: f64, s: f64) -> f64 {
        let lr = lagrange_weights(&self.rule.z, r);
        let ls = lagrange_weights(&self.rule.z, s);
        let mut acc = 0.0;
        for i in 0..self.n_p {
            for j in 0..self.n_p {
                acc += lr[i] * ls[j] * u[[i, j]];
            }
        }
        acc
    }

    /// Local to global (with Schur) scatter: the first `n_interior =
    /// (n_p-2)^2` nodes stay element-local; the boundary ring is handed
    /// back separately by the caller for global assembly. This method
    /// returns (interior values, boundary ring values CCW from bottom).
    pub fn split_interior_boundary(&self, u: &Array2<f64>) -> (Array2<f64>, Array1<f64>) {
        let n = self.n_p;
        let interior = u.slice(ndarray::s![1..n - 1, 1..n - 1]).to_owned();
        let nbnd = 4 * (n - 1);
        let mut boundary = Array1::<f64>::zeros(nbnd);
        let mut k = 0;
        for side in Side::ALL {
            for &(i, j) in self.side_indices(side).iter().take(n - 1) {
                boundary[k] = u[[i, j]];
                k += 1;
            }
        }
        (interior, boundary)
    }
}

fn lagrange_weights(nodes: &Array1<f64>, x: f64) -> Vec<f64> {
    let n = nodes.len();
    (0..n)
        .map(|j| {
            let mut lj = 1.0;
            for k in 0..n {
                if k != j {
                    lj *= (x - nodes[k]) / (nodes[j] - nodes[k]);
                }
            }
            lj
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square(n_p: usize, cylindrical: bool) -> Element {
        let rule = gll_rule(n_p);
        let mut x = Array2::zeros((n_p, n_p));
        let mut y = Array2::zeros((n_p, n_p));
        for i in 0..n_p {
            for j in 0..n_p {
                x[[i, j]] = rule.z[i];
                y[[i, j]] = rule.z[j] + 1.5; // keep y > 0 away from an axis
            }
        }
        let jac = Array2::from_elem((n_p, n_p), 1.0);
        let rx = Array2::from_elem((n_p, n_p), 1.0);
        let ry = Array2::from_elem((n_p, n_p), 0.0);
        let sx = Array2::from_elem((n_p, n_p), 0.0);
        let sy = Array2::from_elem((n_p, n_p), 1.0);
        Element::new(
            n_p,
            cylindrical,
            ElementGeometry { x, y, jac, rx, ry, sx, sy },
        )
    }

    #[test]
    fn gradient_of_linear_is_constant() {
        let el = unit_square(7, false);
        let u = el.x.clone();
        let gx = el.d_dx(&u);
        for v in gx.iter() {
            assert!((v - 1.0).abs() < 1e-9);
        }
        let gy = el.d_dy(&u);
        for v in gy.iter() {
            assert!(v.abs() < 1e-9);
        }
    }

    #[test]
    fn helmholtz_zero_lambda_matches_stiffness_action_on_quadratic() {
        let el = unit_square(9, false);
        let u = el.x.mapv(|x| x * x);
        let ku = el.helmholtz_operator(&u, 0.0);
        // d^2/dx^2 (x^2) = 2, weak form integral should be positive-definite;
        // just check it's finite and nonzero.
        assert!(ku.iter().all(|v| v.is_finite()));
        assert!(ku.iter().any(|&v| v.abs() > 1e-6));
    }

    #[test]
    fn probe_recovers_nodal_values() {
        let el = unit_square(6, false);
        let u = el.x.mapv(|x| x * x + 1.0);
        for i in 0..6 {
            for j in 0..6 {
                let p = el.probe(&u, el.rule.z[i], el.rule.z[j]);
                assert!((p - u[[i, j]]).abs() < 1e-8);
            }
        }
    }

    #[test]
    fn curl_curl_of_rigid_rotation_is_zero() {
        let el = unit_square(7, false);
        let ux = el.y.clone();
        let uy = el.x.mapv(|x| -x);
        let (cx, cy) = el.curl_curl(&ux, &uy);
        for v in cx.iter().chain(cy.iter()) {
            assert!(v.abs() < 1e-8);
        }
    }

    #[test]
    fn div_y_zero_at_axis() {
        let n_p = 5;
        let el = unit_square(n_p, true);
        let mut y = el.y.clone();
        y[[0, 0]] = 0.0;
        let mut el2 = el.clone();
        el2.y = y;
        let u = Array2::from_elem((n_p, n_p), 2.0);
        let d = el2.div_y(&u);
        assert_eq!(d[[0, 0]], 0.0);
    }

    #[test]
    fn split_interior_boundary_roundtrip_len() {
        let el = unit_square(6, false);
        let u = el.x.clone();
        let (interior, boundary) = el.split_interior_boundary(&u);
        assert_eq!(interior.shape(), &[4, 4]);
        assert_eq!(boundary.len(), 4 * 5);
    }
}
