//! Rolling boundary-condition history and the computed open/outflow and
//! HOPBC terms, ported from semtex's `BCmgr::maintainFourier`
//! (`original_source/src/bcmgr.cpp`, `dog/bcmgr.cpp`).
//!
//! Several boundary conditions in spec §4.5 are not analytic but
//! computed from the evolving flow: the high-order pressure BC (HOPBC,
//! [Karniadakis/Israeli/Orszag 1991]) needs `n.(N + f)` from the last few
//! timesteps extrapolated forward, and Dong's open/outflow BC needs
//! `div(u)` and `grad(u)` on the outflow boundary. `BCmgr` keeps the
//! rolling per-edge history these need and refreshes it once per
//! timestep in physical (Fourier-transformed) space.

use ndarray::{Array1, Zip};

use crate::auxfield::AuxField;
use crate::boundary::BoundarySys;
use crate::element::Side;
use crate::error::Result;
use crate::mesh::Mesh;

/// Stiffly-stable extrapolation coefficients for orders 1-3 (KIO91 Table
/// 1): `history[0]` is the most recent sample.
fn extrapolation_coeffs(order: usize) -> &'static [f64] {
    match order {
        1 => &[1.0],
        2 => &[2.0, -1.0],
        _ => &[3.0, -3.0, 1.0],
    }
}

/// Backward-difference coefficients for `d/dt` at the extrapolated time
/// level, divided by `dt` by the caller (KIO91 Table 2).
fn derivative_coeffs(order: usize) -> &'static [f64] {
    match order {
        1 => &[1.0, -1.0],
        2 => &[1.5, -2.0, 0.5],
        _ => &[11.0 / 6.0, -3.0, 1.5, -1.0 / 3.0],
    }
}

/// Rolled per-edge scalar history for one boundary group, one Fourier
/// mode, one velocity/scalar component.
#[derive(Debug, Clone)]
struct EdgeHistory {
    /// `samples[k]` is `n_p`-long, most recent first.
    samples: Vec<Array1<f64>>,
}

impl EdgeHistory {
    fn new(order: usize, n_p: usize) -> Self {
        EdgeHistory {
            samples: vec![Array1::zeros(n_p); order + 1],
        }
    }

    fn roll(&mut self, fresh: Array1<f64>) {
        let n = self.samples.len();
        for k in (1..n).rev() {
            self.samples[k] = self.samples[k - 1].clone();
        }
        self.samples[0] = fresh;
    }

    fn extrapolate(&self, order: usize) -> Array1<f64> {
        let c = extrapolation_coeffs(order);
        let mut out = self.samples[0].clone() * 0.0;
        for (k, &ck) in c.iter().enumerate() {
            out = out + &self.samples[k] * ck;
        }
        out
    }

    fn time_derivative(&self, order: usize, dt: f64) -> Array1<f64> {
        let c = derivative_coeffs(order);
        let mut out = self.samples[0].clone() * 0.0;
        for (k, &ck) in c.iter().enumerate() {
            out = out + &self.samples[k] * ck;
        }
        out / dt
    }
}

/// Boundary-history manager for one Fourier mode.
pub struct BCmgr {
    order: usize,
    n_p: usize,
    /// `u.n` history, keyed by (element, side).
    un: std::collections::HashMap<(usize, Side), EdgeHistory>,
    /// `n.(N+f-nu*curlCurl(u))` (HOPBC RHS) history, same keying.
    hopbc: std::collections::HashMap<(usize, Side), EdgeHistory>,
    /// `n.d(u.n)/dt` history, subtracted from the extrapolated `hopbc`
    /// term in [`BCmgr::hopbc_rhs`].
    ndudt: std::collections::HashMap<(usize, Side), EdgeHistory>,
    /// Latest `div(u)` and `grad(u).n` on open boundaries.
    pub divu: std::collections::HashMap<(usize, Side), Array1<f64>>,
    pub gradu: std::collections::HashMap<(usize, Side), Array1<f64>>,
    pub open: bool,
    pub cylindrical: bool,
}

impl BCmgr {
    pub fn new(order: usize, n_p: usize, open: bool, cylindrical: bool) -> Self {
        BCmgr {
            order,
            n_p,
            un: std::collections::HashMap::new(),
            hopbc: std::collections::HashMap::new(),
            ndudt: std::collections::HashMap::new(),
            divu: std::collections::HashMap::new(),
            gradu: std::collections::HashMap::new(),
            open,
            cylindrical,
        }
    }

    fn history_for(
        map: &mut std::collections::HashMap<(usize, Side), EdgeHistory>,
        key: (usize, Side),
        order: usize,
        n_p: usize,
    ) -> &mut EdgeHistory {
        map.entry(key).or_insert_with(|| EdgeHistory::new(order, n_p))
    }

    /// Refresh all rolling history for one timestep. `velocity[dir]` is
    /// the physical-space velocity component `dir` (0=x,1=y,[2=z]);
    /// `nonlinear_plus_force[dir]` is `N + f` for that component;
    /// `viscosity` is `nu`; `dt` is the current timestep; `timedep` is
    /// true once enough history has accumulated to extrapolate `d(u.n)/dt`.
    pub fn maintain_fourier(
        &mut self,
        mesh: &Mesh,
        boundaries: &BoundarySys,
        velocity: &[AuxField],
        nonlinear_plus_force: &[AuxField],
        viscosity: f64,
        dt: f64,
        timedep: bool,
    ) -> Result<()> {
        for b in &boundaries.boundaries {
            let el = &mesh.elements[b.element];
            let (nx, ny) = el.side_normal(b.side);

            let ux = velocity[0].element_slice(0, b.element);
            let uy = velocity[1].element_slice(0, b.element);
            let ux_edge = el.side_gather(&ux, b.side);
            let uy_edge = el.side_gather(&uy, b.side);
            let un_edge = &ux_edge * &nx + &uy_edge * &ny;

            let key = (b.element, b.side);
            Self::history_for(&mut self.un, key, self.order, self.n_p).roll(un_edge.clone());

            let dudt_fresh = if timedep {
                self.un[&key].time_derivative(self.order.min(self.un[&key].samples.len() - 1), dt)
            } else {
                Array1::zeros(self.n_p)
            };
            Self::history_for(&mut self.ndudt, key, self.order, self.n_p).roll(dudt_fresh);

            let nfx = nonlinear_plus_force[0].element_slice(0, b.element);
            let nfy = nonlinear_plus_force[1].element_slice(0, b.element);
            let nfx_edge = el.side_gather(&nfx, b.side);
            let nfy_edge = el.side_gather(&nfy, b.side);
            let mut n_dot_nf = &nfx_edge * &nx + &nfy_edge * &ny;
            if self.cylindrical {
                // N is radius-premultiplied in cylindrical form; cancel it
                // the same way `B->divY(_work)` does, not a multiply.
                let y_edge = el.side_gather(&el.y, b.side);
                n_dot_nf = Zip::from(&n_dot_nf)
                    .and(&y_edge)
                    .map_collect(|&v, &y| if y.abs() < 1e-14 { 0.0 } else { v / y });
            }

            let (cc_x, cc_y) = el.curl_curl(&ux, &uy);
            let cc_x_edge = el.side_gather(&cc_x, b.side);
            let cc_y_edge = el.side_gather(&cc_y, b.side);
            let n_dot_curlcurl = &cc_x_edge * &nx + &cc_y_edge * &ny;
            n_dot_nf = n_dot_nf - &n_dot_curlcurl * viscosity;

            Self::history_for(&mut self.hopbc, key, self.order, self.n_p).roll(n_dot_nf);

            if self.open {
                let div = el.d_dx(&ux) + el.d_dy(&uy);
                let div_edge = el.side_gather(&div, b.side);
                let dux_dn = &el.d_dx(&ux) * &nx + &el.d_dy(&ux) * &ny;
                let duy_dn = &el.d_dx(&uy) * &nx + &el.d_dy(&uy) * &ny;
                let grad_edge_x = el.side_gather(&dux_dn, b.side);
                let grad_edge_y = el.side_gather(&duy_dn, b.side);
                let mut div_scaled = div_edge * viscosity;
                let mut grad_scaled = (&grad_edge_x + &grad_edge_y) * viscosity;
                if self.cylindrical {
                    let y_edge = el.side_gather(&el.y, b.side);
                    div_scaled = &div_scaled * &y_edge;
                    grad_scaled = &grad_scaled * &y_edge;
                }
                self.divu.insert(key, div_scaled);
                self.gradu.insert(key, grad_scaled);
            }
        }
        Ok(())
    }

    /// Extrapolated HOPBC RHS for one edge (`n.[N+f-nu*curlCurl(u)] -
    /// n.d(u.n)/dt`, both terms extrapolated at the same order), ready
    /// for [`crate::boundary::Condition::NaturalComputedPressure`].
    pub fn hopbc_rhs(&self, element: usize, side: Side) -> Option<Array1<f64>> {
        let hopbc = self.hopbc.get(&(element, side))?.extrapolate(self.order);
        match self.ndudt.get(&(element, side)) {
            Some(ndudt) => Some(hopbc - ndudt.extrapolate(self.order)),
            None => Some(hopbc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_history_rolls_and_extrapolates() {
        let mut h = EdgeHistory::new(2, 3);
        h.roll(Array1::from_elem(3, 1.0));
        h.roll(Array1::from_elem(3, 2.0));
        h.roll(Array1::from_elem(3, 3.0));
        // most recent is 3.0, previous 2.0, previous-previous 1.0
        let e = h.extrapolate(2);
        // 2*3 - 1*2 = 4
        assert!((e[0] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn first_order_time_derivative_matches_backward_difference() {
        let mut h = EdgeHistory::new(1, 2);
        h.roll(Array1::from_elem(2, 1.0));
        h.roll(Array1::from_elem(2, 3.0));
        let d = h.time_derivative(1, 0.5);
        assert!((d[0] - (3.0 - 1.0) / 0.5).abs() < 1e-12);
    }
}
