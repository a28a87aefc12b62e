//! Gauss-Lobatto-Legendre quadrature and tensor-product derivative
//! operators (spec §4.1), shared across elements through a small
//! process-wide cache keyed on `(rule, n_p)`.
//!
//! The cache generalises the teacher's per-basis memoisation
//! (`bases::Chebyshev` holds its own `DctHandler`, built once in `new`);
//! here many `Element`s of the same order share one set of GLL tables, so
//! the cache is hoisted out to a `std::sync::OnceLock`-backed map, matching
//! the "process-wide singleton, append-only, initialise before
//! multi-threaded use" rule of spec §5/§9.

use ndarray::{Array1, Array2};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

/// One set of 1D operators on `[-1, 1]` for `n` GLL points (order `n-1`).
#[derive(Debug, Clone)]
pub struct GllRule {
    pub n: usize,
    /// GLL nodes in `[-1, 1]`, ascending.
    pub z: Array1<f64>,
    /// Quadrature weights.
    pub w: Array1<f64>,
    /// Derivative matrix: `dv[i, j] = l'_j(z_i)`.
    pub dv: Array2<f64>,
    /// Transpose of `dv`, cached because the covariant-derivative kernels
    /// apply it along the other tensor-product axis.
    pub dt: Array2<f64>,
}

/// Evaluate the Legendre polynomial of degree `n` and its derivative at `x`.
fn legendre(n: usize, x: f64) -> (f64, f64) {
    if n == 0 {
        return (1.0, 0.0);
    }
    let mut p0 = 1.0;
    let mut p1 = x;
    let mut d0 = 0.0;
    let mut d1 = 1.0;
    for k in 2..=n {
        let kf = k as f64;
        let p2 = ((2.0 * kf - 1.0) * x * p1 - (kf - 1.0) * p0) / kf;
        let d2 = d0 + (2.0 * kf - 1.0) * p1;
        p0 = p1;
        p1 = p2;
        d0 = d1;
        d1 = d2;
    }
    (p1, d1)
}

/// GLL nodes of `n` points: -1, 1, plus the `n-2` interior roots of
/// `P'_{n-1}`, found by Newton iteration from a Chebyshev-node initial
/// guess.
fn gll_nodes(n: usize) -> Array1<f64> {
    assert!(n >= 2, "GLL rule needs at least 2 points");
    let mut z = Array1::<f64>::zeros(n);
    z[0] = -1.0;
    z[n - 1] = 1.0;
    let deg = n - 1;
    for i in 1..n - 1 {
        // Chebyshev-Gauss-Lobatto initial guess.
        let mut x = -(std::f64::consts::PI * i as f64 / deg as f64).cos();
        for _ in 0..100 {
            let (p_deg, _) = legendre(deg, x);
            let (p_deg_m1, _) = legendre(deg - 1, x);
            // d/dx P_deg(x) = deg/(x^2-1) * (x P_deg(x) - P_{deg-1}(x))
            let dp = deg as f64 / (x * x - 1.0) * (x * p_deg - p_deg_m1);
            // Second derivative via recurrence for Newton step on P'_deg.
            let d2p = (2.0 * x * dp - (deg * (deg + 1)) as f64 * p_deg) / (1.0 - x * x);
            let dx = dp / d2p;
            x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }
        z[i] = x;
    }
    z
}

fn gll_weights(z: &Array1<f64>) -> Array1<f64> {
    let n = z.len();
    let deg = n - 1;
    let mut w = Array1::<f64>::zeros(n);
    for i in 0..n {
        let (p, _) = legendre(deg, z[i]);
        w[i] = 2.0 / (deg as f64 * (deg + 1) as f64 * p * p);
    }
    w
}

fn gll_derivative_matrix(z: &Array1<f64>) -> Array2<f64> {
    let n = z.len();
    let deg = n - 1;
    let mut d = Array2::<f64>::zeros((n, n));
    let lp: Vec<f64> = z.iter().map(|&zi| legendre(deg, zi).0).collect();
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            d[[i, j]] = lp[i] / (lp[j] * (z[i] - z[j]));
        }
    }
    d[[0, 0]] = -(deg * (deg + 1)) as f64 / 4.0;
    d[[n - 1, n - 1]] = (deg * (deg + 1)) as f64 / 4.0;
    for i in 1..n - 1 {
        let mut s = 0.0;
        for j in 0..n {
            if i != j {
                s += d[[i, j]];
            }
        }
        d[[i, i]] = -s;
    }
    d
}

impl GllRule {
    fn build(n: usize) -> Self {
        let z = gll_nodes(n);
        let w = gll_weights(&z);
        let dv = gll_derivative_matrix(&z);
        let dt = dv.t().to_owned();
        GllRule { n, z, w, dv, dt }
    }
}

/// Lagrange interpolation matrix from an `n_from`-point GLL mesh to an
/// `n_to`-point GLL mesh (used for probing at arbitrary (r,s) and for
/// base-flow interpolation in the stability driver).
#[derive(Debug, Clone)]
pub struct InterpMatrix {
    /// `n_to x n_from`: `mat[i, j] = l_j(z_to[i])`.
    pub mat: Array2<f64>,
}

fn lagrange_interp(from: &Array1<f64>, to: &Array1<f64>) -> Array2<f64> {
    let nf = from.len();
    let nt = to.len();
    let mut mat = Array2::<f64>::zeros((nt, nf));
    for (i, &x) in to.iter().enumerate() {
        for j in 0..nf {
            let mut lj = 1.0;
            for k in 0..nf {
                if k != j {
                    lj *= (x - from[k]) / (from[j] - from[k]);
                }
            }
            mat[[i, j]] = lj;
        }
    }
    mat
}

#[derive(Default)]
struct Caches {
    gll: HashMap<usize, GllRule>,
    interp: HashMap<(usize, usize), InterpMatrix>,
}

static CACHE: OnceLock<Mutex<Caches>> = OnceLock::new();

fn cache() -> &'static Mutex<Caches> {
    CACHE.get_or_init(|| Mutex::new(Caches::default()))
}

/// Fetch (building and caching on first use) the GLL rule for `n` points.
pub fn gll_rule(n: usize) -> GllRule {
    let mut c = cache().lock().unwrap();
    c.gll.entry(n).or_insert_with(|| GllRule::build(n)).clone()
}

/// Fetch (building and caching on first use) the interpolation matrix from
/// an `n_from`-point to an `n_to`-point GLL mesh.
pub fn interp_matrix(n_from: usize, n_to: usize) -> InterpMatrix {
    let mut c = cache().lock().unwrap();
    if let Some(m) = c.interp.get(&(n_from, n_to)) {
        return m.clone();
    }
    let from = gll_rule(n_from).z;
    let to = gll_rule(n_to).z;
    let m = InterpMatrix {
        mat: lagrange_interp(&from, &to),
    };
    c.interp.insert((n_from, n_to), m.clone());
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gll5_endpoints_and_symmetry() {
        let rule = gll_rule(5);
        assert!((rule.z[0] - (-1.0)).abs() < 1e-12);
        assert!((rule.z[4] - 1.0).abs() < 1e-12);
        for i in 0..5 {
            assert!((rule.z[i] + rule.z[4 - i]).abs() < 1e-12);
        }
    }

    #[test]
    fn weights_sum_to_two() {
        let rule = gll_rule(7);
        assert!((rule.w.sum() - 2.0).abs() < 1e-10);
    }

    #[test]
    fn derivative_matrix_exact_on_linear() {
        // D applied to x should give the all-ones vector.
        let rule = gll_rule(6);
        let dx = rule.dv.dot(&rule.z);
        for v in dx.iter() {
            assert!((v - 1.0).abs() < 1e-10);
        }
    }

    #[test]
    fn derivative_matrix_exact_on_quadratic() {
        let rule = gll_rule(8);
        let f = rule.z.mapv(|x| x * x);
        let df = rule.dv.dot(&f);
        for (i, &z) in rule.z.iter().enumerate() {
            assert!((df[i] - 2.0 * z).abs() < 1e-9);
        }
    }

    #[test]
    fn interp_identity_when_same_mesh() {
        let m = interp_matrix(6, 6);
        for i in 0..6 {
            for j in 0..6 {
                let expect = if i == j { 1.0 } else { 0.0 };
                assert!((m.mat[[i, j]] - expect).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn cache_reuse_is_stable() {
        let a = gll_rule(9);
        let b = gll_rule(9);
        assert_eq!(a.z, b.z);
    }
}
