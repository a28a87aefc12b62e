//! Global linear stability analysis: Implicitly Restarted Arnoldi
//! (IRAM, ARPACK-style) around a linearised Navier-Stokes action, with
//! BiCGStab/GMRES inner solves for the shift-invert modes (spec §4.7).
//!
//! Only the small dense `(k x k)` Hessenberg eigenproblem inside the
//! Arnoldi restart uses `ndarray-linalg` (LAPACK); the outer
//! matrix-vector products go through the caller-supplied linear action,
//! exactly as real ARPACK only ever delegates its own small dense step
//! to LAPACK and leaves `Av` to the caller.

use ndarray::{Array1, Array2};
use ndarray_linalg::Eig;
use num_complex::Complex;
use rand::{Rng, SeedableRng};

use crate::error::{alert, Result, Severity};

/// Which linear action IRAM is driving: direct time-stepper action (the
/// "standard" mode, eigenvalues are growth multipliers per period) or a
/// real shift-invert action (eigenvalues are `1/(lambda - sigma)`,
/// inverted back to `lambda` after convergence).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IramMode {
    Standard,
    ShiftInvert,
}

/// A decoded Ritz value: growth rate and frequency recovered from one
/// converged eigenvalue of the monodromy/shift-invert action.
#[derive(Debug, Clone, Copy)]
pub struct RitzMode {
    pub growth_rate: f64,
    pub frequency: f64,
    pub residual: f64,
}

/// Decode a complex Ritz value of the time-`period` map into a continuous
/// growth rate and frequency: `lambda = exp((sigma + i*omega) * period)`.
pub fn decode_ritz(lambda: Complex<f64>, period: f64, residual: f64) -> RitzMode {
    let modulus = lambda.norm().max(1e-300);
    let growth_rate = modulus.ln() / period;
    let frequency = lambda.arg() / period;
    RitzMode { growth_rate, frequency, residual }
}

/// Implicitly restarted Arnoldi driver over an abstract linear action
/// `av(v) -> A v`. Returns the `k` Ritz values of largest modulus
/// (already decoded to growth-rate/frequency if `period` is given) once
/// the residuals of all `k` requested modes fall below `tol`, or an
/// error after `max_restarts`.
pub struct Iram {
    pub k: usize,
    pub m: usize, // Arnoldi basis size per restart, m > k
    pub tol: f64,
    pub max_restarts: usize,
    pub mode: IramMode,
    /// Shift-invert centre `sigma`; only meaningful when `mode ==
    /// ShiftInvert`, used to back-transform the converged Ritz values
    /// `mu` of `(A - sigma I)^-1` to the true eigenvalues `sigma +
    /// 1/mu` of `A` before they are returned.
    pub sigma: f64,
}

impl Iram {
    /// Standard-mode constructor (`mode` must not be `ShiftInvert`
    /// unless `sigma` is also set via [`Iram::with_sigma`]).
    pub fn new(k: usize, m: usize, tol: f64, max_restarts: usize, mode: IramMode) -> Self {
        Iram { k, m, tol, max_restarts, mode, sigma: 0.0 }
    }

    /// Shift-invert constructor: `av` is expected to apply `(A - sigma
    /// I)^-1`, and the Ritz values this `Iram` returns are back-transformed
    /// to the true eigenvalues of `A`.
    pub fn with_sigma(k: usize, m: usize, tol: f64, max_restarts: usize, sigma: f64) -> Self {
        Iram { k, m, tol, max_restarts, mode: IramMode::ShiftInvert, sigma }
    }

    /// Back-transform converged Ritz values of the shift-invert operator
    /// to the true eigenvalues of `A` (`lambda = sigma + 1/mu`); a no-op
    /// in standard mode.
    fn back_transform(&self, ritz: Vec<(Complex<f64>, Array1<f64>, f64)>) -> Vec<(Complex<f64>, Array1<f64>, f64)> {
        if self.mode != IramMode::ShiftInvert {
            return ritz;
        }
        ritz.into_iter()
            .map(|(mu, vec, residual)| {
                let lambda = if mu.norm() > 1e-300 {
                    Complex::new(self.sigma, 0.0) + Complex::new(1.0, 0.0) / mu
                } else {
                    Complex::new(self.sigma, 0.0)
                };
                (lambda, vec, residual)
            })
            .collect()
    }

    /// Run the restarted Arnoldi iteration. `n` is the state dimension,
    /// `av` applies the linear action, `seed` optionally supplies a
    /// starting vector (defaults to a random Gaussian vector from a
    /// fixed-seed RNG, so a run with no seed is still reproducible
    /// without needing a real invariant-subspace guess).
    pub fn run(
        &self,
        n: usize,
        mut av: impl FnMut(&Array1<f64>) -> Array1<f64>,
        seed: Option<Array1<f64>>,
    ) -> Result<Vec<(Complex<f64>, Array1<f64>, f64)>> {
        let routine = "Iram::run";
        if self.m <= self.k {
            alert(routine, "Arnoldi basis size m must exceed the requested eigenvalue count k", Severity::Error)?;
        }
        let mut v0 = seed.unwrap_or_else(|| random_start_vector(n));
        normalize(&mut v0);

        let mut last_ritz = Vec::new();
        for _restart in 0..self.max_restarts {
            let (basis, hess) = arnoldi_factorization(n, self.m, &v0, &mut av);
            let (eigvals, eigvecs) = hessenberg_eig(&hess)?;
            let ritz = self.ritz_pairs(n, &basis, &eigvals, &eigvecs, &mut av);

            if ritz.iter().all(|&(_, _, r)| r < self.tol) {
                return Ok(self.back_transform(ritz));
            }
            if let Some((_, best_vec, _)) = ritz.first() {
                v0 = best_vec.clone();
            }
            last_ritz = ritz;
        }
        alert(routine, "IRAM did not converge within max_restarts", Severity::Warning)?;
        Ok(self.back_transform(last_ritz))
    }

    fn ritz_pairs(
        &self,
        n: usize,
        basis: &[Array1<f64>],
        eigvals: &Array1<Complex<f64>>,
        eigvecs: &Array2<Complex<f64>>,
        av: &mut impl FnMut(&Array1<f64>) -> Array1<f64>,
    ) -> Vec<(Complex<f64>, Array1<f64>, f64)> {
        let mut order: Vec<usize> = (0..eigvals.len()).collect();
        order.sort_by(|&a, &b| eigvals[b].norm().partial_cmp(&eigvals[a].norm()).unwrap());

        let mut ritz = Vec::new();
        for &idx in order.iter().take(self.k) {
            let y = eigvecs.column(idx);
            let mut ritz_vec = Array1::<f64>::zeros(n);
            for (j, &yj) in y.iter().enumerate() {
                ritz_vec = ritz_vec + &basis[j] * yj.re;
            }
            normalize(&mut ritz_vec);
            let residual_vec = av(&ritz_vec) - &ritz_vec * eigvals[idx].re;
            let residual = residual_vec.dot(&residual_vec).sqrt();
            ritz.push((eigvals[idx], ritz_vec, residual));
        }
        ritz
    }
}

/// A reproducible random starting vector for the Arnoldi iteration, drawn
/// from a fixed-seed RNG rather than `thread_rng()` so two runs with no
/// explicit seed still produce the same Krylov subspace.
fn random_start_vector(n: usize) -> Array1<f64> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed_1a55);
    Array1::from_shape_fn(n, |_| rng.gen_range(-1.0..1.0))
}

fn normalize(v: &mut Array1<f64>) {
    let norm = v.dot(v).sqrt();
    if norm > 1e-300 {
        *v /= norm;
    }
}

/// Build an `m`-step Arnoldi factorisation `A V_m = V_m H_m + ...`,
/// returning the orthonormal basis vectors and the `m x m` upper
/// Hessenberg matrix.
fn arnoldi_factorization(
    n: usize,
    m: usize,
    v0: &Array1<f64>,
    av: &mut impl FnMut(&Array1<f64>) -> Array1<f64>,
) -> (Vec<Array1<f64>>, Array2<f64>) {
    let mut basis = vec![v0.clone()];
    let mut hess = Array2::<f64>::zeros((m, m));
    for j in 0..m {
        let mut w = av(&basis[j]);
        for i in 0..=j {
            let h_ij = basis[i].dot(&w);
            hess[[i, j]] = h_ij;
            w = w - &basis[i] * h_ij;
        }
        let beta = w.dot(&w).sqrt();
        if j + 1 < m {
            hess[[j + 1, j]] = beta;
        }
        if beta > 1e-300 {
            w /= beta;
        } else {
            // Invariant subspace found early; pad with an arbitrary
            // orthogonal-ish direction so the basis stays full rank.
            w = Array1::from_shape_fn(n, |k| if k == j + 1 { 1.0 } else { 0.0 });
        }
        basis.push(w);
    }
    basis.truncate(m);
    (basis, hess)
}

fn hessenberg_eig(hess: &Array2<f64>) -> Result<(Array1<Complex<f64>>, Array2<Complex<f64>>)> {
    hess.eig().map_err(|e| crate::error::SemError::Internal {
        routine: "stability::hessenberg_eig".to_string(),
        message: e.to_string(),
    })
}

/// BiCGStab, for the non-symmetric linear systems the shift-invert
/// action needs to solve each Arnoldi step.
pub fn bicgstab(
    b: &Array1<f64>,
    tol: f64,
    max_iter: usize,
    mut apply: impl FnMut(&Array1<f64>) -> Array1<f64>,
) -> Result<(Array1<f64>, usize)> {
    let n = b.len();
    let mut x = Array1::<f64>::zeros(n);
    let mut r = b - &apply(&x);
    let r0 = r.clone();
    let mut rho = 1.0;
    let mut alpha = 1.0;
    let mut omega = 1.0;
    let mut v = Array1::<f64>::zeros(n);
    let mut p = Array1::<f64>::zeros(n);
    let b_norm = b.dot(b).sqrt().max(1e-300);

    for it in 0..max_iter {
        let rho_new = r0.dot(&r);
        if rho_new.abs() < 1e-300 {
            break;
        }
        let beta = (rho_new / rho) * (alpha / omega);
        p = &r + &((&p - &(&v * omega)) * beta);
        v = apply(&p);
        alpha = rho_new / r0.dot(&v);
        let s = &r - &(&v * alpha);
        if s.dot(&s).sqrt() / b_norm < tol {
            x = x + &p * alpha;
            return Ok((x, it + 1));
        }
        let t = apply(&s);
        omega = t.dot(&s) / t.dot(&t).max(1e-300);
        x = &x + &(&p * alpha) + &(&s * omega);
        r = &s - &(&t * omega);
        rho = rho_new;
        if r.dot(&r).sqrt() / b_norm < tol {
            return Ok((x, it + 1));
        }
    }
    Ok((x, max_iter))
}

/// Restarted GMRES(`restart`), the alternative inner solver for
/// non-symmetric shift-invert systems.
pub fn gmres(
    b: &Array1<f64>,
    tol: f64,
    restart: usize,
    max_restarts: usize,
    mut apply: impl FnMut(&Array1<f64>) -> Array1<f64>,
) -> Result<(Array1<f64>, usize)> {
    let n = b.len();
    let mut x = Array1::<f64>::zeros(n);
    let b_norm = b.dot(b).sqrt().max(1e-300);
    let mut total_iters = 0usize;

    for _ in 0..max_restarts {
        let mut r = b - &apply(&x);
        let beta = r.dot(&r).sqrt();
        if beta / b_norm < tol {
            return Ok((x, total_iters));
        }
        let mut basis = vec![&r / beta];
        let mut hess = Array2::<f64>::zeros((restart + 1, restart));
        let mut g = Array1::<f64>::zeros(restart + 1);
        g[0] = beta;

        let mut k_used = restart;
        for k in 0..restart {
            let mut w = apply(&basis[k]);
            for i in 0..=k {
                let h_ik = basis[i].dot(&w);
                hess[[i, k]] = h_ik;
                w = w - &basis[i] * h_ik;
            }
            let h_next = w.dot(&w).sqrt();
            hess[[k + 1, k]] = h_next;
            total_iters += 1;
            if h_next < 1e-300 {
                k_used = k + 1;
                break;
            }
            basis.push(&w / h_next);
            let residual_est = g[k + 1].abs();
            if residual_est / b_norm < tol {
                k_used = k + 1;
                break;
            }
        }

        let hk = hess.slice(ndarray::s![0..k_used + 1, 0..k_used]).to_owned();
        let gk = g.slice(ndarray::s![0..k_used + 1]).to_owned();
        let y = least_squares_small(&hk, &gk);
        for (i, &yi) in y.iter().enumerate() {
            x = &x + &basis[i] * yi;
        }
        r = b - &apply(&x);
        if r.dot(&r).sqrt() / b_norm < tol {
            return Ok((x, total_iters));
        }
    }
    Ok((x, total_iters))
}

/// Minimum-norm least-squares solve of a small `(k+1) x k` upper
/// Hessenberg system via normal equations (the system is always tiny:
/// `restart` is a user-chosen constant, not the problem dimension).
fn least_squares_small(h: &Array2<f64>, g: &Array1<f64>) -> Array1<f64> {
    let ht = h.t();
    let a = ht.dot(h);
    let rhs = ht.dot(g);
    let n = a.nrows();
    if n == 0 {
        return Array1::zeros(0);
    }
    let mut aug = a.clone();
    let mut x = rhs.clone();
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
            x.swap(col, piv);
        }
        let pivot = aug[[col, col]];
        if pivot.abs() < 1e-300 {
            continue;
        }
        for r in col + 1..n {
            let f = aug[[r, col]] / pivot;
            for c in col..n {
                aug[[r, c]] -= f * aug[[col, c]];
            }
            x[r] -= f * x[col];
        }
    }
    let mut sol = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let mut s = x[row];
        for k in row + 1..n {
            s -= aug[[row, k]] * sol[k];
        }
        sol[row] = if aug[[row, row]].abs() > 1e-300 { s / aug[[row, row]] } else { 0.0 };
    }
    sol
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_ritz_recovers_growth_rate() {
        let period = 2.0;
        let sigma = 0.3;
        let lambda = Complex::new((sigma * period).exp(), 0.0);
        let mode = decode_ritz(lambda, period, 0.0);
        assert!((mode.growth_rate - sigma).abs() < 1e-9);
        assert!(mode.frequency.abs() < 1e-9);
    }

    #[test]
    fn bicgstab_solves_diagonal_system() {
        let b = Array1::from(vec![2.0, 4.0, 6.0]);
        let (x, _it) = bicgstab(&b, 1e-10, 100, |v| v * 2.0).unwrap();
        for (a, e) in x.iter().zip([1.0, 2.0, 3.0]) {
            assert!((a - e).abs() < 1e-6);
        }
    }

    #[test]
    fn gmres_solves_diagonal_system() {
        let b = Array1::from(vec![3.0, 6.0]);
        let (x, _it) = gmres(&b, 1e-10, 5, 10, |v| v * 3.0).unwrap();
        for (a, e) in x.iter().zip([1.0, 2.0]) {
            assert!((a - e).abs() < 1e-6);
        }
    }

    #[test]
    fn iram_finds_dominant_eigenvalue_of_diagonal_action() {
        let n = 5;
        let diag = Array1::from(vec![5.0, 1.0, 2.0, 0.5, 3.0]);
        let av = move |v: &Array1<f64>| v * &diag;
        let iram = Iram::new(1, 4, 1e-6, 20, IramMode::Standard);
        let ritz = iram.run(n, av, None).unwrap();
        assert_eq!(ritz.len(), 1);
        assert!((ritz[0].0.re - 5.0).abs() < 1e-3);
    }
}
