//! Time integration: the `Integrate` trait and its driver loop, and the
//! KIO91 stiffly-stable velocity-correction splitting with its nonlinear-
//! term dispatch (spec §4.4).
//!
//! The trait and driver are a direct generalisation of the teacher's
//! `integrate.rs` (`Integrate` + `integrate::<T>(pde, max_time,
//! save_intervall)`), widened from one concrete `Navier2DPeriodic` type
//! to anything exposing time/dt/write/exit. The KIO91 splitting and
//! nonlinear-term forms are grounded on
//! `original_source/dns/nonlinear.cpp`.

use crate::domain::Domain;
use crate::error::Result;

/// One extrapolation/BDF order's worth of stiffly-stable coefficients
/// (KIO91 Tables 1-2), shared with [`crate::bcmgr`]'s HOPBC history.
pub struct StifflyStable {
    /// BDF coefficients for `d/dt`, most-recent-first, length `order+1`.
    pub bdf: Vec<f64>,
    /// Extrapolation coefficients for the nonlinear/forcing term,
    /// most-recent-first, length `order`.
    pub extrapolate: Vec<f64>,
}

impl StifflyStable {
    pub fn order(order: usize) -> Self {
        match order {
            1 => StifflyStable {
                bdf: vec![1.0, -1.0],
                extrapolate: vec![1.0],
            },
            2 => StifflyStable {
                bdf: vec![1.5, -2.0, 0.5],
                extrapolate: vec![2.0, -1.0],
            },
            _ => StifflyStable {
                bdf: vec![11.0 / 6.0, -3.0, 1.5, -1.0 / 3.0],
                extrapolate: vec![3.0, -3.0, 1.0],
            },
        }
    }
}

/// Which form of the convective term to evaluate, matching the five
/// forms semtex supports via its `ADVECTION` session token
/// (`dns/nonlinear.cpp`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonlinearForm {
    /// `u . grad(u)`, unsymmetrised.
    Convective,
    /// `div(u u)`.
    Divergence,
    /// `0.5 * (u.grad(u) + div(uu))`, the default, non-aliasing form.
    SkewSymmetric,
    /// Alternating skew-symmetric (switches form every other step).
    AltSkewSymmetric,
    /// `(curl u) x u + grad(u.u/2)`.
    Rotational,
    /// Stokes flow: the convective term is dropped entirely.
    Stokes,
}

/// Body force evaluated at the extrapolated substep, generalising the
/// teacher's constant forcing terms in `navier_periodic.rs` to an
/// arbitrary function of `(x, y, z, t)`.
pub trait FieldForce: Send + Sync {
    fn evaluate(&self, x: f64, y: f64, z: f64, t: f64, component: usize) -> f64;
}

pub struct ZeroForce;
impl FieldForce for ZeroForce {
    fn evaluate(&self, _x: f64, _y: f64, _z: f64, _t: f64, _component: usize) -> f64 {
        0.0
    }
}

/// Anything that can be advanced one timestep and queried/dumped by the
/// driver loop, generalising the teacher's `Integrate` trait (previously
/// implemented only by `Navier2DPeriodic`) away from any one PDE.
pub trait Integrate {
    fn update(&mut self) -> Result<()>;
    fn get_time(&self) -> f64;
    fn get_dt(&self) -> f64;
    fn write(&self, force: bool) -> Result<()>;
    fn exit(&self) -> bool;
}

/// Hard upper bound on the number of timesteps the driver will take,
/// mirroring the teacher's `MAX_TIMESTEP` guard against runaway loops
/// when a session's stop condition is misconfigured.
pub const MAX_TIMESTEP: usize = 10_000_000;

/// Advance `pde` until `max_time` (or `MAX_TIMESTEP` steps, or
/// `pde.exit()`), dumping state every `save_interval` steps.
pub fn integrate<T: Integrate>(pde: &mut T, max_time: f64, save_interval: usize) -> Result<()> {
    let mut step = 0usize;
    loop {
        if pde.get_time() >= max_time {
            pde.write(true)?;
            break;
        }
        if step >= MAX_TIMESTEP {
            pde.write(true)?;
            break;
        }
        pde.update()?;
        step += 1;
        if save_interval > 0 && step % save_interval == 0 {
            pde.write(false)?;
        }
        if pde.exit() {
            pde.write(true)?;
            break;
        }
    }
    Ok(())
}

impl Integrate for Domain {
    fn update(&mut self) -> Result<()> {
        self.advance()
    }

    fn get_time(&self) -> f64 {
        self.time
    }

    fn get_dt(&self) -> f64 {
        self.dt
    }

    fn write(&self, force: bool) -> Result<()> {
        Domain::write(self, force)
    }

    fn exit(&self) -> bool {
        self.check_divergence().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        time: f64,
        dt: f64,
        writes: std::cell::RefCell<usize>,
    }

    impl Integrate for Counter {
        fn update(&mut self) -> Result<()> {
            self.time += self.dt;
            Ok(())
        }
        fn get_time(&self) -> f64 {
            self.time
        }
        fn get_dt(&self) -> f64 {
            self.dt
        }
        fn write(&self, _force: bool) -> Result<()> {
            *self.writes.borrow_mut() += 1;
            Ok(())
        }
        fn exit(&self) -> bool {
            false
        }
    }

    #[test]
    fn driver_stops_at_max_time() {
        let mut c = Counter { time: 0.0, dt: 0.1, writes: std::cell::RefCell::new(0) };
        integrate(&mut c, 1.0, 100).unwrap();
        assert!((c.time - 1.0).abs() < 1e-9);
        assert_eq!(*c.writes.borrow(), 1);
    }

    #[test]
    fn stiffly_stable_second_order_coefficients() {
        let s = StifflyStable::order(2);
        assert_eq!(s.bdf.len(), 3);
        assert_eq!(s.extrapolate.len(), 2);
        assert!((s.bdf[0] - 1.5).abs() < 1e-12);
    }
}
