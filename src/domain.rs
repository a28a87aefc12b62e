//! `Domain`: the collection of velocity/pressure (and optional scalar)
//! `Field`s that one session evolves together, plus the timestep/dump
//! bookkeeping the teacher's `Integrate` driver loop expects (spec §4.4).
//!
//! Grounded on `examples/preiter93-ndspectral/src/examples/navier_periodic.rs`'s
//! `Navier2DPeriodic` (the `temp`/`ux`/`uy`/`pres` quartet, `time`/`dt`
//! bookkeeping, `write`/`exit`) generalised from one fixed global field
//! set to an arbitrary velocity-component count driven by
//! [`crate::geometry::SymmetryClass`].
//!
//! `advance` implements the KIO91 velocity-correction substep sequence of
//! spec §4.4: nonlinear term, BC history refresh, pressure Poisson with
//! the computed high-order Neumann BC, then one Helmholtz solve per
//! velocity component (and scalar, if present). The fixed ordering
//! `maintainFourier -> pressure -> velocity -> scalar` is an invariant of
//! a step (spec §5) and must not be reordered.

use std::sync::Arc;

use crate::auxfield::AuxField;
use crate::bcmgr::BCmgr;
use crate::error::Result;
use crate::field::Field;
use crate::geometry::Geometry;
use crate::integrate::{FieldForce, NonlinearForm, StifflyStable, ZeroForce};
use crate::mesh::Mesh;

/// Rolled full-field history of velocity and nonlinear-term samples,
/// needed for the BDF time-derivative and extrapolation sums of spec
/// §4.4/§4.5; the roll pattern mirrors [`crate::bcmgr::EdgeHistory`] but
/// carries whole `AuxField`s rather than per-edge vectors.
struct SubstepHistory {
    /// `velocity[component][level]`, level 0 most recent.
    velocity: Vec<Vec<AuxField>>,
    /// `nonlinear[component][level]`, level 0 most recent.
    nonlinear: Vec<Vec<AuxField>>,
}

impl SubstepHistory {
    fn new(ncomp: usize, max_order: usize, geometry: &Geometry) -> Self {
        let blank = |name: char| vec![AuxField::zeros(name, geometry); max_order];
        SubstepHistory {
            velocity: (0..ncomp).map(|i| blank(component_name(i))).collect(),
            nonlinear: (0..ncomp).map(|i| blank(component_name(i))).collect(),
        }
    }

    fn roll(&mut self, velocity_now: &[AuxField], nonlinear_now: &[AuxField]) {
        for (levels, fresh) in self.velocity.iter_mut().zip(velocity_now.iter()) {
            roll_levels(levels, fresh.clone());
        }
        for (levels, fresh) in self.nonlinear.iter_mut().zip(nonlinear_now.iter()) {
            roll_levels(levels, fresh.clone());
        }
    }

    /// Stiffly-stable extrapolation of the nonlinear term at the new time
    /// level, one `AuxField` per velocity component.
    fn extrapolate_nonlinear(&self, order: usize) -> Vec<AuxField> {
        let coeffs = &StifflyStable::order(order).extrapolate;
        self.nonlinear
            .iter()
            .map(|levels| {
                let mut out = levels[0].clone();
                out.scale(0.0);
                for (k, &c) in coeffs.iter().enumerate() {
                    out.axpy(c, &levels[k]);
                }
                out
            })
            .collect()
    }

    /// `sum_{q=1}^{order} bdf[q] * u^{n+1-q}` for one velocity component,
    /// the explicit part of the BDF time derivative (KIO91 Table 2).
    fn bdf_velocity_combo(&self, component: usize, order: usize, bdf: &[f64]) -> AuxField {
        let levels = &self.velocity[component];
        let mut out = levels[0].clone();
        out.scale(0.0);
        for q in 1..=order {
            out.axpy(bdf[q], &levels[q - 1]);
        }
        out
    }
}

fn roll_levels(levels: &mut [AuxField], fresh: AuxField) {
    for k in (1..levels.len()).rev() {
        levels[k] = levels[k - 1].clone();
    }
    if !levels.is_empty() {
        levels[0] = fresh;
    }
}

fn component_name(i: usize) -> char {
    match i {
        0 => 'u',
        1 => 'v',
        _ => 'w',
    }
}

pub struct Domain {
    /// Session name: field dumps are written to `<session_name>.fld`
    /// (spec §6), matching semtex's own `name.fld` convention.
    pub session_name: String,
    pub geometry: Arc<Geometry>,
    pub mesh: Mesh,
    /// Velocity components, 2 or 3 depending on symmetry class.
    pub velocity: Vec<Field>,
    pub pressure: Field,
    /// Optional transported scalar (temperature/concentration).
    pub scalar: Option<Field>,
    pub bcmgr: BCmgr,
    pub time: f64,
    pub dt: f64,
    pub step: usize,
    /// Kinematic viscosity `nu`.
    pub viscosity: f64,
    /// Scalar diffusivity ratio `nu/Pr`, if a scalar is carried.
    pub prandtl: Option<f64>,
    /// Maximum stiffly-stable order; the effective order ramps up from 1
    /// as history accumulates during startup.
    pub max_order: usize,
    /// Which convective-term form the nonlinear step evaluates.
    pub advection: NonlinearForm,
    /// Body force, evaluated at the extrapolated substep.
    pub force: Box<dyn FieldForce>,
    /// True: Cholesky direct path; false: Jacobi-PCG. Spec §4.3.
    pub direct: bool,
    pub tol_rel: f64,
    pub step_max: usize,
    history: SubstepHistory,
}

impl Domain {
    pub fn new(
        geometry: Arc<Geometry>,
        mesh: Mesh,
        velocity: Vec<Field>,
        pressure: Field,
        scalar: Option<Field>,
        bcmgr: BCmgr,
        dt: f64,
    ) -> Self {
        let ncomp = velocity.len();
        let history = SubstepHistory::new(ncomp, 3, &geometry);
        Domain {
            session_name: "session".to_string(),
            geometry,
            mesh,
            velocity,
            pressure,
            scalar,
            bcmgr,
            time: 0.0,
            dt,
            step: 0,
            viscosity: 1.0,
            prandtl: None,
            max_order: 2,
            advection: NonlinearForm::AltSkewSymmetric,
            force: Box::new(ZeroForce),
            direct: true,
            tol_rel: 1e-10,
            step_max: 500,
            history,
        }
    }

    /// Effective stiffly-stable order: ramps from 1 up to `max_order` as
    /// enough history accumulates, matching KIO91's own startup ramp.
    /// Capped at 3 since [`StifflyStable`] and the rolled history both
    /// only carry three levels.
    fn effective_order(&self) -> usize {
        (self.step + 1).min(self.max_order).max(1).min(3)
    }

    /// `N(u)` (+ body force) per velocity component, in physical space,
    /// for the convective-term form selected by `self.advection` (spec
    /// §4.4). Only the two in-plane directions are convected: the
    /// Fourier/z direction's contribution is handled by the modal
    /// Helmholtz constant rather than an explicit derivative, following
    /// the same 2D-tensor-product scope [`crate::element::Element`]
    /// implements.
    fn nonlinear_term(&self, velocity: &[AuxField], alt_flip: bool) -> Result<Vec<AuxField>> {
        let ncomp = velocity.len();
        let ndir = ncomp.min(2);

        let mut convective = Vec::with_capacity(ncomp);
        let mut divergence = Vec::with_capacity(ncomp);
        for i in 0..ncomp {
            let mut c = AuxField::zeros(velocity[i].name, &self.geometry);
            let mut d = AuxField::zeros(velocity[i].name, &self.geometry);
            for j in 0..ndir {
                let dui_dxj = velocity[i].gradient(j, &self.mesh)?;
                let mut term = dui_dxj;
                term.times(&velocity[j]);
                c.add_assign(&term);

                let mut uiuj = velocity[i].clone();
                uiuj.times(&velocity[j]);
                let duiuj = uiuj.gradient(j, &self.mesh)?;
                d.add_assign(&duiuj);
            }
            convective.push(c);
            divergence.push(d);
        }

        let vorticity = if ncomp >= 2 {
            let dv_dx = velocity[1].gradient(0, &self.mesh)?;
            let du_dy = velocity[0].gradient(1, &self.mesh)?;
            let mut omega = dv_dx;
            omega.sub_assign(&du_dy);
            Some(omega)
        } else {
            None
        };
        let mut speed2 = AuxField::zeros(velocity[0].name, &self.geometry);
        for comp in velocity {
            let mut sq = comp.clone();
            sq.times(comp);
            speed2.add_assign(&sq);
        }
        speed2.scale(0.5);

        let mut out = Vec::with_capacity(ncomp);
        for i in 0..ncomp {
            let term = match self.advection {
                NonlinearForm::Stokes => {
                    let mut z = convective[i].clone();
                    z.scale(0.0);
                    z
                }
                NonlinearForm::Convective => convective[i].clone(),
                NonlinearForm::Divergence => divergence[i].clone(),
                NonlinearForm::SkewSymmetric => {
                    let mut t = convective[i].clone();
                    t.add_assign(&divergence[i]);
                    t.scale(0.5);
                    t
                }
                NonlinearForm::AltSkewSymmetric => {
                    if alt_flip {
                        divergence[i].clone()
                    } else {
                        convective[i].clone()
                    }
                }
                NonlinearForm::Rotational => {
                    if i < 2 {
                        if let Some(omega) = &vorticity {
                            let mut rot = omega.clone();
                            rot.times(&velocity[1 - i]);
                            if i == 0 {
                                rot.scale(-1.0);
                            }
                            let grad_speed2 = speed2.gradient(i, &self.mesh)?;
                            rot.add_assign(&grad_speed2);
                            rot
                        } else {
                            convective[i].clone()
                        }
                    } else {
                        convective[i].clone()
                    }
                }
            };
            out.push(term);
        }
        Ok(out)
    }

    fn add_force(&self, term: &mut AuxField, component: usize) {
        for (e, el) in self.mesh.elements.iter().enumerate() {
            let mut block = term.element_slice(0, e);
            for i in 0..el.n_p {
                for j in 0..el.n_p {
                    block[[i, j]] += self
                        .force
                        .evaluate(el.x[[i, j]], el.y[[i, j]], 0.0, self.time, component);
                }
            }
            term.set_element_slice(0, e, &block);
        }
    }

    /// One KIO91 velocity-correction step (spec §4.4): nonlinear term,
    /// BC history refresh, pressure Poisson with the computed high-order
    /// Neumann BC, viscous Helmholtz per velocity component, then the
    /// scalar, if carried. Advances `time`/`step` and runs the NaN guard
    /// on completion.
    pub fn advance(&mut self) -> Result<()> {
        let order = self.effective_order();
        let coeffs = StifflyStable::order(order);
        let alpha0 = coeffs.bdf[0];

        let velocity_now: Vec<AuxField> = self.velocity.iter().map(|f| f.data.clone()).collect();
        let alt_flip = self.step % 2 == 1;
        let mut nonlinear = self.nonlinear_term(&velocity_now, alt_flip)?;
        for (i, term) in nonlinear.iter_mut().enumerate() {
            self.add_force(term, i);
        }

        self.history.roll(&velocity_now, &nonlinear);

        let timedep = self.step + 1 >= order;
        self.bcmgr.maintain_fourier(
            &self.mesh,
            &self.pressure.boundaries[0],
            &velocity_now,
            &nonlinear,
            self.viscosity,
            self.dt,
            timedep,
        )?;

        let extrapolated = self.history.extrapolate_nonlinear(order);

        let n_modes = self.pressure.maps.len().max(1);
        let n_planes = self.geometry.n_z_local.max(1);
        for z in 0..n_planes {
            let mode = if n_modes > 1 { (z / 2).min(n_modes - 1) } else { 0 };

            // Pressure Poisson: -grad^2 p = -div(extrapolated N)/dt, the
            // computed high-order Neumann BC being supplied through
            // `self.bcmgr`'s rolled HOPBC history (spec §4.4 step 2).
            let mut div_n = AuxField::zeros('p', &self.geometry);
            for (dir, comp) in extrapolated.iter().enumerate().take(2) {
                let g = comp.gradient(dir, &self.mesh)?;
                div_n.add_assign(&g);
            }
            div_n.scale(-1.0 / self.dt);
            if self.direct {
                self.pressure
                    .solve_direct(&self.mesh, mode, z, 0.0, &div_n, self.time, Some(&self.bcmgr))?;
            } else {
                self.pressure.solve_jacpcg(
                    &self.mesh,
                    mode,
                    z,
                    0.0,
                    &div_n,
                    self.tol_rel,
                    self.step_max,
                    self.time,
                    Some(&self.bcmgr),
                )?;
            }

            // Viscous substep: (-nu*grad^2 + alpha0/dt) u = N* - grad p -
            // (1/dt) sum_{q>=1} bdf[q] u^{n+1-q} (spec §4.4 step 3).
            let lambda2 = alpha0 / (self.viscosity * self.dt);
            let grad_p: Vec<AuxField> = (0..2.min(self.velocity.len()))
                .map(|dir| self.pressure.data.gradient(dir, &self.mesh))
                .collect::<Result<_>>()?;
            for (i, field) in self.velocity.iter_mut().enumerate() {
                let mut rhs = extrapolated[i].clone();
                if i < grad_p.len() {
                    rhs.sub_assign(&grad_p[i]);
                }
                let combo = self.history.bdf_velocity_combo(i, order, &coeffs.bdf);
                rhs.axpy(-1.0 / self.dt, &combo);
                rhs.scale(1.0 / self.viscosity);
                if self.direct {
                    field.solve_direct(&self.mesh, mode, z, lambda2, &rhs, self.time, None)?;
                } else {
                    field.solve_jacpcg(
                        &self.mesh,
                        mode,
                        z,
                        lambda2,
                        &rhs,
                        self.tol_rel,
                        self.step_max,
                        self.time,
                        None,
                    )?;
                }
            }

            // Scalar substep: same Helmholtz procedure with nu/Pr (spec
            // §4.4 step 4).
            if let Some(scalar) = self.scalar.as_mut() {
                let pr = self.prandtl.unwrap_or(1.0);
                let diffusivity = self.viscosity / pr;
                let lambda2_c = alpha0 / (diffusivity * self.dt);
                let mut rhs = AuxField::zeros(scalar.data.name, &self.geometry);
                rhs.scale(0.0);
                // No convective scalar transport is modelled without a
                // dedicated scalar-history entry; the scalar is diffused
                // by its own Helmholtz solve against the zero forcing
                // plus whatever essential/natural BC is attached.
                if self.direct {
                    scalar.solve_direct(&self.mesh, mode, z, lambda2_c, &rhs, self.time, None)?;
                } else {
                    scalar.solve_jacpcg(
                        &self.mesh,
                        mode,
                        z,
                        lambda2_c,
                        &rhs,
                        self.tol_rel,
                        self.step_max,
                        self.time,
                        None,
                    )?;
                }
            }
        }

        self.time += self.dt;
        self.step += 1;
        self.check_divergence()?;
        Ok(())
    }

    /// Write every field's current state to `<session_name>.fld` through
    /// [`crate::io`]'s fixed-header codec (spec §6), the same
    /// `name.fld` dump semtex's own `Domain::dump` writes on every
    /// `IO_FLD`-periodic step and at the final step. Unlike semtex this
    /// always truncates rather than appending multiple time slices into
    /// one growing file; `force` selects no extra behaviour today since
    /// this crate keeps one field-dump record per call, not a
    /// checkpoint-vs-final distinction.
    pub fn write(&self, force: bool) -> Result<()> {
        let _ = force;
        let mut fields = String::new();
        for v in &self.velocity {
            fields.push(v.data.name);
        }
        fields.push(self.pressure.data.name);
        if let Some(scalar) = &self.scalar {
            fields.push(scalar.data.name);
        }

        let header = crate::io::DumpHeader::new(
            &self.session_name,
            "",
            self.geometry.n_p as u32,
            self.geometry.n_z as u32,
            self.mesh.elements.len() as u32,
            self.step as u32,
            self.time,
            self.dt,
            self.viscosity,
            &fields,
        );

        let mut file = std::fs::File::create(format!("{}.fld", self.session_name))?;
        header.write_to(&mut file)?;
        for v in &self.velocity {
            crate::io::write_field_data(&mut file, &v.data.data, header.endianness)?;
        }
        crate::io::write_field_data(&mut file, &self.pressure.data.data, header.endianness)?;
        if let Some(scalar) = &self.scalar {
            crate::io::write_field_data(&mut file, &scalar.data.data, header.endianness)?;
        }
        Ok(())
    }

    /// NaN/Inf guard over every field, matching the teacher's `exit()`
    /// check in `Integrate for Navier2DPeriodic` (spec §7: divergence is
    /// reported as `SemError::NumericalBlowup`, not a panic).
    pub fn check_divergence(&self) -> Result<()> {
        let routine = "Domain::check_divergence";
        let blown = self
            .velocity
            .iter()
            .chain(std::iter::once(&self.pressure))
            .chain(self.scalar.iter())
            .any(|f| f.data.data.iter().any(|v| !v.is_finite()));
        if blown {
            return Err(crate::error::SemError::NumericalBlowup {
                routine: routine.to_string(),
            });
        }
        Ok(())
    }
}
