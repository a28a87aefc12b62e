//! Spectral-element incompressible Navier-Stokes core, plus the global
//! linear stability (IRAM) driver built on top of it.
//!
//! Module layout follows the dependency order a session is built in:
//! geometry and operators are process-wide constants; `element`/`mesh`
//! describe the discretisation; `assembly`/`boundary`/`bcmgr` build the
//! per-mode solve machinery; `field`/`solver` do the actual Helmholtz
//! solves; `domain`/`integrate` drive a timestepping session;
//! `transpose` and `stability` sit on top for 3D runs and stability
//! analysis respectively.

pub mod assembly;
pub mod auxfield;
pub mod bcmgr;
pub mod boundary;
pub mod domain;
pub mod element;
pub mod error;
pub mod field;
pub mod geometry;
pub mod integrate;
pub mod io;
pub mod mesh;
pub mod operators;
pub mod session;
pub mod solver;
pub mod stability;
pub mod transpose;

pub use error::{SemError, Severity};
pub use geometry::Geometry;
