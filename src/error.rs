//! Closed error-kind set and the single alert/termination routine.
//!
//! Mirrors semtex's `message()` dispatch (`femlib/message.c`): every
//! diagnostic in the crate funnels through [`alert`], which logs at the
//! severity-appropriate level and, for [`Severity::Error`], returns a
//! fatal [`SemError`] that the caller propagates with `?`.

use thiserror::Error;

/// Closed set of error kinds (spec §7).
#[derive(Debug, Error)]
pub enum SemError {
    #[error("configuration error in {routine}: {message}")]
    Configuration { routine: String, message: String },

    #[error("size mismatch in {routine}: expected {expected}, found {found}")]
    SizeMismatch {
        routine: String,
        expected: String,
        found: String,
    },

    #[error("numerical blowup in {routine}: divergence norm is NaN")]
    NumericalBlowup { routine: String },

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error in {routine}: {message}")]
    Internal { routine: String, message: String },
}

/// Severity levels, matching semtex's REMARK / WARNING / ERROR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Remark,
    Warning,
    Error,
}

/// Single alert dispatch. `ERROR` is fatal and yields `Err`; `REMARK`/`WARNING`
/// log and always return `Ok(())`, matching §7's "no exceptions are thrown
/// from the core, warnings are non-fatal" rule. Iterative non-convergence
/// (divergence, §7) always goes through `Severity::Warning`, never `Error`.
pub fn alert(routine: &str, message: &str, severity: Severity) -> Result<(), SemError> {
    match severity {
        Severity::Remark => {
            log::info!(target: "semflow", "{routine}: {message}");
            Ok(())
        }
        Severity::Warning => {
            log::warn!(target: "semflow", "{routine}: {message}");
            Ok(())
        }
        Severity::Error => {
            log::error!(target: "semflow", "{routine}: {message}");
            Err(SemError::Internal {
                routine: routine.to_string(),
                message: message.to_string(),
            })
        }
    }
}

pub type Result<T> = std::result::Result<T, SemError>;
