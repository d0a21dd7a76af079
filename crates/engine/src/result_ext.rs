//! Logging helpers for fallible engine calls.
//!
//! `log` records an error together with the call site and a short
//! description of what was being attempted, then hands the value back so
//! it composes with `?`.

use std::fmt::Display;
use std::panic::Location;

use tracing::{error, warn};

/// `file:line` of the caller.
#[track_caller]
fn call_site() -> String {
    let location = Location::caller();
    format!("{}:{}", location.file(), location.line())
}

pub trait ResultExt<T, E> {
    /// ```ignore
    /// use tramita_engine::result_ext::ResultExt;
    ///
    /// let completion = coordinator.complete_task(id).await.log("completing review task")?;
    /// ```
    fn log<S: ToString>(self, context: S) -> Result<T, E>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn log<S: ToString>(self, context: S) -> Result<T, E> {
        if let Err(e) = &self {
            error!(
                target: "tramita_engine",
                location = %call_site(),
                context = %context.to_string(),
                error = %e,
                "Engine call failed"
            );
        }
        self
    }
}

pub trait OptionResultExt<T> {
    /// Warn when a value the caller expected is absent.
    fn log_none<S: ToString>(self, context: S) -> Option<T>;
}

impl<T> OptionResultExt<T> for Option<T> {
    #[track_caller]
    fn log_none<S: ToString>(self, context: S) -> Option<T> {
        if self.is_none() {
            warn!(
                target: "tramita_engine",
                location = %call_site(),
                context = %context.to_string(),
                "Missing value"
            );
        }
        self
    }
}
