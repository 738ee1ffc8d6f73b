//! Error Types
//!
//! Internal operations return [`Result<T>`] and propagate with `?`. The public
//! server surface never returns these errors to callers: failures are logged
//! through the `log` facade and reflected as documented default values. The
//! [`fail_invalid_rid!`] and [`fail_cond!`] macros encode that idiom.
//!
//! ```rust,ignore
//! fn texture_set_path(&mut self, rid: Rid, path: &str) {
//!     let Some(tex) = self.textures.get_mut(rid) else {
//!         fail_invalid_rid!("texture_set_path", rid);
//!     };
//!     tex.path = path.to_owned();
//! }
//! ```

use thiserror::Error;

use crate::rid::{Rid, RidKind};

/// The error type shared by all Vesper crates.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServerError {
    // ========================================================================
    // Handle Errors
    // ========================================================================
    /// The handle is null, freed, or was never allocated.
    #[error("invalid handle {0:?}")]
    InvalidRid(Rid),

    /// The handle is live but refers to a different kind of resource.
    #[error("handle {rid:?} is a {actual}, expected {expected}")]
    WrongKind {
        rid: Rid,
        expected: RidKind,
        actual: RidKind,
    },

    // ========================================================================
    // Argument Errors
    // ========================================================================
    /// Generic shape or range violation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A buffer or array does not have the length its format requires.
    #[error("size mismatch for {what}: expected {expected}, got {actual}")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// An index or byte range lies outside the target.
    #[error("{what} out of range: {index} (limit {limit})")]
    OutOfRange {
        what: &'static str,
        index: usize,
        limit: usize,
    },

    /// Setting a reference would create a cycle.
    #[error("cycle detected: {0}")]
    CycleDetected(String),

    // ========================================================================
    // Platform Errors
    // ========================================================================
    /// The active backend does not support the feature.
    #[error("unsupported on this backend: {0}")]
    Unsupported(String),

    /// The low-level device rejected an operation.
    #[error("device error: {0}")]
    Device(String),

    // ========================================================================
    // Configuration & Threading Errors
    // ========================================================================
    /// Settings could not be parsed or are out of range.
    #[error("configuration error: {0}")]
    Config(String),

    /// The render thread is gone.
    #[error("render thread disconnected")]
    Disconnected,
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::Config(err.to_string())
    }
}

/// Alias for `Result<T, ServerError>`.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Logs an invalid-handle diagnostic and returns from the enclosing function.
///
/// With one argument the function returns `()`; a trailing expression is
/// returned instead.
#[macro_export]
macro_rules! fail_invalid_rid {
    ($op:expr, $rid:expr) => {{
        $crate::__log::error!("{}: invalid handle {:?}", $op, $rid);
        return;
    }};
    ($op:expr, $rid:expr, $ret:expr) => {{
        $crate::__log::error!("{}: invalid handle {:?}", $op, $rid);
        return $ret;
    }};
}

/// Logs an error and returns when `cond` holds.
#[macro_export]
macro_rules! fail_cond {
    ($cond:expr, $($msg:tt)+) => {
        if $cond {
            $crate::__log::error!($($msg)+);
            return;
        }
    };
}

/// Like [`fail_cond!`] but returns `$ret`.
#[macro_export]
macro_rules! fail_cond_v {
    ($cond:expr, $ret:expr, $($msg:tt)+) => {
        if $cond {
            $crate::__log::error!($($msg)+);
            return $ret;
        }
    };
}
