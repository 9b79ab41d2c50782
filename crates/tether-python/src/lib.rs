//! CPython backend for `tether`.
//!
//! [`PythonRuntime`] lets a Rust host proxy context objects that live in an embedded
//! interpreter, and the `_tether` extension module lets a Python host wrap its own
//! objects in the same proxy.

mod context_cls;
mod runtime;

pub use context_cls::PyActiveContext;
pub use runtime::{PythonEnv, PythonRuntime, py_err_to_bridge};

/// tether - proxies for context objects across the Rust/Python boundary.
#[pyo3::pymodule]
mod _tether {
    #[pymodule_export]
    use super::PyActiveContext as ActiveContext;
}
