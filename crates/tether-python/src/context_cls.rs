//! PyO3 class exposing [`ActiveContext`] to Python as `_tether.ActiveContext`.
//!
//! Lets Python hosts drive a context object through the same proxy the Rust side uses.
//! Every `BridgeError` is raised as a Python exception; descriptor and binding problems
//! become `ValueError`, everything else `RuntimeError`.
//!
//! Each method detaches from the interpreter before touching the proxy. The proxy's
//! reference lock can be held by a call that is itself waiting to re-attach, so waiting
//! for that lock while attached would deadlock.

use pyo3::{
    exceptions::{PyRuntimeError, PyValueError},
    prelude::*,
    types::PyDict,
};
use tether::{ActiveContext, BridgeError, ContextBinding, ContextState, TracingLogger};

use crate::runtime::PythonRuntime;

// =============================================================================
// Error conversion
// =============================================================================

/// Converts a [`BridgeError`] into a Python exception.
///
/// Free function rather than a `From` impl: both types live in other crates.
fn bridge_err_to_py(err: BridgeError) -> PyErr {
    match err {
        BridgeError::Descriptor(_) | BridgeError::Binding(_) => PyValueError::new_err(err.to_string()),
        _ => PyRuntimeError::new_err(err.to_string()),
    }
}

fn state_name(state: ContextState) -> &'static str {
    match state {
        ContextState::Active => "active",
        ContextState::CloseRequested => "close_requested",
        ContextState::Disposed => "disposed",
    }
}

// =============================================================================
// PyActiveContext
// =============================================================================

/// Proxy for a Python context object.
///
/// The wrapped object must expose `contextId` and `evaluatorId` string attributes and
/// may define `submitTaskString(task)`, `close()`, `onError(message)` and
/// `getEvaluatorDescriptorString()`.
#[pyclass(name = "ActiveContext", module = "_tether", frozen)]
pub struct PyActiveContext {
    inner: ActiveContext<PythonRuntime, TracingLogger>,
}

#[pymethods]
impl PyActiveContext {
    /// Wraps `context`. `binding` is an optional JSON object renaming foreign members.
    #[new]
    #[pyo3(signature = (context, *, binding=None))]
    fn new(context: &Bound<'_, PyAny>, binding: Option<&str>) -> PyResult<Self> {
        let binding = match binding {
            Some(json) => ContextBinding::from_json(json).map_err(bridge_err_to_py)?,
            None => ContextBinding::default(),
        };
        let inner = PythonRuntime::active_context_with(context, binding, TracingLogger).map_err(bridge_err_to_py)?;
        Ok(Self { inner })
    }

    fn submit_task(&self, py: Python<'_>, task_config: &str) -> PyResult<()> {
        py.detach(|| self.inner.submit_task(task_config))
            .map_err(bridge_err_to_py)
    }

    fn close(&self, py: Python<'_>) -> PyResult<()> {
        py.detach(|| self.inner.close()).map_err(bridge_err_to_py)
    }

    fn on_error(&self, py: Python<'_>, message: &str) -> PyResult<()> {
        py.detach(|| self.inner.on_error(message)).map_err(bridge_err_to_py)
    }

    #[getter]
    fn id(&self, py: Python<'_>) -> PyResult<String> {
        py.detach(|| self.inner.id()).map_err(bridge_err_to_py)
    }

    #[getter]
    fn evaluator_id(&self, py: Python<'_>) -> PyResult<String> {
        py.detach(|| self.inner.evaluator_id()).map_err(bridge_err_to_py)
    }

    /// One of `"active"`, `"close_requested"` or `"disposed"`.
    #[getter]
    fn state(&self, py: Python<'_>) -> &'static str {
        state_name(py.detach(|| self.inner.state()))
    }

    /// Returns the parsed evaluator descriptor as a dict.
    fn evaluator_descriptor<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let descriptor = py
            .detach(|| self.inner.evaluator_descriptor())
            .map_err(bridge_err_to_py)?;
        let dict = PyDict::new(py);
        dict.set_item("host_name", &descriptor.node.host_name)?;
        dict.set_item("ip", descriptor.node.address.ip().to_string())?;
        dict.set_item("port", descriptor.node.address.port())?;
        dict.set_item("memory_mb", descriptor.memory_mb)?;
        dict.set_item("virtual_cores", descriptor.virtual_cores)?;
        dict.set_item("runtime_name", descriptor.runtime_name)?;
        Ok(dict)
    }

    /// Releases the wrapped object, waiting for in-flight calls. Returns `False` if it
    /// was already released.
    fn dispose(&self, py: Python<'_>) -> bool {
        py.detach(|| self.inner.dispose())
    }

    fn __repr__(&self, py: Python<'_>) -> String {
        let (id, state) = py.detach(|| (self.inner.id(), self.inner.state()));
        match id {
            Ok(id) => format!("ActiveContext(id={id:?}, state={})", state_name(state)),
            Err(_) => "ActiveContext(<disposed>)".to_owned(),
        }
    }
}
