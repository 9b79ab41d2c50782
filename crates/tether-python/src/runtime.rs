//! CPython as a [`ForeignRuntime`].
//!
//! The interpreter is the runtime, `Python<'py>` is the entry token, and retained
//! references are `Py<PyAny>`. Python classes do not declare their instance attributes,
//! so field resolution only records the name and the lookup itself happens on read.

use std::fmt;

use pyo3::{
    exceptions::PyAttributeError,
    intern,
    prelude::*,
    types::{PyString, PyTuple, PyType},
};
use tether::{ActiveContext, BridgeError, BridgeLogger, BridgeResult, ContextBinding, ForeignEnv, ForeignRuntime, Signature, ValueKind};

/// Converts a Python exception into a [`BridgeError::Foreign`].
///
/// The message keeps the exception type, e.g. `ValueError: queue full`.
pub fn py_err_to_bridge(err: &PyErr) -> BridgeError {
    BridgeError::Foreign(err.to_string())
}

fn type_name(object: &Bound<'_, PyAny>) -> String {
    object
        .get_type()
        .name()
        .map_or_else(|_| "<unknown>".to_owned(), |name| name.to_string())
}

/// The embedded (or hosting) CPython interpreter.
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonRuntime;

impl PythonRuntime {
    /// Builds a proxy over a Python context object with the default binding.
    pub fn active_context<'py, L: BridgeLogger>(
        context: &Bound<'py, PyAny>,
        logger: L,
    ) -> BridgeResult<ActiveContext<Self, L>> {
        Self::active_context_with(context, ContextBinding::default(), logger)
    }

    /// Builds a proxy over a Python context object with a custom binding.
    pub fn active_context_with<'py, L: BridgeLogger>(
        context: &Bound<'py, PyAny>,
        binding: ContextBinding,
        logger: L,
    ) -> BridgeResult<ActiveContext<Self, L>> {
        let mut env = PythonEnv::new(context.py());
        ActiveContext::with_binding(&mut env, context, binding, logger)
    }
}

impl ForeignRuntime for PythonRuntime {
    type Global = Py<PyAny>;
    type Env<'env> = PythonEnv<'env>;

    fn attach<T>(&self, f: impl for<'env> FnOnce(&mut Self::Env<'env>) -> T) -> BridgeResult<T> {
        Ok(Python::attach(|py| f(&mut PythonEnv::new(py))))
    }
}

/// Entry token wrapping `Python<'py>`.
#[derive(Clone, Copy)]
pub struct PythonEnv<'py> {
    py: Python<'py>,
}

impl fmt::Debug for PythonEnv<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PythonEnv").finish_non_exhaustive()
    }
}

impl<'py> PythonEnv<'py> {
    #[must_use]
    pub fn new(py: Python<'py>) -> Self {
        Self { py }
    }

    #[must_use]
    pub fn py(&self) -> Python<'py> {
        self.py
    }
}

impl<'py> ForeignEnv for PythonEnv<'py> {
    type Runtime = PythonRuntime;
    type Local = Bound<'py, PyAny>;
    type Global = Py<PyAny>;
    type Class = Bound<'py, PyType>;
    type Field = String;
    type Method = String;

    fn runtime(&mut self) -> BridgeResult<PythonRuntime> {
        Ok(PythonRuntime)
    }

    fn class_of(&mut self, object: &Bound<'py, PyAny>) -> BridgeResult<Bound<'py, PyType>> {
        Ok(object.get_type())
    }

    fn field(&mut self, _class: &Bound<'py, PyType>, name: &str, _kind: ValueKind) -> Option<String> {
        Some(name.to_owned())
    }

    fn get_field(&mut self, object: &Bound<'py, PyAny>, field: &String) -> BridgeResult<Bound<'py, PyAny>> {
        let py = self.py;
        object.getattr(field.as_str()).map_err(|err| {
            if err.is_instance_of::<PyAttributeError>(py) {
                BridgeError::FieldNotFound {
                    name: field.clone(),
                    kind: ValueKind::String,
                }
            } else {
                py_err_to_bridge(&err)
            }
        })
    }

    /// Finds a callable class attribute. Plain functions must also take exactly one
    /// positional parameter per argument plus `self`; other callables are trusted.
    fn method(&mut self, class: &Bound<'py, PyType>, name: &str, signature: &Signature) -> Option<String> {
        let attr = class.getattr(name).ok()?;
        if !attr.is_callable() {
            return None;
        }
        if let Ok(code) = attr.getattr(intern!(self.py, "__code__")) {
            let argcount: usize = code.getattr(intern!(self.py, "co_argcount")).ok()?.extract().ok()?;
            if argcount != signature.params().len() + 1 {
                return None;
            }
        }
        Some(name.to_owned())
    }

    fn call(
        &mut self,
        object: &Bound<'py, PyAny>,
        method: &String,
        args: &[Bound<'py, PyAny>],
    ) -> BridgeResult<Option<Bound<'py, PyAny>>> {
        let args = PyTuple::new(self.py, args).map_err(|err| py_err_to_bridge(&err))?;
        let result = object
            .call_method1(method.as_str(), args)
            .map_err(|err| py_err_to_bridge(&err))?;
        Ok((!result.is_none()).then_some(result))
    }

    fn new_string(&mut self, value: &str) -> BridgeResult<Bound<'py, PyAny>> {
        Ok(PyString::new(self.py, value).into_any())
    }

    fn read_string(&mut self, string: &Bound<'py, PyAny>) -> BridgeResult<String> {
        let string = string.cast::<PyString>().map_err(|_| BridgeError::TypeMismatch {
            expected: ValueKind::String,
            got: type_name(string),
        })?;
        string
            .to_str()
            .map(str::to_owned)
            .map_err(|err| py_err_to_bridge(&err))
    }

    fn retain(&mut self, object: &Bound<'py, PyAny>) -> BridgeResult<Py<PyAny>> {
        Ok(object.clone().unbind())
    }

    fn local(&mut self, global: &Py<PyAny>) -> Bound<'py, PyAny> {
        global.bind(self.py).clone()
    }
}
