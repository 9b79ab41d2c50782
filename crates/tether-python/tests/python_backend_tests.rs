//! Integration tests for the CPython backend.
//!
//! Context classes are defined in a small Python module; reference accounting is
//! checked with `sys.getrefcount` on the context object.

use std::{ffi::CStr, sync::{Arc, mpsc}, thread, time::Duration};

use pretty_assertions::assert_eq;
use pyo3::{
    exceptions::{PyRuntimeError, PyValueError},
    prelude::*,
    types::{IntoPyDict, PyModule},
};
use tether::{BridgeError, ContextBinding, NoopLogger, RecordingLogger};
use tether_python::{PyActiveContext, PythonRuntime};

const CONTEXTS: &CStr = c"
class ActiveContext:
    def __init__(self, context_id, evaluator_id):
        self.contextId = context_id
        self.evaluatorId = evaluator_id
        self.calls = []

    def submitTaskString(self, task):
        self.calls.append(['submitTaskString', task])

    def close(self):
        self.calls.append(['close'])

    def onError(self, message):
        self.calls.append(['onError', message])

    def getEvaluatorDescriptorString(self):
        return 'IP=10.0.0.7, Port=7001, HostName=worker-3, Memory=2048, Core=4'


class Minimal:
    def __init__(self, context_id, evaluator_id):
        self.contextId = context_id
        self.evaluatorId = evaluator_id


class Failing(ActiveContext):
    def submitTaskString(self, task):
        raise ValueError('queue full')


class WrongArity(ActiveContext):
    def submitTaskString(self):
        self.calls.append(['submitTaskString'])


class NumericIds:
    def __init__(self, context_id, evaluator_id):
        self.contextId = 1
        self.evaluatorId = 2


class MissingEvaluator:
    def __init__(self, context_id, evaluator_id):
        self.contextId = context_id
";

fn context<'py>(py: Python<'py>, class: &str) -> Bound<'py, PyAny> {
    let module = PyModule::from_code(py, CONTEXTS, c"contexts.py", c"contexts").unwrap();
    module.getattr(class).unwrap().call1(("ctx-1", "eval-9")).unwrap()
}

fn calls(context: &Bound<'_, PyAny>) -> Vec<Vec<String>> {
    context.getattr("calls").unwrap().extract().unwrap()
}

fn refcount(object: &Bound<'_, PyAny>) -> isize {
    let sys = object.py().import("sys").unwrap();
    sys.call_method1("getrefcount", (object,)).unwrap().extract().unwrap()
}

// ============================================================================
// Construction & identity
// ============================================================================

#[test]
fn ids_are_read_from_attributes() {
    Python::attach(|py| {
        let ctx = context(py, "ActiveContext");
        let proxy = PythonRuntime::active_context(&ctx, NoopLogger).unwrap();
        assert_eq!(proxy.id().unwrap(), "ctx-1");
        assert_eq!(proxy.evaluator_id().unwrap(), "eval-9");
        assert!(!proxy.is_degraded());
    });
}

#[test]
fn ids_survive_attribute_reassignment() {
    Python::attach(|py| {
        let ctx = context(py, "ActiveContext");
        let proxy = PythonRuntime::active_context(&ctx, NoopLogger).unwrap();
        ctx.setattr("contextId", "ctx-2").unwrap();
        ctx.setattr("evaluatorId", "eval-10").unwrap();
        assert_eq!(proxy.id().unwrap(), "ctx-1");
        assert_eq!(proxy.evaluator_id().unwrap(), "eval-9");
    });
}

#[test]
fn missing_attribute_fails_without_retaining() {
    Python::attach(|py| {
        let ctx = context(py, "MissingEvaluator");
        let before = refcount(&ctx);

        let err = PythonRuntime::active_context(&ctx, NoopLogger).unwrap_err();

        assert!(matches!(err, BridgeError::FieldNotFound { ref name, .. } if name == "evaluatorId"));
        assert_eq!(refcount(&ctx), before);
    });
}

#[test]
fn non_string_ids_are_rejected() {
    Python::attach(|py| {
        let ctx = context(py, "NumericIds");
        let err = PythonRuntime::active_context(&ctx, NoopLogger).unwrap_err();
        assert!(matches!(err, BridgeError::TypeMismatch { ref got, .. } if got == "int"));
    });
}

// ============================================================================
// Reference accounting
// ============================================================================

#[test]
fn proxy_holds_one_reference_until_dropped() {
    Python::attach(|py| {
        let ctx = context(py, "ActiveContext");
        let before = refcount(&ctx);

        let proxy = PythonRuntime::active_context(&ctx, NoopLogger).unwrap();
        assert_eq!(refcount(&ctx), before + 1);

        proxy.submit_task("cfg-xyz").unwrap();
        proxy.close().unwrap();
        assert_eq!(refcount(&ctx), before + 1);

        drop(proxy);
        assert_eq!(refcount(&ctx), before);
    });
}

#[test]
fn dispose_releases_once() {
    Python::attach(|py| {
        let ctx = context(py, "ActiveContext");
        let before = refcount(&ctx);
        let proxy = PythonRuntime::active_context(&ctx, NoopLogger).unwrap();

        assert!(proxy.dispose());
        assert!(!proxy.dispose());
        assert_eq!(refcount(&ctx), before);
        drop(proxy);
        assert_eq!(refcount(&ctx), before);
    });
}

// ============================================================================
// Dispatch
// ============================================================================

#[test]
fn submit_then_close_reaches_python() {
    Python::attach(|py| {
        let ctx = context(py, "ActiveContext");
        let proxy = PythonRuntime::active_context(&ctx, NoopLogger).unwrap();

        proxy.submit_task("cfg-xyz").unwrap();
        proxy.close().unwrap();
        proxy.close().unwrap();

        assert_eq!(
            calls(&ctx),
            vec![
                vec!["submitTaskString".to_owned(), "cfg-xyz".to_owned()],
                vec!["close".to_owned()],
                vec!["close".to_owned()],
            ]
        );
    });
}

#[test]
fn missing_methods_are_skipped() {
    Python::attach(|py| {
        let ctx = context(py, "Minimal");
        let logger = RecordingLogger::new();
        let proxy = PythonRuntime::active_context(&ctx, logger.clone()).unwrap();

        proxy.submit_task("cfg-xyz").unwrap();
        proxy.close().unwrap();

        assert!(logger.has_message("submitTaskString"));
        assert!(logger.has_message("close"));
    });
}

#[test]
fn wrong_arity_counts_as_missing() {
    Python::attach(|py| {
        let ctx = context(py, "WrongArity");
        let proxy = PythonRuntime::active_context(&ctx, NoopLogger).unwrap();
        proxy.submit_task("cfg-xyz").unwrap();
        assert!(calls(&ctx).is_empty());
    });
}

#[test]
fn python_exception_is_surfaced() {
    Python::attach(|py| {
        let ctx = context(py, "Failing");
        let proxy = PythonRuntime::active_context(&ctx, NoopLogger).unwrap();
        let err = proxy.submit_task("cfg-xyz").unwrap_err();
        assert_eq!(err, BridgeError::Foreign("ValueError: queue full".to_owned()));
    });
}

#[test]
fn on_error_reaches_python() {
    Python::attach(|py| {
        let ctx = context(py, "ActiveContext");
        let proxy = PythonRuntime::active_context(&ctx, NoopLogger).unwrap();
        proxy.on_error("task exploded").unwrap();
        assert_eq!(calls(&ctx), vec![vec!["onError".to_owned(), "task exploded".to_owned()]]);
    });
}

#[test]
fn on_error_without_handler_fails() {
    Python::attach(|py| {
        let ctx = context(py, "Minimal");
        let proxy = PythonRuntime::active_context(&ctx, NoopLogger).unwrap();
        let err = proxy.on_error("task exploded").unwrap_err();
        assert!(matches!(err, BridgeError::MethodNotFound { ref name, .. } if name == "onError"));
    });
}

#[test]
fn evaluator_descriptor_is_parsed() {
    Python::attach(|py| {
        let ctx = context(py, "ActiveContext");
        let proxy = PythonRuntime::active_context(&ctx, NoopLogger).unwrap();
        let descriptor = proxy.evaluator_descriptor().unwrap();
        assert_eq!(descriptor.node.host_name, "worker-3");
        assert_eq!(descriptor.node.address.port(), 7001);
        assert_eq!(descriptor.memory_mb, 2048);
        assert_eq!(descriptor.virtual_cores, 4);
    });
}

#[test]
fn custom_binding_renames_members() {
    Python::attach(|py| {
        let module = PyModule::from_code(
            py,
            c"
class Renamed:
    def __init__(self):
        self.ident = 'r-1'
        self.owner = 'ev-2'
        self.tasks = []

    def submit(self, task):
        self.tasks.append(task)
",
            c"renamed.py",
            c"renamed",
        )
        .unwrap();
        let ctx = module.getattr("Renamed").unwrap().call0().unwrap();
        let binding = ContextBinding {
            context_id_field: "ident".to_owned(),
            evaluator_id_field: "owner".to_owned(),
            submit_task_method: "submit".to_owned(),
            ..ContextBinding::default()
        };

        let proxy = PythonRuntime::active_context_with(&ctx, binding, NoopLogger).unwrap();
        proxy.submit_task("payload").unwrap();

        assert_eq!(proxy.id().unwrap(), "r-1");
        let tasks: Vec<String> = ctx.getattr("tasks").unwrap().extract().unwrap();
        assert_eq!(tasks, vec!["payload".to_owned()]);
    });
}

// ============================================================================
// Threading
// ============================================================================

#[test]
fn proxy_is_usable_from_threads_without_the_interpreter_lock() {
    let (ctx, proxy) = Python::attach(|py| {
        let ctx = context(py, "ActiveContext");
        let proxy = PythonRuntime::active_context(&ctx, NoopLogger).unwrap();
        (ctx.unbind(), Arc::new(proxy))
    });

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let proxy = Arc::clone(&proxy);
            thread::spawn(move || proxy.submit_task(&format!("task-{i}")).unwrap())
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    Python::attach(|py| {
        let ctx = ctx.bind(py);
        assert_eq!(calls(ctx).len(), 4);
        drop(proxy);
    });
}

const OVERLAP: &CStr = c"
import threading
import time


class Slow:
    def __init__(self):
        self.contextId = 'ctx-1'
        self.evaluatorId = 'eval-9'
        self.calls = []

    def submitTaskString(self, task):
        time.sleep(0.3)
        self.calls.append(task)


def dispose_during_call(make_proxy):
    ctx = Slow()
    proxy = make_proxy(ctx)
    errors = []

    def submit():
        try:
            proxy.submit_task('cfg')
        except Exception as err:
            errors.append(repr(err))

    worker = threading.Thread(target=submit)
    worker.start()
    time.sleep(0.1)
    released = proxy.dispose()
    worker.join()
    return released, len(ctx.calls), errors
";

#[test]
fn python_class_dispose_waits_for_sleeping_call() {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let outcome = Python::attach(|py| {
            let module = PyModule::from_code(py, OVERLAP, c"overlap.py", c"overlap").unwrap();
            module
                .getattr("dispose_during_call")
                .unwrap()
                .call1((py.get_type::<PyActiveContext>(),))
                .unwrap()
                .extract::<(bool, usize, Vec<String>)>()
                .unwrap()
        });
        tx.send(outcome).unwrap();
    });

    let (released, calls, errors) = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("dispose deadlocked against the in-flight call");
    assert!(released);
    assert_eq!(calls, 1);
    assert_eq!(errors, Vec::<String>::new());
}

// ============================================================================
// Python class
// ============================================================================

#[test]
fn python_class_lives_in_the_extension_module() {
    Python::attach(|py| {
        let module: String = py
            .get_type::<PyActiveContext>()
            .getattr("__module__")
            .unwrap()
            .extract()
            .unwrap();
        assert_eq!(module, "_tether");
    });
}

#[test]
fn python_class_drives_the_proxy() {
    Python::attach(|py| {
        let ctx = context(py, "ActiveContext");
        let cls = py.get_type::<PyActiveContext>();
        let proxy = cls.call1((&ctx,)).unwrap();

        assert_eq!(proxy.getattr("id").unwrap().extract::<String>().unwrap(), "ctx-1");
        proxy.call_method1("submit_task", ("cfg-xyz",)).unwrap();
        proxy.call_method0("close").unwrap();
        assert_eq!(proxy.getattr("state").unwrap().extract::<String>().unwrap(), "close_requested");

        let err = proxy.call_method1("submit_task", ("late",)).unwrap_err();
        assert!(err.is_instance_of::<PyRuntimeError>(py));
        assert_eq!(calls(&ctx).len(), 2);
    });
}

#[test]
fn python_class_returns_descriptor_dict() {
    Python::attach(|py| {
        let ctx = context(py, "ActiveContext");
        let proxy = py.get_type::<PyActiveContext>().call1((&ctx,)).unwrap();
        let descriptor = proxy.call_method0("evaluator_descriptor").unwrap();
        assert_eq!(descriptor.get_item("ip").unwrap().extract::<String>().unwrap(), "10.0.0.7");
        assert_eq!(descriptor.get_item("memory_mb").unwrap().extract::<u32>().unwrap(), 2048);
        assert!(descriptor.get_item("runtime_name").unwrap().is_none());
    });
}

#[test]
fn python_class_rejects_bad_binding() {
    Python::attach(|py| {
        let ctx = context(py, "ActiveContext");
        let kwargs = [("binding", "{\"no_such_member\": 1}")].into_py_dict(py).unwrap();
        let err = py
            .get_type::<PyActiveContext>()
            .call((&ctx,), Some(&kwargs))
            .unwrap_err();
        assert!(err.is_instance_of::<PyValueError>(py));
    });
}
