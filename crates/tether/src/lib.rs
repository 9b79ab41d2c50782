#![doc = include_str!("../../../README.md")]

mod binding;
mod context;
mod descriptor;
mod error;
mod handle;
mod logger;
mod reference;
mod report;
mod runtime;
pub mod stub;

pub use crate::{
    binding::ContextBinding,
    context::{ActiveContext, ContextState},
    descriptor::{EvaluatorDescriptor, NodeDescriptor, retrieve_evaluator_descriptor},
    error::{BridgeError, BridgeResult, DescriptorError},
    handle::RuntimeHandle,
    logger::{BridgeLogger, LogEvent, NoopLogger, RecordingLogger, TracingLogger},
    reference::ContextReferences,
    report::report_error,
    runtime::{ForeignEnv, ForeignRuntime, LocalOf, Signature, ValueKind, resolve_method},
};
