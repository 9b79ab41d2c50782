//! The active context proxy.
//!
//! [`ActiveContext`] is the managed-side stand-in for one context object living in a
//! foreign runtime. It owns the retained references to that object, re-derives an entry
//! token for every call, and translates each capability into a method dispatch:
//!
//! | Capability | Foreign member | Missing member |
//! |------------|----------------|----------------|
//! | [`submit_task`](ActiveContext::submit_task) | `submitTaskString(string) -> void` | logged, `Ok(())` |
//! | [`close`](ActiveContext::close) | `close() -> void` | logged, `Ok(())` |
//! | [`on_error`](ActiveContext::on_error) | `onError(string) -> void` | `Err` |
//! | [`evaluator_descriptor`](ActiveContext::evaluator_descriptor) | `getEvaluatorDescriptorString() -> string` | `Err` |
//! | [`id`](ActiveContext::id), [`evaluator_id`](ActiveContext::evaluator_id) | none, cached at construction | n/a |
//!
//! Member names come from the proxy's [`ContextBinding`].
//!
//! # Lifecycle
//!
//! ```text
//! Active --close()--> CloseRequested --dispose()/drop--> Disposed
//!    \_____________________dispose()/drop_____________________/
//! ```
//!
//! `close` always forwards to the foreign side, including repeated calls. Once a close
//! has been requested, `submit_task`, `on_error` and `evaluator_descriptor` return
//! [`BridgeError::Closed`]. Disposal releases the retained references exactly once, after
//! which every capability returns [`BridgeError::Disposed`].

use std::{
    fmt,
    sync::{
        PoisonError, RwLock, RwLockReadGuard,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::{
    binding::ContextBinding,
    descriptor::{EvaluatorDescriptor, retrieve_evaluator_descriptor},
    error::{BridgeError, BridgeResult},
    handle::RuntimeHandle,
    logger::{BridgeLogger, TracingLogger},
    reference::ContextReferences,
    report::report_error,
    runtime::{ForeignEnv, ForeignRuntime, LocalOf, Signature, resolve_method},
};

/// Observable lifecycle state of a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// All capabilities are available.
    Active,
    /// `close` has completed at least once.
    CloseRequested,
    /// The retained references have been released.
    Disposed,
}

/// Proxy for one foreign context object.
///
/// `R` is the foreign runtime and `L` the injected logger. The proxy is `Send + Sync`
/// whenever those are, and may be called from any thread: each call derives its own
/// entry token.
pub struct ActiveContext<R: ForeignRuntime, L: BridgeLogger = TracingLogger> {
    handle: RuntimeHandle<R>,
    /// `None` once disposed. Calls hold the read lock while crossing the boundary so the
    /// references cannot be released underneath them.
    references: RwLock<Option<ContextReferences<R::Global>>>,
    close_requested: AtomicBool,
    /// Copy of the context id for error messages after disposal.
    label: String,
    binding: ContextBinding,
    logger: L,
}

impl<R: ForeignRuntime, L: BridgeLogger> fmt::Debug for ActiveContext<R, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveContext")
            .field("id", &self.label)
            .field("state", &self.state())
            .field("degraded", &self.is_degraded())
            .field("logger", &self.logger)
            .finish_non_exhaustive()
    }
}

impl<R: ForeignRuntime, L: BridgeLogger> ActiveContext<R, L> {
    /// Builds a proxy over `context` using the default [`ContextBinding`].
    pub fn new<'env>(env: &mut R::Env<'env>, context: &LocalOf<'env, R>, logger: L) -> BridgeResult<Self> {
        Self::with_binding(env, context, ContextBinding::default(), logger)
    }

    /// Builds a proxy over `context`, resolving members through `binding`.
    ///
    /// The runtime-wide handle is derived from `env`; if that fails the error is logged
    /// and the proxy is built in a degraded state where foreign dispatch is unavailable.
    /// Identity-field resolution failures are returned, and in that case nothing has
    /// been retained.
    pub fn with_binding<'env>(
        env: &mut R::Env<'env>,
        context: &LocalOf<'env, R>,
        binding: ContextBinding,
        logger: L,
    ) -> BridgeResult<Self> {
        const OP: &str = "ActiveContext::new";
        logger.log_start(OP);
        let handle = RuntimeHandle::derive(env, &logger);
        let references = ContextReferences::acquire(env, context, &binding)?;
        let label = references.context_id().to_owned();
        logger.log_stop(OP);
        Ok(Self {
            handle,
            references: RwLock::new(Some(references)),
            close_requested: AtomicBool::new(false),
            label,
            binding,
            logger,
        })
    }

    /// Submits a task configuration to the foreign context.
    ///
    /// Resolves the submit method, marshals `task_config` and invokes it once. When the
    /// runtime handle is degraded or the method cannot be resolved, the miss is logged
    /// and the call returns `Ok(())` without invoking anything. An exception thrown by
    /// the foreign method is returned as [`BridgeError::Foreign`].
    pub fn submit_task(&self, task_config: &str) -> BridgeResult<()> {
        const OP: &str = "ActiveContext::submit_task";
        self.logger.log_start(OP);
        let guard = self.read();
        let references = self.live(&guard)?;
        self.ensure_open()?;
        self.dispatch(references, &self.binding.submit_task_method, Some(task_config))?;
        self.logger.log_stop(OP);
        Ok(())
    }

    /// Asks the foreign context to close.
    ///
    /// Not idempotent: every call dispatches the foreign close method again. Resolution
    /// misses are absorbed as in [`submit_task`](Self::submit_task). The retained
    /// references stay alive until [`dispose`](Self::dispose) or drop.
    pub fn close(&self) -> BridgeResult<()> {
        const OP: &str = "ActiveContext::close";
        self.logger.log_start(OP);
        let guard = self.read();
        let references = self.live(&guard)?;
        if self.close_requested.load(Ordering::Acquire) {
            self.logger.log("close requested again; forwarding to foreign context");
        }
        self.dispatch(references, &self.binding.close_method, None)?;
        self.close_requested.store(true, Ordering::Release);
        self.logger.log_stop(OP);
        Ok(())
    }

    /// Reports an error to the foreign context, with the context object as origin.
    pub fn on_error(&self, message: &str) -> BridgeResult<()> {
        let guard = self.read();
        let references = self.live(&guard)?;
        self.ensure_open()?;
        report_error(
            &self.handle,
            message,
            references.object(),
            &self.binding.on_error_method,
            &self.logger,
        )
    }

    /// The context identifier captured at construction.
    pub fn id(&self) -> BridgeResult<String> {
        let guard = self.read();
        Ok(self.live(&guard)?.context_id().to_owned())
    }

    /// The owning evaluator identifier captured at construction.
    pub fn evaluator_id(&self) -> BridgeResult<String> {
        let guard = self.read();
        Ok(self.live(&guard)?.evaluator_id().to_owned())
    }

    /// Fetches and parses the evaluator descriptor from the foreign context.
    pub fn evaluator_descriptor(&self) -> BridgeResult<EvaluatorDescriptor> {
        let guard = self.read();
        let references = self.live(&guard)?;
        self.ensure_open()?;
        retrieve_evaluator_descriptor(
            &self.handle,
            references.object(),
            &self.binding.evaluator_descriptor_method,
            &self.logger,
        )
    }

    /// Releases the retained references.
    ///
    /// Waits for in-flight calls to finish. Returns `true` if this call performed the
    /// release and `false` if the proxy was already disposed.
    pub fn dispose(&self) -> bool {
        let released = self
            .references
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match released {
            Some(references) => {
                drop(references);
                self.logger.log(&format!("released references of context `{}`", self.label));
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn state(&self) -> ContextState {
        if self.read().is_none() {
            ContextState::Disposed
        } else if self.close_requested.load(Ordering::Acquire) {
            ContextState::CloseRequested
        } else {
            ContextState::Active
        }
    }

    /// True when the runtime-wide handle could not be derived at construction.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.handle.is_degraded()
    }

    #[must_use]
    pub fn binding(&self) -> &ContextBinding {
        &self.binding
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<ContextReferences<R::Global>>> {
        self.references.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn live<'a>(
        &self,
        guard: &'a RwLockReadGuard<'_, Option<ContextReferences<R::Global>>>,
    ) -> BridgeResult<&'a ContextReferences<R::Global>> {
        guard
            .as_ref()
            .ok_or_else(|| BridgeError::Disposed(self.label.clone()))
    }

    fn ensure_open(&self) -> BridgeResult<()> {
        if self.close_requested.load(Ordering::Acquire) {
            Err(BridgeError::Closed(self.label.clone()))
        } else {
            Ok(())
        }
    }

    /// Resolves and invokes a void method, optionally passing one string argument.
    ///
    /// Handle and method-resolution failures are logged and swallowed. Anything else,
    /// including a foreign exception, is returned.
    fn dispatch(
        &self,
        references: &ContextReferences<R::Global>,
        method: &str,
        payload: Option<&str>,
    ) -> BridgeResult<()> {
        let signature = match payload {
            Some(_) => Signature::string_consumer(),
            None => Signature::nullary(),
        };
        let outcome = self
            .handle
            .attach(|env| {
                let object = env.local(references.object());
                let method_id = resolve_method(env, &object, method, &signature)?;
                let args = match payload {
                    Some(payload) => vec![env.new_string(payload)?],
                    None => Vec::new(),
                };
                env.call(&object, &method_id, &args).map(drop)
            })
            .and_then(|result| result);

        match outcome {
            Ok(()) => Ok(()),
            Err(error @ BridgeError::MethodNotFound { .. }) => {
                self.logger.log(&format!("{error}; call skipped"));
                Ok(())
            }
            Err(error) if error.is_resolution_failure() => {
                self.logger
                    .log_error(&format!("cannot dispatch `{method}`; call skipped"), Some(&error));
                Ok(())
            }
            Err(error) => Err(error),
        }
    }
}
