//! Runtime-wide handle captured at proxy construction.

use crate::{
    error::{BridgeError, BridgeResult},
    logger::BridgeLogger,
    runtime::{ForeignEnv, ForeignRuntime},
};

/// The runtime-wide handle a proxy uses to derive entry tokens.
///
/// Captured once from the construction token and never replaced. When derivation failed
/// the handle is *degraded*: construction still succeeds, and every later
/// [`attach`](Self::attach) reports [`BridgeError::RuntimeUnavailable`].
#[derive(Debug)]
pub struct RuntimeHandle<R> {
    runtime: Option<R>,
}

impl<R: ForeignRuntime> RuntimeHandle<R> {
    /// Wraps an already-derived runtime.
    #[must_use]
    pub fn new(runtime: R) -> Self {
        Self { runtime: Some(runtime) }
    }

    /// A handle with no runtime behind it.
    #[must_use]
    pub fn degraded() -> Self {
        Self { runtime: None }
    }

    /// Derives the handle from an entry token, logging and degrading on failure.
    pub fn derive<E>(env: &mut E, logger: &impl BridgeLogger) -> Self
    where
        E: ForeignEnv<Runtime = R>,
    {
        match env.runtime() {
            Ok(runtime) => Self::new(runtime),
            Err(error) => {
                logger.log_error("Failed to get foreign runtime handle", Some(&error));
                Self::degraded()
            }
        }
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.runtime.is_none()
    }

    #[must_use]
    pub fn runtime(&self) -> Option<&R> {
        self.runtime.as_ref()
    }

    /// Re-derives an entry token for the calling thread and runs `f` with it.
    pub fn attach<T>(&self, f: impl for<'env> FnOnce(&mut R::Env<'env>) -> T) -> BridgeResult<T> {
        self.runtime.as_ref().ok_or(BridgeError::RuntimeUnavailable)?.attach(f)
    }
}
