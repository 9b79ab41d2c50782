//! Cross-boundary error reporting.

use crate::{
    error::BridgeResult,
    handle::RuntimeHandle,
    logger::BridgeLogger,
    runtime::{ForeignEnv, ForeignRuntime, Signature, resolve_method},
};

/// Delivers `message` to the foreign `origin` object through its `(string) -> void`
/// error method.
///
/// Every failure is returned to the caller: a degraded handle, a missing error method
/// and an exception thrown by the foreign handler all surface as `Err`.
pub fn report_error<R: ForeignRuntime>(
    handle: &RuntimeHandle<R>,
    message: &str,
    origin: &R::Global,
    method: &str,
    logger: &impl BridgeLogger,
) -> BridgeResult<()> {
    logger.log_start("ReportError");
    handle.attach(|env| {
        let object = env.local(origin);
        let method_id = resolve_method(env, &object, method, &Signature::string_consumer())?;
        let message = env.new_string(message)?;
        env.call(&object, &method_id, &[message]).map(drop)
    })??;
    logger.log_stop("ReportError");
    Ok(())
}
