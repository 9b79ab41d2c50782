//! Foreign runtime abstraction.
//!
//! Two traits model the boundary the proxy crosses:
//!
//! | Trait | Role | Thread affinity |
//! |-------|------|-----------------|
//! | [`ForeignRuntime`] | runtime-wide singleton, captured once | `Send + Sync` |
//! | [`ForeignEnv`] | entry token for one call on one thread | not `Send` |
//!
//! An entry token is never stored. Every operation asks the runtime for a fresh one via
//! [`ForeignRuntime::attach`] and does all of its work inside the closure, so the token
//! cannot outlive the call or migrate to another thread.
//!
//! References come in two flavours. A [`ForeignEnv::Local`] is only valid inside the
//! current attach scope. A [`ForeignEnv::Global`] is retained: the foreign collector
//! will not reclaim the referent until the value is dropped, and dropping it performs
//! the matching release exactly once.

use std::fmt;

use crate::error::{BridgeError, BridgeResult};

/// Kind of a value crossing the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Foreign string.
    String,
    /// Any other foreign object.
    Object,
    /// No value; only valid as a return kind.
    Void,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Object => f.write_str("object"),
            Self::Void => f.write_str("void"),
        }
    }
}

/// Parameter and return kinds of a foreign method.
///
/// Method identity is the pair `(name, signature)`; backends use the signature to reject
/// members that exist under the right name but have the wrong shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    params: Vec<ValueKind>,
    returns: ValueKind,
}

impl Signature {
    /// Creates a signature from parameter kinds and a return kind.
    #[must_use]
    pub fn new(params: impl Into<Vec<ValueKind>>, returns: ValueKind) -> Self {
        Self {
            params: params.into(),
            returns,
        }
    }

    /// `() -> void`
    #[must_use]
    pub fn nullary() -> Self {
        Self::new(Vec::new(), ValueKind::Void)
    }

    /// `(string) -> void`
    #[must_use]
    pub fn string_consumer() -> Self {
        Self::new(vec![ValueKind::String], ValueKind::Void)
    }

    /// `() -> string`
    #[must_use]
    pub fn string_supplier() -> Self {
        Self::new(Vec::new(), ValueKind::String)
    }

    #[must_use]
    pub fn params(&self) -> &[ValueKind] {
        &self.params
    }

    #[must_use]
    pub fn returns(&self) -> ValueKind {
        self.returns
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, ") -> {}", self.returns)
    }
}

/// The runtime-wide handle to a foreign runtime.
///
/// Implementations are cheap to clone or are themselves zero-sized; the proxy captures one
/// at construction and keeps it for its whole lifetime.
pub trait ForeignRuntime: fmt::Debug + Send + Sync + Sized {
    /// Retained reference type shared by every entry token of this runtime.
    type Global: Send + Sync;

    /// Entry token type. Borrowed for `'env`, which is the attach scope.
    type Env<'env>: ForeignEnv<Runtime = Self, Global = Self::Global>;

    /// Derives a fresh entry token for the calling thread and runs `f` with it.
    ///
    /// The token is only valid inside `f`. Implementations attach the thread to the
    /// foreign runtime if needed.
    fn attach<T>(&self, f: impl for<'env> FnOnce(&mut Self::Env<'env>) -> T) -> BridgeResult<T>;
}

/// An entry token into a foreign runtime, valid for a single call on a single thread.
pub trait ForeignEnv {
    /// The runtime this token was derived from.
    type Runtime: ForeignRuntime;
    /// Reference valid only within the current attach scope.
    type Local;
    /// Retained reference, released when dropped.
    type Global: Send + Sync;
    /// Resolved class of an object.
    type Class;
    /// Resolved field identity.
    type Field;
    /// Resolved method identity.
    type Method;

    /// Derives the runtime-wide handle from this token.
    fn runtime(&mut self) -> BridgeResult<Self::Runtime>;

    /// Resolves the class of `object`.
    fn class_of(&mut self, object: &Self::Local) -> BridgeResult<Self::Class>;

    /// Resolves a declared field. Returns `None` when the class has no such field.
    fn field(&mut self, class: &Self::Class, name: &str, kind: ValueKind) -> Option<Self::Field>;

    /// Reads a resolved field of `object`.
    fn get_field(&mut self, object: &Self::Local, field: &Self::Field) -> BridgeResult<Self::Local>;

    /// Resolves a method by name and signature. Returns `None` when the class has no
    /// matching method.
    fn method(&mut self, class: &Self::Class, name: &str, signature: &Signature) -> Option<Self::Method>;

    /// Invokes a resolved method on `object`.
    ///
    /// Returns `Ok(None)` for void methods or a null result.
    fn call(
        &mut self,
        object: &Self::Local,
        method: &Self::Method,
        args: &[Self::Local],
    ) -> BridgeResult<Option<Self::Local>>;

    /// Marshals a managed string into a foreign string.
    fn new_string(&mut self, value: &str) -> BridgeResult<Self::Local>;

    /// Marshals a foreign string back into a managed string.
    fn read_string(&mut self, string: &Self::Local) -> BridgeResult<String>;

    /// Retains `object` beyond the current attach scope.
    fn retain(&mut self, object: &Self::Local) -> BridgeResult<Self::Global>;

    /// Borrows a retained reference as a local one for the current attach scope.
    fn local(&mut self, global: &Self::Global) -> Self::Local;
}

/// Convenience alias for the local reference type of a runtime's entry token.
pub type LocalOf<'env, R> = <<R as ForeignRuntime>::Env<'env> as ForeignEnv>::Local;

/// Resolves `name` with `signature` on the class of `object`.
///
/// Method identity is looked up on every call and never cached, so a method removed from
/// the foreign class after a proxy was built is reported as missing on the next call.
pub fn resolve_method<E: ForeignEnv>(
    env: &mut E,
    object: &E::Local,
    name: &str,
    signature: &Signature,
) -> BridgeResult<E::Method> {
    let class = env.class_of(object)?;
    env.method(&class, name, signature)
        .ok_or_else(|| BridgeError::MethodNotFound {
            name: name.to_owned(),
            signature: signature.clone(),
        })
}
