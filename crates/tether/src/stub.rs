//! An in-memory foreign runtime with reference-count instrumentation.
//!
//! [`StubRuntime`] implements [`ForeignRuntime`] over a tiny object heap: classes declare
//! string fields and methods with fixed behaviours, instances hold field values, and
//! every boundary event is counted. It exists to exercise proxies without a real foreign
//! runtime:
//!
//! - retains and releases per object ([`retain_count`](StubRuntime::retain_count),
//!   [`release_count`](StubRuntime::release_count), [`live_globals`](StubRuntime::live_globals))
//! - entry-token derivations ([`attach_count`](StubRuntime::attach_count))
//! - method invocations with marshalled arguments ([`invocations`](StubRuntime::invocations))
//! - forced failures ([`fail_runtime_derivation`](StubRuntime::fail_runtime_derivation),
//!   [`fail_attach`](StubRuntime::fail_attach)) and post-construction mutation
//!   ([`set_field`](StubRuntime::set_field), [`remove_method`](StubRuntime::remove_method))
//! - methods that park the calling thread on a [`StubGate`] until the test opens it
//!
//! ```
//! use tether::{NoopLogger, stub::{StubClass, StubRuntime}};
//!
//! let runtime = StubRuntime::new();
//! runtime.define_class(StubClass::active_context());
//! let context = runtime.instantiate("ActiveContext", &[("contextId", "ctx-1"), ("evaluatorId", "eval-9")]);
//!
//! let proxy = runtime.active_context(context, NoopLogger).unwrap();
//! proxy.submit_task("cfg-xyz").unwrap();
//! assert_eq!(runtime.invocations_of("submitTaskString")[0].args, ["cfg-xyz"]);
//! ```

use std::{
    collections::HashMap,
    fmt,
    marker::PhantomData,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
};

use crate::{
    binding::ContextBinding,
    context::ActiveContext,
    error::{BridgeError, BridgeResult},
    logger::BridgeLogger,
    runtime::{ForeignEnv, ForeignRuntime, Signature, ValueKind},
};

/// Class name given to every stub string.
pub const STRING_CLASS: &str = "String";

/// Descriptor returned by [`StubClass::active_context`].
pub const DEFAULT_DESCRIPTOR: &str = "IP=127.0.0.1, Port=5000, HostName=localhost, Memory=512, Core=1";

/// Identity of a stub heap object; also the stub's local reference type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(usize);

/// What a stub method does when invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubBehavior {
    /// Records the invocation and returns nothing.
    Record,
    /// Records the invocation and returns a fresh string.
    Return(String),
    /// Records the invocation and raises a foreign exception with this message.
    Throw(String),
    /// Records the invocation, then blocks until the gate is opened. Returns nothing.
    Block(StubGate),
}

#[derive(Debug, Default)]
struct GateState {
    open: bool,
    arrivals: usize,
}

/// A latch that blocking stub methods wait on.
///
/// Clones share the latch. Equality is identity.
#[derive(Debug, Clone, Default)]
pub struct StubGate {
    inner: Arc<(Mutex<GateState>, Condvar)>,
}

impl StubGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the gate, releasing every current and future waiter.
    pub fn open(&self) {
        let (state, signal) = &*self.inner;
        state.lock().unwrap_or_else(PoisonError::into_inner).open = true;
        signal.notify_all();
    }

    /// Blocks until at least `count` calls have reached the gate.
    pub fn wait_for_arrivals(&self, count: usize) {
        let (state, signal) = &*self.inner;
        let guard = state.lock().unwrap_or_else(PoisonError::into_inner);
        drop(
            signal
                .wait_while(guard, |state| state.arrivals < count)
                .unwrap_or_else(PoisonError::into_inner),
        );
    }

    fn pass(&self) {
        let (state, signal) = &*self.inner;
        let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
        guard.arrivals += 1;
        signal.notify_all();
        drop(
            signal
                .wait_while(guard, |state| !state.open)
                .unwrap_or_else(PoisonError::into_inner),
        );
    }
}

impl PartialEq for StubGate {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for StubGate {}

#[derive(Debug, Clone)]
struct StubMethod {
    signature: Signature,
    behavior: StubBehavior,
}

/// A stub class: declared fields and methods.
#[derive(Debug, Clone)]
pub struct StubClass {
    name: String,
    fields: HashMap<String, ValueKind>,
    methods: HashMap<String, StubMethod>,
}

impl StubClass {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: HashMap::new(),
            methods: HashMap::new(),
        }
    }

    /// A class named `ActiveContext` declaring every member of the default binding.
    #[must_use]
    pub fn active_context() -> Self {
        let binding = ContextBinding::default();
        Self::new("ActiveContext")
            .string_field(binding.context_id_field)
            .string_field(binding.evaluator_id_field)
            .method(binding.submit_task_method, Signature::string_consumer(), StubBehavior::Record)
            .method(binding.close_method, Signature::nullary(), StubBehavior::Record)
            .method(binding.on_error_method, Signature::string_consumer(), StubBehavior::Record)
            .method(
                binding.evaluator_descriptor_method,
                Signature::string_supplier(),
                StubBehavior::Return(DEFAULT_DESCRIPTOR.to_owned()),
            )
    }

    /// Declares a string field.
    #[must_use]
    pub fn string_field(mut self, name: impl Into<String>) -> Self {
        self.fields.insert(name.into(), ValueKind::String);
        self
    }

    /// Declares (or replaces) a method.
    #[must_use]
    pub fn method(mut self, name: impl Into<String>, signature: Signature, behavior: StubBehavior) -> Self {
        self.methods.insert(name.into(), StubMethod { signature, behavior });
        self
    }

    /// Removes a declared method.
    #[must_use]
    pub fn without_method(mut self, name: &str) -> Self {
        self.methods.remove(name);
        self
    }
}

/// One recorded method invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub object: ObjectId,
    pub method: String,
    /// Arguments read back as managed strings.
    pub args: Vec<String>,
}

#[derive(Debug)]
enum StubValue {
    String(String),
    Instance {
        class: String,
        fields: HashMap<String, ObjectId>,
    },
}

#[derive(Debug)]
struct StubObject {
    value: StubValue,
    retains: usize,
    releases: usize,
}

#[derive(Debug, Default)]
struct StubHeap {
    objects: Vec<StubObject>,
    classes: HashMap<String, StubClass>,
    invocations: Vec<Invocation>,
    attaches: usize,
    fail_derivation: bool,
    fail_attach: bool,
}

impl StubHeap {
    fn alloc(&mut self, value: StubValue) -> ObjectId {
        self.objects.push(StubObject {
            value,
            retains: 0,
            releases: 0,
        });
        ObjectId(self.objects.len() - 1)
    }

    /// Ids minted by another runtime are reported, not indexed blindly.
    fn object(&self, id: ObjectId) -> BridgeResult<&StubObject> {
        self.objects.get(id.0).ok_or_else(|| unknown_object(id))
    }

    fn object_mut(&mut self, id: ObjectId) -> BridgeResult<&mut StubObject> {
        self.objects.get_mut(id.0).ok_or_else(|| unknown_object(id))
    }

    fn class_name(&self, id: ObjectId) -> BridgeResult<&str> {
        Ok(match &self.object(id)?.value {
            StubValue::String(_) => STRING_CLASS,
            StubValue::Instance { class, .. } => class,
        })
    }

    fn string(&self, id: ObjectId) -> BridgeResult<String> {
        match &self.object(id)?.value {
            StubValue::String(value) => Ok(value.clone()),
            StubValue::Instance { class, .. } => Err(BridgeError::TypeMismatch {
                expected: ValueKind::String,
                got: class.clone(),
            }),
        }
    }
}

fn unknown_object(id: ObjectId) -> BridgeError {
    BridgeError::TypeMismatch {
        expected: ValueKind::Object,
        got: format!("unknown object #{}", id.0),
    }
}

fn signed(count: usize) -> isize {
    isize::try_from(count).unwrap_or(isize::MAX)
}

/// In-memory foreign runtime. Clones share one heap.
#[derive(Debug, Clone, Default)]
pub struct StubRuntime {
    heap: Arc<Mutex<StubHeap>>,
}

impl StubRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a class.
    pub fn define_class(&self, class: StubClass) {
        self.lock().classes.insert(class.name.clone(), class);
    }

    /// Allocates an instance of `class` with string field values.
    ///
    /// Values are stored whether or not the class declares the field; lookups through
    /// [`ForeignEnv::field`] only see declared fields.
    pub fn instantiate(&self, class: &str, fields: &[(&str, &str)]) -> ObjectId {
        let mut heap = self.lock();
        let fields = fields
            .iter()
            .map(|(name, value)| ((*name).to_owned(), heap.alloc(StubValue::String((*value).to_owned()))))
            .collect();
        heap.alloc(StubValue::Instance {
            class: class.to_owned(),
            fields,
        })
    }

    /// Reassigns a string field of an instance to a freshly allocated string.
    pub fn set_field(&self, object: ObjectId, name: &str, value: &str) -> BridgeResult<()> {
        let mut heap = self.lock();
        // Check before allocating so an unknown id leaves the heap untouched.
        heap.object(object)?;
        let string = heap.alloc(StubValue::String(value.to_owned()));
        match &mut heap.object_mut(object)?.value {
            StubValue::Instance { fields, .. } => {
                fields.insert(name.to_owned(), string);
                Ok(())
            }
            StubValue::String(_) => Err(BridgeError::TypeMismatch {
                expected: ValueKind::Object,
                got: STRING_CLASS.to_owned(),
            }),
        }
    }

    /// The object currently stored in a field, if any.
    #[must_use]
    pub fn field_value(&self, object: ObjectId, name: &str) -> Option<ObjectId> {
        match &self.lock().object(object).ok()?.value {
            StubValue::Instance { fields, .. } => fields.get(name).copied(),
            StubValue::String(_) => None,
        }
    }

    /// Removes a method from a registered class.
    pub fn remove_method(&self, class: &str, method: &str) {
        if let Some(class) = self.lock().classes.get_mut(class) {
            class.methods.remove(method);
        }
    }

    /// Makes every later [`ForeignEnv::runtime`] call fail.
    pub fn fail_runtime_derivation(&self, fail: bool) {
        self.lock().fail_derivation = fail;
    }

    /// Makes every later [`ForeignRuntime::attach`] call fail.
    pub fn fail_attach(&self, fail: bool) {
        self.lock().fail_attach = fail;
    }

    /// Builds a proxy over `context` with the default binding.
    pub fn active_context<L: BridgeLogger>(
        &self,
        context: ObjectId,
        logger: L,
    ) -> BridgeResult<ActiveContext<Self, L>> {
        self.active_context_with(context, ContextBinding::default(), logger)
    }

    /// Builds a proxy over `context` with a custom binding.
    ///
    /// Construction uses an entry token handed out directly, so it works even when
    /// [`fail_attach`](Self::fail_attach) is set.
    pub fn active_context_with<L: BridgeLogger>(
        &self,
        context: ObjectId,
        binding: ContextBinding,
        logger: L,
    ) -> BridgeResult<ActiveContext<Self, L>> {
        let mut env = StubEnv::new(self);
        ActiveContext::with_binding(&mut env, &context, binding, logger)
    }

    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.lock().invocations.clone()
    }

    #[must_use]
    pub fn invocations_of(&self, method: &str) -> Vec<Invocation> {
        self.lock()
            .invocations
            .iter()
            .filter(|invocation| invocation.method == method)
            .cloned()
            .collect()
    }

    /// Zero for an id this runtime never allocated.
    #[must_use]
    pub fn retain_count(&self, object: ObjectId) -> usize {
        self.lock().object(object).map_or(0, |object| object.retains)
    }

    /// Zero for an id this runtime never allocated.
    #[must_use]
    pub fn release_count(&self, object: ObjectId) -> usize {
        self.lock().object(object).map_or(0, |object| object.releases)
    }

    /// Retains minus releases across the whole heap. Negative after a double release.
    #[must_use]
    pub fn live_globals(&self) -> isize {
        self.lock()
            .objects
            .iter()
            .map(|object| signed(object.retains) - signed(object.releases))
            .sum()
    }

    /// Total retains across the whole heap.
    #[must_use]
    pub fn total_retains(&self) -> usize {
        self.lock().objects.iter().map(|object| object.retains).sum()
    }

    /// Number of successful [`ForeignRuntime::attach`] calls.
    #[must_use]
    pub fn attach_count(&self) -> usize {
        self.lock().attaches
    }

    fn lock(&self) -> MutexGuard<'_, StubHeap> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ForeignRuntime for StubRuntime {
    type Global = StubGlobal;
    type Env<'env> = StubEnv<'env>;

    fn attach<T>(&self, f: impl for<'env> FnOnce(&mut Self::Env<'env>) -> T) -> BridgeResult<T> {
        {
            let mut heap = self.lock();
            if heap.fail_attach {
                return Err(BridgeError::Attach("stub runtime refused to attach".to_owned()));
            }
            heap.attaches += 1;
        }
        Ok(f(&mut StubEnv::new(self)))
    }
}

/// Retained reference into a [`StubRuntime`] heap. Dropping it records one release.
pub struct StubGlobal {
    id: ObjectId,
    heap: Arc<Mutex<StubHeap>>,
}

impl StubGlobal {
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }
}

impl fmt::Debug for StubGlobal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StubGlobal").field(&self.id).finish()
    }
}

impl Drop for StubGlobal {
    fn drop(&mut self) {
        let mut heap = self.heap.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(object) = heap.object_mut(self.id) {
            object.releases += 1;
        }
    }
}

/// Entry token for a [`StubRuntime`]. Not `Send`, like a real per-thread token.
#[derive(Debug)]
pub struct StubEnv<'env> {
    runtime: &'env StubRuntime,
    _not_send: PhantomData<*const ()>,
}

impl<'env> StubEnv<'env> {
    fn new(runtime: &'env StubRuntime) -> Self {
        Self {
            runtime,
            _not_send: PhantomData,
        }
    }
}

impl ForeignEnv for StubEnv<'_> {
    type Runtime = StubRuntime;
    type Local = ObjectId;
    type Global = StubGlobal;
    type Class = String;
    type Field = String;
    type Method = String;

    fn runtime(&mut self) -> BridgeResult<StubRuntime> {
        if self.runtime.lock().fail_derivation {
            return Err(BridgeError::RuntimeUnavailable);
        }
        Ok(self.runtime.clone())
    }

    fn class_of(&mut self, object: &ObjectId) -> BridgeResult<String> {
        Ok(self.runtime.lock().class_name(*object)?.to_owned())
    }

    fn field(&mut self, class: &String, name: &str, kind: ValueKind) -> Option<String> {
        let heap = self.runtime.lock();
        let declared = heap.classes.get(class)?.fields.get(name)?;
        (*declared == kind).then(|| name.to_owned())
    }

    fn get_field(&mut self, object: &ObjectId, field: &String) -> BridgeResult<ObjectId> {
        let heap = self.runtime.lock();
        match &heap.object(*object)?.value {
            StubValue::Instance { fields, .. } => fields.get(field).copied().ok_or_else(|| BridgeError::FieldNotFound {
                name: field.clone(),
                kind: ValueKind::String,
            }),
            StubValue::String(_) => Err(BridgeError::TypeMismatch {
                expected: ValueKind::Object,
                got: STRING_CLASS.to_owned(),
            }),
        }
    }

    fn method(&mut self, class: &String, name: &str, signature: &Signature) -> Option<String> {
        let heap = self.runtime.lock();
        let method = heap.classes.get(class)?.methods.get(name)?;
        (method.signature == *signature).then(|| name.to_owned())
    }

    fn call(&mut self, object: &ObjectId, method: &String, args: &[ObjectId]) -> BridgeResult<Option<ObjectId>> {
        let mut heap = self.runtime.lock();
        let class = heap.class_name(*object)?.to_owned();
        let behavior = heap
            .classes
            .get(&class)
            .and_then(|class| class.methods.get(method))
            .map(|method| method.behavior.clone())
            .ok_or_else(|| BridgeError::Foreign(format!("no method `{method}` on `{class}`")))?;
        let args = args.iter().map(|arg| heap.string(*arg)).collect::<BridgeResult<Vec<_>>>()?;
        heap.invocations.push(Invocation {
            object: *object,
            method: method.clone(),
            args,
        });
        match behavior {
            StubBehavior::Record => Ok(None),
            StubBehavior::Return(value) => Ok(Some(heap.alloc(StubValue::String(value)))),
            StubBehavior::Throw(message) => Err(BridgeError::Foreign(message)),
            StubBehavior::Block(gate) => {
                // the heap stays usable while this call is parked
                drop(heap);
                gate.pass();
                Ok(None)
            }
        }
    }

    fn new_string(&mut self, value: &str) -> BridgeResult<ObjectId> {
        Ok(self.runtime.lock().alloc(StubValue::String(value.to_owned())))
    }

    fn read_string(&mut self, string: &ObjectId) -> BridgeResult<String> {
        self.runtime.lock().string(*string)
    }

    fn retain(&mut self, object: &ObjectId) -> BridgeResult<StubGlobal> {
        self.runtime.lock().object_mut(*object)?.retains += 1;
        Ok(StubGlobal {
            id: *object,
            heap: Arc::clone(&self.runtime.heap),
        })
    }

    fn local(&mut self, global: &StubGlobal) -> ObjectId {
        global.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retain_and_release_are_counted() {
        let runtime = StubRuntime::new();
        let object = runtime.instantiate("Thing", &[]);
        let global = runtime.attach(|env| env.retain(&object)).unwrap().unwrap();
        assert_eq!(runtime.retain_count(object), 1);
        assert_eq!(runtime.live_globals(), 1);
        drop(global);
        assert_eq!(runtime.release_count(object), 1);
        assert_eq!(runtime.live_globals(), 0);
    }

    #[test]
    fn undeclared_field_is_invisible() {
        let runtime = StubRuntime::new();
        runtime.define_class(StubClass::new("Thing"));
        let object = runtime.instantiate("Thing", &[("name", "x")]);
        let found = runtime
            .attach(|env| {
                let class = env.class_of(&object).unwrap();
                env.field(&class, "name", ValueKind::String)
            })
            .unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn method_lookup_checks_signature() {
        let runtime = StubRuntime::new();
        runtime.define_class(StubClass::active_context());
        let object = runtime.instantiate("ActiveContext", &[]);
        let (exact, wrong) = runtime
            .attach(|env| {
                let class = env.class_of(&object).unwrap();
                (
                    env.method(&class, "close", &Signature::nullary()),
                    env.method(&class, "close", &Signature::string_consumer()),
                )
            })
            .unwrap();
        assert_eq!(exact.as_deref(), Some("close"));
        assert_eq!(wrong, None);
    }

    #[test]
    fn double_release_shows_as_negative_live_count() {
        let runtime = StubRuntime::new();
        let object = runtime.instantiate("Thing", &[]);
        drop(runtime.attach(|env| env.retain(&object)).unwrap().unwrap());
        runtime.lock().object_mut(object).unwrap().releases += 1;

        assert_eq!(runtime.release_count(object), 2);
        assert_eq!(runtime.live_globals(), -1);
    }

    #[test]
    fn foreign_object_id_is_rejected() {
        let runtime = StubRuntime::new();
        let other = StubRuntime::new();
        other.instantiate("Thing", &[]);
        let stranger = other.instantiate("Thing", &[("name", "x")]);

        assert_eq!(runtime.retain_count(stranger), 0);
        assert_eq!(runtime.field_value(stranger, "name"), None);
        assert!(matches!(
            runtime.set_field(stranger, "name", "y"),
            Err(BridgeError::TypeMismatch { .. })
        ));
        let err = runtime.attach(|env| env.retain(&stranger)).unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::TypeMismatch { ref got, .. } if got == "unknown object #2"));
    }

    #[test]
    fn blocked_call_waits_for_gate() {
        let gate = StubGate::new();
        let runtime = StubRuntime::new();
        runtime.define_class(StubClass::new("Thing").method(
            "wait",
            Signature::nullary(),
            StubBehavior::Block(gate.clone()),
        ));
        let object = runtime.instantiate("Thing", &[]);

        let caller = {
            let runtime = runtime.clone();
            std::thread::spawn(move || {
                runtime
                    .attach(|env| env.call(&object, &"wait".to_owned(), &[]))
                    .unwrap()
            })
        };
        gate.wait_for_arrivals(1);
        assert_eq!(runtime.invocations_of("wait").len(), 1);
        assert!(!caller.is_finished());

        gate.open();
        assert_eq!(caller.join().unwrap(), Ok(None));
    }

    #[test]
    fn attach_failure_is_reported_and_not_counted() {
        let runtime = StubRuntime::new();
        runtime.fail_attach(true);
        let err = runtime.attach(|_| ()).unwrap_err();
        assert!(matches!(err, BridgeError::Attach(_)));
        assert_eq!(runtime.attach_count(), 0);
    }
}
