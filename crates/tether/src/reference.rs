//! Retained references to one foreign context object.

use crate::{
    binding::ContextBinding,
    error::{BridgeError, BridgeResult},
    runtime::{ForeignEnv, ValueKind},
};

/// The retained context object and its two identity strings.
///
/// All three references are acquired by [`acquire`](Self::acquire) and released together
/// when the value is dropped. There is no way to release one of them on its own.
///
/// Managed-side copies of both identity strings are read once during acquisition, so the
/// identifiers stay readable without entering the foreign runtime and never change even if
/// the foreign fields are later reassigned.
#[derive(Debug)]
pub struct ContextReferences<G> {
    object: G,
    context_id_ref: G,
    evaluator_id_ref: G,
    context_id: String,
    evaluator_id: String,
}

impl<G> ContextReferences<G> {
    /// Resolves the identity fields of `context` and retains it along with both strings.
    ///
    /// Every lookup and string read happens before the first retain, so a failure here
    /// returns without having retained anything.
    pub fn acquire<E>(env: &mut E, context: &E::Local, binding: &ContextBinding) -> BridgeResult<Self>
    where
        E: ForeignEnv<Global = G>,
    {
        let class = env.class_of(context)?;
        let (context_id_local, context_id) = read_string_field(env, &class, context, &binding.context_id_field)?;
        let (evaluator_id_local, evaluator_id) =
            read_string_field(env, &class, context, &binding.evaluator_id_field)?;

        let object = env.retain(context)?;
        let context_id_ref = env.retain(&context_id_local)?;
        let evaluator_id_ref = env.retain(&evaluator_id_local)?;

        Ok(Self {
            object,
            context_id_ref,
            evaluator_id_ref,
            context_id,
            evaluator_id,
        })
    }

    /// The retained context object.
    #[must_use]
    pub fn object(&self) -> &G {
        &self.object
    }

    /// The retained foreign `contextId` string.
    #[must_use]
    pub fn context_id_ref(&self) -> &G {
        &self.context_id_ref
    }

    /// The retained foreign `evaluatorId` string.
    #[must_use]
    pub fn evaluator_id_ref(&self) -> &G {
        &self.evaluator_id_ref
    }

    #[must_use]
    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    #[must_use]
    pub fn evaluator_id(&self) -> &str {
        &self.evaluator_id
    }
}

/// Reads a declared string field, returning both the foreign local and its managed copy.
fn read_string_field<E: ForeignEnv>(
    env: &mut E,
    class: &E::Class,
    object: &E::Local,
    name: &str,
) -> BridgeResult<(E::Local, String)> {
    let field = env
        .field(class, name, ValueKind::String)
        .ok_or_else(|| BridgeError::FieldNotFound {
            name: name.to_owned(),
            kind: ValueKind::String,
        })?;
    let local = env.get_field(object, &field)?;
    let value = env.read_string(&local)?;
    Ok((local, value))
}
