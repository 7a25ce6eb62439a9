use std::sync::{Arc, RwLock};

use crate::{
    ast::{FnLiteral, Param, Stmt},
    env::EnvRef,
    sync,
    value::TypeTag,
};

/// A runtime function value: parameter list, optional return tag, async
/// flag, shared body AST, and the captured closure environment.
///
/// The captured environment lives in a detachable slot. A function stored in
/// the scope that defined it is the runtime's only structural reference
/// cycle; the pre-release cycle-break pass severs it by taking the slot.
#[derive(Debug)]
pub(crate) struct Function {
    name: Option<String>,
    pub params: Vec<Param>,
    pub ret: Option<TypeTag>,
    pub is_async: bool,
    pub body: Arc<[Stmt]>,
    captured: RwLock<Option<EnvRef>>,
}

impl Function {
    /// Instantiates a function literal, capturing the environment it was
    /// evaluated in. The body AST is shared with the literal, so repeated
    /// evaluation of the same literal is cheap.
    pub fn from_literal(lit: &FnLiteral, env: &EnvRef) -> Arc<Self> {
        Arc::new(Self {
            name: lit.name.clone(),
            params: lit.params.clone(),
            ret: lit.ret,
            is_async: lit.is_async,
            body: lit.body.clone(),
            captured: RwLock::new(Some(env.clone())),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The function's display name for diagnostics.
    pub fn describe(&self) -> String {
        match &self.name {
            Some(name) => format!("fn {name}"),
            None => "anonymous fn".to_owned(),
        }
    }

    /// The captured closure environment, if still attached.
    pub fn captured(&self) -> Option<EnvRef> {
        sync::read(&self.captured).clone()
    }

    /// Detaches and returns the captured environment. Called by the
    /// cycle-break pass; after this the function can no longer resolve
    /// captured names.
    pub fn detach_captured(&self) -> Option<EnvRef> {
        sync::write(&self.captured).take()
    }
}
