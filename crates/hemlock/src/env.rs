use std::sync::{Arc, RwLock};

use ahash::AHashSet;

use crate::{
    sync,
    value::{CoerceFailure, TypeTag, Value},
};

/// Shared owning reference to a lexical scope.
pub(crate) type EnvRef = Arc<Environment>;

/// Why a `set` could not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindError {
    /// No binding with that name in any enclosing scope.
    Undefined,
    /// The innermost binding was declared `const`.
    Const,
    /// The binding is typed and the value failed to coerce into its tag.
    Coerce(CoerceFailure, TypeTag),
}

#[derive(Debug)]
struct Binding {
    name: String,
    value: Value,
    is_const: bool,
    /// Declared tag for typed bindings; assignments coerce (and
    /// range-check) against it. Untyped bindings store values verbatim.
    tag: Option<TypeTag>,
}

/// A lexical scope: a vector of `(name, value, const)` entries plus an owning
/// reference to the parent scope.
///
/// `define` appends without deduplication — a later entry shadows an earlier
/// one within the same scope, and lookups scan back-to-front so shadowing
/// works out naturally. A closure retains its defining scope through this
/// parent chain, which is what keeps captured bindings alive after the scope
/// exits.
#[derive(Debug)]
pub(crate) struct Environment {
    parent: Option<EnvRef>,
    bindings: RwLock<Vec<Binding>>,
}

impl Environment {
    /// Creates a scope with no parent (the builtin/global scope, or a module
    /// exports scope).
    pub fn root() -> EnvRef {
        Arc::new(Self {
            parent: None,
            bindings: RwLock::new(Vec::new()),
        })
    }

    /// Creates a child scope. Function entry, block entry, loop bodies, and
    /// `try`/`catch`/`finally` blocks each get one.
    pub fn child(parent: &EnvRef) -> EnvRef {
        Arc::new(Self {
            parent: Some(parent.clone()),
            bindings: RwLock::new(Vec::new()),
        })
    }

    pub fn define(&self, name: &str, value: Value, is_const: bool) {
        self.define_typed(name, value, is_const, None);
    }

    /// Defines a binding carrying a declared type tag. The caller has
    /// already coerced the initial value.
    pub fn define_typed(&self, name: &str, value: Value, is_const: bool, tag: Option<TypeTag>) {
        sync::write(&self.bindings).push(Binding {
            name: name.to_owned(),
            value,
            is_const,
            tag,
        });
    }

    /// Assigns to the innermost existing binding, walking parents. Typed
    /// bindings coerce the value into their declared tag first.
    pub fn set(&self, name: &str, value: Value) -> Result<(), BindError> {
        let mut env = self;
        loop {
            {
                let mut bindings = sync::write(&env.bindings);
                if let Some(binding) = bindings.iter_mut().rev().find(|b| b.name == name) {
                    if binding.is_const {
                        return Err(BindError::Const);
                    }
                    binding.value = match binding.tag {
                        Some(tag) => value.coerce(tag).map_err(|failure| BindError::Coerce(failure, tag))?,
                        None => value,
                    };
                    return Ok(());
                }
            }
            match &env.parent {
                Some(parent) => env = parent,
                None => return Err(BindError::Undefined),
            }
        }
    }

    /// Looks up a name, walking parents. The returned value is a retained
    /// copy owned by the caller.
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut env = self;
        loop {
            {
                let bindings = sync::read(&env.bindings);
                if let Some(binding) = bindings.iter().rev().find(|b| b.name == name) {
                    return Some(binding.value.clone());
                }
            }
            match &env.parent {
                Some(parent) => env = parent,
                None => return None,
            }
        }
    }

    /// True if this scope (not a parent) already binds `name`.
    pub fn has_local(&self, name: &str) -> bool {
        sync::read(&self.bindings).iter().any(|b| b.name == name)
    }

    /// Snapshot of this scope's own bindings, in definition order with
    /// shadowed entries collapsed to the latest definition.
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        let bindings = sync::read(&self.bindings);
        let mut out: Vec<(String, Value)> = Vec::with_capacity(bindings.len());
        for binding in bindings.iter() {
            if let Some(slot) = out.iter_mut().find(|(name, _)| *name == binding.name) {
                slot.1 = binding.value.clone();
            } else {
                out.push((binding.name.clone(), binding.value.clone()));
            }
        }
        out
    }

    /// Severs function→environment cycles reachable from this scope.
    ///
    /// A function defined in a scope and stored back into that scope forms
    /// the runtime's only structural cycle: the scope retains the function,
    /// the function's captured environment retains the scope. Before the
    /// root environment's final release we walk every reachable value and
    /// detach each function's captured-environment reference, which lets the
    /// normal reference-count teardown free everything.
    pub fn break_cycles(self: &EnvRef) {
        let mut seen_envs: AHashSet<usize> = AHashSet::new();
        let mut seen_payloads: AHashSet<usize> = AHashSet::new();
        let mut pending: Vec<EnvRef> = vec![self.clone()];
        while let Some(env) = pending.pop() {
            if !seen_envs.insert(Arc::as_ptr(&env) as usize) {
                continue;
            }
            let values: Vec<Value> = sync::read(&env.bindings).iter().map(|b| b.value.clone()).collect();
            for value in values {
                visit_value(&value, &mut seen_payloads, &mut pending);
            }
            if let Some(parent) = &env.parent {
                pending.push(parent.clone());
            }
        }
    }
}

/// Walks one value, detaching captured environments from functions and
/// recursing into containers. Detached environments are queued so functions
/// captured inside them are detached too.
pub(crate) fn visit_value(value: &Value, seen: &mut AHashSet<usize>, pending: &mut Vec<EnvRef>) {
    match value {
        Value::Function(func) => {
            if seen.insert(Arc::as_ptr(func) as usize)
                && let Some(env) = func.detach_captured()
            {
                pending.push(env);
            }
        }
        Value::Array(array) => {
            if seen.insert(Arc::as_ptr(array) as usize) {
                let items: Vec<Value> = sync::lock(array).items.clone();
                for item in &items {
                    visit_value(item, seen, pending);
                }
            }
        }
        Value::Object(object) => {
            if seen.insert(Arc::as_ptr(object) as usize) {
                let fields: Vec<Value> = sync::lock(object).fields.values().cloned().collect();
                for field in &fields {
                    visit_value(field, seen, pending);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_get_walks_parents() {
        let root = Environment::root();
        root.define("x", Value::I64(1), false);
        let child = Environment::child(&root);
        assert!(matches!(child.get("x"), Some(Value::I64(1))));
        assert!(child.get("y").is_none());
    }

    #[test]
    fn later_entries_shadow_earlier() {
        let env = Environment::root();
        env.define("x", Value::I64(1), false);
        env.define("x", Value::I64(2), false);
        assert!(matches!(env.get("x"), Some(Value::I64(2))));
    }

    #[test]
    fn set_rejects_const() {
        let root = Environment::root();
        root.define("k", Value::I64(1), true);
        let child = Environment::child(&root);
        assert_eq!(child.set("k", Value::I64(2)), Err(BindError::Const));
        assert_eq!(child.set("missing", Value::Null), Err(BindError::Undefined));
    }

    #[test]
    fn typed_binding_range_checks_on_assignment() {
        let env = Environment::root();
        env.define_typed("x", Value::U8(1), false, Some(TypeTag::U8));
        assert!(env.set("x", Value::I64(200)).is_ok());
        assert!(matches!(
            env.set("x", Value::I64(300)),
            Err(BindError::Coerce(CoerceFailure::Range, TypeTag::U8))
        ));
    }

    #[test]
    fn set_writes_innermost_binding() {
        let root = Environment::root();
        root.define("x", Value::I64(1), false);
        let child = Environment::child(&root);
        child.define("x", Value::I64(10), false);
        child.set("x", Value::I64(11)).unwrap();
        assert!(matches!(child.get("x"), Some(Value::I64(11))));
        assert!(matches!(root.get("x"), Some(Value::I64(1))));
    }
}
