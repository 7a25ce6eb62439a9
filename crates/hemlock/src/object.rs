use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    ast::{Expr, FieldDef},
    env::EnvRef,
    value::{TypeTag, Value},
};

/// An object payload: ordered `(name, value)` fields plus the nominal type
/// name when the object was instantiated from a `define object` template.
#[derive(Debug)]
pub(crate) struct Object {
    pub type_name: Option<String>,
    pub fields: IndexMap<String, Value>,
}

impl Object {
    pub fn new(type_name: Option<String>) -> Self {
        Self {
            type_name,
            fields: IndexMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.fields.get(name).cloned()
    }

    /// Sets a field, inserting it at the end when new.
    pub fn set(&mut self, name: &str, value: Value) {
        self.fields.insert(name.to_owned(), value);
    }
}

/// A non-method field of a nominal type template.
#[derive(Debug, Clone)]
pub(crate) struct TemplateField {
    pub name: String,
    /// Whether the field may be omitted at instantiation. Fields with a
    /// default are always optional.
    pub optional: bool,
    pub tag: Option<TypeTag>,
    /// Default expression, evaluated in the definition's scope when the
    /// field is omitted.
    pub default: Option<Expr>,
}

/// A nominal type registered by `define object`: field templates, the
/// method table, and the definition scope defaults evaluate in.
///
/// Fields whose declared default is a function literal become methods: they
/// are evaluated once at definition time and dispatched through the per-type
/// method table rather than copied onto every instance.
#[derive(Debug)]
pub(crate) struct ObjectTemplate {
    pub name: String,
    pub fields: Vec<TemplateField>,
    pub methods: AHashMap<String, Value>,
    /// The scope `define object` executed in.
    pub env: EnvRef,
}

impl ObjectTemplate {
    /// Looks up a method on this type's dispatch table.
    pub fn method(&self, name: &str) -> Option<Value> {
        self.methods.get(name).cloned()
    }

    /// Splits declaration fields into value fields and method candidates.
    /// Returns `(value_fields, method_defs)`.
    pub fn partition_fields(fields: Vec<FieldDef>) -> (Vec<TemplateField>, Vec<(String, Expr)>) {
        let mut value_fields = Vec::new();
        let mut methods = Vec::new();
        for field in fields {
            match field.default {
                Some(expr) if matches!(expr.kind, crate::ast::ExprKind::FnLit(_)) => {
                    methods.push((field.name, expr));
                }
                default => value_fields.push(TemplateField {
                    name: field.name,
                    optional: field.optional || default.is_some(),
                    tag: field.tag,
                    default,
                }),
            }
        }
        (value_fields, methods)
    }
}
