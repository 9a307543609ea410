use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;

/// Ordered public field name → value, as returned to clients.
pub type Projection = IndexMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    #[error("property {0} does not exist")]
    PropertyMissing(String),
}

/// Read access to a stored entity, as seen by the projector.
pub trait EntityView {
    fn identifier(&self) -> Value;

    fn label(&self) -> Value;

    /// Value of a named property. A property that exists but is unset
    /// reads as `Value::Null`; one that does not exist is an error.
    fn get_property(&self, name: &str) -> Result<Value, ProjectionError>;
}

type DeriveFn = dyn Fn(&dyn EntityView) -> Value + Send + Sync;

/// A named function computing a field value from the whole entity.
#[derive(Clone)]
pub struct Derivation {
    name: String,
    func: Arc<DeriveFn>,
}

impl Derivation {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&dyn EntityView) -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, entity: &dyn EntityView) -> Value {
        (self.func)(entity)
    }
}

impl fmt::Debug for Derivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Derivation").field(&self.name).finish()
    }
}

#[derive(Debug, Clone)]
pub enum FieldSource {
    /// Read the named property; empty values are left out of the output.
    Property(String),
    /// Emit whatever the derivation returns, `null` included.
    Derived(Derivation),
}

/// Declarative public field map. Insertion order is response order.
#[derive(Debug, Clone, Default)]
pub struct FieldMap {
    fields: IndexMap<String, FieldSource>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose the property of the same name.
    pub fn field(self, public: &str) -> Self {
        self.property(public, public)
    }

    pub fn property(mut self, public: &str, property: &str) -> Self {
        self.fields
            .insert(public.to_string(), FieldSource::Property(property.to_string()));
        self
    }

    pub fn derived<F>(mut self, public: &str, name: &str, func: F) -> Self
    where
        F: Fn(&dyn EntityView) -> Value + Send + Sync + 'static,
    {
        self.fields.insert(
            public.to_string(),
            FieldSource::Derived(Derivation::new(name, func)),
        );
        self
    }

    /// Append `id`, `label` and `self` unless already declared. A resource
    /// that declares one of them keeps its own definition and position.
    pub fn with_entity_defaults(mut self) -> Self {
        self.fields
            .entry("id".to_string())
            .or_insert_with(|| {
                FieldSource::Derived(Derivation::new("getIdentifier", |e| e.identifier()))
            });
        self.fields
            .entry("label".to_string())
            .or_insert_with(|| FieldSource::Derived(Derivation::new("label", |e| e.label())));
        self.fields
            .entry("self".to_string())
            .or_insert_with(|| FieldSource::Property("url".to_string()));
        self
    }

    pub fn get(&self, public: &str) -> Option<&FieldSource> {
        self.fields.get(public)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Project `entity` through the map. When `allow` is non-empty, fields
    /// it does not name are skipped entirely.
    pub fn project(
        &self,
        entity: &dyn EntityView,
        allow: &[String],
    ) -> Result<Projection, ProjectionError> {
        let mut values = Projection::with_capacity(self.fields.len());

        for (public, source) in &self.fields {
            if !allow.is_empty() && !allow.iter().any(|f| f == public) {
                continue;
            }

            let value = match source {
                FieldSource::Derived(derivation) => derivation.apply(entity),
                FieldSource::Property(property) => {
                    let value = entity.get_property(property)?;
                    if is_empty_value(&value) {
                        continue;
                    }
                    value
                }
            };

            values.insert(public.clone(), value);
        }

        Ok(values)
    }
}

/// Unset-or-falsy check applied to property values before they are emitted.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == "0",
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Split a client `fields=a,b,c` parameter into names.
pub fn parse_field_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}
