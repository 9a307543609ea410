use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored record of a given type and bundle (subtype).
///
/// Properties are an ordered bag; a property present with a `null` value is
/// "unset", which is different from not existing at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub entity_type: String,
    pub bundle: String,
    pub label: Option<String>,
    #[serde(default)]
    pub properties: IndexMap<String, Value>,
}

impl Entity {
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Integer view of a property; `None` if absent, unset or not an integer.
    pub fn property_i64(&self, name: &str) -> Option<i64> {
        self.property(name).and_then(Value::as_i64)
    }
}

/// Authenticated principal on whose behalf a request executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: i64,
    pub name: Option<String>,
}

impl Identity {
    pub fn new(uid: i64) -> Self {
        Self { uid, name: None }
    }
}
