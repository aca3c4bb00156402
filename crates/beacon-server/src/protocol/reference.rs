//! Object references embedded in published events.
//!
//! A publisher that cannot (or should not) inline a domain object puts a
//! reference in its place:
//!
//! ```json
//! {"$ref": {"class": "Post", "id": 42, "relations": ["author"], "connection": null}}
//! ```
//!
//! Receiving processes swap every reference for the value returned by
//! [`Resolver::restore_reference`] before the topic handler sees the event.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::topics::Resolver;

/// Key marking an encoded reference.
pub const REF_KEY: &str = "$ref";

/// Identity of an object living outside the event payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Type name.
    pub class: String,
    /// Primary key (scalar or composite).
    pub id: Value,
    /// Relations to load alongside.
    #[serde(default)]
    pub relations: Vec<String>,
    /// Named data source, when not the default.
    #[serde(default)]
    pub connection: Option<String>,
}

impl ObjectRef {
    /// Reference with no relations on the default connection.
    pub fn new(class: impl Into<String>, id: impl Into<Value>) -> Self {
        Self {
            class: class.into(),
            id: id.into(),
            relations: Vec::new(),
            connection: None,
        }
    }

    /// Wire form: `{"$ref": {...}}`.
    pub fn encode(&self) -> Value {
        let mut outer = Map::new();
        let _ = outer.insert(
            REF_KEY.to_string(),
            serde_json::to_value(self).unwrap_or(Value::Null),
        );
        Value::Object(outer)
    }

    /// Recognize an encoded reference. Objects with keys besides `$ref` are
    /// ordinary data.
    pub fn decode(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        if map.len() != 1 {
            return None;
        }
        serde_json::from_value(map.get(REF_KEY)?.clone()).ok()
    }

    /// Plain JSON description of the reference.
    pub fn describe(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Replace every encoded reference in `event` with its restored value.
///
/// A reference the resolver fails to restore stays encoded.
pub async fn restore_references(event: Value, resolver: &dyn Resolver) -> Value {
    restore(event, resolver).await
}

fn restore<'a>(value: Value, resolver: &'a dyn Resolver) -> BoxFuture<'a, Value> {
    Box::pin(async move {
        if let Some(reference) = ObjectRef::decode(&value) {
            return match resolver.restore_reference(&reference).await {
                Ok(restored) => restored,
                Err(e) => {
                    warn!(class = %reference.class, id = %reference.id, error = %e, "failed to restore reference");
                    value
                }
            };
        }
        match value {
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(restore(item, resolver).await);
                }
                Value::Array(out)
            }
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, item) in map {
                    let _ = out.insert(key, restore(item, resolver).await);
                }
                Value::Object(out)
            }
            scalar => scalar,
        }
    })
}
