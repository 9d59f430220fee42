use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::SchemaError;

// ============================================================================
// Collection
// ============================================================================

/// The fixed set of collections the engine knows about.
///
/// `Deleted` is the reserved soft-delete bucket; it never exists remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Shops,
    Items,
    Parts,
    Services,
    Completions,
    Users,
    Logs,
    Transactions,
    Settings,
    Deleted,
}

impl Collection {
    pub const ALL: [Collection; 10] = [
        Collection::Shops,
        Collection::Items,
        Collection::Parts,
        Collection::Services,
        Collection::Completions,
        Collection::Users,
        Collection::Logs,
        Collection::Transactions,
        Collection::Settings,
        Collection::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Shops => "shops",
            Collection::Items => "items",
            Collection::Parts => "parts",
            Collection::Services => "services",
            Collection::Completions => "completions",
            Collection::Users => "users",
            Collection::Logs => "logs",
            Collection::Transactions => "transactions",
            Collection::Settings => "settings",
            Collection::Deleted => "deleted",
        }
    }

    /// Collections whose quantity changes produce ledger transactions.
    pub fn is_stock_bearing(&self) -> bool {
        matches!(self, Collection::Items | Collection::Parts)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| SchemaError::UnknownCollection(s.to_string()))
    }
}

// ============================================================================
// Record
// ============================================================================

/// A collection entry: sync envelope plus arbitrary fields.
///
/// The envelope (`id`, `docType`, `docUpdated`, `deleted`) is typed; every
/// other key lives in `fields` and is flattened on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    /// Epoch milliseconds of the last remote write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_updated: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Wire name of the last-write timestamp.
pub const DOC_UPDATED: &str = "docUpdated";

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Build a record from a JSON object. Fails for non-objects and for
    /// envelope fields of the wrong type.
    pub fn from_value(collection: &str, value: Value) -> Result<Self, SchemaError> {
        if !value.is_object() {
            let id = value
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(SchemaError::NotAnObject {
                collection: collection.to_string(),
                id,
            });
        }
        serde_json::from_value(value).map_err(|source| SchemaError::Decode {
            collection: collection.to_string(),
            source,
        })
    }

    /// Parse a remote document, taking the id from the document key.
    pub fn from_remote(collection: &str, id: &str, data: Value) -> Result<Self, SchemaError> {
        if !data.is_object() {
            return Err(SchemaError::NotAnObject {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        let mut record = Self::from_value(collection, data)?;
        record.id = Some(id.to_string());
        Ok(record)
    }

    /// Flatten into a JSON object.
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        if let Some(id) = &self.id {
            map.insert("id".to_string(), Value::String(id.clone()));
        }
        if let Some(doc_type) = &self.doc_type {
            map.insert("docType".to_string(), Value::String(doc_type.clone()));
        }
        if let Some(ts) = self.doc_updated {
            map.insert(DOC_UPDATED.to_string(), Value::from(ts));
        }
        if let Some(deleted) = self.deleted {
            map.insert("deleted".to_string(), Value::Bool(deleted));
        }
        Value::Object(map)
    }

    pub fn id_str(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Display name used in audit entries.
    pub fn name(&self) -> Option<&str> {
        self.fields.get("name").and_then(Value::as_str)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.unwrap_or(false)
    }

    /// Origin collection of a soft-deleted record.
    pub fn origin(&self) -> Option<Collection> {
        self.doc_type.as_deref().and_then(|t| t.parse().ok())
    }

    /// Shallow merge: set envelope values and every field of `partial`
    /// override the current ones.
    pub fn merge(&mut self, partial: &Record) {
        if partial.id.is_some() {
            self.id = partial.id.clone();
        }
        if partial.doc_type.is_some() {
            self.doc_type = partial.doc_type.clone();
        }
        if partial.doc_updated.is_some() {
            self.doc_updated = partial.doc_updated;
        }
        if partial.deleted.is_some() {
            self.deleted = partial.deleted;
        }
        for (k, v) in &partial.fields {
            self.fields.insert(k.clone(), v.clone());
        }
    }

    /// Drop `null` fields; remote stores reject undefined values.
    pub fn strip_nulls(&mut self) {
        self.fields.retain(|_, v| !v.is_null());
    }

    /// Decode into a typed document.
    pub fn decode<T: Document>(&self) -> Result<T, SchemaError> {
        serde_json::from_value(self.to_value()).map_err(|source| SchemaError::Decode {
            collection: T::COLLECTION.to_string(),
            source,
        })
    }

    /// Encode a typed document as a record.
    pub fn encode<T: Document>(doc: &T) -> Result<Record, SchemaError> {
        let decode_err = |source| SchemaError::Decode {
            collection: T::COLLECTION.to_string(),
            source,
        };
        let value = serde_json::to_value(doc).map_err(decode_err)?;
        serde_json::from_value(value).map_err(decode_err)
    }
}

// ============================================================================
// Typed documents
// ============================================================================

/// Maps a Rust type to the collection it is stored in.
pub trait Document: Serialize + DeserializeOwned {
    const COLLECTION: Collection;
}

/// Stock-bearing entry of the `items` or `parts` collection.
///
/// Numeric fields accept numbers or numeric strings, which is how the shop
/// forms store them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StockItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub quantity: Option<f64>,
    /// Gross unit price.
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub price: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub net_price: Option<f64>,
    /// Purchase cost per unit.
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shop_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
}

impl Document for StockItem {
    const COLLECTION: Collection = Collection::Items;
}

/// Read a JSON value as a number, accepting numeric strings.
pub fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(number_of))
}

// ============================================================================
// Actor
// ============================================================================

/// Identity of the signed-in user, stamped onto audit entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shop_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}
