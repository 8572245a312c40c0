//! Cache entry codec
//!
//! Entries are JSON envelopes:
//!
//! ```text
//! {"v":1,"shape":"objects","class":"Order","items":[{"objectId":"o1",...}]}
//! {"v":1,"shape":"object","class":"Order","item":{...}}
//! {"v":1,"shape":"scalar","value":42}
//! ```
//!
//! Items inside a sequence omit `className` when it equals the envelope class.
//! Timestamps are RFC 3339 with full sub-second precision, so they decode to
//! the exact instant that was stored.

use crate::error::{CacheError, Result};
use crate::model::{Acl, DataObject};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Envelope format version; anything else decodes as corrupt
pub const ENTRY_FORMAT_VERSION: u8 = 1;

/// Result of a read operation in cacheable form
#[derive(Debug, Clone, PartialEq)]
pub enum CachedResult {
    /// A single domain object (get, first)
    Object(DataObject),

    /// An ordered sequence of domain objects (find, findAll, filter, ...)
    Objects(Vec<DataObject>),

    /// Any other JSON result (count, distinct, aggregate, reduce)
    Scalar(JsonValue),
}

impl CachedResult {
    /// Shape name used in the envelope
    pub fn shape(&self) -> &'static str {
        match self {
            CachedResult::Object(_) => "object",
            CachedResult::Objects(_) => "objects",
            CachedResult::Scalar(_) => "scalar",
        }
    }

    pub fn into_object(self) -> Option<DataObject> {
        match self {
            CachedResult::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn into_objects(self) -> Option<Vec<DataObject>> {
        match self {
            CachedResult::Objects(objects) => Some(objects),
            _ => None,
        }
    }

    pub fn into_scalar(self) -> Option<JsonValue> {
        match self {
            CachedResult::Scalar(value) => Some(value),
            _ => None,
        }
    }

    /// Number of domain objects carried by this result
    pub fn object_count(&self) -> usize {
        match self {
            CachedResult::Object(_) => 1,
            CachedResult::Objects(objects) => objects.len(),
            CachedResult::Scalar(_) => 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    v: u8,
    #[serde(flatten)]
    body: Body,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
enum Body {
    Object {
        class: String,
        item: StoredObject,
    },
    Objects {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        class: Option<String>,
        items: Vec<StoredObject>,
    },
    Scalar {
        value: JsonValue,
    },
}

/// Per-item encoding; `class_name` is optional so sequences can omit it
#[derive(Debug, Serialize, Deserialize)]
struct StoredObject {
    #[serde(rename = "className", default, skip_serializing_if = "Option::is_none")]
    class_name: Option<String>,
    #[serde(rename = "objectId", default, skip_serializing_if = "Option::is_none")]
    object_id: Option<String>,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(rename = "ACL", default, skip_serializing_if = "Option::is_none")]
    acl: Option<Acl>,
    #[serde(flatten)]
    fields: Map<String, JsonValue>,
}

impl StoredObject {
    fn from_object(object: &DataObject, omit_class: bool) -> Self {
        Self {
            class_name: (!omit_class).then(|| object.class_name.clone()),
            object_id: object.object_id.clone(),
            created_at: object.created_at,
            updated_at: object.updated_at,
            acl: object.acl.clone(),
            fields: object.fields.clone(),
        }
    }

    fn into_object(
        self,
        class_hint: Option<&str>,
        envelope_class: Option<&str>,
    ) -> Result<DataObject> {
        let class_name = class_hint
            .map(str::to_string)
            .or(self.class_name)
            .or_else(|| envelope_class.map(str::to_string))
            .filter(|name| !name.is_empty())
            .ok_or_else(|| CacheError::CorruptEntry("item has no class name".to_string()))?;

        Ok(DataObject {
            class_name,
            object_id: self.object_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            acl: self.acl,
            fields: self.fields,
        })
    }
}

/// Encode a result for storage
pub fn encode(result: &CachedResult) -> Result<Vec<u8>> {
    let body = match result {
        CachedResult::Object(object) => Body::Object {
            class: object.class_name.clone(),
            item: StoredObject::from_object(object, true),
        },
        CachedResult::Objects(objects) => {
            let shared = shared_class(objects);
            Body::Objects {
                class: shared.map(str::to_string),
                items: objects
                    .iter()
                    .map(|object| StoredObject::from_object(object, shared.is_some()))
                    .collect(),
            }
        }
        CachedResult::Scalar(value) => Body::Scalar {
            value: value.clone(),
        },
    };

    let envelope = Envelope {
        v: ENTRY_FORMAT_VERSION,
        body,
    };
    serde_json::to_vec(&envelope).map_err(|e| CacheError::SerializationError(e.to_string()))
}

/// Decode stored bytes
///
/// With a `class_hint`, every reconstructed object is tagged with that class.
/// Any malformed input yields [`CacheError::CorruptEntry`].
pub fn decode(bytes: &[u8], class_hint: Option<&str>) -> Result<CachedResult> {
    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(|e| CacheError::CorruptEntry(e.to_string()))?;

    if envelope.v != ENTRY_FORMAT_VERSION {
        return Err(CacheError::CorruptEntry(format!(
            "unsupported entry format version {}",
            envelope.v
        )));
    }

    match envelope.body {
        Body::Object { class, item } => Ok(CachedResult::Object(
            item.into_object(class_hint, Some(&class))?,
        )),
        Body::Objects { class, items } => items
            .into_iter()
            .map(|item| item.into_object(class_hint, class.as_deref()))
            .collect::<Result<Vec<_>>>()
            .map(CachedResult::Objects),
        Body::Scalar { value } => Ok(CachedResult::Scalar(value)),
    }
}

/// Class shared by every object, if there is exactly one
fn shared_class(objects: &[DataObject]) -> Option<&str> {
    let first = objects.first()?.class_name.as_str();
    objects
        .iter()
        .all(|object| object.class_name == first)
        .then_some(first)
}
