//! Domain objects served through the cache

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

/// Field names carried as object metadata rather than free-form fields
pub const RESERVED_FIELDS: [&str; 5] = ["className", "objectId", "createdAt", "updatedAt", "ACL"];

/// Principal that stands for "everyone" in an access-control list
pub const PUBLIC_PRINCIPAL: &str = "*";

/// Read/write grant for a single principal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub write: bool,
}

/// Access-control descriptor keyed by principal (`*`, a user id, or `role:<name>`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Acl {
    entries: BTreeMap<String, Permission>,
}

impl Acl {
    /// Create an empty ACL (no principal has access)
    pub fn new() -> Self {
        Self::default()
    }

    /// ACL granting public read access only
    pub fn public_read() -> Self {
        let mut acl = Self::new();
        acl.set_read_access(PUBLIC_PRINCIPAL, true);
        acl
    }

    /// Grant or revoke read access for a principal
    pub fn set_read_access(&mut self, principal: impl Into<String>, allowed: bool) {
        self.update(principal.into(), |p| p.read = allowed);
    }

    /// Grant or revoke write access for a principal
    pub fn set_write_access(&mut self, principal: impl Into<String>, allowed: bool) {
        self.update(principal.into(), |p| p.write = allowed);
    }

    pub fn can_read(&self, principal: &str) -> bool {
        self.entries.get(principal).map(|p| p.read).unwrap_or(false)
    }

    pub fn can_write(&self, principal: &str) -> bool {
        self.entries.get(principal).map(|p| p.write).unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn update(&mut self, principal: String, apply: impl FnOnce(&mut Permission)) {
        let entry = self.entries.entry(principal.clone()).or_default();
        apply(entry);
        if !entry.read && !entry.write {
            self.entries.remove(&principal);
        }
    }
}

/// A schema-less record belonging to an entity class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataObject {
    /// Entity class (collection) name
    #[serde(rename = "className")]
    pub class_name: String,

    /// Store-assigned identifier, absent before the first save
    #[serde(rename = "objectId", default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,

    /// Creation timestamp
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Last update timestamp
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Access-control descriptor
    #[serde(rename = "ACL", default, skip_serializing_if = "Option::is_none")]
    pub acl: Option<Acl>,

    /// Free-form field data
    #[serde(flatten)]
    pub fields: Map<String, JsonValue>,
}

impl DataObject {
    /// Create an unsaved object of the given class
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            object_id: None,
            created_at: None,
            updated_at: None,
            acl: None,
            fields: Map::new(),
        }
    }

    /// Create an object with a known identifier
    pub fn with_id(class_name: impl Into<String>, object_id: impl Into<String>) -> Self {
        let mut object = Self::new(class_name);
        object.object_id = Some(object_id.into());
        object
    }

    /// Set a field value
    ///
    /// Returns `false` (and leaves the object untouched) for reserved names;
    /// use the typed metadata fields for those.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> bool {
        let key = key.into();
        if RESERVED_FIELDS.contains(&key.as_str()) {
            return false;
        }
        self.fields.insert(key, value.into());
        true
    }

    /// Builder-style variant of [`DataObject::set`]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.fields.get(key)
    }

    /// Identifier of the record referenced by a relation field, if any
    pub fn relation_id(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(reference_id)
    }

    /// Pointer JSON referencing this object
    pub fn to_pointer(&self) -> Option<JsonValue> {
        self.object_id
            .as_deref()
            .map(|id| pointer(&self.class_name, id))
    }
}

/// Build a pointer value referencing another record
pub fn pointer(class_name: &str, object_id: &str) -> JsonValue {
    serde_json::json!({
        "__type": "Pointer",
        "className": class_name,
        "objectId": object_id,
    })
}

/// Extract a referenced record id from a relation value
///
/// Accepts a bare string id, a pointer (`objectId`), or an embedded record
/// carrying `id`. Anything else (including null) has no id.
pub fn reference_id(value: &JsonValue) -> Option<&str> {
    match value {
        JsonValue::String(id) if !id.is_empty() => Some(id),
        JsonValue::Object(map) => map
            .get("objectId")
            .or_else(|| map.get("id"))
            .and_then(JsonValue::as_str)
            .filter(|id| !id.is_empty()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reserved_fields_rejected() {
        let mut object = DataObject::new("Order");
        assert!(object.set("status", "open"));
        assert!(!object.set("objectId", "forged"));
        assert!(object.object_id.is_none());
        assert_eq!(object.get("status"), Some(&json!("open")));
    }

    #[test]
    fn test_reference_id_forms() {
        assert_eq!(reference_id(&json!("c1")), Some("c1"));
        assert_eq!(reference_id(&pointer("Customer", "c2")), Some("c2"));
        assert_eq!(reference_id(&json!({"id": "c3"})), Some("c3"));
        assert_eq!(reference_id(&json!(null)), None);
        assert_eq!(reference_id(&json!({"name": "x"})), None);
        assert_eq!(reference_id(&json!("")), None);
    }

    #[test]
    fn test_relation_id() {
        let order = DataObject::with_id("Order", "o1").field("Customer", json!({"id": "c1"}));
        assert_eq!(order.relation_id("Customer"), Some("c1"));
        assert_eq!(order.relation_id("Provider"), None);
    }

    #[test]
    fn test_acl_grants() {
        let mut acl = Acl::public_read();
        acl.set_write_access("role:Admin", true);

        assert!(acl.can_read("*"));
        assert!(!acl.can_write("*"));
        assert!(acl.can_write("role:Admin"));

        acl.set_write_access("role:Admin", false);
        assert!(!acl.can_write("role:Admin"));

        let value = serde_json::to_value(&acl).unwrap();
        assert_eq!(value, json!({"*": {"read": true}}));
    }

    #[test]
    fn test_object_json_shape() {
        let mut object = DataObject::with_id("Order", "o42").field("status", "open");
        object.acl = Some(Acl::public_read());

        let value = serde_json::to_value(&object).unwrap();
        assert_eq!(value["className"], "Order");
        assert_eq!(value["objectId"], "o42");
        assert_eq!(value["status"], "open");
        assert_eq!(value["ACL"]["*"]["read"], true);
        assert!(value.get("createdAt").is_none());
    }
}
