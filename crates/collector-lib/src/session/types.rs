//! Provider record shapes
//!
//! The property update tree (update set → filter updates → object updates →
//! property changes) is modelled level by level so the event subscription can
//! pattern-match instead of probing fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference to a server-side managed object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl ObjectRef {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Server-issued token marking how far updates have been observed
///
/// Starts unset, which asks the server for a full initial snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionCursor(Option<String>);

impl SubscriptionCursor {
    pub fn unset() -> Self {
        Self(None)
    }

    pub fn is_unset(&self) -> bool {
        self.0.is_none()
    }

    pub fn version(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub(crate) fn advance(&mut self, version: impl Into<String>) {
        self.0 = Some(version.into());
    }
}

/// Response to a wait-for-updates call
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSet {
    pub version: String,
    #[serde(default)]
    pub filter_set: Vec<PropertyFilterUpdate>,
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyFilterUpdate {
    pub filter: ObjectRef,
    #[serde(default)]
    pub object_set: Vec<ObjectUpdate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectUpdateKind {
    Modify,
    Enter,
    Leave,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectUpdate {
    pub kind: ObjectUpdateKind,
    pub obj: ObjectRef,
    #[serde(default)]
    pub change_set: Vec<PropertyChange>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyChangeOp {
    Add,
    Remove,
    #[default]
    Assign,
    IndirectRemove,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PropertyChange {
    pub name: String,
    #[serde(default)]
    pub op: PropertyChangeOp,
    #[serde(default)]
    pub val: Option<serde_json::Value>,
}

impl PropertyChange {
    /// The changed value as a list
    ///
    /// Single elements may arrive unwrapped and arrays may arrive boxed as
    /// `{"_typeName": "ArrayOf...", "_value": [...]}`; both are normalized.
    pub fn values(&self) -> Vec<serde_json::Value> {
        use serde_json::Value;

        match &self.val {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Object(map)) => match map.get("_value") {
                Some(Value::Array(items)) => items.clone(),
                _ => vec![Value::Object(map.clone())],
            },
            Some(other) => vec![other.clone()],
        }
    }
}

/// One provider event record, kept as received
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent(pub serde_json::Value);

impl RawEvent {
    /// Declared type tag, e.g. `VmPoweredOnEvent`
    pub fn type_name(&self) -> Option<&str> {
        self.0.get("_typeName").and_then(|v| v.as_str())
    }

    pub fn chain_id(&self) -> Option<i64> {
        self.0.get("chainId").and_then(|v| v.as_i64())
    }

    pub fn full_formatted_message(&self) -> Option<&str> {
        self.0.get("fullFormattedMessage").and_then(|v| v.as_str())
    }

    pub fn created_time(&self) -> Option<DateTime<Utc>> {
        self.0
            .get("createdTime")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn user_name(&self) -> Option<&str> {
        self.0.get("userName").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ElementDescription {
    pub key: String,
}

/// Provider counter catalog entry
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCounterInfo {
    pub key: i32,
    pub name_info: ElementDescription,
    pub group_info: ElementDescription,
    pub unit_info: ElementDescription,
    pub rollup_type: String,
    pub stats_type: String,
}

impl ProviderCounterInfo {
    /// Logical name, e.g. `cpu_usage_rate_average`
    pub fn logical_name(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.group_info.key, self.name_info.key, self.stats_type, self.rollup_type
        )
        .to_lowercase()
    }
}

/// Time window and sampling interval for a counter query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryWindow {
    pub interval_id: i32,
    pub start_time: DateTime<Utc>,
    /// `None` lets the provider resolve the upper bound to "now"
    pub end_time: Option<DateTime<Utc>>,
}

/// Raw counter samples for one entity
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub entity: ObjectRef,
    pub series: Vec<CounterSeries>,
}

/// One counter/instance series
#[derive(Debug, Clone, PartialEq)]
pub struct CounterSeries {
    pub counter_id: i32,
    pub instance: String,
    pub interval_id: i32,
    /// Flat `[timestamp, value, timestamp, value, ...]`, timestamps in Unix seconds
    pub results: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_set_deserialize() {
        let raw = json!({
            "_typeName": "UpdateSet",
            "version": "3",
            "filterSet": [{
                "_typeName": "PropertyFilterUpdate",
                "filter": {
                    "_typeName": "ManagedObjectReference",
                    "type": "PropertyFilter",
                    "value": "session[1]f1"
                },
                "objectSet": [{
                    "kind": "modify",
                    "obj": {"type": "EventHistoryCollector", "value": "session[1]c1"},
                    "changeSet": [{"name": "latestPage", "op": "assign", "val": []}]
                }]
            }]
        });

        let update: UpdateSet = serde_json::from_value(raw).unwrap();
        assert_eq!(update.version, "3");
        assert_eq!(update.filter_set.len(), 1);
        let object = &update.filter_set[0].object_set[0];
        assert_eq!(object.kind, ObjectUpdateKind::Modify);
        assert_eq!(object.obj, ObjectRef::new("EventHistoryCollector", "session[1]c1"));
        assert_eq!(object.change_set[0].op, PropertyChangeOp::Assign);
    }

    #[test]
    fn test_property_change_values_normalization() {
        let change = |val: Option<serde_json::Value>| PropertyChange {
            name: "latestPage".to_string(),
            op: PropertyChangeOp::Assign,
            val,
        };

        assert!(change(None).values().is_empty());
        assert!(change(Some(json!(null))).values().is_empty());
        assert_eq!(change(Some(json!([{"a": 1}, {"b": 2}]))).values().len(), 2);
        assert_eq!(
            change(Some(json!({"_typeName": "ArrayOfEvent", "_value": [{"a": 1}]})))
                .values()
                .len(),
            1
        );

        let single = change(Some(json!({"_typeName": "VmPoweredOnEvent"}))).values();
        assert_eq!(single, vec![json!({"_typeName": "VmPoweredOnEvent"})]);
    }

    #[test]
    fn test_cursor_advances() {
        let mut cursor = SubscriptionCursor::unset();
        assert!(cursor.is_unset());

        cursor.advance("1");
        assert_eq!(cursor.version(), Some("1"));
        cursor.advance("2");
        assert_eq!(cursor.version(), Some("2"));
    }

    #[test]
    fn test_counter_logical_name() {
        let info: ProviderCounterInfo = serde_json::from_value(json!({
            "key": 6,
            "nameInfo": {"key": "usagemhz", "label": "Usage in MHz"},
            "groupInfo": {"key": "cpu"},
            "unitInfo": {"key": "megaHertz"},
            "rollupType": "average",
            "statsType": "rate",
            "level": 1
        }))
        .unwrap();

        assert_eq!(info.logical_name(), "cpu_usagemhz_rate_average");
    }
}
