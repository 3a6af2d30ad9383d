//! Sentinel fallback records.
//!
//! When no authoritative row exists for a lookup, callers fall back to a
//! sentinel record whose attributes come from the type's [`FallbackRule`].
//! Computed defaults are evaluated against current data on every call —
//! never cached — so they track the live collection.

use crate::registry::RecordType;
use crate::store::Aggregate;
use crate::store::Record;
use crate::store::Store;
use crate::store::Value;
use std::collections::BTreeMap;

/// Reserved name identifying the fallback record.
pub const DEFAULT_KEY: &str = "fallback";

/// How a fallback attribute gets its value.
#[derive(Debug, Clone)]
pub enum FallbackValue {
    /// A literal default.
    Literal(Value),
    /// An aggregate over current persisted data, e.g. the maximum of a
    /// column across all rows.
    Computed(Aggregate),
}

/// Per-type defaults for the sentinel fallback record.
#[derive(Debug, Clone)]
pub struct FallbackRule {
    default_key: String,
    defaults: BTreeMap<String, FallbackValue>,
}

impl Default for FallbackRule {
    fn default() -> Self {
        Self {
            default_key: DEFAULT_KEY.to_string(),
            defaults: BTreeMap::new(),
        }
    }
}

impl FallbackRule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the sentinel key value.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.default_key = key.into();
        self
    }

    pub fn literal(mut self, attribute: impl Into<String>, value: Value) -> Self {
        self.defaults
            .insert(attribute.into(), FallbackValue::Literal(value));
        self
    }

    pub fn computed(mut self, attribute: impl Into<String>, aggregate: Aggregate) -> Self {
        self.defaults
            .insert(attribute.into(), FallbackValue::Computed(aggregate));
        self
    }

    pub fn default_key(&self) -> &str {
        &self.default_key
    }

    pub fn defaults(&self) -> impl Iterator<Item = (&str, &FallbackValue)> {
        self.defaults.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Build the sentinel fallback record for `record_type` against current
/// data. Never fails on an empty collection: a computed default over zero
/// rows yields `Value::Null`.
pub async fn resolve(store: &dyn Store, record_type: &RecordType) -> crate::Result<Record> {
    let rule = record_type.fallback();
    let mut record = Record::new();
    for field in record_type.fields() {
        record.set(field.name(), Value::Null);
    }
    record.set(
        record_type.primary_key(),
        Value::Text(rule.default_key().to_string()),
    );
    for (attribute, default) in rule.defaults() {
        let value = match default {
            FallbackValue::Literal(value) => value.clone(),
            FallbackValue::Computed(aggregate) => store
                .aggregate(record_type.table(), aggregate)
                .await?
                .unwrap_or(Value::Null),
        };
        record.set(attribute, value);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Field;
    use crate::registry::KeyKind;
    use crate::registry::RecordTypeDecl;
    use crate::registry::Registry;
    use crate::store::MemStore;

    fn carriers() -> (Registry, MemStore) {
        let mut registry = Registry::new();
        registry
            .register(
                RecordTypeDecl::new("ComputationCarrier", "name", KeyKind::Text)
                    .table("computation_carriers")
                    .field(Field::text("name"))
                    .field(Field::float("power_usage_effectiveness"))
                    .fallback(FallbackRule::new().computed(
                        "power_usage_effectiveness",
                        Aggregate::max("power_usage_effectiveness"),
                    )),
            )
            .expect("register");
        let store = MemStore::new();
        store.create("computation_carriers", &["name", "power_usage_effectiveness"]);
        (registry, store)
    }

    #[tokio::test]
    async fn sentinel_key_is_reserved_name() {
        let (registry, store) = carriers();
        let rt = registry.get("ComputationCarrier").expect("type");
        let fallback = resolve(&store, rt).await.expect("resolve");
        assert_eq!(fallback.key("name"), Value::Text("fallback".into()));
    }

    #[tokio::test]
    async fn computed_default_over_zero_rows_is_null() {
        let (registry, store) = carriers();
        let rt = registry.get("ComputationCarrier").expect("type");
        let fallback = resolve(&store, rt).await.expect("resolve");
        assert_eq!(fallback.key("power_usage_effectiveness"), Value::Null);
    }

    #[tokio::test]
    async fn computed_default_tracks_new_maximum() {
        let (registry, store) = carriers();
        let rt = registry.get("ComputationCarrier").expect("type");
        store
            .insert(
                "computation_carriers",
                Record::new()
                    .with("name", Value::Text("efficient".into()))
                    .with("power_usage_effectiveness", Value::Float(1.2)),
            )
            .expect("insert");
        let before = resolve(&store, rt).await.expect("resolve");
        assert_eq!(before.key("power_usage_effectiveness"), Value::Float(1.2));
        store
            .insert(
                "computation_carriers",
                Record::new()
                    .with("name", Value::Text("wasteful".into()))
                    .with("power_usage_effectiveness", Value::Float(2.3)),
            )
            .expect("insert");
        let after = resolve(&store, rt).await.expect("resolve");
        assert_eq!(after.key("power_usage_effectiveness"), Value::Float(2.3));
    }

    #[tokio::test]
    async fn literal_defaults_copy_through() {
        let mut registry = Registry::new();
        registry
            .register(
                RecordTypeDecl::new("Unit", "code", KeyKind::Text)
                    .field(Field::text("code"))
                    .field(Field::text("system"))
                    .fallback(
                        FallbackRule::new().literal("system", Value::Text("metric".into())),
                    ),
            )
            .expect("register");
        let store = MemStore::new();
        store.create("units", &["code", "system"]);
        let rt = registry.get("Unit").expect("type");
        let fallback = resolve(&store, rt).await.expect("resolve");
        assert_eq!(fallback.key("system"), Value::Text("metric".into()));
        assert_eq!(fallback.key("code"), Value::Text("fallback".into()));
    }
}
