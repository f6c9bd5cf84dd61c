//! Common types shared by the connection engine

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use async_graphql::{Enum, Scalar, ScalarType, Value};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime as ChronoDateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Name of the identity field every ordering can refer to
pub const ID_FIELD: &str = "id";

/// Kind of entity stored by the CMS
#[derive(Enum, Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Post,
    Page,
    Term,
    User,
    Comment,
    Menu,
    MenuItem,
    Plugin,
    Theme,
}

impl EntityType {
    pub const ALL: [EntityType; 9] = [
        EntityType::Post,
        EntityType::Page,
        EntityType::Term,
        EntityType::User,
        EntityType::Comment,
        EntityType::Menu,
        EntityType::MenuItem,
        EntityType::Plugin,
        EntityType::Theme,
    ];

    /// Stable tag used in cursors and global ids
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Post => "post",
            EntityType::Page => "page",
            EntityType::Term => "term",
            EntityType::User => "user",
            EntityType::Comment => "comment",
            EntityType::Menu => "menu",
            EntityType::MenuItem => "menu_item",
            EntityType::Plugin => "plugin",
            EntityType::Theme => "theme",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == tag)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source-native identifier of an entity
///
/// Numeric ids (posts, users, terms) and slug ids (plugins, themes) share this type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Encode a Relay global id (`base64("{type}:{id}")`)
pub fn to_global_id(entity_type: EntityType, id: &EntityId) -> String {
    BASE64.encode(format!("{}:{}", entity_type.as_str(), id))
}

/// Decode a Relay global id back into its type and source id
pub fn from_global_id(global_id: &str) -> Option<(EntityType, EntityId)> {
    let bytes = BASE64.decode(global_id.as_bytes()).ok()?;
    let decoded = String::from_utf8(bytes).ok()?;
    let (tag, id) = decoded.split_once(':')?;
    if id.is_empty() {
        return None;
    }
    Some((EntityType::from_tag(tag)?, EntityId::new(id)))
}

/// Source-native record as returned by a data source
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub entity_type: EntityType,
    pub id: EntityId,
    pub fields: Map<String, JsonValue>,
}

impl RawRecord {
    pub fn new(entity_type: EntityType, id: impl Into<EntityId>) -> Self {
        Self {
            entity_type,
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<JsonValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Field value, with `id` resolving to the record identity
    pub fn field(&self, name: &str) -> Option<JsonValue> {
        if name == ID_FIELD {
            return Some(JsonValue::String(self.id.to_string()));
        }
        self.fields.get(name).cloned()
    }
}

/// One component of an ordered key
///
/// Nulls sort first, then booleans, numbers and text. Integers and floats
/// compare by value; at equal value the integer comes first.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum KeyPart {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl KeyPart {
    pub fn from_json(value: Option<&JsonValue>) -> Self {
        match value {
            None | Some(JsonValue::Null) => KeyPart::Null,
            Some(JsonValue::Bool(b)) => KeyPart::Bool(*b),
            Some(JsonValue::Number(n)) => match n.as_i64() {
                Some(i) => KeyPart::Int(i),
                None => n.as_f64().map(KeyPart::Float).unwrap_or(KeyPart::Null),
            },
            Some(JsonValue::String(s)) => KeyPart::Text(s.clone()),
            Some(other) => KeyPart::Text(other.to_string()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            KeyPart::Null => 0,
            KeyPart::Bool(_) => 1,
            KeyPart::Int(_) | KeyPart::Float(_) => 2,
            KeyPart::Text(_) => 3,
        }
    }

    /// Numeric ids compare numerically, everything else lexically
    pub fn from_id(id: &EntityId) -> Self {
        match id.as_str().parse::<i64>() {
            Ok(i) => KeyPart::Int(i),
            Err(_) => KeyPart::Text(id.to_string()),
        }
    }
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyPart::Bool(a), KeyPart::Bool(b)) => a.cmp(b),
            (KeyPart::Int(a), KeyPart::Int(b)) => a.cmp(b),
            (KeyPart::Float(a), KeyPart::Float(b)) => a.total_cmp(b),
            (KeyPart::Int(a), KeyPart::Float(b)) => (*a as f64).total_cmp(b).then(Ordering::Less),
            (KeyPart::Float(a), KeyPart::Int(b)) => a.total_cmp(&(*b as f64)).then(Ordering::Greater),
            (KeyPart::Text(a), KeyPart::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for KeyPart {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyPart {}

impl Hash for KeyPart {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            KeyPart::Null => {}
            KeyPart::Bool(b) => b.hash(state),
            KeyPart::Int(i) => {
                0u8.hash(state);
                i.hash(state);
            }
            KeyPart::Float(f) => {
                1u8.hash(state);
                f.to_bits().hash(state);
            }
            KeyPart::Text(t) => t.hash(state),
        }
    }
}

/// Values of the ordering fields of one record, in ordering order
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderedKey(pub Vec<KeyPart>);

#[derive(Enum, Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderField {
    pub field: String,
    pub order: SortOrder,
}

/// Total order of a connection
///
/// Always ends with the `id` field so ties on the leading fields still resolve
/// deterministically.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderingSpec {
    fields: Vec<OrderField>,
}

impl OrderingSpec {
    pub fn new(fields: Vec<OrderField>) -> Self {
        let mut fields = fields;
        if !fields.iter().any(|f| f.field == ID_FIELD) {
            let order = fields.last().map(|f| f.order).unwrap_or(SortOrder::Asc);
            fields.push(OrderField {
                field: ID_FIELD.to_string(),
                order,
            });
        }
        Self { fields }
    }

    /// Single-field ordering plus the id tiebreaker
    pub fn by(field: &str, order: SortOrder) -> Self {
        Self::new(vec![OrderField {
            field: field.to_string(),
            order,
        }])
    }

    pub fn fields(&self) -> &[OrderField] {
        &self.fields
    }

    /// Extract the ordered key of a record
    pub fn key_of(&self, id: &EntityId, fields: &Map<String, JsonValue>) -> OrderedKey {
        OrderedKey(
            self.fields
                .iter()
                .map(|f| {
                    if f.field == ID_FIELD {
                        KeyPart::from_id(id)
                    } else {
                        KeyPart::from_json(fields.get(&f.field))
                    }
                })
                .collect(),
        )
    }

    /// Compare two keys in this ordering (`Less` means `a` comes first)
    pub fn compare(&self, a: &OrderedKey, b: &OrderedKey) -> Ordering {
        for (i, field) in self.fields.iter().enumerate() {
            let ord = match (a.0.get(i), b.0.get(i)) {
                (Some(x), Some(y)) => x.cmp(y),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            let ord = match field.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// Equality filter of a connection's `where` argument
///
/// Keys are kept sorted so the filter serializes canonically.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WhereFilter(BTreeMap<String, JsonValue>);

impl WhereFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<JsonValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, JsonValue>> for WhereFilter {
    fn from(map: BTreeMap<String, JsonValue>) -> Self {
        Self(map)
    }
}

/// DateTime scalar
#[derive(Debug, Clone, PartialEq)]
pub struct DateTime(pub ChronoDateTime<Utc>);

impl DateTime {
    /// Read a stored date, accepting RFC 3339 or the `YYYY-MM-DD HH:MM:SS` GMT column format
    pub fn from_field(value: &JsonValue) -> Option<Self> {
        let s = value.as_str()?;
        if let Ok(dt) = ChronoDateTime::parse_from_rfc3339(s) {
            return Some(DateTime(dt.with_timezone(&Utc)));
        }
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| DateTime(naive.and_utc()))
    }
}

#[Scalar]
impl ScalarType for DateTime {
    fn parse(value: Value) -> async_graphql::InputValueResult<Self> {
        if let Value::String(s) = value {
            Ok(DateTime(
                ChronoDateTime::parse_from_rfc3339(&s)
                    .map_err(|e| format!("Invalid DateTime: {}", e))?
                    .with_timezone(&Utc),
            ))
        } else {
            Err("Expected string for DateTime".into())
        }
    }

    fn to_value(&self) -> Value {
        Value::String(self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_datetime_to_value() {
        let dt = DateTime(Utc::now());
        let value = dt.to_value();
        assert!(matches!(value, Value::String(_)));
    }

    #[test]
    fn test_datetime_from_column_format() {
        let dt = DateTime::from_field(&json!("2024-03-01 12:30:00")).unwrap();
        assert_eq!(dt.0.to_rfc3339(), "2024-03-01T12:30:00+00:00");
        assert!(DateTime::from_field(&json!("yesterday")).is_none());
    }

    #[test]
    fn test_global_id() {
        let gid = to_global_id(EntityType::MenuItem, &EntityId::from(7u64));
        assert_eq!(
            from_global_id(&gid),
            Some((EntityType::MenuItem, EntityId::from("7")))
        );
        assert_eq!(from_global_id("not base64!"), None);
        assert_eq!(from_global_id(&BASE64.encode("widget:3")), None);
    }

    #[test]
    fn test_ordering_appends_id_tiebreaker() {
        let ordering = OrderingSpec::by("date", SortOrder::Desc);
        let names: Vec<&str> = ordering.fields().iter().map(|f| f.field.as_str()).collect();
        assert_eq!(names, vec!["date", "id"]);
        assert_eq!(ordering.fields()[1].order, SortOrder::Desc);
    }

    #[test]
    fn test_ordering_compare_breaks_ties_on_id() {
        let ordering = OrderingSpec::by("date", SortOrder::Asc);
        let a = RawRecord::new(EntityType::Post, 9u64).with_field("date", "2024-01-01");
        let b = RawRecord::new(EntityType::Post, 10u64).with_field("date", "2024-01-01");
        let ka = ordering.key_of(&a.id, &a.fields);
        let kb = ordering.key_of(&b.id, &b.fields);
        // numeric ids: 9 < 10
        assert_eq!(ordering.compare(&ka, &kb), Ordering::Less);

        let desc = OrderingSpec::by("date", SortOrder::Desc);
        assert_eq!(desc.compare(&ka, &kb), Ordering::Greater);
    }

    #[test]
    fn test_numeric_keys_compare_by_value() {
        let ordering = OrderingSpec::by("rating", SortOrder::Asc);
        let key = |id: u64, rating: JsonValue| {
            let record = RawRecord::new(EntityType::Plugin, id).with_field("rating", rating);
            ordering.key_of(&record.id, &record.fields)
        };
        let mut keys = vec![
            key(1, json!(9.5)),
            key(2, json!(10.5)),
            key(3, json!(7)),
            key(4, json!(u64::MAX)),
            key(5, json!(-0.5)),
        ];
        keys.sort_by(|a, b| ordering.compare(a, b));
        let ids: Vec<KeyPart> = keys.iter().map(|k| k.0[1].clone()).collect();
        assert_eq!(
            ids,
            vec![
                KeyPart::Int(5),
                KeyPart::Int(3),
                KeyPart::Int(1),
                KeyPart::Int(2),
                KeyPart::Int(4)
            ]
        );

        assert_eq!(KeyPart::Int(2).cmp(&KeyPart::Float(2.0)), Ordering::Less);
        assert!(KeyPart::Float(1e9) < KeyPart::Text("1".to_string()));
        assert!(KeyPart::Bool(true) < KeyPart::Float(-1e9));
    }

    #[test]
    fn test_where_filter_is_canonical() {
        let a = WhereFilter::new().with("status", "publish").with("author", 1);
        let b = WhereFilter::new().with("author", 1).with("status", "publish");
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
