//! Schema declaration types
//!
//! A model is declared as an ordered list of [`FieldDescriptor`]s plus a list
//! of [`IndexDescriptor`]s. Both are plain data; validation happens when the
//! [`Model`](crate::Model) is built.

use bson::{doc, Bson, Document as BsonDocument};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use shoal_common::{Result, ShoalError};
use std::fmt;
use std::str::FromStr;

/// Lifecycle field stamped on inserted documents
pub const CREATED_AT: &str = "createdAt";

/// Lifecycle field stamped on updated documents
pub const UPDATED_AT: &str = "updatedAt";

/// Field names a schema may not declare
pub const RESERVED_FIELDS: &[&str] = &[CREATED_AT, UPDATED_AT];

/// Declared type of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Array,
    Object,
    ObjectId,
    /// Any value, never validated or coerced
    Mixed,
}

impl FieldType {
    pub const ALL: [FieldType; 8] = [
        FieldType::String,
        FieldType::Number,
        FieldType::Boolean,
        FieldType::Date,
        FieldType::Array,
        FieldType::Object,
        FieldType::ObjectId,
        FieldType::Mixed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "String",
            FieldType::Number => "Number",
            FieldType::Boolean => "Boolean",
            FieldType::Date => "Date",
            FieldType::Array => "Array",
            FieldType::Object => "Object",
            FieldType::ObjectId => "ObjectId",
            FieldType::Mixed => "Mixed",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = ShoalError;

    fn from_str(s: &str) -> Result<Self> {
        FieldType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ShoalError::Configuration(format!("Unknown field type: '{}'", s)))
    }
}

/// One declared field of a schema
///
/// `default: None` means the field has no default at all, while
/// `Some(Bson::Null)` is an explicit null default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(
        default,
        deserialize_with = "present_default",
        skip_serializing_if = "Option::is_none"
    )]
    pub default: Option<Bson>,
    #[serde(default)]
    pub required: bool,
}

/// A present `default` key is always `Some`, so `"default": null` stays an
/// explicit null default. Only an absent key yields `None`.
fn present_default<'de, D>(deserializer: D) -> std::result::Result<Option<Bson>, D::Error>
where
    D: Deserializer<'de>,
{
    Bson::deserialize(deserializer).map(Some)
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            default: None,
            required: false,
        }
    }

    /// Set the default value applied when the input carries no value
    pub fn default_value(mut self, value: impl Into<Bson>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Mark the field as required on insert
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Direction of one key in an index
///
/// Serialized the way MongoDB spells it: `1`, `-1` or `"text"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDirection {
    Ascending,
    Descending,
    Text,
}

impl IndexDirection {
    /// Value used for this key in the index specification document
    pub fn to_bson(self) -> Bson {
        match self {
            IndexDirection::Ascending => Bson::Int32(1),
            IndexDirection::Descending => Bson::Int32(-1),
            IndexDirection::Text => Bson::String("text".to_string()),
        }
    }
}

impl Serialize for IndexDirection {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            IndexDirection::Ascending => serializer.serialize_i32(1),
            IndexDirection::Descending => serializer.serialize_i32(-1),
            IndexDirection::Text => serializer.serialize_str("text"),
        }
    }
}

struct IndexDirectionVisitor;

impl<'de> Visitor<'de> for IndexDirectionVisitor {
    type Value = IndexDirection;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("1, -1 or \"text\"")
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> std::result::Result<IndexDirection, E> {
        match value {
            1 => Ok(IndexDirection::Ascending),
            -1 => Ok(IndexDirection::Descending),
            _ => Err(E::invalid_value(de::Unexpected::Signed(value), &self)),
        }
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> std::result::Result<IndexDirection, E> {
        match value {
            1 => Ok(IndexDirection::Ascending),
            _ => Err(E::invalid_value(de::Unexpected::Unsigned(value), &self)),
        }
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> std::result::Result<IndexDirection, E> {
        if value == 1.0 {
            Ok(IndexDirection::Ascending)
        } else if value == -1.0 {
            Ok(IndexDirection::Descending)
        } else {
            Err(E::invalid_value(de::Unexpected::Float(value), &self))
        }
    }

    fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<IndexDirection, E> {
        match value {
            "text" => Ok(IndexDirection::Text),
            _ => Err(E::invalid_value(de::Unexpected::Str(value), &self)),
        }
    }
}

impl<'de> Deserialize<'de> for IndexDirection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(IndexDirectionVisitor)
    }
}

/// `IndexDescriptor::fields` as an ordered `{ field: direction }` map
mod key_map {
    use super::IndexDirection;
    use serde::de::{MapAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(
        fields: &[(String, IndexDirection)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(fields.iter().map(|(field, direction)| (field, direction)))
    }

    struct KeyMapVisitor;

    impl<'de> Visitor<'de> for KeyMapVisitor {
        type Value = Vec<(String, IndexDirection)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of field names to index directions")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut fields = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(entry) = map.next_entry::<String, IndexDirection>()? {
                fields.push(entry);
            }
            Ok(fields)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(String, IndexDirection)>, D::Error> {
        deserializer.deserialize_map(KeyMapVisitor)
    }
}

/// Secondary index declared on a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(with = "key_map")]
    pub fields: Vec<(String, IndexDirection)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<bool>,
}

impl IndexDescriptor {
    pub fn new() -> Self {
        Self {
            name: None,
            fields: Vec::new(),
            unique: None,
        }
    }

    pub fn ascending(mut self, field: impl Into<String>) -> Self {
        self.fields.push((field.into(), IndexDirection::Ascending));
        self
    }

    pub fn descending(mut self, field: impl Into<String>) -> Self {
        self.fields.push((field.into(), IndexDirection::Descending));
        self
    }

    pub fn text(mut self, field: impl Into<String>) -> Self {
        self.fields.push((field.into(), IndexDirection::Text));
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = Some(unique);
        self
    }

    /// Build the key specification document, e.g. `{ email: 1, createdAt: -1 }`
    pub fn keys(&self) -> BsonDocument {
        let mut keys = BsonDocument::new();
        for (field, direction) in &self.fields {
            keys.insert(field.clone(), direction.to_bson());
        }
        keys
    }
}

impl Default for IndexDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

/// Update operator wrapping a processed document
///
/// Only the operators listed here can be produced, so no arbitrary `$` key
/// ever reaches the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UpdateModifier {
    #[default]
    Set,
    SetOnInsert,
    Unset,
    Inc,
    Mul,
    Min,
    Max,
    Push,
    AddToSet,
    Pull,
}

impl UpdateModifier {
    pub const ALL: [UpdateModifier; 10] = [
        UpdateModifier::Set,
        UpdateModifier::SetOnInsert,
        UpdateModifier::Unset,
        UpdateModifier::Inc,
        UpdateModifier::Mul,
        UpdateModifier::Min,
        UpdateModifier::Max,
        UpdateModifier::Push,
        UpdateModifier::AddToSet,
        UpdateModifier::Pull,
    ];

    /// The MongoDB operator name, e.g. `$set`
    pub fn operator(&self) -> &'static str {
        match self {
            UpdateModifier::Set => "$set",
            UpdateModifier::SetOnInsert => "$setOnInsert",
            UpdateModifier::Unset => "$unset",
            UpdateModifier::Inc => "$inc",
            UpdateModifier::Mul => "$mul",
            UpdateModifier::Min => "$min",
            UpdateModifier::Max => "$max",
            UpdateModifier::Push => "$push",
            UpdateModifier::AddToSet => "$addToSet",
            UpdateModifier::Pull => "$pull",
        }
    }

    /// Wrap a processed document into an update document
    ///
    /// The lifecycle stamp always goes through `$set`, whatever the modifier,
    /// so that e.g. `$inc` never tries to increment a date.
    pub fn wrap(&self, mut processed: BsonDocument) -> BsonDocument {
        if *self == UpdateModifier::Set {
            return doc! { "$set": processed };
        }

        let mut update = BsonDocument::new();
        if let Some(stamp) = processed.remove(UPDATED_AT) {
            update.insert("$set", doc! { UPDATED_AT: stamp });
        }
        if !processed.is_empty() {
            update.insert(self.operator(), processed);
        }
        update
    }
}

impl fmt::Display for UpdateModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operator())
    }
}

impl FromStr for UpdateModifier {
    type Err = ShoalError;

    /// Accepts the operator with or without the leading `$`
    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.strip_prefix('$').unwrap_or(s);
        UpdateModifier::ALL
            .iter()
            .copied()
            .find(|m| &m.operator()[1..] == wanted)
            .ok_or_else(|| ShoalError::Configuration(format!("Unknown update modifier: '{}'", s)))
    }
}
