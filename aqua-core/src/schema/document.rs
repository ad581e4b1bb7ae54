//! Serde model of the schema file.

use super::roles::LayoutRoles;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// An ordered list of `name -> value` entries read from a JSON object.
///
/// Key order in the file is significant: struct definitions and constants are
/// rendered back into the C header in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedList<T>(Vec<(String, T)>);

impl<T> NamedList<T> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append an entry, replacing an earlier entry with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: T) {
        let name = name.into();
        match self.0.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    /// Look up an entry by name.
    pub fn get(&self, name: &str) -> Option<&T> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Position of an entry in declaration order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|(k, _)| k == name)
    }

    /// Whether an entry with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate entries in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Entry at a position.
    pub fn entry(&self, index: usize) -> Option<(&str, &T)> {
        self.0.get(index).map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T> Default for NamedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize> Serialize for NamedList<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct NamedListVisitor<T>(PhantomData<T>);

impl<'de, T: Deserialize<'de>> Visitor<'de> for NamedListVisitor<T> {
    type Value = NamedList<T>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut list = NamedList(Vec::with_capacity(access.size_hint().unwrap_or(0)));
        while let Some((key, value)) = access.next_entry::<String, T>()? {
            list.insert(key, value);
        }
        Ok(list)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for NamedList<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(NamedListVisitor(PhantomData))
    }
}

/// Element count of a field: a literal or the name of a global constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Count {
    /// A literal count.
    Literal(i64),
    /// A reference to an entry in the `global` section.
    Symbol(String),
}

impl fmt::Display for Count {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Count::Literal(n) => write!(f, "{}", n),
            Count::Symbol(s) => f.write_str(s),
        }
    }
}

/// On-disk form of a field descriptor: `[ctype, name, count, doc, default]`.
#[derive(Serialize, Deserialize)]
struct RawField(String, String, Count, String, serde_json::Value);

/// One field of a struct or of the root layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawField", into = "RawField")]
pub struct FieldDescriptor {
    /// Scalar ctype (a key of the type maps) or struct name.
    pub ctype: String,
    /// Field name.
    pub name: String,
    /// Element count.
    pub count: Count,
    /// Human-readable description.
    pub doc: String,
    /// Default value (number, or the name of a global constant).
    pub default: serde_json::Value,
}

impl FieldDescriptor {
    /// Create a single-element field with a zero default.
    pub fn new(ctype: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            ctype: ctype.into(),
            name: name.into(),
            count: Count::Literal(1),
            doc: String::new(),
            default: serde_json::Value::from(0),
        }
    }

    /// Set the element count.
    pub fn with_count(mut self, count: Count) -> Self {
        self.count = count;
        self
    }

    /// Set the description.
    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, default: impl Into<serde_json::Value>) -> Self {
        self.default = default.into();
        self
    }
}

impl From<RawField> for FieldDescriptor {
    fn from(raw: RawField) -> Self {
        Self {
            ctype: raw.0,
            name: raw.1,
            count: raw.2,
            doc: raw.3,
            default: raw.4,
        }
    }
}

impl From<FieldDescriptor> for RawField {
    fn from(field: FieldDescriptor) -> Self {
        RawField(field.ctype, field.name, field.count, field.doc, field.default)
    }
}

/// Scalar type tables (`map` section).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeMaps {
    /// ctype -> single-character pack code.
    #[serde(alias = "ctype2pytype")]
    pub pack_codes: BTreeMap<String, String>,
    /// ctype -> width in bytes.
    #[serde(alias = "ctype2byte")]
    pub byte_sizes: BTreeMap<String, usize>,
}

impl TypeMaps {
    /// Whether `ctype` names a scalar.
    pub fn is_scalar(&self, ctype: &str) -> bool {
        self.byte_sizes.contains_key(ctype)
    }
}

/// An enumeration entry: `[name, doc]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumEntry(pub String, pub String);

/// The `vpp` section: data-plane struct and enum definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataPlaneTypes {
    /// Named struct definitions in declaration order.
    #[serde(rename = "struct")]
    pub structs: NamedList<Vec<FieldDescriptor>>,
    /// Named enumerations, used only for header rendering.
    #[serde(rename = "enum", default)]
    pub enums: NamedList<Vec<EnumEntry>>,
}

/// The full schema document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDocument {
    /// Free-form metadata, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    /// Global constants.
    pub global: NamedList<serde_json::Value>,
    /// Scalar type tables.
    pub map: TypeMaps,
    /// Struct and enum definitions.
    pub vpp: DataPlaneTypes,
    /// Root field list.
    pub layout: Vec<FieldDescriptor>,
    /// Which layout fields the bridge reads and writes.
    #[serde(default)]
    pub roles: LayoutRoles,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_descriptor_from_tuple() {
        let field: FieldDescriptor =
            serde_json::from_value(json!(["as_stat", "body", "SHM_N_BIN", "stats", 0])).unwrap();
        assert_eq!(field.ctype, "as_stat");
        assert_eq!(field.name, "body");
        assert_eq!(field.count, Count::Symbol("SHM_N_BIN".to_string()));
        assert_eq!(field.default, json!(0));

        let back = serde_json::to_value(&field).unwrap();
        assert_eq!(back, json!(["as_stat", "body", "SHM_N_BIN", "stats", 0]));
    }

    #[test]
    fn named_list_keeps_declaration_order() {
        let list: NamedList<i64> =
            serde_json::from_str(r#"{"zeta": 1, "alpha": 2, "mid": 3}"#).unwrap();
        let names: Vec<_> = list.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(list.get("alpha"), Some(&2));
        assert_eq!(list.position("mid"), Some(2));
    }

    #[test]
    fn type_maps_accept_legacy_keys() {
        let maps: TypeMaps = serde_json::from_value(json!({
            "ctype2pytype": {"u32": "I"},
            "ctype2byte": {"u32": 4}
        }))
        .unwrap();
        assert_eq!(maps.pack_codes.get("u32").map(String::as_str), Some("I"));
        assert!(maps.is_scalar("u32"));
        assert!(!maps.is_scalar("as_stat"));
    }

    #[test]
    fn fractional_count_is_rejected() {
        let result: std::result::Result<FieldDescriptor, _> =
            serde_json::from_value(json!(["u32", "x", 1.5, "", 0]));
        assert!(result.is_err());
    }
}
