//! Schema model: flattens a cluster field mapping into dotted paths

use nlq_dsl::InputFormatError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaParseError {
    #[error("Mapping is not parseable: {0}")]
    Input(#[from] InputFormatError),

    #[error("Mapping must be a JSON object")]
    NotAnObject,

    #[error("Unrecognized mapping layout: expected 'properties', 'mappings' or an index-keyed mapping")]
    UnrecognizedLayout,

    #[error("'properties' of '{path}' must be a JSON object")]
    PropertiesNotObject { path: String },

    #[error("Definition of field '{path}' must be a JSON object")]
    FieldNotObject { path: String },
}

/// Declared type of a mapped field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    MatchOnlyText,
    Keyword,
    ConstantKeyword,
    Wildcard,
    Date,
    DateNanos,
    Long,
    Integer,
    Short,
    Byte,
    Double,
    Float,
    HalfFloat,
    ScaledFloat,
    UnsignedLong,
    Boolean,
    Object,
    Nested,
    Flattened,
    GeoPoint,
    GeoShape,
    Ip,
    Binary,
    Unknown,
}

/// Coarse grouping used for compatibility checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Text,
    Keyword,
    Numeric,
    Date,
    Boolean,
    Object,
    Geo,
    Ip,
    Other,
    Unknown,
}

impl FieldType {
    /// Map a mapping `type` tag; unrecognized tags become `Unknown`
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "text" => FieldType::Text,
            "match_only_text" => FieldType::MatchOnlyText,
            "keyword" => FieldType::Keyword,
            "constant_keyword" => FieldType::ConstantKeyword,
            "wildcard" => FieldType::Wildcard,
            "date" => FieldType::Date,
            "date_nanos" => FieldType::DateNanos,
            "long" => FieldType::Long,
            "integer" => FieldType::Integer,
            "short" => FieldType::Short,
            "byte" => FieldType::Byte,
            "double" => FieldType::Double,
            "float" => FieldType::Float,
            "half_float" => FieldType::HalfFloat,
            "scaled_float" => FieldType::ScaledFloat,
            "unsigned_long" => FieldType::UnsignedLong,
            "boolean" => FieldType::Boolean,
            "object" => FieldType::Object,
            "nested" => FieldType::Nested,
            "flattened" => FieldType::Flattened,
            "geo_point" => FieldType::GeoPoint,
            "geo_shape" => FieldType::GeoShape,
            "ip" => FieldType::Ip,
            "binary" => FieldType::Binary,
            _ => FieldType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::MatchOnlyText => "match_only_text",
            FieldType::Keyword => "keyword",
            FieldType::ConstantKeyword => "constant_keyword",
            FieldType::Wildcard => "wildcard",
            FieldType::Date => "date",
            FieldType::DateNanos => "date_nanos",
            FieldType::Long => "long",
            FieldType::Integer => "integer",
            FieldType::Short => "short",
            FieldType::Byte => "byte",
            FieldType::Double => "double",
            FieldType::Float => "float",
            FieldType::HalfFloat => "half_float",
            FieldType::ScaledFloat => "scaled_float",
            FieldType::UnsignedLong => "unsigned_long",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Nested => "nested",
            FieldType::Flattened => "flattened",
            FieldType::GeoPoint => "geo_point",
            FieldType::GeoShape => "geo_shape",
            FieldType::Ip => "ip",
            FieldType::Binary => "binary",
            FieldType::Unknown => "unknown",
        }
    }

    pub fn family(&self) -> TypeFamily {
        match self {
            FieldType::Text | FieldType::MatchOnlyText => TypeFamily::Text,
            FieldType::Keyword | FieldType::ConstantKeyword | FieldType::Wildcard => {
                TypeFamily::Keyword
            }
            FieldType::Date | FieldType::DateNanos => TypeFamily::Date,
            FieldType::Long
            | FieldType::Integer
            | FieldType::Short
            | FieldType::Byte
            | FieldType::Double
            | FieldType::Float
            | FieldType::HalfFloat
            | FieldType::ScaledFloat
            | FieldType::UnsignedLong => TypeFamily::Numeric,
            FieldType::Boolean => TypeFamily::Boolean,
            FieldType::Object | FieldType::Nested => TypeFamily::Object,
            FieldType::GeoPoint | FieldType::GeoShape => TypeFamily::Geo,
            FieldType::Ip => TypeFamily::Ip,
            FieldType::Flattened | FieldType::Binary => TypeFamily::Other,
            FieldType::Unknown => TypeFamily::Unknown,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flattened field mapping: dotted path -> declared type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaMapping {
    fields: BTreeMap<String, FieldType>,
}

impl SchemaMapping {
    /// A mapping with no fields; validation skips field checks against it
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from the cluster's native mapping description
    pub fn build(raw: &Value) -> Result<Self, SchemaParseError> {
        let root = raw.as_object().ok_or(SchemaParseError::NotAnObject)?;
        let mut fields = BTreeMap::new();

        if root.is_empty() {
            return Ok(Self { fields });
        }

        if root.contains_key("properties") {
            flatten_properties("", root, &mut fields)?;
        } else if let Some(mappings) = root.get("mappings") {
            flatten_mappings(mappings, &mut fields)?;
        } else if root
            .values()
            .all(|v| v.as_object().is_some_and(|o| o.contains_key("mappings")))
        {
            // GET /<index>/_mapping response, possibly several indices
            for index in root.values() {
                if let Some(mappings) = index.get("mappings") {
                    flatten_mappings(mappings, &mut fields)?;
                }
            }
        } else {
            return Err(SchemaParseError::UnrecognizedLayout);
        }

        Ok(Self { fields })
    }

    pub fn from_json_str(text: &str) -> Result<Self, SchemaParseError> {
        let value: Value = serde_json::from_str(text).map_err(InputFormatError::from)?;
        Self::build(&value)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn lookup(&self, path: &str) -> Option<FieldType> {
        self.fields.get(path).copied()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, FieldType)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// True when `path` sits under a field whose contents are not declared
    /// (an `unknown` or `flattened` field, or an object without properties),
    /// so references below it are assumed valid.
    pub fn is_tolerated(&self, path: &str) -> bool {
        if self.lookup(path) == Some(FieldType::Unknown) {
            return true;
        }

        let mut end = path.len();
        while let Some(dot) = path[..end].rfind('.') {
            let ancestor = &path[..dot];
            match self.lookup(ancestor) {
                Some(FieldType::Unknown) | Some(FieldType::Flattened) => return true,
                Some(FieldType::Object) | Some(FieldType::Nested) => {
                    let prefix = format!("{}.", ancestor);
                    if !self.fields.keys().any(|k| k.starts_with(&prefix)) {
                        return true;
                    }
                }
                _ => {}
            }
            end = dot;
        }
        false
    }

    /// `path: type` lines, for prompts and diagnostics
    pub fn describe(&self) -> String {
        self.fields
            .iter()
            .map(|(path, ty)| format!("{}: {}", path, ty))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn flatten_mappings(
    mappings: &Value,
    out: &mut BTreeMap<String, FieldType>,
) -> Result<(), SchemaParseError> {
    let mappings = mappings.as_object().ok_or(SchemaParseError::NotAnObject)?;
    if mappings.contains_key("properties") {
        return flatten_properties("", mappings, out);
    }

    // Legacy typed mappings: {"mappings": {"_doc": {"properties": ...}}}
    for type_mapping in mappings.values() {
        if let Some(obj) = type_mapping.as_object() {
            if obj.contains_key("properties") {
                flatten_properties("", obj, out)?;
            }
        }
    }
    Ok(())
}

fn flatten_properties(
    prefix: &str,
    container: &Map<String, Value>,
    out: &mut BTreeMap<String, FieldType>,
) -> Result<(), SchemaParseError> {
    let Some(properties) = container.get("properties") else {
        return Ok(());
    };
    let properties = properties
        .as_object()
        .ok_or_else(|| SchemaParseError::PropertiesNotObject {
            path: display_prefix(prefix),
        })?;

    for (name, definition) in properties {
        let path = join(prefix, name);
        let definition = definition
            .as_object()
            .ok_or_else(|| SchemaParseError::FieldNotObject { path: path.clone() })?;

        let field_type = match definition.get("type").and_then(Value::as_str) {
            Some(tag) => FieldType::from_tag(tag),
            None if definition.contains_key("properties") => FieldType::Object,
            None => FieldType::Unknown,
        };
        out.insert(path.clone(), field_type);

        flatten_properties(&path, definition, out)?;

        // Multi-fields, e.g. title.keyword
        if let Some(multi) = definition.get("fields").and_then(Value::as_object) {
            for (sub_name, sub_def) in multi {
                let sub_path = join(&path, sub_name);
                let sub_type = sub_def
                    .get("type")
                    .and_then(Value::as_str)
                    .map(FieldType::from_tag)
                    .unwrap_or(FieldType::Unknown);
                out.insert(sub_path, sub_type);
            }
        }
    }
    Ok(())
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn display_prefix(prefix: &str) -> String {
    if prefix.is_empty() {
        "<root>".to_string()
    } else {
        prefix.to_string()
    }
}
