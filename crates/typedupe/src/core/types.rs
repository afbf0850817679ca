//! Column type model derived from stream JSON schemas.
//!
//! [`AirbyteType`] is a closed representation of every type a destination
//! column can take. It is built once per sync from a stream's declared schema
//! via [`AirbyteType::from_json_schema`] and never mutated afterwards.
//!
//! Parsing is total: any schema node that cannot be understood resolves to
//! [`AirbyteProtocolType::Unknown`] rather than failing the sync.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

/// Primitive column types.
///
/// Declaration order is significant: it is the precedence used by
/// [`Union::choose_type`] when a union has no array or struct option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AirbyteProtocolType {
    String,
    Date,
    TimeWithoutTimezone,
    TimeWithTimezone,
    TimestampWithoutTimezone,
    TimestampWithTimezone,
    Number,
    Integer,
    Boolean,
    Unknown,
}

impl AirbyteProtocolType {
    /// All variants in precedence order.
    pub const ALL: [AirbyteProtocolType; 10] = [
        AirbyteProtocolType::String,
        AirbyteProtocolType::Date,
        AirbyteProtocolType::TimeWithoutTimezone,
        AirbyteProtocolType::TimeWithTimezone,
        AirbyteProtocolType::TimestampWithoutTimezone,
        AirbyteProtocolType::TimestampWithTimezone,
        AirbyteProtocolType::Number,
        AirbyteProtocolType::Integer,
        AirbyteProtocolType::Boolean,
        AirbyteProtocolType::Unknown,
    ];

    /// Upper-case name, e.g. `TIMESTAMP_WITH_TIMEZONE`.
    pub fn name(&self) -> &'static str {
        match self {
            AirbyteProtocolType::String => "STRING",
            AirbyteProtocolType::Date => "DATE",
            AirbyteProtocolType::TimeWithoutTimezone => "TIME_WITHOUT_TIMEZONE",
            AirbyteProtocolType::TimeWithTimezone => "TIME_WITH_TIMEZONE",
            AirbyteProtocolType::TimestampWithoutTimezone => "TIMESTAMP_WITHOUT_TIMEZONE",
            AirbyteProtocolType::TimestampWithTimezone => "TIMESTAMP_WITH_TIMEZONE",
            AirbyteProtocolType::Number => "NUMBER",
            AirbyteProtocolType::Integer => "INTEGER",
            AirbyteProtocolType::Boolean => "BOOLEAN",
            AirbyteProtocolType::Unknown => "UNKNOWN",
        }
    }

    /// Position in the precedence order.
    pub fn ordinal(&self) -> i32 {
        *self as i32
    }

    /// Match a bare type name such as `"number"`, case-insensitively.
    fn matches(type_name: &str) -> AirbyteProtocolType {
        let upper = type_name.to_uppercase();
        match Self::ALL.iter().find(|t| t.name() == upper) {
            Some(t) => *t,
            None => {
                error!(
                    "Could not find matching AirbyteProtocolType for \"{}\"; returning UNKNOWN",
                    type_name
                );
                AirbyteProtocolType::Unknown
            }
        }
    }

    /// Resolve a primitive type from a schema node.
    ///
    /// The node is either a bare string (`"number"`) or an object carrying
    /// `type`, `format` and `airbyte_type` hints.
    pub fn from_json(node: &Value) -> AirbyteProtocolType {
        if let Value::String(s) = node {
            return Self::matches(s);
        }

        let property_type = node.get("type");
        let airbyte_type = node.get("airbyte_type");
        let format = node.get("format");

        if node_matches(property_type, "boolean") {
            return AirbyteProtocolType::Boolean;
        } else if node_matches(property_type, "integer") {
            return AirbyteProtocolType::Integer;
        } else if node_matches(property_type, "number") {
            return if node_matches(airbyte_type, "integer") {
                AirbyteProtocolType::Integer
            } else {
                AirbyteProtocolType::Number
            };
        } else if node_matches(property_type, "string") {
            if node_matches(format, "date") {
                return AirbyteProtocolType::Date;
            } else if node_matches(format, "time") {
                if node_matches(airbyte_type, "time_without_timezone") {
                    return AirbyteProtocolType::TimeWithoutTimezone;
                } else if node_matches(airbyte_type, "time_with_timezone") {
                    return AirbyteProtocolType::TimeWithTimezone;
                }
            } else if node_matches(format, "date-time") {
                if node_matches(airbyte_type, "timestamp_without_timezone") {
                    return AirbyteProtocolType::TimestampWithoutTimezone;
                } else if airbyte_type.is_none()
                    || node_matches(airbyte_type, "timestamp_with_timezone")
                {
                    return AirbyteProtocolType::TimestampWithTimezone;
                }
            } else {
                return AirbyteProtocolType::String;
            }
        }

        AirbyteProtocolType::Unknown
    }
}

/// An object type with ordered properties.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Struct {
    pub properties: IndexMap<String, AirbyteType>,
}

impl Struct {
    pub fn new(properties: IndexMap<String, AirbyteType>) -> Self {
        Self { properties }
    }
}

/// A set of alternative types, from `"type": [a, b]` schemas.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Union {
    pub options: Vec<AirbyteType>,
}

impl Union {
    pub fn new(options: Vec<AirbyteType>) -> Self {
        Self { options }
    }

    /// Choose the single type a destination column should use.
    ///
    /// Arrays win over structs, structs win over primitives, and primitives
    /// are ranked by declaration order. An empty union is `UNKNOWN`.
    pub fn choose_type(&self) -> AirbyteType {
        self.options
            .iter()
            .min_by_key(|t| type_priority(t))
            .cloned()
            .unwrap_or(AirbyteType::Primitive(AirbyteProtocolType::Unknown))
    }

    /// Extract columns from the union's only struct option.
    ///
    /// Returns an empty map (and logs) when there is no struct option or more
    /// than one. Streams whose top-level schema is such a union still sync,
    /// with only the metadata columns.
    pub fn as_columns(&self) -> IndexMap<String, AirbyteType> {
        let mut structs = self.options.iter().filter_map(|t| match t {
            AirbyteType::Struct(s) => Some(s),
            _ => None,
        });

        match (structs.next(), structs.next()) {
            (Some(only), None) => only.properties.clone(),
            (Some(_), Some(_)) => {
                error!("Can't extract columns from a schema with multiple object options");
                IndexMap::new()
            }
            (None, _) => {
                error!("Can't extract columns from a schema with no object options");
                IndexMap::new()
            }
        }
    }
}

/// A destination column type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AirbyteType {
    Primitive(AirbyteProtocolType),
    Struct(Struct),
    Array(Box<AirbyteType>),
    Union(Union),
    UnsupportedOneOf(Vec<AirbyteType>),
}

impl AirbyteType {
    /// Convenience constructor for `UNKNOWN`.
    pub fn unknown() -> Self {
        AirbyteType::Primitive(AirbyteProtocolType::Unknown)
    }

    /// Upper-case type name, used in logs and plans.
    pub fn type_name(&self) -> &'static str {
        match self {
            AirbyteType::Primitive(p) => p.name(),
            AirbyteType::Struct(_) => "STRUCT",
            AirbyteType::Array(_) => "ARRAY",
            AirbyteType::Union(_) => "UNION",
            AirbyteType::UnsupportedOneOf(_) => "UNSUPPORTED_ONE_OF",
        }
    }

    /// Build a type from a JSON schema node.
    ///
    /// Never fails: unrecognized or malformed nodes become `UNKNOWN`.
    pub fn from_json_schema(schema: &Value) -> AirbyteType {
        let top_level_type = schema.get("type");
        match top_level_type {
            Some(Value::String(_)) => {
                if node_matches(top_level_type, "object") {
                    return AirbyteType::Struct(get_struct(schema));
                } else if node_matches(top_level_type, "array") {
                    return get_array(schema);
                }
            }
            Some(Value::Array(types)) => return from_array_json_schema(schema, types),
            Some(_) => {}
            None => {
                if let Some(one_of) = non_null(schema.get("oneOf")) {
                    let options = match one_of {
                        Value::Array(elements) => {
                            elements.iter().map(AirbyteType::from_json_schema).collect()
                        }
                        other => vec![AirbyteType::from_json_schema(other)],
                    };
                    return AirbyteType::UnsupportedOneOf(options);
                } else if non_null(schema.get("properties")).is_some() {
                    // No type and no oneOf, but it has properties: treat as a struct.
                    return AirbyteType::Struct(get_struct(schema));
                }
            }
        }

        AirbyteType::Primitive(AirbyteProtocolType::from_json(schema))
    }
}

fn type_priority(t: &AirbyteType) -> i32 {
    match t {
        AirbyteType::Array(_) => -2,
        AirbyteType::Struct(_) => -1,
        AirbyteType::Primitive(p) => p.ordinal(),
        _ => i32::MAX,
    }
}

fn node_matches(node: Option<&Value>, value: &str) -> bool {
    matches!(node, Some(Value::String(s)) if s == value)
}

fn non_null(node: Option<&Value>) -> Option<&Value> {
    node.filter(|v| !v.is_null())
}

fn get_struct(schema: &Value) -> Struct {
    let mut properties = IndexMap::new();
    if let Some(Value::Object(fields)) = schema.get("properties") {
        for (key, value) in fields {
            properties.insert(key.clone(), AirbyteType::from_json_schema(value));
        }
    }
    Struct::new(properties)
}

fn get_array(schema: &Value) -> AirbyteType {
    match non_null(schema.get("items")) {
        Some(items) => AirbyteType::Array(Box::new(AirbyteType::from_json_schema(items))),
        None => AirbyteType::Array(Box::new(AirbyteType::unknown())),
    }
}

fn from_array_json_schema(schema: &Value, types: &[Value]) -> AirbyteType {
    let mut type_options: Vec<String> = Vec::new();
    for element in types {
        let type_name = match element {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        // "null" only marks nullability; duplicates add nothing.
        if type_name != "null" && !type_options.contains(&type_name) {
            type_options.push(type_name);
        }
    }

    if type_options.len() == 1 {
        let only = &type_options[0];
        return match only.as_str() {
            "object" => AirbyteType::Struct(get_struct(schema)),
            "array" => get_array(schema),
            _ => AirbyteType::Primitive(AirbyteProtocolType::from_json(&trimmed_schema(
                schema, only,
            ))),
        };
    }

    let options = type_options
        .iter()
        .map(|option| AirbyteType::from_json_schema(&trimmed_schema(schema, option)))
        .collect();
    AirbyteType::Union(Union::new(options))
}

/// Copy of `schema` whose `type` is the single `type_name`.
fn trimmed_schema(schema: &Value, type_name: &str) -> Value {
    let mut clone = schema.clone();
    if let Value::Object(map) = &mut clone {
        map.insert("type".to_string(), Value::String(type_name.to_string()));
    }
    clone
}
