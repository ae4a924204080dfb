//! Query values shared by every backend
//!
//! Provides `QueryRequest` (what the collector asks for), `PropertyRecord`
//! and `PropertyValue` (what backends hand back), and a parser for the WQL
//! subset the non-CIM backends evaluate themselves.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Query language tag understood by every backend
pub const WQL: &str = "WQL";

// ============================================================================
// Query Request
// ============================================================================

/// An immutable query: language tag, query text and the field to extract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Query language tag (currently only "WQL")
    #[serde(default = "default_language")]
    pub language: String,

    /// Query text, e.g. `SELECT SerialNumber FROM Win32_BaseBoard`
    pub text: String,

    /// Property to extract from the first returned record
    pub field: String,
}

fn default_language() -> String {
    WQL.to_string()
}

impl QueryRequest {
    /// Create a WQL request
    pub fn wql(text: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            language: WQL.to_string(),
            text: text.into(),
            field: field.into(),
        }
    }

    /// Create a request selecting a single property from a class
    pub fn select(class: &str, field: &str) -> Self {
        Self::wql(format!("SELECT {field} FROM {class}"), field)
    }

    /// Whether the language tag names WQL (case-insensitive)
    pub fn is_wql(&self) -> bool {
        self.language.eq_ignore_ascii_case(WQL)
    }
}

impl fmt::Display for QueryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} -> {}", self.language, self.text, self.field)
    }
}

// ============================================================================
// Property Values
// ============================================================================

/// A single property value returned by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    String(String),
    /// UTF-16 string as delivered by COM-style backends
    WideString(Vec<u16>),
    Integer(i64),
    Unsigned(u64),
    Boolean(bool),
    Null,
}

impl PropertyValue {
    /// Convert a JSON value as emitted by `ConvertTo-Json` or a snapshot file
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Boolean(*b),
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Self::Unsigned(u)
                } else if let Some(i) = n.as_i64() {
                    Self::Integer(i)
                } else {
                    Self::String(n.to_string())
                }
            }
            Value::String(s) => Self::String(s.clone()),
            other => Self::String(other.to_string()),
        }
    }

    /// Lossy text form, `None` for null
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::WideString(w) => Some(String::from_utf16_lossy(w)),
            Self::Integer(i) => Some(i.to_string()),
            Self::Unsigned(u) => Some(u.to_string()),
            Self::Boolean(b) => Some(b.to_string()),
            Self::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    fn as_i128(&self) -> Option<i128> {
        match self {
            Self::Integer(i) => Some(i128::from(*i)),
            Self::Unsigned(u) => Some(i128::from(*u)),
            _ => None,
        }
    }

    /// WQL equality: numbers compare numerically, strings case-insensitively
    pub fn loosely_equals(&self, other: &PropertyValue) -> bool {
        if let (Some(a), Some(b)) = (self.as_i128(), other.as_i128()) {
            return a == b;
        }
        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Null, Self::Null) => true,
            (Self::Null, _) | (_, Self::Null) => false,
            _ => match (self.as_text(), other.as_text()) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(&b),
                _ => false,
            },
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("null"),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<u64> for PropertyValue {
    fn from(value: u64) -> Self {
        Self::Unsigned(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl Serialize for PropertyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::String(s) => serializer.serialize_str(s),
            Self::WideString(w) => serializer.serialize_str(&String::from_utf16_lossy(w)),
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Unsigned(u) => serializer.serialize_u64(*u),
            Self::Boolean(b) => serializer.serialize_bool(*b),
            Self::Null => serializer.serialize_unit(),
        }
    }
}

impl<'de> Deserialize<'de> for PropertyValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_json(&value))
    }
}

// ============================================================================
// Property Records
// ============================================================================

/// Properties of one object instance returned by a query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyRecord {
    properties: BTreeMap<String, PropertyValue>,
}

impl PropertyRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(name.into(), value.into());
    }

    /// Case-insensitive property lookup (CIM property names are case-insensitive)
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name).or_else(|| {
            self.properties
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.properties.iter()
    }

    /// Build a record from a JSON object, ignoring non-object input
    pub fn from_json_object(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let mut record = Self::new();
        for (key, value) in object {
            record.insert(key.clone(), PropertyValue::from_json(value));
        }
        Some(record)
    }
}

impl FromIterator<(String, PropertyValue)> for PropertyRecord {
    fn from_iter<T: IntoIterator<Item = (String, PropertyValue)>>(iter: T) -> Self {
        Self {
            properties: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// WQL Subset Parser
// ============================================================================

static WQL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)^\s*SELECT\s+(?P<props>.+?)\s+FROM\s+(?P<class>[A-Za-z_][A-Za-z0-9_]*)(?:\s+WHERE\s+(?P<prop>[A-Za-z_][A-Za-z0-9_]*)\s*=\s*(?P<value>'[^']*'|"[^"]*"|-?\d+|TRUE|FALSE))?\s*$"#,
    )
    .expect("WQL pattern is valid")
});

static IDENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

/// Parsed form of `SELECT <props|*> FROM <Class> [WHERE <Prop> = <literal>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    /// Selected properties, `None` for `*`
    pub properties: Option<Vec<String>>,
    pub class: String,
    pub filter: Option<(String, PropertyValue)>,
}

impl ParsedQuery {
    /// Parse WQL text; the error is a human-readable rejection reason
    pub fn parse(text: &str) -> Result<Self, String> {
        let captures = WQL_PATTERN
            .captures(text)
            .ok_or_else(|| format!("unsupported or malformed WQL: {text}"))?;

        let props = captures["props"].trim();
        let properties = if props == "*" {
            None
        } else {
            let mut names = Vec::new();
            for name in props.split(',').map(str::trim) {
                if !IDENT_PATTERN.is_match(name) {
                    return Err(format!("invalid property name '{name}' in: {text}"));
                }
                names.push(name.to_string());
            }
            Some(names)
        };

        let filter = match (captures.name("prop"), captures.name("value")) {
            (Some(prop), Some(value)) => {
                Some((prop.as_str().to_string(), parse_literal(value.as_str())))
            }
            _ => None,
        };

        Ok(Self {
            properties,
            class: captures["class"].to_string(),
            filter,
        })
    }

    /// Whether the record satisfies the WHERE clause (always true without one)
    pub fn matches(&self, record: &PropertyRecord) -> bool {
        match &self.filter {
            None => true,
            Some((prop, expected)) => record
                .get(prop)
                .is_some_and(|actual| actual.loosely_equals(expected)),
        }
    }

    /// Keep only the selected properties; absent ones are not invented
    pub fn project(&self, record: PropertyRecord) -> PropertyRecord {
        let Some(properties) = &self.properties else {
            return record;
        };
        properties
            .iter()
            .filter_map(|name| record.get(name).map(|v| (name.clone(), v.clone())))
            .collect()
    }

    /// Whether the query selects the given property (case-insensitive)
    pub fn selects(&self, name: &str) -> bool {
        match &self.properties {
            None => true,
            Some(names) => names.iter().any(|n| n.eq_ignore_ascii_case(name)),
        }
    }
}

fn parse_literal(raw: &str) -> PropertyValue {
    if raw.len() >= 2
        && ((raw.starts_with('\'') && raw.ends_with('\''))
            || (raw.starts_with('"') && raw.ends_with('"')))
    {
        return PropertyValue::String(raw[1..raw.len() - 1].to_string());
    }
    if raw.eq_ignore_ascii_case("true") {
        return PropertyValue::Boolean(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return PropertyValue::Boolean(false);
    }
    if let Ok(u) = raw.parse::<u64>() {
        return PropertyValue::Unsigned(u);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return PropertyValue::Integer(i);
    }
    PropertyValue::String(raw.to_string())
}

// ============================================================================
// Tests
// ============================================================================
