use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Catalog id as sent by portals: some send numbers, some numeric strings,
/// some opaque strings, and broken entries send null.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum FlexId {
    Number(i64),
    String(String),
    #[default]
    Null,
}

impl FlexId {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FlexId::Number(n) => Some(*n),
            FlexId::String(s) => s.parse().ok(),
            FlexId::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FlexId::Null)
    }

    /// Null and blank strings never identify a catalog entry; `0` does.
    pub fn is_present(&self) -> bool {
        match self {
            FlexId::Number(_) => true,
            FlexId::String(s) => !s.trim().is_empty(),
            FlexId::Null => false,
        }
    }

    fn from_value(value: Value) -> Self {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => FlexId::Number(i),
                None => FlexId::String(n.to_string()),
            },
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(i) => FlexId::Number(i),
                Err(_) => FlexId::String(s),
            },
            Value::Bool(b) => FlexId::Number(b as i64),
            _ => FlexId::Null,
        }
    }
}

impl fmt::Display for FlexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlexId::Number(n) => write!(f, "{}", n),
            FlexId::String(s) => write!(f, "{}", s),
            FlexId::Null => write!(f, "null"),
        }
    }
}

impl Serialize for FlexId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            FlexId::Number(n) => serializer.serialize_i64(*n),
            FlexId::String(s) => serializer.serialize_str(s),
            FlexId::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for FlexId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(FlexId::from_value(Value::deserialize(deserializer)?))
    }
}

/// Counters like `total_items` and `max_page_items` come as numbers or strings.
pub fn deserialize_flex_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let flex = FlexId::deserialize(deserializer)?;
    Ok(flex.as_i64().filter(|n| *n > 0).unwrap_or(0) as u64)
}
