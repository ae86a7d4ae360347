//! Plain schema definitions used for type coercion and mandatory checks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Value type of a plain schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaType {
    #[default]
    String,
    Long,
    Double,
    Boolean,
    Date,
    Enum,
    Binary,
    Encrypted,
}

impl SchemaType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::Long => "LONG",
            Self::Double => "DOUBLE",
            Self::Boolean => "BOOLEAN",
            Self::Date => "DATE",
            Self::Enum => "ENUM",
            Self::Binary => "BINARY",
            Self::Encrypted => "ENCRYPTED",
        }
    }

    /// Checks that a raw string value is acceptable for this type.
    #[must_use]
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            Self::Long => value.trim().parse::<i64>().is_ok(),
            Self::Double => value.trim().parse::<f64>().is_ok(),
            Self::Boolean => matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "false"),
            Self::String | Self::Date | Self::Enum | Self::Binary | Self::Encrypted => true,
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A plain attribute schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlainSchema {
    pub key: String,

    #[serde(default, rename = "type")]
    pub schema_type: SchemaType,

    #[serde(default)]
    pub multivalue: bool,

    /// Boolean condition expression making the schema mandatory.
    #[serde(default = "default_condition")]
    pub mandatory_condition: String,

    /// Allowed values for `ENUM` schemas.
    #[serde(default)]
    pub enum_values: Vec<String>,

    /// Auxiliary class contributing this schema; `None` for base schemas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any_type_class: Option<String>,
}

fn default_condition() -> String {
    "false".to_string()
}

impl PlainSchema {
    #[must_use]
    pub fn new(key: impl Into<String>, schema_type: SchemaType) -> Self {
        Self {
            key: key.into(),
            schema_type,
            multivalue: false,
            mandatory_condition: default_condition(),
            enum_values: Vec::new(),
            any_type_class: None,
        }
    }

    #[must_use]
    pub fn with_mandatory_condition(mut self, condition: impl Into<String>) -> Self {
        self.mandatory_condition = condition.into();
        self
    }

    #[must_use]
    pub fn with_enum_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = values.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn multivalue(mut self) -> Self {
        self.multivalue = true;
        self
    }

    /// Validates a single raw value against type and enum constraints.
    #[must_use]
    pub fn is_valid_value(&self, value: &str) -> bool {
        if self.schema_type == SchemaType::Enum && !self.enum_values.is_empty() {
            return self.enum_values.iter().any(|v| v == value);
        }
        self.schema_type.accepts(value)
    }
}
