//! Request options bag.
//!
//! [`RequestOptions`] deserializes from the JSON (or query-string derived)
//! options a caller sends with a table request. Booleans and integers are
//! accepted either as JSON values or as their string forms.

use std::fmt;

use dfbridge_backend::Record;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::descriptor::IdType;

/// Which fields a cleaned record carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldSelection {
    /// Identifier (and revision) only
    #[default]
    IdOnly,
    /// Every field of the native record (`*`)
    All,
    /// Identifier (and revision) plus the listed fields
    List(Vec<String>),
}

impl FieldSelection {
    /// Parse a `fields` value: `*`, an empty string or a comma-separated list.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw == "*" {
            return FieldSelection::All;
        }
        let names: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if names.is_empty() {
            FieldSelection::IdOnly
        } else if names.iter().any(|n| n == "*") {
            FieldSelection::All
        } else {
            FieldSelection::List(names)
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, FieldSelection::All)
    }

    pub fn is_id_only(&self) -> bool {
        matches!(self, FieldSelection::IdOnly)
    }

    /// Explicitly listed field names (empty for `IdOnly` and `All`).
    pub fn names(&self) -> &[String] {
        match self {
            FieldSelection::List(names) => names,
            _ => &[],
        }
    }
}

impl fmt::Display for FieldSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldSelection::IdOnly => Ok(()),
            FieldSelection::All => f.write_str("*"),
            FieldSelection::List(names) => f.write_str(&names.join(",")),
        }
    }
}

impl Serialize for FieldSelection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldSelection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            List(Vec<String>),
        }

        Ok(match Option::<Raw>::deserialize(deserializer)? {
            None => FieldSelection::IdOnly,
            Some(Raw::Text(s)) => FieldSelection::parse(&s),
            Some(Raw::List(names)) => FieldSelection::parse(&names.join(",")),
        })
    }
}

/// Field-level security applied to writes (`ss_filters`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldSecurity {
    /// Fields callers may never write; matched case-insensitively
    pub deny: Vec<String>,
    /// Values forced onto every written record
    pub force: Record,
}

impl FieldSecurity {
    pub fn is_denied(&self, field: &str) -> bool {
        self.deny.iter().any(|d| d.eq_ignore_ascii_case(field))
    }

    pub fn is_empty(&self) -> bool {
        self.deny.is_empty() && self.force.is_empty()
    }
}

/// Options recognized on table requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    /// Projection of returned records (csv or `*`)
    pub fields: FieldSelection,
    /// Identifier field override (backends without a fixed convention only)
    pub id_field: Option<String>,
    /// Identifier type override
    pub id_type: Option<IdType>,
    /// Keep processing after a per-record failure
    #[serde(rename = "continue", deserialize_with = "lenient_bool")]
    pub continue_on_error: bool,
    /// Undo every completed unit when one fails
    #[serde(deserialize_with = "lenient_bool")]
    pub rollback: bool,
    /// Return submitted and backend-generated fields on writes
    #[serde(deserialize_with = "lenient_bool")]
    pub require_more: bool,
    /// Attach the total match count to listings
    #[serde(deserialize_with = "lenient_bool")]
    pub include_count: bool,
    #[serde(alias = "skip", deserialize_with = "lenient_u64")]
    pub offset: u64,
    #[serde(deserialize_with = "lenient_opt_u64")]
    pub limit: Option<u64>,
    pub order: Option<String>,
    /// View-row backends: design document
    pub design: Option<String>,
    /// View-row backends: view inside `design`
    pub view: Option<String>,
    #[serde(deserialize_with = "lenient_bool")]
    pub include_docs: bool,
    /// Cursor backends: continuation token from a previous page
    pub next: Option<String>,
    #[serde(rename = "ss_filters")]
    pub security: FieldSecurity,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fields(mut self, fields: &str) -> Self {
        self.fields = FieldSelection::parse(fields);
        self
    }

    pub fn with_rollback(mut self) -> Self {
        self.rollback = true;
        self
    }

    pub fn with_continue(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    pub fn with_require_more(mut self) -> Self {
        self.require_more = true;
        self
    }

    pub fn with_include_count(mut self) -> Self {
        self.include_count = true;
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = Some(id_field.into());
        self
    }

    pub fn with_id_type(mut self, id_type: IdType) -> Self {
        self.id_type = Some(id_type);
        self
    }

    pub fn with_security(mut self, security: FieldSecurity) -> Self {
        self.security = security;
        self
    }

    /// Projection after `require_more` widening.
    pub fn effective_fields(&self) -> FieldSelection {
        if self.require_more && self.fields.is_id_only() {
            FieldSelection::All
        } else {
            self.fields.clone()
        }
    }
}

// ----------------------------------------------------------------------------
// Lenient scalar parsing
// ----------------------------------------------------------------------------

fn truthy(value: &Value) -> Option<bool> {
    match value {
        Value::Null => Some(false),
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "" | "0" | "false" | "no" | "off" => Some(false),
            "1" | "true" | "yes" | "on" => Some(true),
            _ => None,
        },
        _ => None,
    }
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    truthy(&value).ok_or_else(|| de::Error::custom(format!("expected a boolean, got {value}")))
}

fn number(value: &Value) -> Option<Option<u64>> {
    match value {
        Value::Null => Some(None),
        Value::Number(n) => n.as_u64().map(Some),
        Value::String(s) if s.trim().is_empty() => Some(None),
        Value::String(s) => s.trim().parse().ok().map(Some),
        _ => None,
    }
}

fn lenient_opt_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    number(&value).ok_or_else(|| {
        de::Error::custom(format!("expected a non-negative integer, got {value}"))
    })
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    lenient_opt_u64(deserializer).map(|n| n.unwrap_or(0))
}
