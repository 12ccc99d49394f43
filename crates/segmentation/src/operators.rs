//! Operator registry: which comparisons are legal for which field type.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::{FieldCatalog, FieldType};

/// Comparison operator of a condition. Identifiers the engine does not know
/// are kept verbatim so persisted trees stay lossless.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    GreaterEqual,
    LessEqual,
    Before,
    After,
    Between,
    Unknown(String),
}

/// How an operator compares its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    Text,
    Numeric,
    Date,
    Range,
    Unknown,
}

impl Operator {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::GreaterEqual => "greater_equal",
            Self::LessEqual => "less_equal",
            Self::Before => "before",
            Self::After => "after",
            Self::Between => "between",
            Self::Unknown(raw) => raw,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Equals => "Equals",
            Self::NotEquals => "Not equals",
            Self::Contains => "Contains",
            Self::StartsWith => "Starts with",
            Self::EndsWith => "Ends with",
            Self::GreaterThan => "Greater than",
            Self::LessThan => "Less than",
            Self::GreaterEqual => "Greater or equal",
            Self::LessEqual => "Less or equal",
            Self::Before => "Before",
            Self::After => "After",
            Self::Between => "Between",
            Self::Unknown(raw) => raw,
        }
    }

    pub fn kind(&self) -> OperatorKind {
        match self {
            Self::Equals | Self::NotEquals | Self::Contains | Self::StartsWith | Self::EndsWith => {
                OperatorKind::Text
            }
            Self::GreaterThan | Self::LessThan | Self::GreaterEqual | Self::LessEqual => {
                OperatorKind::Numeric
            }
            Self::Before | Self::After => OperatorKind::Date,
            Self::Between => OperatorKind::Range,
            Self::Unknown(_) => OperatorKind::Unknown,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<String> for Operator {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "equals" => Self::Equals,
            "not_equals" => Self::NotEquals,
            "contains" => Self::Contains,
            "starts_with" => Self::StartsWith,
            "ends_with" => Self::EndsWith,
            "greater_than" => Self::GreaterThan,
            "less_than" => Self::LessThan,
            "greater_equal" => Self::GreaterEqual,
            "less_equal" => Self::LessEqual,
            "before" => Self::Before,
            "after" => Self::After,
            "between" => Self::Between,
            _ => Self::Unknown(raw),
        }
    }
}

impl From<&str> for Operator {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        match op {
            Operator::Unknown(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entry of an operator picker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorOption {
    #[serde(rename = "value")]
    pub operator: Operator,
    pub label: String,
}

static TEXT_OPERATORS: &[Operator] = &[
    Operator::Equals,
    Operator::Contains,
    Operator::StartsWith,
    Operator::EndsWith,
    Operator::NotEquals,
];

static NUMBER_OPERATORS: &[Operator] = &[
    Operator::Equals,
    Operator::GreaterThan,
    Operator::LessThan,
    Operator::GreaterEqual,
    Operator::LessEqual,
    Operator::NotEquals,
];

static DATE_OPERATORS: &[Operator] = &[
    Operator::Equals,
    Operator::Before,
    Operator::After,
    Operator::Between,
];

static SELECT_OPERATORS: &[Operator] = &[Operator::Equals, Operator::NotEquals];

static FALLBACK_OPERATORS: &[Operator] = &[Operator::Equals];

/// Legal operators for a field type, default first.
pub fn operators_for(field_type: FieldType) -> &'static [Operator] {
    match field_type {
        FieldType::Text => TEXT_OPERATORS,
        FieldType::Number => NUMBER_OPERATORS,
        FieldType::Date => DATE_OPERATORS,
        FieldType::Select => SELECT_OPERATORS,
    }
}

/// Legal operators for a catalog field. Fields the catalog does not know get
/// the minimal `[equals]` set.
pub fn operators_for_field(catalog: &FieldCatalog, field: &str) -> &'static [Operator] {
    catalog
        .field_type(field)
        .map(operators_for)
        .unwrap_or(FALLBACK_OPERATORS)
}

pub fn default_operator(catalog: &FieldCatalog, field: &str) -> Operator {
    operators_for_field(catalog, field)[0].clone()
}

pub fn is_allowed(catalog: &FieldCatalog, field: &str, operator: &Operator) -> bool {
    operators_for_field(catalog, field).contains(operator)
}

pub fn options_for(field_type: FieldType) -> Vec<OperatorOption> {
    operators_for(field_type)
        .iter()
        .map(|op| OperatorOption {
            operator: op.clone(),
            label: op.label().to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TYPES: [FieldType; 4] = [
        FieldType::Text,
        FieldType::Number,
        FieldType::Date,
        FieldType::Select,
    ];

    #[test]
    fn test_every_type_defaults_to_equals() {
        for ty in ALL_TYPES {
            let ops = operators_for(ty);
            assert!(!ops.is_empty());
            assert_eq!(ops[0], Operator::Equals);
        }
    }

    #[test]
    fn test_registry_table() {
        assert_eq!(operators_for(FieldType::Text).len(), 5);
        assert_eq!(operators_for(FieldType::Number).len(), 6);
        assert_eq!(
            operators_for(FieldType::Date),
            &[Operator::Equals, Operator::Before, Operator::After, Operator::Between]
        );
        assert_eq!(
            operators_for(FieldType::Select),
            &[Operator::Equals, Operator::NotEquals]
        );
    }

    #[test]
    fn test_unknown_field_falls_back_to_equals() {
        let catalog = FieldCatalog::customers();
        assert_eq!(operators_for_field(&catalog, "nope"), &[Operator::Equals]);
        assert_eq!(default_operator(&catalog, "age"), Operator::Equals);
        assert!(is_allowed(&catalog, "age", &Operator::GreaterThan));
        assert!(!is_allowed(&catalog, "status", &Operator::Contains));
    }

    #[test]
    fn test_unknown_identifier_survives_serde() {
        let op: Operator = serde_json::from_str("\"regex_match\"").unwrap();
        assert_eq!(op, Operator::Unknown("regex_match".into()));
        assert_eq!(op.kind(), OperatorKind::Unknown);
        assert_eq!(serde_json::to_string(&op).unwrap(), "\"regex_match\"");

        let known: Operator = serde_json::from_str("\"greater_equal\"").unwrap();
        assert_eq!(known, Operator::GreaterEqual);
        assert_eq!(known.label(), "Greater or equal");
    }

    #[test]
    fn test_options_carry_labels() {
        let opts = options_for(FieldType::Text);
        assert_eq!(opts[2].label, "Starts with");
        let json = serde_json::to_value(&opts[0]).unwrap();
        assert_eq!(json, serde_json::json!({"value": "equals", "label": "Equals"}));
    }
}
