//! Field catalog: the attributes a segment rule may filter on.

use std::collections::HashSet;

use crm_core::{SegmentError, SegmentResult};
use serde::{Deserialize, Serialize};

/// Semantic type of a filterable attribute. Drives the operator set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Select,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Field {
    pub fn text(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(name, label, FieldType::Text)
    }

    pub fn number(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(name, label, FieldType::Number)
    }

    pub fn date(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(name, label, FieldType::Date)
    }

    pub fn select<I, S>(name: impl Into<String>, label: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            options: options.into_iter().map(Into::into).collect(),
            ..Self::new(name, label, FieldType::Select)
        }
    }

    fn new(name: impl Into<String>, label: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            field_type,
            options: Vec::new(),
        }
    }
}

/// Ordered, immutable set of fields defined by the host application.
/// The first field is what new conditions start out with.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldCatalog {
    fields: Vec<Field>,
}

impl FieldCatalog {
    pub fn new(fields: Vec<Field>) -> SegmentResult<Self> {
        let mut seen = HashSet::new();
        for field in &fields {
            if field.name.trim().is_empty() {
                return Err(SegmentError::Validation("field name must not be empty".into()));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(SegmentError::Validation(format!(
                    "duplicate field '{}' in catalog",
                    field.name
                )));
            }
            match (field.field_type, field.options.is_empty()) {
                (FieldType::Select, true) => {
                    return Err(SegmentError::Validation(format!(
                        "select field '{}' has no options",
                        field.name
                    )))
                }
                (FieldType::Select, false) | (_, true) => {}
                (_, false) => {
                    return Err(SegmentError::Validation(format!(
                        "options are only allowed on select fields ('{}')",
                        field.name
                    )))
                }
            }
        }
        Ok(Self { fields })
    }

    /// The customer attributes offered by the segment editor.
    pub fn customers() -> Self {
        Self {
            fields: vec![
                Field::text("name", "Full Name"),
                Field::text("email", "Email Address"),
                Field::text("phoneNumber", "Phone Number"),
                Field::number("age", "Age"),
                Field::number("total_spend", "Total Spend"),
                Field::number("order_count", "Order Count"),
                Field::date("registration_date", "Registration Date"),
                Field::date("last_order_date", "Last Order Date"),
                Field::select(
                    "status",
                    "Account Status",
                    ["Active", "Inactive", "Pending", "Suspended"],
                ),
            ],
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn first(&self) -> Option<&Field> {
        self.fields.first()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.field(name).map(|f| f.field_type)
    }

    pub fn options(&self, name: &str) -> &[String] {
        self.field(name).map(|f| f.options.as_slice()).unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

impl Default for FieldCatalog {
    fn default() -> Self {
        Self::customers()
    }
}

impl<'de> Deserialize<'de> for FieldCatalog {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let fields = Vec::<Field>::deserialize(deserializer)?;
        FieldCatalog::new(fields).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_catalog_lookups() {
        let catalog = FieldCatalog::customers();
        assert_eq!(catalog.first().unwrap().name, "name");
        assert_eq!(catalog.field_type("age"), Some(FieldType::Number));
        assert_eq!(catalog.field_type("registration_date"), Some(FieldType::Date));
        assert_eq!(catalog.options("status").len(), 4);
        assert!(catalog.options("name").is_empty());
        assert!(catalog.field("missing").is_none());
    }

    #[test]
    fn test_rejects_duplicate_and_optionless_select() {
        let dup = FieldCatalog::new(vec![Field::text("a", "A"), Field::number("a", "A2")]);
        assert!(matches!(dup, Err(SegmentError::Validation(_))));

        let mut bare = Field::select("status", "Status", Vec::<String>::new());
        bare.options.clear();
        assert!(FieldCatalog::new(vec![bare]).is_err());

        let mut stray = Field::text("name", "Name");
        stray.options.push("x".into());
        assert!(FieldCatalog::new(vec![stray]).is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: FieldCatalog = serde_json::from_str(
            r#"[{"name":"status","label":"Status","type":"select","options":["Active","Inactive"]}]"#,
        )
        .unwrap();
        assert_eq!(ok.field_type("status"), Some(FieldType::Select));
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json[0]["options"][1], "Inactive");

        let bad = serde_json::from_str::<FieldCatalog>(
            r#"[{"name":"x","label":"X","type":"text"},{"name":"x","label":"X","type":"text"}]"#,
        );
        assert!(bad.is_err());
    }
}
