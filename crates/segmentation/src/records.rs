//! Records tested against segments, and the customer/order entities they are
//! derived from.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One entity tested against a segment: field name to scalar value.
/// The engine never mutates a record it is given.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Present, non-null value of `field`.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Confirmed,
    Pending,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub status: OrderStatus,
    pub amount: f64,
    pub order_date: NaiveDate,
}

impl Order {
    /// Field-level checks applied to each row of an order import.
    pub fn validate(&self) -> Result<(), String> {
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err("Amount must be non-negative".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub email: String,
    pub phone_number: String,
    pub age: u32,
    #[serde(default)]
    pub status: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(
        owner_id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
        phone_number: impl Into<String>,
        age: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            name: name.into(),
            email: email.into(),
            phone_number: phone_number.into(),
            age,
            status: None,
            created_at: Utc::now(),
        }
    }

    /// Field-level checks applied to each row of a bulk import.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Name is required".into());
        }
        if self.phone_number.trim().is_empty() {
            return Err("Phone number is required".into());
        }
        match self.email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
            _ => Err(format!("Invalid email '{}'", self.email)),
        }
    }

    /// Flatten into a record, deriving spend attributes from the customer's
    /// orders. Refunded and invalid orders do not count towards spend.
    pub fn to_record(&self, orders: &[Order]) -> Record {
        let counted: Vec<&Order> = orders
            .iter()
            .filter(|o| o.customer_id == self.id && o.status != OrderStatus::Refunded)
            .filter(|o| o.validate().is_ok())
            .collect();
        let total_spend: f64 = counted.iter().map(|o| o.amount).sum();
        let last_order = counted.iter().map(|o| o.order_date).max();

        let mut record = Record::new()
            .with("id", self.id.to_string())
            .with("name", self.name.clone())
            .with("email", self.email.clone())
            .with("phoneNumber", self.phone_number.clone())
            .with("age", self.age)
            .with("registration_date", self.created_at.format("%Y-%m-%d").to_string())
            .with("order_count", counted.len())
            .with("total_spend", total_spend);
        if let Some(day) = last_order {
            record.insert("last_order_date", day.format("%Y-%m-%d").to_string());
        }
        if let Some(status) = &self.status {
            record.insert("status", status.clone());
        }
        record
    }
}

/// Outcome of a bulk import: per-row counts instead of all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Row index to rejection reason.
    pub errors: HashMap<usize, String>,
}

impl ImportSummary {
    pub fn record_ok(&mut self) {
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, row: usize, reason: impl Into<String>) {
        self.failed += 1;
        self.errors.insert(row, reason.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(customer: &Customer, status: OrderStatus, amount: f64, day: &str) -> Order {
        Order {
            id: Uuid::new_v4(),
            customer_id: customer.id,
            status,
            amount,
            order_date: NaiveDate::parse_from_str(day, "%Y-%m-%d").unwrap(),
        }
    }

    #[test]
    fn test_record_get_skips_null() {
        let record = Record::new().with("a", 1).with("b", Value::Null);
        assert_eq!(record.get("a"), Some(&Value::from(1)));
        assert!(record.get("b").is_none());
        assert!(record.get("c").is_none());
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn test_customer_record_derives_spend() {
        let customer = Customer::new("owner-1", "Ann", "ann@example.com", "555-0100", 34);
        let other = Customer::new("owner-1", "Bob", "bob@example.com", "555-0101", 40);
        let orders = vec![
            order(&customer, OrderStatus::Confirmed, 120.0, "2024-03-01"),
            order(&customer, OrderStatus::Pending, 30.5, "2024-05-20"),
            order(&customer, OrderStatus::Refunded, 999.0, "2024-06-01"),
            order(&other, OrderStatus::Confirmed, 50.0, "2024-07-01"),
        ];
        let record = customer.to_record(&orders);
        assert_eq!(record.get("total_spend"), Some(&Value::from(150.5)));
        assert_eq!(record.get("order_count"), Some(&Value::from(2)));
        assert_eq!(record.get("last_order_date"), Some(&Value::from("2024-05-20")));
        assert_eq!(record.get("phoneNumber"), Some(&Value::from("555-0100")));
        assert!(record.get("status").is_none());
    }

    #[test]
    fn test_customer_validation() {
        let mut c = Customer::new("o", "Ann", "ann@example.com", "555", 20);
        assert!(c.validate().is_ok());
        c.email = "ann.example.com".into();
        assert!(c.validate().is_err());
        c.email = "ann@example.com".into();
        c.name = "  ".into();
        assert_eq!(c.validate(), Err("Name is required".to_string()));
    }

    #[test]
    fn test_registration_date_is_calendar_day() {
        let mut customer = Customer::new("o", "Ann", "ann@example.com", "555", 20);
        customer.created_at = "2024-12-31T10:00:00Z".parse().unwrap();
        let record = customer.to_record(&[]);
        assert_eq!(record.get("registration_date"), Some(&Value::from("2024-12-31")));
    }

    #[test]
    fn test_order_validation() {
        let customer = Customer::new("o", "Ann", "ann@example.com", "555", 20);
        let mut o = order(&customer, OrderStatus::Confirmed, 0.0, "2024-01-01");
        assert!(o.validate().is_ok());
        o.amount = -500.0;
        assert_eq!(o.validate(), Err("Amount must be non-negative".to_string()));
        o.amount = f64::NAN;
        assert!(o.validate().is_err());

        o.amount = -500.0;
        let record = customer.to_record(&[o]);
        assert_eq!(record.get("total_spend"), Some(&Value::from(0.0)));
        assert_eq!(record.get("order_count"), Some(&Value::from(0)));
    }

    #[test]
    fn test_order_wire_format() {
        let order: Order = serde_json::from_value(serde_json::json!({
            "id": Uuid::nil(),
            "customerId": Uuid::nil(),
            "status": "refunded",
            "amount": 12.0,
            "orderDate": "2024-01-02"
        }))
        .unwrap();
        assert_eq!(order.status, OrderStatus::Refunded);
    }
}
