//! Structured query predicate compiled from a rule tree.
//!
//! The predicate is an AND/OR tree of typed clauses with every fail-open and
//! fail-closed decision already folded in. It renders to a parameterized SQL
//! `WHERE` clause (values are always bound, column names are whitelisted
//! against the catalog) and can also be matched in memory; both agree with
//! [`crate::evaluator::Evaluator`] on every tree and record.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use crm_core::{EmptyGroupPolicy, SegmentError, SegmentResult};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::catalog::FieldCatalog;
use crate::evaluator::{empty_group_outcome, ordering_matches, text_matches, within};
use crate::operators::{Operator, OperatorKind};
use crate::records::Record;
use crate::rules::{Condition, Group, Logic, RuleNode};
use crate::value;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryPredicate {
    Const(bool),
    Clause(Clause),
    All(Vec<QueryPredicate>),
    Any(Vec<QueryPredicate>),
}

/// Test applied to one column. Every test is false when the column is absent.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub column: String,
    pub test: ClauseTest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClauseTest {
    /// Matches whenever the column has a value (engine-side fail-open).
    Present,
    /// `operand` is already lower-cased.
    Text { op: Operator, operand: String },
    /// `None` operands never match.
    Numeric { op: Operator, operand: Option<f64> },
    Date {
        op: Operator,
        operand: Option<DateTime<Utc>>,
    },
    DateRange {
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
}

/// A rendered `WHERE` clause and the values bound to its `$n` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<Value>,
}

/// A complete statement selecting the rows of `table` the predicate matches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlFragment {
    pub fn select_from(&self, table: &str) -> String {
        format!("SELECT * FROM {} WHERE {}", quote_ident(table), self.sql)
    }

    pub fn into_select(self, table: &str) -> SelectQuery {
        let sql = self.select_from(table);
        SelectQuery {
            sql,
            params: self.params,
        }
    }
}

pub fn compile(tree: &Group, policy: EmptyGroupPolicy) -> QueryPredicate {
    if tree.children.is_empty() {
        return QueryPredicate::Const(empty_group_outcome(policy, tree.logic));
    }
    let parts = tree
        .children
        .iter()
        .map(|child| match child {
            RuleNode::Group(g) => compile(g, policy),
            RuleNode::Condition(c) => compile_condition(c),
        })
        .collect();
    match tree.logic {
        Logic::And => QueryPredicate::all(parts),
        Logic::Or => QueryPredicate::any(parts),
    }
}

fn compile_condition(c: &Condition) -> QueryPredicate {
    let test = match c.operator.kind() {
        OperatorKind::Unknown => {
            warn!(condition_id = %c.id, operator = %c.operator, "unknown operator compiled as fail-open");
            ClauseTest::Present
        }
        OperatorKind::Text => match c.value.folded_text() {
            Ok(operand) => ClauseTest::Text {
                op: c.operator.clone(),
                operand,
            },
            Err(err) => {
                warn!(condition_id = %c.id, error = %err.0, "condition value compiled as fail-open");
                ClauseTest::Present
            }
        },
        OperatorKind::Numeric => match c.value.number() {
            Ok(operand) => ClauseTest::Numeric {
                op: c.operator.clone(),
                operand,
            },
            Err(_) => ClauseTest::Present,
        },
        OperatorKind::Date => match c.value.date() {
            Ok(operand) => ClauseTest::Date {
                op: c.operator.clone(),
                operand,
            },
            Err(_) => ClauseTest::Present,
        },
        OperatorKind::Range => match c.value.range_bounds() {
            Some((start, end)) => ClauseTest::DateRange {
                start: value::parse_date(&start),
                end: value::parse_date(&end),
            },
            None => return QueryPredicate::Const(false),
        },
    };
    QueryPredicate::Clause(Clause {
        column: c.field.clone(),
        test,
    })
}

impl QueryPredicate {
    fn all(parts: Vec<QueryPredicate>) -> Self {
        let mut kept = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Self::Const(false) => return Self::Const(false),
                Self::Const(true) => {}
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 => Self::Const(true),
            1 => kept.remove(0),
            _ => Self::All(kept),
        }
    }

    fn any(parts: Vec<QueryPredicate>) -> Self {
        let mut kept = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Self::Const(true) => return Self::Const(true),
                Self::Const(false) => {}
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 => Self::Const(false),
            1 => kept.remove(0),
            _ => Self::Any(kept),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Const(b) => *b,
            Self::All(parts) => parts.iter().all(|p| p.matches(record)),
            Self::Any(parts) => parts.iter().any(|p| p.matches(record)),
            Self::Clause(clause) => match record.get(&clause.column) {
                None => false,
                Some(actual) => clause.test.matches(actual),
            },
        }
    }

    /// Columns referenced by the predicate, in order of appearance.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Self::Const(_) => Vec::new(),
            Self::Clause(c) => vec![c.column.as_str()],
            Self::All(parts) | Self::Any(parts) => {
                parts.iter().flat_map(|p| p.columns()).collect()
            }
        }
    }

    /// Render as a PostgreSQL `WHERE` clause. Columns outside the catalog are
    /// rejected rather than rendered.
    ///
    /// Numeric and date clauses cast the column, so the rendered SQL assumes a
    /// tree that `Group::lint` accepts: a numeric or date operator on a text
    /// column raises a cast error in PostgreSQL where the in-memory match
    /// simply yields `false`.
    pub fn to_sql(&self, catalog: &FieldCatalog) -> SegmentResult<SqlFragment> {
        if let Some(unknown) = self.columns().into_iter().find(|c| !catalog.contains(c)) {
            return Err(SegmentError::Validation(format!(
                "field '{unknown}' is not filterable"
            )));
        }
        let mut fragment = SqlFragment {
            sql: String::new(),
            params: Vec::new(),
        };
        self.render(&mut fragment);
        Ok(fragment)
    }

    fn render(&self, out: &mut SqlFragment) {
        match self {
            Self::Const(true) => out.sql.push_str("TRUE"),
            Self::Const(false) => out.sql.push_str("FALSE"),
            Self::All(parts) | Self::Any(parts) => {
                let joiner = if matches!(self, Self::All(_)) { " AND " } else { " OR " };
                out.sql.push('(');
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        out.sql.push_str(joiner);
                    }
                    part.render(out);
                }
                out.sql.push(')');
            }
            Self::Clause(clause) => clause.render(out),
        }
    }
}

impl ClauseTest {
    fn matches(&self, actual: &Value) -> bool {
        match self {
            Self::Present => true,
            Self::Text { op, operand } => value::folded_text(actual)
                .map(|a| text_matches(op, &a, operand))
                .unwrap_or(true),
            Self::Numeric { op, operand } => match value::json_number(actual) {
                Err(_) => true,
                Ok(a) => match (a, operand) {
                    (Some(a), Some(e)) => ordering_matches(op, a.partial_cmp(e)),
                    _ => false,
                },
            },
            Self::Date { op, operand } => match value::json_date(actual) {
                Err(_) => true,
                Ok(a) => match (a, operand) {
                    (Some(a), Some(e)) => ordering_matches(op, Some(a.cmp(e))),
                    _ => false,
                },
            },
            Self::DateRange { start, end } => match value::json_date(actual) {
                Err(_) => true,
                Ok(a) => within(a, *start, *end),
            },
        }
    }
}

fn bind(out: &mut SqlFragment, value: Value) -> String {
    out.params.push(value);
    format!("${}", out.params.len())
}

fn comparison(op: &Operator) -> &'static str {
    match op {
        Operator::GreaterThan | Operator::After => ">",
        Operator::LessThan | Operator::Before => "<",
        Operator::GreaterEqual => ">=",
        Operator::LessEqual => "<=",
        Operator::NotEquals => "<>",
        _ => "=",
    }
}

/// Escape LIKE wildcards so user text only ever matches literally.
fn like_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl Clause {
    fn render(&self, out: &mut SqlFragment) {
        let col = quote_ident(&self.column);
        match &self.test {
            ClauseTest::Present => {
                let _ = write!(out.sql, "{col} IS NOT NULL");
            }
            ClauseTest::Text { op, operand } => {
                let lhs = format!("LOWER(CAST({col} AS TEXT))");
                let pattern = match op {
                    Operator::Contains => Some(format!("%{}%", like_escape(operand))),
                    Operator::StartsWith => Some(format!("{}%", like_escape(operand))),
                    Operator::EndsWith => Some(format!("%{}", like_escape(operand))),
                    _ => None,
                };
                match pattern {
                    Some(pattern) => {
                        let p = bind(out, Value::String(pattern));
                        let _ = write!(out.sql, "{lhs} LIKE {p} ESCAPE '\\'");
                    }
                    None => {
                        let p = bind(out, Value::String(operand.clone()));
                        let _ = write!(out.sql, "{lhs} {} {p}", comparison(op));
                    }
                }
            }
            ClauseTest::Numeric {
                op,
                operand: Some(n),
            } => {
                let p = bind(out, Value::from(*n));
                let _ = write!(
                    out.sql,
                    "CAST({col} AS DOUBLE PRECISION) {} {p}",
                    comparison(op)
                );
            }
            ClauseTest::Date {
                op,
                operand: Some(d),
            } => {
                let p = bind(out, Value::String(d.to_rfc3339()));
                let _ = write!(out.sql, "CAST({col} AS TIMESTAMPTZ) {} {p}", comparison(op));
            }
            ClauseTest::DateRange {
                start: Some(s),
                end: Some(e),
            } => {
                let lo = bind(out, Value::String(s.to_rfc3339()));
                let hi = bind(out, Value::String(e.to_rfc3339()));
                let _ = write!(out.sql, "CAST({col} AS TIMESTAMPTZ) BETWEEN {lo} AND {hi}");
            }
            ClauseTest::Numeric { .. } | ClauseTest::Date { .. } | ClauseTest::DateRange { .. } => {
                out.sql.push_str("FALSE")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::RuleTreeBuilder;
    use crate::rules::{Condition, ConditionValue};
    use serde_json::json;

    fn catalog() -> FieldCatalog {
        FieldCatalog::customers()
    }

    #[test]
    fn test_values_are_bound_not_interpolated() {
        let tree = RuleTreeBuilder::new(Logic::And)
            .condition("name", "contains", "o'brien%")
            .greater_than("age", 30.0)
            .build();
        let sql = compile(&tree, EmptyGroupPolicy::Inclusive)
            .to_sql(&catalog())
            .unwrap();
        assert_eq!(
            sql.sql,
            "(LOWER(CAST(\"name\" AS TEXT)) LIKE $1 ESCAPE '\\' AND CAST(\"age\" AS DOUBLE PRECISION) > $2)"
        );
        assert_eq!(sql.params, vec![json!("%o'brien\\%%"), json!(30.0)]);
        assert!(!sql.sql.contains("brien"));
    }

    #[test]
    fn test_casts_only_on_typed_columns_when_lint_clean() {
        let clean = RuleTreeBuilder::new(Logic::And)
            .condition("name", "starts_with", "a")
            .greater_than("total_spend", 100.0)
            .condition("last_order_date", "after", "2024-01-01")
            .build();
        assert!(clean.lint(&catalog()).is_empty());
        let sql = compile(&clean, EmptyGroupPolicy::Inclusive)
            .to_sql(&catalog())
            .unwrap()
            .sql;
        assert!(sql.contains("CAST(\"total_spend\" AS DOUBLE PRECISION)"));
        assert!(sql.contains("CAST(\"last_order_date\" AS TIMESTAMPTZ)"));
        assert!(!sql.contains("CAST(\"name\" AS DOUBLE"));

        let mistyped = RuleTreeBuilder::new(Logic::And).greater_than("name", 3.0).build();
        assert_eq!(mistyped.lint(&catalog()).len(), 1);
        assert!(!compile(&mistyped, EmptyGroupPolicy::Inclusive)
            .matches(&Record::new().with("name", "Ann")));
    }

    #[test]
    fn test_select_statement_keeps_params() {
        let tree = RuleTreeBuilder::new(Logic::And).greater_than("age", 30.0).build();
        let select = compile(&tree, EmptyGroupPolicy::Inclusive)
            .to_sql(&catalog())
            .unwrap()
            .into_select("clients");
        assert_eq!(
            select.sql,
            "SELECT * FROM \"clients\" WHERE CAST(\"age\" AS DOUBLE PRECISION) > $1"
        );
        assert_eq!(select.params, vec![json!(30.0)]);
    }

    #[test]
    fn test_unknown_column_rejected() {
        let tree = Group::root(Logic::And).with_child(Condition::new(
            "c",
            "name\"; DROP TABLE customers; --",
            "equals",
            "x",
        ));
        let err = compile(&tree, EmptyGroupPolicy::Inclusive).to_sql(&catalog());
        assert!(matches!(err, Err(SegmentError::Validation(_))));
    }

    #[test]
    fn test_constant_folding() {
        let tree = Group::root(Logic::Or)
            .with_child(Condition::new("a", "status", "equals", "Active"))
            .with_child(Group::new("empty", Logic::And));
        assert_eq!(
            compile(&tree, EmptyGroupPolicy::Inclusive),
            QueryPredicate::Const(true)
        );

        let tree = Group::root(Logic::And)
            .with_child(Condition::new("a", "status", "equals", "Active"))
            .with_child(Condition::new("b", "d", "between", "2024-01-01"));
        assert_eq!(
            compile(&tree, EmptyGroupPolicy::Inclusive),
            QueryPredicate::Const(false)
        );
    }

    #[test]
    fn test_unknown_operator_requires_presence() {
        let tree = Group::root(Logic::And).with_child(Condition::new("a", "status", "fuzzy", "x"));
        let pred = compile(&tree, EmptyGroupPolicy::Inclusive);
        assert!(pred.matches(&Record::new().with("status", "anything")));
        assert!(!pred.matches(&Record::new()));
        assert_eq!(pred.to_sql(&catalog()).unwrap().sql, "\"status\" IS NOT NULL");
    }

    #[test]
    fn test_between_and_dates_render() {
        let tree = RuleTreeBuilder::new(Logic::Or)
            .between("registration_date", "2024-01-01", "2024-12-31")
            .condition("last_order_date", "before", "not a date")
            .build();
        let sql = compile(&tree, EmptyGroupPolicy::Inclusive)
            .to_sql(&catalog())
            .unwrap();
        assert_eq!(
            sql.sql,
            "(CAST(\"registration_date\" AS TIMESTAMPTZ) BETWEEN $1 AND $2 OR FALSE)"
        );
        assert_eq!(sql.params[0], json!("2024-01-01T00:00:00+00:00"));
        assert_eq!(
            sql.select_from("customers"),
            format!("SELECT * FROM \"customers\" WHERE {}", sql.sql)
        );
    }

    #[test]
    fn test_in_memory_match_of_compiled_tree() {
        let tree = Group::root(Logic::And)
            .with_child(Condition::new("a", "email", "ends_with", "@EXAMPLE.com"))
            .with_child(Condition::new(
                "b",
                "registration_date",
                "between",
                ConditionValue::range("2024-01-01", "2024-12-31"),
            ));
        let pred = compile(&tree, EmptyGroupPolicy::Inclusive);
        let r = Record::new()
            .with("email", "ann@example.com")
            .with("registration_date", "2024-06-15");
        assert!(pred.matches(&r));
        let r = Record::new()
            .with("email", "ann@example.com")
            .with("registration_date", "2025-01-01");
        assert!(!pred.matches(&r));
    }

    #[test]
    fn test_like_escape() {
        assert_eq!(like_escape("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
