//! Segment rule engine: field catalog, operator registry, recursive AND/OR
//! rule trees, authoring operations, record evaluation, structured query
//! predicates, and the segment service built on top of them.

pub mod builder;
pub mod catalog;
pub mod evaluator;
pub mod operators;
pub mod query;
pub mod records;
pub mod rules;
pub mod service;
pub mod store;
pub mod value;

pub use builder::{ConditionPatch, RuleTreeBuilder, TreeBuilder, TreeObserver};
pub use catalog::{Field, FieldCatalog, FieldType};
pub use evaluator::{evaluate, AnomalySink, CaptureSink, EvaluationAnomaly, Evaluator, TracingSink};
pub use operators::{operators_for, Operator};
pub use query::{compile, QueryPredicate, SelectQuery, SqlFragment};
pub use records::{Customer, Order, OrderStatus, Record};
pub use rules::{Condition, ConditionValue, Group, Logic, RuleNode, RuleTree};
pub use service::{NewSegment, Segment, SegmentService};
pub use store::{InMemoryRecordStore, InMemorySegmentStore, RecordStore, SegmentStore};
