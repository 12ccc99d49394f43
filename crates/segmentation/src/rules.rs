//! Rule tree model: conditions and AND/OR groups.
//!
//! The JSON shape matches what the segment editor persists: groups carry
//! `"type": "group"`, conditions carry no tag.
//!
//! ```json
//! { "id": "root", "type": "group", "logic": "AND", "children": [
//!     { "id": "c1", "field": "status", "operator": "equals", "value": "Active" }
//! ] }
//! ```

use std::collections::HashSet;

use crm_core::{SegmentError, SegmentResult, SegmentationConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::FieldCatalog;
use crate::operators::{self, Operator};

pub const ROOT_ID: &str = "root";

/// A segment's rule tree is its root group.
pub type RuleTree = Group;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    #[default]
    #[serde(alias = "and")]
    And,
    #[serde(alias = "or")]
    Or,
}

/// Right-hand side of a condition. Shapes the engine cannot interpret are
/// kept in `Other` so the evaluator can report them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum ConditionValue {
    Text(String),
    Number(f64),
    List(Vec<Value>),
    Other(Value),
}

impl ConditionValue {
    pub fn empty() -> Self {
        Self::Text(String::new())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Text(s) if s.is_empty())
    }

    pub fn range(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self::List(vec![Value::String(start.into()), Value::String(end.into())])
    }
}

impl Default for ConditionValue {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Value> for ConditionValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::empty(),
            Value::String(s) => Self::Text(s),
            Value::Number(n) => match n.as_f64() {
                Some(f) => Self::Number(f),
                None => Self::Other(Value::Number(n)),
            },
            Value::Array(items) => Self::List(items),
            other => Self::Other(other),
        }
    }
}

impl From<ConditionValue> for Value {
    fn from(value: ConditionValue) -> Self {
        match value {
            ConditionValue::Text(s) => Value::String(s),
            ConditionValue::Number(n) => serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ConditionValue::List(items) => Value::Array(items),
            ConditionValue::Other(v) => v,
        }
    }
}

impl From<&str> for ConditionValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for ConditionValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for ConditionValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

/// Leaf rule: one field, one operator, one value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub id: String,
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: ConditionValue,
}

impl Condition {
    pub fn new(
        id: impl Into<String>,
        field: impl Into<String>,
        operator: impl Into<Operator>,
        value: impl Into<ConditionValue>,
    ) -> Self {
        Self {
            id: id.into(),
            field: field.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }
}

/// Internal node combining its children with AND/OR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawGroup", into = "RawGroup")]
pub struct Group {
    pub id: String,
    pub logic: Logic,
    pub children: Vec<RuleNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleNode {
    Group(Group),
    Condition(Condition),
}

#[derive(Serialize, Deserialize)]
enum GroupTag {
    #[serde(rename = "group")]
    Group,
}

#[derive(Serialize, Deserialize)]
struct RawGroup {
    id: String,
    #[serde(rename = "type")]
    tag: GroupTag,
    logic: Logic,
    #[serde(default)]
    children: Vec<RuleNode>,
}

impl From<RawGroup> for Group {
    fn from(raw: RawGroup) -> Self {
        Self {
            id: raw.id,
            logic: raw.logic,
            children: raw.children,
        }
    }
}

impl From<Group> for RawGroup {
    fn from(group: Group) -> Self {
        Self {
            id: group.id,
            tag: GroupTag::Group,
            logic: group.logic,
            children: group.children,
        }
    }
}

impl RuleNode {
    pub fn id(&self) -> &str {
        match self {
            Self::Group(g) => &g.id,
            Self::Condition(c) => &c.id,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }
}

impl From<Condition> for RuleNode {
    fn from(c: Condition) -> Self {
        Self::Condition(c)
    }
}

impl From<Group> for RuleNode {
    fn from(g: Group) -> Self {
        Self::Group(g)
    }
}

/// Structural limits applied when a tree is accepted for persistence.
#[derive(Debug, Clone, Copy)]
pub struct TreeLimits {
    pub max_depth: usize,
    pub max_children: usize,
}

impl Default for TreeLimits {
    fn default() -> Self {
        Self::from(&SegmentationConfig::default())
    }
}

impl From<&SegmentationConfig> for TreeLimits {
    fn from(cfg: &SegmentationConfig) -> Self {
        Self {
            max_depth: cfg.max_depth,
            max_children: cfg.max_children,
        }
    }
}

/// Non-fatal finding about a condition that the evaluator can still handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleWarning {
    pub condition_id: String,
    pub message: String,
}

impl Group {
    pub fn new(id: impl Into<String>, logic: Logic) -> Self {
        Self {
            id: id.into(),
            logic,
            children: Vec::new(),
        }
    }

    pub fn root(logic: Logic) -> Self {
        Self::new(ROOT_ID, logic)
    }

    pub fn with_child(mut self, child: impl Into<RuleNode>) -> Self {
        self.children.push(child.into());
        self
    }

    /// Depth-first search for a group by id, the group itself included.
    pub fn find_group(&self, id: &str) -> Option<&Group> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| match child {
            RuleNode::Group(g) => g.find_group(id),
            RuleNode::Condition(_) => None,
        })
    }

    /// Child indices leading from this group to the group with `id`.
    pub(crate) fn path_to(&self, id: &str) -> Option<Vec<usize>> {
        if self.id == id {
            return Some(Vec::new());
        }
        for (idx, child) in self.children.iter().enumerate() {
            if let RuleNode::Group(g) = child {
                if let Some(mut path) = g.path_to(id) {
                    path.insert(0, idx);
                    return Some(path);
                }
            }
        }
        None
    }

    /// Rebuild the tree with the group at `path` replaced by `f(group)`.
    /// Untouched subtrees are cloned, never shared mutably.
    pub(crate) fn rewrite_at(&self, path: &[usize], f: impl FnOnce(&Group) -> Group) -> Group {
        match path.split_first() {
            None => f(self),
            Some((&idx, rest)) => {
                let mut children = Vec::with_capacity(self.children.len());
                let mut f = Some(f);
                for (i, child) in self.children.iter().enumerate() {
                    match (child, i == idx, f.take()) {
                        (RuleNode::Group(g), true, Some(f)) => {
                            children.push(RuleNode::Group(g.rewrite_at(rest, f)))
                        }
                        (_, _, pending) => {
                            f = pending;
                            children.push(child.clone());
                        }
                    }
                }
                Group {
                    id: self.id.clone(),
                    logic: self.logic,
                    children,
                }
            }
        }
    }

    /// Ids of every node in the tree, this group first, depth-first.
    pub fn node_ids(&self) -> Vec<&str> {
        let mut ids = vec![self.id.as_str()];
        for child in &self.children {
            match child {
                RuleNode::Group(g) => ids.extend(g.node_ids()),
                RuleNode::Condition(c) => ids.push(&c.id),
            }
        }
        ids
    }

    pub fn conditions(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        for child in &self.children {
            match child {
                RuleNode::Group(g) => out.extend(g.conditions()),
                RuleNode::Condition(c) => out.push(c),
            }
        }
        out
    }

    /// Levels of groups, a lone root counting as one. Walks with an explicit
    /// stack so trees of any depth can be measured before they are rejected.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut pending = vec![(self, 1)];
        while let Some((group, level)) = pending.pop() {
            deepest = deepest.max(level);
            pending.extend(group.children.iter().filter_map(|c| match c {
                RuleNode::Group(g) => Some((g, level + 1)),
                RuleNode::Condition(_) => None,
            }));
        }
        deepest
    }

    pub fn has_unique_ids(&self) -> bool {
        let mut seen = HashSet::new();
        self.node_ids().into_iter().all(|id| seen.insert(id))
    }

    /// Structural shape check applied before a tree is persisted.
    pub fn validate(&self, limits: &TreeLimits) -> SegmentResult<()> {
        let depth = self.depth();
        if depth > limits.max_depth {
            return Err(SegmentError::Validation(format!(
                "rule tree is nested {depth} levels deep (max {})",
                limits.max_depth
            )));
        }
        let mut seen = HashSet::new();
        for id in self.node_ids() {
            if id.trim().is_empty() {
                return Err(SegmentError::Validation("rule node with empty id".into()));
            }
            if !seen.insert(id) {
                return Err(SegmentError::Validation(format!("duplicate rule id '{id}'")));
            }
        }
        self.check_fan_out(limits.max_children)
    }

    fn check_fan_out(&self, max_children: usize) -> SegmentResult<()> {
        if self.children.len() > max_children {
            return Err(SegmentError::Validation(format!(
                "group '{}' has {} children (max {max_children})",
                self.id,
                self.children.len()
            )));
        }
        for child in &self.children {
            if let RuleNode::Group(g) = child {
                g.check_fan_out(max_children)?;
            }
        }
        Ok(())
    }

    /// Conditions whose field or operator do not fit the catalog.
    pub fn lint(&self, catalog: &FieldCatalog) -> Vec<RuleWarning> {
        self.conditions()
            .into_iter()
            .filter_map(|c| {
                let message = if !catalog.contains(&c.field) {
                    format!("unknown field '{}'", c.field)
                } else if !operators::is_allowed(catalog, &c.field, &c.operator) {
                    format!("operator '{}' is not valid for field '{}'", c.operator, c.field)
                } else {
                    return None;
                };
                Some(RuleWarning {
                    condition_id: c.id.clone(),
                    message,
                })
            })
            .collect()
    }

    pub fn to_value(&self) -> SegmentResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode a persisted tree; the root must be a tagged group.
    pub fn from_value(value: Value) -> SegmentResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| SegmentError::Validation(format!("malformed rule tree: {e}")))
    }
}

impl Default for Group {
    fn default() -> Self {
        Self::root(Logic::And)
    }
}
