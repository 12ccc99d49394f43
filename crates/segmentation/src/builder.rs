//! Tree builder: authoring operations over a rule tree.
//!
//! The free functions are pure rewrites: they take a tree and return a new
//! one, or `None` when the target does not resolve (the caller keeps its
//! tree unchanged). [`TreeBuilder`] wraps them for one authoring session and
//! pushes every new snapshot to its observers. [`RuleTreeBuilder`] is the
//! fluent API for programmatic callers.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalog::FieldCatalog;
use crate::operators::{self, Operator};
use crate::rules::{Condition, ConditionValue, Group, Logic, RuleNode, RuleTree};

/// Fields of a condition to overwrite. Changing `field` resets the operator
/// to the new field's default and clears the value; `operator` and `value`
/// in the same patch are then ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionPatch {
    pub field: Option<String>,
    pub operator: Option<Operator>,
    pub value: Option<ConditionValue>,
}

impl ConditionPatch {
    pub fn field(field: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            ..Self::default()
        }
    }

    pub fn operator(operator: impl Into<Operator>) -> Self {
        Self {
            operator: Some(operator.into()),
            ..Self::default()
        }
    }

    pub fn value(value: impl Into<ConditionValue>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }
}

fn fresh_id(tree: &RuleTree) -> String {
    let taken: HashSet<&str> = tree.node_ids().into_iter().collect();
    loop {
        let id = Uuid::new_v4().to_string();
        if !taken.contains(id.as_str()) {
            return id;
        }
    }
}

fn edit_group(tree: &RuleTree, group_id: &str, f: impl FnOnce(&Group) -> Group) -> Option<RuleTree> {
    let path = tree.path_to(group_id)?;
    Some(tree.rewrite_at(&path, f))
}

/// Append a condition on the catalog's first field with its default
/// operator and an empty value. Returns the new tree and the condition id.
pub fn add_condition(
    tree: &RuleTree,
    catalog: &FieldCatalog,
    group_id: &str,
) -> Option<(RuleTree, String)> {
    let id = fresh_id(tree);
    let field = catalog.first().map(|f| f.name.clone()).unwrap_or_default();
    let condition = Condition {
        id: id.clone(),
        operator: operators::default_operator(catalog, &field),
        field,
        value: ConditionValue::empty(),
    };
    let next = edit_group(tree, group_id, |g| g.clone().with_child(condition))?;
    Some((next, id))
}

/// Append an empty AND group under `parent_id`.
pub fn add_group(tree: &RuleTree, parent_id: &str) -> Option<(RuleTree, String)> {
    let id = fresh_id(tree);
    let group = Group::new(id.clone(), Logic::And);
    let next = edit_group(tree, parent_id, |g| g.clone().with_child(group))?;
    Some((next, id))
}

/// Remove the direct child `node_id` of `parent_id`.
pub fn remove_node(tree: &RuleTree, parent_id: &str, node_id: &str) -> Option<RuleTree> {
    let parent = tree.find_group(parent_id)?;
    if !parent.children.iter().any(|c| c.id() == node_id) {
        return None;
    }
    edit_group(tree, parent_id, |g| Group {
        id: g.id.clone(),
        logic: g.logic,
        children: g
            .children
            .iter()
            .filter(|c| c.id() != node_id)
            .cloned()
            .collect(),
    })
}

/// Merge `patch` into the condition `condition_id`, a direct child of
/// `group_id`. An operator the condition's field does not allow is refused.
pub fn update_condition(
    tree: &RuleTree,
    catalog: &FieldCatalog,
    group_id: &str,
    condition_id: &str,
    patch: ConditionPatch,
) -> Option<RuleTree> {
    let group = tree.find_group(group_id)?;
    let current = group.children.iter().find_map(|c| match c {
        RuleNode::Condition(cond) if cond.id == condition_id => Some(cond),
        _ => None,
    })?;

    let mut next = current.clone();
    match patch.field {
        Some(field) if field != current.field => {
            next.operator = operators::default_operator(catalog, &field);
            next.value = ConditionValue::empty();
            next.field = field;
        }
        _ => {
            if let Some(op) = patch.operator {
                if !operators::is_allowed(catalog, &next.field, &op) {
                    warn!(
                        condition_id,
                        field = %next.field,
                        operator = %op,
                        "operator not allowed for field, update ignored"
                    );
                    return None;
                }
                next.operator = op;
            }
            if let Some(value) = patch.value {
                next.value = value;
            }
        }
    }

    edit_group(tree, group_id, |g| Group {
        id: g.id.clone(),
        logic: g.logic,
        children: g
            .children
            .iter()
            .map(|c| match c {
                RuleNode::Condition(cond) if cond.id == condition_id => {
                    RuleNode::Condition(next.clone())
                }
                other => other.clone(),
            })
            .collect(),
    })
}

pub fn set_group_logic(tree: &RuleTree, group_id: &str, logic: Logic) -> Option<RuleTree> {
    edit_group(tree, group_id, |g| Group {
        logic,
        ..g.clone()
    })
}

/// Receives the tree after every applied authoring operation.
pub trait TreeObserver: Send + Sync {
    fn tree_changed(&self, tree: &RuleTree);
}

impl<F> TreeObserver for F
where
    F: Fn(&RuleTree) + Send + Sync,
{
    fn tree_changed(&self, tree: &RuleTree) {
        self(tree)
    }
}

/// One editor's working copy of a rule tree. Not shared between editors.
pub struct TreeBuilder {
    tree: RuleTree,
    catalog: Arc<FieldCatalog>,
    observers: Vec<Arc<dyn TreeObserver>>,
}

impl TreeBuilder {
    pub fn new(catalog: Arc<FieldCatalog>) -> Self {
        Self::from_tree(catalog, RuleTree::default())
    }

    pub fn from_tree(catalog: Arc<FieldCatalog>, tree: RuleTree) -> Self {
        Self {
            tree,
            catalog,
            observers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, observer: Arc<dyn TreeObserver>) {
        self.observers.push(observer);
    }

    pub fn tree(&self) -> &RuleTree {
        &self.tree
    }

    pub fn into_tree(self) -> RuleTree {
        self.tree
    }

    fn commit(&mut self, op: &str, next: Option<RuleTree>) -> bool {
        let Some(next) = next else {
            debug!(op, "authoring target not found, tree unchanged");
            return false;
        };
        self.tree = next;
        for observer in &self.observers {
            observer.tree_changed(&self.tree);
        }
        true
    }

    pub fn add_condition(&mut self, group_id: &str) -> Option<String> {
        let (next, id) = add_condition(&self.tree, &self.catalog, group_id).unzip();
        self.commit("add_condition", next).then_some(id).flatten()
    }

    pub fn add_group(&mut self, parent_id: &str) -> Option<String> {
        let (next, id) = add_group(&self.tree, parent_id).unzip();
        self.commit("add_group", next).then_some(id).flatten()
    }

    pub fn remove_node(&mut self, parent_id: &str, node_id: &str) -> bool {
        let next = remove_node(&self.tree, parent_id, node_id);
        self.commit("remove_node", next)
    }

    pub fn update_condition(
        &mut self,
        group_id: &str,
        condition_id: &str,
        patch: ConditionPatch,
    ) -> bool {
        let next = update_condition(&self.tree, &self.catalog, group_id, condition_id, patch);
        self.commit("update_condition", next)
    }

    pub fn set_group_logic(&mut self, group_id: &str, logic: Logic) -> bool {
        let next = set_group_logic(&self.tree, group_id, logic);
        self.commit("set_group_logic", next)
    }
}

/// Fluent construction of a rule tree with generated ids.
pub struct RuleTreeBuilder {
    group: Group,
}

impl RuleTreeBuilder {
    pub fn new(logic: Logic) -> Self {
        Self {
            group: Group::root(logic),
        }
    }

    pub fn with_or(mut self) -> Self {
        self.group.logic = Logic::Or;
        self
    }

    pub fn condition(
        mut self,
        field: impl Into<String>,
        operator: impl Into<Operator>,
        value: impl Into<ConditionValue>,
    ) -> Self {
        self.group.children.push(RuleNode::Condition(Condition::new(
            Uuid::new_v4().to_string(),
            field,
            operator,
            value,
        )));
        self
    }

    pub fn equals(self, field: impl Into<String>, value: impl Into<ConditionValue>) -> Self {
        self.condition(field, Operator::Equals, value)
    }

    pub fn greater_than(self, field: impl Into<String>, value: f64) -> Self {
        self.condition(field, Operator::GreaterThan, value)
    }

    pub fn between(
        self,
        field: impl Into<String>,
        start: impl Into<String>,
        end: impl Into<String>,
    ) -> Self {
        self.condition(field, Operator::Between, ConditionValue::range(start, end))
    }

    pub fn group(mut self, logic: Logic, build: impl FnOnce(Self) -> Self) -> Self {
        let mut nested = build(Self::new(logic)).group;
        nested.id = Uuid::new_v4().to_string();
        self.group.children.push(RuleNode::Group(nested));
        self
    }

    pub fn build(self) -> RuleTree {
        self.group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::ROOT_ID;
    use std::sync::Mutex;

    fn session() -> TreeBuilder {
        TreeBuilder::new(Arc::new(FieldCatalog::customers()))
    }

    fn condition<'a>(tree: &'a RuleTree, group: &str, id: &str) -> &'a Condition {
        tree.find_group(group)
            .unwrap()
            .children
            .iter()
            .find_map(|c| match c {
                RuleNode::Condition(cond) if cond.id == id => Some(cond),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_add_condition_uses_catalog_defaults() {
        let mut b = session();
        let id = b.add_condition(ROOT_ID).unwrap();
        let c = condition(b.tree(), ROOT_ID, &id);
        assert_eq!(c.field, "name");
        assert_eq!(c.operator, Operator::Equals);
        assert!(c.value.is_empty());
    }

    #[test]
    fn test_unknown_group_is_noop() {
        let mut b = session();
        let before = b.tree().clone();
        assert!(b.add_condition("missing").is_none());
        assert!(b.add_group("missing").is_none());
        assert!(!b.remove_node(ROOT_ID, "missing"));
        assert!(!b.set_group_logic("missing", Logic::Or));
        assert_eq!(b.tree(), &before);
    }

    #[test]
    fn test_nested_groups_and_removal() {
        let mut b = session();
        let g = b.add_group(ROOT_ID).unwrap();
        let c = b.add_condition(&g).unwrap();
        assert_eq!(b.tree().find_group(&g).unwrap().logic, Logic::And);
        assert_eq!(b.tree().conditions().len(), 1);

        // Only direct children can be removed through their parent.
        assert!(!b.remove_node(ROOT_ID, &c));
        assert!(b.remove_node(&g, &c));
        assert!(b.remove_node(ROOT_ID, &g));
        assert!(b.tree().children.is_empty());
    }

    #[test]
    fn test_field_change_resets_operator_and_value() {
        let mut b = session();
        let id = b.add_condition(ROOT_ID).unwrap();
        assert!(b.update_condition(ROOT_ID, &id, ConditionPatch::operator("contains")));
        assert!(b.update_condition(ROOT_ID, &id, ConditionPatch::value("ann")));

        let patch = ConditionPatch {
            field: Some("age".into()),
            operator: Some(Operator::Contains),
            value: Some("stale".into()),
        };
        assert!(b.update_condition(ROOT_ID, &id, patch));
        let c = condition(b.tree(), ROOT_ID, &id);
        assert_eq!(c.field, "age");
        assert_eq!(c.operator, Operator::Equals);
        assert!(c.value.is_empty());
    }

    #[test]
    fn test_same_field_keeps_patch_operator() {
        let mut b = session();
        let id = b.add_condition(ROOT_ID).unwrap();
        let patch = ConditionPatch {
            field: Some("name".into()),
            operator: Some(Operator::EndsWith),
            value: Some("son".into()),
        };
        assert!(b.update_condition(ROOT_ID, &id, patch));
        let c = condition(b.tree(), ROOT_ID, &id);
        assert_eq!(c.operator, Operator::EndsWith);
        assert_eq!(c.value, ConditionValue::from("son"));
    }

    #[test]
    fn test_disallowed_operator_is_refused() {
        let mut b = session();
        let id = b.add_condition(ROOT_ID).unwrap();
        assert!(b.update_condition(ROOT_ID, &id, ConditionPatch::field("status")));
        assert!(!b.update_condition(ROOT_ID, &id, ConditionPatch::operator("greater_than")));
        assert_eq!(condition(b.tree(), ROOT_ID, &id).operator, Operator::Equals);
    }

    #[test]
    fn test_observer_sees_each_applied_operation_once() {
        let seen = Arc::new(Mutex::new(Vec::<usize>::new()));
        let mut b = session();
        let sink = seen.clone();
        b.subscribe(Arc::new(move |tree: &RuleTree| {
            sink.lock().unwrap().push(tree.node_ids().len());
        }));

        let g = b.add_group(ROOT_ID).unwrap();
        b.add_condition(&g).unwrap();
        b.set_group_logic(ROOT_ID, Logic::Or);
        b.add_condition("missing");

        assert_eq!(*seen.lock().unwrap(), vec![2, 3, 3]);
        assert_eq!(b.tree().logic, Logic::Or);
    }

    #[test]
    fn test_pure_functions_leave_input_untouched() {
        let catalog = FieldCatalog::customers();
        let tree = RuleTree::default();
        let (next, id) = add_condition(&tree, &catalog, ROOT_ID).unwrap();
        assert!(tree.children.is_empty());
        assert_eq!(next.children.len(), 1);
        let removed = remove_node(&next, ROOT_ID, &id).unwrap();
        assert!(removed.children.is_empty());
        assert_eq!(next.children.len(), 1);
    }

    #[test]
    fn test_fluent_builder() {
        let tree = RuleTreeBuilder::new(Logic::And)
            .equals("status", "Active")
            .group(Logic::Or, |g| {
                g.greater_than("age", 30.0)
                    .between("registration_date", "2024-01-01", "2024-12-31")
            })
            .build();
        assert_eq!(tree.id, ROOT_ID);
        assert_eq!(tree.conditions().len(), 3);
        assert_eq!(tree.depth(), 2);
        assert!(tree.has_unique_ids());
    }
}
