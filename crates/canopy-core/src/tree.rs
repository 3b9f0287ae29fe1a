//! # Tree Assembly
//!
//! Builds an ordered forest from a flat list of list items.
//!
//! Items whose parent is not in the input become roots. This lets the
//! assembler take permission-trimmed traversal results as-is: a reader
//! granted only a subtree gets that subtree back as its own root.

use crate::{EntityId, ListItem, TreeNode};
use std::collections::{BTreeMap, BTreeSet};

/// Assemble `items` into a forest.
///
/// Siblings (and roots) are ordered by `(name, id)`. Duplicate identifiers
/// are collapsed to their first occurrence; a parent cycle in the input is
/// broken rather than looped over.
#[must_use]
pub fn build_tree(items: Vec<ListItem>) -> Vec<TreeNode> {
    let mut by_id: BTreeMap<EntityId, ListItem> = BTreeMap::new();
    for item in items {
        by_id.entry(item.id).or_insert(item);
    }

    let mut children: BTreeMap<EntityId, Vec<EntityId>> = BTreeMap::new();
    let mut roots = Vec::new();
    for item in by_id.values() {
        match item.parent_id {
            Some(parent) if parent != item.id && by_id.contains_key(&parent) => {
                children.entry(parent).or_default().push(item.id);
            }
            _ => roots.push(item.id),
        }
    }

    let sort_key = |id: &EntityId| by_id.get(id).map(|item| (item.name.clone(), *id));
    roots.sort_by_key(sort_key);
    for siblings in children.values_mut() {
        siblings.sort_by_key(sort_key);
    }

    let mut visited = BTreeSet::new();
    let mut forest: Vec<TreeNode> = roots
        .iter()
        .filter_map(|id| assemble(*id, &by_id, &children, &mut visited))
        .collect();

    // Anything not reached from a root sits on a parent cycle. Surface each
    // cycle once, entered at its smallest identifier.
    for id in by_id.keys() {
        if !visited.contains(id) {
            if let Some(node) = assemble(*id, &by_id, &children, &mut visited) {
                forest.push(node);
            }
        }
    }

    forest
}

fn assemble(
    id: EntityId,
    by_id: &BTreeMap<EntityId, ListItem>,
    children: &BTreeMap<EntityId, Vec<EntityId>>,
    visited: &mut BTreeSet<EntityId>,
) -> Option<TreeNode> {
    if !visited.insert(id) {
        return None;
    }
    let item = by_id.get(&id)?.clone();
    let kids = children
        .get(&id)
        .map(|ids| {
            ids.iter()
                .filter_map(|child| assemble(*child, by_id, children, visited))
                .collect()
        })
        .unwrap_or_default();

    Some(TreeNode {
        item,
        children: kids,
    })
}
