//! Pure functions over the notebook tree.

use crate::error::TreeError;
use crate::models::Notebook;
use std::collections::{HashMap, HashSet};

/// Parent id to child ids, children in title order. Roots live under `None`.
#[derive(Clone, Debug, Default)]
pub struct ChildrenIndex {
    children: HashMap<Option<String>, Vec<String>>,
    known: HashSet<String>,
}

impl ChildrenIndex {
    pub fn build(notebooks: &[Notebook]) -> Self {
        let mut sorted: Vec<&Notebook> = notebooks.iter().collect();
        sorted.sort_by_key(|nb| nb.title.to_lowercase());

        let mut index = Self::default();
        for nb in sorted {
            index.known.insert(nb.id.clone());
            index
                .children
                .entry(nb.parent_id.clone())
                .or_default()
                .push(nb.id.clone());
        }
        index
    }

    pub fn children(&self, parent: Option<&str>) -> &[String] {
        self.children
            .get(&parent.map(str::to_string))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.known.contains(id)
    }
}

/// Whether `candidate` sits somewhere below `ancestor`. A node is not its own
/// descendant.
pub fn is_descendant(ancestor: &str, candidate: &str, index: &ChildrenIndex) -> bool {
    let mut stack: Vec<&str> = index
        .children(Some(ancestor))
        .iter()
        .map(String::as_str)
        .collect();
    // Guards against corrupt data that already contains a cycle.
    let mut seen: HashSet<&str> = HashSet::new();

    while let Some(id) = stack.pop() {
        if id == candidate {
            return true;
        }
        if seen.insert(id) {
            stack.extend(index.children(Some(id)).iter().map(String::as_str));
        }
    }
    false
}

/// `root` followed by all of its descendants, pre-order.
pub fn subtree_ids(root: &str, index: &ChildrenIndex) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![root.to_string()];

    while let Some(id) = stack.pop() {
        if !seen.insert(id.clone()) {
            continue;
        }
        // Reverse so the first child is visited first.
        for child in index.children(Some(id.as_str())).iter().rev() {
            stack.push(child.clone());
        }
        out.push(id);
    }
    out
}

/// Rejects a move of `id` under `new_parent` that would break the tree.
pub fn check_reparent(
    id: &str,
    new_parent: Option<&str>,
    index: &ChildrenIndex,
) -> Result<(), TreeError> {
    if !index.contains(id) {
        return Err(TreeError::UnknownNotebook { id: id.to_string() });
    }
    let Some(parent) = new_parent else {
        return Ok(());
    };
    if parent == id {
        return Err(TreeError::SelfParent { id: id.to_string() });
    }
    if !index.contains(parent) {
        return Err(TreeError::UnknownNotebook {
            id: parent.to_string(),
        });
    }
    if is_descendant(id, parent, index) {
        return Err(TreeError::Cycle {
            id: id.to_string(),
            parent: parent.to_string(),
        });
    }
    Ok(())
}
