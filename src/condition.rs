//! Render-condition evaluation.
//!
//! Runs after slot projection. Each condition is checked against the filled
//! slots of the element's own component boundary. Children are visited
//! before their parent so a removal never depends on a parent that is about
//! to disappear.

use std::collections::BTreeSet;
use tracing::debug;

use crate::element::{NodeId, Tree};
use crate::error::RenderResult;

/// Remove every subtree whose condition is false. Returns the number of
/// subtrees removed.
pub fn evaluate_conditions(tree: &mut Tree) -> RenderResult<usize> {
    let root = tree.require_root()?;
    let mut removed = 0;
    visit(tree, root, root, &mut removed);
    debug!(removed, "render conditions evaluated");
    Ok(removed)
}

fn visit(tree: &mut Tree, id: NodeId, root: NodeId, removed: &mut usize) {
    let children = tree.children(id).to_vec();
    for child in children {
        visit(tree, child, root, removed);
    }

    if holds(tree, id) {
        return;
    }
    *removed += 1;
    if id == root {
        // The root has nowhere to be removed from; drop its content instead.
        tree.clear_children(id);
    } else {
        tree.detach(id);
    }
}

fn holds(tree: &Tree, id: NodeId) -> bool {
    let node = tree.node(id);
    let Some(condition) = node.condition() else {
        return true;
    };
    let empty = BTreeSet::new();
    let filled = node
        .component_fragment()
        .and_then(|b| tree.node(b).boundary())
        .map(|b| &b.filled_slots)
        .unwrap_or(&empty);
    condition.holds(filled)
}
