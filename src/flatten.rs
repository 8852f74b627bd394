//! Fragment and slot flattening.
//!
//! Splices the children of wrapper nodes into the wrapper's parent at the
//! wrapper's position. The page root is never removed. Running the pass on
//! an already flattened tree changes nothing.

use tracing::debug;

use crate::element::{NodeId, Tree};
use crate::error::RenderResult;
use crate::options::FlattenOptions;

/// Returns the number of wrapper nodes removed.
pub fn flatten(tree: &mut Tree, options: FlattenOptions) -> RenderResult<usize> {
    let root = tree.require_root()?;
    let mut removed = 0;
    flatten_children(tree, root, options, &mut removed);
    debug!(removed, "flattened wrappers");
    Ok(removed)
}

fn is_wrapper(tree: &Tree, id: NodeId, options: FlattenOptions) -> bool {
    let node = tree.node(id);
    (options.fragments && node.is_fragment()) || (options.slots && node.is_slot())
}

fn flatten_children(tree: &mut Tree, id: NodeId, options: FlattenOptions, removed: &mut usize) {
    let children = tree.children(id).to_vec();
    if children.is_empty() {
        return;
    }

    let mut spliced = Vec::with_capacity(children.len());
    for child in children {
        flatten_children(tree, child, options, removed);
        if is_wrapper(tree, child, options) {
            spliced.extend(tree.unwrap_node(child));
            *removed += 1;
        } else {
            spliced.push(child);
        }
    }
    tree.replace_children(id, spliced);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Attribute, Origin};

    fn sample() -> (Tree, NodeId) {
        let mut tree = Tree::new();
        let root = tree.create_fragment();
        let outer = tree.create_fragment();
        let inner = tree.create_fragment();
        let a = tree.create_element("a", vec![]).unwrap();
        let slot = tree
            .create_element("slot", vec![Attribute::new("name", "x")])
            .unwrap();
        let b = tree.create_element("b", vec![]).unwrap();
        let c = tree.create_element("c", vec![]).unwrap();
        tree.add_children(slot, vec![b], Origin::Internal).unwrap();
        tree.add_children(inner, vec![a, slot], Origin::Internal).unwrap();
        tree.add_children(outer, vec![inner, c], Origin::Internal).unwrap();
        tree.add_children(root, vec![outer], Origin::Internal).unwrap();
        tree.set_root(root);
        (tree, root)
    }

    #[test]
    fn test_flatten_splices_in_order() {
        let (mut tree, root) = sample();
        assert_eq!(tree.outline(root), "fragment[fragment[fragment[a,slot:x[b]],c]]");
        let removed = flatten(&mut tree, FlattenOptions::default()).unwrap();
        assert_eq!(removed, 3);
        assert_eq!(tree.outline(root), "fragment[a,b,c]");
        for child in tree.children(root) {
            assert_eq!(tree.node(*child).parent(), Some(root));
        }
    }

    #[test]
    fn test_flatten_is_idempotent() {
        let (mut tree, root) = sample();
        flatten(&mut tree, FlattenOptions::default()).unwrap();
        let once = tree.outline(root);
        assert_eq!(flatten(&mut tree, FlattenOptions::default()).unwrap(), 0);
        assert_eq!(tree.outline(root), once);
    }

    #[test]
    fn test_fragments_and_slots_independently() {
        let (mut tree, root) = sample();
        flatten(
            &mut tree,
            FlattenOptions {
                fragments: true,
                slots: false,
            },
        )
        .unwrap();
        assert_eq!(tree.outline(root), "fragment[a,slot:x[b],c]");

        let (mut tree, root) = sample();
        flatten(
            &mut tree,
            FlattenOptions {
                fragments: false,
                slots: true,
            },
        )
        .unwrap();
        assert_eq!(tree.outline(root), "fragment[fragment[fragment[a,b],c]]");
    }
}
