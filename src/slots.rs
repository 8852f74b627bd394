//! # Slot Projector
//!
//! Moves caller-injected children into the `<slot>` placeholders of the
//! component that received them.
//!
//! ## Key Invariants
//!
//! 1. **Clones only**: every matching placeholder receives its own deep copy
//!    of the injected child. The original is always detached afterwards.
//! 2. **Fallback is dropped once**: the first child projected into a
//!    placeholder clears its fallback content; later children append.
//! 3. **Top-down**: a boundary is projected before anything nested inside
//!    it, so children forwarded through drilled slots arrive before the
//!    inner component distributes them.
//! 4. **Bounded reach**: slot lookup never descends into a nested component,
//!    except for that component's directly injected placeholders which carry
//!    an explicit `slot` target (slot drilling).

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::element::{NodeId, Origin, Tree, DEFAULT_SLOT};
use crate::error::{Diagnostic, RenderResult, W_SLOT_MISSING};
use crate::registry::{StyleRef, StyleRegistry};
use crate::style::StyleUnit;

/// Project injected children for every boundary in the tree.
pub fn project_slots(tree: &mut Tree, registry: &mut StyleRegistry, diagnostics: &mut Vec<Diagnostic>) -> RenderResult<usize> {
    let root = tree.require_root()?;
    let mut projected = 0;
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if tree.node(id).is_boundary() {
            projected += project_boundary(tree, id, registry, diagnostics);
        }
        stack.extend(tree.children(id).iter().rev().copied());
    }
    debug!(projected, "slot projection finished");
    Ok(projected)
}

/// Placeholders reachable from `boundary`, grouped by slot name in document order.
fn available_slots(tree: &Tree, boundary: NodeId) -> BTreeMap<String, Vec<NodeId>> {
    let mut slots: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
    let mut stack: Vec<NodeId> = internal_children(tree, boundary).into_iter().rev().collect();

    while let Some(id) = stack.pop() {
        let node = tree.node(id);
        if node.is_boundary() {
            for &drilled in node.children() {
                let candidate = tree.node(drilled);
                if candidate.origin() == Origin::Injected && candidate.attribute("slot").is_some() {
                    if let Some(name) = candidate.slot_name() {
                        slots.entry(name.to_string()).or_default().push(drilled);
                    }
                }
            }
            continue;
        }
        if let Some(name) = node.slot_name() {
            slots.entry(name.to_string()).or_default().push(id);
            continue;
        }
        stack.extend(node.children().iter().rev().copied());
    }
    slots
}

fn internal_children(tree: &Tree, id: NodeId) -> Vec<NodeId> {
    tree.children(id)
        .iter()
        .copied()
        .filter(|c| tree.node(*c).origin() == Origin::Internal)
        .collect()
}

fn injected_children(tree: &Tree, id: NodeId) -> Vec<NodeId> {
    tree.children(id)
        .iter()
        .copied()
        .filter(|c| tree.node(*c).origin() == Origin::Injected)
        .collect()
}

/// Children a wrapper renders on its own. A boundary's injected children
/// belong to its caller and are still waiting for their own projection.
fn rendered_children(tree: &Tree, id: NodeId) -> Vec<NodeId> {
    if tree.node(id).is_boundary() {
        internal_children(tree, id)
    } else {
        tree.children(id).to_vec()
    }
}

/// The node whose `slot` attribute routes `id`: the node itself, or for a
/// wrapper fragment (such as another component's boundary) the first
/// element it renders that names a slot.
fn slot_carrier(tree: &Tree, id: NodeId) -> Option<NodeId> {
    let node = tree.node(id);
    if node.attribute("slot").is_some() {
        return Some(id);
    }
    if !node.is_fragment() {
        return None;
    }
    rendered_children(tree, id)
        .into_iter()
        .find_map(|c| slot_carrier(tree, c))
}

fn target_slot(tree: &Tree, id: NodeId) -> String {
    slot_carrier(tree, id)
        .and_then(|carrier| tree.node(carrier).attribute("slot"))
        .and_then(|v| v.as_text())
        .unwrap_or(DEFAULT_SLOT)
        .to_string()
}

fn project_boundary(tree: &mut Tree, boundary: NodeId, registry: &mut StyleRegistry, diagnostics: &mut Vec<Diagnostic>) -> usize {
    let injected = injected_children(tree, boundary);
    if injected.is_empty() {
        return 0;
    }

    let slots = available_slots(tree, boundary);
    let Some(info) = tree.node(boundary).boundary().map(|b| b.info.clone()) else {
        return 0;
    };
    let host_units: Vec<Arc<StyleUnit>> = tree
        .node(boundary)
        .style()
        .and_then(|s| registry.units(s))
        .map(<[_]>::to_vec)
        .unwrap_or_default();

    let mut projected = 0;
    for child in injected {
        let target = target_slot(tree, child);
        tree.detach(child);

        let Some(placeholders) = slots.get(&target) else {
            let message = format!(
                "Component '{}' has no slot named '{}'; injected child dropped",
                info.name, target
            );
            warn!(component = %info.name, slot = %target, "{}", message);
            diagnostics.push(Diagnostic::new(W_SLOT_MISSING, message));
            continue;
        };

        for &placeholder in placeholders {
            if !tree.node(placeholder).slot_filled {
                tree.clear_children(placeholder);
                tree.node_mut(placeholder).slot_filled = true;
            }
            let copy = tree.clone_subtree(child);
            if let Some(carrier) = slot_carrier(tree, copy) {
                tree.remove_attribute(carrier, "slot");
            }
            if let Some(unit) = info.slot_styles.get(&target) {
                apply_slot_style(tree, copy, registry, &host_units, unit, &format!("{}/{}", info.name, target));
            }
            tree.append_child(placeholder, copy);
            projected += 1;
        }

        if let Some(b) = tree.boundary_mut(boundary) {
            b.filled_slots.insert(target);
        }
    }
    projected
}

/// Give the outermost rendered elements of a projected copy the merged
/// host + child + override scope. Wrapper fragments are looked through
/// because they never reach the markup; content the copy's caller injected
/// into it keeps its own scope.
fn apply_slot_style(
    tree: &mut Tree,
    copy: NodeId,
    registry: &mut StyleRegistry,
    host_units: &[Arc<StyleUnit>],
    unit: &Arc<StyleUnit>,
    provenance: &str,
) {
    for element in surface_elements(tree, copy) {
        let child_units: Vec<Arc<StyleUnit>> = tree
            .node(element)
            .style()
            .and_then(|s| registry.units(s))
            .map(<[_]>::to_vec)
            .unwrap_or_default();
        let uuid = registry.register_slot(host_units, &child_units, unit, provenance);
        tree.node_mut(element).style = Some(StyleRef::Slot(uuid));
    }
}

fn surface_elements(tree: &Tree, id: NodeId) -> Vec<NodeId> {
    let node = tree.node(id);
    if node.is_text() {
        return Vec::new();
    }
    if node.is_fragment() || node.is_slot() {
        return rendered_children(tree, id)
            .into_iter()
            .flat_map(|c| surface_elements(tree, c))
            .collect();
    }
    if node.is_stylable() {
        vec![id]
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{component, Builder, Props};
    use crate::element::Attribute;
    use crate::pipeline::register_styles;
    use crate::style::FunctionInfo;

    fn project(tree: &mut Tree) -> (StyleRegistry, Vec<Diagnostic>) {
        let mut registry = StyleRegistry::new();
        let mut diagnostics = Vec::new();
        register_styles(tree, &mut registry).unwrap();
        project_slots(tree, &mut registry, &mut diagnostics).unwrap();
        tree.relink();
        (registry, diagnostics)
    }

    #[test]
    fn test_named_slot_receives_child() {
        let parent = component(FunctionInfo::new("Parent"), |_, cx| {
            let slot = cx.slot(Some("child"), vec![], ())?;
            Ok(cx.element("section", vec![], slot)?.into())
        });
        let mut cx = Builder::new();
        let div = cx.element("div", vec![Attribute::new("slot", "child")], "hi").unwrap();
        let root = cx.component(&parent, Props::new(), div).unwrap();
        let (mut tree, _) = cx.finish(root);
        let (_, diagnostics) = project(&mut tree);

        assert!(diagnostics.is_empty());
        assert_eq!(tree.outline(root), "fragment[section[slot:child[div[#text(\"hi\")]]]]");
        let copy = tree.find(root, |n| n.tag() == "div").unwrap();
        assert_ne!(copy, div);
        assert!(tree.node(copy).attribute("slot").is_none());
        assert!(tree.node(div).parent().is_none());
        assert!(tree.node(root).boundary().unwrap().filled_slots.contains("child"));
    }

    #[test]
    fn test_component_child_routes_by_its_root_element() {
        let parent = component(FunctionInfo::new("Parent"), |_, cx| Ok(cx.slot(Some("child"), vec![], ())?.into()));
        let child = component(FunctionInfo::new("Child"), |_, cx| {
            Ok(cx.element("div", vec![Attribute::new("slot", "child")], "text")?.into())
        });
        let mut cx = Builder::new();
        let injected = cx.component(&child, Props::new(), ()).unwrap();
        let root = cx.component(&parent, Props::new(), injected).unwrap();
        let (mut tree, _) = cx.finish(root);
        let (_, diagnostics) = project(&mut tree);

        assert!(diagnostics.is_empty());
        assert_eq!(tree.outline(root), "fragment[slot:child[fragment[div[#text(\"text\")]]]]");
        let div = tree.find(root, |n| n.tag() == "div").unwrap();
        assert!(tree.node(div).attribute("slot").is_none());
    }

    #[test]
    fn test_component_child_keeps_its_own_slotted_children() {
        let parent = component(FunctionInfo::new("Parent"), |_, cx| {
            let named = cx.slot(Some("x"), vec![], ())?;
            let default = cx.slot(None, vec![], ())?;
            Ok(cx.element("section", vec![], vec![named, default])?.into())
        });
        let child = component(FunctionInfo::new("Child"), |_, cx| {
            let named = cx.slot(Some("x"), vec![], ())?;
            Ok(cx.element("div", vec![], named)?.into())
        });
        let mut cx = Builder::new();
        let span = cx.element("span", vec![Attribute::new("slot", "x")], "hi").unwrap();
        let injected = cx.component(&child, Props::new(), span).unwrap();
        let root = cx.component(&parent, Props::new(), injected).unwrap();
        let (mut tree, _) = cx.finish(root);
        let (_, diagnostics) = project(&mut tree);

        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert_eq!(
            tree.outline(root),
            "fragment[section[slot:x,slot:default[fragment[div[slot:x[span[#text(\"hi\")]]]]]]]"
        );
        let copy = tree.find(root, |n| n.tag() == "span").unwrap();
        assert!(tree.node(copy).attribute("slot").is_none());
    }

    #[test]
    fn test_fan_out_clones_are_independent() {
        let twice = component(FunctionInfo::new("Twice"), |_, cx| {
            let a = cx.slot(None, vec![], ())?;
            let b = cx.slot(None, vec![], ())?;
            Ok(cx.fragment(vec![a, b])?.into())
        });
        let mut cx = Builder::new();
        let p = cx.element("p", vec![], "x").unwrap();
        let root = cx.component(&twice, Props::new(), p).unwrap();
        let (mut tree, _) = cx.finish(root);
        project(&mut tree);

        let copies: Vec<NodeId> = tree
            .descendants(root)
            .into_iter()
            .filter(|n| tree.node(*n).tag() == "p")
            .collect();
        assert_eq!(copies.len(), 2);
        assert_ne!(copies[0], copies[1]);

        tree.push_attribute(copies[0], Attribute::new("id", "first"));
        assert!(tree.node(copies[1]).attribute("id").is_none());
    }

    #[test]
    fn test_fallback_kept_until_filled() {
        let card = component(FunctionInfo::new("Card"), |_, cx| {
            let title = cx.slot(Some("title"), vec![], "Untitled")?;
            let body = cx.slot(None, vec![], "No body")?;
            Ok(cx.fragment(vec![title, body])?.into())
        });

        let mut cx = Builder::new();
        let a = cx.element("b", vec![], "one").unwrap();
        let b = cx.element("i", vec![], "two").unwrap();
        let root = cx.component(&card, Props::new(), vec![a, b]).unwrap();
        let (mut tree, _) = cx.finish(root);
        project(&mut tree);

        assert_eq!(
            tree.outline(root),
            "fragment[slot:title[#text(\"Untitled\")],slot:default[b[#text(\"one\")],i[#text(\"two\")]]]"
        );
    }

    #[test]
    fn test_missing_slot_drops_child_with_warning() {
        let bare = component(FunctionInfo::new("Bare"), |_, cx| Ok(cx.element("div", vec![], ())?.into()));
        let mut cx = Builder::new();
        let orphan = cx.element("span", vec![Attribute::new("slot", "nowhere")], ()).unwrap();
        let root = cx.component(&bare, Props::new(), orphan).unwrap();
        let (mut tree, _) = cx.finish(root);
        let (_, diagnostics) = project(&mut tree);

        assert_eq!(tree.outline(root), "fragment[div]");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, W_SLOT_MISSING);
        assert!(diagnostics[0].message.contains("nowhere"));
    }

    #[test]
    fn test_slot_drilling_forwards_through_inner_component() {
        let inner = component(FunctionInfo::new("Inner"), |_, cx| {
            let slot = cx.slot(Some("title"), vec![], ())?;
            Ok(cx.element("h1", vec![], slot)?.into())
        });
        let outer = {
            let inner = inner.clone();
            component(FunctionInfo::new("Outer"), move |_, cx| {
                let drilled = cx.slot(Some("heading"), vec![Attribute::new("slot", "title")], ())?;
                Ok(cx.component(&inner, Props::new(), drilled)?.into())
            })
        };

        let mut cx = Builder::new();
        let text = cx.element("em", vec![Attribute::new("slot", "heading")], "Hello").unwrap();
        let root = cx.component(&outer, Props::new(), text).unwrap();
        let (mut tree, _) = cx.finish(root);
        let (_, diagnostics) = project(&mut tree);

        assert!(diagnostics.is_empty());
        assert_eq!(
            tree.outline(root),
            "fragment[fragment[h1[slot:title[slot:heading[em[#text(\"Hello\")]]]]]]"
        );
    }

    #[test]
    fn test_slots_inside_nested_components_are_not_reachable() {
        let inner = component(FunctionInfo::new("Inner"), |_, cx| Ok(cx.slot(Some("deep"), vec![], ())?.into()));
        let outer = {
            let inner = inner.clone();
            component(FunctionInfo::new("Outer"), move |_, cx| Ok(cx.component(&inner, Props::new(), ())?.into()))
        };
        let mut cx = Builder::new();
        let child = cx.element("p", vec![Attribute::new("slot", "deep")], ()).unwrap();
        let root = cx.component(&outer, Props::new(), child).unwrap();
        let (mut tree, _) = cx.finish(root);
        let (_, diagnostics) = project(&mut tree);
        assert_eq!(diagnostics.len(), 1);
        assert!(tree.find(root, |n| n.tag() == "p").is_none());
    }

    #[test]
    fn test_slot_override_applies_to_projected_element() {
        use crate::style::StyleUnit;

        let host_info = FunctionInfo::new("Host")
            .with_style(StyleUnit::new("host", ".h{}"))
            .with_slot_style("item", StyleUnit::new("over", "li{}"));
        let host = component(host_info, |_, cx| {
            let slot = cx.slot(Some("item"), vec![], ())?;
            Ok(cx.element("ul", vec![], slot)?.into())
        });
        let page = {
            let host = host.clone();
            component(FunctionInfo::new("Page").with_style(StyleUnit::new("page", "li{}")), move |_, cx| {
                let li = cx.element("li", vec![Attribute::new("slot", "item")], "x")?;
                Ok(cx.component(&host, Props::new(), li)?.into())
            })
        };

        let mut cx = Builder::new();
        let root = cx.component(&page, Props::new(), ()).unwrap();
        let (mut tree, _) = cx.finish(root);
        let (registry, _) = project(&mut tree);

        let li = tree.find(root, |n| n.tag() == "li").unwrap();
        let style = tree.node(li).style().cloned().unwrap();
        assert!(matches!(style, StyleRef::Slot(_)));
        let ids: Vec<_> = registry.units(&style).unwrap().iter().map(|u| u.id.clone()).collect();
        assert_eq!(ids, vec!["host", "page", "over"]);
    }

    #[test]
    fn test_slot_override_skips_content_injected_into_slotted_component() {
        use crate::style::StyleUnit;

        let host_info = FunctionInfo::new("Host")
            .with_style(StyleUnit::new("host", ".h{}"))
            .with_slot_style("item", StyleUnit::new("over", "li{}"));
        let host = component(host_info, |_, cx| {
            let slot = cx.slot(Some("item"), vec![], ())?;
            Ok(cx.element("ul", vec![], slot)?.into())
        });
        let item = component(FunctionInfo::new("Item"), |_, cx| {
            let slot = cx.slot(None, vec![], ())?;
            Ok(cx.element("li", vec![Attribute::new("slot", "item")], slot)?.into())
        });
        let page = {
            let host = host.clone();
            let item = item.clone();
            component(FunctionInfo::new("Page").with_style(StyleUnit::new("page", "b{}")), move |_, cx| {
                let b = cx.element("b", vec![], ())?;
                let slotted = cx.component(&item, Props::new(), b)?;
                Ok(cx.component(&host, Props::new(), slotted)?.into())
            })
        };

        let mut cx = Builder::new();
        let root = cx.component(&page, Props::new(), ()).unwrap();
        let (mut tree, _) = cx.finish(root);
        let (registry, diagnostics) = project(&mut tree);
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);

        let li = tree.find(root, |n| n.tag() == "li").unwrap();
        let li_style = tree.node(li).style().cloned().unwrap();
        assert!(matches!(li_style, StyleRef::Slot(_)));
        let li_ids: Vec<_> = registry.units(&li_style).unwrap().iter().map(|u| u.id.clone()).collect();
        assert_eq!(li_ids, vec!["host", "over"]);

        let b = tree.find(root, |n| n.tag() == "b").unwrap();
        assert!(tree.find(li, |n| n.tag() == "b").is_some());
        let b_style = tree.node(b).style().cloned().unwrap();
        assert!(matches!(b_style, StyleRef::Component(_)));
        let b_ids: Vec<_> = registry.units(&b_style).unwrap().iter().map(|u| u.id.clone()).collect();
        assert_eq!(b_ids, vec!["page"]);
    }
}
