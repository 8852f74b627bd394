//! HTML serialization. A read-only walk over the final tree.

use crate::element::{AttrValue, Node, NodeId, NodeKind, Tree};
use crate::error::RenderResult;
use crate::options::RenderOptions;

const RAW_TEXT_TAGS: &[&str] = &["script", "style"];

pub fn serialize(tree: &Tree, options: &RenderOptions) -> RenderResult<String> {
    let root = tree.require_root()?;
    let mut out = String::new();
    if options.doctype {
        out.push_str("<!DOCTYPE html>");
    }
    let writer = Writer { tree, options, root };
    writer.node(root, &mut out);
    Ok(out)
}

struct Writer<'a> {
    tree: &'a Tree,
    options: &'a RenderOptions,
    root: NodeId,
}

impl Writer<'_> {
    fn node(&self, id: NodeId, out: &mut String) {
        let node = self.tree.node(id);
        match node.kind() {
            NodeKind::Text(value) => {
                let raw = node
                    .parent()
                    .map(|p| self.tree.node(p).tag().to_ascii_lowercase())
                    .is_some_and(|tag| RAW_TEXT_TAGS.contains(&tag.as_str()));
                if raw {
                    out.push_str(value);
                } else {
                    out.push_str(&escape_text(value));
                }
            }
            NodeKind::Fragment if self.options.debug_fragments && id != self.root => {
                out.push_str("<fragment");
                if let Some(boundary) = node.boundary() {
                    out.push_str(&format!(" data-component=\"{}\"", escape_attr(&boundary.info.name)));
                }
                out.push_str(&attributes(node));
                out.push('>');
                self.children(id, out);
                out.push_str("</fragment>");
            }
            NodeKind::Slot(name) if self.options.debug_fragments => {
                out.push_str(&format!("<slot name=\"{}\">", escape_attr(name)));
                self.children(id, out);
                out.push_str("</slot>");
            }
            NodeKind::Fragment | NodeKind::Slot(_) => self.children(id, out),
            NodeKind::Element => {
                out.push('<');
                out.push_str(node.tag());
                out.push_str(&attributes(node));
                out.push('>');
                if node.is_void() {
                    return;
                }
                self.children(id, out);
                out.push_str("</");
                out.push_str(node.tag());
                out.push('>');
            }
        }
    }

    fn children(&self, id: NodeId, out: &mut String) {
        for &child in self.tree.children(id) {
            self.node(child, out);
        }
    }
}

/// Merge and render an element's attribute list.
///
/// `class` and `className` values are joined into one `class` attribute at
/// the position of the first one. Any other repeated name keeps its first
/// position and takes the last value.
fn attributes(node: &Node) -> String {
    let mut merged: Vec<(String, Option<String>)> = Vec::new();
    let mut classes: Vec<String> = Vec::new();
    let mut class_slot: Option<usize> = None;

    for attribute in node.attributes() {
        let value = attribute.value.evaluate();
        if attribute.name == "class" || attribute.name == "className" {
            if class_slot.is_none() {
                class_slot = Some(merged.len());
                merged.push(("class".to_string(), None));
            }
            if let AttrValue::Text(text) = value {
                classes.extend(text.split_whitespace().map(str::to_string));
            }
            continue;
        }

        let rendered = match value {
            AttrValue::Text(text) => Some(Some(text)),
            AttrValue::Bool(true) => Some(None),
            AttrValue::Bool(false) | AttrValue::Dynamic(_) => None,
        };
        let existing = merged.iter().position(|(name, _)| *name == attribute.name);
        match (existing, rendered) {
            (Some(index), Some(value)) => merged[index].1 = value,
            (Some(index), None) => {
                merged.remove(index);
                if let Some(slot) = class_slot.as_mut() {
                    if *slot > index {
                        *slot -= 1;
                    }
                }
            }
            (None, Some(value)) => merged.push((attribute.name.clone(), value)),
            (None, None) => {}
        }
    }

    if let Some(index) = class_slot {
        if classes.is_empty() {
            merged.remove(index);
        } else {
            merged[index].1 = Some(classes.join(" "));
        }
    }

    let mut out = String::new();
    for (name, value) in merged {
        out.push(' ');
        out.push_str(&name);
        if let Some(value) = value {
            out.push_str("=\"");
            out.push_str(&escape_attr(&value));
            out.push('"');
        }
    }
    out
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\"', "&quot;")
}
