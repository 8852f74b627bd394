//! # Element Tree
//!
//! Arena-backed page tree. Nodes are addressed by [`NodeId`]; a parent owns
//! its children exclusively and the `parent` / `component_fragment` links are
//! plain back-references.
//!
//! ## Invariants
//!
//! 1. **Single parent**: a node is attached to at most one parent. Detached
//!    nodes stay in the arena but are unreachable from the root.
//! 2. **Independent clones**: [`Tree::clone_subtree`] copies every node,
//!    attribute list and child list. Nothing mutable is shared with the source.
//! 3. **Boundary links are derived**: `component_fragment` is recomputed by
//!    [`Tree::relink`] after every restructuring pass. A component boundary
//!    points at itself; every other node points at the boundary of the
//!    component that produced it.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{RenderError, RenderResult};
use crate::registry::StyleRef;
use crate::style::FunctionInfo;

pub const TEXT_TAG: &str = "#text";
pub const FRAGMENT_TAG: &str = "fragment";
pub const SLOT_TAG: &str = "slot";
pub const DEFAULT_SLOT: &str = "default";

const IF_SLOT_FILLED: &str = "ifSlotFilled:";
const IF_SLOT_EMPTY: &str = "ifSlotEmpty:";

lazy_static! {
    static ref SLOT_NAME_RE: Regex = Regex::new(r"^[a-zA-Z_-][a-zA-Z0-9_-]*$").unwrap();
    static ref VOID_TAGS: HashSet<&'static str> = [
        "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
        "track", "wbr",
    ]
    .into_iter()
    .collect();
}

/// Validate a slot name. The empty name is the default slot.
pub fn normalize_slot_name(raw: &str) -> RenderResult<String> {
    if raw.is_empty() {
        return Ok(DEFAULT_SLOT.to_string());
    }
    if !SLOT_NAME_RE.is_match(raw) {
        return Err(RenderError::InvalidSlotName {
            name: raw.to_string(),
        });
    }
    Ok(raw.to_string())
}

pub fn is_void_tag(tag: &str) -> bool {
    VOID_TAGS.contains(tag.to_ascii_lowercase().as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Whether a child was produced by the component's own body or supplied by
/// the caller for slot projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Origin {
    #[default]
    Internal,
    Injected,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ATTRIBUTES
// ═══════════════════════════════════════════════════════════════════════════════

/// Attribute value computed at serialization time.
#[derive(Clone)]
pub struct DynamicAttr(Arc<dyn Fn() -> AttrValue + Send + Sync>);

impl fmt::Debug for DynamicAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DynamicAttr(..)")
    }
}

#[derive(Debug, Clone)]
pub enum AttrValue {
    Text(String),
    Bool(bool),
    Dynamic(DynamicAttr),
}

impl AttrValue {
    /// Invoke callables until a concrete value remains.
    pub fn evaluate(&self) -> AttrValue {
        let mut value = self.clone();
        // Bounded so a callable returning itself cannot spin forever.
        for _ in 0..16 {
            match value {
                AttrValue::Dynamic(DynamicAttr(f)) => value = f(),
                concrete => return concrete,
            }
        }
        AttrValue::Bool(false)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub value: AttrValue,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        Attribute {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn dynamic<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> AttrValue + Send + Sync + 'static,
    {
        Attribute {
            name: name.into(),
            value: AttrValue::Dynamic(DynamicAttr(Arc::new(f))),
        }
    }

    pub fn if_slot_filled(slot: &str) -> Self {
        Attribute::new(format!("{IF_SLOT_FILLED}{slot}"), true)
    }

    pub fn if_slot_empty(slot: &str) -> Self {
        Attribute::new(format!("{IF_SLOT_EMPTY}{slot}"), true)
    }
}

/// Render condition evaluated after slot projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderCondition {
    SlotFilled(String),
    SlotEmpty(String),
}

impl RenderCondition {
    fn parse(attribute_name: &str) -> RenderResult<Option<Self>> {
        if let Some(slot) = attribute_name.strip_prefix(IF_SLOT_FILLED) {
            return Ok(Some(RenderCondition::SlotFilled(normalize_slot_name(slot)?)));
        }
        if let Some(slot) = attribute_name.strip_prefix(IF_SLOT_EMPTY) {
            return Ok(Some(RenderCondition::SlotEmpty(normalize_slot_name(slot)?)));
        }
        Ok(None)
    }

    pub fn holds(&self, filled: &BTreeSet<String>) -> bool {
        match self {
            RenderCondition::SlotFilled(name) => filled.contains(name),
            RenderCondition::SlotEmpty(name) => !filled.contains(name),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element,
    Text(String),
    Fragment,
    /// `<slot>` placeholder with its normalized name.
    Slot(String),
}

/// Marks a fragment as the output of one component invocation.
#[derive(Debug, Clone)]
pub struct Boundary {
    pub info: Arc<FunctionInfo>,
    /// Slot names that received at least one projected child.
    pub filled_slots: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct Node {
    tag: String,
    kind: NodeKind,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    attributes: Vec<Attribute>,
    is_void: bool,
    is_head: bool,
    is_head_child: bool,
    component_fragment: Option<NodeId>,
    origin: Origin,
    condition: Option<RenderCondition>,
    boundary: Option<Box<Boundary>>,
    pub(crate) style: Option<StyleRef>,
    /// Fallback content has already been discarded.
    pub(crate) slot_filled: bool,
}

impl Node {
    fn new(tag: &str, kind: NodeKind) -> Self {
        Node {
            tag: tag.to_string(),
            kind,
            children: Vec::new(),
            parent: None,
            attributes: Vec::new(),
            is_void: false,
            is_head: false,
            is_head_child: false,
            component_fragment: None,
            origin: Origin::Internal,
            condition: None,
            boundary: None,
            style: None,
            slot_filled: false,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes
            .iter()
            .rev()
            .find(|a| a.name == name)
            .map(|a| &a.value)
    }

    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn slot_name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Slot(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self.kind, NodeKind::Text(_))
    }

    pub fn is_fragment(&self) -> bool {
        matches!(self.kind, NodeKind::Fragment)
    }

    pub fn is_slot(&self) -> bool {
        matches!(self.kind, NodeKind::Slot(_))
    }

    pub fn is_void(&self) -> bool {
        self.is_void
    }

    pub fn is_head(&self) -> bool {
        self.is_head
    }

    pub fn is_head_child(&self) -> bool {
        self.is_head_child
    }

    pub fn is_boundary(&self) -> bool {
        self.boundary.is_some()
    }

    pub fn boundary(&self) -> Option<&Boundary> {
        self.boundary.as_deref()
    }

    pub fn component_fragment(&self) -> Option<NodeId> {
        self.component_fragment
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn condition(&self) -> Option<&RenderCondition> {
        self.condition.as_ref()
    }

    pub fn style(&self) -> Option<&StyleRef> {
        self.style.as_ref()
    }

    /// Elements that can carry a scope marker.
    pub fn is_stylable(&self) -> bool {
        !self.is_text() && !self.is_head && !self.is_head_child
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TREE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct Tree {
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn require_root(&self) -> RenderResult<NodeId> {
        self.root.ok_or(RenderError::MissingRoot)
    }

    pub fn set_root(&mut self, id: NodeId) {
        self.root = Some(id);
    }

    /// Construct an element. `fragment` and `slot` tags produce wrapper
    /// nodes; `ifSlotFilled:<name>` / `ifSlotEmpty:<name>` attributes become
    /// the node's render condition (last one wins).
    pub fn create_element(&mut self, tag: &str, attributes: Vec<Attribute>) -> RenderResult<NodeId> {
        let mut condition = None;
        let mut kept = Vec::with_capacity(attributes.len());
        for mut attribute in attributes {
            if let Some(parsed) = RenderCondition::parse(&attribute.name)? {
                condition = Some(parsed);
                continue;
            }
            if attribute.name == "slot" {
                let target = match &attribute.value {
                    AttrValue::Text(value) => normalize_slot_name(value)?,
                    _ => {
                        return Err(RenderError::InvalidSlotName {
                            name: "<non-text>".to_string(),
                        })
                    }
                };
                attribute.value = AttrValue::Text(target);
            }
            kept.push(attribute);
        }

        let kind = match tag {
            FRAGMENT_TAG => NodeKind::Fragment,
            SLOT_TAG => {
                let raw = kept
                    .iter()
                    .rev()
                    .find(|a| a.name == "name")
                    .map(|a| a.value.as_text().unwrap_or_default().to_string())
                    .unwrap_or_default();
                NodeKind::Slot(normalize_slot_name(&raw)?)
            }
            _ => NodeKind::Element,
        };

        let mut node = Node::new(tag, kind);
        node.is_void = is_void_tag(tag);
        node.is_head = tag.eq_ignore_ascii_case("head");
        node.attributes = kept;
        node.condition = condition;
        Ok(self.push(node))
    }

    pub fn create_text(&mut self, value: impl Into<String>) -> NodeId {
        self.push(Node::new(TEXT_TAG, NodeKind::Text(value.into())))
    }

    pub fn create_fragment(&mut self) -> NodeId {
        self.push(Node::new(FRAGMENT_TAG, NodeKind::Fragment))
    }

    pub(crate) fn create_boundary(&mut self, info: Arc<FunctionInfo>) -> NodeId {
        let mut node = Node::new(FRAGMENT_TAG, NodeKind::Fragment);
        node.boundary = Some(Box::new(Boundary {
            info,
            filled_slots: BTreeSet::new(),
        }));
        self.push(node)
    }

    /// Append children. Called once with a component's own output and once
    /// with the caller's injected children.
    pub fn add_children(&mut self, parent: NodeId, children: Vec<NodeId>, origin: Origin) -> RenderResult<()> {
        if children.is_empty() {
            return Ok(());
        }
        let target = &self.nodes[parent.0];
        if target.is_void || target.is_text() {
            return Err(RenderError::VoidChildren {
                tag: target.tag.clone(),
            });
        }
        for child in children {
            if child == parent || self.nodes[child.0].parent.is_some() || Some(child) == self.root {
                return Err(RenderError::AlreadyAttached);
            }
            let node = &mut self.nodes[child.0];
            node.parent = Some(parent);
            node.origin = origin;
            self.nodes[parent.0].children.push(child);
        }
        Ok(())
    }

    /// Remove a node from its parent. The subtree stays intact.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
    }

    /// Detach every child of `id`.
    pub fn clear_children(&mut self, id: NodeId) {
        let children = std::mem::take(&mut self.nodes[id.0].children);
        for child in children {
            self.nodes[child.0].parent = None;
        }
    }

    /// Replace the child list wholesale, re-pointing parent links.
    pub(crate) fn replace_children(&mut self, id: NodeId, children: Vec<NodeId>) {
        for &child in &children {
            self.nodes[child.0].parent = Some(id);
        }
        self.nodes[id.0].children = children;
    }

    pub(crate) fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    pub(crate) fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.nodes[child.0].parent = Some(parent);
        let children = &mut self.nodes[parent.0].children;
        let index = index.min(children.len());
        children.insert(index, child);
    }

    /// Absorb `from`'s children into `into`, keeping order. `from` is left empty.
    pub(crate) fn adopt_children(&mut self, into: NodeId, from: NodeId) {
        let moved = std::mem::take(&mut self.nodes[from.0].children);
        for child in moved {
            self.append_child(into, child);
        }
    }

    /// Take a wrapper's children and detach the wrapper itself. The returned
    /// children still point at the wrapper until they are re-parented.
    pub(crate) fn unwrap_node(&mut self, id: NodeId) -> Vec<NodeId> {
        let node = &mut self.nodes[id.0];
        node.parent = None;
        std::mem::take(&mut node.children)
    }

    pub fn push_attribute(&mut self, id: NodeId, attribute: Attribute) {
        self.nodes[id.0].attributes.push(attribute);
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) {
        self.nodes[id.0].attributes.retain(|a| a.name != name);
    }

    pub(crate) fn boundary_mut(&mut self, id: NodeId) -> Option<&mut Boundary> {
        self.nodes[id.0].boundary.as_deref_mut()
    }

    /// Deep copy of the subtree rooted at `id`, detached from any parent.
    /// Boundary references inside the copy are re-pointed at the copied
    /// boundaries; references leaving the subtree are kept as-is.
    pub fn clone_subtree(&mut self, id: NodeId) -> NodeId {
        let mut mapping = HashMap::new();
        let copy = self.clone_node(id, None, &mut mapping);
        for &new_id in mapping.values() {
            let linked = self.nodes[new_id.0]
                .component_fragment
                .and_then(|cf| mapping.get(&cf).copied());
            if let Some(mapped) = linked {
                self.nodes[new_id.0].component_fragment = Some(mapped);
            }
        }
        copy
    }

    fn clone_node(&mut self, id: NodeId, parent: Option<NodeId>, mapping: &mut HashMap<NodeId, NodeId>) -> NodeId {
        let mut copy = self.nodes[id.0].clone();
        let children = std::mem::take(&mut copy.children);
        copy.parent = parent;
        let new_id = self.push(copy);
        mapping.insert(id, new_id);
        for child in children {
            let child_copy = self.clone_node(child, Some(new_id), mapping);
            self.nodes[new_id.0].children.push(child_copy);
        }
        new_id
    }

    /// Recompute `component_fragment` and head membership for the whole tree.
    ///
    /// Entering a boundary makes it the owner of its internal descendants.
    /// An injected node belongs to the component one level further out, which
    /// still holds after projection moves it into a slot placeholder.
    pub fn relink(&mut self) {
        if let Some(root) = self.root {
            self.relink_node(root, &[], false);
        }
    }

    fn relink_node(&mut self, id: NodeId, owners: &[NodeId], in_head: bool) {
        let owners = if self.nodes[id.0].origin == Origin::Injected && !owners.is_empty() {
            &owners[..owners.len() - 1]
        } else {
            owners
        };

        let chain: Vec<NodeId>;
        let node = &mut self.nodes[id.0];
        node.is_head_child = in_head;
        let child_in_head = in_head || node.is_head;
        let child_owners: &[NodeId] = if node.boundary.is_some() {
            node.component_fragment = Some(id);
            let mut extended = owners.to_vec();
            extended.push(id);
            chain = extended;
            &chain
        } else {
            node.component_fragment = owners.last().copied();
            owners
        };

        let children = node.children.clone();
        for child in children {
            self.relink_node(child, child_owners, child_in_head);
        }
    }

    /// Pre-order list of `id` and everything below it.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.nodes[current.0].children.iter().rev().copied());
        }
        out
    }

    /// First node in document order satisfying `pred`.
    pub fn find(&self, id: NodeId, pred: impl Fn(&Node) -> bool) -> Option<NodeId> {
        self.descendants(id)
            .into_iter()
            .find(|&candidate| pred(&self.nodes[candidate.0]))
    }

    /// Concatenated text below `id`.
    pub fn text_content(&self, id: NodeId) -> String {
        self.descendants(id)
            .into_iter()
            .filter_map(|n| self.nodes[n.0].text())
            .collect()
    }

    /// Compact structural dump, e.g. `fragment[div[#text("hi")]]`.
    pub fn outline(&self, id: NodeId) -> String {
        let node = &self.nodes[id.0];
        let mut out = match &node.kind {
            NodeKind::Text(value) => return format!("#text({value:?})"),
            NodeKind::Slot(name) => format!("slot:{name}"),
            _ => node.tag.clone(),
        };
        if !node.children.is_empty() {
            let inner: Vec<String> = node.children.iter().map(|c| self.outline(*c)).collect();
            out.push('[');
            out.push_str(&inner.join(","));
            out.push(']');
        }
        out
    }
}
