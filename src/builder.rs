//! # Builder / Invocation Recorder
//!
//! Runs component functions and records their output as tree nodes.
//! Children are built before the component that receives them, so an
//! invocation always sees its injected children fully constructed.
//!
//! Every invocation gets a fresh component boundary (a fragment that marks
//! the function's output). Returned values are normalized into it:
//!
//! - a string becomes a text node,
//! - a plain fragment is absorbed (its children move into the boundary),
//! - anything else, including another component's boundary, is nested
//!   inside the boundary so sibling components never share one,
//! - nested lists are flattened in order,
//! - no content at all is recorded as a warning and leaves the boundary empty.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::element::{Attribute, NodeId, Origin, Tree, SLOT_TAG};
use crate::error::{Diagnostic, RenderError, RenderResult, W_COMPONENT_EMPTY};
use crate::style::FunctionInfo;

const MAX_DEPTH: usize = 256;

/// Property bag passed to a component function.
pub type Props = BTreeMap<String, Value>;

/// Return value of a component function or a child argument.
#[derive(Debug, Clone, Default)]
pub enum Child {
    Node(NodeId),
    Text(String),
    List(Vec<Child>),
    #[default]
    Empty,
}

impl From<NodeId> for Child {
    fn from(id: NodeId) -> Self {
        Child::Node(id)
    }
}

impl From<&str> for Child {
    fn from(text: &str) -> Self {
        Child::Text(text.to_string())
    }
}

impl From<String> for Child {
    fn from(text: String) -> Self {
        Child::Text(text)
    }
}

impl From<()> for Child {
    fn from(_: ()) -> Self {
        Child::Empty
    }
}

impl<T: Into<Child>> From<Vec<T>> for Child {
    fn from(items: Vec<T>) -> Self {
        Child::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Child>> From<Option<T>> for Child {
    fn from(item: Option<T>) -> Self {
        item.map(Into::into).unwrap_or(Child::Empty)
    }
}

/// A component function: a callable plus its declared styles.
pub trait Component: Send + Sync {
    fn info(&self) -> &Arc<FunctionInfo>;

    fn render(&self, props: &Props, cx: &mut Builder) -> RenderResult<Child>;

    fn name(&self) -> &str {
        &self.info().name
    }
}

/// Looks up components referenced by name, e.g. from serialized templates.
pub trait ComponentResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<Arc<dyn Component>>;
}

/// Closure-backed component.
pub struct FnComponent<F> {
    info: Arc<FunctionInfo>,
    render: F,
}

impl<F> Component for FnComponent<F>
where
    F: Fn(&Props, &mut Builder) -> RenderResult<Child> + Send + Sync,
{
    fn info(&self) -> &Arc<FunctionInfo> {
        &self.info
    }

    fn render(&self, props: &Props, cx: &mut Builder) -> RenderResult<Child> {
        (self.render)(props, cx)
    }
}

impl<F> fmt::Debug for FnComponent<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnComponent")
            .field("name", &self.info.name)
            .finish()
    }
}

pub fn component<F>(info: FunctionInfo, render: F) -> Arc<dyn Component>
where
    F: Fn(&Props, &mut Builder) -> RenderResult<Child> + Send + Sync + 'static,
{
    Arc::new(FnComponent {
        info: Arc::new(info),
        render,
    })
}

pub struct Builder {
    tree: Tree,
    stack: Vec<String>,
    resolver: Option<Arc<dyn ComponentResolver>>,
    diagnostics: Vec<Diagnostic>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Builder {
            tree: Tree::new(),
            stack: Vec::new(),
            resolver: None,
            diagnostics: Vec::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ComponentResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Find a component by name through the configured resolver.
    pub fn lookup(&self, name: &str) -> RenderResult<Arc<dyn Component>> {
        self.resolver
            .as_ref()
            .and_then(|r| r.resolve(name))
            .ok_or_else(|| RenderError::UnknownComponent {
                name: name.to_string(),
            })
    }

    pub fn element(&mut self, tag: &str, attributes: Vec<Attribute>, children: impl Into<Child>) -> RenderResult<NodeId> {
        let id = self.tree.create_element(tag, attributes)?;
        let kids = self.collect(children.into());
        self.tree.add_children(id, kids, Origin::Internal)?;
        Ok(id)
    }

    pub fn text(&mut self, value: impl Into<String>) -> NodeId {
        self.tree.create_text(value)
    }

    pub fn fragment(&mut self, children: impl Into<Child>) -> RenderResult<NodeId> {
        let id = self.tree.create_fragment();
        let kids = self.collect(children.into());
        self.tree.add_children(id, kids, Origin::Internal)?;
        Ok(id)
    }

    /// `<slot name=..>` placeholder with optional fallback content.
    pub fn slot(&mut self, name: Option<&str>, mut attributes: Vec<Attribute>, fallback: impl Into<Child>) -> RenderResult<NodeId> {
        if let Some(name) = name {
            attributes.push(Attribute::new("name", name));
        }
        self.element(SLOT_TAG, attributes, fallback)
    }

    /// Invoke `component` with `props`; `children` become its injected children.
    pub fn component(&mut self, component: &Arc<dyn Component>, props: Props, children: impl Into<Child>) -> RenderResult<NodeId> {
        let injected = self.collect(children.into());
        let info = component.info().clone();

        if self.stack.len() >= MAX_DEPTH {
            return Err(RenderError::RecursionLimit {
                path: format!("{} > {}", self.stack.join(" > "), info.name),
            });
        }

        let boundary = self.tree.create_boundary(info.clone());
        self.stack.push(info.name.clone());
        let rendered = component.render(&props, self);
        self.stack.pop();
        let rendered = rendered?;

        let internal = match rendered {
            Child::Node(id) if self.is_plain_fragment(id) => {
                self.tree.adopt_children(boundary, id);
                Vec::new()
            }
            other => {
                // `Empty`, or a list holding nothing but empties.
                let nodes = self.collect(other);
                if nodes.is_empty() {
                    let message = format!("Component '{}' returned no content", info.name);
                    warn!(component = %info.name, "{}", message);
                    self.diagnostics.push(Diagnostic::new(W_COMPONENT_EMPTY, message));
                }
                nodes
            }
        };

        self.tree.add_children(boundary, internal, Origin::Internal)?;
        self.tree.add_children(boundary, injected, Origin::Injected)?;
        debug!(
            component = %info.name,
            children = self.tree.children(boundary).len(),
            "recorded component boundary"
        );
        Ok(boundary)
    }

    /// A fragment built with [`Builder::fragment`] that is not already some
    /// component's boundary and carries nothing that would be lost by
    /// absorbing it.
    fn is_plain_fragment(&self, id: NodeId) -> bool {
        let node = self.tree.node(id);
        node.is_fragment()
            && !node.is_boundary()
            && node.parent().is_none()
            && node.attributes().is_empty()
            && node.condition().is_none()
    }

    /// Flatten nested lists into an ordered node list, creating text nodes.
    fn collect(&mut self, child: Child) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_into(child, &mut out);
        out
    }

    fn collect_into(&mut self, child: Child, out: &mut Vec<NodeId>) {
        match child {
            Child::Node(id) => out.push(id),
            Child::Text(text) => out.push(self.tree.create_text(text)),
            Child::List(items) => {
                for item in items {
                    self.collect_into(item, out);
                }
            }
            Child::Empty => {}
        }
    }

    /// Finish the raw tree with `root` as the page root and link every node
    /// to its component boundary.
    pub fn finish(mut self, root: NodeId) -> (Tree, Vec<Diagnostic>) {
        self.tree.set_root(root);
        self.tree.relink();
        (self.tree, self.diagnostics)
    }
}
