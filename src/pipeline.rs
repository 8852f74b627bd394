//! # Page Pipeline
//!
//! Turns the raw tree recorded by the [`Builder`] into final HTML plus the
//! page's aggregated CSS. The passes always run in this order:
//!
//! 1. **register**: record the style-unit set of every component boundary
//! 2. **project**: move injected children into slot placeholders
//! 3. **evaluate**: prune subtrees whose render condition is false
//! 4. **flatten**: erase fragment and slot wrappers
//! 5. **resolve**: mint scope ids for surviving elements, inject `<style>`
//!
//! Serialization follows as a separate read-only walk.
//!
//! ## Key Invariants
//!
//! 1. **Fresh state per page**: every render gets its own tree and
//!    [`StyleRegistry`]. Scope ids are therefore page-local and
//!    reproducible, and pages can render in parallel.
//! 2. **All or nothing**: any error aborts the page; no HTML is returned.
//! 3. **Deterministic order**: resolution walks the final tree depth-first
//!    in document order, so scope ids are byte-stable between builds.

use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, info_span};

use crate::builder::{Builder, Component, ComponentResolver, Props};
use crate::condition::evaluate_conditions;
use crate::element::{NodeId, NodeKind, Origin, Tree};
use crate::error::{Diagnostic, RenderError, RenderResult};
use crate::flatten::flatten;
use crate::options::RenderOptions;
use crate::registry::{ResolveContext, StyleRef, StyleRegistry};
use crate::scoping::ScopeMarker;
use crate::serialize::serialize;
use crate::slots::project_slots;
use crate::style::{DynamicValues, StyleLevel, StyleUnit};

/// Output of one page render.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedPage {
    pub html: String,
    /// Aggregated scoped CSS, also injected into the page as `<style>`.
    pub css: String,
    pub warnings: Vec<Diagnostic>,
}

/// One entry of a multi-page build.
#[derive(Clone)]
pub struct PageRequest {
    pub component: Arc<dyn Component>,
    pub props: Props,
    /// Overrides the renderer's dynamic values for this page.
    pub values: Option<DynamicValues>,
}

impl PageRequest {
    pub fn new(component: Arc<dyn Component>) -> Self {
        PageRequest {
            component,
            props: Props::new(),
            values: None,
        }
    }

    pub fn with_props(mut self, props: Props) -> Self {
        self.props = props;
        self
    }

    pub fn with_values(mut self, values: DynamicValues) -> Self {
        self.values = Some(values);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDERER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Default)]
pub struct Renderer {
    options: RenderOptions,
    values: DynamicValues,
    resolver: Option<Arc<dyn ComponentResolver>>,
}

impl Renderer {
    pub fn new(options: RenderOptions) -> Self {
        Renderer {
            options,
            values: DynamicValues::new(),
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ComponentResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_dynamic_values(mut self, values: DynamicValues) -> Self {
        self.values = values;
        self
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Invoke `page` and render the resulting tree.
    pub fn render(&self, page: &Arc<dyn Component>, props: Props) -> RenderResult<RenderedPage> {
        self.render_with_values(page, props, &self.values)
    }

    fn render_with_values(&self, page: &Arc<dyn Component>, props: Props, values: &DynamicValues) -> RenderResult<RenderedPage> {
        let span = info_span!("render_page", page = %page.name());
        let _enter = span.enter();

        let mut builder = Builder::new();
        if let Some(resolver) = &self.resolver {
            builder = builder.with_resolver(resolver.clone());
        }
        let root = builder.component(page, props, ())?;
        let (tree, diagnostics) = builder.finish(root);
        self.render_tree_with_values(tree, diagnostics, values)
    }

    /// Run the passes over an already recorded tree.
    pub fn render_tree(&self, tree: Tree, diagnostics: Vec<Diagnostic>) -> RenderResult<RenderedPage> {
        self.render_tree_with_values(tree, diagnostics, &self.values)
    }

    fn render_tree_with_values(
        &self,
        mut tree: Tree,
        mut diagnostics: Vec<Diagnostic>,
        values: &DynamicValues,
    ) -> RenderResult<RenderedPage> {
        let mut registry = StyleRegistry::new();

        let registered = register_styles(&mut tree, &mut registry)?;
        debug!(boundaries = registered, "register pass");

        let projected = project_slots(&mut tree, &mut registry, &mut diagnostics)?;
        tree.relink();
        debug!(projected, "project pass");

        let pruned = evaluate_conditions(&mut tree)?;
        debug!(pruned, "evaluate pass");

        let flattened = flatten(&mut tree, self.options.effective_flatten())?;
        tree.relink();
        debug!(flattened, "flatten pass");

        let ctx = ResolveContext {
            options: &self.options,
            values,
        };
        let css = resolve_styles(&mut tree, &mut registry, ctx)?;
        inject_styles(&mut tree, &css)?;
        debug!(
            scopes = registry.resolved_styles().len(),
            unused = registry.pending_count(),
            "resolve pass"
        );

        let html = serialize(&tree, &self.options)?;
        info!(bytes = html.len(), warnings = diagnostics.len(), "page rendered");
        Ok(RenderedPage {
            html,
            css,
            warnings: diagnostics,
        })
    }

    /// Render independent pages in parallel. Results keep the input order.
    pub fn render_pages(&self, pages: &[PageRequest]) -> Vec<RenderResult<RenderedPage>> {
        pages
            .par_iter()
            .map(|request| {
                let values = request.values.as_ref().unwrap_or(&self.values);
                self.render_with_values(&request.component, request.props.clone(), values)
            })
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
struct Owner {
    /// Cascading units in force for components invoked below this one.
    cascade: Vec<Arc<StyleUnit>>,
    style: Option<StyleRef>,
}

/// Attach a component style uuid to every boundary and every stylable node
/// it owns. Returns the number of boundaries that registered a style set.
pub fn register_styles(tree: &mut Tree, registry: &mut StyleRegistry) -> RenderResult<usize> {
    let root = tree.require_root()?;
    let mut registered = 0;
    register_node(tree, registry, root, &[], &mut registered);
    Ok(registered)
}

fn register_node(tree: &mut Tree, registry: &mut StyleRegistry, id: NodeId, owners: &[Owner], registered: &mut usize) {
    // Injected children were produced by the caller, one owner further out.
    let owners = if tree.node(id).origin() == Origin::Injected && !owners.is_empty() {
        &owners[..owners.len() - 1]
    } else {
        owners
    };

    let extended: Vec<Owner>;
    let child_owners: &[Owner] = match tree.node(id).boundary().map(|b| b.info.clone()) {
        Some(info) => {
            let inherited = owners.last().map(|o| o.cascade.clone()).unwrap_or_default();
            let mut units = inherited.clone();
            units.extend(info.styles.iter().cloned());
            let mut cascade = inherited;
            cascade.extend(
                info.styles
                    .iter()
                    .filter(|u| u.level == StyleLevel::Cascade)
                    .cloned(),
            );

            let style = if units.is_empty() {
                None
            } else {
                *registered += 1;
                Some(StyleRef::Component(registry.register_component(&units, &info.name)))
            };
            tree.node_mut(id).style = style.clone();

            let mut chain = owners.to_vec();
            chain.push(Owner { cascade, style });
            extended = chain;
            &extended
        }
        None => {
            if tree.node(id).is_stylable() {
                tree.node_mut(id).style = owners.last().and_then(|o| o.style.clone());
            }
            owners
        }
    };

    let children = tree.children(id).to_vec();
    for child in children {
        register_node(tree, registry, child, child_owners, registered);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOLVE
// ═══════════════════════════════════════════════════════════════════════════════

/// Mint scope ids for every surviving element and mark it. Returns the
/// page's aggregated CSS.
pub fn resolve_styles(tree: &mut Tree, registry: &mut StyleRegistry, ctx: ResolveContext<'_>) -> RenderResult<String> {
    let root = tree.require_root()?;
    for id in tree.descendants(root) {
        let node = tree.node(id);
        if *node.kind() != NodeKind::Element || !node.is_stylable() {
            continue;
        }
        let Some(style) = node.style().cloned() else {
            continue;
        };
        let scope_id = registry.resolve(&style, ctx)?;
        let marker = ScopeMarker::new(ctx.options.scope_strategy, &ctx.options.scope_prefix, &scope_id);
        tree.push_attribute(id, marker.element_attribute());
    }
    Ok(registry.aggregated_css())
}

/// Insert a `<style>` element as the first child of `<head>`, else `<body>`,
/// else `<html>`, else the page root. Nothing is inserted for empty CSS.
pub fn inject_styles(tree: &mut Tree, css: &str) -> RenderResult<Option<NodeId>> {
    if css.is_empty() {
        return Ok(None);
    }
    let root = tree.require_root()?;
    let target = ["head", "body", "html"]
        .iter()
        .find_map(|tag| tree.find(root, |n| n.tag().eq_ignore_ascii_case(tag)))
        .unwrap_or(root);
    let host = tree.node(target);
    if host.is_void() || host.is_text() {
        return Err(RenderError::VoidChildren {
            tag: host.tag().to_string(),
        });
    }

    let style = tree.create_element("style", vec![])?;
    let text = tree.create_text(css);
    tree.add_children(style, vec![text], Origin::Internal)?;
    tree.insert_child(target, 0, style);
    Ok(Some(style))
}
