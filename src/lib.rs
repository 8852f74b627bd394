//! # Component Render Core
//!
//! Turns the output of component functions into final HTML with scoped,
//! deduplicated CSS.
//!
//! ## Key Invariants
//!
//! 1. **Fixed pass order**: register → project → evaluate → flatten →
//!    resolve, then serialize. No pass is skipped or reordered.
//! 2. **Page isolation**: a render owns its tree and its [`StyleRegistry`];
//!    nothing mutable is shared between pages.
//! 3. **Lazy scopes**: a style set gets a scope id only when an element
//!    carrying it survives to the resolve pass. Everything else emits no CSS.
//! 4. **Fatal vs recovered**: construction and style errors abort the page
//!    with an `Err`. Missing slots and empty components become
//!    [`Diagnostic`] warnings and rendering continues.

#[cfg(feature = "napi")]
use napi_derive::napi;

mod builder;
mod condition;
mod element;
mod error;
mod flatten;
mod options;
mod pipeline;
mod registry;
mod scoping;
mod serialize;
mod slots;
mod style;
mod template;


pub use builder::{component, Builder, Child, Component, ComponentResolver, FnComponent, Props};
pub use condition::evaluate_conditions;
pub use element::{
    is_void_tag, normalize_slot_name, AttrValue, Attribute, Boundary, Node, NodeId, NodeKind, Origin,
    RenderCondition, Tree, DEFAULT_SLOT, FRAGMENT_TAG, SLOT_TAG, TEXT_TAG,
};
pub use error::{CssError, Diagnostic, RenderError, RenderResult, StyleError, W_COMPONENT_EMPTY, W_SLOT_MISSING};
pub use flatten::flatten;
pub use options::{FlattenOptions, RenderOptions, ScopeStrategy};
pub use pipeline::{inject_styles, register_styles, resolve_styles, PageRequest, RenderedPage, Renderer};
pub use registry::{scope_name, ResolveContext, ResolvedStyle, StyleRef, StyleRegistry, StyleUuid};
pub use scoping::{scope_css, ScopeMarker};
pub use serialize::serialize;
pub use slots::project_slots;
pub use style::{
    DynamicPlaceholder, DynamicValues, FunctionInfo, ScopeKind, StyleLevel, StyleScope, StyleTree, StyleUnit,
};
pub use template::{
    render_page_json, ComponentLibrary, LibrarySource, TemplateAttribute, TemplateComponent,
    TemplateComponentSource, TemplateNode, TemplateValue,
};

/// Render one page of a JSON component library. Returns the
/// [`RenderedPage`] as JSON.
#[cfg(feature = "napi")]
#[napi]
pub fn render_page_native(
    library_json: String,
    page: String,
    options_json: String,
    values_json: String,
) -> napi::Result<String> {
    let rendered = render_page_json(&library_json, &page, &options_json, &values_json)
        .map_err(|e| napi::Error::from_reason(e.to_string()))?;
    serde_json::to_string(&rendered).map_err(|e| napi::Error::from_reason(e.to_string()))
}
