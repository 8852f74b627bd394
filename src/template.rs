//! # Template Components
//!
//! Data-described component functions, for collaborators that hand over a
//! serialized tree-building program instead of Rust closures.
//!
//! A library looks like:
//!
//! ```json
//! {
//!   "styles": [{ "name": "Card", "kind": "function", "units": [...] }],
//!   "components": [{
//!     "name": "Card",
//!     "slotStyles": { "title": { "id": "card-title", "css": "h2 { margin: 0 }" } },
//!     "nodes": [
//!       { "kind": "element", "tag": "div",
//!         "attributes": [{ "name": "class", "value": "card" }],
//!         "children": [{ "kind": "slot", "name": "title" }] }
//!     ]
//!   }]
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::builder::{Builder, Child, Component, ComponentResolver, Props};
use crate::element::{AttrValue, Attribute};
use crate::error::{RenderError, RenderResult};
use crate::options::RenderOptions;
use crate::pipeline::{RenderedPage, Renderer};
use crate::style::{DynamicValues, FunctionInfo, StyleTree, StyleUnit};

/// Literal or prop-bound attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateValue {
    Bool(bool),
    Text(String),
    Prop { prop: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateAttribute {
    pub name: String,
    pub value: TemplateValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TemplateNode {
    Element {
        tag: String,
        #[serde(default)]
        attributes: Vec<TemplateAttribute>,
        #[serde(default)]
        children: Vec<TemplateNode>,
    },
    Text {
        value: String,
    },
    /// Text taken from a prop at render time.
    Prop {
        name: String,
    },
    Slot {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        attributes: Vec<TemplateAttribute>,
        /// Fallback content.
        #[serde(default)]
        children: Vec<TemplateNode>,
    },
    Fragment {
        #[serde(default)]
        attributes: Vec<TemplateAttribute>,
        #[serde(default)]
        children: Vec<TemplateNode>,
    },
    Component {
        name: String,
        #[serde(default)]
        props: BTreeMap<String, TemplateValue>,
        /// Injected children.
        #[serde(default)]
        children: Vec<TemplateNode>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateComponentSource {
    pub name: String,
    /// Scope in the style tree whose units apply; defaults to `name`.
    #[serde(default)]
    pub style_scope: Option<String>,
    /// Units declared inline, appended after the style-tree units.
    #[serde(default)]
    pub styles: Vec<StyleUnit>,
    #[serde(default)]
    pub slot_styles: BTreeMap<String, StyleUnit>,
    #[serde(default)]
    pub nodes: Vec<TemplateNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibrarySource {
    #[serde(default)]
    pub styles: StyleTree,
    #[serde(default)]
    pub components: Vec<TemplateComponentSource>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// RUNTIME
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct TemplateComponent {
    info: Arc<FunctionInfo>,
    nodes: Vec<TemplateNode>,
}

impl TemplateComponent {
    fn from_source(source: TemplateComponentSource, styles: &StyleTree) -> Self {
        let scope = source.style_scope.as_deref().unwrap_or(&source.name);
        let mut info = styles.function_info(scope);
        info.name = source.name.clone();
        for unit in source.styles {
            if !info.styles.iter().any(|u| u.id == unit.id) {
                info.styles.push(Arc::new(unit));
            }
        }
        info.slot_styles = source
            .slot_styles
            .into_iter()
            .map(|(slot, unit)| (slot, Arc::new(unit)))
            .collect();
        TemplateComponent {
            info: Arc::new(info),
            nodes: source.nodes,
        }
    }

    fn build(&self, node: &TemplateNode, props: &Props, cx: &mut Builder) -> RenderResult<Child> {
        match node {
            TemplateNode::Element { tag, attributes, children } => {
                let kids = self.build_all(children, props, cx)?;
                Ok(cx.element(tag, attribute_list(attributes, props), kids)?.into())
            }
            TemplateNode::Text { value } => Ok(Child::Text(value.clone())),
            TemplateNode::Prop { name } => Ok(match props.get(name) {
                None | Some(Value::Null) => Child::Empty,
                Some(Value::String(s)) => Child::Text(s.clone()),
                Some(other) => Child::Text(other.to_string()),
            }),
            TemplateNode::Slot { name, attributes, children } => {
                let fallback = self.build_all(children, props, cx)?;
                Ok(cx
                    .slot(name.as_deref(), attribute_list(attributes, props), fallback)?
                    .into())
            }
            TemplateNode::Fragment { attributes, children } => {
                let kids = self.build_all(children, props, cx)?;
                Ok(cx
                    .element(crate::element::FRAGMENT_TAG, attribute_list(attributes, props), kids)?
                    .into())
            }
            TemplateNode::Component { name, props: bound, children } => {
                let target = cx.lookup(name)?;
                let injected = self.build_all(children, props, cx)?;
                let passed: Props = bound
                    .iter()
                    .map(|(key, value)| (key.clone(), prop_value(value, props)))
                    .collect();
                Ok(cx.component(&target, passed, injected)?.into())
            }
        }
    }

    fn build_all(&self, nodes: &[TemplateNode], props: &Props, cx: &mut Builder) -> RenderResult<Child> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            out.push(self.build(node, props, cx)?);
        }
        Ok(Child::List(out))
    }
}

impl Component for TemplateComponent {
    fn info(&self) -> &Arc<FunctionInfo> {
        &self.info
    }

    fn render(&self, props: &Props, cx: &mut Builder) -> RenderResult<Child> {
        match self.nodes.as_slice() {
            [] => Ok(Child::Empty),
            [single] => self.build(single, props, cx),
            many => self.build_all(many, props, cx),
        }
    }
}

fn prop_value(value: &TemplateValue, props: &Props) -> Value {
    match value {
        TemplateValue::Bool(b) => Value::Bool(*b),
        TemplateValue::Text(s) => Value::String(s.clone()),
        TemplateValue::Prop { prop } => props.get(prop).cloned().unwrap_or(Value::Null),
    }
}

fn attr_value(value: &TemplateValue, props: &Props) -> AttrValue {
    match prop_value(value, props) {
        Value::Bool(b) => AttrValue::Bool(b),
        Value::Null => AttrValue::Bool(false),
        Value::String(s) => AttrValue::Text(s),
        other => AttrValue::Text(other.to_string()),
    }
}

fn attribute_list(attributes: &[TemplateAttribute], props: &Props) -> Vec<Attribute> {
    attributes
        .iter()
        .map(|a| Attribute::new(a.name.clone(), attr_value(&a.value, props)))
        .collect()
}

/// Named template components, usable as a [`ComponentResolver`].
#[derive(Default)]
pub struct ComponentLibrary {
    components: HashMap<String, Arc<dyn Component>>,
}

impl ComponentLibrary {
    pub fn from_source(source: LibrarySource) -> Self {
        let mut components: HashMap<String, Arc<dyn Component>> = HashMap::new();
        for component in source.components {
            let built = TemplateComponent::from_source(component, &source.styles);
            components.insert(built.info.name.clone(), Arc::new(built));
        }
        ComponentLibrary { components }
    }

    pub fn from_json(json: &str) -> RenderResult<Self> {
        let source: LibrarySource = serde_json::from_str(json)?;
        Ok(Self::from_source(source))
    }

    pub fn get(&self, name: &str) -> RenderResult<Arc<dyn Component>> {
        self.resolve(name).ok_or_else(|| RenderError::UnknownComponent {
            name: name.to_string(),
        })
    }

    pub fn insert(&mut self, component: Arc<dyn Component>) {
        self.components.insert(component.name().to_string(), component);
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl ComponentResolver for ComponentLibrary {
    fn resolve(&self, name: &str) -> Option<Arc<dyn Component>> {
        self.components.get(name).cloned()
    }
}

/// Render `page` from a JSON library, JSON options and JSON dynamic values.
pub fn render_page_json(library_json: &str, page: &str, options_json: &str, values_json: &str) -> RenderResult<RenderedPage> {
    let library = Arc::new(ComponentLibrary::from_json(library_json)?);
    let options = RenderOptions::from_json(options_json)?;
    let values: DynamicValues = serde_json::from_str(values_json)?;
    let component = library.get(page)?;
    Renderer::new(options)
        .with_resolver(library)
        .with_dynamic_values(values)
        .render(&component, Props::new())
}
