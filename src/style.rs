//! Style units and the per-function style information consumed by the
//! register and resolve passes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Where a style unit applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum StyleLevel {
    /// Every element the owning component renders directly.
    #[default]
    Component,
    /// The owning component and every component it invokes, transitively.
    Cascade,
}

/// A CSS fragment whose text is produced by an embedded code block and only
/// known once the page's dynamic values have been computed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicPlaceholder {
    /// Literal token inside `css` to replace.
    pub placeholder: String,
    /// Embedded code block id used to look up the computed text.
    pub block: String,
}

/// Immutable CSS ownership record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleUnit {
    pub id: String,
    /// Source-specified scope id; wins over minted ids.
    #[serde(default)]
    pub fixed_id: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub css: String,
    #[serde(default)]
    pub dynamic: Vec<DynamicPlaceholder>,
    #[serde(default)]
    pub level: StyleLevel,
}

impl StyleUnit {
    pub fn new(id: impl Into<String>, css: impl Into<String>) -> Self {
        StyleUnit {
            id: id.into(),
            fixed_id: None,
            attributes: BTreeMap::new(),
            css: css.into(),
            dynamic: Vec::new(),
            level: StyleLevel::Component,
        }
    }

    pub fn cascading(mut self) -> Self {
        self.level = StyleLevel::Cascade;
        self
    }

    pub fn with_fixed_id(mut self, fixed_id: impl Into<String>) -> Self {
        self.fixed_id = Some(fixed_id.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_dynamic(mut self, placeholder: impl Into<String>, block: impl Into<String>) -> Self {
        self.dynamic.push(DynamicPlaceholder {
            placeholder: placeholder.into(),
            block: block.into(),
        });
        self
    }
}

/// Identity and styles of one component function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionInfo {
    pub name: String,
    /// Ordered low to high CSS priority.
    #[serde(default)]
    pub styles: Vec<Arc<StyleUnit>>,
    #[serde(default)]
    pub slot_styles: BTreeMap<String, Arc<StyleUnit>>,
}

impl FunctionInfo {
    pub fn new(name: impl Into<String>) -> Self {
        FunctionInfo {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_style(mut self, unit: StyleUnit) -> Self {
        self.styles.push(Arc::new(unit));
        self
    }

    pub fn with_slot_style(mut self, slot: impl Into<String>, unit: StyleUnit) -> Self {
        self.slot_styles.insert(slot.into(), Arc::new(unit));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ScopeKind {
    #[default]
    Module,
    Function,
}

/// One node of the precomputed style-unit tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleScope {
    pub name: String,
    #[serde(default)]
    pub kind: ScopeKind,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub units: Vec<Arc<StyleUnit>>,
}

/// Style units arranged along module/function nesting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StyleTree {
    scopes: Vec<StyleScope>,
}

impl StyleTree {
    pub fn new(scopes: Vec<StyleScope>) -> Self {
        StyleTree { scopes }
    }

    fn scope(&self, name: &str) -> Option<&StyleScope> {
        self.scopes.iter().find(|s| s.name == name)
    }

    /// Units applying to elements produced directly by `scope_name`, outermost
    /// scope first.
    pub fn applicable_units(&self, scope_name: &str) -> Vec<Arc<StyleUnit>> {
        let mut chain = Vec::new();
        let mut current = self.scope(scope_name);
        while let Some(scope) = current {
            // A malformed parent cycle must not hang the build.
            if chain.iter().any(|s: &&StyleScope| s.name == scope.name) {
                break;
            }
            chain.push(scope);
            current = scope.parent.as_deref().and_then(|p| self.scope(p));
        }

        let mut units: Vec<Arc<StyleUnit>> = Vec::new();
        for scope in chain.into_iter().rev() {
            for unit in &scope.units {
                if !units.iter().any(|u| u.id == unit.id) {
                    units.push(unit.clone());
                }
            }
        }
        units
    }

    pub fn function_info(&self, name: &str) -> FunctionInfo {
        FunctionInfo {
            name: name.to_string(),
            styles: self.applicable_units(name),
            slot_styles: BTreeMap::new(),
        }
    }
}

/// Computed text for embedded code blocks, keyed by block id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DynamicValues(HashMap<String, String>);

impl DynamicValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, block: impl Into<String>, text: impl Into<String>) {
        self.0.insert(block.into(), text.into());
    }

    pub fn get(&self, block: &str) -> Option<&str> {
        self.0.get(block).map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DynamicValues {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        DynamicValues(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
