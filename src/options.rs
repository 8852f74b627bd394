use serde::{Deserialize, Serialize};

use crate::error::RenderResult;

/// How elements are bound to their scoped CSS. One choice per page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ScopeStrategy {
    /// `data-<prefix><id>` boolean attribute, `[data-<prefix><id>]` in CSS.
    #[default]
    Attribute,
    /// `<prefix><id>` class token, `.<prefix><id>` in CSS.
    Class,
    /// `<prefix><id>` class token, `:where(.<prefix><id>)` in CSS (zero specificity).
    Where,
}

/// Which wrapper nodes the flattener erases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlattenOptions {
    pub fragments: bool,
    pub slots: bool,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            fragments: true,
            slots: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderOptions {
    pub scope_strategy: ScopeStrategy,
    pub scope_prefix: String,
    /// Prefix the page with `<!DOCTYPE html>`.
    pub doctype: bool,
    /// Keep fragments in the tree and emit them as `<fragment>` tags.
    pub debug_fragments: bool,
    pub flatten: FlattenOptions,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            scope_strategy: ScopeStrategy::default(),
            scope_prefix: "s-".to_string(),
            doctype: true,
            debug_fragments: false,
            flatten: FlattenOptions::default(),
        }
    }
}

impl RenderOptions {
    pub fn from_json(json: &str) -> RenderResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The flatten configuration actually applied; debug mode keeps fragments.
    pub fn effective_flatten(&self) -> FlattenOptions {
        FlattenOptions {
            fragments: self.flatten.fragments && !self.debug_fragments,
            slots: self.flatten.slots,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let options = RenderOptions::from_json("{}").unwrap();
        assert_eq!(options, RenderOptions::default());
        assert_eq!(options.scope_prefix, "s-");
        assert!(options.doctype);
    }

    #[test]
    fn test_camel_case_fields() {
        let options = RenderOptions::from_json(
            r#"{"scopeStrategy":"where","scopePrefix":"x","debugFragments":true,"flatten":{"slots":false}}"#,
        )
        .unwrap();
        assert_eq!(options.scope_strategy, ScopeStrategy::Where);
        assert_eq!(options.scope_prefix, "x");
        assert!(options.flatten.fragments);
        assert!(!options.flatten.slots);
        assert!(!options.effective_flatten().fragments);
    }

    #[test]
    fn test_rejects_unknown_strategy() {
        assert!(RenderOptions::from_json(r#"{"scopeStrategy":"inline"}"#).is_err());
    }
}
