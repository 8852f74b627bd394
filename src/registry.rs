//! # Style Registry
//!
//! Two dedup tables, one for component style sets and one for slot-override
//! combinations. Both follow the same two-phase protocol:
//!
//! 1. `register_*` turns key material into a [`StyleUuid`] and stores a
//!    pending entry the first time that key is seen.
//! 2. [`StyleRegistry::resolve`] mints a scope id and processes the CSS on
//!    first use, then serves the cached result.
//!
//! Entries that are registered but never resolved contribute no CSS.
//! The scope-id counter belongs to the registry instance, so each page
//! render starts again at `a` and the two tables never hand out the same id.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::StyleError;
use crate::options::RenderOptions;
use crate::scoping::{scope_css, ScopeMarker};
use crate::style::{DynamicValues, StyleUnit};

/// Dedup key of a not-yet-resolved style-unit combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StyleUuid(String);

impl StyleUuid {
    fn from_key(key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        StyleUuid(digest[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StyleUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which table a uuid lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StyleRef {
    Component(StyleUuid),
    Slot(StyleUuid),
}

impl StyleRef {
    pub fn uuid(&self) -> &StyleUuid {
        match self {
            StyleRef::Component(uuid) | StyleRef::Slot(uuid) => uuid,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingStyle {
    units: Vec<Arc<StyleUnit>>,
    provenance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedStyle {
    pub scope_id: String,
    pub css: String,
    #[serde(skip)]
    pub units: Vec<Arc<StyleUnit>>,
    /// Where the combination was first seen, for debugging.
    pub provenance: String,
}

#[derive(Debug, Default)]
struct StyleTable {
    pending: HashMap<StyleUuid, PendingStyle>,
    resolved: HashMap<StyleUuid, ResolvedStyle>,
}

impl StyleTable {
    fn register(&mut self, key: &str, units: Vec<Arc<StyleUnit>>, provenance: &str) -> StyleUuid {
        let uuid = StyleUuid::from_key(key);
        if !self.pending.contains_key(&uuid) && !self.resolved.contains_key(&uuid) {
            self.pending.insert(
                uuid.clone(),
                PendingStyle {
                    units,
                    provenance: provenance.to_string(),
                },
            );
        }
        uuid
    }

    fn units(&self, uuid: &StyleUuid) -> Option<&[Arc<StyleUnit>]> {
        self.pending
            .get(uuid)
            .map(|p| p.units.as_slice())
            .or_else(|| self.resolved.get(uuid).map(|r| r.units.as_slice()))
    }
}

/// Inputs that only exist once the tree is final.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    pub options: &'a RenderOptions,
    pub values: &'a DynamicValues,
}

#[derive(Debug, Default)]
pub struct StyleRegistry {
    components: StyleTable,
    slots: StyleTable,
    next_scope: usize,
    order: Vec<StyleRef>,
}

impl StyleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the style set of one component boundary. Equal sets give
    /// equal uuids regardless of order.
    pub fn register_component(&mut self, units: &[Arc<StyleUnit>], provenance: &str) -> StyleUuid {
        let ordered = dedup_units(units.iter());
        let key = format!("component:{}", sorted_ids(&ordered));
        self.components.register(&key, ordered, provenance)
    }

    /// Register a slot override applied to a projected child: host styles
    /// not already carried by the child, then the child's styles, then the
    /// override itself.
    pub fn register_slot(
        &mut self,
        host: &[Arc<StyleUnit>],
        child: &[Arc<StyleUnit>],
        slot_unit: &Arc<StyleUnit>,
        provenance: &str,
    ) -> StyleUuid {
        let child_ids: BTreeSet<&str> = child.iter().map(|u| u.id.as_str()).collect();
        let host_only = host.iter().filter(|u| !child_ids.contains(u.id.as_str()));
        let ordered = dedup_units(host_only.chain(child.iter()).chain(std::iter::once(slot_unit)));
        let key = format!(
            "slot:host{{{}}}|child{{{}}}|slot{{{}}}",
            sorted_ids(host),
            sorted_ids(child),
            slot_unit.id
        );
        self.slots.register(&key, ordered, provenance)
    }

    fn table(&self, style: &StyleRef) -> &StyleTable {
        match style {
            StyleRef::Component(_) => &self.components,
            StyleRef::Slot(_) => &self.slots,
        }
    }

    fn table_mut(&mut self, style: &StyleRef) -> &mut StyleTable {
        match style {
            StyleRef::Component(_) => &mut self.components,
            StyleRef::Slot(_) => &mut self.slots,
        }
    }

    pub fn units(&self, style: &StyleRef) -> Option<&[Arc<StyleUnit>]> {
        self.table(style).units(style.uuid())
    }

    pub fn resolved(&self, style: &StyleRef) -> Option<&ResolvedStyle> {
        self.table(style).resolved.get(style.uuid())
    }

    pub fn is_resolved(&self, style: &StyleRef) -> bool {
        self.resolved(style).is_some()
    }

    /// Scope id for `style`, minting it and processing its CSS on first use.
    pub fn resolve(&mut self, style: &StyleRef, ctx: ResolveContext<'_>) -> Result<String, StyleError> {
        let uuid = style.uuid();
        if let Some(done) = self.table(style).resolved.get(uuid) {
            return Ok(done.scope_id.clone());
        }
        let pending = self
            .table_mut(style)
            .pending
            .remove(uuid)
            .ok_or_else(|| StyleError::UnknownUuid(uuid.to_string()))?;

        let scope_id = match fixed_scope_id(&pending.units) {
            Some(fixed) => fixed,
            None => {
                let minted = scope_name(self.next_scope);
                self.next_scope += 1;
                minted
            }
        };
        let css = process_units(&pending.units, &scope_id, ctx)?;

        tracing::debug!(
            uuid = %uuid,
            scope_id = %scope_id,
            provenance = %pending.provenance,
            "resolved style scope"
        );

        self.table_mut(style).resolved.insert(
            uuid.clone(),
            ResolvedStyle {
                scope_id: scope_id.clone(),
                css,
                units: pending.units,
                provenance: pending.provenance,
            },
        );
        self.order.push(style.clone());
        Ok(scope_id)
    }

    /// CSS of every resolved entry, in first-resolution order.
    pub fn aggregated_css(&self) -> String {
        self.order
            .iter()
            .filter_map(|style| self.resolved(style))
            .map(|r| r.css.as_str())
            .filter(|css| !css.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Resolved entries in first-resolution order.
    pub fn resolved_styles(&self) -> Vec<&ResolvedStyle> {
        self.order.iter().filter_map(|s| self.resolved(s)).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.components.pending.len() + self.slots.pending.len()
    }
}

fn dedup_units<'a>(units: impl Iterator<Item = &'a Arc<StyleUnit>>) -> Vec<Arc<StyleUnit>> {
    let mut seen = BTreeSet::new();
    units
        .filter(|u| seen.insert(u.id.clone()))
        .cloned()
        .collect()
}

fn sorted_ids(units: &[Arc<StyleUnit>]) -> String {
    let ids: BTreeSet<&str> = units.iter().map(|u| u.id.as_str()).collect();
    ids.into_iter().collect::<Vec<_>>().join(",")
}

fn fixed_scope_id(units: &[Arc<StyleUnit>]) -> Option<String> {
    let mut fixed: Vec<&str> = Vec::new();
    for unit in units {
        if let Some(id) = unit.fixed_id.as_deref() {
            if !fixed.contains(&id) {
                fixed.push(id);
            }
        }
    }
    if fixed.is_empty() {
        None
    } else {
        Some(fixed.join("-"))
    }
}

/// Bijective base-26: 0 → `a`, 25 → `z`, 26 → `aa`.
pub fn scope_name(mut n: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'a' + (n % 26) as u8);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

fn substitute_dynamic(unit: &StyleUnit, values: &DynamicValues) -> Result<String, StyleError> {
    let mut text = unit.css.clone();
    for dynamic in &unit.dynamic {
        let value = values
            .get(&dynamic.block)
            .ok_or_else(|| StyleError::MissingDynamicValue {
                unit: unit.id.clone(),
                block: dynamic.block.clone(),
            })?;
        text = text.replace(&dynamic.placeholder, value);
    }
    Ok(text)
}

fn process_units(units: &[Arc<StyleUnit>], scope_id: &str, ctx: ResolveContext<'_>) -> Result<String, StyleError> {
    let marker = ScopeMarker::new(ctx.options.scope_strategy, &ctx.options.scope_prefix, scope_id);
    let mut blocks = Vec::new();
    for unit in units {
        let text = substitute_dynamic(unit, ctx.values)?;
        let scoped = scope_css(&text, &marker).map_err(|error| StyleError::Malformed {
            unit: unit.id.clone(),
            error,
        })?;
        let scoped = scoped.trim();
        if scoped.is_empty() {
            continue;
        }
        match unit.attributes.get("media") {
            Some(media) => blocks.push(format!("@media {media} {{\n{scoped}\n}}")),
            None => blocks.push(scoped.to_string()),
        }
    }
    Ok(blocks.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(id: &str, css: &str) -> Arc<StyleUnit> {
        Arc::new(StyleUnit::new(id, css))
    }

    fn ctx<'a>(options: &'a RenderOptions, values: &'a DynamicValues) -> ResolveContext<'a> {
        ResolveContext { options, values }
    }

    #[test]
    fn test_register_is_order_independent() {
        let mut registry = StyleRegistry::new();
        let a = unit("a", ".a{}");
        let b = unit("b", ".b{}");
        let first = registry.register_component(&[a.clone(), b.clone()], "X");
        let second = registry.register_component(&[b.clone(), a.clone()], "Y");
        let third = registry.register_component(&[a.clone()], "Z");
        assert_eq!(first, second);
        assert_ne!(first, third);
        assert_eq!(registry.pending_count(), 2);
    }

    #[test]
    fn test_resolve_twice_is_stable() {
        let options = RenderOptions::default();
        let values = DynamicValues::new();
        let mut registry = StyleRegistry::new();
        let uuid = registry.register_component(&[unit("a", ".title { color: red; }")], "Card");
        let style = StyleRef::Component(uuid);

        let first = registry.resolve(&style, ctx(&options, &values)).unwrap();
        let css_first = registry.resolved(&style).unwrap().css.clone();
        let second = registry.resolve(&style, ctx(&options, &values)).unwrap();
        assert_eq!(first, "a");
        assert_eq!(first, second);
        assert_eq!(registry.resolved(&style).unwrap().css, css_first);
        assert_eq!(css_first, ".title[data-s-a] { color: red; }");
    }

    #[test]
    fn test_unresolved_entries_emit_nothing() {
        let options = RenderOptions::default();
        let values = DynamicValues::new();
        let mut registry = StyleRegistry::new();
        let used = registry.register_component(&[unit("a", ".used{}")], "A");
        registry.register_component(&[unit("b", ".dead{}")], "B");
        registry.resolve(&StyleRef::Component(used), ctx(&options, &values)).unwrap();
        let css = registry.aggregated_css();
        assert!(css.contains(".used"));
        assert!(!css.contains(".dead"));
    }

    #[test]
    fn test_scope_names() {
        assert_eq!(scope_name(0), "a");
        assert_eq!(scope_name(25), "z");
        assert_eq!(scope_name(26), "aa");
        assert_eq!(scope_name(27), "ab");
        assert_eq!(scope_name(26 + 26 * 26), "aaa");
    }

    #[test]
    fn test_fixed_ids_take_precedence() {
        let options = RenderOptions::default();
        let values = DynamicValues::new();
        let mut registry = StyleRegistry::new();
        let fixed = Arc::new(StyleUnit::new("u1", ".x{}").with_fixed_id("card"));
        let other = Arc::new(StyleUnit::new("u2", ".y{}").with_fixed_id("theme"));
        let plain = unit("u3", ".z{}");

        let style = StyleRef::Component(registry.register_component(&[fixed, other, plain.clone()], "Card"));
        assert_eq!(registry.resolve(&style, ctx(&options, &values)).unwrap(), "card-theme");

        // Fixed ids do not consume the counter.
        let next = StyleRef::Component(registry.register_component(&[plain], "Other"));
        assert_eq!(registry.resolve(&next, ctx(&options, &values)).unwrap(), "a");
    }

    #[test]
    fn test_slot_and_component_tables_share_counter() {
        let options = RenderOptions::default();
        let values = DynamicValues::new();
        let mut registry = StyleRegistry::new();
        let host = unit("host", ".h{}");
        let child = unit("child", ".c{}");
        let over = unit("over", ".o{}");

        let component = StyleRef::Component(registry.register_component(&[host.clone()], "Host"));
        let slot = StyleRef::Slot(registry.register_slot(&[host.clone()], &[child.clone()], &over, "Host/header"));
        assert_eq!(registry.resolve(&component, ctx(&options, &values)).unwrap(), "a");
        assert_eq!(registry.resolve(&slot, ctx(&options, &values)).unwrap(), "b");

        let ids: Vec<_> = registry.units(&slot).unwrap().iter().map(|u| u.id.clone()).collect();
        assert_eq!(ids, vec!["host", "child", "over"]);
    }

    #[test]
    fn test_slot_combination_drops_shared_host_units() {
        let mut registry = StyleRegistry::new();
        let shared = unit("shared", ".s{}");
        let host_only = unit("h", ".h{}");
        let over = unit("over", ".o{}");
        let uuid = registry.register_slot(&[shared.clone(), host_only.clone()], &[shared.clone()], &over, "x");
        let ids: Vec<_> = registry
            .units(&StyleRef::Slot(uuid.clone()))
            .unwrap()
            .iter()
            .map(|u| u.id.clone())
            .collect();
        assert_eq!(ids, vec!["h", "shared", "over"]);

        let again = registry.register_slot(&[host_only, shared.clone()], &[shared], &over, "y");
        assert_eq!(uuid, again);
    }

    #[test]
    fn test_dynamic_values_and_media() {
        let options = RenderOptions::default();
        let mut values = DynamicValues::new();
        values.insert("blk1", "#ff0000");
        let mut registry = StyleRegistry::new();
        let dynamic = Arc::new(
            StyleUnit::new("d", ".x { color: __DYN0__; }")
                .with_dynamic("__DYN0__", "blk1")
                .with_attribute("media", "print"),
        );
        let style = StyleRef::Component(registry.register_component(&[dynamic], "D"));
        registry.resolve(&style, ctx(&options, &values)).unwrap();
        assert_eq!(
            registry.resolved(&style).unwrap().css,
            "@media print {\n.x[data-s-a] { color: #ff0000; }\n}"
        );
    }

    #[test]
    fn test_missing_dynamic_value_is_fatal() {
        let options = RenderOptions::default();
        let values = DynamicValues::new();
        let mut registry = StyleRegistry::new();
        let dynamic = Arc::new(StyleUnit::new("d", ".x { color: $c; }").with_dynamic("$c", "nope"));
        let style = StyleRef::Component(registry.register_component(&[dynamic], "D"));
        let err = registry.resolve(&style, ctx(&options, &values)).unwrap_err();
        assert_eq!(
            err,
            StyleError::MissingDynamicValue {
                unit: "d".into(),
                block: "nope".into()
            }
        );
    }

    #[test]
    fn test_malformed_css_is_fatal() {
        let options = RenderOptions::default();
        let values = DynamicValues::new();
        let mut registry = StyleRegistry::new();
        let style = StyleRef::Component(registry.register_component(&[unit("bad", ".x { color: red;")], "B"));
        assert!(matches!(
            registry.resolve(&style, ctx(&options, &values)),
            Err(StyleError::Malformed { .. })
        ));
    }

    #[test]
    fn test_unknown_uuid() {
        let options = RenderOptions::default();
        let values = DynamicValues::new();
        let mut registry = StyleRegistry::new();
        let bogus = StyleRef::Component(StyleUuid::from_key("nothing"));
        assert!(matches!(
            registry.resolve(&bogus, ctx(&options, &values)),
            Err(StyleError::UnknownUuid(_))
        ));
    }
}
