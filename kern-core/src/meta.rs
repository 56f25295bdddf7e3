//! Attribute-stream registration.
//!
//! There is no language-level macro/attribute system behind this: callers
//! feed `(tag, params, target)` tuples into an [`AttributeRegistry`] the way
//! a generated plugin would, and consumers pull them back out by tag plus
//! the concrete `params` type they expect. This generalizes
//! `r2e_core::meta::MetaRegistry`'s `TypeId`-keyed `Vec<M>` store: that
//! registry keys purely on the Rust type of the metadata (one `RouteInfo`
//! bucket, one `ParamInfo` bucket); this one keys on a caller-chosen string
//! tag first; because two pushes under the same tag aren't guaranteed to
//! carry the same concrete `params` type, readers downcast entry-by-entry
//! rather than the whole bucket at once.

use crate::container::ServiceId;
use crate::hierarchy::TypeTag;
use dashmap::DashMap;
use std::any::Any;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Service(ServiceId),
    Type(TypeTag),
}

struct AttributeEntry {
    params: Box<dyn Any + Send + Sync>,
    target: Target,
}

/// Type-erased store of attribute tuples, grouped by tag in push order.
#[derive(Default)]
pub struct AttributeRegistry {
    by_tag: DashMap<String, Vec<AttributeEntry>>,
}

impl AttributeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<P: Any + Send + Sync>(&self, tag: impl Into<String>, params: P, target: Target) {
        self.by_tag
            .entry(tag.into())
            .or_default()
            .push(AttributeEntry { params: Box::new(params), target });
    }

    /// Visit every entry under `tag` whose params downcast to `P`, in push
    /// order. This is the primary read API — it avoids returning borrows
    /// tied to the internal shard guard.
    pub fn with_params<P: Any + Send + Sync>(&self, tag: &str, mut visit: impl FnMut(&P, &Target)) {
        if let Some(entries) = self.by_tag.get(tag) {
            for entry in entries.iter() {
                if let Some(params) = entry.params.downcast_ref::<P>() {
                    visit(params, &entry.target);
                }
            }
        }
    }

    pub fn tag_count(&self, tag: &str) -> usize {
        self.by_tag.get(tag).map(|v| v.len()).unwrap_or(0)
    }
}
