//! Two-phase, type-specificity-ordered authorization dispatch.
//!
//! Guards run first, walking the [`TypeHierarchy`] from most specific to
//! least: any guard `Deny` stops the check cold. A guard `Allow` is a
//! programming error — guards exist only to veto, never to grant — and
//! surfaces as [`AuthError::LogicError`] rather than silently succeeding.
//! Handlers run second, over the same specificity order, and may
//! `Allow`/`Deny`/`Pass`. If every guard and handler passes, the dispatcher
//! falls through to a final catch-all [`HandlerChain`] whose own silence
//! defaults to `true` (allow).

use crate::handler::{Decision, HandlerChain};
use crate::hierarchy::{TypeHierarchy, TypeTag};
use dashmap::DashMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinAbility {
    List,
    Create,
    Read,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ability {
    Builtin(BuiltinAbility),
    Custom(Arc<str>),
}

/// The subject of an authorization check: a type tag plus, for
/// instance-level checks, an opaque payload that custom guards/handlers can
/// downcast. Owned (`Arc<dyn Any>`) rather than borrowed — listeners are
/// registered once and live for the dispatcher's lifetime, so a borrowed
/// payload would force every listener registration to carry the borrow's
/// lifetime, which is the kind of up-front lifetime infection the teacher's
/// own trait-object call sites avoid.
#[derive(Clone)]
pub struct EntityRef {
    pub tag: TypeTag,
    pub payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl EntityRef {
    pub fn of_type(tag: impl Into<TypeTag>) -> Self {
        Self { tag: tag.into(), payload: None }
    }

    pub fn with_payload(tag: impl Into<TypeTag>, payload: Arc<dyn Any + Send + Sync>) -> Self {
        Self { tag: tag.into(), payload: Some(payload) }
    }
}

#[derive(Clone)]
pub struct Query {
    pub ability: Ability,
    pub entity: EntityRef,
    pub field: Option<Arc<str>>,
}

#[derive(Debug)]
pub enum AuthError {
    UnknownAbility { name: Arc<str> },
    /// A guard returned `Decision::Allow` — guards may only deny or pass.
    LogicError { tag: TypeTag },
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::UnknownAbility { name } => write!(f, "unknown ability: {name}"),
            AuthError::LogicError { tag } => {
                write!(f, "guard for {tag} returned Allow, which is not a legal guard outcome")
            }
        }
    }
}

impl std::error::Error for AuthError {}

pub struct AuthorizationDispatcher {
    hierarchy: Arc<TypeHierarchy>,
    guards: DashMap<TypeTag, Arc<HandlerChain<Query>>>,
    handlers: DashMap<TypeTag, Arc<HandlerChain<Query>>>,
    fallback: HandlerChain<Query>,
    custom_abilities: dashmap::DashSet<Arc<str>>,
}

impl AuthorizationDispatcher {
    pub fn new(hierarchy: Arc<TypeHierarchy>) -> Self {
        Self {
            hierarchy,
            guards: DashMap::new(),
            handlers: DashMap::new(),
            fallback: HandlerChain::new(),
            custom_abilities: dashmap::DashSet::new(),
        }
    }

    pub fn register_ability(&self, name: impl Into<Arc<str>>) {
        self.custom_abilities.insert(name.into());
    }

    pub fn fallback(&self) -> &HandlerChain<Query> {
        &self.fallback
    }

    pub fn guard_for(&self, tag: impl Into<TypeTag>) -> Arc<HandlerChain<Query>> {
        self.guards.entry(tag.into()).or_insert_with(|| Arc::new(HandlerChain::new())).clone()
    }

    pub fn handler_for(&self, tag: impl Into<TypeTag>) -> Arc<HandlerChain<Query>> {
        self.handlers.entry(tag.into()).or_insert_with(|| Arc::new(HandlerChain::new())).clone()
    }

    fn validate_ability(&self, ability: &Ability) -> Result<(), AuthError> {
        if let Ability::Custom(name) = ability {
            if !self.custom_abilities.contains(name) {
                return Err(AuthError::UnknownAbility { name: name.clone() });
            }
        }
        Ok(())
    }

    /// The two-phase algorithm: guards over the specificity-ordered type
    /// chain (most specific first), then handlers over the same order, then
    /// the fallback. Defaults to `true` if nothing in either phase nor the
    /// fallback expresses an opinion.
    pub fn can(&self, query: &Query) -> Result<bool, AuthError> {
        self.validate_ability(&query.ability)?;
        let chain = self.hierarchy.walk(query.entity.tag.clone());

        for tag in &chain {
            if let Some(guard) = self.guards.get(tag) {
                match guard.trigger(query) {
                    Decision::Deny => return Ok(false),
                    Decision::Allow => return Err(AuthError::LogicError { tag: tag.clone() }),
                    Decision::Pass => {}
                }
            }
        }

        for tag in &chain {
            if let Some(handler) = self.handlers.get(tag) {
                match handler.trigger(query) {
                    Decision::Allow => return Ok(true),
                    Decision::Deny => return Ok(false),
                    Decision::Pass => {}
                }
            }
        }

        match self.fallback.trigger(query) {
            Decision::Allow => Ok(true),
            Decision::Deny => Ok(false),
            Decision::Pass => Ok(true),
        }
    }
}
