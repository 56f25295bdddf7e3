//! Core runtime substrate for the framework: a declarative lifecycle FSM, a
//! scoped dependency-injection container, ordered three-valued handler
//! dispatch, a microcached path registry, an explicit type-hierarchy walk,
//! and a two-phase authorization dispatcher, wired together by a
//! process-wide [`Root`].

pub mod authz;
pub mod config;
pub mod container;
pub mod handler;
pub mod hierarchy;
pub mod lifecycle;
pub mod meta;
pub mod path_registry;
pub mod root;
pub mod scope;

pub use authz::{Ability, AuthError, AuthorizationDispatcher, BuiltinAbility, EntityRef, Query};
pub use config::{RootConfig, RootConfigOverrides};
pub use container::{BoxedFactory, ContainerError, Instance, Lifetime, ServiceContainer, ServiceId};
pub use handler::{Decision, HandlerChain};
pub use hierarchy::{TypeHierarchy, TypeTag};
pub use lifecycle::{LifecycleError, Phase, PhaseEvent, StateMachine};
pub use meta::{AttributeRegistry, Target};
pub use path_registry::PathRegistry;
pub use root::{Root, RootError};
pub use scope::{Scope, TaskId};
