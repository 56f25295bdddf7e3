//! Kern — a lifecycle FSM, scoped DI container, and authorization
//! dispatcher for Rust services.
//!
//! This facade crate re-exports the core runtime substrate through a
//! single dependency. Import everything you need with:
//!
//! ```ignore
//! use kern::prelude::*;
//! ```
//!
//! # Feature flags
//!
//! | Feature  | Default | Crate                          |
//! |----------|---------|---------------------------------|
//! | `sqlite` | **yes** | embedded-SQL microcache backend |
//! | `cache`  | no      | direct access to `kern-cache`   |

pub extern crate kern_core;

#[cfg(feature = "cache")]
pub extern crate kern_cache;

// Re-export everything from kern-core at the top level for convenience.
pub use kern_core::*;

#[cfg(feature = "cache")]
pub use kern_cache;

/// Unified prelude — import everything with `use kern::prelude::*`.
pub mod prelude {
    pub use kern_core::{
        Ability, AuthError, AuthorizationDispatcher, BuiltinAbility, ContainerError, Decision,
        EntityRef, HandlerChain, Lifetime, LifecycleError, Phase, Query, Root, RootError,
        RootConfig, Scope, ServiceContainer, ServiceId, StateMachine, TypeHierarchy, TypeTag,
    };

    #[cfg(feature = "cache")]
    pub use kern_cache::{CacheBackend, CacheError, Microcache};
}
