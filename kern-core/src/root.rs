//! The framework root: process-wide wiring of configuration, the
//! microcache, the lifecycle FSM, the service container, the type
//! hierarchy, and the authorization dispatcher.
//!
//! Constructed exactly once per process, guarded by a `OnceLock` — the same
//! pattern `r2e-cache` uses for its global `CACHE_BACKEND`, but here a
//! second construction attempt is a programmer error
//! (`RootError::DuplicateRoot`) rather than something to lazily default
//! around.

use crate::authz::AuthorizationDispatcher;
use crate::config::{RootConfig, RootConfigOverrides};
use crate::container::{BoxedFactory, ContainerError, Instance, Lifetime, ServiceContainer, ServiceId};
use crate::hierarchy::TypeHierarchy;
use crate::lifecycle::{LifecycleError, Phase, StateMachine};
use crate::meta::AttributeRegistry;
use crate::path_registry::PathRegistry;
use crate::scope::Scope;
use kern_cache::{BackendConfig, Microcache};
use std::fmt;
use std::sync::{Arc, OnceLock};

static ROOT: OnceLock<Arc<Root>> = OnceLock::new();

/// How often the background scope-reclamation sweep runs.
const SCOPE_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
/// A `Scope::Task` row untouched for this long is treated as abandoned.
const SCOPE_IDLE_BUDGET: std::time::Duration = std::time::Duration::from_secs(300);

#[derive(Debug)]
pub enum RootError {
    /// A second `Root` was constructed for this process.
    DuplicateRoot,
    ConfigMissing { rel: String },
    ConfigInvalid { rel: String, message: String },
}

impl fmt::Display for RootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RootError::DuplicateRoot => write!(f, "a Root has already been constructed for this process"),
            RootError::ConfigMissing { rel } => write!(f, "no config file found for '{rel}'"),
            RootError::ConfigInvalid { rel, message } => {
                write!(f, "config file '{rel}' failed to parse: {message}")
            }
        }
    }
}

impl std::error::Error for RootError {}

pub struct Root {
    config: RootConfig,
    cache: Microcache,
    config_registry: PathRegistry,
    lifecycle: Arc<StateMachine>,
    container: Arc<ServiceContainer>,
    hierarchy: Arc<TypeHierarchy>,
    authz: AuthorizationDispatcher,
    meta: AttributeRegistry,
}

impl Root {
    /// Construct the process-wide `Root`. Fails with
    /// `RootError::DuplicateRoot` if one already exists — callers that just
    /// want the existing instance should use [`Root::current`] instead.
    pub async fn init(overrides: RootConfigOverrides) -> Result<Arc<Root>, RootError> {
        if ROOT.get().is_some() {
            return Err(RootError::DuplicateRoot);
        }

        // Best-effort: load a `.env` file from the current directory before
        // reading process environment variables, so a developer's local
        // overrides are in place for the `RootConfig::resolve` call below. A
        // missing `.env` is not an error — most deployments have none.
        if let Err(err) = dotenvy::dotenv() {
            if !matches!(err, dotenvy::Error::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound) {
                tracing::debug!(%err, "failed to load .env file");
            }
        }

        let mut config = RootConfig::resolve(overrides);

        let backend_config = BackendConfig {
            shared_table_rows: config.apcu_rows.unwrap_or(8192),
            shared_table_value_size: config.apcu_value_size.unwrap_or(4096),
            sqlite_path: config.apcu_sqlite_path.clone(),
            use_shared_table: config.apcu_rows.is_some() || config.apcu_value_size.is_some(),
        };
        #[cfg(feature = "sqlite")]
        let cache = Microcache::auto(&config.root, backend_config).await;
        #[cfg(not(feature = "sqlite"))]
        let cache = Microcache::auto(backend_config);

        config.finalize_salt(&cache).await;

        let config_registry = PathRegistry::new(config.config_root.clone(), cache.clone());
        config_registry.add_path(config.root.join("_config_defaults"));

        let lifecycle = Arc::new(StateMachine::new());
        let container = Arc::new(ServiceContainer::new(lifecycle.clone()));
        let hierarchy = Arc::new(TypeHierarchy::new());
        let authz = AuthorizationDispatcher::new(hierarchy.clone());
        let meta = AttributeRegistry::new();

        lifecycle
            .trigger(Phase::Bootstrap)
            .expect("a freshly constructed StateMachine always allows Initializing -> Bootstrap");

        let root = Arc::new(Root {
            config,
            cache,
            config_registry,
            lifecycle,
            container,
            hierarchy,
            authz,
            meta,
        });

        ROOT.set(root.clone()).map_err(|_| RootError::DuplicateRoot)?;
        root.spawn_scope_sweeper();
        tracing::info!("framework root constructed");
        Ok(root)
    }

    /// Best-effort reclamation for `Scope::Task` instance rows (spec §5/§8):
    /// Tokio gives no callback for "this task has terminated", so rather than
    /// a true weak map this periodically reaps rows that have gone untouched
    /// for [`SCOPE_IDLE_BUDGET`]. Runs for the life of the process; there is
    /// exactly one such task per `Root` (construction itself is a one-shot
    /// `OnceLock`).
    fn spawn_scope_sweeper(&self) {
        let container = self.container.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SCOPE_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let reaped = container.sweep_idle(SCOPE_IDLE_BUDGET);
                if reaped > 0 {
                    tracing::debug!(reaped, "scope sweep reclaimed idle task scopes");
                }
            }
        });
    }

    /// The process's `Root`, if one has been constructed.
    pub fn current() -> Option<Arc<Root>> {
        ROOT.get().cloned()
    }

    pub fn config(&self) -> &RootConfig {
        &self.config
    }

    pub fn cache(&self) -> &Microcache {
        &self.cache
    }

    pub fn lifecycle(&self) -> &StateMachine {
        &self.lifecycle
    }

    pub fn authz(&self) -> &AuthorizationDispatcher {
        &self.authz
    }

    pub fn hierarchy(&self) -> &TypeHierarchy {
        &self.hierarchy
    }

    pub fn meta(&self) -> &AttributeRegistry {
        &self.meta
    }

    pub fn register(
        &self,
        id: impl Into<ServiceId>,
        lifetime: Lifetime,
        factory: BoxedFactory,
    ) -> Result<(), ContainerError> {
        self.container.register(id, lifetime, factory)
    }

    pub fn has(&self, id: &ServiceId) -> bool {
        self.container.has(id)
    }

    pub fn get(&self, id: impl Into<ServiceId>) -> Result<Instance, ContainerError> {
        self.container.get(id)
    }

    pub fn current_scope(&self) -> Result<Scope, LifecycleError> {
        self.lifecycle.current_scope()
    }

    /// Resolve `rel` via the `config` path registry and parse it as YAML.
    /// Falls back to `default` when no file is found; fails with
    /// `RootError::ConfigMissing` if neither a file nor a default exists.
    pub async fn load_config(
        &self,
        rel: &str,
        default: Option<serde_yaml::Value>,
    ) -> Result<serde_yaml::Value, RootError> {
        match self.config_registry.find_first(rel).await {
            Some(path) => {
                let contents = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| RootError::ConfigInvalid { rel: rel.to_string(), message: e.to_string() })?;
                serde_yaml::from_str(&contents)
                    .map_err(|e| RootError::ConfigInvalid { rel: rel.to_string(), message: e.to_string() })
            }
            None => default.ok_or_else(|| RootError::ConfigMissing { rel: rel.to_string() }),
        }
    }

    /// Like [`Root::load_config`], but derives `rel` from a Rust type name
    /// (`::` replaced by `/`, `.yaml` appended).
    pub async fn load_service_config(
        &self,
        type_name: &str,
        default: Option<serde_yaml::Value>,
    ) -> Result<serde_yaml::Value, RootError> {
        let rel = format!("{}.yaml", type_name.replace("::", "/"));
        self.load_config(&rel, default).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `Root::init` is process-global (backed by a `OnceLock`), so only one
    // test in this binary may successfully call it; the rest exercise the
    // pieces it wires together directly. A dedicated `tests/` integration
    // binary covers the full `init` + duplicate-rejection path in its own
    // process.

    #[test]
    fn root_error_messages_name_the_rel_path() {
        let err = RootError::ConfigMissing { rel: "widgets.yaml".to_string() };
        assert!(err.to_string().contains("widgets.yaml"));
    }
}
