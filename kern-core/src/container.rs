//! Scoped dependency-injection container.
//!
//! Services are registered by a string id during `Phase::Bootstrap` and
//! resolved at any later phase. Unlike a compile-time-typed, resolve-once
//! graph, this container has to serve `Scoped` and `Transient` lifetimes at
//! request time, so resolution is runtime string-keyed rather than
//! type-graph-keyed, and instances are cached per [`Scope`] rather than once
//! for the whole process.

use crate::lifecycle::{Phase, StateMachine};
use crate::scope::Scope;
use dashmap::DashMap;
use std::any::Any;
use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceId(Cow<'static, str>);

impl ServiceId {
    pub fn new(id: impl Into<Cow<'static, str>>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&'static str> for ServiceId {
    fn from(s: &'static str) -> Self {
        ServiceId::new(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    Singleton,
    Scoped,
    Transient,
}

pub type Instance = Arc<dyn Any + Send + Sync>;

/// A factory closure. Takes `&ServiceContainer` so a factory can resolve
/// its own dependencies through the same container, the way a constructor
/// bean in `r2e-core/src/beans.rs` receives a `&BeanContext`.
pub type BoxedFactory =
    Box<dyn Fn(&ServiceContainer) -> Result<Instance, ContainerError> + Send + Sync>;

struct ServiceDefinition {
    lifetime: Lifetime,
    factory: BoxedFactory,
}

#[derive(Debug)]
pub enum ContainerError {
    /// Registration attempted outside `Phase::Bootstrap`.
    Locked,
    AlreadyRegistered { id: ServiceId },
    NotFound { id: ServiceId },
    FactoryCycle { id: ServiceId },
    /// A `Scoped` service was requested outside of any live task scope —
    /// distinct from [`ContainerError::NotFound`], since the service *is*
    /// registered and the failure is purely "no scope to cache it under".
    ScopeUnavailable,
}

impl fmt::Display for ContainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerError::Locked => {
                write!(f, "service registration is only permitted during bootstrap")
            }
            ContainerError::AlreadyRegistered { id } => {
                write!(f, "service already registered: {id}")
            }
            ContainerError::NotFound { id } => write!(f, "no service registered: {id}"),
            ContainerError::FactoryCycle { id } => {
                write!(f, "factory cycle detected resolving: {id}")
            }
            ContainerError::ScopeUnavailable => {
                write!(f, "no task scope is available to resolve a scoped service")
            }
        }
    }
}

impl std::error::Error for ContainerError {}

/// Per-scope cached instances plus a per-id construction lock. The lock
/// linearises concurrent, non-reentrant resolutions of the same id onto a
/// single factory call instead of racing them; reentrancy (a factory
/// resolving its own id) is instead detected per-thread via `CONSTRUCTING`,
/// since a lock can't distinguish "this thread again" from "a different
/// thread waiting its turn". `last_touched` backs [`ServiceContainer::sweep_idle`].
#[derive(Default)]
struct ScopeState {
    instances: DashMap<ServiceId, Instance>,
    construction_locks: DashMap<ServiceId, Arc<Mutex<()>>>,
    last_touched: AtomicU64,
}

impl ScopeState {
    fn touch(&self) {
        self.last_touched.store(now_millis(), Ordering::Relaxed);
    }
}

thread_local! {
    /// `(scope, id)` pairs the *current thread's call stack* is already
    /// constructing. Every step from `ServiceContainer::get` down into a
    /// factory's own `container.get` call runs synchronously on one thread
    /// (factories are plain `Fn`, not `async fn`), so a repeated entry here
    /// can only mean a factory reentering its own id, never two independent
    /// callers contending for the same per-id lock.
    static CONSTRUCTING: RefCell<Vec<(Scope, ServiceId)>> = RefCell::new(Vec::new());
}

pub struct ServiceContainer {
    state_machine: Arc<StateMachine>,
    definitions: DashMap<ServiceId, ServiceDefinition>,
    scopes: DashMap<Scope, Arc<ScopeState>>,
}

impl ServiceContainer {
    pub fn new(state_machine: Arc<StateMachine>) -> Self {
        Self {
            state_machine,
            definitions: DashMap::new(),
            scopes: DashMap::new(),
        }
    }

    pub fn register(
        &self,
        id: impl Into<ServiceId>,
        lifetime: Lifetime,
        factory: BoxedFactory,
    ) -> Result<(), ContainerError> {
        if self.state_machine.phase() != Phase::Bootstrap {
            return Err(ContainerError::Locked);
        }
        let id = id.into();
        if self.definitions.contains_key(&id) {
            return Err(ContainerError::AlreadyRegistered { id });
        }
        self.definitions.insert(id, ServiceDefinition { lifetime, factory });
        Ok(())
    }

    pub fn has(&self, id: &ServiceId) -> bool {
        self.definitions.contains_key(id)
    }

    pub fn get(&self, id: impl Into<ServiceId>) -> Result<Instance, ContainerError> {
        let id = id.into();
        let def = self
            .definitions
            .get(&id)
            .ok_or_else(|| ContainerError::NotFound { id: id.clone() })?;

        match def.lifetime {
            Lifetime::Transient => (def.factory)(self),
            Lifetime::Singleton => {
                drop(def);
                self.resolve_cached(Scope::Process, id)
            }
            Lifetime::Scoped => {
                drop(def);
                let scope = self
                    .state_machine
                    .current_scope()
                    .map_err(|_| ContainerError::ScopeUnavailable)?;
                self.resolve_cached(scope, id)
            }
        }
    }

    /// Cross-scope singleton/scoped construction is linearised by a per-id
    /// lock: two genuinely concurrent, non-reentrant callers resolving the
    /// same id block on each other and share one factory call rather than
    /// racing to see who gets a spurious [`ContainerError::FactoryCycle`].
    fn resolve_cached(&self, scope: Scope, id: ServiceId) -> Result<Instance, ContainerError> {
        let state = self.scopes.entry(scope).or_default().clone();
        state.touch();

        if let Some(existing) = state.instances.get(&id) {
            return Ok(existing.clone());
        }

        let reentrant = CONSTRUCTING
            .with(|stack| stack.borrow().iter().any(|(s, i)| *s == scope && *i == id));
        if reentrant {
            return Err(ContainerError::FactoryCycle { id });
        }

        let lock = state
            .construction_locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        // Another thread may have finished constructing it while we waited
        // on the lock above.
        if let Some(existing) = state.instances.get(&id) {
            return Ok(existing.clone());
        }

        CONSTRUCTING.with(|stack| stack.borrow_mut().push((scope, id.clone())));
        let result = (|| {
            let def = self
                .definitions
                .get(&id)
                .ok_or_else(|| ContainerError::NotFound { id: id.clone() })?;
            (def.factory)(self)
        })();
        CONSTRUCTING.with(|stack| stack.borrow_mut().pop());

        let instance = result?;
        state.instances.insert(id, instance.clone());
        Ok(instance)
    }

    /// Drop every cached instance for `scope` immediately — the explicit hook
    /// a caller with its own notion of "this request ended" (e.g. a Tower
    /// middleware) can call rather than waiting for [`ServiceContainer::sweep_idle`].
    pub fn reclaim_scope(&self, scope: &Scope) {
        self.scopes.remove(scope);
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// Remove every `Scope::Task` row untouched for at least `max_idle`.
    /// `Scope::Process` is never swept — singletons live for the process.
    /// This is the best-effort reclamation §5/§8 require in place of a true
    /// weak map: Tokio exposes no callback for "this task has terminated",
    /// so a task scope is instead reaped once it looks abandoned rather than
    /// the instant it actually ends. Returns the number of scopes removed.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let now = now_millis();
        let cutoff_ms = max_idle.as_millis() as u64;
        let stale: Vec<Scope> = self
            .scopes
            .iter()
            .filter(|entry| {
                !matches!(entry.key(), Scope::Process)
                    && now.saturating_sub(entry.value().last_touched.load(Ordering::Relaxed)) >= cutoff_ms
            })
            .map(|entry| *entry.key())
            .collect();
        for scope in &stale {
            self.scopes.remove(scope);
        }
        stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ready_container() -> ServiceContainer {
        let sm = Arc::new(StateMachine::new());
        sm.trigger(Phase::Bootstrap).unwrap();
        ServiceContainer::new(sm)
    }

    #[test]
    fn register_outside_bootstrap_is_locked() {
        let sm = Arc::new(StateMachine::new());
        let container = ServiceContainer::new(sm);
        let err = container
            .register("svc", Lifetime::Transient, Box::new(|_| Ok(Arc::new(1i32))))
            .unwrap_err();
        assert!(matches!(err, ContainerError::Locked));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let container = ready_container();
        container
            .register("svc", Lifetime::Transient, Box::new(|_| Ok(Arc::new(1i32))))
            .unwrap();
        let err = container
            .register("svc", Lifetime::Transient, Box::new(|_| Ok(Arc::new(1i32))))
            .unwrap_err();
        assert!(matches!(err, ContainerError::AlreadyRegistered { .. }));
    }

    #[test]
    fn transient_invokes_factory_every_time() {
        let container = ready_container();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        container
            .register(
                "svc",
                Lifetime::Transient,
                Box::new(move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(1i32))
                }),
            )
            .unwrap();
        container.get("svc").unwrap();
        container.get("svc").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn singleton_invokes_factory_once() {
        let container = ready_container();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        container
            .register(
                "svc",
                Lifetime::Singleton,
                Box::new(move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(1i32))
                }),
            )
            .unwrap();
        container.get("svc").unwrap();
        container.get("svc").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn scoped_instances_differ_across_tasks() {
        let container = Arc::new(ready_container());
        container
            .register("svc", Lifetime::Scoped, Box::new(|_| Ok(Arc::new(1i32))))
            .unwrap();

        let c1 = container.clone();
        let a = tokio::spawn(async move { c1.get("svc").unwrap() }).await.unwrap();
        let c2 = container.clone();
        let b = tokio::spawn(async move { c2.get("svc").unwrap() }).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn reentrant_factory_is_a_cycle() {
        let container = Arc::new(ready_container());
        let c = container.clone();
        container
            .register(
                "svc",
                Lifetime::Singleton,
                Box::new(move |container| container.get("svc").map(|_| Arc::new(1i32) as Instance)),
            )
            .unwrap();
        let _ = c;
        let err = container.get("svc").unwrap_err();
        assert!(matches!(err, ContainerError::FactoryCycle { .. }));
    }

    #[test]
    fn not_found_surfaces_for_unknown_id() {
        let container = ready_container();
        let err = container.get("missing").unwrap_err();
        assert!(matches!(err, ContainerError::NotFound { .. }));
    }

    #[test]
    fn scoped_outside_a_task_and_before_ready_is_scope_unavailable() {
        let container = ready_container();
        container
            .register("svc", Lifetime::Scoped, Box::new(|_| Ok(Arc::new(1i32))))
            .unwrap();
        let err = container.get("svc").unwrap_err();
        assert!(matches!(err, ContainerError::ScopeUnavailable));
    }

    #[tokio::test]
    async fn concurrent_singleton_resolution_linearises_instead_of_cycling() {
        let container = Arc::new(ready_container());
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        container
            .register(
                "svc",
                Lifetime::Singleton,
                Box::new(move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    Ok(Arc::new(1i32))
                }),
            )
            .unwrap();

        let c1 = container.clone();
        let c2 = container.clone();
        let (a, b) = tokio::join!(
            tokio::task::spawn_blocking(move || c1.get("svc").unwrap()),
            tokio::task::spawn_blocking(move || c2.get("svc").unwrap()),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sweep_idle_reaps_only_stale_task_scopes() {
        let container = Arc::new(ready_container());
        container
            .register("svc", Lifetime::Scoped, Box::new(|_| Ok(Arc::new(1i32))))
            .unwrap();

        let c1 = container.clone();
        tokio::spawn(async move { c1.get("svc").unwrap() }).await.unwrap();
        assert_eq!(container.scope_count(), 1);

        // Nothing is idle enough yet.
        assert_eq!(container.sweep_idle(Duration::from_secs(3600)), 0);
        assert_eq!(container.scope_count(), 1);

        // Everything looks idle against a zero budget.
        assert_eq!(container.sweep_idle(Duration::from_secs(0)), 1);
        assert_eq!(container.scope_count(), 0);
    }

    #[test]
    fn sweep_idle_never_reaps_the_process_scope() {
        let container = ready_container();
        container
            .register("svc", Lifetime::Singleton, Box::new(|_| Ok(Arc::new(1i32))))
            .unwrap();
        container.get("svc").unwrap();
        assert_eq!(container.sweep_idle(Duration::from_secs(0)), 0);
        assert_eq!(container.scope_count(), 1);
    }
}
