//! Declarative lifecycle state machine.
//!
//! Process phases gate what the rest of the core will let you do: service
//! registration is only legal during `Bootstrap`, and the `Process` scope
//! fallback only exists once `Ready`. Transitions are validated against a
//! fixed table and broadcast through a per-phase [`HandlerChain`] so other
//! subsystems (notably the container's cycle-detection reset and any
//! application-level bootstrap hooks) can react to phase entry.

use crate::handler::{Decision, HandlerChain};
use crate::scope::Scope;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Initializing,
    Bootstrap,
    Ready,
    Failed,
    Shutdown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The query type dispatched through a phase's `HandlerChain` on entry.
#[derive(Debug, Clone, Copy)]
pub struct PhaseEvent {
    pub from: Phase,
    pub to: Phase,
}

#[derive(Debug)]
pub enum LifecycleError {
    InvalidTransition { from: Phase, to: Phase },
    ScopeUnavailable,
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleError::InvalidTransition { from, to } => {
                write!(f, "invalid lifecycle transition: {from} -> {to}")
            }
            LifecycleError::ScopeUnavailable => {
                write!(f, "no scope available outside a task before the process is ready")
            }
        }
    }
}

impl std::error::Error for LifecycleError {}

fn transition_table() -> HashMap<Phase, HashSet<Phase>> {
    use Phase::*;
    let mut table = HashMap::new();
    table.insert(Initializing, HashSet::from([Bootstrap, Failed]));
    table.insert(Bootstrap, HashSet::from([Ready, Failed]));
    table.insert(Ready, HashSet::from([Shutdown]));
    table.insert(Failed, HashSet::from([Shutdown]));
    table.insert(Shutdown, HashSet::new());
    table
}

/// Declarative phase FSM. One `HandlerChain<PhaseEvent>` per phase is kept
/// so `on_enter(phase, ..)` listeners only see events for the phase they
/// registered against, rather than filtering a single shared chain.
pub struct StateMachine {
    table: HashMap<Phase, HashSet<Phase>>,
    current: RwLock<Phase>,
    on_enter: HashMap<Phase, HandlerChain<PhaseEvent>>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        let table = transition_table();
        let on_enter = table.keys().map(|p| (*p, HandlerChain::new())).collect();
        Self {
            table,
            current: RwLock::new(Phase::Initializing),
            on_enter,
        }
    }

    pub fn phase(&self) -> Phase {
        *self.current.read().unwrap()
    }

    /// Subscribe a listener that fires whenever the machine enters `phase`.
    /// A listener returning `Decision::Deny` does not block the transition —
    /// phase entry already happened by the time listeners run — it is purely
    /// advisory signal-back for chained hooks built on the same
    /// `HandlerChain<PhaseEvent>` idiom as the rest of the core.
    pub fn on_enter<F>(&self, phase: Phase, f: F)
    where
        F: Fn(&PhaseEvent) -> Decision + Send + Sync + 'static,
    {
        if let Some(chain) = self.on_enter.get(&phase) {
            chain.listen(f);
        }
    }

    /// Attempt to move to `to`. Fails without mutating state if `to` is not
    /// reachable from the current phase.
    pub fn trigger(&self, to: Phase) -> Result<(), LifecycleError> {
        let from = {
            let mut current = self.current.write().unwrap();
            let allowed = self.table.get(&*current).map(|s| s.contains(&to)).unwrap_or(false);
            if !allowed {
                return Err(LifecycleError::InvalidTransition { from: *current, to });
            }
            let from = *current;
            *current = to;
            from
        };
        tracing::info!(?from, ?to, "lifecycle phase transition");
        if let Some(chain) = self.on_enter.get(&to) {
            chain.trigger(&PhaseEvent { from, to });
        }
        Ok(())
    }

    /// The scope of the calling context: the enclosing Tokio task if there
    /// is one, else `Scope::Process` once the machine has reached `Ready`.
    pub fn current_scope(&self) -> Result<Scope, LifecycleError> {
        if let Some(scope) = Scope::of_current_task() {
            return Ok(scope);
        }
        if self.phase() == Phase::Ready {
            return Ok(Scope::Process);
        }
        Err(LifecycleError::ScopeUnavailable)
    }
}
