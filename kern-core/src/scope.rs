//! Execution-scope identity.
//!
//! A [`Scope`] answers "which cooperative unit of work am I resolving
//! services for" — either a live Tokio task or the process itself. There is
//! no inheritance into spawned sub-tasks: a task spawned from inside another
//! task gets its own `Scope::Task`, not its parent's. A caller that needs
//! scope continuity across a `tokio::spawn` boundary must pass an explicit
//! `Scope` value into the spawned future.

/// Newtype over `tokio::task::Id` so it can be used as a `DashMap`/`HashMap`
/// key alongside `Scope::Process` without tokio's `Id` leaking through the
/// container's public API directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(tokio::task::Id);

impl From<tokio::task::Id> for TaskId {
    fn from(id: tokio::task::Id) -> Self {
        TaskId(id)
    }
}

/// The unit of work a `Scoped` service instance is cached against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// A live Tokio task, identified by its stable `tokio::task::Id`.
    Task(TaskId),
    /// The process itself — the scope `Singleton` services always resolve
    /// under, and the scope `Scoped` services fall back to outside of any
    /// task (e.g. during `Bootstrap`, once `Ready`).
    Process,
}

impl Scope {
    /// The scope of the calling context, if one can be determined without
    /// reference to lifecycle phase. Returns `None` outside of a Tokio task
    /// context — callers needing the `Process` fallback go through
    /// [`crate::lifecycle::StateMachine::current_scope`] instead, since that
    /// fallback is only valid once the process has reached `Ready`.
    pub fn of_current_task() -> Option<Scope> {
        tokio::task::try_id().map(|id| Scope::Task(id.into()))
    }
}
