//! Ordered, three-valued handler dispatch.
//!
//! A [`HandlerChain`] is the one dispatch primitive the rest of the core is
//! built from: the lifecycle FSM fires phase-enter hooks through one, and
//! the authorization dispatcher runs both its guard and handler phases
//! through one per type tag. Three-valued because "I don't have an opinion"
//! (`Decision::Pass`) has to be distinguishable from "I actively allow this"
//! — a chain of listeners that all abstain must still resolve to *some*
//! default, decided by the caller, not silently coerced to allow or deny.

use std::sync::{Mutex, RwLock};

/// The result of one listener, or of an entire [`HandlerChain::trigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    /// Abstain — defer to the next listener, or to the chain's caller if
    /// this was the last one.
    Pass,
}

impl Decision {
    pub fn is_pass(self) -> bool {
        matches!(self, Decision::Pass)
    }
}

type Listener<Q> = Box<dyn Fn(&Q) -> Decision + Send + Sync>;

/// An ordered list of listeners for one topic/query type `Q`.
///
/// `listen` appends in registration order. `trigger` invokes listeners
/// left-to-right and returns the first non-`Pass` result, or `Pass` if the
/// chain is empty or every listener passed.
///
/// Listeners registered *during* a `trigger` (e.g. a listener that itself
/// calls `listen` on the same chain) are buffered and only spliced in once
/// `trigger` returns — the spec requires that a chain never observes its
/// own mutation mid-dispatch.
pub struct HandlerChain<Q> {
    listeners: RwLock<Vec<Listener<Q>>>,
    pending: Mutex<Vec<Listener<Q>>>,
    in_flight: std::sync::atomic::AtomicU32,
}

impl<Q> Default for HandlerChain<Q> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            in_flight: std::sync::atomic::AtomicU32::new(0),
        }
    }
}

impl<Q> HandlerChain<Q> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener. Safe to call from inside another listener's body
    /// during `trigger` — the new listener is queued and joins the chain
    /// only after the in-flight `trigger` returns.
    pub fn listen<F>(&self, f: F)
    where
        F: Fn(&Q) -> Decision + Send + Sync + 'static,
    {
        if self.in_flight.load(std::sync::atomic::Ordering::Acquire) > 0 {
            self.pending.lock().unwrap().push(Box::new(f));
        } else {
            self.listeners.write().unwrap().push(Box::new(f));
        }
    }

    /// Run listeners in registration order; return the first non-`Pass`
    /// result, else `Pass`. Listener panics propagate to the caller
    /// unchanged — there is no per-listener `catch_unwind`.
    pub fn trigger(&self, query: &Q) -> Decision {
        self.in_flight.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
        let result = {
            let listeners = self.listeners.read().unwrap();
            let mut decision = Decision::Pass;
            for listener in listeners.iter() {
                let d = listener(query);
                if !d.is_pass() {
                    decision = d;
                    break;
                }
            }
            decision
        };
        let still_in_flight =
            self.in_flight.fetch_sub(1, std::sync::atomic::Ordering::AcqRel) - 1;
        if still_in_flight == 0 {
            let mut pending = self.pending.lock().unwrap();
            if !pending.is_empty() {
                self.listeners.write().unwrap().extend(pending.drain(..));
            }
        }
        result
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_chain_passes() {
        let chain: HandlerChain<()> = HandlerChain::new();
        assert_eq!(chain.trigger(&()), Decision::Pass);
    }

    #[test]
    fn all_pass_chain_passes() {
        let chain: HandlerChain<()> = HandlerChain::new();
        chain.listen(|_| Decision::Pass);
        chain.listen(|_| Decision::Pass);
        assert_eq!(chain.trigger(&()), Decision::Pass);
    }

    #[test]
    fn first_non_pass_short_circuits() {
        let chain: HandlerChain<()> = HandlerChain::new();
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let c1 = calls.clone();
        chain.listen(move |_| {
            c1.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Decision::Deny
        });
        let c2 = calls.clone();
        chain.listen(move |_| {
            c2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Decision::Allow
        });
        assert_eq!(chain.trigger(&()), Decision::Deny);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn registration_order_is_preserved() {
        let chain: HandlerChain<()> = HandlerChain::new();
        chain.listen(|_| Decision::Pass);
        chain.listen(|_| Decision::Allow);
        chain.listen(|_| Decision::Deny);
        assert_eq!(chain.trigger(&()), Decision::Allow);
    }

    #[test]
    fn listening_during_trigger_is_deferred() {
        let chain: std::sync::Arc<HandlerChain<()>> = std::sync::Arc::new(HandlerChain::new());
        let chain2 = chain.clone();
        chain.listen(move |_| {
            chain2.listen(|_| Decision::Deny);
            Decision::Pass
        });
        // The listener added during trigger must not run in this trigger.
        assert_eq!(chain.trigger(&()), Decision::Pass);
        // It is visible on the next trigger.
        assert_eq!(chain.trigger(&()), Decision::Deny);
    }
}
