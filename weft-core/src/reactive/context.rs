//! Execution Stack
//!
//! The execution stack tracks which effect is currently running. This
//! enables automatic dependency tracking: when a state cell is read, the
//! effect on top of the stack is registered as a subscriber.
//!
//! # Implementation
//!
//! We use a thread-local stack of running effects. When an effect body
//! starts executing we push the effect; when the body completes (or its
//! synchronous portion ends at the first suspension point) we pop it.
//!
//! This design supports nested effect creation: an effect created while
//! another effect is executing becomes a sub-effect of the one on top of
//! the stack.
//!
//! # The dependency-capture window
//!
//! Stack presence *is* the capture window. An async effect body is polled
//! once while its scope is on the stack; if it suspends, the scope is
//! popped before the continuation is scheduled, so reads performed after
//! the first suspension point do not register dependencies. This is an
//! explicit contract, not an oversight.

use std::cell::RefCell;

use super::effect::{Effect, EffectId};

thread_local! {
    static STACK: RefCell<Vec<Effect>> = RefCell::new(Vec::new());
}

/// Guard that pops the execution stack when dropped.
///
/// This keeps the stack consistent even if the effect body panics.
pub(crate) struct EffectScope {
    id: EffectId,
}

impl EffectScope {
    /// Push `effect` onto the execution stack.
    ///
    /// While the returned guard is alive, state reads register `effect`
    /// as a subscriber and new effects become its sub-effects.
    pub(crate) fn enter(effect: Effect) -> Self {
        let id = effect.id();
        STACK.with(|stack| stack.borrow_mut().push(effect));
        Self { id }
    }
}

impl Drop for EffectScope {
    fn drop(&mut self) {
        STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Verify we're popping the scope we pushed.
            if let Some(effect) = popped {
                debug_assert_eq!(
                    effect.id(),
                    self.id,
                    "EffectScope mismatch: expected {:?}, got {:?}",
                    self.id,
                    effect.id()
                );
            }
        });
    }
}

/// The effect currently on top of the execution stack, if any.
pub(crate) fn current() -> Option<Effect> {
    STACK.with(|stack| stack.borrow().last().cloned())
}

/// Whether `effect` is anywhere on the execution stack.
///
/// Used by the write-propagation guard: an effect that is mid-execution
/// and writes a state it subscribes to may re-enter itself at most once
/// per propagation pass.
pub(crate) fn is_running(effect: &Effect) -> bool {
    STACK.with(|stack| stack.borrow().iter().any(|e| e.id() == effect.id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_tracks_current_effect() {
        let effect = Effect::new_sync(|| {});

        assert!(current().is_none());

        {
            let _scope = EffectScope::enter(effect.clone());
            assert_eq!(current().map(|e| e.id()), Some(effect.id()));
            assert!(is_running(&effect));
        }

        // Scope cleaned up after drop.
        assert!(current().is_none());
        assert!(!is_running(&effect));
    }

    #[test]
    fn nested_scopes() {
        let outer = Effect::new_sync(|| {});
        let inner = Effect::new_sync(|| {});

        {
            let _outer_scope = EffectScope::enter(outer.clone());
            assert_eq!(current().map(|e| e.id()), Some(outer.id()));

            {
                let _inner_scope = EffectScope::enter(inner.clone());
                assert_eq!(current().map(|e| e.id()), Some(inner.id()));
                // The outer effect is still running, just not on top.
                assert!(is_running(&outer));
            }

            // After the inner scope drops, the outer is current again.
            assert_eq!(current().map(|e| e.id()), Some(outer.id()));
        }

        assert!(current().is_none());
    }
}
