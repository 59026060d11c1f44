//! Evaluation Stack
//!
//! Each thread keeps a stack of the plug evaluations it currently has in
//! flight. Entering a frame checks the configured depth limit and refuses to
//! re-enter a plug+context pair that is already on this thread's stack:
//! waiting for our own in-flight result would never finish.
//!
//! Frames are popped by a guard, so the stack stays balanced even if a
//! compute function panics.

use std::cell::RefCell;

use crate::graph::PlugId;
use crate::hash::Hash;

thread_local! {
    static EVAL_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// An entry on the evaluation stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frame {
    plug: PlugId,
    context: Hash,
}

/// Why a frame could not be entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnterError {
    /// The plug is already being evaluated in this context on this thread.
    Reentrant,
    /// The stack is already `limit` frames deep.
    TooDeep { limit: usize },
}

/// Guard that pops the frame when dropped.
#[derive(Debug)]
pub(crate) struct EvalFrame {
    frame: Frame,
}

impl EvalFrame {
    /// Push a frame for `plug` evaluated under `context`.
    pub(crate) fn enter(plug: PlugId, context: Hash, limit: usize) -> Result<Self, EnterError> {
        let frame = Frame { plug, context };
        EVAL_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.len() >= limit {
                return Err(EnterError::TooDeep { limit });
            }
            if stack.contains(&frame) {
                return Err(EnterError::Reentrant);
            }
            stack.push(frame);
            Ok(Self { frame })
        })
    }

    /// Number of frames on this thread's stack.
    #[cfg(test)]
    pub(crate) fn depth() -> usize {
        EVAL_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for EvalFrame {
    fn drop(&mut self) {
        EVAL_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            debug_assert_eq!(
                popped,
                Some(self.frame),
                "evaluation stack mismatch: expected {:?}, got {:?}",
                self.frame,
                popped
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_popped_on_drop() {
        let plug = PlugId::new();
        assert_eq!(EvalFrame::depth(), 0);
        {
            let _frame = EvalFrame::enter(plug, Hash::of(b""), 8).unwrap();
            assert_eq!(EvalFrame::depth(), 1);
        }
        assert_eq!(EvalFrame::depth(), 0);
    }

    #[test]
    fn reentry_is_refused() {
        let plug = PlugId::new();
        let ctx = Hash::of(b"ctx");
        let _outer = EvalFrame::enter(plug, ctx, 8).unwrap();
        assert_eq!(EvalFrame::enter(plug, ctx, 8).unwrap_err(), EnterError::Reentrant);

        // The same plug in another context is a different evaluation.
        let _other = EvalFrame::enter(plug, Hash::of(b"other"), 8).unwrap();
        assert_eq!(EvalFrame::depth(), 2);
    }

    #[test]
    fn depth_limit() {
        let _a = EvalFrame::enter(PlugId::new(), Hash::of(b""), 2).unwrap();
        let _b = EvalFrame::enter(PlugId::new(), Hash::of(b""), 2).unwrap();
        assert_eq!(
            EvalFrame::enter(PlugId::new(), Hash::of(b""), 2).unwrap_err(),
            EnterError::TooDeep { limit: 2 }
        );
    }
}
