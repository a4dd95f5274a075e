//! Message context: the message being dispatched on the current thread.
//!
//! Every callback dispatch installs its message with [`MessageContext::install`];
//! the returned guard removes it when the dispatch ends, on every exit path.
//! Nested dispatch on one thread stacks, so the outer message is visible again
//! once the inner dispatch returns.

use crate::native::Message;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

thread_local! {
    static CURRENT: RefCell<Vec<Arc<Message>>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug)]
pub struct MessageContext;

impl MessageContext {
    /// Install `message` for the calling thread until the guard drops.
    pub fn install(message: Arc<Message>) -> MessageContextGuard {
        CURRENT.with(|stack| stack.borrow_mut().push(message));
        MessageContextGuard {
            _thread_bound: PhantomData,
        }
    }

    /// Message being dispatched on this thread.
    ///
    /// # Panics
    /// Outside of any dispatch. That is a programming error.
    #[allow(clippy::panic)]
    pub fn current() -> Arc<Message> {
        match Self::try_current() {
            Some(message) => message,
            None => panic!("MessageContext::current() called outside of a message dispatch"),
        }
    }

    pub fn try_current() -> Option<Arc<Message>> {
        CURRENT.with(|stack| stack.borrow().last().cloned())
    }

    pub fn is_active() -> bool {
        CURRENT.with(|stack| !stack.borrow().is_empty())
    }
}

/// Removes the installed message on drop.
#[derive(Debug)]
pub struct MessageContextGuard {
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for MessageContextGuard {
    fn drop(&mut self) {
        CURRENT.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
