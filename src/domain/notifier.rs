//! Single-threaded observer lists with disposer handles.
//!
//! [`Notifier`] replaces multicast callback fields: every
//! [`Notifier::subscribe`] returns a [`Disposer`] that removes the listener
//! when disposed or dropped, so teardown is symmetric with registration.
//!
//! Listeners may subscribe, dispose or notify other notifiers from inside a
//! notification. A listener disposed during a notification round is not
//! invoked for the rest of that round.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

type Listener<T> = Rc<RefCell<Box<dyn FnMut(&T)>>>;

struct Registry<T> {
    next_id: Cell<u64>,
    listeners: RefCell<Vec<(u64, Listener<T>)>>,
}

impl<T> Registry<T> {
    fn contains(&self, id: u64) -> bool {
        self.listeners.borrow().iter().any(|(lid, _)| *lid == id)
    }

    fn remove(&self, id: u64) {
        self.listeners.borrow_mut().retain(|(lid, _)| *lid != id);
    }

    fn snapshot(&self) -> Vec<(u64, Listener<T>)> {
        self.listeners
            .borrow()
            .iter()
            .map(|(id, listener)| (*id, Rc::clone(listener)))
            .collect()
    }
}

/// A list of listeners notified with `&T`.
pub struct Notifier<T: 'static> {
    registry: Rc<Registry<T>>,
}

impl<T: 'static> Notifier<T> {
    /// Creates an empty notifier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Rc::new(Registry {
                next_id: Cell::new(0),
                listeners: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Adds a listener. The listener stays registered until the returned
    /// [`Disposer`] is disposed or dropped.
    pub fn subscribe<F>(&self, listener: F) -> Disposer
    where
        F: FnMut(&T) + 'static,
    {
        let id = self.registry.next_id.get();
        self.registry.next_id.set(id.wrapping_add(1));
        let boxed: Box<dyn FnMut(&T)> = Box::new(listener);
        self.registry
            .listeners
            .borrow_mut()
            .push((id, Rc::new(RefCell::new(boxed))));

        let registry: Weak<Registry<T>> = Rc::downgrade(&self.registry);
        Disposer::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
        })
    }

    /// Invokes every listener with `value`, in subscription order.
    pub fn notify(&self, value: &T) {
        for (id, listener) in self.registry.snapshot() {
            if !self.registry.contains(id) {
                continue;
            }
            match listener.try_borrow_mut() {
                Ok(mut callback) => (*callback)(value),
                Err(_) => {
                    tracing::warn!(listener = id, "skipping re-entrant notification");
                }
            }
        }
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.registry.listeners.borrow().len()
    }
}

impl<T: 'static> Default for Notifier<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Clone for Notifier<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Rc::clone(&self.registry),
        }
    }
}

impl<T: 'static> fmt::Debug for Notifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Handle returned by [`Notifier::subscribe`].
///
/// Dropping the handle removes the listener. Use [`Disposer::detach`] to keep
/// the listener for the lifetime of the notifier.
#[must_use = "dropping a Disposer immediately removes the listener"]
pub struct Disposer {
    remove: Option<Box<dyn FnOnce()>>,
}

impl Disposer {
    fn new(remove: impl FnOnce() + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    /// Removes the listener now.
    pub fn dispose(mut self) {
        self.run();
    }

    /// Keeps the listener registered without holding the handle.
    pub fn detach(mut self) {
        self.remove = None;
    }

    fn run(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        self.run();
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("armed", &self.remove.is_some())
            .finish()
    }
}
