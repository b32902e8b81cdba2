//! Subscription listeners.

use std::cell::RefCell;
use std::fmt;

use crate::value::Value;

type UpdateFn = Box<dyn FnMut(&Value)>;
type ErrorFn = Box<dyn FnMut(&serde_json::Value)>;

/// Identifies one registered listener for the lifetime of a session.
pub(crate) type ListenerId = u64;

/// Callbacks for one subscription: every new value, and optionally the
/// server error that ends the subscription.
///
/// ```
/// use topical::{Listener, Value};
///
/// let listener = Listener::new(|value: &Value| println!("{value}"))
///     .on_error(|error| eprintln!("subscription failed: {error}"));
/// # drop(listener);
/// ```
pub struct Listener {
    on_update: UpdateFn,
    on_error: Option<ErrorFn>,
}

impl Listener {
    /// Listener called with every value the topic takes.
    pub fn new(on_update: impl FnMut(&Value) + 'static) -> Self {
        Self {
            on_update: Box::new(on_update),
            on_error: None,
        }
    }

    /// Also call `on_error` if the server fails the subscription.
    #[must_use]
    pub fn on_error(mut self, on_error: impl FnMut(&serde_json::Value) + 'static) -> Self {
        self.on_error = Some(Box::new(on_error));
        self
    }

    pub(crate) fn into_entry(self, id: ListenerId) -> ListenerEntry {
        ListenerEntry {
            id,
            on_update: RefCell::new(self.on_update),
            on_error: self.on_error.map(RefCell::new),
        }
    }
}

impl<F> From<F> for Listener
where
    F: FnMut(&Value) + 'static,
{
    fn from(on_update: F) -> Self {
        Self::new(on_update)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

/// A registered listener, shared between the registry and delivery snapshots.
pub(crate) struct ListenerEntry {
    id: ListenerId,
    on_update: RefCell<UpdateFn>,
    on_error: Option<RefCell<ErrorFn>>,
}

impl ListenerEntry {
    pub(crate) fn id(&self) -> ListenerId {
        self.id
    }

    pub(crate) fn deliver(&self, value: &Value) {
        match self.on_update.try_borrow_mut() {
            Ok(mut on_update) => (*on_update)(value),
            Err(_) => log::warn!("[Session] Listener {} re-entered, dropping update", self.id),
        }
    }

    pub(crate) fn deliver_error(&self, error: &serde_json::Value) {
        let Some(on_error) = &self.on_error else {
            return;
        };
        match on_error.try_borrow_mut() {
            Ok(mut on_error) => (*on_error)(error),
            Err(_) => log::warn!("[Session] Listener {} re-entered, dropping error", self.id),
        }
    }
}

impl fmt::Debug for ListenerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerEntry")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::rc::Rc;

    #[test]
    fn test_deliver_calls_update_callback() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let entry = Listener::new(move |v: &Value| sink.borrow_mut().push(v.clone())).into_entry(4);

        entry.deliver(&Value::from(json!(1)));
        entry.deliver(&Value::from(json!("two")));

        assert_eq!(entry.id(), 4);
        assert_eq!(*seen.borrow(), vec![Value::from(json!(1)), Value::from(json!("two"))]);
    }

    #[test]
    fn test_error_without_callback_is_ignored() {
        let entry = Listener::new(|_: &Value| {}).into_entry(1);
        entry.deliver_error(&json!("boom"));
    }

    #[test]
    fn test_error_callback() {
        let seen = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);
        let entry = Listener::new(|_: &Value| {})
            .on_error(move |e| *sink.borrow_mut() = Some(e.clone()))
            .into_entry(1);
        entry.deliver_error(&json!({"reason": "forbidden"}));
        assert_eq!(*seen.borrow(), Some(json!({"reason": "forbidden"})));
    }
}
