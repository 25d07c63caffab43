/// Ordered synchronous publish/subscribe.
///
/// A `Hub` holds named subscriber lists. Delivery order within a publish is:
/// wildcard (`"*"`) subscribers first, then subscribers of the literal
/// channel; each group runs by descending priority, ties broken by
/// subscription order. Dispatch is synchronous and unisolated: a panicking
/// subscriber unwinds through `publish`.
///
/// The subscriber list lives behind a `RefCell` and `publish` works from a
/// snapshot, so callbacks may subscribe and unsubscribe reentrantly.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Channel name that receives every publish.
pub const ANY: &str = "*";

/// Handle for removing a subscription.
pub type Token = u64;

struct Entry<T> {
    channel: String,
    priority: i32,
    order: u64,
    token: Token,
    once: bool,
    callback: Rc<dyn Fn(&T)>,
}

pub struct Hub<T> {
    entries: RefCell<Vec<Entry<T>>>,
    next_token: Cell<Token>,
    next_order: Cell<u64>,
}

impl<T> Default for Hub<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Hub<T> {
    pub fn new() -> Self {
        Hub {
            entries: RefCell::new(Vec::new()),
            next_token: Cell::new(1),
            next_order: Cell::new(0),
        }
    }

    /// Subscribe at priority 0.
    pub fn subscribe(&self, channel: &str, callback: impl Fn(&T) + 'static) -> Token {
        self.insert(channel, 0, false, Rc::new(callback))
    }

    /// Subscribe at an explicit priority. Higher priorities run first.
    pub fn subscribe_with(
        &self,
        channel: &str,
        priority: i32,
        callback: impl Fn(&T) + 'static,
    ) -> Token {
        self.insert(channel, priority, false, Rc::new(callback))
    }

    /// Subscribe for exactly one delivery.
    pub fn subscribe_once(&self, channel: &str, callback: impl Fn(&T) + 'static) -> Token {
        self.insert(channel, 0, true, Rc::new(callback))
    }

    fn insert(&self, channel: &str, priority: i32, once: bool, callback: Rc<dyn Fn(&T)>) -> Token {
        let token = self.next_token.get();
        self.next_token.set(token + 1);
        let order = self.next_order.get();
        self.next_order.set(order + 1);

        let entry = Entry {
            channel: channel.to_string(),
            priority,
            order,
            token,
            once,
            callback,
        };

        let mut entries = self.entries.borrow_mut();
        // Keep the list sorted: priority descending, subscription order ascending.
        let at = entries
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(entries.len());
        entries.insert(at, entry);
        token
    }

    /// Remove one subscription by token. Returns true if it existed.
    pub fn unsubscribe(&self, token: Token) -> bool {
        let mut entries = self.entries.borrow_mut();
        match entries.iter().position(|e| e.token == token) {
            Some(at) => {
                entries.remove(at);
                true
            }
            None => false,
        }
    }

    /// Remove every subscriber of a channel.
    pub fn clear(&self, channel: &str) {
        self.entries.borrow_mut().retain(|e| e.channel != channel);
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|e| e.channel == channel)
            .count()
    }

    /// Deliver `payload` to wildcard subscribers, then to subscribers of
    /// `channel`, in priority order.
    pub fn publish(&self, channel: &str, payload: &T) {
        let snapshot: Vec<(Token, bool, Rc<dyn Fn(&T)>)> = {
            let entries = self.entries.borrow();
            let mut picked: Vec<&Entry<T>> = entries.iter().filter(|e| e.channel == ANY).collect();
            if channel != ANY {
                picked.extend(entries.iter().filter(|e| e.channel == channel));
            }
            // The list is already ordered by priority then subscription
            // order, and filtering preserves it within each group.
            picked
                .iter()
                .map(|e| (e.token, e.once, Rc::clone(&e.callback)))
                .collect()
        };

        for (token, once, callback) in snapshot {
            if once {
                self.unsubscribe(token);
            }
            callback(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording_hub() -> (Rc<RefCell<Vec<String>>>, Hub<String>) {
        (Rc::new(RefCell::new(Vec::new())), Hub::new())
    }

    #[test]
    fn test_publish_in_subscription_order() {
        let (calls, hub) = recording_hub();
        for tag in ["a", "b", "c"] {
            let calls = calls.clone();
            let tag = tag.to_string();
            hub.subscribe("change", move |_| calls.borrow_mut().push(tag.clone()));
        }
        hub.publish("change", &"x".to_string());
        assert_eq!(*calls.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_priority_order() {
        let (calls, hub) = recording_hub();
        let c = calls.clone();
        hub.subscribe_with("change", -5, move |_| c.borrow_mut().push("low".into()));
        let c = calls.clone();
        hub.subscribe("change", move |_| c.borrow_mut().push("mid".into()));
        let c = calls.clone();
        hub.subscribe_with("change", 10, move |_| c.borrow_mut().push("high".into()));

        hub.publish("change", &String::new());
        assert_eq!(*calls.borrow(), vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_wildcard_runs_first() {
        let (calls, hub) = recording_hub();
        let c = calls.clone();
        hub.subscribe("change", move |_| c.borrow_mut().push("named".into()));
        let c = calls.clone();
        hub.subscribe(ANY, move |_| c.borrow_mut().push("any".into()));

        hub.publish("change", &String::new());
        assert_eq!(*calls.borrow(), vec!["any", "named"]);

        calls.borrow_mut().clear();
        hub.publish("other", &String::new());
        assert_eq!(*calls.borrow(), vec!["any"]);
    }

    #[test]
    fn test_unsubscribe_by_token() {
        let (calls, hub) = recording_hub();
        let c = calls.clone();
        let token = hub.subscribe("change", move |_| c.borrow_mut().push("gone".into()));
        assert!(hub.unsubscribe(token));
        assert!(!hub.unsubscribe(token));
        hub.publish("change", &String::new());
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn test_clear_channel() {
        let (calls, hub) = recording_hub();
        let c = calls.clone();
        hub.subscribe("change", move |_| c.borrow_mut().push("a".into()));
        let c = calls.clone();
        hub.subscribe("reset", move |_| c.borrow_mut().push("b".into()));

        hub.clear("change");
        assert_eq!(hub.subscriber_count("change"), 0);
        assert_eq!(hub.subscriber_count("reset"), 1);
    }

    #[test]
    fn test_subscribe_once() {
        let (calls, hub) = recording_hub();
        let c = calls.clone();
        hub.subscribe_once("change", move |p: &String| c.borrow_mut().push(p.clone()));

        hub.publish("change", &"first".to_string());
        hub.publish("change", &"second".to_string());
        assert_eq!(*calls.borrow(), vec!["first"]);
    }

    #[test]
    fn test_payload_passed_through() {
        let (calls, hub) = recording_hub();
        let c = calls.clone();
        hub.subscribe("change", move |p: &String| c.borrow_mut().push(p.clone()));
        hub.publish("change", &"payload".to_string());
        assert_eq!(*calls.borrow(), vec!["payload"]);
    }

    #[test]
    fn test_reentrant_subscribe_during_publish() {
        let hub = Rc::new(Hub::<String>::new());
        let calls = Rc::new(RefCell::new(Vec::new()));

        let h = hub.clone();
        let c = calls.clone();
        hub.subscribe("change", move |_| {
            let c2 = c.clone();
            h.subscribe("change", move |_| c2.borrow_mut().push("late".to_string()));
            c.borrow_mut().push("first".to_string());
        });

        // The late subscriber joins during this publish and fires on the next.
        hub.publish("change", &String::new());
        assert_eq!(*calls.borrow(), vec!["first"]);
        hub.publish("change", &String::new());
        assert_eq!(calls.borrow().len(), 3);
    }
}
