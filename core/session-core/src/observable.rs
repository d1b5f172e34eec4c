//! Minimal typed publish/subscribe channel.
//!
//! Handlers run synchronously, in subscription order, on the thread that
//! calls `notify`. There is no replay: a handler only sees events published
//! after it subscribed.

/// Token returned by [`Observable::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

type Handler<T> = Box<dyn FnMut(&T) + Send>;

pub struct Observable<T = ()> {
    handlers: Vec<(Subscription, Handler<T>)>,
    next_id: u64,
}

impl<T> Default for Observable<T> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
            next_id: 0,
        }
    }
}

impl<T> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("subscribers", &self.handlers.len())
            .finish()
    }
}

impl<T> Observable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, handler: impl FnMut(&T) + Send + 'static) -> Subscription {
        self.next_id += 1;
        let subscription = Subscription(self.next_id);
        self.handlers.push((subscription, Box::new(handler)));
        subscription
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(s, _)| *s != subscription);
        self.handlers.len() != before
    }

    pub fn notify(&mut self, value: &T) {
        for (_, handler) in &mut self.handlers {
            handler(value);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}
