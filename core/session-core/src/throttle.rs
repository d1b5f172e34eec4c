//! Poll-driven throttle gate.
//!
//! The gate doesn't own the operation it throttles; callers ask it whether
//! to run now ([`Throttle::invoke`]) and, on every poll, whether a deferred
//! trailing call is due ([`Throttle::take_due`]). That keeps the operation a
//! plain `&mut self` method on its owner.
//!
//! With both edges enabled, a burst of calls inside one window runs once at
//! the start of the window and once more when it closes.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleEdges {
    pub leading: bool,
    pub trailing: bool,
}

impl Default for ThrottleEdges {
    fn default() -> Self {
        Self {
            leading: true,
            trailing: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Throttle {
    wait_ms: i64,
    edges: ThrottleEdges,
    window_end: Option<i64>,
    pending: bool,
}

impl Throttle {
    pub fn new(wait_ms: i64, edges: ThrottleEdges) -> Self {
        Self {
            wait_ms,
            edges,
            window_end: None,
            pending: false,
        }
    }

    /// Registers a call. Returns true if the operation should run right now.
    pub fn invoke(&mut self, now_ms: i64) -> bool {
        if self.window_end.is_some_and(|end| now_ms < end) {
            self.pending = true;
            return false;
        }

        // A window that closed without being polled: this call supersedes
        // whatever was pending in it.
        self.window_end = Some(now_ms + self.wait_ms);
        if self.edges.leading {
            self.pending = false;
            true
        } else {
            self.pending = true;
            false
        }
    }

    /// Returns true if a trailing call is due. Running it opens a new window.
    pub fn take_due(&mut self, now_ms: i64) -> bool {
        let Some(end) = self.window_end else {
            return false;
        };
        if now_ms < end {
            return false;
        }

        if self.pending && self.edges.trailing {
            self.pending = false;
            self.window_end = Some(now_ms + self.wait_ms);
            true
        } else {
            self.pending = false;
            self.window_end = None;
            false
        }
    }

    /// When `take_due` would next have something to do.
    pub fn deadline(&self) -> Option<i64> {
        self.window_end
    }

    pub fn cancel(&mut self) {
        self.window_end = None;
        self.pending = false;
    }
}
