//! Progress reporting and cancellation hooks for long running operations.
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Programming,
    Verifying,
    Reading,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Programming => "Programming",
            Phase::Verifying => "Verifying",
            Phase::Reading => "Reading",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How a progress bar for the phase is drawn; writes are hatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarStyle {
    Solid,
    Hatched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    /// 0..=100
    pub percent: u8,
    pub phase: Phase,
    pub style: BarStyle,
}

impl ProgressEvent {
    pub fn new(phase: Phase, done: usize, total: usize) -> Self {
        let percent = if total == 0 {
            100
        } else {
            (done.min(total) * 100 / total) as u8
        };
        let style = match phase {
            Phase::Programming => BarStyle::Hatched,
            Phase::Verifying | Phase::Reading => BarStyle::Solid,
        };
        ProgressEvent {
            percent,
            phase,
            style,
        }
    }
}

/// Receives progress notifications; polled for cancellation between pages.
pub trait Observer {
    fn progress(&mut self, event: ProgressEvent);

    fn is_cancelled(&self) -> bool {
        false
    }
}

impl<F: FnMut(ProgressEvent)> Observer for F {
    fn progress(&mut self, event: ProgressEvent) {
        self(event)
    }
}

/// Discards all notifications.
pub struct Silent;

impl Observer for Silent {
    fn progress(&mut self, _event: ProgressEvent) {}
}

/// Shared flag another thread can raise to stop an operation at the next page.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An observer that also honours a [`CancelToken`].
pub struct Cancellable<O> {
    inner: O,
    token: CancelToken,
}

impl<O: Observer> Cancellable<O> {
    pub fn new(inner: O, token: CancelToken) -> Self {
        Cancellable { inner, token }
    }
}

impl<O: Observer> Observer for Cancellable<O> {
    fn progress(&mut self, event: ProgressEvent) {
        self.inner.progress(event)
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.inner.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_and_style() {
        let e = ProgressEvent::new(Phase::Programming, 1, 3);
        assert_eq!(e.percent, 33);
        assert_eq!(e.style, BarStyle::Hatched);
        assert_eq!(ProgressEvent::new(Phase::Reading, 0, 0).percent, 100);
        assert_eq!(ProgressEvent::new(Phase::Verifying, 5, 4).percent, 100);
    }

    #[test]
    fn closures_observe_and_token_cancels() {
        let mut seen = Vec::new();
        let token = CancelToken::new();
        {
            let mut observer = Cancellable::new(|e: ProgressEvent| seen.push(e.percent), token.clone());
            observer.progress(ProgressEvent::new(Phase::Reading, 1, 2));
            assert!(!observer.is_cancelled());
            token.cancel();
            assert!(observer.is_cancelled());
        }
        assert_eq!(seen, vec![50]);
    }
}
