/// Caches the result of a probe and refreshes it only every `max_count`
/// calls, or when forced.
pub struct Poller<T> {
    probe: Box<dyn FnMut() -> T + Send>,
    value: T,
    count: u32,
    max_count: u32,
}

impl<T: Clone> Poller<T> {
    pub const DEFAULT_MAX_COUNT: u32 = 50;

    /// Runs the probe once immediately.
    pub fn new(probe: impl FnMut() -> T + Send + 'static) -> Self {
        Self::with_max_count(probe, Self::DEFAULT_MAX_COUNT)
    }

    pub fn with_max_count(probe: impl FnMut() -> T + Send + 'static, max_count: u32) -> Self {
        let mut probe: Box<dyn FnMut() -> T + Send> = Box::new(probe);
        let value = probe();
        Self {
            probe,
            value,
            count: 0,
            max_count,
        }
    }

    pub fn poll(&mut self, force: bool) -> T {
        if force || self.count >= self.max_count {
            self.value = (self.probe)();
            self.count = 0;
        } else {
            self.count += 1;
        }
        self.value.clone()
    }

    /// Last cached value, without counting a call.
    pub fn cached(&self) -> T {
        self.value.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn probe_runs_every_max_count_calls() {
        let probes = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&probes);
        let mut poller = Poller::with_max_count(
            move || counter.fetch_add(1, Ordering::SeqCst) + 1,
            3,
        );
        assert_eq!(probes.load(Ordering::SeqCst), 1);
        let seen: Vec<u32> = (0..8).map(|_| poller.poll(false)).collect();
        // Calls 1-3 are cached, call 4 refreshes, and so on.
        assert_eq!(seen, vec![1, 1, 1, 2, 2, 2, 2, 3]);
    }

    #[test]
    fn force_refreshes_immediately() {
        let probes = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&probes);
        let mut poller = Poller::new(move || counter.fetch_add(1, Ordering::SeqCst) + 1);
        assert_eq!(poller.poll(true), 2);
        assert_eq!(poller.cached(), 2);
    }
}
