//! The contract mining clients must satisfy to receive job-change
//! notifications, and a registry that fans events out to all of them.
//!
//! A compile-time trait instead of duck-typed dispatch: a stratum session
//! either implements `EventSink` or it isn't registered at all, so there's
//! no silent-miss path.

use std::sync::{Arc, RwLock};

use log::warn;

/// An opaque handle on a mining client. The job manager only ever calls
/// these two methods; it never reaches into the client's own state.
///
/// Neither method returns `Result` — a sink that can fail to deliver
/// (e.g. a closed socket) must swallow and log its own error, so one
/// failing client can never abort the fan-out to the rest.
pub trait EventSink: Send + Sync {
    /// New work is available; clients may keep mining their current job
    /// until they're ready to switch.
    fn signal_new_work(&self);

    /// All outstanding work is invalid; clients must discard it and switch
    /// to the latest job immediately.
    fn signal_new_block(&self);
}

/// Holds every currently-registered `EventSink` and fans events out to all
/// of them. A `RwLock<Vec<_>>` is enough: registration is rare, dispatch is
/// frequent and needs only read access.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        SinkRegistry::default()
    }

    pub fn register(&self, sink: Arc<dyn EventSink>) {
        self.sinks
            .write()
            .expect("sink registry lock poisoned")
            .push(sink);
    }

    /// Drops every registered sink, e.g. when a session disconnects.
    /// Retains only sinks for which `keep` returns `true`.
    pub fn retain(&self, mut keep: impl FnMut(&Arc<dyn EventSink>) -> bool) {
        self.sinks
            .write()
            .expect("sink registry lock poisoned")
            .retain(|sink| keep(sink));
    }

    pub fn len(&self) -> usize {
        self.sinks.read().expect("sink registry lock poisoned").len()
    }

    pub fn fan_out_new_work(&self) {
        for sink in self.snapshot() {
            sink.signal_new_work();
        }
    }

    pub fn fan_out_new_block(&self) {
        for sink in self.snapshot() {
            sink.signal_new_block();
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn EventSink>> {
        self.sinks.read().expect("sink registry lock poisoned").clone()
    }
}

/// A sink whose own delivery can panic, wrapped so one broken client
/// cannot take down the fan-out loop. `EventSink`'s own trait contract
/// already prevents `Result` propagation; this exists for sinks whose
/// inner implementation is out of this crate's control (e.g. an FFI
/// boundary) and might unwind.
pub struct CatchUnwindSink<S> {
    inner: S,
    label: String,
}

impl<S: EventSink> CatchUnwindSink<S> {
    pub fn new(inner: S, label: impl Into<String>) -> Self {
        CatchUnwindSink {
            inner,
            label: label.into(),
        }
    }
}

impl<S> EventSink for CatchUnwindSink<S>
where
    S: EventSink + std::panic::RefUnwindSafe,
{
    fn signal_new_work(&self) {
        if std::panic::catch_unwind(|| self.inner.signal_new_work()).is_err() {
            warn!("sink {} panicked delivering new-work signal", self.label);
        }
    }

    fn signal_new_block(&self) {
        if std::panic::catch_unwind(|| self.inner.signal_new_block()).is_err() {
            warn!("sink {} panicked delivering new-block signal", self.label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        work_calls: AtomicUsize,
        block_calls: AtomicUsize,
    }

    impl EventSink for CountingSink {
        fn signal_new_work(&self) {
            self.work_calls.fetch_add(1, Ordering::SeqCst);
        }
        fn signal_new_block(&self) {
            self.block_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn fan_out_reaches_every_registered_sink() {
        let registry = SinkRegistry::new();
        let a = Arc::new(CountingSink {
            work_calls: AtomicUsize::new(0),
            block_calls: AtomicUsize::new(0),
        });
        let b = Arc::new(CountingSink {
            work_calls: AtomicUsize::new(0),
            block_calls: AtomicUsize::new(0),
        });
        registry.register(a.clone());
        registry.register(b.clone());

        registry.fan_out_new_work();
        registry.fan_out_new_block();

        assert_eq!(a.work_calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.block_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.work_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.block_calls.load(Ordering::SeqCst), 1);

        assert_eq!(registry.len(), 2);
    }

    struct PanickingSink;
    impl EventSink for PanickingSink {
        fn signal_new_work(&self) {
            panic!("boom");
        }
        fn signal_new_block(&self) {}
    }

    #[test]
    fn a_panicking_sink_does_not_stop_fan_out_to_others() {
        let registry = SinkRegistry::new();
        registry.register(Arc::new(CatchUnwindSink::new(PanickingSink, "flaky")));
        let ok = Arc::new(CountingSink {
            work_calls: AtomicUsize::new(0),
            block_calls: AtomicUsize::new(0),
        });
        registry.register(ok.clone());

        registry.fan_out_new_work();

        assert_eq!(ok.work_calls.load(Ordering::SeqCst), 1);
    }
}
