use crate::error::Result;
use crate::progress::ProgressSink;
use crate::reconcile::{run_check, CheckConfig, CheckReport};
use crate::store::ObjectStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Handle to a check running on its dedicated worker thread.
pub struct CheckHandle {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<Result<CheckReport>>,
}

impl CheckHandle {
    /// Request cooperative cancellation; takes effect at the next manifest
    /// line or fetch boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block for the outcome. The progress sink has already seen everything
    /// by the time this returns.
    pub fn join(self) -> Result<CheckReport> {
        self.handle.join().expect("check worker panicked")
    }
}

/// Run the whole check (scan then drain, strictly sequential) on one
/// dedicated thread so the caller stays unblocked and observes progress
/// through the sink alone.
pub fn spawn_check<S, P>(cfg: CheckConfig, store: S, mut sink: P) -> CheckHandle
where
    S: ObjectStore + Send + 'static,
    P: ProgressSink + Send + 'static,
{
    let cancel = cfg.cancel.clone();
    let handle = std::thread::spawn(move || run_check(&cfg, &store, &mut sink));
    CheckHandle { cancel, handle }
}
