use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::{Duration, Instant};

/// Explicit progress channels for one check session. Two independent signals:
/// scan progress in manifest lines, download progress in cumulative bytes.
/// Implementations must be cheap; they are called once per manifest line and
/// once per transferred chunk.
pub trait ProgressSink {
    fn stage(&mut self, _name: &str) {}
    fn scan(&mut self, _lines_done: u64, _lines_total: u64) {}
    fn download(&mut self, _bytes_done: u64, _bytes_total: u64) {}
}

/// Sink for callers that don't care.
pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// Shared-counter sink with a periodic console reporter, for CLI use. The
/// engine thread stores into the atomics; the reporter thread prints every
/// two seconds until stopped.
#[derive(Clone)]
pub struct Progress {
    enabled: bool,
    stage: Arc<Mutex<String>>,
    lines_done: Arc<AtomicU64>,
    lines_total: Arc<AtomicU64>,
    bytes_done: Arc<AtomicU64>,
    bytes_total: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            stage: Arc::new(Mutex::new(String::new())),
            lines_done: Arc::new(AtomicU64::new(0)),
            lines_total: Arc::new(AtomicU64::new(0)),
            bytes_done: Arc::new(AtomicU64::new(0)),
            bytes_total: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn start(&self) {
        if !self.enabled {
            return;
        }
        self.running.store(true, Ordering::Relaxed);
        let stage = self.stage.clone();
        let lines_done = self.lines_done.clone();
        let lines_total = self.lines_total.clone();
        let bytes_done = self.bytes_done.clone();
        let bytes_total = self.bytes_total.clone();
        let running = self.running.clone();
        thread::spawn(move || {
            let t0 = Instant::now();
            while running.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_secs(2));
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                let s = stage.lock().unwrap().clone();
                let ld = lines_done.load(Ordering::Relaxed);
                let lt = lines_total.load(Ordering::Relaxed);
                let bd = bytes_done.load(Ordering::Relaxed);
                let bt = bytes_total.load(Ordering::Relaxed);
                let bpct = if bt > 0 { (bd as f64 / bt as f64) * 100.0 } else { 0.0 };
                eprintln!(
                    "[{:>4}s] {} | files {}/{} | bytes {}%",
                    t0.elapsed().as_secs(),
                    s,
                    ld,
                    lt,
                    bpct as i32
                );
            }
        });
    }

    pub fn stop(&self) {
        if self.enabled {
            self.running.store(false, Ordering::Relaxed);
        }
    }
}

impl ProgressSink for Progress {
    fn stage(&mut self, name: &str) {
        *self.stage.lock().unwrap() = name.to_string();
    }

    fn scan(&mut self, lines_done: u64, lines_total: u64) {
        self.lines_done.store(lines_done, Ordering::Relaxed);
        self.lines_total.store(lines_total, Ordering::Relaxed);
    }

    fn download(&mut self, bytes_done: u64, bytes_total: u64) {
        self.bytes_done.store(bytes_done, Ordering::Relaxed);
        self.bytes_total.store(bytes_total, Ordering::Relaxed);
    }
}
