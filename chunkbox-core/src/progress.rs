use crate::error::{Error, Result};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_secs(2);

#[derive(Default)]
struct Counters {
    stage: Mutex<String>,
    chunks_done: AtomicUsize,
    chunks_total: AtomicUsize,
    bytes_done: AtomicUsize,
    bytes_total: AtomicUsize,
    running: AtomicBool,
    // Bumped by every start and stop; a ticker lives only for its own run.
    generation: AtomicU64,
    cancelled: AtomicBool,
}

/// Point-in-time copy of the counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub stage: String,
    pub chunks_done: usize,
    pub chunks_total: usize,
    pub bytes_done: usize,
    pub bytes_total: usize,
}

impl Snapshot {
    pub fn percent(&self) -> u32 {
        if self.bytes_total == 0 {
            return 0;
        }
        (self.bytes_done as f64 / self.bytes_total as f64 * 100.0) as u32
    }
}

/// Shared counters for a long split/verify plus a cooperative cancel flag.
/// Clones observe the same state, so a clone can cancel from another thread.
/// A cancel holds until the run it interrupted (or the next one) stops.
#[derive(Clone, Default)]
pub struct Progress {
    report: bool,
    inner: Arc<Counters>,
}

impl Progress {
    /// `report` turns on the periodic stderr line; counting and cancel always work.
    pub fn new(report: bool) -> Self {
        Self { report, inner: Arc::default() }
    }

    pub fn set_stage(&self, s: &str) {
        if let Ok(mut stage) = self.inner.stage.lock() {
            *stage = s.to_string();
        }
    }
    pub fn set_blocks_total(&self, n: usize) {
        self.inner.chunks_total.store(n, Ordering::Relaxed);
        self.inner.chunks_done.store(0, Ordering::Relaxed);
    }
    pub fn inc_block(&self) {
        self.inner.chunks_done.fetch_add(1, Ordering::Relaxed);
    }
    pub fn reset_bytes(&self, total: usize) {
        self.inner.bytes_total.store(total, Ordering::Relaxed);
        self.inner.bytes_done.store(0, Ordering::Relaxed);
    }
    pub fn add_bytes(&self, n: usize) {
        self.inner.bytes_done.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Snapshot {
        let c = &self.inner;
        Snapshot {
            stage: c.stage.lock().map(|s| s.clone()).unwrap_or_default(),
            chunks_done: c.chunks_done.load(Ordering::Relaxed),
            chunks_total: c.chunks_total.load(Ordering::Relaxed),
            bytes_done: c.bytes_done.load(Ordering::Relaxed),
            bytes_total: c.bytes_total.load(Ordering::Relaxed),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Relaxed);
    }
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Relaxed)
    }
    /// Checked between chunks by split, verify and reassemble.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    pub fn start(&self) {
        self.inner.running.store(true, Ordering::SeqCst);
        let run = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.report {
            return;
        }
        let me = self.clone();
        thread::spawn(move || {
            let t0 = Instant::now();
            loop {
                thread::sleep(TICK);
                if me.inner.generation.load(Ordering::SeqCst) != run {
                    break;
                }
                let s = me.snapshot();
                eprintln!(
                    "[{:>4}s] {} | chunks {}/{} | bytes {}%",
                    t0.elapsed().as_secs(),
                    s.stage,
                    s.chunks_done,
                    s.chunks_total,
                    s.percent()
                );
            }
        });
    }
    /// End the current run: retire its ticker and clear any cancel request.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.cancelled.store(false, Ordering::Relaxed);
    }

    /// True while a run started by [`Progress::start`] has not stopped.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters_and_cancel() {
        let p = Progress::default();
        let other = p.clone();
        p.set_stage("Splitting");
        p.set_blocks_total(4);
        p.reset_bytes(200);
        other.inc_block();
        other.add_bytes(50);
        let s = p.snapshot();
        assert_eq!((s.stage.as_str(), s.chunks_done, s.chunks_total), ("Splitting", 1, 4));
        assert_eq!(s.percent(), 25);
        assert!(p.check().is_ok());
        other.cancel();
        assert!(matches!(p.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn stop_clears_cancel_and_retires_the_run() {
        let p = Progress::default();
        p.start();
        assert!(p.is_running());
        p.cancel();
        assert!(p.check().is_err());
        p.stop();
        assert!(!p.is_running());
        assert!(p.check().is_ok());
        p.start();
        p.start();
        assert!(p.is_running());
        p.stop();
        assert!(!p.is_running());
    }
}
