//! Memory admission control.
//!
//! A single background task samples resident memory on a fixed interval and
//! flips a shared [`MemoryGate`]. Request handlers read the gate with one
//! relaxed atomic load; a reading that is stale by up to one interval is
//! accepted in exchange for keeping locks off the hot path.

mod sampler;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub use sampler::{MemorySampler, ProcessMemorySampler};

/// Default memory ceiling (32 GiB).
pub const DEFAULT_MAX_MEMORY: u64 = 32 * 1024 * 1024 * 1024;

/// Default minimum headroom below the ceiling (512 MiB).
pub const DEFAULT_MIN_HEADROOM: u64 = 512 * 1024 * 1024;

/// Default sampling interval.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Memory ceiling and the headroom that must remain below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLimits {
    /// Highest resident memory the process should reach.
    pub max: u64,
    /// Headroom below `max` under which writes are refused.
    pub min: u64,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            max: DEFAULT_MAX_MEMORY,
            min: DEFAULT_MIN_HEADROOM,
        }
    }
}

impl MemoryLimits {
    /// Headroom left when `used` bytes are resident. Zero once over the ceiling.
    pub fn headroom(&self, used: u64) -> u64 {
        self.max.saturating_sub(used)
    }

    /// Whether `used` bytes leave enough headroom to keep accepting writes.
    pub fn accepts(&self, used: u64) -> bool {
        self.headroom(used) >= self.min
    }
}

/// Shared accept/reject signal.
///
/// Cloning is cheap and every clone observes the same state. Starts out
/// accepting.
#[derive(Clone, Default)]
pub struct MemoryGate {
    inner: Arc<GateState>,
}

struct GateState {
    accepting: AtomicBool,
    resident_bytes: AtomicU64,
}

impl Default for GateState {
    fn default() -> Self {
        Self {
            accepting: AtomicBool::new(true),
            resident_bytes: AtomicU64::new(0),
        }
    }
}

impl MemoryGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether new writes should be admitted.
    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Relaxed)
    }

    /// Resident memory seen by the last successful sample, zero before the first.
    pub fn resident_bytes(&self) -> u64 {
        self.inner.resident_bytes.load(Ordering::Relaxed)
    }

    /// Stores a new sample and returns the previous accepting state.
    fn record(&self, resident_bytes: u64, accepting: bool) -> bool {
        self.inner
            .resident_bytes
            .store(resident_bytes, Ordering::Relaxed);
        self.inner.accepting.swap(accepting, Ordering::Relaxed)
    }
}

/// Background sampler driving a [`MemoryGate`].
///
/// The gate is only ever written from here. A failed sample leaves it as it
/// was and the next attempt happens one interval later.
pub struct MemoryMonitor<S> {
    gate: MemoryGate,
    limits: MemoryLimits,
    sampler: S,
    interval: Duration,
}

impl<S: MemorySampler + 'static> MemoryMonitor<S> {
    pub fn new(gate: MemoryGate, limits: MemoryLimits, sampler: S, interval: Duration) -> Self {
        Self {
            gate,
            limits,
            sampler,
            interval,
        }
    }

    /// Takes one sample and updates the gate.
    ///
    /// Returns the new accepting state, or `None` if sampling failed.
    pub fn sample_once(&self) -> Option<bool> {
        let used = match self.sampler.resident_bytes() {
            Ok(used) => used,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    accepting = self.gate.is_accepting(),
                    "failed to sample resident memory, keeping gate state"
                );
                return None;
            }
        };

        let accepting = self.limits.accepts(used);
        let was_accepting = self.gate.record(used, accepting);
        if was_accepting && !accepting {
            tracing::warn!(
                resident_bytes = used,
                max = self.limits.max,
                min_headroom = self.limits.min,
                "memory headroom below floor, rejecting writes"
            );
        } else if !was_accepting && accepting {
            tracing::info!(
                resident_bytes = used,
                headroom = self.limits.headroom(used),
                "memory headroom recovered, accepting writes"
            );
        }
        Some(accepting)
    }

    /// Samples forever, once immediately and then every interval.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sample_once();
        }
    }

    /// Runs the monitor on the current tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tracing::info!(
            max = self.limits.max,
            min_headroom = self.limits.min,
            interval = ?self.interval,
            "starting memory monitor"
        );
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::AtomicU64;

    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn limits() -> MemoryLimits {
        MemoryLimits {
            max: 1024 * MIB,
            min: 128 * MIB,
        }
    }

    /// Sampler returning whatever the test last stored; `u64::MAX` means failure.
    fn scripted(value: Arc<AtomicU64>) -> impl MemorySampler {
        move || match value.load(Ordering::SeqCst) {
            u64::MAX => Err(io::Error::other("memory stats unavailable")),
            used => Ok(used),
        }
    }

    #[test]
    fn should_default_to_32g_ceiling_and_512m_floor() {
        // given/when
        let limits = MemoryLimits::default();

        // then
        assert_eq!(limits.max, 34_359_738_368);
        assert_eq!(limits.min, 536_870_912);
    }

    #[test]
    fn should_compute_headroom_saturating_at_zero() {
        // given
        let limits = limits();

        // when/then
        assert_eq!(limits.headroom(1000 * MIB), 24 * MIB);
        assert_eq!(limits.headroom(2048 * MIB), 0);
        assert!(limits.accepts(896 * MIB));
        assert!(!limits.accepts(897 * MIB));
    }

    #[test]
    fn should_start_accepting() {
        // given/when
        let gate = MemoryGate::new();

        // then
        assert!(gate.is_accepting());
        assert_eq!(gate.resident_bytes(), 0);
    }

    #[test]
    fn should_reject_when_headroom_below_floor_and_recover() {
        // given
        let used = Arc::new(AtomicU64::new(100 * MIB));
        let gate = MemoryGate::new();
        let monitor = MemoryMonitor::new(
            gate.clone(),
            limits(),
            scripted(used.clone()),
            DEFAULT_CHECK_INTERVAL,
        );

        // when/then
        assert_eq!(monitor.sample_once(), Some(true));
        assert!(gate.is_accepting());

        used.store(1000 * MIB, Ordering::SeqCst);
        assert_eq!(monitor.sample_once(), Some(false));
        assert!(!gate.is_accepting());
        assert_eq!(gate.resident_bytes(), 1000 * MIB);

        used.store(500 * MIB, Ordering::SeqCst);
        assert_eq!(monitor.sample_once(), Some(true));
        assert!(gate.is_accepting());
    }

    #[test]
    fn should_hold_last_state_when_sampling_fails() {
        // given
        let used = Arc::new(AtomicU64::new(1000 * MIB));
        let gate = MemoryGate::new();
        let monitor = MemoryMonitor::new(
            gate.clone(),
            limits(),
            scripted(used.clone()),
            DEFAULT_CHECK_INTERVAL,
        );
        monitor.sample_once();

        // when
        used.store(u64::MAX, Ordering::SeqCst);
        let result = monitor.sample_once();

        // then
        assert_eq!(result, None);
        assert!(!gate.is_accepting());
        assert_eq!(gate.resident_bytes(), 1000 * MIB);
    }

    #[tokio::test(start_paused = true)]
    async fn should_sample_on_every_interval() {
        // given
        let used = Arc::new(AtomicU64::new(1000 * MIB));
        let gate = MemoryGate::new();
        let handle = MemoryMonitor::new(
            gate.clone(),
            limits(),
            scripted(used.clone()),
            Duration::from_secs(10),
        )
        .spawn();

        // when
        tokio::time::sleep(Duration::from_millis(1)).await;
        let rejecting_after_first_tick = !gate.is_accepting();
        used.store(100 * MIB, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;

        // then
        assert!(rejecting_after_first_tick);
        assert!(gate.is_accepting());
        handle.abort();
    }
}
