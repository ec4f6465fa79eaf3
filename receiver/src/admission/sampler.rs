//! Resident memory introspection.

use std::io;

use parking_lot::Mutex;
use sysinfo::{Pid, System};

/// Reports the resident memory of the current process.
pub trait MemorySampler: Send + Sync {
    fn resident_bytes(&self) -> io::Result<u64>;
}

impl<F> MemorySampler for F
where
    F: Fn() -> io::Result<u64> + Send + Sync,
{
    fn resident_bytes(&self) -> io::Result<u64> {
        self()
    }
}

/// Samples the current process through `sysinfo`.
pub struct ProcessMemorySampler {
    system: Mutex<System>,
    pid: Pid,
}

impl Default for ProcessMemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMemorySampler {
    pub fn new() -> Self {
        Self::for_pid(Pid::from(std::process::id() as usize))
    }

    /// Samples another process; mostly useful in tests.
    pub fn for_pid(pid: Pid) -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl MemorySampler for ProcessMemorySampler {
    fn resident_bytes(&self) -> io::Result<u64> {
        let mut system = self.system.lock();
        if !system.refresh_process(self.pid) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("process {} not found", self.pid),
            ));
        }
        system
            .process(self.pid)
            .map(|process| process.memory())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no memory stats for process {}", self.pid),
                )
            })
    }
}
