use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Resident memory of the current process.
pub struct MemoryMonitor {
    system: System,
    pid: Pid,
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
        }
    }

    pub fn resident_bytes(&mut self) -> u64 {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );

        self.system
            .process(self.pid)
            .map(|process| process.memory())
            .unwrap_or(0)
    }

    pub fn resident_mb(&mut self) -> f64 {
        self.resident_bytes() as f64 / 1024.0 / 1024.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sees_this_process() {
        let mut monitor = MemoryMonitor::new();
        assert!(monitor.resident_bytes() > 0);
    }
}
