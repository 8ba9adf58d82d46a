//! ---
//! rio_section: "03-platform-capability"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Platform and measurable capability model."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
//! Default resource monitors. Linux values come from `/proc`; on other
//! platforms (or in stripped-down containers) the monitors degrade to a
//! zero reading rather than failing the measurement loop.

use std::fs;
use std::path::PathBuf;

use tracing::debug;
use walkdir::WalkDir;

use crate::measurable::ResourceMonitor;
use crate::Result;

/// CPU load monitor: 1-minute load average normalized by the number of
/// available cores.
#[derive(Debug, Default)]
pub struct CpuLoadMonitor;

impl ResourceMonitor for CpuLoadMonitor {
    fn measure(&self) -> Result<f64> {
        let Some(raw) = read_proc("/proc/loadavg") else {
            return Ok(0.0);
        };
        let load = raw
            .split_whitespace()
            .next()
            .and_then(|field| field.parse::<f64>().ok())
            .unwrap_or(0.0);
        let cores = std::thread::available_parallelism()
            .map(|n| n.get() as f64)
            .unwrap_or(1.0);
        Ok((load / cores).max(0.0))
    }
}

/// Memory monitor: used fraction derived from `MemTotal` and
/// `MemAvailable` in `/proc/meminfo`.
#[derive(Debug, Default)]
pub struct MemoryMonitor;

impl ResourceMonitor for MemoryMonitor {
    fn measure(&self) -> Result<f64> {
        let Some((total_kb, available_kb)) = memory_info() else {
            return Ok(0.0);
        };
        if total_kb == 0 {
            return Ok(0.0);
        }
        Ok(1.0 - (available_kb as f64 / total_kb as f64))
    }
}

/// Total and available physical memory in kilobytes, when known.
pub fn memory_info() -> Option<(u64, u64)> {
    let raw = read_proc("/proc/meminfo")?;
    let mut total = None;
    let mut available = None;
    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = parse_kb(rest);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available = parse_kb(rest);
        }
        if total.is_some() && available.is_some() {
            break;
        }
    }
    Some((total?, available?))
}

fn parse_kb(rest: &str) -> Option<u64> {
    rest.split_whitespace().next()?.parse().ok()
}

fn read_proc(path: &str) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(raw) => Some(raw),
        Err(err) => {
            debug!(path, error = %err, "proc read unavailable; monitor degrades to zero");
            None
        }
    }
}

/// Disk monitor: accounts the provision-root subtree against a configured
/// capacity. This measures the staging area the provisioner actually
/// manages, without privileged filesystem syscalls.
#[derive(Debug)]
pub struct DiskMonitor {
    root: PathBuf,
    capacity_bytes: u64,
}

impl DiskMonitor {
    /// Monitor the subtree under `root` against `capacity_bytes`.
    pub fn new(root: impl Into<PathBuf>, capacity_bytes: u64) -> Self {
        Self {
            root: root.into(),
            capacity_bytes,
        }
    }

    /// Bytes currently used under the monitored root.
    pub fn used_bytes(&self) -> u64 {
        if !self.root.exists() {
            return 0;
        }
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.metadata().ok())
            .map(|metadata| metadata.len())
            .sum()
    }
}

impl ResourceMonitor for DiskMonitor {
    fn measure(&self) -> Result<f64> {
        if self.capacity_bytes == 0 {
            return Ok(0.0);
        }
        Ok((self.used_bytes() as f64 / self.capacity_bytes as f64).min(1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_monitor_yields_finite_value() {
        let value = CpuLoadMonitor.measure().unwrap();
        assert!(value.is_finite());
        assert!(value >= 0.0);
    }

    #[test]
    fn memory_monitor_yields_fraction() {
        let value = MemoryMonitor.measure().unwrap();
        assert!((0.0..=1.0).contains(&value));
    }

    #[test]
    fn disk_monitor_accounts_subtree() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("svc")).unwrap();
        fs::write(dir.path().join("svc/a.jar"), vec![0u8; 512]).unwrap();
        fs::write(dir.path().join("b.jar"), vec![0u8; 512]).unwrap();

        let monitor = DiskMonitor::new(dir.path(), 2048);
        assert_eq!(monitor.used_bytes(), 1024);
        assert_eq!(monitor.measure().unwrap(), 0.5);
    }

    #[test]
    fn disk_monitor_missing_root_reads_zero() {
        let monitor = DiskMonitor::new("does/not/exist", 2048);
        assert_eq!(monitor.measure().unwrap(), 0.0);
    }

    #[test]
    fn disk_monitor_saturates_at_one() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.jar"), vec![0u8; 512]).unwrap();
        let monitor = DiskMonitor::new(dir.path(), 16);
        assert_eq!(monitor.measure().unwrap(), 1.0);
    }
}
