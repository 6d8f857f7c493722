//! System resource snapshot for the operational surfaces.
//!
//! Everything here is best-effort: probes rely on `/proc`, `sysctl` and
//! `nvidia-smi` where available and report `None` otherwise. No probe may
//! fail a request.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::process::Command;
use std::time::Instant;

/// Memory usage snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub used_bytes: u64,
    pub percent: f64,
}

/// CPU usage snapshot. The load estimate is 1-minute load average scaled by
/// core count, which is cheap and good enough for a health page.
#[derive(Debug, Clone, Serialize)]
pub struct CpuInfo {
    pub cores: usize,
    pub load_average_1m: f64,
    pub percent_estimate: f64,
}

/// One GPU, when the driver tooling is present.
#[derive(Debug, Clone, Serialize)]
pub struct GpuInfo {
    pub name: String,
    pub total_memory_mb: u64,
    pub used_memory_mb: u64,
}

/// Disk usage for the working directory's filesystem.
#[derive(Debug, Clone, Serialize)]
pub struct DiskInfo {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
    pub percent: f64,
}

/// Process uptime.
#[derive(Debug, Clone, Serialize)]
pub struct UptimeInfo {
    pub uptime_seconds: u64,
    /// `HH:MM:SS` (hours may exceed two digits).
    pub uptime: String,
    pub started_at: DateTime<Utc>,
}

/// Full snapshot served on the admin status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SystemSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu: Option<CpuInfo>,
    pub memory: Option<MemoryInfo>,
    pub gpu: Option<GpuInfo>,
    pub disk: Option<DiskInfo>,
    pub uptime: UptimeInfo,
}

/// Process-wide monitor. Constructed once at startup.
#[derive(Debug)]
pub struct Monitor {
    start: Instant,
    started_at: DateTime<Utc>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            started_at: Utc::now(),
        }
    }

    pub fn uptime(&self) -> UptimeInfo {
        let seconds = self.start.elapsed().as_secs();
        UptimeInfo {
            uptime_seconds: seconds,
            uptime: format_uptime(seconds),
            started_at: self.started_at,
        }
    }

    pub fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot {
            timestamp: Utc::now(),
            cpu: cpu_info(),
            memory: memory_info(),
            gpu: gpu_info(),
            disk: disk_info(Path::new(".")),
            uptime: self.uptime(),
        }
    }
}

/// System memory utilisation percentage, when measurable.
pub fn memory_percent() -> Option<f64> {
    memory_info().map(|m| m.percent)
}

fn format_uptime(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{hours:02}:{minutes:02}:{secs:02}")
}

fn memory_info() -> Option<MemoryInfo> {
    if cfg!(target_os = "linux") {
        return linux_memory_info();
    }
    if cfg!(target_os = "macos") {
        let total = run_cmd(&["sysctl", "-n", "hw.memsize"])?.parse::<u64>().ok()?;
        let page_size = run_cmd(&["sysctl", "-n", "hw.pagesize"])?.parse::<u64>().ok()?;
        let free_pages = run_cmd(&["sysctl", "-n", "vm.page_free_count"])?
            .parse::<u64>()
            .ok()?;
        let available = free_pages.saturating_mul(page_size);
        let used = total.saturating_sub(available);
        return Some(MemoryInfo {
            total_bytes: total,
            available_bytes: available,
            used_bytes: used,
            percent: percent_of(used, total),
        });
    }
    None
}

fn linux_memory_info() -> Option<MemoryInfo> {
    let content = std::fs::read_to_string("/proc/meminfo").ok()?;
    let mut total_kb = None;
    let mut available_kb = None;
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total_kb = rest.split_whitespace().next()?.parse::<u64>().ok();
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available_kb = rest.split_whitespace().next()?.parse::<u64>().ok();
        }
    }
    let total = total_kb? * 1024;
    let available = available_kb? * 1024;
    let used = total.saturating_sub(available);
    Some(MemoryInfo {
        total_bytes: total,
        available_bytes: available,
        used_bytes: used,
        percent: percent_of(used, total),
    })
}

fn cpu_info() -> Option<CpuInfo> {
    let cores = std::thread::available_parallelism().map(|n| n.get()).ok()?;
    let load = if cfg!(target_os = "linux") {
        std::fs::read_to_string("/proc/loadavg")
            .ok()?
            .split_whitespace()
            .next()?
            .parse::<f64>()
            .ok()?
    } else if cfg!(target_os = "macos") {
        // "{ 1.23 4.56 7.89 }"
        let raw = run_cmd(&["sysctl", "-n", "vm.loadavg"])?;
        raw.trim_matches(['{', '}', ' '])
            .split_whitespace()
            .next()?
            .parse::<f64>()
            .ok()?
    } else {
        return None;
    };

    Some(CpuInfo {
        cores,
        load_average_1m: load,
        percent_estimate: (load / cores as f64 * 100.0).min(100.0),
    })
}

fn gpu_info() -> Option<GpuInfo> {
    let raw = run_cmd(&[
        "nvidia-smi",
        "--query-gpu=name,memory.total,memory.used",
        "--format=csv,noheader,nounits",
    ])?;
    let line = raw.lines().next()?;
    let mut parts = line.split(',').map(str::trim);
    Some(GpuInfo {
        name: parts.next()?.to_owned(),
        total_memory_mb: parts.next()?.parse().ok()?,
        used_memory_mb: parts.next()?.parse().ok()?,
    })
}

#[cfg(unix)]
fn disk_info(path: &Path) -> Option<DiskInfo> {
    let c_path = std::ffi::CString::new(path.to_str()?).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }
    let frsize = stat.f_frsize as u64;
    let total = stat.f_blocks as u64 * frsize;
    let free = stat.f_bavail as u64 * frsize;
    let used = total.saturating_sub(free);
    Some(DiskInfo {
        total_bytes: total,
        free_bytes: free,
        used_bytes: used,
        percent: percent_of(used, total),
    })
}

#[cfg(not(unix))]
fn disk_info(_path: &Path) -> Option<DiskInfo> {
    None
}

fn percent_of(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 100.0 * 100.0).round() / 100.0
}

fn run_cmd(args: &[&str]) -> Option<String> {
    let (program, rest) = args.split_first()?;
    let out = Command::new(program).args(rest).output().ok()?;
    if !out.status.success() {
        return None;
    }
    let s = String::from_utf8(out.stdout).ok()?;
    let trimmed = s.trim().to_owned();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_formats_as_clock() {
        assert_eq!(format_uptime(0), "00:00:00");
        assert_eq!(format_uptime(61), "00:01:01");
        assert_eq!(format_uptime(3 * 3600 + 25 * 60 + 9), "03:25:09");
        // Hours can exceed two digits after four days.
        assert_eq!(format_uptime(100 * 3600), "100:00:00");
    }

    #[test]
    fn percent_handles_zero_whole() {
        assert_eq!(percent_of(5, 0), 0.0);
        assert_eq!(percent_of(1, 4), 25.0);
    }

    #[test]
    fn snapshot_never_panics() {
        let monitor = Monitor::new();
        let snapshot = monitor.snapshot();
        assert!(snapshot.uptime.uptime_seconds < 60);
        if let Some(memory) = snapshot.memory {
            assert!(memory.total_bytes > 0);
            assert!(memory.percent >= 0.0 && memory.percent <= 100.0);
        }
        if let Some(disk) = snapshot.disk {
            assert!(disk.total_bytes >= disk.free_bytes);
        }
    }
}
