//! Host metrics sampler (Linux procfs + statvfs).
//!
//! # Sources
//!
//! - `<proc>/stat`: aggregate `cpu` line, read twice across a short window
//! - `<proc>/meminfo`: `MemTotal`, `MemAvailable` (or free + buffers + cached)
//! - `statvfs(disk_path)`: filesystem size and usage, computed like `df`
//! - `<proc>/diskstats`: sectors read/written on whole-disk devices
//! - `<proc>/net/dev`: rx/tx bytes on every interface except `lo`
//!
//! Each source is optional. A missing or unparsable file yields `None` for
//! the fields it feeds; only a sample with nothing at all is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::SamplingError;
use crate::models::system_metric::{clamp_percent, SystemMetricSample};

/// `/proc/diskstats` counts 512-byte sectors regardless of device block size.
const SECTOR_BYTES: u64 = 512;

/// Device name prefixes that never represent a physical disk.
const VIRTUAL_DISK_PREFIXES: &[&str] = &["loop", "ram", "zram", "dm-", "sr", "fd", "md"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub total: u64,
    pub available: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpace {
    pub total: u64,
    pub used: u64,
    pub available: u64,
}

/// Cumulative counters used for deltas between samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct IoCounters {
    disk_read: Option<u64>,
    disk_write: Option<u64>,
    net_rx: Option<u64>,
    net_tx: Option<u64>,
}

pub struct MetricsSampler {
    proc_root: PathBuf,
    disk_path: PathBuf,
    cpu_window: Duration,
    previous: Mutex<Option<IoCounters>>,
}

impl MetricsSampler {
    pub fn new(proc_root: impl Into<PathBuf>, disk_path: impl Into<PathBuf>, cpu_window: Duration) -> Self {
        Self {
            proc_root: proc_root.into(),
            disk_path: disk_path.into(),
            cpu_window,
            previous: Mutex::new(None),
        }
    }

    /// Collect one snapshot of the host.
    pub async fn sample(&self) -> Result<SystemMetricSample, SamplingError> {
        let mut sample = SystemMetricSample::empty(Utc::now());

        sample.cpu_usage = self.cpu_usage().await;

        match read_proc(&self.proc_root, "meminfo").await.and_then(|s| parse_meminfo(&s)) {
            Some(mem) => {
                let used = mem.total.saturating_sub(mem.available);
                sample.memory_total = to_i64(mem.total);
                sample.memory_used = to_i64(used);
                sample.memory_usage = percent(used, mem.total);
            }
            None => tracing::debug!("memory metrics unavailable"),
        }

        match disk_space(&self.disk_path) {
            Some(disk) => {
                sample.disk_total = to_i64(disk.total);
                sample.disk_used = to_i64(disk.used);
                sample.disk_usage = percent(disk.used, disk.used + disk.available);
            }
            None => tracing::debug!(path = %self.disk_path.display(), "disk usage unavailable"),
        }

        let current = self.io_counters().await;
        let previous = self.previous.lock().await.replace(current);
        if let Some(previous) = previous {
            sample.disk_read_bytes = delta(previous.disk_read, current.disk_read);
            sample.disk_write_bytes = delta(previous.disk_write, current.disk_write);
            sample.network_rx_bytes = delta(previous.net_rx, current.net_rx);
            sample.network_tx_bytes = delta(previous.net_tx, current.net_tx);
        }

        if sample.is_empty() {
            return Err(SamplingError::Unavailable(self.proc_root.clone()));
        }
        Ok(sample)
    }

    async fn cpu_usage(&self) -> Option<f64> {
        let first = read_proc(&self.proc_root, "stat").await.and_then(|s| parse_cpu_times(&s))?;
        tokio::time::sleep(self.cpu_window).await;
        let second = read_proc(&self.proc_root, "stat").await.and_then(|s| parse_cpu_times(&s))?;
        cpu_percent(first, second)
    }

    async fn io_counters(&self) -> IoCounters {
        let disk = read_proc(&self.proc_root, "diskstats")
            .await
            .and_then(|s| parse_diskstats(&s));
        let net = read_proc(&self.proc_root, "net/dev")
            .await
            .and_then(|s| parse_net_dev(&s));
        IoCounters {
            disk_read: disk.map(|(r, _)| r),
            disk_write: disk.map(|(_, w)| w),
            net_rx: net.map(|(rx, _)| rx),
            net_tx: net.map(|(_, tx)| tx),
        }
    }
}

async fn read_proc(root: &Path, name: &str) -> Option<String> {
    match tokio::fs::read_to_string(root.join(name)).await {
        Ok(content) => Some(content),
        Err(e) => {
            tracing::debug!(file = name, "cannot read proc file: {e}");
            None
        }
    }
}

fn to_i64(value: u64) -> Option<i64> {
    i64::try_from(value).ok()
}

fn percent(part: u64, whole: u64) -> Option<f64> {
    if whole == 0 {
        return None;
    }
    clamp_percent(part as f64 / whole as f64 * 100.0)
}

/// Difference between two readings of a cumulative counter. A counter that
/// went backwards (reboot, device removal) has no meaningful delta.
fn delta(previous: Option<u64>, current: Option<u64>) -> Option<i64> {
    match (previous, current) {
        (Some(p), Some(c)) if c >= p => to_i64(c - p),
        _ => None,
    }
}

/// Parse the aggregate `cpu` line of `/proc/stat`.
///
/// Guest time is already included in user/nice, so only the first eight
/// columns count toward the total.
pub fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(|v| v.parse().ok())
        .collect::<Option<_>>()?;
    if values.len() < 4 {
        return None;
    }
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    let total = values.iter().sum();
    Some(CpuTimes { idle, total })
}

/// Busy share of CPU time between two readings.
pub fn cpu_percent(first: CpuTimes, second: CpuTimes) -> Option<f64> {
    let total = second.total.checked_sub(first.total)?;
    let idle = second.idle.checked_sub(first.idle)?;
    if total == 0 {
        return Some(0.0);
    }
    clamp_percent((total.saturating_sub(idle)) as f64 / total as f64 * 100.0)
}

/// Parse `/proc/meminfo` (values in kB) into bytes.
pub fn parse_meminfo(meminfo: &str) -> Option<MemoryInfo> {
    let field = |name: &str| -> Option<u64> {
        meminfo
            .lines()
            .find_map(|l| l.strip_prefix(name)?.strip_prefix(':'))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|kb| kb.saturating_mul(1024))
    };

    let total = field("MemTotal")?;
    let available = field("MemAvailable").or_else(|| {
        Some(
            field("MemFree")?
                .saturating_add(field("Buffers").unwrap_or(0))
                .saturating_add(field("Cached").unwrap_or(0)),
        )
    })?;
    Some(MemoryInfo {
        total,
        available: available.min(total),
    })
}

/// Sum bytes read and written over whole-disk devices in `/proc/diskstats`.
pub fn parse_diskstats(diskstats: &str) -> Option<(u64, u64)> {
    let rows: Vec<(&str, u64, u64)> = diskstats
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 10 {
                return None;
            }
            let sectors_read = cols[5].parse().ok()?;
            let sectors_written = cols[9].parse().ok()?;
            Some((cols[2], sectors_read, sectors_written))
        })
        .collect();
    if rows.is_empty() {
        return None;
    }

    let names: Vec<&str> = rows.iter().map(|(n, _, _)| *n).collect();
    let is_partition = |name: &str| names.iter().any(|disk| is_partition_of(name, disk));

    let (read, written) = rows
        .iter()
        .filter(|(name, _, _)| !VIRTUAL_DISK_PREFIXES.iter().any(|p| name.starts_with(p)))
        .filter(|(name, _, _)| !is_partition(name))
        .fold((0u64, 0u64), |(r, w), (_, sr, sw)| {
            (
                r.saturating_add(sr.saturating_mul(SECTOR_BYTES)),
                w.saturating_add(sw.saturating_mul(SECTOR_BYTES)),
            )
        });
    Some((read, written))
}

/// `sda1` belongs to `sda` and `nvme0n1p1` to `nvme0n1`. A disk whose name
/// ends in a digit separates the partition number with `p`, so `nvme0n10`
/// and `sdaa` are disks of their own.
fn is_partition_of(name: &str, disk: &str) -> bool {
    let Some(rest) = name.strip_prefix(disk) else {
        return false;
    };
    let number = if disk.ends_with(|c: char| c.is_ascii_digit()) {
        match rest.strip_prefix('p') {
            Some(number) => number,
            None => return false,
        }
    } else {
        rest
    };
    !number.is_empty() && number.bytes().all(|b| b.is_ascii_digit())
}

/// Sum rx/tx bytes over non-loopback interfaces in `/proc/net/dev`.
pub fn parse_net_dev(net_dev: &str) -> Option<(u64, u64)> {
    let mut seen = false;
    let mut rx_total = 0u64;
    let mut tx_total = 0u64;

    for line in net_dev.lines() {
        let Some((iface, counters)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            seen = true;
            continue;
        }
        let cols: Vec<&str> = counters.split_whitespace().collect();
        if cols.len() < 9 {
            continue;
        }
        let (Ok(rx), Ok(tx)) = (cols[0].parse::<u64>(), cols[8].parse::<u64>()) else {
            continue;
        };
        seen = true;
        rx_total = rx_total.saturating_add(rx);
        tx_total = tx_total.saturating_add(tx);
    }

    seen.then_some((rx_total, tx_total))
}

/// Filesystem usage for the mount containing `path`.
#[cfg(unix)]
pub fn disk_space(path: &Path) -> Option<DiskSpace> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();
    // SAFETY: `c_path` is NUL-terminated and `stat` points to writable
    // memory sized for `libc::statvfs`.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
        tracing::debug!(
            path = %path.display(),
            "statvfs failed: {}",
            std::io::Error::last_os_error()
        );
        return None;
    }
    // SAFETY: statvfs returned 0, so the struct is fully initialised.
    let stat = unsafe { stat.assume_init() };

    let fragment = stat.f_frsize as u64;
    let total = (stat.f_blocks as u64).saturating_mul(fragment);
    let free = (stat.f_bfree as u64).saturating_mul(fragment);
    let available = (stat.f_bavail as u64).saturating_mul(fragment);
    Some(DiskSpace {
        total,
        used: total.saturating_sub(free),
        available,
    })
}

#[cfg(not(unix))]
pub fn disk_space(_path: &Path) -> Option<DiskSpace> {
    None
}
