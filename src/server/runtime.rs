/// Container-aware sizing for the tokio worker pool.
///
/// Order: `PORTICO_WORKER_THREADS` env override, then the cgroup v2 CPU
/// quota, then the cgroup v1 quota, then host parallelism. Without the
/// cgroup checks, tokio defaults to the host core count, over-provisioning
/// threads in CPU-limited containers.
pub fn worker_threads() -> usize {
    if let Some(n) = std::env::var("PORTICO_WORKER_THREADS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
    {
        return n.max(1);
    }

    if let Ok(max) = std::fs::read_to_string("/sys/fs/cgroup/cpu.max") {
        if let Some(cores) = parse_cgroup_cpu_max(&max) {
            return cores.max(1);
        }
    }

    if let (Ok(quota), Ok(period)) = (
        std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_quota_us"),
        std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_period_us"),
    ) {
        if let Some(cores) = parse_cgroup_v1_cpu(&quota, &period) {
            return cores.max(1);
        }
    }

    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

/// cgroup v2 `cpu.max` is `"<quota> <period>"` or `"max <period>"`.
fn parse_cgroup_cpu_max(content: &str) -> Option<usize> {
    let mut parts = content.split_whitespace();
    let quota = parts.next()?;
    let period: f64 = parts.next()?.parse().ok()?;
    if quota == "max" || period <= 0.0 {
        return None;
    }
    let quota: f64 = quota.parse().ok()?;
    Some((quota / period).ceil() as usize)
}

/// cgroup v1 keeps the quota and period in separate files; a quota of -1
/// means unlimited.
fn parse_cgroup_v1_cpu(quota: &str, period: &str) -> Option<usize> {
    let quota: f64 = quota.trim().parse().ok()?;
    let period: f64 = period.trim().parse().ok()?;
    if quota <= 0.0 || period <= 0.0 {
        return None;
    }
    Some((quota / period).ceil() as usize)
}
