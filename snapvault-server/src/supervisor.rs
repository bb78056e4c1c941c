use serde::Serialize;
use sysinfo::{ProcessesToUpdate, System};

/// Liveness and resource snapshot of one supervised process.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    pub name: String,
    pub pid: u32,
    pub status: String,
    /// Seconds since the process started.
    pub uptime: u64,
    /// Resident memory in MB.
    pub memory: u64,
    pub cpu: f32,
}

/// Capability probe. When the host platform exposes no process table the
/// status route degrades to a 503 instead of failing at call time.
pub fn available() -> bool {
    sysinfo::IS_SUPPORTED_SYSTEM
}

/// Snapshot every process whose name contains `name_filter`
/// (case-insensitive). Two refreshes so the CPU sample is meaningful;
/// callers run this on a blocking thread.
pub fn snapshot(name_filter: &str) -> Vec<ProcessReport> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    system.refresh_processes(ProcessesToUpdate::All, true);

    let needle = name_filter.to_lowercase();
    let mut reports: Vec<ProcessReport> = system
        .processes()
        .values()
        .filter(|proc| {
            proc.name()
                .to_string_lossy()
                .to_lowercase()
                .contains(&needle)
        })
        .map(|proc| ProcessReport {
            name: proc.name().to_string_lossy().into_owned(),
            pid: proc.pid().as_u32(),
            status: proc.status().to_string(),
            uptime: proc.run_time(),
            memory: proc.memory() / 1024 / 1024,
            cpu: proc.cpu_usage(),
        })
        .collect();

    reports.sort_by_key(|report| report.pid);
    reports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_includes_current_process() {
        if !available() {
            return;
        }
        let pid = std::process::id();
        let reports = snapshot("");
        assert!(reports.iter().any(|r| r.pid == pid));
    }

    #[test]
    fn test_snapshot_filter_matches_nothing() {
        if !available() {
            return;
        }
        let reports = snapshot("definitely-not-a-real-process-name-zzz");
        assert!(reports.is_empty());
    }
}
