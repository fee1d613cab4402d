use std::collections::BTreeMap;

/// Flat agent keys recognized at the document root, with their canonical paths.
pub const ROOT_METRICS: &[(&str, &str)] = &[
    ("agentVersion", "host.agent_version"),
    ("os", "host.os"),
    ("python", "host.python_version"),
    ("uuid", "host.uuid"),
    // Load averages.
    ("system.load.1", "system.load.1"),
    ("system.load.5", "system.load.5"),
    ("system.load.15", "system.load.15"),
    ("system.load.norm.1", "system.load.norm.1"),
    ("system.load.norm.5", "system.load.norm.5"),
    ("system.load.norm.15", "system.load.norm.15"),
    // CPU.
    ("cpuIdle", "system.cpu.idle"),
    ("cpuUser", "system.cpu.user"),
    ("cpuWait", "system.cpu.iowait"),
    ("cpuSystem", "system.cpu.system"),
    ("cpuStolen", "system.cpu.stolen"),
    // Memory.
    ("memBuffers", "system.mem.buffered"),
    ("memPhysPctUsable", "system.mem.pct_usable"),
    ("memShared", "system.mem.shared"),
    ("memPhysTotal", "system.mem.total"),
    ("memPhysUsable", "system.mem.usable"),
    ("memCached", "system.mem.cached"),
    ("memPhysUsed", "system.mem.used"),
    ("memPhysFree", "system.mem.free"),
    // Swap.
    ("memSwapFree", "system.swap.free"),
    ("memSwapTotal", "system.swap.total"),
    ("memSwapUsed", "system.swap.used"),
    ("memSwapPctFree", "system.swap.pct_free"),
];

/// Canonical IO column -> raw iostat field name.
pub const IO_FIELDS: &[(&str, &str)] = &[
    ("util", "%util"),
    ("avg_q_sz", "avgqu-sz"),
    ("avg_rq_sz", "avgrq-sz"),
    ("await", "await"),
    ("r_s", "r/s"),
    ("r_await", "r_await"),
    ("rkb_s", "rkB/s"),
    ("rrqm_s", "rrqm/s"),
    ("svctm", "svctm"),
    ("w_s", "w/s"),
    ("w_await", "w_await"),
    ("wkb_s", "wkB/s"),
    ("wrqm_s", "wrqm/s"),
];

/// Positional layout of one process tuple as sent by the agent.
pub const PROCESS_COLUMNS: &[&str] = &[
    "user",
    "pid",
    "pct_cpu",
    "pct_mem",
    "vsz",
    "rss",
    "tty",
    "stat",
    "started",
    "running_time",
    "command",
];

/// Positional layout of one disk or inode usage tuple.
pub const DISK_COLUMNS: &[&str] = &["device", "total", "used", "free", "in_use", "mount"];

/// Classification tables consulted by the mappers.
///
/// Immutable once built; the defaults mirror the agent's payload shape and
/// tests may substitute their own.
#[derive(Debug, Clone)]
pub struct MappingTables {
    /// Root key -> canonical dotted path.
    pub root_metrics: BTreeMap<String, String>,
    /// Canonical IO column -> raw iostat field, in output column order.
    pub io_fields: Vec<(String, String)>,
    /// Process tuple layout.
    pub process_columns: Vec<String>,
    /// Disk/inode tuple layout.
    pub disk_columns: Vec<String>,
}

impl Default for MappingTables {
    fn default() -> Self {
        Self {
            root_metrics: ROOT_METRICS
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            io_fields: IO_FIELDS
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            process_columns: PROCESS_COLUMNS.iter().map(|s| (*s).to_string()).collect(),
            disk_columns: DISK_COLUMNS.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}
