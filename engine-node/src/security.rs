// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Best-effort hardening of the host before any sandbox starts.
//! Every step logs its failure and the boot goes on.

use engine_models::constants::MEGABYTE;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const CGROUP_NAME: &str = "chainmaker";
const IPC_LIMITS: [&str; 5] = ["shmmax", "shmall", "msgmax", "msgmnb", "msgmni"];

/// Host paths touched at boot, rooted at `/` outside of tests.
pub struct HostHardening {
    tmp_dir: PathBuf,
    cgroup_dir: PathBuf,
    kernel_dir: PathBuf,
    memory_limit_mb: u64,
}

impl HostHardening {
    pub fn new(memory_limit_mb: u64) -> Self {
        Self::rooted(Path::new("/"), memory_limit_mb)
    }

    pub fn rooted(root: &Path, memory_limit_mb: u64) -> Self {
        HostHardening {
            tmp_dir: root.join("tmp"),
            cgroup_dir: root.join("sys/fs/cgroup/memory").join(CGROUP_NAME),
            kernel_dir: root.join("proc/sys/kernel"),
            memory_limit_mb,
        }
    }

    /// Runs every step, returns how many failed.
    pub fn apply(&self) -> usize {
        let steps: [(&str, io::Result<()>); 3] = [
            ("chmod tmp", self.chmod_tmp()),
            ("memory cgroup", self.setup_memory_cgroup()),
            ("sysv ipc", self.disable_sysv_ipc()),
        ];
        let mut failed = 0;
        for (step, res) in steps {
            match res {
                Ok(()) => info!("host hardening: {} done", step),
                Err(e) => {
                    warn!("host hardening: {} failed: {}", step, e);
                    failed += 1;
                }
            }
        }
        failed
    }

    #[cfg(unix)]
    fn chmod_tmp(&self) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&self.tmp_dir, fs::Permissions::from_mode(0o755))
    }

    #[cfg(not(unix))]
    fn chmod_tmp(&self) -> io::Result<()> {
        Ok(())
    }

    fn setup_memory_cgroup(&self) -> io::Result<()> {
        fs::create_dir_all(&self.cgroup_dir)?;
        if self.memory_limit_mb > 0 {
            let limit = self
                .memory_limit_mb
                .saturating_mul(MEGABYTE as u64)
                .to_string();
            fs::write(self.cgroup_dir.join("memory.limit_in_bytes"), &limit)?;
            // rss + swap capped at the rss limit: no swap
            fs::write(self.cgroup_dir.join("memory.memsw.limit_in_bytes"), &limit)?;
        }
        fs::write(self.cgroup_dir.join("memory.swappiness"), "0")
    }

    fn disable_sysv_ipc(&self) -> io::Result<()> {
        for limit in IPC_LIMITS {
            fs::write(self.kernel_dir.join(limit), "0")?;
        }
        fs::write(self.kernel_dir.join("sem"), "0 0 0 0")
    }

    /// cgroup the sandboxes are accounted to
    pub fn cgroup_dir(&self) -> &Path {
        &self.cgroup_dir
    }
}
