// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::security::HostHardening;
use engine_models::constants::MEGABYTE;
use std::fs;

#[test]
fn test_hardening_writes_limits() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir_all(root.path().join("tmp")).unwrap();
    fs::create_dir_all(root.path().join("proc/sys/kernel")).unwrap();
    let hardening = HostHardening::rooted(root.path(), 64);

    assert_eq!(hardening.apply(), 0);

    let cgroup = hardening.cgroup_dir();
    assert!(cgroup.ends_with("sys/fs/cgroup/memory/chainmaker"));
    let limit = (64 * MEGABYTE).to_string();
    assert_eq!(
        fs::read_to_string(cgroup.join("memory.limit_in_bytes")).unwrap(),
        limit
    );
    assert_eq!(
        fs::read_to_string(cgroup.join("memory.memsw.limit_in_bytes")).unwrap(),
        limit
    );
    assert_eq!(
        fs::read_to_string(cgroup.join("memory.swappiness")).unwrap(),
        "0"
    );
    let kernel = root.path().join("proc/sys/kernel");
    assert_eq!(fs::read_to_string(kernel.join("shmmax")).unwrap(), "0");
    assert_eq!(fs::read_to_string(kernel.join("msgmni")).unwrap(), "0");
    assert_eq!(fs::read_to_string(kernel.join("sem")).unwrap(), "0 0 0 0");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(root.path().join("tmp"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}

#[test]
fn test_failed_steps_are_counted() {
    let root = tempfile::tempdir().unwrap();
    // no tmp and no kernel dir
    let hardening = HostHardening::rooted(root.path(), 0);
    assert_eq!(hardening.apply(), 2);
    // an unlimited cgroup still gets its swappiness
    assert!(!hardening.cgroup_dir().join("memory.limit_in_bytes").exists());
    assert!(hardening.cgroup_dir().join("memory.swappiness").exists());
}
