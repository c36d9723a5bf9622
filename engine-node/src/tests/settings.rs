// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::settings::{config_path, load_settings, ENV_CONFIG_FILE_NAME, ENV_MOUNT_DIR};
use engine_models::constants::MEGABYTE;
use engine_time::EngineTime;
use serial_test::serial;
use std::path::PathBuf;

const ENGINE_TOML: &str = r#"
channel_size = 64

[process]
max_original_process_num = 4
call_contract_depth = 2
idle_release_timeout = 250
sandbox_bin = "/opt/engine/sandbox"

[rpc]
chain_rpc_bind = "127.0.0.1:4000"
max_recv_msg_size = 8

[pprof.contract_engine_pprof]
enable = true
port = 9000
"#;

#[test]
#[serial]
fn test_missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let settings = load_settings(&path).unwrap();
    assert_eq!(settings.process.max_original_process_num, 20);
    assert_eq!(settings.process.call_contract_depth, 5);
    assert_eq!(settings.logging.level, 2);
    assert_eq!(settings.config_file_name, "absent.toml");
    assert_eq!(settings.docker_mount_dir, dir.path());
    assert!(settings.metrics_addr().is_none());
    // cross pool sized after both knobs
    assert_eq!(settings.process_config().max_cross_process_num(), 100);
}

#[test]
#[serial]
fn test_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.toml");
    std::fs::write(&path, ENGINE_TOML).unwrap();
    let settings = load_settings(&path).unwrap();

    let process = settings.process_config();
    assert_eq!(process.max_original_process_num, 4);
    assert_eq!(process.max_cross_process_num(), 8);
    assert_eq!(process.idle_release_timeout, EngineTime::from_millis(250));
    assert_eq!(process.sandbox_bin, PathBuf::from("/opt/engine/sandbox"));
    assert_eq!(process.channel_size, 64);
    assert_eq!(
        process.sandbox_socket_path,
        settings.sandbox_rpc_dir.join("sandbox.sock")
    );
    // untouched keys keep their defaults
    assert_eq!(process.release_rate, 0.3);

    let rpc = settings.rpc_config();
    assert_eq!(rpc.chain_rpc_bind, "127.0.0.1:4000".parse().unwrap());
    assert_eq!(rpc.max_recv_bytes(), 8 * MEGABYTE);
    assert_eq!(rpc.max_send_bytes(), 20 * MEGABYTE);

    assert_eq!(settings.scheduler_config().call_contract_depth, 2);
    assert_eq!(
        settings.metrics_addr(),
        Some("0.0.0.0:9000".parse().unwrap())
    );
}

#[test]
#[serial]
fn test_invalid_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.toml");
    std::fs::write(&path, "[process]\nmax_original_process_num = \"many\"\n").unwrap();
    assert!(load_settings(&path).is_err());
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.toml");
    std::fs::write(&path, ENGINE_TOML).unwrap();
    std::env::set_var("ENGINE_PROCESS__MAX_ORIGINAL_PROCESS_NUM", "8");
    let settings = load_settings(&path);
    std::env::remove_var("ENGINE_PROCESS__MAX_ORIGINAL_PROCESS_NUM");
    let settings = settings.unwrap();
    assert_eq!(settings.process.max_original_process_num, 8);
    assert_eq!(settings.process.call_contract_depth, 2);
}

#[test]
#[serial]
fn test_config_path_sources() {
    std::env::remove_var(ENV_MOUNT_DIR);
    std::env::remove_var(ENV_CONFIG_FILE_NAME);
    assert_eq!(config_path(None, None), PathBuf::from("/mount/engine.toml"));

    std::env::set_var(ENV_MOUNT_DIR, "/data");
    std::env::set_var(ENV_CONFIG_FILE_NAME, "node.toml");
    assert_eq!(config_path(None, None), PathBuf::from("/data/node.toml"));
    // the command line wins
    assert_eq!(
        config_path(Some(PathBuf::from("/etc/engine")), None),
        PathBuf::from("/etc/engine/node.toml")
    );
    std::env::remove_var(ENV_MOUNT_DIR);
    std::env::remove_var(ENV_CONFIG_FILE_NAME);
}
