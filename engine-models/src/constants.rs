// Copyright (c) 2022 MASSA LABS <info@massa.net>

/// Call depth of a tx submitted by the chain.
pub const ORIGIN_CALL_DEPTH: u32 = 1;

/// Separator used in the textual form of contract keys and child tx ids.
pub const KEY_SEPARATOR: char = '#';

/// One megabyte, the unit of the stream message caps.
pub const MEGABYTE: usize = 1024 * 1024;

/// Prefix of origin pool process names.
pub const ORIGIN_PROCESS_PREFIX: &str = "orig";

/// Prefix of cross pool process names.
pub const CROSS_PROCESS_PREFIX: &str = "cross";

/// Environment variable carrying the process name to a sandbox child.
pub const ENV_PROCESS_NAME: &str = "ENGINE_PROCESS_NAME";

/// Environment variable carrying the sandbox RPC socket path to a sandbox child.
pub const ENV_SANDBOX_SOCKET: &str = "ENGINE_SANDBOX_SOCKET";
