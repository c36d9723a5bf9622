// Copyright (c) 2021 MASSA LABS <info@massa.net>
//! Structured trace events and subscriber setup shared by every engine crate.

use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

/// Emits a trace event tagged `engine_trace:<event>:<json params>`.
///
/// Crates using this macro need `serde_json` and `tracing` as dependencies.
#[macro_export]
macro_rules! engine_trace {
    ($evt:expr, $params:tt) => {
        tracing::trace!("engine_trace:{}:{}", $evt, serde_json::json!($params));
    };
}

/// Maps the `logging.level` setting to a tracing level.
/// 0: error, 1: warn, 2: info, 3: debug, 4 and above: trace
pub fn level_filter(level: usize) -> LevelFilter {
    match level {
        0 => LevelFilter::ERROR,
        1 => LevelFilter::WARN,
        2 => LevelFilter::INFO,
        3 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Installs the global fmt subscriber.
///
/// `RUST_LOG` takes precedence over `level` when it is set and parses.
/// Calling it twice is harmless: the second install is ignored.
pub fn init_tracing(level: usize) {
    let filter = EnvFilter::builder()
        .with_default_directive(level_filter(level).into())
        .from_env_lossy();
    let tracing_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_filter(filter);
    let _ = tracing_subscriber::registry().with(tracing_layer).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter_mapping() {
        assert_eq!(level_filter(0), LevelFilter::ERROR);
        assert_eq!(level_filter(2), LevelFilter::INFO);
        assert_eq!(level_filter(9), LevelFilter::TRACE);
    }

    #[test]
    fn test_init_twice_and_trace() {
        init_tracing(4);
        init_tracing(1);
        engine_trace!("logging.test", { "key": "chain1#counter#1.0", "depth": 1 });
    }
}
