// Copyright (c) 2023 MASSA LABS <info@massa.net>
//! Prometheus gauges of the process pools and request queues, and the optional
//! HTTP endpoint exposing them.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec,
    IntGauge,
};

mod server;

pub use server::{bind_metrics, MetricsStopper};

lazy_static! {
    static ref ORIGIN_PROCESSES: IntGauge = register_int_gauge!("engine_origin_processes", "live origin pool processes").unwrap();
    static ref CROSS_PROCESSES: IntGauge = register_int_gauge!("engine_cross_processes", "live cross pool processes").unwrap();
    static ref BUSY_PROCESSES: IntGauge = register_int_gauge!("engine_busy_processes", "processes running a tx").unwrap();
    static ref REQUEST_GROUPS: IntGauge = register_int_gauge!("engine_request_groups", "live request groups").unwrap();
    static ref QUEUED_TXS: IntGauge = register_int_gauge!("engine_queued_txs", "txs waiting in request group lanes").unwrap();
    static ref INFLIGHT_TXS: IntGauge = register_int_gauge!("engine_inflight_txs", "txs with a registered notifier").unwrap();
    static ref BYTECODE_FETCHES: IntCounter = register_int_counter!("engine_bytecode_fetches", "bytecode fetches issued to chains").unwrap();
    static ref TX_COMPLETIONS: IntCounterVec = register_int_counter_vec!("engine_tx_completions", "delivered tx completions by status", &["status"]).unwrap();
}

/// Publishes the pool census.
pub fn set_pool_census(origin: usize, cross: usize, busy: usize) {
    ORIGIN_PROCESSES.set(origin as i64);
    CROSS_PROCESSES.set(cross as i64);
    BUSY_PROCESSES.set(busy as i64);
}

/// Publishes the scheduler queue figures.
pub fn set_scheduler_load(request_groups: usize, queued_txs: usize, inflight_txs: usize) {
    REQUEST_GROUPS.set(request_groups as i64);
    QUEUED_TXS.set(queued_txs as i64);
    INFLIGHT_TXS.set(inflight_txs as i64);
}

/// Counts a bytecode fetch issued to a chain.
pub fn inc_bytecode_fetches() {
    BYTECODE_FETCHES.inc();
}

/// Counts a delivered completion, `status` being the wire name of the outcome.
pub fn inc_tx_completions(status: &str) {
    TX_COMPLETIONS.with_label_values(&[status]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_census_gauges() {
        set_pool_census(2, 5, 1);
        assert_eq!(ORIGIN_PROCESSES.get(), 2);
        assert_eq!(CROSS_PROCESSES.get(), 5);
        assert_eq!(BUSY_PROCESSES.get(), 1);
        set_pool_census(0, 0, 0);
        assert_eq!(CROSS_PROCESSES.get(), 0);
    }

    #[test]
    #[serial]
    fn test_completion_counter_labels() {
        let before = TX_COMPLETIONS.with_label_values(&["BUSY"]).get();
        inc_tx_completions("BUSY");
        inc_tx_completions("BUSY");
        assert_eq!(TX_COMPLETIONS.with_label_values(&["BUSY"]).get(), before + 2);
    }
}
