// s0counter - S0 pulse counter daemon
// Copyright (c) 2025 The s0counter developers
//
// Licensed under AGPL-3.0.
// See https://www.gnu.org/licenses/agpl-3.0.html for details.

//! Prometheus metrics for meter monitoring.
//!
//! Per-meter values are refreshed from the registry on every
//! data-collection tick and on every scrape.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::{
    register_gauge_vec, register_int_counter, register_int_gauge_vec, Encoder, GaugeVec,
    IntCounter, IntGaugeVec, TextEncoder,
};
use s0counter::MeterRegistry;

lazy_static! {
    // ============================================================
    // Meter Metrics
    // ============================================================

    /// Accepted pulses per meter.
    pub static ref TICKS: IntGaugeVec = register_int_gauge_vec!(
        "s0counter_ticks",
        "Accepted S0 pulses",
        &["meter"]
    ).unwrap();

    /// Cumulative counter value per meter, e.g. kWh.
    pub static ref COUNTER: GaugeVec = register_gauge_vec!(
        "s0counter_counter",
        "Cumulative meter reading",
        &["meter", "unit"]
    ).unwrap();

    /// Instantaneous rate per meter, e.g. kW.
    pub static ref GAUGE: GaugeVec = register_gauge_vec!(
        "s0counter_gauge",
        "Instantaneous rate derived from the last pulse interval",
        &["meter", "unit"]
    ).unwrap();

    // ============================================================
    // Daemon Metrics
    // ============================================================

    /// Readings the publisher refused.
    pub static ref PUBLISH_ERRORS_TOTAL: IntCounter = register_int_counter!(
        "s0counter_publish_errors_total",
        "Readings that could not be published"
    ).unwrap();

    /// Snapshot saves that failed.
    pub static ref BACKUP_ERRORS_TOTAL: IntCounter = register_int_counter!(
        "s0counter_backup_errors_total",
        "Snapshot saves that failed"
    ).unwrap();
}

/// Update per-meter metrics from the registry.
pub fn update_meter_metrics(registry: &MeterRegistry, now: DateTime<Utc>) {
    for meter in registry.iter() {
        let config = meter.config();
        let reading = meter.reading(now);
        let ticks = i64::try_from(meter.ticks()).unwrap_or(i64::MAX);

        TICKS.with_label_values(&[meter.name()]).set(ticks);
        COUNTER
            .with_label_values(&[meter.name(), config.unit_counter.as_str()])
            .set(reading.counter);
        GAUGE
            .with_label_values(&[meter.name(), config.unit_gauge.as_str()])
            .set(reading.gauge);
    }
}

/// Count readings that failed to publish.
pub fn record_publish_errors(count: usize) {
    PUBLISH_ERRORS_TOTAL.inc_by(count as u64);
}

/// Count one failed snapshot save.
pub fn record_backup_error() {
    BACKUP_ERRORS_TOTAL.inc();
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
