// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Duration;

/// Prometheus metrics for authentication decisions.
///
/// Cheap to clone; every clone records into the same registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    /// gateway_auth_total{tenant, scheme, outcome}
    auth_total: CounterVec,

    /// gateway_auth_duration_seconds{scheme}
    auth_duration: HistogramVec,

    /// gateway_metadata_resolution_total{outcome}
    metadata_resolution_total: CounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let auth_total = CounterVec::new(
            Opts::new("gateway_auth_total", "Authentication decisions"),
            &["tenant", "scheme", "outcome"],
        )?;

        // Buckets from 100µs to 2.5s; metadata fetches land in the tail.
        let auth_duration = HistogramVec::new(
            HistogramOpts::new(
                "gateway_auth_duration_seconds",
                "Time spent authenticating a request",
            )
            .buckets(vec![
                0.0001, 0.00025, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.1, 0.5, 2.5,
            ]),
            &["scheme"],
        )?;

        let metadata_resolution_total = CounterVec::new(
            Opts::new(
                "gateway_metadata_resolution_total",
                "IdP metadata resolutions",
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(auth_total.clone()))?;
        registry.register(Box::new(auth_duration.clone()))?;
        registry.register(Box::new(metadata_resolution_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            auth_total,
            auth_duration,
            metadata_resolution_total,
        })
    }

    /// Record one authentication decision.
    ///
    /// `outcome` is one of `authenticated`, `unauthenticated`, `forbidden`,
    /// `redirected`, `rejected` or `error`.
    pub fn record_auth(&self, tenant: &str, scheme: &str, outcome: &str, duration: Duration) {
        self.auth_total
            .with_label_values(&[tenant, scheme, outcome])
            .inc();
        self.auth_duration
            .with_label_values(&[scheme])
            .observe(duration.as_secs_f64());
    }

    pub fn record_metadata_resolution(&self, outcome: &str) {
        self.metadata_resolution_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Encode metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
