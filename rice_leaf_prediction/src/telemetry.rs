use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::{Encoder, Registry, TextEncoder};
use std::collections::HashSet;

pub struct Metrics {
    request_counter: Counter<u64>,
    prediction_duration: Histogram<u64>,
    gate_rejections: Counter<u64>,
    prediction_failures: Counter<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build prometheus exporter: {}", e))?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("rice_leaf_prediction");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        let boundaries = generate_boundaries((50, 250, 500, 1500, 5000));

        let prediction_duration = meter
            .u64_histogram("prediction_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of prediction requests in milliseconds")
            .build();

        let gate_rejections = meter
            .u64_counter("gate_rejections_total")
            .with_description("Images rejected by the leaf gate")
            .build();

        let prediction_failures = meter
            .u64_counter("prediction_failures_total")
            .with_description("Prediction requests that ended in an error")
            .build();

        Ok(Metrics {
            request_counter,
            prediction_duration,
            gate_rejections,
            prediction_failures,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_prediction_duration(&self, duration_ms: u64, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.prediction_duration.record(duration_ms, &attributes);
    }

    pub fn record_gate_rejection(&self) {
        self.gate_rejections.add(1, &[]);
    }

    pub fn record_failure(&self, kind: &'static str) {
        let attributes = vec![KeyValue::new("kind", kind)];
        self.prediction_failures.add(1, &attributes);
    }

    pub fn render(&self) -> anyhow::Result<String> {
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8(buffer)?)
    }
}

/// Histogram buckets: fine steps for fast predictions, coarse ones for the tail.
fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 25;
    let middle_step: usize = 50;
    let end_step: usize = 250;
    let tail_step: usize = 1000;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_boundaries() {
        let parts = (50, 100, 200, 700, 2700);
        let get = generate_boundaries(parts);
        let expected = vec![
            50.0, 75.0, 100.0, 150.0, 200.0, 450.0, 700.0, 1700.0, 2700.0,
        ];

        assert_eq!(get, expected);
    }

    #[test]
    fn test_render_exposes_recorded_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request("/predict");
        metrics.record_gate_rejection();

        let text = metrics.render().unwrap();
        assert!(text.contains("requests_total"));
        assert!(text.contains("gate_rejections_total"));
    }
}
