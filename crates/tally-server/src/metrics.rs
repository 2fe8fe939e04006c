//! Prometheus metrics for the HTTP API

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub aggregations: IntCounter,
    pub translations: IntCounterVec,
    pub translation_attempts: IntCounter,
    pub aggregation_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("tally".to_string()), None)?;

        let aggregations = IntCounter::new("aggregations_total", "Aggregations executed")?;
        let translations = IntCounterVec::new(
            Opts::new("translations_total", "Natural language translations by outcome"),
            &["outcome"],
        )?;
        let translation_attempts = IntCounter::new("translation_attempts_total", "Model calls made by the translator")?;
        let aggregation_seconds = Histogram::with_opts(
            HistogramOpts::new("aggregation_duration_seconds", "Aggregation latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;

        registry.register(Box::new(aggregations.clone()))?;
        registry.register(Box::new(translations.clone()))?;
        registry.register(Box::new(translation_attempts.clone()))?;
        registry.register(Box::new(aggregation_seconds.clone()))?;

        Ok(Self {
            registry,
            aggregations,
            translations,
            translation_attempts,
            aggregation_seconds,
        })
    }

    pub fn record_translation(&self, succeeded: bool, attempts: u32) {
        let outcome = if succeeded { "success" } else { "failure" };
        self.translations.with_label_values(&[outcome]).inc();
        self.translation_attempts.inc_by(u64::from(attempts));
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
