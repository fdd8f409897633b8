//! Prometheus metrics exposed at `GET /metrics`

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    /// Labels: operation (translate, fix, improve), outcome (accepted, exhausted, failed)
    pub generations: IntCounterVec,
    pub repair_attempts: IntCounter,
    /// Labels: outcome (ok, error, repaired)
    pub executions: IntCounterVec,
    /// Labels: endpoint
    pub request_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let generations = IntCounterVec::new(
            Opts::new("nlq_generations_total", "Translate, fix and improve requests by outcome"),
            &["operation", "outcome"],
        )?;
        let repair_attempts = IntCounter::new("nlq_repair_attempts_total", "Generator calls made by the repair loop")?;
        let executions = IntCounterVec::new(
            Opts::new("nlq_executions_total", "Queries executed against the cluster by outcome"),
            &["outcome"],
        )?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new("nlq_request_duration_seconds", "API request latency"),
            &["endpoint"],
        )?;

        registry.register(Box::new(generations.clone()))?;
        registry.register(Box::new(repair_attempts.clone()))?;
        registry.register(Box::new(executions.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;

        Ok(Self {
            registry,
            generations,
            repair_attempts,
            executions,
            request_duration,
        })
    }

    pub fn record_generation(&self, operation: &str, outcome: &str, attempts: usize) {
        self.generations.with_label_values(&[operation, outcome]).inc();
        self.repair_attempts.inc_by(attempts as u64);
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
