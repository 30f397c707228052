use std::time::{Duration, Instant};

use anyhow::Result;
use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    requests: IntCounterVec,
    durations: HistogramVec,
    llm_retries: IntCounter,
    uptime: Gauge,
    started: Instant,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("assistant_requests_total", "Requests handled, by endpoint and outcome"),
            &["endpoint", "outcome"],
        )?;
        let durations = HistogramVec::new(
            HistogramOpts::new(
                "assistant_request_duration_seconds",
                "Request latency by endpoint",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["endpoint"],
        )?;
        let llm_retries = IntCounter::new(
            "assistant_llm_retries_total",
            "Retries issued after transient LLM failures",
        )?;
        let uptime = Gauge::new("assistant_uptime_seconds", "Seconds since the service started")?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(durations.clone()))?;
        registry.register(Box::new(llm_retries.clone()))?;
        registry.register(Box::new(uptime.clone()))?;

        Ok(Self {
            registry,
            requests,
            durations,
            llm_retries,
            uptime,
            started: Instant::now(),
        })
    }

    pub fn record_request(&self, endpoint: &str, outcome: &str, elapsed: Duration) {
        self.requests.with_label_values(&[endpoint, outcome]).inc();
        self.durations
            .with_label_values(&[endpoint])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_llm_retry(&self) {
        self.llm_retries.inc();
    }

    pub fn requests_total(&self, endpoint: &str, outcome: &str) -> u64 {
        self.requests.with_label_values(&[endpoint, outcome]).get()
    }

    /// Text exposition format, plus its content type.
    pub fn render(&self) -> Result<(Vec<u8>, String)> {
        self.uptime.set(self.started.elapsed().as_secs_f64());

        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((buffer, encoder.format_type().to_string()))
    }
}
