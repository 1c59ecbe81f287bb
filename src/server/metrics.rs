//! Prometheus metrics endpoint
//!
//! Small Prometheus text-format exporter built on atomics and `parking_lot`.
//! Metrics are registered once into the global [`METRICS`] registry and
//! updated through the typed handles in [`STD_METRICS`].

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Gauge storing an `f64` bit-cast into an `AtomicU64`.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn set(&self, val: f64) {
        self.0.store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// Counters partitioned by a fixed set of label names.
#[derive(Debug)]
pub struct CounterVec {
    label_names: Vec<&'static str>,
    entries: RwLock<BTreeMap<Vec<String>, Arc<Counter>>>,
}

impl CounterVec {
    fn new(label_names: &[&'static str]) -> Self {
        Self {
            label_names: label_names.to_vec(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Counter for `label_values`, created on first use.
    pub fn with_labels(&self, label_values: &[&str]) -> Arc<Counter> {
        let key: Vec<String> = label_values.iter().map(|s| s.to_string()).collect();
        if let Some(counter) = self.entries.read().get(&key) {
            return Arc::clone(counter);
        }
        Arc::clone(self.entries.write().entry(key).or_default())
    }

    pub fn inc(&self, label_values: &[&str]) {
        self.with_labels(label_values).inc();
    }

    pub fn get(&self, label_values: &[&str]) -> u64 {
        let key: Vec<String> = label_values.iter().map(|s| s.to_string()).collect();
        self.entries.read().get(&key).map(|c| c.get()).unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
enum MetricData {
    Counter(Arc<Counter>),
    Gauge(Arc<Gauge>),
    CounterVec(Arc<CounterVec>),
}

#[derive(Debug, Clone)]
struct MetricDescriptor {
    name: String,
    help: String,
    data: MetricData,
}

/// Registry of every exported metric, rendered in registration order.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    metrics: RwLock<Vec<MetricDescriptor>>,
}

/// The global registry.
pub static METRICS: LazyLock<MetricsRegistry> = LazyLock::new(MetricsRegistry::default);

impl MetricsRegistry {
    fn register(&self, name: &str, help: &str, data: MetricData) {
        self.metrics.write().push(MetricDescriptor {
            name: name.to_string(),
            help: help.to_string(),
            data,
        });
    }

    pub fn register_counter(&self, name: &str, help: &str) -> Arc<Counter> {
        let counter = Arc::new(Counter::default());
        self.register(name, help, MetricData::Counter(Arc::clone(&counter)));
        counter
    }

    pub fn register_gauge(&self, name: &str, help: &str) -> Arc<Gauge> {
        let gauge = Arc::new(Gauge::default());
        self.register(name, help, MetricData::Gauge(Arc::clone(&gauge)));
        gauge
    }

    pub fn register_counter_vec(
        &self,
        name: &str,
        help: &str,
        label_names: &[&'static str],
    ) -> Arc<CounterVec> {
        let vec = Arc::new(CounterVec::new(label_names));
        self.register(name, help, MetricData::CounterVec(Arc::clone(&vec)));
        vec
    }

    /// Prometheus text exposition format.
    pub fn render(&self) -> String {
        let metrics = self.metrics.read().clone();
        let mut out = String::with_capacity(2048);

        for desc in &metrics {
            let kind = match desc.data {
                MetricData::Gauge(_) => "gauge",
                _ => "counter",
            };
            let _ = writeln!(out, "# HELP {} {}", desc.name, desc.help);
            let _ = writeln!(out, "# TYPE {} {}", desc.name, kind);

            match &desc.data {
                MetricData::Counter(counter) => {
                    let _ = writeln!(out, "{} {}", desc.name, counter.get());
                }
                MetricData::Gauge(gauge) => {
                    let val = gauge.get();
                    if val.is_finite() && val == val.floor() {
                        let _ = writeln!(out, "{} {}", desc.name, val as i64);
                    } else {
                        let _ = writeln!(out, "{} {}", desc.name, val);
                    }
                }
                MetricData::CounterVec(vec) => {
                    for (values, counter) in vec.entries.read().iter() {
                        let _ = writeln!(
                            out,
                            "{}{} {}",
                            desc.name,
                            format_labels(&vec.label_names, values),
                            counter.get()
                        );
                    }
                }
            }
        }

        out
    }
}

fn format_labels(names: &[&str], values: &[String]) -> String {
    let mut buf = String::from("{");
    for (i, (name, value)) in names.iter().zip(values).enumerate() {
        if i > 0 {
            buf.push(',');
        }
        let _ = write!(buf, "{}=\"{}\"", name, escape_label_value(value));
    }
    buf.push('}');
    buf
}

fn escape_label_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Application metric handles.
pub struct StandardMetrics {
    pub webhooks_total: Arc<CounterVec>,
    pub signature_rejections_total: Arc<CounterVec>,
    pub dispatch_total: Arc<CounterVec>,
    pub tool_calls_total: Arc<CounterVec>,
    pub calls_tracked: Arc<Gauge>,
    pub calls_pruned_total: Arc<Counter>,
}

pub static STD_METRICS: LazyLock<StandardMetrics> = LazyLock::new(|| StandardMetrics {
    webhooks_total: METRICS.register_counter_vec(
        "switchboard_webhooks_total",
        "Call webhooks handled, by provider and outcome",
        &["provider", "outcome"],
    ),
    signature_rejections_total: METRICS.register_counter_vec(
        "switchboard_signature_rejections_total",
        "Webhooks that failed signature verification",
        &["provider", "reason"],
    ),
    dispatch_total: METRICS.register_counter_vec(
        "switchboard_dispatch_total",
        "Call-control actions issued, by action and result",
        &["action", "result"],
    ),
    tool_calls_total: METRICS.register_counter_vec(
        "switchboard_tool_calls_total",
        "Tool invocations bridged, by vendor format and result",
        &["format", "result"],
    ),
    calls_tracked: METRICS.register_gauge(
        "switchboard_calls_tracked",
        "Calls currently held in the action store",
    ),
    calls_pruned_total: METRICS.register_counter(
        "switchboard_calls_pruned_total",
        "Finished calls evicted from the action store",
    ),
});

/// `GET /metrics`
pub async fn metrics_handler() -> Response {
    LazyLock::force(&STD_METRICS);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        METRICS.render(),
    )
        .into_response()
}
