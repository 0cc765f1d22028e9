//! Prometheus metrics for the import pipeline.
//!
//! Each stage owns a small struct of recording functions. Names follow
//! `score_ingest_{phase}_{name}[_total]`.

use std::net::SocketAddr;
use std::sync::{Once, OnceLock};
use tracing::{debug, info, warn};

static INIT: Once = Once::new();
static HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("score_ingest_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("score_ingest_", $phase, "_", $name)
    };
}

/// Install the Prometheus recorder. Idempotent.
///
/// With `listen_addr` set the exporter serves `/metrics` over HTTP (this needs a
/// running Tokio runtime) and [`render`] returns `None`. Otherwise the snapshot
/// is only available through [`render`].
pub fn init_metrics(listen_addr: Option<&str>) {
    INIT.call_once(|| {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

        if let Some(addr_str) = listen_addr {
            match addr_str.parse::<SocketAddr>() {
                Ok(addr) => {
                    match builder.with_http_listener(addr).install() {
                        Ok(()) => {
                            register_all_metrics();
                            info!("📈 Prometheus exporter listening on http://{}/metrics", addr);
                        }
                        Err(e) => warn!("Failed to start Prometheus exporter: {}", e),
                    }
                    return;
                }
                Err(_) => warn!("Invalid metrics listen address '{}', serving in-process only", addr_str),
            }
        }

        match builder.install_recorder() {
            Ok(handle) => {
                if HANDLE.set(handle).is_err() {
                    warn!("Metrics handle was already set");
                }
                register_all_metrics();
                info!("📈 Metrics recorder installed");
            }
            Err(e) => warn!("Failed to install Prometheus recorder: {}", e),
        }
    });
}

/// Current metrics in Prometheus text format, if the recorder is installed.
pub fn render() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

#[derive(Debug, Clone)]
pub struct MetricDoc {
    pub name: &'static str,
    pub help: &'static str,
}

fn register_all_metrics() {
    let docs: Vec<MetricDoc> = QueueMetrics::documentation()
        .into_iter()
        .chain(ImportMetrics::documentation())
        .chain(KaiMetrics::documentation())
        .collect();
    for doc in &docs {
        ::metrics::describe_counter!(doc.name, doc.help);
    }
    debug!("Registered {} metric descriptions", docs.len());
}

/// Insert queue flushes.
pub struct QueueMetrics;

impl QueueMetrics {
    pub fn record_flush(inserted: usize, conflicted: usize, duration_secs: f64) {
        ::metrics::counter!(phase_metric!(counter, "queue", "flushes")).increment(1);
        ::metrics::counter!(phase_metric!(counter, "queue", "scores_inserted")).increment(inserted as u64);
        if conflicted > 0 {
            ::metrics::counter!(phase_metric!(counter, "queue", "scores_conflicted"))
                .increment(conflicted as u64);
        }
        ::metrics::histogram!(phase_metric!(histogram, "queue", "flush_duration_seconds"))
            .record(duration_secs);
    }

    pub fn record_flush_error() {
        ::metrics::counter!(phase_metric!(counter, "queue", "flush_errors")).increment(1);
    }

    fn documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "queue", "flushes"),
                help: "Insert queue flushes",
            },
            MetricDoc {
                name: phase_metric!(counter, "queue", "scores_inserted"),
                help: "Scores written by queue flushes",
            },
            MetricDoc {
                name: phase_metric!(counter, "queue", "scores_conflicted"),
                help: "Scores dropped because they already existed at flush time",
            },
            MetricDoc {
                name: phase_metric!(counter, "queue", "flush_errors"),
                help: "Queue flushes that failed on a storage error",
            },
        ]
    }
}

/// Import jobs and per-datum outcomes.
pub struct ImportMetrics;

impl ImportMetrics {
    pub fn record_outcome(import_type: &str, kind: &str) {
        ::metrics::counter!(
            phase_metric!(counter, "import", "outcomes"),
            "import_type" => import_type.to_string(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }

    pub fn record_job(import_type: &str, fatal: bool, duration_secs: f64) {
        let status = if fatal { "fatal" } else { "ok" };
        ::metrics::counter!(
            phase_metric!(counter, "import", "jobs"),
            "import_type" => import_type.to_string(),
            "status" => status
        )
        .increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "import", "job_duration_seconds"))
            .record(duration_secs);
    }

    pub fn record_orphan() {
        ::metrics::counter!(phase_metric!(counter, "import", "orphans")).increment(1);
    }

    fn documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "import", "outcomes"),
                help: "Per-datum import outcomes by kind",
            },
            MetricDoc {
                name: phase_metric!(counter, "import", "jobs"),
                help: "Import jobs run",
            },
            MetricDoc {
                name: phase_metric!(counter, "import", "orphans"),
                help: "Unresolvable data kept as orphans",
            },
        ]
    }
}

/// Paginated API traversal.
pub struct KaiMetrics;

impl KaiMetrics {
    pub fn record_page(service: &str, items: usize) {
        ::metrics::counter!(
            phase_metric!(counter, "kai", "pages_fetched"),
            "service" => service.to_string()
        )
        .increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "kai", "page_items")).record(items as f64);
    }

    pub fn record_reauth(success: bool) {
        let result = if success { "success" } else { "error" };
        ::metrics::counter!(phase_metric!(counter, "kai", "reauth"), "result" => result).increment(1);
    }

    fn documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "kai", "pages_fetched"),
                help: "Pages fetched from Kai-like APIs",
            },
            MetricDoc {
                name: phase_metric!(counter, "kai", "reauth"),
                help: "Token refresh attempts",
            },
        ]
    }
}
