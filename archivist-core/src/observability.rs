/*!
Observability for the backup engine.

- Structured logging through `tracing`, with a JSON formatter
- Prometheus counters and histograms behind the `metrics` feature
*/

#[cfg(feature = "metrics")]
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
#[cfg(feature = "metrics")]
use std::time::Instant;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{ArchivistError, Result};

/// Global metrics instance; `None` if registration failed
#[cfg(feature = "metrics")]
static METRICS: OnceLock<Option<ArchivistMetrics>> = OnceLock::new();

/// Engine operations that are timed and counted
#[cfg(feature = "metrics")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Backup,
    Restore,
    Verify,
}

/// Metrics collection for engine operations
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct ArchivistMetrics {
    pub backups_total: Counter,
    pub backup_failures_total: Counter,
    pub backup_latency_seconds: Histogram,

    pub restores_total: Counter,
    pub restore_failures_total: Counter,
    pub restore_latency_seconds: Histogram,

    pub verifications_total: Counter,
    pub verification_failures_total: Counter,

    /// Sealed (compressed + encrypted) archive sizes
    pub archive_size_bytes: Histogram,

    pub retention_deletions_total: Counter,
    pub retention_failures_total: Counter,

    registry: Registry,
}

#[cfg(feature = "metrics")]
fn counter(registry: &Registry, name: &str, help: &str) -> Result<Counter> {
    let counter = Counter::new(name, help)
        .map_err(|e| ArchivistError::config(format!("Failed to create {name} metric: {e}")))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| ArchivistError::config(format!("Failed to register {name}: {e}")))?;
    Ok(counter)
}

#[cfg(feature = "metrics")]
fn histogram(registry: &Registry, opts: HistogramOpts) -> Result<Histogram> {
    let name = opts.common_opts.name.clone();
    let histogram = Histogram::with_opts(opts)
        .map_err(|e| ArchivistError::config(format!("Failed to create {name} metric: {e}")))?;
    registry
        .register(Box::new(histogram.clone()))
        .map_err(|e| ArchivistError::config(format!("Failed to register {name}: {e}")))?;
    Ok(histogram)
}

#[cfg(feature = "metrics")]
impl ArchivistMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let backups_total = counter(
            &registry,
            "archivist_backups_total",
            "Backups started by the engine",
        )?;
        let backup_failures_total = counter(
            &registry,
            "archivist_backup_failures_total",
            "Backups that ended in the failed status",
        )?;
        let backup_latency_seconds = histogram(
            &registry,
            HistogramOpts::new(
                "archivist_backup_latency_seconds",
                "Duration of backup operations in seconds",
            ),
        )?;

        let restores_total = counter(
            &registry,
            "archivist_restores_total",
            "Restores started by the engine",
        )?;
        let restore_failures_total = counter(
            &registry,
            "archivist_restore_failures_total",
            "Restores that returned an error",
        )?;
        let restore_latency_seconds = histogram(
            &registry,
            HistogramOpts::new(
                "archivist_restore_latency_seconds",
                "Duration of restore operations in seconds",
            ),
        )?;

        let verifications_total = counter(
            &registry,
            "archivist_verifications_total",
            "Archive verifications performed",
        )?;
        let verification_failures_total = counter(
            &registry,
            "archivist_verification_failures_total",
            "Archive verifications that did not pass",
        )?;

        let archive_size_bytes = histogram(
            &registry,
            HistogramOpts::new("archivist_archive_size_bytes", "Size of sealed archives in bytes")
                .buckets(prometheus::exponential_buckets(1024.0, 4.0, 10).map_err(|e| {
                    ArchivistError::config(format!("Invalid archive size buckets: {e}"))
                })?),
        )?;

        let retention_deletions_total = counter(
            &registry,
            "archivist_retention_deletions_total",
            "Backups removed by retention",
        )?;
        let retention_failures_total = counter(
            &registry,
            "archivist_retention_failures_total",
            "Backups retention failed to remove",
        )?;

        Ok(Self {
            backups_total,
            backup_failures_total,
            backup_latency_seconds,
            restores_total,
            restore_failures_total,
            restore_latency_seconds,
            verifications_total,
            verification_failures_total,
            archive_size_bytes,
            retention_deletions_total,
            retention_failures_total,
            registry,
        })
    }

    /// Get or initialize the global metrics instance
    pub fn global() -> Option<&'static ArchivistMetrics> {
        METRICS
            .get_or_init(|| match Self::new() {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    tracing::warn!(error = %e, "Metrics disabled");
                    None
                }
            })
            .as_ref()
    }

    pub fn record_archive_size(&self, size_bytes: u64) {
        self.archive_size_bytes.observe(size_bytes as f64);
    }

    pub fn record_verification(&self, passed: bool) {
        self.verifications_total.inc();
        if !passed {
            self.verification_failures_total.inc();
        }
    }

    pub fn record_retention(&self, deleted: usize, failed: usize) {
        self.retention_deletions_total.inc_by(deleted as f64);
        self.retention_failures_total.inc_by(failed as f64);
    }

    fn record_start(&self, operation: Operation) {
        match operation {
            Operation::Backup => self.backups_total.inc(),
            Operation::Restore => self.restores_total.inc(),
            Operation::Verify => {}
        }
    }

    fn record_finish(&self, operation: Operation, elapsed: std::time::Duration, failed: bool) {
        match operation {
            Operation::Backup => {
                self.backup_latency_seconds.observe(elapsed.as_secs_f64());
                if failed {
                    self.backup_failures_total.inc();
                }
            }
            Operation::Restore => {
                self.restore_latency_seconds.observe(elapsed.as_secs_f64());
                if failed {
                    self.restore_failures_total.inc();
                }
            }
            Operation::Verify => self.record_verification(!failed),
        }
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| ArchivistError::config(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| ArchivistError::config(format!("Failed to convert metrics to string: {e}")))
    }
}

/// Measures one operation from start to finish
#[cfg(feature = "metrics")]
pub struct OperationTimer {
    start: Instant,
    operation: Operation,
}

#[cfg(feature = "metrics")]
impl OperationTimer {
    pub fn start(operation: Operation) -> Self {
        if let Some(metrics) = ArchivistMetrics::global() {
            metrics.record_start(operation);
        }
        Self {
            start: Instant::now(),
            operation,
        }
    }

    /// Record latency and, for `Err`, a failure
    pub fn finish<T>(self, outcome: &Result<T>) {
        if let Some(metrics) = ArchivistMetrics::global() {
            metrics.record_finish(self.operation, self.start.elapsed(), outcome.is_err());
        }
    }
}

/// Install the global tracing subscriber
///
/// `json` selects the JSON formatter; otherwise the human-readable one is
/// used. The filter honours `RUST_LOG` and defaults the crate to `info`.
pub fn init_observability(json: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    ArchivistMetrics::global();

    let directive = "archivist_core=info"
        .parse::<Directive>()
        .map_err(|e| ArchivistError::config(format!("Invalid log directive: {e}")))?;
    let filter = EnvFilter::from_default_env().add_directive(directive);

    let result = if json {
        let subscriber = TracingRegistry::default().with(filter).with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(false)
                .with_current_span(false),
        );
        set_global_default(subscriber)
    } else {
        let subscriber = TracingRegistry::default()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false));
        set_global_default(subscriber)
    };
    result.map_err(|e| ArchivistError::config(format!("Failed to set global tracing subscriber: {e}")))?;

    tracing::info!("Archivist observability initialized");
    Ok(())
}

/// Initialize observability with JSON logs
pub fn init_default_observability() -> Result<()> {
    init_observability(true)
}
