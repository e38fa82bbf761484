use std::path::PathBuf;
use std::sync::Arc;

/// Structured, in-process event hook for observability.
///
/// This crate is a library; emitting logs directly (e.g. `println!`) is not acceptable for
/// production. Instead, callers can provide an implementation that forwards these events to
/// `tracing`, `log`, metrics, or custom sinks.
pub trait DbEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: DbEvent);
}

/// Structured events emitted by the read path.
#[derive(Debug, Clone)]
pub enum DbEvent {
    BlockOpened {
        path: PathBuf,
        series: u64,
        fields: usize,
    },
    BlockRejected {
        path: PathBuf,
        error: String,
    },

    /// A walk or suggestion skipped one source whose tag-key block failed to decode.
    TagEntryDecodeSkipped {
        tag_key_id: u32,
        error: String,
    },

    ScanCancelled {
        path: PathBuf,
        scanned_series: usize,
    },
}

#[derive(Debug)]
pub struct NoopEventListener;

impl DbEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: DbEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn DbEventListener> {
    Arc::new(NoopEventListener)
}

/// Read-path counters.
///
/// Emitting is effectively a no-op until a recorder is installed, so the library stays quiet
/// for callers that do not scrape.
pub mod read_metrics {
    use ::metrics::{describe_counter, Unit};

    #[cfg(feature = "prometheus")]
    use std::sync::atomic::{AtomicBool, Ordering};
    #[cfg(feature = "prometheus")]
    use std::sync::{Arc, Mutex};
    #[cfg(feature = "prometheus")]
    use std::thread::JoinHandle;
    #[cfg(feature = "prometheus")]
    use std::time::Duration;

    #[cfg(feature = "prometheus")]
    use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

    // Counters are exposed as `<name>_total` by the Prometheus exporter.
    pub const BLOCKS_OPENED: &str = "ugnos_blocks_opened";
    pub const BLOCK_OPEN_FAILURES: &str = "ugnos_block_open_failures";
    pub const SERIES_SCANNED: &str = "ugnos_series_scanned";
    pub const VALUES_DECODED: &str = "ugnos_values_decoded";
    pub const TAG_VALUE_LOOKUPS: &str = "ugnos_tag_value_lookups";
    pub const TAG_ENTRY_DECODE_SKIPS: &str = "ugnos_tag_entry_decode_skips";
    pub const MERGE_PROBES: &str = "ugnos_merge_probes";

    /// Handle to the in-process Prometheus recorder/scrape renderer.
    ///
    /// This does **not** start an HTTP server. Call [`InProcessPrometheus::render`] to scrape.
    #[cfg(feature = "prometheus")]
    #[derive(Debug)]
    pub struct InProcessPrometheus {
        handle: PrometheusHandle,
        stop: Arc<AtomicBool>,
        upkeep_thread: Mutex<Option<JoinHandle<()>>>,
    }

    #[cfg(feature = "prometheus")]
    impl InProcessPrometheus {
        /// Installs a global Prometheus recorder (once per process) and starts a small upkeep
        /// thread.
        pub fn install(upkeep_interval: Duration) -> Result<Self, MetricsInitError> {
            describe_all();

            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(MetricsInitError::from_build_error)?;

            let stop = Arc::new(AtomicBool::new(false));
            let stop_clone = stop.clone();
            let handle_clone = handle.clone();
            let upkeep_thread = std::thread::Builder::new()
                .name("ugnos-blocks-metrics-upkeep".to_string())
                .spawn(move || {
                    while !stop_clone.load(Ordering::Relaxed) {
                        std::thread::sleep(upkeep_interval);
                        handle_clone.run_upkeep();
                    }
                })
                .map_err(|e| MetricsInitError::ThreadSpawn(e.to_string()))?;

            Ok(Self {
                handle,
                stop,
                upkeep_thread: Mutex::new(Some(upkeep_thread)),
            })
        }

        /// Renders the current metrics in the Prometheus text exposition format.
        pub fn render(&self) -> String {
            self.handle.render()
        }
    }

    #[cfg(feature = "prometheus")]
    impl Drop for InProcessPrometheus {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Relaxed);
            if let Ok(mut guard) = self.upkeep_thread.lock() {
                if let Some(t) = guard.take() {
                    let _ = t.join();
                }
            }
        }
    }

    #[cfg(feature = "prometheus")]
    #[derive(Debug, thiserror::Error)]
    pub enum MetricsInitError {
        #[error("metrics recorder already installed")]
        AlreadyInstalled,
        #[error("failed to install prometheus recorder: {0}")]
        Install(String),
        #[error("failed to spawn upkeep thread: {0}")]
        ThreadSpawn(String),
    }

    #[cfg(feature = "prometheus")]
    impl MetricsInitError {
        fn from_build_error(e: BuildError) -> Self {
            match e {
                BuildError::FailedToSetGlobalRecorder(_) => MetricsInitError::AlreadyInstalled,
                other => MetricsInitError::Install(other.to_string()),
            }
        }
    }

    #[inline]
    pub fn record_block_opened() {
        ::metrics::counter!(BLOCKS_OPENED).increment(1);
    }

    #[inline]
    pub fn record_block_open_failure() {
        ::metrics::counter!(BLOCK_OPEN_FAILURES).increment(1);
    }

    #[inline]
    pub fn record_scan(series: u64, values: u64) {
        if series > 0 {
            ::metrics::counter!(SERIES_SCANNED).increment(series);
        }
        if values > 0 {
            ::metrics::counter!(VALUES_DECODED).increment(values);
        }
    }

    #[inline]
    pub fn record_tag_value_lookup() {
        ::metrics::counter!(TAG_VALUE_LOOKUPS).increment(1);
    }

    #[inline]
    pub fn record_tag_entry_decode_skip() {
        ::metrics::counter!(TAG_ENTRY_DECODE_SKIPS).increment(1);
    }

    #[inline]
    pub fn record_merge_probe() {
        ::metrics::counter!(MERGE_PROBES).increment(1);
    }

    /// Registers descriptions with whatever recorder is installed.
    pub fn describe_all() {
        describe_counter!(
            BLOCKS_OPENED,
            Unit::Count,
            "Metric blocks whose footer, catalogue and series ids decoded successfully."
        );
        describe_counter!(
            BLOCK_OPEN_FAILURES,
            Unit::Count,
            "Metric blocks rejected on open as structurally corrupt."
        );
        describe_counter!(
            SERIES_SCANNED,
            Unit::Count,
            "Series whose data region was decoded by a query scanner."
        );
        describe_counter!(
            VALUES_DECODED,
            Unit::Count,
            "Field values appended into aggregation sinks."
        );
        describe_counter!(
            TAG_VALUE_LOOKUPS,
            Unit::Count,
            "Predicate lookups served by the tag value index reader."
        );
        describe_counter!(
            TAG_ENTRY_DECODE_SKIPS,
            Unit::Count,
            "Tag-key blocks skipped by best-effort walks after a decode failure."
        );
        describe_counter!(
            MERGE_PROBES,
            Unit::Count,
            "Merge scanner probes that resolved a series data offset."
        );
    }
}
