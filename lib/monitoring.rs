use crate::build_info;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use prometheus_client::registry::Registry;

/// Registers immutable build metadata as a labeled gauge with value `1`.
fn register_build_info_metric(registry: &mut Registry, prefix: &str) {
    let build_info_metric = Family::<BuildInfoLabels, Gauge>::default();
    build_info_metric
        .get_or_create(&BuildInfoLabels {
            service: "history_ingest",
            version: build_info::VERSION,
            commit: build_info::short_commit_hash(),
        })
        .set(1);
    let sub_registry = registry.sub_registry_with_prefix(prefix);
    sub_registry.register(
        "build_info",
        "Build identity labels for this process",
        build_info_metric,
    );
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BuildInfoLabels {
    service: &'static str,
    version: &'static str,
    commit: &'static str,
}

/// Counters and gauges updated by the ingestion Scheduler.
///
/// `Default` yields unregistered metrics, so a Scheduler built without a registry still records
/// into them harmlessly.
#[derive(Clone, Debug, Default)]
pub struct IngestMetrics {
    /// Ticks that reached the range computation (excludes in-progress skips).
    pub ticks_total: Counter,
    /// Ticks skipped because a session already held the slot.
    pub ticks_skipped_total: Counter,
    /// Chain continuity failures detected before a forward session.
    pub chain_gaps_total: Counter,
    /// Sessions that ended with an error, forward or reingest.
    pub session_failures_total: Counter,
    /// Panics contained at the tick boundary.
    pub faults_total: Counter,
    /// Ledgers written by successful and partially successful sessions.
    pub ledgers_ingested_total: Counter,
    /// Reingestion sessions started.
    pub reingest_ranges_total: Counter,
    /// 1 while a forward session holds the slot, else 0.
    pub session_active: Gauge,
}

impl IngestMetrics {
    /// Registers every ingest metric, plus the build-info gauge, under `prefix`.
    pub fn register(registry: &mut Registry, prefix: &str) -> Self {
        register_build_info_metric(registry, prefix);
        let metrics = Self::default();
        let sub_registry = registry.sub_registry_with_prefix(prefix);
        sub_registry.register(
            "ticks",
            "Total number of ingestion ticks evaluated",
            metrics.ticks_total.clone(),
        );
        sub_registry.register(
            "ticks_skipped",
            "Total number of ticks skipped because a session was already in progress",
            metrics.ticks_skipped_total.clone(),
        );
        sub_registry.register(
            "chain_gaps",
            "Total number of ledger chain gaps detected before ingestion",
            metrics.chain_gaps_total.clone(),
        );
        sub_registry.register(
            "session_failures",
            "Total number of ingestion sessions that ended with an error",
            metrics.session_failures_total.clone(),
        );
        sub_registry.register(
            "faults",
            "Total number of internal faults contained at the tick boundary",
            metrics.faults_total.clone(),
        );
        sub_registry.register(
            "ledgers_ingested",
            "Total number of ledgers written to history",
            metrics.ledgers_ingested_total.clone(),
        );
        sub_registry.register(
            "reingest_ranges",
            "Total number of reingestion sessions started",
            metrics.reingest_ranges_total.clone(),
        );
        sub_registry.register(
            "session_active",
            "Forward session slot state (1 occupied, 0 idle)",
            metrics.session_active.clone(),
        );
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::{register_build_info_metric, IngestMetrics};
    use crate::build_info;
    use prometheus_client::{encoding::text::encode, registry::Registry};

    #[test]
    fn build_info_metric_contains_version_and_commit_labels() {
        let mut registry = Registry::default();
        register_build_info_metric(&mut registry, "ingest");

        let mut encoded = String::new();
        encode(&mut encoded, &registry).expect("failed to encode metrics");

        assert!(encoded.contains("ingest_build_info"));
        assert!(encoded.contains(&format!("version=\"{}\"", build_info::VERSION)));
    }

    #[test]
    fn ingest_metrics_are_exposed_under_prefix() {
        let mut registry = Registry::default();
        let metrics = IngestMetrics::register(&mut registry, "ingest");
        metrics.ledgers_ingested_total.inc_by(5);

        let mut encoded = String::new();
        encode(&mut encoded, &registry).expect("failed to encode metrics");

        assert!(encoded.contains("ingest_ledgers_ingested_total 5"));
        assert!(encoded.contains("ingest_build_info"));
        assert!(encoded.contains("ingest_session_active"));
    }
}
