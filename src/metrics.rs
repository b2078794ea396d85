use crate::models::JobStatus;
use tracing::trace;

// Counters go to the installed Prometheus recorder (rendered on /metrics)
// and are mirrored as trace events. Without a recorder the macros are no-ops.

pub fn inc_requests(route: &'static str) {
    ::metrics::counter!("relist_requests_total", "route" => route).increment(1);
    trace!(target: "relist.metrics", route, "requests_total_inc");
}

pub fn item_outcome(session: &str, status: JobStatus, elapsed_ms: u128) {
    ::metrics::counter!("relist_bulk_items_total", "status" => status.as_str()).increment(1);
    ::metrics::histogram!("relist_bulk_item_seconds").record(elapsed_ms as f64 / 1000.0);
    trace!(
        target: "relist.metrics",
        session,
        status = status.as_str(),
        elapsed_ms = elapsed_ms as u64,
        "bulk_item_outcome"
    );
}

pub fn batch_finished(session: &str, processed: usize, total: usize, cancelled: bool) {
    let outcome = if cancelled { "cancelled" } else { "finished" };
    ::metrics::counter!("relist_bulk_batches_total", "outcome" => outcome).increment(1);
    ::metrics::counter!("relist_bulk_listed_total").increment(processed as u64);
    trace!(
        target: "relist.metrics",
        session,
        processed = processed as u64,
        total = total as u64,
        cancelled,
        "bulk_batch_finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn outcomes_reach_the_prometheus_render() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        ::metrics::with_local_recorder(&recorder, || {
            inc_requests("/state");
            item_outcome("s", JobStatus::Listed, 1200);
            item_outcome("s", JobStatus::Failed, 40);
            batch_finished("s", 1, 2, false);
        });
        let rendered = handle.render();
        assert!(rendered.contains(r#"relist_requests_total{route="/state"} 1"#));
        assert!(rendered.contains(r#"relist_bulk_items_total{status="Listed"} 1"#));
        assert!(rendered.contains(r#"relist_bulk_batches_total{outcome="finished"} 1"#));
        assert!(rendered.contains("relist_bulk_listed_total 1"));
    }
}
