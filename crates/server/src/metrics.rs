//! Prometheus metrics.
//!
//! HTTP traffic and auth failures are recorded by middleware; ticket
//! counters by the ticket handlers. `tickets_by_status` is refreshed from the
//! store on every scrape.

use axum::extract::MatchedPath;
use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};

use helpdesk_core::{Status, TicketFilter};

use crate::state::AppState;

pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// HTTP

pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "helpdesk_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("helpdesk_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "helpdesk_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

pub static AUTH_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("helpdesk_auth_failures_total", "Total authentication failures"),
        &["reason"],
    )
    .unwrap()
});

// Tickets

pub static TICKETS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("helpdesk_tickets_by_status", "Current ticket count by status"),
        &["status"],
    )
    .unwrap()
});

pub static TICKETS_CREATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "helpdesk_tickets_created_total",
        "Total tickets created since startup",
    )
    .unwrap()
});

pub static TICKET_STATUS_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "helpdesk_ticket_status_transitions_total",
            "Ticket status changes",
        ),
        &["from_status", "to_status"],
    )
    .unwrap()
});

pub static COMMENTS_ADDED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "helpdesk_comments_added_total",
        "Total comments added since startup",
    )
    .unwrap()
});

/// Writes rejected because the ticket changed since the caller read it.
pub static CONCURRENCY_CONFLICTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "helpdesk_concurrency_conflicts_total",
        "Ticket writes rejected due to a stale version",
    )
    .unwrap()
});

fn register_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(HTTP_REQUEST_DURATION.clone()),
        Box::new(HTTP_REQUESTS_TOTAL.clone()),
        Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()),
        Box::new(AUTH_FAILURES_TOTAL.clone()),
        Box::new(TICKETS_BY_STATUS.clone()),
        Box::new(TICKETS_CREATED_TOTAL.clone()),
        Box::new(TICKET_STATUS_TRANSITIONS.clone()),
        Box::new(COMMENTS_ADDED_TOTAL.clone()),
        Box::new(CONCURRENCY_CONFLICTS_TOTAL.clone()),
    ];

    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            tracing::error!("Failed to register metric: {}", e);
        }
    }
}

/// Encode all metrics in the Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Refresh gauges that mirror stored state.
pub fn collect_dynamic_metrics(state: &AppState) {
    let store = state.tickets().store();
    for status in Status::ALL {
        let filter = TicketFilter::new().with_status(status.as_str());
        match store.count(&filter) {
            Ok(count) => TICKETS_BY_STATUS
                .with_label_values(&[status.as_str()])
                .set(count),
            Err(e) => tracing::warn!("Failed to count {} tickets: {}", status, e),
        }
    }
}

/// Label for requests that matched no route.
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// The route template (`/api/v1/tickets/{id}`) a request was dispatched to.
///
/// Raw request paths are never used as labels.
pub fn route_label(matched: Option<&MatchedPath>) -> &str {
    matched.map_or(UNMATCHED_ROUTE, MatchedPath::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_label_without_match() {
        assert_eq!(route_label(None), "unmatched");
    }

    #[test]
    fn test_encode_metrics() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();
        TICKETS_CREATED_TOTAL.inc();
        TICKETS_BY_STATUS.with_label_values(&["Open"]).set(0);

        let output = encode_metrics().unwrap();
        assert!(output.contains("# HELP"));
        assert!(output.contains("helpdesk_http_requests_total"));
        assert!(output.contains("helpdesk_tickets_created_total"));
        assert!(output.contains("helpdesk_tickets_by_status"));
    }
}
