use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub order_transitions_total: IntCounterVec,
    pub payment_events_total: IntCounterVec,
    pub assignments_total: IntCounterVec,
    pub assignment_latency_seconds: HistogramVec,
    pub side_effects_in_queue: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let order_transitions_total = IntCounterVec::new(
            Opts::new("order_transitions_total", "Committed order status transitions"),
            &["from", "to"],
        )
        .expect("valid order_transitions_total metric");

        let payment_events_total = IntCounterVec::new(
            Opts::new("payment_events_total", "Payment webhook events by outcome"),
            &["outcome"],
        )
        .expect("valid payment_events_total metric");

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Assignment attempts by mode and outcome"),
            &["mode", "outcome"],
        )
        .expect("valid assignments_total metric");

        let assignment_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of assignment attempts in seconds",
            ),
            &["mode"],
        )
        .expect("valid assignment_latency_seconds metric");

        let side_effects_in_queue = IntGauge::new(
            "side_effects_in_queue",
            "Side effects waiting for the background worker",
        )
        .expect("valid side_effects_in_queue metric");

        registry
            .register(Box::new(order_transitions_total.clone()))
            .expect("register order_transitions_total");
        registry
            .register(Box::new(payment_events_total.clone()))
            .expect("register payment_events_total");
        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(assignment_latency_seconds.clone()))
            .expect("register assignment_latency_seconds");
        registry
            .register(Box::new(side_effects_in_queue.clone()))
            .expect("register side_effects_in_queue");

        Self {
            registry,
            order_transitions_total,
            payment_events_total,
            assignments_total,
            assignment_latency_seconds,
            side_effects_in_queue,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
