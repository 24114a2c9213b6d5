use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "proxy.request.duration",
    metric_type: MetricType::Histogram,
    description: "Fan-out request duration in seconds. Tagged with response_type, status.",
};

pub const CLONE_REQUESTS: MetricDef = MetricDef {
    name: "proxy.clone.requests",
    metric_type: MetricType::Counter,
    description: "Clone requests dispatched to upstream targets. Tagged with outcome.",
};

pub const IN_FLIGHT_FANOUTS: MetricDef = MetricDef {
    name: "proxy.fanout.inflight",
    metric_type: MetricType::Gauge,
    description: "Clone workers currently in flight.",
};

pub const ALL_METRICS: &[MetricDef] = &[REQUEST_DURATION, CLONE_REQUESTS, IN_FLIGHT_FANOUTS];
