use shared::metrics_defs::{MetricDef, MetricType};

pub const RECONCILE_DURATION: MetricDef = MetricDef {
    name: "reconciler.reconcile.duration",
    metric_type: MetricType::Histogram,
    description: "Receiver reconcile duration in seconds. Tagged with outcome.",
};

pub const REGISTERED_RECEIVERS: MetricDef = MetricDef {
    name: "reconciler.receivers.registered",
    metric_type: MetricType::Gauge,
    description: "Receivers currently registered on the proxy.",
};

pub const ALL_METRICS: &[MetricDef] = &[RECONCILE_DURATION, REGISTERED_RECEIVERS];
