//! Metric catalog types.
//!
//! Every crate declares its metrics as `MetricDef` constants so the CLI can
//! render them into the workspace metrics catalog.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

impl MetricType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "Counter",
            MetricType::Gauge => "Gauge",
            MetricType::Histogram => "Histogram",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

impl MetricDef {
    pub fn markdown_row(&self) -> String {
        format!(
            "| `{}` | {} | {} |",
            self.name,
            self.metric_type.as_str(),
            self.description
        )
    }
}

/// Renders a metric catalog as a markdown table for METRICS.md.
pub fn markdown_table(metrics: &[MetricDef]) -> String {
    let mut lines = vec![
        "| Metric | Type | Description |".to_string(),
        "|--------|------|-------------|".to_string(),
    ];
    lines.extend(metrics.iter().map(MetricDef::markdown_row));
    lines.join("\n")
}
