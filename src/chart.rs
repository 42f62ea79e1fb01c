use serde::Serialize;

pub const TOP_K: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartRow {
    pub label: String,
    pub probability: f32,
}

/// Pairs each label with its confidence as a percentage (2 decimals),
/// ranked descending, truncated to `limit` rows.
pub fn top_rows(labels: &[String], confidences: &[f32], limit: usize) -> Vec<ChartRow> {
    let mut rows: Vec<ChartRow> = labels
        .iter()
        .zip(confidences)
        .map(|(label, &conf)| ChartRow {
            label: label.clone(),
            probability: (conf * 10_000.0).round() / 100.0,
        })
        .collect();

    rows.sort_by(|a, b| {
        b.probability
            .partial_cmp(&a.probability)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rows.truncate(limit);
    rows
}

pub fn render_bar(row: &ChartRow, width: usize) -> String {
    let filled = ((row.probability / 100.0) * width as f32).round() as usize;
    let filled = filled.min(width);
    format!(
        "{:<16} {}{} {:>6.2}%",
        row.label,
        "█".repeat(filled),
        "░".repeat(width - filled),
        row.probability
    )
}
