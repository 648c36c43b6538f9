//! Plain-text `analysis` for a Response.

use std::fmt::Write as _;

use geoquery_collab::MetricValue;

use crate::domain::{BackendUsed, Region, RegionSource, TaskResult, TaskStatus, COMPLETENESS_METRIC};

pub const NO_LOCATION: &str = "No location was found in the query, so no analysis was run. \
Mention a place such as a city, region or country to analyse it.";

/// One paragraph per task result, then caveats for approximate regions.
pub fn render(regions: &[Region], results: &[TaskResult]) -> String {
    if regions.is_empty() {
        return NO_LOCATION.to_string();
    }

    let mut paragraphs: Vec<String> = results.iter().map(paragraph).collect();

    if results.is_empty() {
        paragraphs.push("No analysis was planned for the resolved locations.".to_string());
    }

    for region in regions {
        if region.source == RegionSource::FallbackApproximate {
            paragraphs.push(format!(
                "Note: the boundary of {} is approximate ({}), so results describe an estimated area.",
                region.name,
                region.geometry.kind()
            ));
        }
    }

    paragraphs.join("\n\n")
}

fn paragraph(result: &TaskResult) -> String {
    let label = result.capability.label();
    let region = &result.region_name;
    match (result.status, result.backend_used) {
        (TaskStatus::Failed, _) => format!(
            "{label} for {region} could not be computed: {}.",
            result.error.as_deref().unwrap_or("unknown error")
        ),
        (_, BackendUsed::Fallback) => {
            let mut text = format!(
                "{label} for {region} (summarised from text search by {}): {}",
                result.backend_name.as_deref().unwrap_or("fallback"),
                result.narrative.as_deref().unwrap_or("").trim()
            );
            if !result.sources.is_empty() {
                let _ = write!(text, " Sources: {}.", result.sources.join(", "));
            }
            text
        }
        _ => {
            let metrics: Vec<String> = result
                .statistics
                .iter()
                .filter(|(name, _)| name.as_str() != COMPLETENESS_METRIC)
                .map(|(name, value)| format_metric(name, value))
                .collect();
            let mut text = if metrics.is_empty() {
                format!("{label} for {region}: the backend returned no statistics.")
            } else {
                format!("{label} for {region}: {}.", metrics.join("; "))
            };
            if result.status == TaskStatus::Partial {
                let pct = result.completeness().unwrap_or(0.0) * 100.0;
                let _ = write!(
                    text,
                    " Based on {} of {} tiles ({pct:.0}% complete).",
                    result.tiles_succeeded, result.tiles_total
                );
            }
            text
        }
    }
}

fn format_metric(name: &str, value: &MetricValue) -> String {
    match value {
        MetricValue::Continuous(v) => format!("{name} = {v:.3}"),
        MetricValue::Categorical(classes) => {
            let mut shares: Vec<(&String, &f64)> = classes.iter().collect();
            shares.sort_by(|a, b| b.1.total_cmp(a.1).then_with(|| a.0.cmp(b.0)));
            let rendered: Vec<String> = shares
                .into_iter()
                .map(|(class, share)| format!("{class} {share:.1}%"))
                .collect();
            format!("{name}: {}", rendered.join(", "))
        }
    }
}
