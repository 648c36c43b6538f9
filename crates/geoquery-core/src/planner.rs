//! Query intent -> ordered AnalysisTasks.
//!
//! Planning never fails. Capabilities are scored by keyword hits in the query
//! text plus any intent signals from an upstream classifier; the best
//! `max_capabilities_per_region` are planned for every Region, region-major.
//! When nothing matches, each Region gets one `generic` task.

use std::sync::{Arc, OnceLock};

use geoquery_collab::{Capability, TaskParameters};
use regex::Regex;
use serde_json::json;
use tracing::{debug, instrument};

use crate::config::{PlannerConfig, TilingConfig};
use crate::domain::{AnalysisTask, EvidenceLog, Plan, Query, Region, TaskId};

const STAGE: &str = "planner";

const KEYWORDS: &[(Capability, &[&str])] = &[
    (
        Capability::Vegetation,
        &[
            "vegetation", "ndvi", "evi", "greenness", "green", "crops?", "forests?", "plants?",
            "canopy", "agricultur\\w*",
        ],
    ),
    (
        Capability::LandCover,
        &[
            "land[\\s-]cover", "land[\\s-]use", "urban\\w*", "built[\\s-]up", "deforestation",
            "cropland", "settlements?",
        ],
    ),
    (
        Capability::Water,
        &[
            "water", "floods?", "flooding", "lakes?", "rivers?", "wetlands?", "ndwi",
            "reservoirs?", "drought",
        ],
    ),
    (
        Capability::Temperature,
        &[
            "temperature", "heat", "thermal", "lst", "hot", "cold", "warming",
        ],
    ),
];

struct KeywordRule {
    capability: Capability,
    pattern: Regex,
}

fn rules() -> &'static [KeywordRule] {
    static RULES: OnceLock<Vec<KeywordRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        KEYWORDS
            .iter()
            .filter_map(|(capability, words)| {
                let pattern = format!(r"(?i)\b(?:{})\b", words.join("|"));
                Regex::new(&pattern).ok().map(|pattern| KeywordRule {
                    capability: *capability,
                    pattern,
                })
            })
            .collect()
    })
}

fn year_range() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:from\s+|between\s+)?((?:19|20)\d{2})\s*(?:-|–|to|and|until)\s*((?:19|20)\d{2})\b").ok()
    })
    .as_ref()
}

fn single_year() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:in|during|for|of|since)\s+((?:19|20)\d{2})\b").ok())
        .as_ref()
}

/// Keyword score per capability, in priority order.
pub fn score_capabilities(text: &str) -> Vec<(Capability, usize)> {
    rules()
        .iter()
        .map(|rule| (rule.capability, rule.pattern.find_iter(text).count()))
        .collect()
}

/// `year`, or `start_year`/`end_year`, mentioned in the query text.
pub fn temporal_parameters(text: &str) -> TaskParameters {
    let mut params = TaskParameters::new();
    if let Some(caps) = year_range().and_then(|re| re.captures(text)) {
        let start = caps.get(1).and_then(|m| m.as_str().parse::<i64>().ok());
        let end = caps.get(2).and_then(|m| m.as_str().parse::<i64>().ok());
        if let (Some(start), Some(end)) = (start, end) {
            let (start, end) = if start <= end { (start, end) } else { (end, start) };
            params.insert("start_year".into(), json!(start));
            params.insert("end_year".into(), json!(end));
            return params;
        }
    }
    if let Some(year) = single_year()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
    {
        params.insert("year".into(), json!(year));
    }
    params
}

pub struct Planner {
    config: PlannerConfig,
    scale_m: f64,
}

impl Planner {
    pub fn new(config: PlannerConfig, tiling: &TilingConfig) -> Self {
        Self {
            config,
            scale_m: tiling.scale_m,
        }
    }

    /// Build the plan for `regions`.
    ///
    /// `signals` are capability names from an upstream intent classifier;
    /// each recognised signal adds one to its capability's score, unknown
    /// names are rejected and recorded.
    #[instrument(skip_all, fields(request_id = %query.request_id(), regions = regions.len()))]
    pub fn plan(
        &self,
        query: &Query,
        regions: &[Arc<Region>],
        signals: &[String],
        evidence: &EvidenceLog,
    ) -> Plan {
        let mut scores = score_capabilities(query.text());
        for signal in signals {
            match signal.parse::<Capability>() {
                Ok(capability) => {
                    if let Some(entry) = scores.iter_mut().find(|(c, _)| *c == capability) {
                        entry.1 += 1;
                    } else {
                        scores.push((capability, 1));
                    }
                }
                Err(err) => {
                    debug!(signal = %err.name, "unknown intent signal");
                    evidence.record(STAGE, format!("rejected-capability:{}", err.name));
                }
            }
        }

        // Stable sort keeps priority order among equal scores.
        scores.retain(|(_, score)| *score > 0);
        scores.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.priority().cmp(&b.0.priority())));
        let mut chosen: Vec<Capability> = scores
            .into_iter()
            .take(self.config.max_capabilities_per_region)
            .map(|(c, _)| c)
            .collect();

        if chosen.is_empty() && !regions.is_empty() {
            evidence.record(STAGE, "default-generic");
            chosen.push(Capability::Generic);
        }

        let mut parameters = temporal_parameters(query.text());
        parameters.insert("scale_m".into(), json!(self.scale_m));

        let mut tasks = Vec::with_capacity(regions.len() * chosen.len());
        for region in regions {
            for capability in &chosen {
                tasks.push(AnalysisTask {
                    id: TaskId(tasks.len()),
                    capability: *capability,
                    region: Arc::clone(region),
                    parameters: parameters.clone(),
                });
            }
        }

        evidence.record(STAGE, format!("planned:{}-tasks", tasks.len()));
        Plan { tasks }
    }
}
