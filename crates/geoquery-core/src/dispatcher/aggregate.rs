//! Re-aggregation of per-tile statistics into one task result.
//!
//! Continuous metrics are averaged weighted by tile area; categorical
//! metrics are summed weighted by pixel count and normalised to 100.

use std::collections::BTreeMap;

use geoquery_collab::MetricValue;

/// Statistics from one successful tile call.
#[derive(Debug, Clone, Copy)]
pub struct TileSample<'a> {
    pub area_km2: f64,
    /// Backend-reported pixel count, else the tile's estimate.
    pub pixels: u64,
    pub statistics: &'a BTreeMap<String, MetricValue>,
}

enum Accumulator {
    Continuous { weighted: f64, weight: f64, plain: f64, n: usize },
    Categorical { weighted: BTreeMap<String, f64>, plain: BTreeMap<String, f64> },
}

impl Accumulator {
    fn for_value(value: &MetricValue) -> Self {
        match value {
            MetricValue::Continuous(_) => Accumulator::Continuous {
                weighted: 0.0,
                weight: 0.0,
                plain: 0.0,
                n: 0,
            },
            MetricValue::Categorical(_) => Accumulator::Categorical {
                weighted: BTreeMap::new(),
                plain: BTreeMap::new(),
            },
        }
    }

    /// Values whose kind disagrees with the first sample are ignored.
    fn add(&mut self, value: &MetricValue, area_km2: f64, pixels: u64) {
        match (self, value) {
            (Accumulator::Continuous { weighted, weight, plain, n }, MetricValue::Continuous(v)) => {
                if !v.is_finite() {
                    return;
                }
                let w = if area_km2.is_finite() && area_km2 > 0.0 {
                    area_km2
                } else {
                    0.0
                };
                *weighted += v * w;
                *weight += w;
                *plain += v;
                *n += 1;
            }
            (Accumulator::Categorical { weighted, plain }, MetricValue::Categorical(classes)) => {
                for (class, share) in classes {
                    if !share.is_finite() {
                        continue;
                    }
                    *weighted.entry(class.clone()).or_insert(0.0) += share * pixels as f64;
                    *plain.entry(class.clone()).or_insert(0.0) += share;
                }
            }
            _ => {}
        }
    }

    fn finish(self) -> Option<MetricValue> {
        match self {
            Accumulator::Continuous { weighted, weight, plain, n } => {
                if n == 0 {
                    None
                } else if weight > 0.0 {
                    Some(MetricValue::Continuous(weighted / weight))
                } else {
                    Some(MetricValue::Continuous(plain / n as f64))
                }
            }
            Accumulator::Categorical { weighted, plain } => {
                let totals = if weighted.values().sum::<f64>() > 0.0 {
                    weighted
                } else {
                    plain
                };
                let sum: f64 = totals.values().sum();
                if sum <= 0.0 {
                    return None;
                }
                Some(MetricValue::Categorical(
                    totals
                        .into_iter()
                        .map(|(class, v)| (class, v / sum * 100.0))
                        .collect(),
                ))
            }
        }
    }
}

/// Combine tile statistics metric by metric.
pub fn aggregate(samples: &[TileSample<'_>]) -> BTreeMap<String, MetricValue> {
    let mut accumulators: BTreeMap<&str, Accumulator> = BTreeMap::new();
    for sample in samples {
        for (name, value) in sample.statistics {
            accumulators
                .entry(name.as_str())
                .or_insert_with(|| Accumulator::for_value(value))
                .add(value, sample.area_km2, sample.pixels);
        }
    }
    accumulators
        .into_iter()
        .filter_map(|(name, acc)| acc.finish().map(|v| (name.to_string(), v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn continuous(name: &str, v: f64) -> BTreeMap<String, MetricValue> {
        BTreeMap::from([(name.to_string(), MetricValue::Continuous(v))])
    }

    fn classes(pairs: &[(&str, f64)]) -> BTreeMap<String, MetricValue> {
        BTreeMap::from([(
            "land_cover".to_string(),
            MetricValue::Categorical(pairs.iter().map(|(c, v)| (c.to_string(), *v)).collect()),
        )])
    }

    #[test]
    fn continuous_metrics_are_area_weighted() {
        let a = continuous("ndvi", 0.2);
        let b = continuous("ndvi", 0.8);
        let out = aggregate(&[
            TileSample { area_km2: 300.0, pixels: 1, statistics: &a },
            TileSample { area_km2: 100.0, pixels: 1, statistics: &b },
        ]);
        let v = out["ndvi"].as_continuous().unwrap();
        assert!((v - 0.35).abs() < 1e-12);
    }

    #[test]
    fn zero_weights_fall_back_to_plain_mean() {
        let a = continuous("ndvi", 0.2);
        let b = continuous("ndvi", 0.6);
        let out = aggregate(&[
            TileSample { area_km2: 0.0, pixels: 0, statistics: &a },
            TileSample { area_km2: 0.0, pixels: 0, statistics: &b },
        ]);
        assert!((out["ndvi"].as_continuous().unwrap() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn categorical_metrics_are_pixel_weighted_and_normalised() {
        let a = classes(&[("forest", 100.0)]);
        let b = classes(&[("forest", 50.0), ("urban", 50.0)]);
        let out = aggregate(&[
            TileSample { area_km2: 1.0, pixels: 300, statistics: &a },
            TileSample { area_km2: 1.0, pixels: 100, statistics: &b },
        ]);
        let shares = out["land_cover"].as_categorical().unwrap();
        // forest: 300*100 + 100*50 = 35_000; urban: 5_000
        assert!((shares["forest"] - 87.5).abs() < 1e-9);
        assert!((shares["urban"] - 12.5).abs() < 1e-9);
        assert!((shares.values().sum::<f64>() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn mismatched_kinds_and_non_finite_values_are_ignored() {
        let a = continuous("ndvi", 0.5);
        let mut b = classes(&[("forest", 100.0)]);
        b.insert("ndvi".into(), MetricValue::Categorical(BTreeMap::new()));
        let c = continuous("ndvi", f64::NAN);
        let out = aggregate(&[
            TileSample { area_km2: 1.0, pixels: 1, statistics: &a },
            TileSample { area_km2: 1.0, pixels: 1, statistics: &b },
            TileSample { area_km2: 1.0, pixels: 1, statistics: &c },
        ]);
        assert_eq!(out["ndvi"].as_continuous(), Some(0.5));
        assert!(out.contains_key("land_cover"));
    }

    #[test]
    fn no_samples_no_statistics() {
        assert!(aggregate(&[]).is_empty());
    }
}
