//! The metric calculators.
//!
//! Every calculator is a pure function from one or more response slices (and
//! the metric options) to a [MetricResult]. Calculators fail fast on malformed
//! input and never impute or coerce values.

pub mod funnel;
pub mod gabor_granger;
pub mod ipa;
pub mod maxdiff;
pub mod nps;
pub mod perceptual_map;
pub mod scores;
pub mod van_westendorp;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::*;
use crate::store::{ResponseSlice, SliceRow};

pub use funnel::*;
pub use gabor_granger::*;
pub use ipa::*;
pub use maxdiff::*;
pub use nps::*;
pub use perceptual_map::*;
pub use scores::*;
pub use van_westendorp::*;

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Nps,
    Csat,
    MeanScore,
    BrandFunnel,
    ImportancePerformance,
    VanWestendorp,
    GaborGranger,
    MaxDiff,
    PerceptualMap,
}

/// Number of respondents behind a result.
#[derive(PartialEq, Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct Base {
    pub respondents: usize,
    pub weighted: f64,
}

/// The sufficient statistics used to test two results against each other.
#[derive(PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SampleSummary {
    Proportion { hits: f64, n: f64 },
    Mean { n: f64, mean: f64, variance: f64 },
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MetricValue {
    Nps(NpsResult),
    Csat(CsatResult),
    MeanScore(MeanScoreResult),
    BrandFunnel(FunnelResult),
    ImportancePerformance(IpaResult),
    VanWestendorp(PsmResult),
    GaborGranger(DemandCurve),
    MaxDiff(MaxDiffResult),
    PerceptualMap(PerceptualMap),
}

/// A computed metric. Results are never patched: new data means a new result.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct MetricResult {
    pub metric: MetricKind,
    pub questions: Vec<QuestionId>,
    pub wave: Wave,
    pub base: Base,
    /// The respondents behind the result, used to check sample independence.
    #[serde(skip_serializing, default)]
    pub respondents: BTreeSet<RespondentId>,
    pub scale: Option<ScaleSignature>,
    pub sample: Option<SampleSummary>,
    pub value: MetricValue,
    /// Data issues that did not prevent the computation.
    pub flags: Vec<String>,
}

impl MetricResult {
    /// A one-line description of the result for executive summaries.
    pub fn headline(&self) -> String {
        let n = self.base.respondents;
        match &self.value {
            MetricValue::Nps(r) => format!("NPS {:.1} (n={})", r.nps, n),
            MetricValue::Csat(r) => format!(
                "Top-box {:.1}%, mean {:.2} (n={})",
                r.top_box_pct, r.mean, n
            ),
            MetricValue::MeanScore(r) => format!("Mean {:.2} (n={})", r.mean, n),
            MetricValue::BrandFunnel(r) => match r.brands.first() {
                Some(b) => format!(
                    "{} of {} brands; {} awareness {:.1}% (n={})",
                    r.funnel,
                    r.brands.len(),
                    b.brand,
                    b.stages.first().map(|s| s.pct_of_base).unwrap_or(0.0),
                    n
                ),
                None => format!("{}: no brands (n={})", r.funnel, n),
            },
            MetricValue::ImportancePerformance(r) => {
                let focus: Vec<&str> = r
                    .attributes
                    .iter()
                    .filter(|a| a.quadrant == Quadrant::ConcentrateHere)
                    .map(|a| a.attribute.as_str())
                    .collect();
                format!("Concentrate on: {} (n={})", focus.join(", "), n)
            }
            MetricValue::VanWestendorp(r) => match r.acceptable_range {
                Some((lo, hi)) => format!("Acceptable price range {:.2} - {:.2} (n={})", lo, hi, n),
                None => format!("No acceptable price range found (n={})", n),
            },
            MetricValue::GaborGranger(r) => match r.optimal_price {
                Some(p) => format!("Revenue-maximising price {:.2} (n={})", p, n),
                None => format!("No revenue-maximising price (n={})", n),
            },
            MetricValue::MaxDiff(r) => match r.items.first() {
                Some(top) => format!("Most preferred: {} (n={})", top.item, n),
                None => format!("No items (n={})", n),
            },
            MetricValue::PerceptualMap(r) => format!(
                "Map explains {:.1}% + {:.1}% (n={})",
                r.explained[0], r.explained[1], n
            ),
        }
    }
}

// ******** Helpers shared by the calculators *********

pub(crate) fn base_of<'a, I: Iterator<Item = &'a SliceRow>>(rows: I) -> (Base, BTreeSet<RespondentId>) {
    let mut base = Base::default();
    let mut ids = BTreeSet::new();
    for r in rows {
        if ids.insert(r.respondent.clone()) {
            base.respondents += 1;
            base.weighted += r.weight;
        }
    }
    (base, ids)
}

/// Reads a numeric answer. Missing answers are `None`.
pub(crate) fn read_number(question: &QuestionId, row: &SliceRow) -> AnalysisResult<Option<f64>> {
    match &row.answer {
        Answer::Missing => Ok(None),
        Answer::Number(x) if x.is_finite() => Ok(Some(*x)),
        other => UnexpectedAnswerSnafu {
            question: question.clone(),
            respondent: row.respondent.clone(),
            expected: "a number",
            found: other.type_name(),
        }
        .fail(),
    }
}

/// Reads the numeric answers of a slice, checking them against a scale.
pub(crate) fn read_scale_values<'a>(
    slice: &'a ResponseSlice,
    scale: Option<&ScaleSpec>,
) -> AnalysisResult<Vec<(&'a SliceRow, f64)>> {
    let mut res = Vec::new();
    for row in slice.rows.iter() {
        if let Some(x) = read_number(&slice.question, row)? {
            if let Some(s) = scale {
                snafu::ensure!(
                    s.contains(x),
                    InvalidScaleSnafu {
                        question: slice.question.clone(),
                        respondent: row.respondent.clone(),
                        value: x,
                        min: s.min,
                        max: s.max(),
                    }
                );
            }
            res.push((row, x));
        }
    }
    Ok(res)
}

/// Weighted mean and (frequency-weighted, unbiased) variance.
pub(crate) fn weighted_mean_variance(values: &[(f64, f64)]) -> (f64, f64) {
    let total: f64 = values.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return (0.0, 0.0);
    }
    let mean = values.iter().map(|(x, w)| x * w).sum::<f64>() / total;
    let n = values.len() as f64;
    if n < 2.0 {
        return (mean, 0.0);
    }
    let ss: f64 = values.iter().map(|(x, w)| w * (x - mean).powi(2)).sum();
    // Rescale the weights so they sum to the number of respondents.
    let variance = ss * (n / total) / (n - 1.0);
    (mean, variance)
}

pub(crate) fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Median of (value, weight) pairs: the first value at which the cumulative
/// weight reaches half of the total. Reduces to `median` for equal weights.
pub(crate) fn weighted_median(values: &[(f64, f64)]) -> Option<f64> {
    let total: f64 = values.iter().map(|(_, w)| w).sum();
    if values.is_empty() || total <= 0.0 {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
    let half = total / 2.0;
    let mut cumulative = 0.0;
    for (i, (x, w)) in sorted.iter().enumerate() {
        cumulative += w;
        if (cumulative - half).abs() <= 1e-9 * total {
            let next = sorted[i + 1..].iter().find(|(_, w)| *w > 0.0);
            return Some(next.map(|(y, _)| (x + y) / 2.0).unwrap_or(*x));
        }
        if cumulative > half {
            return Some(*x);
        }
    }
    sorted.last().map(|(x, _)| *x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn weighted_median_follows_the_weights() {
        let equal = |xs: &[f64]| xs.iter().map(|x| (*x, 1.0)).collect::<Vec<_>>();
        assert_eq!(weighted_median(&equal(&[3.0, 1.0, 2.0])), Some(2.0));
        assert_eq!(weighted_median(&equal(&[4.0, 1.0, 2.0, 3.0])), Some(2.5));
        assert_eq!(weighted_median(&[(1.0, 1.0), (2.0, 1.0), (5.0, 4.0)]), Some(5.0));
        assert_eq!(weighted_median(&[]), None);
    }

    #[test]
    fn unweighted_variance_is_the_sample_variance() {
        let v: Vec<(f64, f64)> = [1.0, 2.0, 3.0, 4.0, 5.0].iter().map(|x| (*x, 1.0)).collect();
        let (m, var) = weighted_mean_variance(&v);
        assert_eq!(m, 3.0);
        assert!((var - 2.5).abs() < 1e-12);
    }
}
