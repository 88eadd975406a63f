use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::*;
use crate::metrics::*;
use crate::store::{ResponseSlice, SliceRow};

/// The purchase-intent question asked at one price.
#[derive(PartialEq, Debug, Clone)]
pub struct PricePoint {
    pub price: f64,
    pub slice: ResponseSlice,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct DemandPoint {
    pub price: f64,
    /// Calibrated share of the base buying at this price.
    pub demand_pct: f64,
    /// price * demand, per 100 respondents.
    pub revenue: f64,
    /// Revenue relative to the best price point (100).
    pub revenue_index: f64,
    /// Arc elasticity from the previous (lower) price point.
    pub elasticity: Option<f64>,
    pub base: usize,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct DemandCurve {
    pub points: Vec<DemandPoint>,
    pub optimal_price: Option<f64>,
    /// Prices at which aggregate demand rises above the demand at the previous price.
    pub violations: Vec<f64>,
    /// Respondents whose own intent rises with price.
    pub inconsistent_respondents: usize,
}

fn calibrated<'a>(
    point: &'a PricePoint,
    calibration: &Calibration,
) -> AnalysisResult<Vec<(&'a SliceRow, f64)>> {
    let mut res = Vec::new();
    for row in point.slice.rows.iter() {
        let label = match &row.answer {
            Answer::Missing => continue,
            Answer::Choice(label) => label,
            other => {
                return UnexpectedAnswerSnafu {
                    question: point.slice.question.clone(),
                    respondent: row.respondent.clone(),
                    expected: "a purchase intent choice",
                    found: other.type_name(),
                }
                .fail()
            }
        };
        let weight = calibration
            .weight_of(label)
            .ok_or_else(|| AnalysisError::UnknownLabel {
                question: point.slice.question.clone(),
                label: label.clone(),
            })?;
        res.push((row, weight));
    }
    Ok(res)
}

/// Gabor-Granger demand curve from purchase-intent questions at several prices.
///
/// Intent labels are converted to purchase probabilities with the configured
/// calibration. Demand that rises with price is not an error: it is reported
/// as a violation and the curve is kept as is.
pub fn gabor_granger(points: &[PricePoint], options: &MetricOptions) -> AnalysisResult<MetricResult> {
    snafu::ensure!(
        !points.is_empty(),
        InvalidPricePointsSnafu {
            detail: "no price points".to_string()
        }
    );
    for p in points.iter() {
        snafu::ensure!(
            p.price.is_finite() && p.price > 0.0,
            InvalidPricePointsSnafu {
                detail: format!("price {} of {} is not positive", p.price, p.slice.question),
            }
        );
    }
    let mut sorted: Vec<&PricePoint> = points.iter().collect();
    sorted.sort_by(|a, b| a.price.total_cmp(&b.price));
    for w in sorted.windows(2) {
        snafu::ensure!(
            w[0].price != w[1].price,
            InvalidPricePointsSnafu {
                detail: format!("price {} is asked twice", w[0].price),
            }
        );
    }

    let mut demand: Vec<DemandPoint> = Vec::with_capacity(sorted.len());
    let mut by_respondent: BTreeMap<&RespondentId, Vec<f64>> = BTreeMap::new();
    let mut all_rows: Vec<&SliceRow> = Vec::new();
    for p in sorted.iter() {
        let values = calibrated(p, &options.calibration)?;
        snafu::ensure!(
            !values.is_empty(),
            NoResponsesSnafu {
                question: p.slice.question.clone()
            }
        );
        let total: f64 = values.iter().map(|(r, _)| r.weight).sum();
        let bought: f64 = values.iter().map(|(r, x)| r.weight * x).sum();
        let demand_pct = 100.0 * bought / total;
        for (r, x) in values.iter() {
            by_respondent.entry(&r.respondent).or_default().push(*x);
            all_rows.push(*r);
        }
        let elasticity = demand.last().and_then(|prev: &DemandPoint| {
            if prev.demand_pct > 0.0 {
                let dd = (demand_pct - prev.demand_pct) / prev.demand_pct;
                let dp = (p.price - prev.price) / prev.price;
                Some(dd / dp)
            } else {
                None
            }
        });
        demand.push(DemandPoint {
            price: p.price,
            demand_pct,
            revenue: p.price * demand_pct / 100.0,
            revenue_index: 0.0,
            elasticity,
            base: values.len(),
        });
    }

    let best = demand
        .iter()
        .max_by(|a, b| a.revenue.total_cmp(&b.revenue))
        .map(|d| (d.price, d.revenue));
    if let Some((_, max_revenue)) = best {
        for d in demand.iter_mut() {
            d.revenue_index = if max_revenue > 0.0 {
                100.0 * d.revenue / max_revenue
            } else {
                0.0
            };
        }
    }
    let optimal_price = best.filter(|(_, r)| *r > 0.0).map(|(p, _)| p);

    let violations: Vec<f64> = demand
        .windows(2)
        .filter(|w| w[1].demand_pct > w[0].demand_pct)
        .map(|w| w[1].price)
        .collect();
    // Only respondents asked every price are checked individually.
    let inconsistent_respondents = by_respondent
        .values()
        .filter(|xs| xs.len() == sorted.len() && xs.windows(2).any(|w| w[1] > w[0]))
        .count();

    let mut flags = Vec::new();
    if !violations.is_empty() {
        warn!(
            "gabor_granger: demand rises with price at {:?}",
            violations
        );
        flags.push(format!(
            "demand increases with price at {} price points",
            violations.len()
        ));
    }
    if inconsistent_respondents > 0 {
        flags.push(format!(
            "{} respondents state a higher intent at a higher price",
            inconsistent_respondents
        ));
    }
    debug!("gabor_granger: demand curve {:?}", demand);

    let (base, respondents) = base_of(all_rows.into_iter());
    let unique: BTreeSet<&QuestionId> = sorted.iter().map(|p| &p.slice.question).collect();
    Ok(MetricResult {
        metric: MetricKind::GaborGranger,
        questions: unique.into_iter().cloned().collect(),
        wave: sorted[0].slice.wave,
        base,
        respondents,
        scale: None,
        sample: None,
        value: MetricValue::GaborGranger(DemandCurve {
            points: demand,
            optimal_price,
            violations,
            inconsistent_respondents,
        }),
        flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(price: f64, question: &str, answers: &[&str]) -> PricePoint {
        let ids: Vec<String> = (0..answers.len()).map(|i| format!("r{}", i)).collect();
        PricePoint {
            price,
            slice: ResponseSlice::unweighted(
                question,
                ids.iter()
                    .zip(answers.iter())
                    .map(|(id, a)| (id.as_str(), Answer::Choice(a.to_string())))
                    .collect(),
            ),
        }
    }

    fn curve_of(r: &MetricResult) -> &DemandCurve {
        match &r.value {
            MetricValue::GaborGranger(c) => c,
            x => panic!("{:?}", x),
        }
    }

    #[test]
    fn calibrated_demand_and_revenue() {
        let points = vec![
            point(10.0, "P10", &["Definitely", "Definitely", "Probably", "Definitely not"]),
            point(20.0, "P20", &["Definitely", "Probably", "Probably not", "Definitely not"]),
        ];
        let res = gabor_granger(&points, &MetricOptions::default()).unwrap();
        let c = curve_of(&res);
        // (0.8 + 0.8 + 0.3) / 4
        assert!((c.points[0].demand_pct - 47.5).abs() < 1e-9);
        // (0.8 + 0.3) / 4
        assert!((c.points[1].demand_pct - 27.5).abs() < 1e-9);
        assert!((c.points[0].revenue - 4.75).abs() < 1e-9);
        assert!((c.points[1].revenue - 5.5).abs() < 1e-9);
        assert_eq!(c.optimal_price, Some(20.0));
        assert!((c.points[1].revenue_index - 100.0).abs() < 1e-9);
        assert!(c.points[0].elasticity.is_none());
        assert!(c.points[1].elasticity.unwrap() < 0.0);
        assert!(c.violations.is_empty());
        assert!(res.flags.is_empty());
    }

    #[test]
    fn rising_demand_is_flagged_not_fixed() {
        let points = vec![
            point(20.0, "P20", &["Definitely", "Definitely"]),
            point(10.0, "P10", &["Probably", "Definitely not"]),
        ];
        let res = gabor_granger(&points, &MetricOptions::default()).unwrap();
        let c = curve_of(&res);
        // Sorted by price.
        assert_eq!(c.points[0].price, 10.0);
        assert_eq!(c.violations, vec![20.0]);
        assert_eq!(c.inconsistent_respondents, 2);
        assert_eq!(res.flags.len(), 2);
        assert!((c.points[1].demand_pct - 80.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_intent_label() {
        let points = vec![point(10.0, "P10", &["Maybe later"])];
        let err = gabor_granger(&points, &MetricOptions::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::UnknownLabel { .. }));
    }

    #[test]
    fn invalid_prices() {
        let err = gabor_granger(&[point(0.0, "P0", &["Definitely"])], &MetricOptions::default())
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidPricePoints { .. }));
        let err = gabor_granger(
            &[point(5.0, "A", &["Definitely"]), point(5.0, "B", &["Probably"])],
            &MetricOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidPricePoints { .. }));
        let err = gabor_granger(&[], &MetricOptions::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidPricePoints { .. }));
    }
}
