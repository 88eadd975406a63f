use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::*;
use crate::metrics::*;
use crate::store::{ResponseSlice, SliceRow};

/// The four price questions of a price sensitivity meter.
#[derive(PartialEq, Debug, Clone)]
pub struct PsmInput {
    pub too_cheap: ResponseSlice,
    pub bargain: ResponseSlice,
    pub expensive: ResponseSlice,
    pub too_expensive: ResponseSlice,
}

/// Cumulative curves evaluated on the price grid, in percent of the base.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct PsmCurvePoint {
    pub price: f64,
    pub too_cheap: f64,
    pub bargain: f64,
    pub expensive: f64,
    pub too_expensive: f64,
    pub not_bargain: f64,
    pub not_expensive: f64,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct PsmResult {
    /// Optimal price point: too cheap crosses too expensive.
    pub optimal_price: Option<f64>,
    /// Indifference price point: bargain crosses expensive.
    pub indifference_price: Option<f64>,
    /// Point of marginal cheapness: too cheap crosses not a bargain.
    pub marginal_cheapness: Option<f64>,
    /// Point of marginal expensiveness: too expensive crosses not expensive.
    pub marginal_expensiveness: Option<f64>,
    pub acceptable_range: Option<(f64, f64)>,
    pub curves: Vec<PsmCurvePoint>,
    /// Respondents excluded because their four prices are not ordered.
    pub inconsistent_respondents: Vec<RespondentId>,
    /// Respondents excluded because they skipped one of the four questions.
    pub incomplete_respondents: usize,
}

#[derive(Debug, Clone, Copy)]
struct PriceQuartet {
    too_cheap: f64,
    bargain: f64,
    expensive: f64,
    too_expensive: f64,
    weight: f64,
}

impl PriceQuartet {
    fn is_ordered(&self) -> bool {
        self.too_cheap <= self.bargain
            && self.bargain <= self.expensive
            && self.expensive <= self.too_expensive
    }
}

fn read_prices<'a>(
    slice: &'a ResponseSlice,
) -> AnalysisResult<BTreeMap<&'a RespondentId, (&'a SliceRow, f64)>> {
    let mut res = BTreeMap::new();
    for row in slice.rows.iter() {
        if let Some(x) = read_number(&slice.question, row)? {
            snafu::ensure!(
                x >= 0.0,
                InvalidPricePointsSnafu {
                    detail: format!(
                        "question {}: respondent {} gave a negative price {}",
                        slice.question, row.respondent, x
                    ),
                }
            );
            res.insert(&row.respondent, (row, x));
        }
    }
    Ok(res)
}

/// Finds where two curves cross on the price grid.
///
/// Returns the grid price if both curves are equal there, otherwise
/// interpolates linearly within the first interval where their difference
/// changes sign.
pub fn crossing(prices: &[f64], a: &[f64], b: &[f64]) -> Option<f64> {
    let diffs: Vec<f64> = a.iter().zip(b.iter()).map(|(x, y)| x - y).collect();
    for i in 0..diffs.len() {
        if diffs[i] == 0.0 {
            return Some(prices[i]);
        }
        if i + 1 < diffs.len() && diffs[i].signum() != diffs[i + 1].signum() && diffs[i + 1] != 0.0 {
            let t = diffs[i] / (diffs[i] - diffs[i + 1]);
            return Some(prices[i] + t * (prices[i + 1] - prices[i]));
        }
    }
    None
}

fn curve(points: &[PsmCurvePoint], f: impl Fn(&PsmCurvePoint) -> f64) -> Vec<f64> {
    points.iter().map(f).collect()
}

/// Van Westendorp price sensitivity meter.
///
/// Respondents missing one of the four answers are left out. Respondents
/// whose prices are not ordered (too cheap <= bargain <= expensive <= too
/// expensive) are left out and reported.
pub fn van_westendorp(input: &PsmInput, _options: &MetricOptions) -> AnalysisResult<MetricResult> {
    let tc = read_prices(&input.too_cheap)?;
    let b = read_prices(&input.bargain)?;
    let e = read_prices(&input.expensive)?;
    let te = read_prices(&input.too_expensive)?;

    let everyone: BTreeSet<&RespondentId> = tc
        .keys()
        .chain(b.keys())
        .chain(e.keys())
        .chain(te.keys())
        .cloned()
        .collect();
    let mut incomplete = 0usize;
    let mut inconsistent: Vec<RespondentId> = Vec::new();
    let mut kept: Vec<(&SliceRow, PriceQuartet)> = Vec::new();
    for rid in everyone.iter() {
        match (tc.get(rid), b.get(rid), e.get(rid), te.get(rid)) {
            (Some((row, x1)), Some((_, x2)), Some((_, x3)), Some((_, x4))) => {
                let q = PriceQuartet {
                    too_cheap: *x1,
                    bargain: *x2,
                    expensive: *x3,
                    too_expensive: *x4,
                    weight: row.weight,
                };
                if q.is_ordered() {
                    kept.push((*row, q));
                } else {
                    inconsistent.push((*rid).clone());
                }
            }
            _ => incomplete += 1,
        }
    }
    if !inconsistent.is_empty() {
        warn!(
            "van_westendorp: {} respondents with unordered prices excluded: {:?}",
            inconsistent.len(),
            inconsistent
        );
    }
    snafu::ensure!(
        !kept.is_empty(),
        NoResponsesSnafu {
            question: input.too_cheap.question.clone()
        }
    );

    let mut grid: Vec<f64> = kept
        .iter()
        .flat_map(|(_, q)| [q.too_cheap, q.bargain, q.expensive, q.too_expensive])
        .collect();
    grid.sort_by(|a, b| a.total_cmp(b));
    grid.dedup();

    let total: f64 = kept.iter().map(|(_, q)| q.weight).sum();
    let share = |f: &dyn Fn(&PriceQuartet) -> bool| -> f64 {
        100.0
            * kept
                .iter()
                .filter(|(_, q)| f(q))
                .map(|(_, q)| q.weight)
                .sum::<f64>()
            / total
    };
    let curves: Vec<PsmCurvePoint> = grid
        .iter()
        .map(|p| {
            let p = *p;
            let bargain = share(&|q: &PriceQuartet| q.bargain >= p);
            let expensive = share(&|q: &PriceQuartet| q.expensive <= p);
            PsmCurvePoint {
                price: p,
                too_cheap: share(&|q: &PriceQuartet| q.too_cheap >= p),
                bargain,
                expensive,
                too_expensive: share(&|q: &PriceQuartet| q.too_expensive <= p),
                not_bargain: 100.0 - bargain,
                not_expensive: 100.0 - expensive,
            }
        })
        .collect();

    let too_cheap = curve(&curves, |c| c.too_cheap);
    let too_expensive = curve(&curves, |c| c.too_expensive);
    let optimal_price = crossing(&grid, &too_cheap, &too_expensive);
    let indifference_price = crossing(
        &grid,
        &curve(&curves, |c| c.bargain),
        &curve(&curves, |c| c.expensive),
    );
    let marginal_cheapness = crossing(&grid, &too_cheap, &curve(&curves, |c| c.not_bargain));
    let marginal_expensiveness =
        crossing(&grid, &too_expensive, &curve(&curves, |c| c.not_expensive));
    let acceptable_range = match (marginal_cheapness, marginal_expensiveness) {
        (Some(lo), Some(hi)) if lo <= hi => Some((lo, hi)),
        _ => None,
    };
    debug!(
        "van_westendorp: opp={:?} ipp={:?} range={:?}",
        optimal_price, indifference_price, acceptable_range
    );

    let mut flags = Vec::new();
    if !inconsistent.is_empty() {
        flags.push(format!(
            "{} respondents excluded for unordered price answers",
            inconsistent.len()
        ));
    }
    if incomplete > 0 {
        flags.push(format!(
            "{} respondents excluded for missing price answers",
            incomplete
        ));
    }
    let (base, respondents) = base_of(kept.iter().map(|(r, _)| *r));
    Ok(MetricResult {
        metric: MetricKind::VanWestendorp,
        questions: vec![
            input.too_cheap.question.clone(),
            input.bargain.question.clone(),
            input.expensive.question.clone(),
            input.too_expensive.question.clone(),
        ],
        wave: input.too_cheap.wave,
        base,
        respondents,
        scale: None,
        sample: None,
        value: MetricValue::VanWestendorp(PsmResult {
            optimal_price,
            indifference_price,
            marginal_cheapness,
            marginal_expensiveness,
            acceptable_range,
            curves,
            inconsistent_respondents: inconsistent,
            incomplete_respondents: incomplete,
        }),
        flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(rows: &[(&str, [f64; 4])]) -> PsmInput {
        let slice = |q: &str, i: usize| {
            ResponseSlice::unweighted(
                q,
                rows.iter()
                    .map(|(id, xs)| (*id, Answer::Number(xs[i])))
                    .collect(),
            )
        };
        PsmInput {
            too_cheap: slice("TC", 0),
            bargain: slice("B", 1),
            expensive: slice("E", 2),
            too_expensive: slice("TE", 3),
        }
    }

    fn psm(r: &MetricResult) -> &PsmResult {
        match &r.value {
            MetricValue::VanWestendorp(p) => p,
            x => panic!("{:?}", x),
        }
    }

    #[test]
    fn optimal_price_on_the_grid() {
        let res = van_westendorp(
            &input(&[("r1", [18.0, 19.0, 25.0, 30.0]), ("r2", [10.0, 12.0, 15.0, 18.0])]),
            &MetricOptions::default(),
        )
        .unwrap();
        let p = psm(&res);
        // At 18 half the sample finds the price too cheap and half too expensive.
        assert_eq!(p.optimal_price, Some(18.0));
        // 18 is shared by both respondents.
        assert_eq!(p.curves.len(), 7);
        assert_eq!(res.base.respondents, 2);
        assert!(res.flags.is_empty());
    }

    #[test]
    fn acceptable_range_is_ordered() {
        let rows: Vec<(String, [f64; 4])> = (0..20)
            .map(|i| {
                let s = i as f64;
                (format!("r{}", i), [5.0 + s * 0.5, 8.0 + s * 0.5, 12.0 + s * 0.5, 16.0 + s * 0.5])
            })
            .collect();
        let refs: Vec<(&str, [f64; 4])> = rows.iter().map(|(id, x)| (id.as_str(), *x)).collect();
        let res = van_westendorp(&input(&refs), &MetricOptions::default()).unwrap();
        let p = psm(&res);
        let (lo, hi) = p.acceptable_range.unwrap();
        assert!(lo <= hi);
        let opp = p.optimal_price.unwrap();
        assert!(opp > 5.0 && opp < 25.5);
    }

    #[test]
    fn unordered_respondent_is_excluded_and_reported() {
        let res = van_westendorp(
            &input(&[
                ("r1", [18.0, 19.0, 25.0, 30.0]),
                ("r2", [10.0, 12.0, 15.0, 18.0]),
                ("r3", [20.0, 12.0, 15.0, 18.0]),
            ]),
            &MetricOptions::default(),
        )
        .unwrap();
        let p = psm(&res);
        assert_eq!(p.inconsistent_respondents, vec![RespondentId::from("r3")]);
        assert_eq!(res.base.respondents, 2);
        assert_eq!(res.flags.len(), 1);
    }

    #[test]
    fn incomplete_respondent_is_excluded() {
        let mut i = input(&[("r1", [18.0, 19.0, 25.0, 30.0]), ("r2", [10.0, 12.0, 15.0, 18.0])]);
        i.expensive.rows[1].answer = Answer::Missing;
        let res = van_westendorp(&i, &MetricOptions::default()).unwrap();
        assert_eq!(psm(&res).incomplete_respondents, 1);
        assert_eq!(res.base.respondents, 1);
    }

    #[test]
    fn negative_price_is_rejected() {
        let err = van_westendorp(
            &input(&[("r1", [-1.0, 19.0, 25.0, 30.0])]),
            &MetricOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidPricePoints { .. }));
    }

    #[test]
    fn interpolated_crossing() {
        let prices = [10.0, 20.0];
        assert_eq!(crossing(&prices, &[100.0, 0.0], &[0.0, 100.0]), Some(15.0));
        assert_eq!(crossing(&prices, &[100.0, 90.0], &[0.0, 10.0]), None);
    }
}
