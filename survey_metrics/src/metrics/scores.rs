use serde::{Deserialize, Serialize};

use crate::config::*;
use crate::metrics::*;
use crate::store::ResponseSlice;

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct CsatResult {
    pub mean: f64,
    pub top_box_pct: f64,
    pub bottom_box_pct: f64,
    /// The scale points counted in the top box.
    pub top_box_points: Vec<i32>,
    /// Weighted count of every scale point, lowest point first.
    pub distribution: Vec<(i32, f64)>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct MeanScoreResult {
    pub mean: f64,
    pub std_dev: f64,
    /// Weighted median.
    pub median: f64,
    /// Lowest and highest answers given, whatever their weight.
    pub min: f64,
    pub max: f64,
}

fn box_points(scale: &ScaleSpec, size: u32, favourable: bool) -> Vec<i32> {
    let ascending: Vec<i32> = (scale.min..=scale.max()).collect();
    let high_is_good = scale.direction == ScaleDirection::Ascending;
    let take_high = high_is_good == favourable;
    if take_high {
        ascending.iter().rev().take(size as usize).cloned().collect()
    } else {
        ascending.iter().take(size as usize).cloned().collect()
    }
}

/// Customer satisfaction: mean, top-box and bottom-box shares on a rating scale.
pub fn csat(
    slice: &ResponseSlice,
    scale: &ScaleSpec,
    options: &MetricOptions,
) -> AnalysisResult<MetricResult> {
    snafu::ensure!(
        options.top_box >= 1 && options.top_box < scale.points,
        InvalidOptionSnafu {
            detail: format!(
                "top box of {} points does not fit a {}-point scale",
                options.top_box, scale.points
            ),
        }
    );
    let values = read_scale_values(slice, Some(scale))?;
    snafu::ensure!(
        !values.is_empty(),
        NoResponsesSnafu {
            question: slice.question.clone()
        }
    );

    let top = box_points(scale, options.top_box, true);
    let bottom = box_points(scale, options.top_box, false);
    let mut distribution: Vec<(i32, f64)> = (scale.min..=scale.max()).map(|p| (p, 0.0)).collect();
    let mut weighted: Vec<(f64, f64)> = Vec::with_capacity(values.len());
    let mut top_w = 0.0;
    let mut bottom_w = 0.0;
    for (row, x) in values.iter() {
        let point = *x as i32;
        distribution[(point - scale.min) as usize].1 += row.weight;
        weighted.push((*x, row.weight));
        if top.contains(&point) {
            top_w += row.weight;
        }
        if bottom.contains(&point) {
            bottom_w += row.weight;
        }
    }
    let (base, respondents) = base_of(values.iter().map(|(r, _)| *r));
    let (mean, _) = weighted_mean_variance(&weighted);
    let top_share = top_w / base.weighted;
    let value = CsatResult {
        mean,
        top_box_pct: 100.0 * top_share,
        bottom_box_pct: 100.0 * bottom_w / base.weighted,
        top_box_points: top,
        distribution,
    };

    Ok(MetricResult {
        metric: MetricKind::Csat,
        questions: vec![slice.question.clone()],
        wave: slice.wave,
        base,
        respondents,
        scale: Some(scale.signature()),
        sample: Some(SampleSummary::Proportion {
            hits: top_share * base.respondents as f64,
            n: base.respondents as f64,
        }),
        value: MetricValue::Csat(value),
        flags: vec![],
    })
}

/// Mean of a numeric or rating question. If a scale is given, every value must
/// be one of its points.
pub fn mean_score(
    slice: &ResponseSlice,
    scale: Option<&ScaleSpec>,
    _options: &MetricOptions,
) -> AnalysisResult<MetricResult> {
    let values = read_scale_values(slice, scale)?;
    snafu::ensure!(
        !values.is_empty(),
        NoResponsesSnafu {
            question: slice.question.clone()
        }
    );
    let weighted: Vec<(f64, f64)> = values.iter().map(|(r, x)| (*x, r.weight)).collect();
    let raw: Vec<f64> = values.iter().map(|(_, x)| *x).collect();
    let (mean, variance) = weighted_mean_variance(&weighted);
    let (base, respondents) = base_of(values.iter().map(|(r, _)| *r));
    let value = MeanScoreResult {
        mean,
        std_dev: variance.sqrt(),
        median: weighted_median(&weighted).unwrap_or(mean),
        min: raw.iter().cloned().fold(f64::INFINITY, f64::min),
        max: raw.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
    };
    Ok(MetricResult {
        metric: MetricKind::MeanScore,
        questions: vec![slice.question.clone()],
        wave: slice.wave,
        base,
        respondents,
        scale: scale.map(|s| s.signature()),
        sample: Some(SampleSummary::Mean {
            n: base.respondents as f64,
            mean,
            variance,
        }),
        value: MetricValue::MeanScore(value),
        flags: vec![],
    })
}
