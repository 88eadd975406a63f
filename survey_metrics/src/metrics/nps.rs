use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::*;
use crate::metrics::*;
use crate::store::ResponseSlice;

/// Net Promoter Score of a sample.
///
/// The weighted 0-10 distribution is kept with the score: an NPS is never
/// averaged or patched, only recomputed from a distribution.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct NpsResult {
    pub promoters: f64,
    pub passives: f64,
    pub detractors: f64,
    pub pct_promoters: f64,
    pub pct_passives: f64,
    pub pct_detractors: f64,
    pub nps: f64,
    /// Weighted count of each score from 0 to 10.
    pub distribution: Vec<f64>,
    pub thresholds: NpsThresholds,
}

impl NpsResult {
    pub fn from_distribution(
        distribution: &[f64],
        thresholds: NpsThresholds,
    ) -> AnalysisResult<NpsResult> {
        check_thresholds(&thresholds)?;
        snafu::ensure!(
            distribution.len() == 11,
            InvalidOptionSnafu {
                detail: format!(
                    "an NPS distribution has 11 buckets, got {}",
                    distribution.len()
                ),
            }
        );
        let mut promoters = 0.0;
        let mut passives = 0.0;
        let mut detractors = 0.0;
        for (score, count) in distribution.iter().enumerate() {
            let score = score as u8;
            if score <= thresholds.detractor_max {
                detractors += count;
            } else if score >= thresholds.promoter_min {
                promoters += count;
            } else {
                passives += count;
            }
        }
        let total = promoters + passives + detractors;
        let pct = |x: f64| if total > 0.0 { 100.0 * x / total } else { 0.0 };
        Ok(NpsResult {
            promoters,
            passives,
            detractors,
            pct_promoters: pct(promoters),
            pct_passives: pct(passives),
            pct_detractors: pct(detractors),
            nps: pct(promoters) - pct(detractors),
            distribution: distribution.to_vec(),
            thresholds,
        })
    }

    /// Recomputes the score from the stored distribution.
    pub fn recompute(&self) -> AnalysisResult<NpsResult> {
        NpsResult::from_distribution(&self.distribution, self.thresholds)
    }
}

fn check_thresholds(t: &NpsThresholds) -> AnalysisResult<()> {
    snafu::ensure!(
        t.detractor_max < t.promoter_min && t.promoter_min <= 10,
        InvalidOptionSnafu {
            detail: format!(
                "NPS thresholds must satisfy detractor_max < promoter_min <= 10, got {:?}",
                t
            ),
        }
    );
    Ok(())
}

/// Computes the Net Promoter Score of a 0-10 recommendation question.
///
/// Every answered score must be an integer between 0 and 10.
pub fn net_promoter_score(
    slice: &ResponseSlice,
    options: &MetricOptions,
) -> AnalysisResult<MetricResult> {
    let thresholds = options.nps_thresholds;
    check_thresholds(&thresholds)?;
    let scale = ScaleSpec::nps();
    let values = read_scale_values(slice, Some(&scale))?;
    snafu::ensure!(
        !values.is_empty(),
        NoResponsesSnafu {
            question: slice.question.clone()
        }
    );

    let mut distribution = vec![0.0; 11];
    let mut coded: Vec<(f64, f64)> = Vec::with_capacity(values.len());
    for (row, x) in values.iter() {
        let score = *x as u8;
        distribution[score as usize] += row.weight;
        let code = if score >= thresholds.promoter_min {
            100.0
        } else if score <= thresholds.detractor_max {
            -100.0
        } else {
            0.0
        };
        coded.push((code, row.weight));
    }
    let value = NpsResult::from_distribution(&distribution, thresholds)?;
    let (base, respondents) = base_of(values.iter().map(|(r, _)| *r));
    let (_, variance) = weighted_mean_variance(&coded);
    debug!(
        "net_promoter_score: {}: nps {} over {} respondents",
        slice.question, value.nps, base.respondents
    );

    Ok(MetricResult {
        metric: MetricKind::Nps,
        questions: vec![slice.question.clone()],
        wave: slice.wave,
        base,
        respondents,
        scale: Some(scale.signature()),
        sample: Some(SampleSummary::Mean {
            n: base.respondents as f64,
            mean: value.nps,
            variance,
        }),
        value: MetricValue::Nps(value),
        flags: vec![],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(xs: &[f64]) -> ResponseSlice {
        let ids: Vec<String> = (0..xs.len()).map(|i| format!("r{}", i)).collect();
        ResponseSlice::unweighted(
            "NPS",
            ids.iter()
                .zip(xs.iter())
                .map(|(id, x)| (id.as_str(), Answer::Number(*x)))
                .collect(),
        )
    }

    fn nps_of(r: &MetricResult) -> &NpsResult {
        match &r.value {
            MetricValue::Nps(n) => n,
            x => panic!("not an NPS result: {:?}", x),
        }
    }

    #[test]
    fn reference_example() {
        let res = net_promoter_score(
            &scores(&[9.0, 9.0, 10.0, 7.0, 6.0, 3.0, 8.0, 9.0]),
            &MetricOptions::default(),
        )
        .unwrap();
        let n = nps_of(&res);
        assert_eq!(n.promoters, 4.0);
        assert_eq!(n.passives, 2.0);
        assert_eq!(n.detractors, 2.0);
        assert_eq!(n.pct_promoters, 50.0);
        assert_eq!(n.pct_passives, 25.0);
        assert_eq!(n.pct_detractors, 25.0);
        assert_eq!(n.nps, 25.0);
        assert_eq!(res.base.respondents, 8);
        match res.sample {
            Some(SampleSummary::Mean { mean, .. }) => assert!((mean - 25.0).abs() < 1e-9),
            x => panic!("{:?}", x),
        }
    }

    #[test]
    fn stored_result_recomputes_to_the_same_score() {
        let res = net_promoter_score(
            &scores(&[0.0, 10.0, 10.0, 5.0, 8.0, 9.0, 2.0]),
            &MetricOptions::default(),
        )
        .unwrap();
        let stored = serde_json::to_string(nps_of(&res)).unwrap();
        let loaded: NpsResult = serde_json::from_str(&stored).unwrap();
        assert_eq!(&loaded.recompute().unwrap(), nps_of(&res));
    }

    #[test]
    fn out_of_range_score_is_rejected() {
        let err = net_promoter_score(&scores(&[9.0, 11.0]), &MetricOptions::default())
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidScale { value, .. } if value == 11.0));
        let err = net_promoter_score(&scores(&[9.0, 7.5]), &MetricOptions::default())
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidScale { .. }));
    }

    #[test]
    fn missing_answers_are_not_counted() {
        let mut s = scores(&[10.0, 0.0]);
        s.rows.push(crate::store::SliceRow {
            respondent: RespondentId::from("skipped"),
            answer: Answer::Missing,
            weight: 1.0,
        });
        let res = net_promoter_score(&s, &MetricOptions::default()).unwrap();
        assert_eq!(res.base.respondents, 2);
        assert_eq!(nps_of(&res).nps, 0.0);
    }

    #[test]
    fn weights_change_the_score() {
        let mut s = scores(&[10.0, 0.0]);
        s.rows[0].weight = 3.0;
        let res = net_promoter_score(&s, &MetricOptions::default()).unwrap();
        assert_eq!(nps_of(&res).nps, 50.0);
        assert_eq!(res.base.weighted, 4.0);
    }

    #[test]
    fn custom_thresholds() {
        let mut opts = MetricOptions::default();
        opts.nps_thresholds = NpsThresholds {
            detractor_max: 5,
            promoter_min: 8,
        };
        let res = net_promoter_score(&scores(&[8.0, 6.0]), &opts).unwrap();
        assert_eq!(nps_of(&res).nps, 50.0);

        opts.nps_thresholds = NpsThresholds {
            detractor_max: 8,
            promoter_min: 8,
        };
        assert!(matches!(
            net_promoter_score(&scores(&[8.0]), &opts),
            Err(AnalysisError::InvalidOption { .. })
        ));
    }

    #[test]
    fn empty_slice() {
        let err = net_promoter_score(&scores(&[]), &MetricOptions::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::NoResponses { .. }));
    }
}
