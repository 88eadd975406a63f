use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::*;
use crate::metrics::*;
use crate::store::ResponseSlice;

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quadrant {
    /// Important and underperforming.
    ConcentrateHere,
    /// Important and performing well.
    KeepUpTheGoodWork,
    LowPriority,
    /// Performing well on something respondents care little about.
    PossibleOverkill,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct IpaAttribute {
    pub attribute: String,
    pub importance: f64,
    pub performance: f64,
    /// performance - importance
    pub gap: f64,
    pub quadrant: Quadrant,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct IpaResult {
    pub importance_split: f64,
    pub performance_split: f64,
    pub attributes: Vec<IpaAttribute>,
}

/// A matrix question together with its answers.
#[derive(PartialEq, Debug, Clone)]
pub struct MatrixInput {
    pub rows: Vec<String>,
    pub scale: ScaleSpec,
    pub slice: ResponseSlice,
}

impl MatrixInput {
    pub fn new(rows: &[String], scale: &ScaleSpec, slice: ResponseSlice) -> MatrixInput {
        MatrixInput {
            rows: rows.to_vec(),
            scale: scale.clone(),
            slice,
        }
    }

    // Weighted mean of every row, in row order.
    pub(crate) fn row_means(&self) -> AnalysisResult<Vec<f64>> {
        let mut values: BTreeMap<&str, Vec<(f64, f64)>> =
            self.rows.iter().map(|r| (r.as_str(), vec![])).collect();
        for row in self.slice.rows.iter() {
            let cells = match &row.answer {
                Answer::Missing => continue,
                Answer::Matrix(cells) => cells,
                other => {
                    return UnexpectedAnswerSnafu {
                        question: self.slice.question.clone(),
                        respondent: row.respondent.clone(),
                        expected: "a matrix",
                        found: other.type_name(),
                    }
                    .fail()
                }
            };
            for (label, x) in cells.iter() {
                let bucket =
                    values
                        .get_mut(label.as_str())
                        .ok_or_else(|| AnalysisError::UnknownLabel {
                            question: self.slice.question.clone(),
                            label: label.clone(),
                        })?;
                snafu::ensure!(
                    self.scale.contains(*x),
                    InvalidScaleSnafu {
                        question: self.slice.question.clone(),
                        respondent: row.respondent.clone(),
                        value: *x,
                        min: self.scale.min,
                        max: self.scale.max(),
                    }
                );
                bucket.push((*x, row.weight));
            }
        }
        let mut res = Vec::with_capacity(self.rows.len());
        for r in self.rows.iter() {
            let vals = values.get(r.as_str()).map(|v| v.as_slice()).unwrap_or(&[]);
            snafu::ensure!(
                !vals.is_empty(),
                NoResponsesSnafu {
                    question: QuestionId(format!("{}[{}]", self.slice.question, r)),
                }
            );
            res.push(weighted_mean_variance(vals).0);
        }
        Ok(res)
    }
}

/// Checks that two matrices list the same rows in the same order.
pub fn check_paired_rows(
    importance_question: &QuestionId,
    importance: &[String],
    performance_question: &QuestionId,
    performance: &[String],
) -> AnalysisResult<()> {
    let mismatch = |detail: String| AnalysisError::RowMismatch {
        importance: importance_question.clone(),
        performance: performance_question.clone(),
        detail,
    };
    if importance.len() != performance.len() {
        return Err(mismatch(format!(
            "{} importance rows, {} performance rows",
            importance.len(),
            performance.len()
        )));
    }
    for (i, (a, b)) in importance.iter().zip(performance.iter()).enumerate() {
        if a != b {
            let detail = if performance.contains(a) {
                format!("row {} is {:?} in one matrix and {:?} in the other; the rows are in a different order", i + 1, a, b)
            } else {
                format!("row {} is {:?} in one matrix and {:?} in the other", i + 1, a, b)
            };
            return Err(mismatch(detail));
        }
    }
    Ok(())
}

fn quadrant(importance: f64, performance: f64, imp_split: f64, perf_split: f64) -> Quadrant {
    match (importance >= imp_split, performance >= perf_split) {
        (true, false) => Quadrant::ConcentrateHere,
        (true, true) => Quadrant::KeepUpTheGoodWork,
        (false, false) => Quadrant::LowPriority,
        (false, true) => Quadrant::PossibleOverkill,
    }
}

/// Importance-performance analysis of two paired matrix questions.
///
/// The rows of both matrices must match exactly, including their order.
/// Attributes are placed in quadrants split at the median of the attribute
/// means, or at the configured thresholds.
pub fn importance_performance(
    importance: &MatrixInput,
    performance: &MatrixInput,
    options: &MetricOptions,
) -> AnalysisResult<MetricResult> {
    check_paired_rows(
        &importance.slice.question,
        &importance.rows,
        &performance.slice.question,
        &performance.rows,
    )?;
    let imp = importance.row_means()?;
    let perf = performance.row_means()?;
    let (imp_split, perf_split) = match &options.ipa_split {
        IpaSplit::Median => (
            median(&imp).unwrap_or(0.0),
            median(&perf).unwrap_or(0.0),
        ),
        IpaSplit::Thresholds {
            importance,
            performance,
        } => (*importance, *performance),
    };
    debug!(
        "importance_performance: splits importance={} performance={}",
        imp_split, perf_split
    );
    let attributes: Vec<IpaAttribute> = importance
        .rows
        .iter()
        .zip(imp.iter().zip(perf.iter()))
        .map(|(name, (i, p))| IpaAttribute {
            attribute: name.clone(),
            importance: *i,
            performance: *p,
            gap: p - i,
            quadrant: quadrant(*i, *p, imp_split, perf_split),
        })
        .collect();

    // The base is every respondent who answered either matrix.
    let (base, respondents) = base_of(importance.slice.answered().chain(performance.slice.answered()));
    Ok(MetricResult {
        metric: MetricKind::ImportancePerformance,
        questions: vec![
            importance.slice.question.clone(),
            performance.slice.question.clone(),
        ],
        wave: importance.slice.wave,
        base,
        respondents,
        scale: Some(performance.scale.signature()),
        sample: None,
        value: MetricValue::ImportancePerformance(IpaResult {
            importance_split: imp_split,
            performance_split: perf_split,
            attributes,
        }),
        flags: vec![],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale() -> ScaleSpec {
        ScaleSpec {
            construct: "agreement".to_string(),
            min: 1,
            points: 5,
            labels: vec![],
            direction: ScaleDirection::Ascending,
        }
    }

    fn rows(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn matrix(question: &str, names: &[&str], answers: &[&[f64]]) -> MatrixInput {
        let ids: Vec<String> = (0..answers.len()).map(|i| format!("r{}", i)).collect();
        let slice = ResponseSlice::unweighted(
            question,
            ids.iter()
                .zip(answers.iter())
                .map(|(id, xs)| {
                    let cells = names
                        .iter()
                        .zip(xs.iter())
                        .map(|(n, x)| (n.to_string(), *x))
                        .collect();
                    (id.as_str(), Answer::Matrix(cells))
                })
                .collect(),
        );
        MatrixInput::new(&rows(names), &scale(), slice)
    }

    #[test]
    fn quadrants_at_the_median() {
        let names = ["Price", "Speed", "Support", "Design"];
        let imp = matrix("IMP", &names, &[&[5.0, 5.0, 2.0, 1.0], &[5.0, 4.0, 2.0, 2.0]]);
        let perf = matrix("PERF", &names, &[&[2.0, 5.0, 1.0, 5.0], &[2.0, 5.0, 1.0, 4.0]]);
        let res = importance_performance(&imp, &perf, &MetricOptions::default()).unwrap();
        let r = match &res.value {
            MetricValue::ImportancePerformance(r) => r,
            x => panic!("{:?}", x),
        };
        let q: Vec<Quadrant> = r.attributes.iter().map(|a| a.quadrant).collect();
        assert_eq!(
            q,
            vec![
                Quadrant::ConcentrateHere,
                Quadrant::KeepUpTheGoodWork,
                Quadrant::LowPriority,
                Quadrant::PossibleOverkill
            ]
        );
        assert_eq!(r.attributes[0].gap, -3.0);
        assert_eq!(res.base.respondents, 2);
        assert!(res.headline().contains("Price"));
    }

    #[test]
    fn explicit_thresholds() {
        let names = ["Price", "Speed"];
        let imp = matrix("IMP", &names, &[&[4.0, 4.0]]);
        let perf = matrix("PERF", &names, &[&[4.0, 2.0]]);
        let mut opts = MetricOptions::default();
        opts.ipa_split = IpaSplit::Thresholds {
            importance: 3.0,
            performance: 3.0,
        };
        let res = importance_performance(&imp, &perf, &opts).unwrap();
        match &res.value {
            MetricValue::ImportancePerformance(r) => {
                assert_eq!(r.attributes[0].quadrant, Quadrant::KeepUpTheGoodWork);
                assert_eq!(r.attributes[1].quadrant, Quadrant::ConcentrateHere);
            }
            x => panic!("{:?}", x),
        }
    }

    #[test]
    fn renamed_row_is_a_mismatch() {
        let imp = matrix("IMP", &["Price", "Speed"], &[&[4.0, 4.0]]);
        let perf = matrix("PERF", &["Price", "Internet Speed"], &[&[4.0, 2.0]]);
        let err = importance_performance(&imp, &perf, &MetricOptions::default()).unwrap_err();
        match err {
            AnalysisError::RowMismatch { detail, .. } => assert!(detail.contains("Internet Speed")),
            x => panic!("{:?}", x),
        }
    }

    #[test]
    fn reordered_rows_are_a_mismatch() {
        let imp = matrix("IMP", &["Price", "Speed"], &[&[4.0, 4.0]]);
        let perf = matrix("PERF", &["Speed", "Price"], &[&[4.0, 2.0]]);
        let err = importance_performance(&imp, &perf, &MetricOptions::default()).unwrap_err();
        match err {
            AnalysisError::RowMismatch { detail, .. } => assert!(detail.contains("different order")),
            x => panic!("{:?}", x),
        }
    }

    #[test]
    fn unanswered_row() {
        let imp = matrix("IMP", &["Price", "Speed"], &[&[4.0]]);
        let perf = matrix("PERF", &["Price", "Speed"], &[&[4.0, 2.0]]);
        let err = importance_performance(&imp, &perf, &MetricOptions::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::NoResponses { .. }));
    }
}
