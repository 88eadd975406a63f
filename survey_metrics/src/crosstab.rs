use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::*;
use crate::metrics::MetricResult;
use crate::significance::{SignificanceResult, SignificanceTester};
use crate::store::{ResponseFilter, ResponseStore};

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LevelOutcome {
    Computed { result: MetricResult },
    /// Too few respondents to report. The metric value is withheld.
    Suppressed { min_base: usize, warning: String },
    Failed { class: ErrorClass, reason: String },
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct CrosstabCell {
    pub level: String,
    /// Respondents of the segment who answered, or all respondents of the
    /// segment when the metric could not be computed.
    pub base: usize,
    pub outcome: LevelOutcome,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ComparisonOutcome {
    Tested { result: SignificanceResult },
    NotTested { reason: String },
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct PairwiseComparison {
    pub first: String,
    pub second: String,
    pub outcome: ComparisonOutcome,
}

/// A metric broken down by the levels of one respondent attribute.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Crosstab {
    pub variable: String,
    pub min_base: usize,
    pub cells: Vec<CrosstabCell>,
    pub comparisons: Vec<PairwiseComparison>,
    pub warnings: Vec<String>,
}

impl Crosstab {
    pub fn cell(&self, level: &str) -> Option<&CrosstabCell> {
        self.cells.iter().find(|c| c.level == level)
    }

    pub fn suppressed_levels(&self) -> Vec<&str> {
        self.cells
            .iter()
            .filter(|c| matches!(c.outcome, LevelOutcome::Suppressed { .. }))
            .map(|c| c.level.as_str())
            .collect()
    }

    /// Tests every pair of computed levels against each other.
    pub fn pairwise(&self, tester: &SignificanceTester) -> Vec<PairwiseComparison> {
        let mut res = Vec::new();
        for (i, a) in self.cells.iter().enumerate() {
            for b in self.cells.iter().skip(i + 1) {
                let outcome = match (&a.outcome, &b.outcome) {
                    (LevelOutcome::Computed { result: ra }, LevelOutcome::Computed { result: rb }) => {
                        match tester.compare(ra, rb) {
                            Ok(result) => ComparisonOutcome::Tested { result },
                            Err(e) => ComparisonOutcome::NotTested {
                                reason: e.to_string(),
                            },
                        }
                    }
                    _ => ComparisonOutcome::NotTested {
                        reason: "at least one level has no reportable result".to_string(),
                    },
                };
                res.push(PairwiseComparison {
                    first: a.level.clone(),
                    second: b.level.clone(),
                    outcome,
                });
            }
        }
        res
    }
}

/// Runs a metric across segments.
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct CrosstabEngine {
    min_base: usize,
}

impl CrosstabEngine {
    pub fn new(min_base: usize) -> CrosstabEngine {
        CrosstabEngine { min_base }
    }

    pub fn min_base(&self) -> usize {
        self.min_base
    }

    /// Computes the metric for every level of `variable`, in level order.
    ///
    /// Segments whose base falls under the minimum base, or that do not have
    /// enough data for the metric, are suppressed with a warning. Other metric
    /// errors are reported in their cell, except configuration errors which
    /// abort the crosstab.
    pub fn run<F>(
        &self,
        store: &ResponseStore,
        filter: &ResponseFilter,
        variable: &str,
        calc: F,
    ) -> AnalysisResult<Crosstab>
    where
        F: Fn(&ResponseFilter) -> AnalysisResult<MetricResult> + Sync,
    {
        let wave = filter.wave.unwrap_or_else(|| store.current_wave());
        let levels = store.segment_levels(variable, wave);
        snafu::ensure!(
            !levels.is_empty(),
            ConfigurationSnafu {
                detail: format!("no respondent of wave {} has a {} attribute", wave, variable),
            }
        );
        info!(
            "crosstab: {} levels of {} in wave {}",
            levels.len(),
            variable,
            wave
        );

        let outcomes: Vec<(String, usize, AnalysisResult<MetricResult>)> = levels
            .par_iter()
            .map(|level| {
                let segment = filter.with_segment(variable, level);
                let res = calc(&segment);
                (level.clone(), store.base_size(&segment), res)
            })
            .collect();

        let mut cells: Vec<CrosstabCell> = Vec::with_capacity(outcomes.len());
        let mut warnings: Vec<String> = Vec::new();
        for (level, segment_size, res) in outcomes.into_iter() {
            let cell = match res {
                Ok(result) if result.base.respondents < self.min_base => {
                    let warning = format!(
                        "{}={}: base of {} is under the minimum of {}, result suppressed",
                        variable, level, result.base.respondents, self.min_base
                    );
                    CrosstabCell {
                        level,
                        base: result.base.respondents,
                        outcome: LevelOutcome::Suppressed {
                            min_base: self.min_base,
                            warning,
                        },
                    }
                }
                Ok(result) => CrosstabCell {
                    level,
                    base: result.base.respondents,
                    outcome: LevelOutcome::Computed { result },
                },
                Err(e) => match e.class() {
                    ErrorClass::Configuration => return Err(e),
                    ErrorClass::DataSufficiency => {
                        let warning = format!("{}={}: {}, result suppressed", variable, level, e);
                        CrosstabCell {
                            level,
                            base: segment_size,
                            outcome: LevelOutcome::Suppressed {
                                min_base: self.min_base,
                                warning,
                            },
                        }
                    }
                    ErrorClass::Validation => CrosstabCell {
                        level,
                        base: segment_size,
                        outcome: LevelOutcome::Failed {
                            class: ErrorClass::Validation,
                            reason: e.to_string(),
                        },
                    },
                },
            };
            if let LevelOutcome::Suppressed { warning, .. } = &cell.outcome {
                warn!("crosstab: {}", warning);
                warnings.push(warning.clone());
            }
            cells.push(cell);
        }

        Ok(Crosstab {
            variable: variable.to_string(),
            min_base: self.min_base,
            cells,
            comparisons: vec![],
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::net_promoter_score;

    // 40 northern respondents, 5 southern ones and 35 western ones who all
    // skipped the question.
    fn store() -> ResponseStore {
        let mut b = ResponseStore::builder();
        for i in 0..40 {
            let id = format!("n{}", i);
            b.add_respondent(Respondent::new(&id, Wave::FIRST).with_attribute("region", "North"));
            let score = if i < 30 { 10.0 } else { 3.0 };
            b.add_response(&id, "NPS", Wave::FIRST, Answer::Number(score))
                .unwrap();
        }
        for i in 0..5 {
            let id = format!("s{}", i);
            b.add_respondent(Respondent::new(&id, Wave::FIRST).with_attribute("region", "South"));
            b.add_response(&id, "NPS", Wave::FIRST, Answer::Number(9.0))
                .unwrap();
        }
        for i in 0..35 {
            let id = format!("w{}", i);
            b.add_respondent(Respondent::new(&id, Wave::FIRST).with_attribute("region", "West"));
            b.add_response(&id, "NPS", Wave::FIRST, Answer::Missing)
                .unwrap();
        }
        b.build()
    }

    fn nps(store: &ResponseStore, filter: &ResponseFilter) -> AnalysisResult<MetricResult> {
        let opts = MetricOptions::default();
        let slice = store.slice(&QuestionId::from("NPS"), filter, &opts.weighting)?;
        net_promoter_score(&slice, &opts)
    }

    #[test]
    fn small_segments_are_suppressed() {
        let store = store();
        let engine = CrosstabEngine::new(30);
        let tab = engine
            .run(&store, &ResponseFilter::default(), "region", |f| nps(&store, f))
            .unwrap();
        let levels: Vec<&str> = tab.cells.iter().map(|c| c.level.as_str()).collect();
        assert_eq!(levels, vec!["North", "South", "West"]);
        assert!(matches!(
            tab.cell("North").unwrap().outcome,
            LevelOutcome::Computed { .. }
        ));
        assert_eq!(tab.cell("South").unwrap().base, 5);
        // West has no answers at all.
        assert_eq!(tab.suppressed_levels(), vec!["South", "West"]);
        assert_eq!(tab.warnings.len(), 2);
        assert!(tab.warnings[0].contains("minimum of 30"));
    }

    #[test]
    fn lower_minimum_base_reports_every_answered_segment() {
        let store = store();
        let engine = CrosstabEngine::new(5);
        let tab = engine
            .run(&store, &ResponseFilter::default(), "region", |f| nps(&store, f))
            .unwrap();
        assert_eq!(tab.suppressed_levels(), vec!["West"]);
        let pairs = tab.pairwise(&SignificanceTester::default());
        assert_eq!(pairs.len(), 3);
        match &pairs[0].outcome {
            ComparisonOutcome::Tested { result } => assert!(result.p_value <= 1.0),
            x => panic!("{:?}", x),
        }
        assert!(matches!(pairs[1].outcome, ComparisonOutcome::NotTested { .. }));
    }

    #[test]
    fn unknown_variable_is_a_configuration_error() {
        let store = store();
        let err = CrosstabEngine::new(30)
            .run(&store, &ResponseFilter::default(), "income", |f| nps(&store, f))
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[test]
    fn validation_errors_stay_in_their_cell() {
        let store = store();
        let tab = CrosstabEngine::new(1)
            .run(&store, &ResponseFilter::default(), "region", |f| {
                let slice = store.slice(&QuestionId::from("NPS"), f, &Weighting::Unweighted)?;
                crate::metrics::brand_funnel(
                    "f",
                    &BrandList {
                        name: "b".to_string(),
                        brands: vec![],
                    },
                    &[crate::metrics::StageSlice {
                        stage: "aware".to_string(),
                        slice,
                    }],
                    &MetricOptions::default(),
                )
            })
            .unwrap();
        assert!(matches!(
            tab.cell("North").unwrap().outcome,
            LevelOutcome::Failed {
                class: ErrorClass::Validation,
                ..
            }
        ));
    }
}
