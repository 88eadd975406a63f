use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::*;
use crate::metrics::*;
use crate::store::ResponseSlice;

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct FunnelStageStats {
    pub stage: String,
    pub count: usize,
    pub weighted: f64,
    /// Share of the funnel base reaching this stage.
    pub pct_of_base: f64,
    /// Share of the previous stage converting to this one. Absent for the
    /// first stage and when the previous stage is empty.
    pub conversion: Option<f64>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct BrandFunnel {
    pub brand: String,
    pub stages: Vec<FunnelStageStats>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct FunnelResult {
    pub funnel: String,
    pub base_weighted: f64,
    pub brands: Vec<BrandFunnel>,
}

/// One stage of a funnel with the answers collected at that stage.
#[derive(PartialEq, Debug, Clone)]
pub struct StageSlice {
    pub stage: String,
    pub slice: ResponseSlice,
}

// The respondents selecting each brand at one stage, with their weights.
type StageSelections = BTreeMap<String, BTreeMap<RespondentId, f64>>;

fn read_stage(stage: &StageSlice, brands: &BrandList) -> AnalysisResult<StageSelections> {
    let mut res: StageSelections = brands
        .brands
        .iter()
        .map(|b| (b.clone(), BTreeMap::new()))
        .collect();
    for row in stage.slice.rows.iter() {
        let labels = row
            .answer
            .selected_labels()
            .ok_or_else(|| AnalysisError::UnexpectedAnswer {
                question: stage.slice.question.clone(),
                respondent: row.respondent.clone(),
                expected: "a brand selection".to_string(),
                found: row.answer.type_name().to_string(),
            })?;
        for label in labels {
            let selected = res
                .get_mut(label)
                .ok_or_else(|| AnalysisError::UnknownLabel {
                    question: stage.slice.question.clone(),
                    label: label.to_string(),
                })?;
            selected.insert(row.respondent.clone(), row.weight);
        }
    }
    Ok(res)
}

/// Computes stage populations and stage-to-stage conversions of a brand funnel.
///
/// Stages are given in funnel order. The base is every respondent asked the
/// first stage. For every brand, the respondents of a stage must be a subset of
/// the respondents of the previous stage: anything else is a piping defect and
/// fails the computation.
pub fn brand_funnel(
    funnel: &str,
    brands: &BrandList,
    stages: &[StageSlice],
    _options: &MetricOptions,
) -> AnalysisResult<MetricResult> {
    let first = stages.first().ok_or_else(|| AnalysisError::Configuration {
        detail: format!("funnel {} has no stages", funnel),
    })?;
    let (base, respondents) = base_of(first.slice.rows.iter());
    snafu::ensure!(
        base.respondents > 0,
        NoResponsesSnafu {
            question: first.slice.question.clone()
        }
    );

    let selections: Vec<StageSelections> = stages
        .iter()
        .map(|s| read_stage(s, brands))
        .collect::<AnalysisResult<Vec<_>>>()?;

    let mut brand_funnels: Vec<BrandFunnel> = Vec::new();
    for brand in brands.brands.iter() {
        let mut stats: Vec<FunnelStageStats> = Vec::new();
        let mut previous: Option<(&str, &BTreeMap<RespondentId, f64>)> = None;
        for (stage, sel) in stages.iter().zip(selections.iter()) {
            // read_stage initialises every brand of the list.
            let current = match sel.get(brand) {
                Some(x) => x,
                None => continue,
            };
            let weighted: f64 = current.values().sum();
            let conversion = match previous {
                Some((prior_stage, prior)) => {
                    let current_ids: BTreeSet<&RespondentId> = current.keys().collect();
                    let outside = current_ids
                        .iter()
                        .filter(|rid| !prior.contains_key(**rid))
                        .count();
                    snafu::ensure!(
                        outside == 0,
                        PipingViolationSnafu {
                            funnel,
                            brand: brand.as_str(),
                            stage: stage.stage.as_str(),
                            count: current.len(),
                            outside,
                            prior_stage,
                            prior_count: prior.len(),
                        }
                    );
                    let prior_weighted: f64 = prior.values().sum();
                    if prior_weighted > 0.0 {
                        Some(100.0 * weighted / prior_weighted)
                    } else {
                        None
                    }
                }
                None => None,
            };
            stats.push(FunnelStageStats {
                stage: stage.stage.clone(),
                count: current.len(),
                weighted,
                pct_of_base: 100.0 * weighted / base.weighted,
                conversion,
            });
            previous = Some((stage.stage.as_str(), current));
        }
        debug!("brand_funnel: {} {}: {:?}", funnel, brand, stats);
        brand_funnels.push(BrandFunnel {
            brand: brand.clone(),
            stages: stats,
        });
    }

    Ok(MetricResult {
        metric: MetricKind::BrandFunnel,
        questions: stages.iter().map(|s| s.slice.question.clone()).collect(),
        wave: first.slice.wave,
        base,
        respondents,
        scale: None,
        sample: None,
        value: MetricValue::BrandFunnel(FunnelResult {
            funnel: funnel.to_string(),
            base_weighted: base.weighted,
            brands: brand_funnels,
        }),
        flags: vec![],
    })
}
