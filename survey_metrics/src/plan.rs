//! Batch execution of an analysis plan.
//!
//! A plan lists named analyses. Each one is resolved against the study
//! definition, computed from the store, optionally broken down by respondent
//! attributes, and collected into a [Report]. Analyses only read the store,
//! so they are computed in parallel.

use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::*;
use crate::crosstab::CrosstabEngine;
use crate::metrics::*;
use crate::quality::assess;
use crate::report::{Report, ReportAssembler};
use crate::significance::SignificanceTester;
use crate::store::{ResponseFilter, ResponseSlice, ResponseStore};
use crate::validation::ensure_valid;

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct PriceQuestion {
    pub price: f64,
    pub question: QuestionId,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct AttributeQuestion {
    pub attribute: String,
    pub question: QuestionId,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct BrandQuestion {
    pub brand: String,
    pub question: QuestionId,
}

/// Where the brand x attribute table of a perceptual map comes from.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum MapSource {
    /// One multi-choice question per attribute, listing the brands associated
    /// with it. Mapped with correspondence analysis.
    #[serde(rename_all = "camelCase")]
    Associations {
        attribute_questions: Vec<AttributeQuestion>,
    },
    /// One matrix question per brand, rating every attribute. Mapped with
    /// principal components.
    #[serde(rename_all = "camelCase")]
    Ratings { brand_questions: Vec<BrandQuestion> },
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Analysis {
    Nps {
        question: QuestionId,
    },
    Csat {
        question: QuestionId,
    },
    MeanScore {
        question: QuestionId,
    },
    BrandFunnel {
        funnel: String,
    },
    ImportancePerformance {
        importance: QuestionId,
        performance: QuestionId,
    },
    #[serde(rename_all = "camelCase")]
    VanWestendorp {
        too_cheap: QuestionId,
        bargain: QuestionId,
        expensive: QuestionId,
        too_expensive: QuestionId,
    },
    #[serde(rename_all = "camelCase")]
    GaborGranger {
        price_points: Vec<PriceQuestion>,
    },
    MaxDiff {
        question: QuestionId,
    },
    #[serde(rename_all = "camelCase")]
    PerceptualMap {
        brand_list: String,
        source: MapSource,
    },
}

impl Analysis {
    pub fn metric(&self) -> MetricKind {
        match self {
            Analysis::Nps { .. } => MetricKind::Nps,
            Analysis::Csat { .. } => MetricKind::Csat,
            Analysis::MeanScore { .. } => MetricKind::MeanScore,
            Analysis::BrandFunnel { .. } => MetricKind::BrandFunnel,
            Analysis::ImportancePerformance { .. } => MetricKind::ImportancePerformance,
            Analysis::VanWestendorp { .. } => MetricKind::VanWestendorp,
            Analysis::GaborGranger { .. } => MetricKind::GaborGranger,
            Analysis::MaxDiff { .. } => MetricKind::MaxDiff,
            Analysis::PerceptualMap { .. } => MetricKind::PerceptualMap,
        }
    }
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSpec {
    pub name: String,
    pub analysis: Analysis,
    /// Respondent attributes to break the analysis down by.
    #[serde(default)]
    pub crosstab_by: Vec<String>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisPlan {
    /// Defaults to the latest wave of the store.
    #[serde(default)]
    pub wave: Option<Wave>,
    /// Remove speeders and straightliners before computing.
    #[serde(default)]
    pub drop_flagged: bool,
    /// Findings written by the analyst, placed first in the summary.
    #[serde(default)]
    pub executive_summary: Vec<String>,
    pub analyses: Vec<AnalysisSpec>,
}

fn wrong_kind(q: &QuestionDefinition, metric: MetricKind, expected: &str) -> AnalysisError {
    AnalysisError::Configuration {
        detail: format!(
            "{:?} needs {} question, {} is a {} question",
            metric,
            expected,
            q.id,
            q.kind.type_name()
        ),
    }
}

fn matrix_input(
    study: &StudyDefinition,
    question: &QuestionId,
    metric: MetricKind,
    slice: ResponseSlice,
) -> AnalysisResult<MatrixInput> {
    let q = study.question(question)?;
    match &q.kind {
        QuestionKind::Matrix { rows, scale } => Ok(MatrixInput::new(rows, scale, slice)),
        _ => Err(wrong_kind(q, metric, "a matrix")),
    }
}

/// Computes one analysis on the respondents selected by `filter`.
///
/// Questions, funnels and brand lists that the study does not define, or
/// questions of the wrong kind, are configuration errors.
pub fn run_analysis(
    study: &StudyDefinition,
    store: &ResponseStore,
    analysis: &Analysis,
    filter: &ResponseFilter,
    options: &MetricOptions,
) -> AnalysisResult<MetricResult> {
    let metric = analysis.metric();
    let slice = |q: &QuestionId| -> AnalysisResult<ResponseSlice> {
        study.question(q)?;
        store.slice(q, filter, &options.weighting)
    };
    match analysis {
        Analysis::Nps { question } => {
            let q = study.question(question)?;
            match &q.kind {
                QuestionKind::Scale(s) if s.min == 0 && s.points == 11 => {
                    net_promoter_score(&slice(question)?, options)
                }
                QuestionKind::Numeric {
                    min: Some(min),
                    max: Some(max),
                } if *min == 0.0 && *max == 10.0 => net_promoter_score(&slice(question)?, options),
                _ => Err(wrong_kind(q, metric, "a 0-10 scale")),
            }
        }
        Analysis::Csat { question } => {
            let q = study.question(question)?;
            match &q.kind {
                QuestionKind::Scale(scale) => csat(&slice(question)?, scale, options),
                _ => Err(wrong_kind(q, metric, "a scale")),
            }
        }
        Analysis::MeanScore { question } => {
            let q = study.question(question)?;
            match &q.kind {
                QuestionKind::Scale(scale) => mean_score(&slice(question)?, Some(scale), options),
                QuestionKind::Numeric { .. } => mean_score(&slice(question)?, None, options),
                _ => Err(wrong_kind(q, metric, "a scale or numeric")),
            }
        }
        Analysis::BrandFunnel { funnel } => {
            let chain = study.funnel(funnel)?;
            let brands = study.brand_list(&chain.brand_list)?;
            let stages = chain
                .stages
                .iter()
                .map(|s| -> AnalysisResult<StageSlice> {
                    Ok(StageSlice {
                        stage: s.name.clone(),
                        slice: slice(&s.question)?,
                    })
                })
                .collect::<AnalysisResult<Vec<_>>>()?;
            brand_funnel(&chain.name, brands, &stages, options)
        }
        Analysis::ImportancePerformance {
            importance,
            performance,
        } => {
            let imp = matrix_input(study, importance, metric, slice(importance)?)?;
            let perf = matrix_input(study, performance, metric, slice(performance)?)?;
            importance_performance(&imp, &perf, options)
        }
        Analysis::VanWestendorp {
            too_cheap,
            bargain,
            expensive,
            too_expensive,
        } => {
            let input = PsmInput {
                too_cheap: slice(too_cheap)?,
                bargain: slice(bargain)?,
                expensive: slice(expensive)?,
                too_expensive: slice(too_expensive)?,
            };
            van_westendorp(&input, options)
        }
        Analysis::GaborGranger { price_points } => {
            let points = price_points
                .iter()
                .map(|p| -> AnalysisResult<PricePoint> {
                    Ok(PricePoint {
                        price: p.price,
                        slice: slice(&p.question)?,
                    })
                })
                .collect::<AnalysisResult<Vec<_>>>()?;
            gabor_granger(&points, options)
        }
        Analysis::MaxDiff { question } => {
            let q = study.question(question)?;
            match &q.kind {
                QuestionKind::MaxDiffTask {
                    items,
                    items_per_task,
                } => maxdiff(&slice(question)?, items, *items_per_task as usize, options),
                _ => Err(wrong_kind(q, metric, "a best-worst")),
            }
        }
        Analysis::PerceptualMap { brand_list, source } => {
            let brands = study.brand_list(brand_list)?;
            match source {
                MapSource::Associations {
                    attribute_questions,
                } => {
                    let slices = attribute_questions
                        .iter()
                        .map(|a| -> AnalysisResult<(String, ResponseSlice)> {
                            Ok((a.attribute.clone(), slice(&a.question)?))
                        })
                        .collect::<AnalysisResult<Vec<_>>>()?;
                    let table = BrandAttributeTable::from_associations(brands, &slices)?;
                    perceptual_map(&table, MapMethod::CorrespondenceAnalysis, options)
                }
                MapSource::Ratings { brand_questions } => {
                    let mut inputs: Vec<(String, MatrixInput)> = Vec::new();
                    for b in brand_questions.iter() {
                        if !brands.brands.contains(&b.brand) {
                            return ConfigurationSnafu {
                                detail: format!("brand {} is not in brand list {}", b.brand, brands.name),
                            }
                            .fail();
                        }
                        let input = matrix_input(study, &b.question, metric, slice(&b.question)?)?;
                        inputs.push((b.brand.clone(), input));
                    }
                    let table = BrandAttributeTable::from_ratings(&inputs)?;
                    perceptual_map(&table, MapMethod::Pca, options)
                }
            }
        }
    }
}

/// Runs a whole plan and assembles its report.
///
/// The study is validated first: error findings abort the run. Flagged
/// respondents are removed from a copy of the store when the plan asks for
/// it. A failing analysis only fails its own section, unless the failure is
/// a configuration error.
pub fn run_plan(
    study: &StudyDefinition,
    store: &ResponseStore,
    plan: &AnalysisPlan,
    options: &MetricOptions,
) -> AnalysisResult<Report> {
    let findings = ensure_valid(study)?;
    let tester = SignificanceTester::new(options.significance_level)?;
    let engine = CrosstabEngine::new(options.min_base);
    let wave = plan.wave.unwrap_or_else(|| store.current_wave());
    let filter = ResponseFilter::wave(wave);

    let mut quality = assess(store, study, wave, options);
    let cleaned;
    let store = if plan.drop_flagged && !quality.flags.is_empty() {
        let flagged = quality.flagged_respondents();
        warn!(
            "run_plan: removing {} flagged respondents from wave {}",
            flagged.len(),
            wave
        );
        cleaned = store.without_respondents(wave, &flagged);
        quality.dropped = true;
        &cleaned
    } else {
        store
    };

    info!(
        "run_plan: {} analyses on wave {} of study {}",
        plan.analyses.len(),
        wave,
        study.name
    );
    let outcomes: Vec<(&AnalysisSpec, AnalysisResult<MetricResult>)> = plan
        .analyses
        .par_iter()
        .map(|spec| (spec, run_analysis(study, store, &spec.analysis, &filter, options)))
        .collect();

    let mut asm = ReportAssembler::new(&study.name, wave);
    for line in plan.executive_summary.iter() {
        asm.add_summary(line);
    }
    asm.set_validation(findings);
    asm.set_quality(quality);
    for (spec, outcome) in outcomes.into_iter() {
        let metric = spec.analysis.metric();
        let computed = outcome.is_ok();
        asm.add_outcome(&spec.name, Some(metric), outcome);
        if !computed {
            continue;
        }
        for variable in spec.crosstab_by.iter() {
            let tab = engine.run(store, &filter, variable, |segment| {
                run_analysis(study, store, &spec.analysis, segment, options)
            });
            match tab {
                Ok(mut tab) => {
                    tab.comparisons = tab.pairwise(&tester);
                    asm.add_crosstab(&spec.name, tab);
                }
                Err(e) => asm.add_failure(&format!("{} by {}", spec.name, variable), Some(metric), e),
            }
        }
    }
    asm.assemble()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crosstab::LevelOutcome;

    fn scale5(construct: &str) -> ScaleSpec {
        ScaleSpec {
            construct: construct.to_string(),
            min: 1,
            points: 5,
            labels: vec![],
            direction: ScaleDirection::Ascending,
        }
    }

    fn question(id: &str, kind: QuestionKind) -> QuestionDefinition {
        QuestionDefinition {
            id: QuestionId::from(id),
            text: None,
            kind,
            piped_from: None,
            display_logic: None,
        }
    }

    fn study() -> StudyDefinition {
        let attrs: Vec<String> = vec!["price".into(), "service".into(), "range".into()];
        StudyDefinition {
            name: "tracker".to_string(),
            questions: vec![
                question("NPS", QuestionKind::Scale(ScaleSpec::nps())),
                question("SAT", QuestionKind::Scale(scale5("satisfaction"))),
                question(
                    "IMP",
                    QuestionKind::Matrix {
                        rows: attrs.clone(),
                        scale: scale5("importance"),
                    },
                ),
                question(
                    "PERF",
                    QuestionKind::Matrix {
                        rows: attrs,
                        scale: scale5("performance"),
                    },
                ),
                question("TC", QuestionKind::Numeric { min: None, max: None }),
            ],
            brand_lists: vec![],
            funnels: vec![],
        }
    }

    // 40 respondents in the North, 10 in the South.
    fn store() -> ResponseStore {
        let mut b = ResponseStore::builder();
        for i in 0..50 {
            let id = format!("r{:02}", i);
            let region = if i < 40 { "North" } else { "South" };
            let mut r = Respondent::new(&id, Wave::FIRST).with_attribute("region", region);
            r.duration_secs = Some(if i == 0 { 30.0 } else { 600.0 });
            b.add_respondent(r);
            let nps = if i % 2 == 0 { 10.0 } else { 6.0 };
            b.add_response(&id, "NPS", Wave::FIRST, Answer::Number(nps))
                .unwrap();
            b.add_response(&id, "SAT", Wave::FIRST, Answer::Number((i % 5 + 1) as f64))
                .unwrap();
        }
        b.build()
    }

    fn spec(name: &str, analysis: Analysis, crosstab_by: &[&str]) -> AnalysisSpec {
        AnalysisSpec {
            name: name.to_string(),
            analysis,
            crosstab_by: crosstab_by.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn plan_with_a_failing_analysis() {
        let _ = env_logger::builder().is_test(true).try_init();
        let plan = AnalysisPlan {
            executive_summary: vec!["Wave 1 baseline.".to_string()],
            analyses: vec![
                spec(
                    "loyalty",
                    Analysis::Nps {
                        question: QuestionId::from("NPS"),
                    },
                    &["region"],
                ),
                spec(
                    "satisfaction",
                    Analysis::Csat {
                        question: QuestionId::from("SAT"),
                    },
                    &[],
                ),
                // Nobody answered the importance matrix.
                spec(
                    "drivers",
                    Analysis::ImportancePerformance {
                        importance: QuestionId::from("IMP"),
                        performance: QuestionId::from("PERF"),
                    },
                    &[],
                ),
            ],
            ..Default::default()
        };
        let report = run_plan(&study(), &store(), &plan, &MetricOptions::default()).unwrap();
        let names: Vec<&str> = report.sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["loyalty", "satisfaction", "drivers"]);
        let failed = report.failed_sections();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "drivers");
        assert_eq!(
            failed[0].failure.as_ref().unwrap().class,
            ErrorClass::DataSufficiency
        );

        assert_eq!(report.crosstabs.len(), 1);
        let tab = &report.crosstabs[0].crosstab;
        assert_eq!(tab.variable, "region");
        assert!(matches!(
            tab.cell("North").unwrap().outcome,
            LevelOutcome::Computed { .. }
        ));
        assert_eq!(tab.suppressed_levels(), vec!["South"]);
        assert_eq!(tab.comparisons.len(), 1);

        assert_eq!(report.executive_summary[0], "Wave 1 baseline.");
        let quality = report.data_quality.as_ref().unwrap();
        assert_eq!(quality.speeders(), 1);
        assert!(!quality.dropped);
    }

    #[test]
    fn dropping_flagged_respondents_shrinks_the_base() {
        let plan = AnalysisPlan {
            drop_flagged: true,
            analyses: vec![spec(
                "loyalty",
                Analysis::Nps {
                    question: QuestionId::from("NPS"),
                },
                &[],
            )],
            ..Default::default()
        };
        let report = run_plan(&study(), &store(), &plan, &MetricOptions::default()).unwrap();
        let result = report.section("loyalty").unwrap().result.as_ref().unwrap();
        assert_eq!(result.base.respondents, 49);
        assert!(report.data_quality.unwrap().dropped);
    }

    #[test]
    fn undefined_question_fails_the_report() {
        let plan = AnalysisPlan {
            analyses: vec![spec(
                "loyalty",
                Analysis::Nps {
                    question: QuestionId::from("NPS2"),
                },
                &[],
            )],
            ..Default::default()
        };
        let err = run_plan(&study(), &store(), &plan, &MetricOptions::default()).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[test]
    fn wrong_question_kind_is_a_configuration_error() {
        let err = run_analysis(
            &study(),
            &store(),
            &Analysis::MaxDiff {
                question: QuestionId::from("SAT"),
            },
            &ResponseFilter::default(),
            &MetricOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[test]
    fn nps_on_a_five_point_scale_is_a_configuration_error() {
        let err = run_analysis(
            &study(),
            &store(),
            &Analysis::Nps {
                question: QuestionId::from("SAT"),
            },
            &ResponseFilter::default(),
            &MetricOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert!(err.to_string().contains("SAT"));
    }

    #[test]
    fn plan_from_json() {
        let plan: AnalysisPlan = serde_json::from_str(
            r#"{
                "dropFlagged": true,
                "analyses": [
                    {"name": "loyalty", "analysis": {"type": "nps", "question": "NPS"}, "crosstabBy": ["region"]},
                    {"name": "psm", "analysis": {"type": "van_westendorp", "tooCheap": "TC",
                        "bargain": "B", "expensive": "E", "tooExpensive": "TE"}}
                ]
            }"#,
        )
        .unwrap();
        assert!(plan.drop_flagged);
        assert_eq!(plan.analyses[0].crosstab_by, vec!["region".to_string()]);
        assert_eq!(plan.analyses[1].analysis.metric(), MetricKind::VanWestendorp);
    }
}
