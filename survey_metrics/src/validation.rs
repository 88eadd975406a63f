//! Structural checks of a study definition, run before any analysis.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::*;

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The definition cannot be analysed.
    Error,
    /// Unusual but analysable.
    Warning,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    UniqueQuestionIds,
    MatrixRows,
    ScaleLabels,
    ConstructConsistency,
    ScaleLength,
    References,
    Funnels,
    MaxDiffDesign,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ValidationFinding {
    pub check: Check,
    pub severity: Severity,
    pub question: Option<QuestionId>,
    pub message: String,
}

impl ValidationFinding {
    fn error(check: Check, question: Option<&QuestionId>, message: String) -> ValidationFinding {
        ValidationFinding {
            check,
            severity: Severity::Error,
            question: question.cloned(),
            message,
        }
    }

    fn warning(check: Check, question: Option<&QuestionId>, message: String) -> ValidationFinding {
        ValidationFinding {
            check,
            severity: Severity::Warning,
            question: question.cloned(),
            message,
        }
    }
}

fn check_ids(study: &StudyDefinition, res: &mut Vec<ValidationFinding>) {
    let mut seen: BTreeSet<&QuestionId> = BTreeSet::new();
    for q in study.questions.iter() {
        if !seen.insert(&q.id) {
            res.push(ValidationFinding::error(
                Check::UniqueQuestionIds,
                Some(&q.id),
                format!("question id {} is used more than once", q.id),
            ));
        }
    }
}

fn check_scales(study: &StudyDefinition, res: &mut Vec<ValidationFinding>) {
    let mut constructs: BTreeMap<&str, (&QuestionId, &ScaleSpec)> = BTreeMap::new();
    for q in study.questions.iter() {
        if let QuestionKind::Matrix { rows, .. } = &q.kind {
            if rows.len() < 2 {
                res.push(ValidationFinding::error(
                    Check::MatrixRows,
                    Some(&q.id),
                    format!("a matrix needs at least two rows, {} has {}", q.id, rows.len()),
                ));
            }
        }
        let scale = match q.kind.scale() {
            Some(s) => s,
            None => continue,
        };
        if scale.points < 2 {
            res.push(ValidationFinding::error(
                Check::ScaleLabels,
                Some(&q.id),
                format!("the scale of {} has {} points", q.id, scale.points),
            ));
            continue;
        }
        if !scale.labels.is_empty() && scale.labels.len() != scale.points as usize {
            res.push(ValidationFinding::error(
                Check::ScaleLabels,
                Some(&q.id),
                format!(
                    "the scale of {} has {} points but {} labels",
                    q.id,
                    scale.points,
                    scale.labels.len()
                ),
            ));
        }
        if ![5, 7, 11].contains(&scale.points) {
            res.push(ValidationFinding::warning(
                Check::ScaleLength,
                Some(&q.id),
                format!(
                    "{} uses a {}-point scale; 5, 7 and 11 points are the usual lengths",
                    q.id, scale.points
                ),
            ));
        }
        match constructs.get(scale.construct.as_str()) {
            Some((first_q, first)) => {
                if first.signature() != scale.signature()
                    || (!first.labels.is_empty() && !scale.labels.is_empty() && first.labels != scale.labels)
                {
                    res.push(ValidationFinding::error(
                        Check::ConstructConsistency,
                        Some(&q.id),
                        format!(
                            "{} measures {} on a different scale than {}",
                            q.id, scale.construct, first_q
                        ),
                    ));
                }
            }
            None => {
                constructs.insert(scale.construct.as_str(), (&q.id, scale));
            }
        }
    }
}

fn check_references(study: &StudyDefinition, res: &mut Vec<ValidationFinding>) {
    let ids: BTreeSet<&QuestionId> = study.questions.iter().map(|q| &q.id).collect();
    for q in study.questions.iter() {
        if let Some(source) = &q.piped_from {
            if !ids.contains(source) {
                res.push(ValidationFinding::error(
                    Check::References,
                    Some(&q.id),
                    format!("{} is piped from unknown question {}", q.id, source),
                ));
            } else if *source == q.id {
                res.push(ValidationFinding::error(
                    Check::References,
                    Some(&q.id),
                    format!("{} is piped from itself", q.id),
                ));
            }
        }
        if let Some(cond) = &q.display_logic {
            if !ids.contains(&cond.question) {
                res.push(ValidationFinding::error(
                    Check::References,
                    Some(&q.id),
                    format!(
                        "the display logic of {} refers to unknown question {}",
                        q.id, cond.question
                    ),
                ));
            }
        }
    }
}

fn check_funnels(study: &StudyDefinition, res: &mut Vec<ValidationFinding>) {
    let ids: BTreeSet<&QuestionId> = study.questions.iter().map(|q| &q.id).collect();
    for f in study.funnels.iter() {
        if study.brand_list(&f.brand_list).is_err() {
            res.push(ValidationFinding::error(
                Check::Funnels,
                None,
                format!("funnel {} uses unknown brand list {}", f.name, f.brand_list),
            ));
        }
        if f.stages.is_empty() {
            res.push(ValidationFinding::error(
                Check::Funnels,
                None,
                format!("funnel {} has no stages", f.name),
            ));
        }
        for stage in f.stages.iter() {
            if !ids.contains(&stage.question) {
                res.push(ValidationFinding::error(
                    Check::Funnels,
                    Some(&stage.question),
                    format!(
                        "stage {} of funnel {} refers to unknown question {}",
                        stage.name, f.name, stage.question
                    ),
                ));
            }
        }
    }
}

fn check_maxdiff(study: &StudyDefinition, res: &mut Vec<ValidationFinding>) {
    for q in study.questions.iter() {
        if let QuestionKind::MaxDiffTask {
            items,
            items_per_task,
        } = &q.kind
        {
            let per_task = *items_per_task as usize;
            if per_task < 2 || per_task > items.len() {
                res.push(ValidationFinding::error(
                    Check::MaxDiffDesign,
                    Some(&q.id),
                    format!(
                        "{} shows {} items per task out of {} items",
                        q.id,
                        per_task,
                        items.len()
                    ),
                ));
            }
            let unique: BTreeSet<&String> = items.iter().collect();
            if unique.len() != items.len() {
                res.push(ValidationFinding::error(
                    Check::MaxDiffDesign,
                    Some(&q.id),
                    format!("{} lists the same item twice", q.id),
                ));
            }
        }
    }
}

/// Runs every structural check on a study definition.
pub fn validate_study(study: &StudyDefinition) -> Vec<ValidationFinding> {
    let mut res = Vec::new();
    check_ids(study, &mut res);
    check_scales(study, &mut res);
    check_references(study, &mut res);
    check_funnels(study, &mut res);
    check_maxdiff(study, &mut res);
    for f in res.iter() {
        match f.severity {
            Severity::Error => warn!("validate_study: {:?}: {}", f.check, f.message),
            Severity::Warning => info!("validate_study: {:?}: {}", f.check, f.message),
        }
    }
    res
}

/// Validates a study and fails with a configuration error on any error finding.
/// Returns the warnings otherwise.
pub fn ensure_valid(study: &StudyDefinition) -> AnalysisResult<Vec<ValidationFinding>> {
    let findings = validate_study(study);
    let errors: Vec<&str> = findings
        .iter()
        .filter(|f| f.severity == Severity::Error)
        .map(|f| f.message.as_str())
        .collect();
    snafu::ensure!(
        errors.is_empty(),
        ConfigurationSnafu {
            detail: format!(
                "study {} is not valid: {}",
                study.name,
                errors.join("; ")
            ),
        }
    );
    Ok(findings)
}
