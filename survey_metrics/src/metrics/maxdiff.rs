//! Best-worst scaling (MaxDiff).
//!
//! The design of every respondent is validated before any score is computed.
//! Scores come from a [UtilityEstimator]; the counting estimator is the only
//! one provided, and model-based estimators can be plugged in through the same
//! trait.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::*;
use crate::metrics::*;
use crate::store::{ResponseSlice, SliceRow};

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ItemScore {
    pub item: String,
    pub shown: f64,
    pub best: f64,
    pub worst: f64,
    /// (best - worst) / shown, between -1 and 1.
    pub score: f64,
    /// Preference share in percent. Shares sum to 100.
    pub share: f64,
    pub rank: usize,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct MaxDiffResult {
    pub estimator: String,
    /// Items ordered by preference, most preferred first.
    pub items: Vec<ItemScore>,
    /// Every item appears within one of the mean across the design versions.
    pub design_balanced: bool,
    /// Distinct design versions, as the sequences of item sets shown.
    pub versions: usize,
}

/// The tasks of the respondents that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedTasks<'a> {
    pub items: &'a [String],
    pub tasks: Vec<(&'a SliceRow, &'a BestWorstTask)>,
}

/// Estimates item utilities from validated best-worst tasks.
pub trait UtilityEstimator {
    fn name(&self) -> &'static str;

    /// Returns the utility of every item, in the order of `tasks.items`.
    fn estimate(&self, question: &QuestionId, tasks: &ValidatedTasks) -> AnalysisResult<Vec<ItemScore>>;
}

/// Best-minus-worst counts, normalised by the number of times an item is shown.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountingEstimator {}

impl UtilityEstimator for CountingEstimator {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn estimate(&self, question: &QuestionId, tasks: &ValidatedTasks) -> AnalysisResult<Vec<ItemScore>> {
        let mut counts: BTreeMap<&str, (f64, f64, f64)> = tasks
            .items
            .iter()
            .map(|i| (i.as_str(), (0.0, 0.0, 0.0)))
            .collect();
        for (row, task) in tasks.tasks.iter() {
            for item in task.shown.iter() {
                if let Some(c) = counts.get_mut(item.as_str()) {
                    c.0 += row.weight;
                }
            }
            if let Some(c) = counts.get_mut(task.best.as_str()) {
                c.1 += row.weight;
            }
            if let Some(c) = counts.get_mut(task.worst.as_str()) {
                c.2 += row.weight;
            }
        }
        let mut res = Vec::with_capacity(tasks.items.len());
        for item in tasks.items.iter() {
            let (shown, best, worst) = counts.get(item.as_str()).cloned().unwrap_or_default();
            snafu::ensure!(
                shown > 0.0,
                InvalidDesignSnafu {
                    question: question.clone(),
                    detail: format!("item {:?} is never shown", item),
                }
            );
            res.push(ItemScore {
                item: item.clone(),
                shown,
                best,
                worst,
                score: (best - worst) / shown,
                share: 0.0,
                rank: 0,
            });
        }
        Ok(res)
    }
}

fn check_task(
    question: &QuestionId,
    respondent: &RespondentId,
    items: &BTreeSet<&str>,
    per_task: usize,
    task: &BestWorstTask,
) -> AnalysisResult<()> {
    let fail = |detail: String| {
        InvalidDesignSnafu {
            question: question.clone(),
            detail: format!("respondent {}: {}", respondent, detail),
        }
        .fail()
    };
    if task.shown.len() != per_task {
        return fail(format!(
            "a task shows {} items instead of {}",
            task.shown.len(),
            per_task
        ));
    }
    let shown: BTreeSet<&str> = task.shown.iter().map(|s| s.as_str()).collect();
    if shown.len() != task.shown.len() {
        return fail(format!("a task shows the same item twice: {:?}", task.shown));
    }
    if let Some(unknown) = shown.iter().find(|s| !items.contains(*s)) {
        return fail(format!("unknown item {:?}", unknown));
    }
    if !shown.contains(task.best.as_str()) || !shown.contains(task.worst.as_str()) {
        return fail(format!(
            "best {:?} and worst {:?} must both be among the items shown",
            task.best, task.worst
        ));
    }
    if task.best == task.worst {
        return fail(format!("{:?} is picked as both best and worst", task.best));
    }
    Ok(())
}

// Every item must appear a number of times within one of the mean.
fn is_balanced<'a>(items: &[String], tasks: impl Iterator<Item = &'a BestWorstTask>) -> bool {
    let mut appearances: BTreeMap<&str, usize> = items.iter().map(|i| (i.as_str(), 0)).collect();
    for t in tasks {
        for s in t.shown.iter() {
            if let Some(c) = appearances.get_mut(s.as_str()) {
                *c += 1;
            }
        }
    }
    let mean = appearances.values().sum::<usize>() as f64 / items.len().max(1) as f64;
    appearances.values().all(|c| (*c as f64 - mean).abs() <= 1.0)
}

/// Scores a MaxDiff exercise with the counting estimator.
pub fn maxdiff(
    slice: &ResponseSlice,
    items: &[String],
    items_per_task: usize,
    options: &MetricOptions,
) -> AnalysisResult<MetricResult> {
    maxdiff_with(slice, items, items_per_task, &CountingEstimator::default(), options)
}

/// Scores a MaxDiff exercise with the given estimator.
///
/// Any malformed task fails the whole computation. An unbalanced design is
/// only flagged.
pub fn maxdiff_with(
    slice: &ResponseSlice,
    items: &[String],
    items_per_task: usize,
    estimator: &dyn UtilityEstimator,
    _options: &MetricOptions,
) -> AnalysisResult<MetricResult> {
    snafu::ensure!(
        items_per_task >= 2 && items_per_task <= items.len(),
        InvalidDesignSnafu {
            question: slice.question.clone(),
            detail: format!(
                "{} items per task is not possible with {} items",
                items_per_task,
                items.len()
            ),
        }
    );
    let known: BTreeSet<&str> = items.iter().map(|s| s.as_str()).collect();
    let mut validated = ValidatedTasks {
        items,
        tasks: vec![],
    };
    let mut versions: BTreeMap<Vec<&[String]>, &[BestWorstTask]> = BTreeMap::new();
    let mut answered: Vec<&SliceRow> = Vec::new();
    for row in slice.rows.iter() {
        let tasks = match &row.answer {
            Answer::Missing => continue,
            Answer::BestWorst(tasks) => tasks,
            other => {
                return UnexpectedAnswerSnafu {
                    question: slice.question.clone(),
                    respondent: row.respondent.clone(),
                    expected: "best-worst tasks",
                    found: other.type_name(),
                }
                .fail()
            }
        };
        for t in tasks.iter() {
            check_task(&slice.question, &row.respondent, &known, items_per_task, t)?;
            validated.tasks.push((row, t));
        }
        let version: Vec<&[String]> = tasks.iter().map(|t| t.shown.as_slice()).collect();
        versions.entry(version).or_insert(tasks.as_slice());
        answered.push(row);
    }
    snafu::ensure!(
        !validated.tasks.is_empty(),
        NoResponsesSnafu {
            question: slice.question.clone()
        }
    );

    let mut scores = estimator.estimate(&slice.question, &validated)?;
    let total: f64 = scores.iter().map(|s| s.score + 1.0).sum();
    for s in scores.iter_mut() {
        s.share = if total > 0.0 {
            100.0 * (s.score + 1.0) / total
        } else {
            100.0 / items.len() as f64
        };
    }
    scores.sort_by(|a, b| b.score.total_cmp(&a.score));
    for (i, s) in scores.iter_mut().enumerate() {
        s.rank = i + 1;
    }
    debug!("maxdiff: {}: {:?}", estimator.name(), scores);

    // Each version counts once, however many respondents saw it.
    let balanced = is_balanced(items, versions.values().flat_map(|tasks| tasks.iter()));
    let mut flags = Vec::new();
    if !balanced {
        warn!(
            "maxdiff: {}: unbalanced design over {} versions",
            slice.question,
            versions.len()
        );
        flags.push(format!(
            "the design shows some items more often than others across its {} versions",
            versions.len()
        ));
    }
    let (base, respondents) = base_of(answered.into_iter());
    Ok(MetricResult {
        metric: MetricKind::MaxDiff,
        questions: vec![slice.question.clone()],
        wave: slice.wave,
        base,
        respondents,
        scale: None,
        sample: None,
        value: MetricValue::MaxDiff(MaxDiffResult {
            estimator: estimator.name().to_string(),
            items: scores,
            design_balanced: balanced,
            versions: versions.len(),
        }),
        flags,
    })
}
