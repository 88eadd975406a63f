//! Data-quality flags: speeders and straightliners.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::*;
use crate::metrics::median;
use crate::store::ResponseStore;

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QualityIssue {
    /// Completed the interview in less than the speeder ratio of the median time.
    Speeder { duration_secs: f64, threshold_secs: f64 },
    /// Gave the same answer to every row of a matrix.
    Straightliner { question: QuestionId, value: f64 },
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct QualityFlag {
    pub respondent: RespondentId,
    pub issue: QualityIssue,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub wave: Wave,
    pub respondents: usize,
    pub median_duration_secs: Option<f64>,
    pub flags: Vec<QualityFlag>,
    /// Whether flagged respondents were removed before the analyses.
    pub dropped: bool,
}

impl QualityReport {
    pub fn flagged_respondents(&self) -> BTreeSet<RespondentId> {
        self.flags.iter().map(|f| f.respondent.clone()).collect()
    }

    pub fn speeders(&self) -> usize {
        self.flags
            .iter()
            .filter(|f| matches!(f.issue, QualityIssue::Speeder { .. }))
            .count()
    }

    pub fn straightliners(&self) -> usize {
        self.flags
            .iter()
            .filter(|f| matches!(f.issue, QualityIssue::Straightliner { .. }))
            .count()
    }
}

fn speeders(store: &ResponseStore, wave: Wave, ratio: f64) -> (Option<f64>, Vec<QualityFlag>) {
    let durations: Vec<(&RespondentId, f64)> = store
        .respondents(wave)
        .filter_map(|r| r.duration_secs.map(|d| (&r.id, d)))
        .collect();
    let raw: Vec<f64> = durations.iter().map(|(_, d)| *d).collect();
    let med = match median(&raw) {
        Some(m) if m > 0.0 => m,
        _ => return (None, vec![]),
    };
    let threshold = ratio * med;
    let flags = durations
        .iter()
        .filter(|(_, d)| *d < threshold)
        .map(|(rid, d)| QualityFlag {
            respondent: (*rid).clone(),
            issue: QualityIssue::Speeder {
                duration_secs: *d,
                threshold_secs: threshold,
            },
        })
        .collect();
    (Some(med), flags)
}

fn straightliners(
    store: &ResponseStore,
    study: &StudyDefinition,
    wave: Wave,
    min_rows: usize,
) -> Vec<QualityFlag> {
    let mut res = Vec::new();
    let mut answers: Vec<(&QuestionId, &BTreeMap<RespondentId, Answer>)> =
        store.answers_in_wave(wave).collect();
    answers.sort_by(|a, b| a.0.cmp(b.0));
    for (qid, by_respondent) in answers {
        let rows = match study.question(qid).map(|q| &q.kind) {
            Ok(QuestionKind::Matrix { rows, .. }) => rows,
            _ => continue,
        };
        if rows.len() < min_rows {
            continue;
        }
        for (rid, answer) in by_respondent.iter() {
            if let Answer::Matrix(cells) = answer {
                let first = match cells.first() {
                    Some((_, x)) => *x,
                    None => continue,
                };
                if cells.len() >= rows.len() && cells.iter().all(|(_, x)| *x == first) {
                    debug!("straightliners: {} on {}", rid, qid);
                    res.push(QualityFlag {
                        respondent: rid.clone(),
                        issue: QualityIssue::Straightliner {
                            question: qid.clone(),
                            value: first,
                        },
                    });
                }
            }
        }
    }
    res
}

/// Flags the speeders and straightliners of a wave.
pub fn assess(
    store: &ResponseStore,
    study: &StudyDefinition,
    wave: Wave,
    options: &MetricOptions,
) -> QualityReport {
    let (median_duration_secs, mut flags) = speeders(store, wave, options.speeder_ratio);
    flags.extend(straightliners(store, study, wave, options.straightline_min_rows));
    let report = QualityReport {
        wave,
        respondents: store.respondents(wave).count(),
        median_duration_secs,
        flags,
        dropped: false,
    };
    info!(
        "assess: wave {}: {} speeders, {} straightliners out of {} respondents",
        wave,
        report.speeders(),
        report.straightliners(),
        report.respondents
    );
    report
}
