// Respondent records stored as a JSON array.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::tab::{
    io_common::{invalid_cell, parse_cell, ResponseRecord},
    *,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonRecord {
    id: String,
    wave: Option<u32>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    duration_secs: Option<f64>,
    #[serde(default)]
    answers: BTreeMap<String, JSValue>,
}

fn string_list(question: &QuestionDefinition, lineno: usize, xs: &[JSValue]) -> TabResult<Vec<String>> {
    xs.iter()
        .map(|x| match x {
            JSValue::String(s) => Ok(s.clone()),
            _ => Err(invalid_cell(question, lineno, &x.to_string(), "expected a list of labels")),
        })
        .collect()
}

fn answer_from_json(question: &QuestionDefinition, lineno: usize, value: &JSValue) -> TabResult<Answer> {
    match (value, &question.kind) {
        (JSValue::Null, _) => Ok(Answer::Missing),
        (JSValue::String(s), _) => parse_cell(question, s, lineno),
        (JSValue::Number(n), QuestionKind::Scale(_) | QuestionKind::Numeric { .. }) => n
            .as_f64()
            .map(Answer::Number)
            .ok_or_else(|| invalid_cell(question, lineno, &n.to_string(), "not a number")),
        (JSValue::Number(n), _) => parse_cell(question, &n.to_string(), lineno),
        (JSValue::Array(xs), QuestionKind::MultiChoice { .. }) => {
            Ok(Answer::Choices(string_list(question, lineno, xs)?))
        }
        (JSValue::Array(xs), QuestionKind::Ranking { .. }) => {
            Ok(Answer::Ranking(string_list(question, lineno, xs)?))
        }
        (JSValue::Array(_), QuestionKind::MaxDiffTask { .. }) => {
            let tasks: Vec<BestWorstTask> = serde_json::from_value(value.clone())
                .map_err(|e| invalid_cell(question, lineno, &value.to_string(), &e.to_string()))?;
            Ok(Answer::BestWorst(tasks))
        }
        (JSValue::Object(m), QuestionKind::Matrix { .. }) => {
            let mut cells: Vec<(String, f64)> = Vec::with_capacity(m.len());
            for (row, v) in m.iter() {
                match v {
                    JSValue::Null => {}
                    JSValue::Number(n) => match n.as_f64() {
                        Some(x) => cells.push((row.clone(), x)),
                        None => whatever!("Line {}: {} is not a number", lineno, n),
                    },
                    _ => {
                        return Err(invalid_cell(question, lineno, &v.to_string(), "expected a number"));
                    }
                }
            }
            if cells.is_empty() {
                Ok(Answer::Missing)
            } else {
                Ok(Answer::Matrix(cells))
            }
        }
        _ => Err(invalid_cell(
            question,
            lineno,
            &value.to_string(),
            &format!("unexpected value for a {} question", question.kind.type_name()),
        )),
    }
}

/// Reads an array of respondent records. The line numbers of the errors are the
/// positions of the records in the array, starting at 1.
pub fn read_json_records(
    path: &str,
    source: &DataSource,
    study: &StudyDefinition,
) -> BTabResult<Vec<ResponseRecord>> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let records: Vec<JsonRecord> =
        serde_json::from_str(&contents).context(ParsingJsonSnafu { path })?;
    let mut res: Vec<ResponseRecord> = Vec::with_capacity(records.len());
    for (idx, jr) in records.into_iter().enumerate() {
        let lineno = idx + 1;
        let wave = jr.wave.map(Wave).unwrap_or_else(|| source.default_wave());
        let mut respondent = Respondent::new(&jr.id, wave);
        respondent.attributes = jr.attributes;
        respondent.duration_secs = jr.duration_secs;
        let mut answers: Vec<(QuestionId, Answer)> = Vec::with_capacity(jr.answers.len());
        for (qid, value) in jr.answers.iter() {
            let question = match study.question(&QuestionId::from(qid.as_str())) {
                Ok(q) => q,
                Err(_) => {
                    warn!("read_json_records: {} record {}: skipping unknown question {:?}", path, lineno, qid);
                    continue;
                }
            };
            answers.push((question.id.clone(), answer_from_json(question, lineno, value)?));
        }
        res.push(ResponseRecord { respondent, answers });
    }
    Ok(res)
}
