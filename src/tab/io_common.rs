// Primitives shared by the response readers.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::Path;

use crate::tab::config_reader::{DataSource, Layout};
use crate::tab::*;

/// The cells of a CSV file or a worksheet. Every row keeps its 1-based line number.
#[derive(Debug, Clone)]
pub struct Table {
    pub path: String,
    pub header: Vec<String>,
    pub rows: Vec<(usize, Vec<String>)>,
}

/// All the answers of one respondent in one wave.
#[derive(Debug, Clone)]
pub struct ResponseRecord {
    pub respondent: Respondent,
    pub answers: Vec<(QuestionId, Answer)>,
}

pub fn simplify_file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

pub fn make_default_id(path: &str) -> impl Fn(usize) -> String {
    let simplified_file_name = simplify_file_name(path);
    move |lineno| format!("{}-{:08}", simplified_file_name, lineno)
}

pub fn invalid_cell(question: &QuestionDefinition, lineno: usize, content: &str, detail: &str) -> TabError {
    TabError::InvalidCell {
        lineno,
        question: question.id.to_string(),
        content: content.to_string(),
        detail: detail.to_string(),
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(';')
        .map(|x| x.trim())
        .filter(|x| !x.is_empty())
        .map(|x| x.to_string())
        .collect()
}

// price=4;service=5
fn parse_matrix_cell(s: &str) -> Option<Vec<(String, f64)>> {
    let mut res = Vec::new();
    for part in s.split(';').map(|x| x.trim()).filter(|x| !x.is_empty()) {
        let (row, value) = part.split_once('=')?;
        res.push((row.trim().to_string(), value.trim().parse::<f64>().ok()?));
    }
    Some(res)
}

// A|B|C:A:C;B|C|D:B:D
fn parse_best_worst(s: &str) -> Option<Vec<BestWorstTask>> {
    let mut res = Vec::new();
    for part in s.split(';').map(|x| x.trim()).filter(|x| !x.is_empty()) {
        let mut fields = part.split(':');
        let shown = fields.next()?;
        let best = fields.next()?.trim();
        let worst = fields.next()?.trim();
        if fields.next().is_some() {
            return None;
        }
        res.push(BestWorstTask {
            shown: shown.split('|').map(|x| x.trim().to_string()).collect(),
            best: best.to_string(),
            worst: worst.to_string(),
        });
    }
    Some(res)
}

/// Reads the answer of one cell, according to the kind of the question.
/// Empty cells are missing answers.
pub fn parse_cell(question: &QuestionDefinition, cell: &str, lineno: usize) -> TabResult<Answer> {
    let s = cell.trim();
    if s.is_empty() {
        return Ok(Answer::Missing);
    }
    match &question.kind {
        QuestionKind::Scale(_) | QuestionKind::Numeric { .. } => s
            .parse::<f64>()
            .map(Answer::Number)
            .map_err(|_| invalid_cell(question, lineno, s, "not a number")),
        QuestionKind::SingleChoice { .. } => Ok(Answer::Choice(s.to_string())),
        QuestionKind::MultiChoice { .. } => Ok(Answer::Choices(split_list(s))),
        QuestionKind::Ranking { .. } => Ok(Answer::Ranking(split_list(s))),
        QuestionKind::OpenEnded => Ok(Answer::Text(s.to_string())),
        QuestionKind::Matrix { .. } => parse_matrix_cell(s)
            .map(Answer::Matrix)
            .ok_or_else(|| invalid_cell(question, lineno, s, "expected row=value pairs")),
        QuestionKind::MaxDiffTask { .. } => parse_best_worst(s)
            .map(Answer::BestWorst)
            .ok_or_else(|| invalid_cell(question, lineno, s, "expected shown|items:best:worst tasks")),
    }
}

fn column_of(table: &Table, name: &str) -> BTabResult<usize> {
    let idx = table
        .header
        .iter()
        .position(|h| h.trim() == name)
        .context(MissingColumnSnafu {
            name,
            path: table.path.as_str(),
        })?;
    Ok(idx)
}

fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(|s| s.as_str()).unwrap_or("")
}

// The respondent fields shared by both layouts: attributes and duration.
struct RespondentColumns {
    segments: Vec<(usize, String)>,
    duration: Option<usize>,
}

impl RespondentColumns {
    fn new(table: &Table, source: &DataSource) -> BTabResult<RespondentColumns> {
        let mut segments = Vec::new();
        for name in source.segment_columns.iter() {
            segments.push((column_of(table, name)?, name.clone()));
        }
        let duration = match &source.duration_column {
            Some(name) => Some(column_of(table, name)?),
            None => None,
        };
        Ok(RespondentColumns { segments, duration })
    }

    fn contains(&self, idx: usize) -> bool {
        self.duration == Some(idx) || self.segments.iter().any(|(i, _)| *i == idx)
    }

    fn respondent(&self, id: &str, wave: Wave, row: &[String], lineno: usize) -> BTabResult<Respondent> {
        let mut r = Respondent::new(id, wave);
        for (idx, name) in self.segments.iter() {
            let v = cell(row, *idx).trim();
            if !v.is_empty() {
                r.attributes.insert(name.clone(), v.to_string());
            }
        }
        if let Some(idx) = self.duration {
            let v = cell(row, idx).trim();
            if !v.is_empty() {
                let d = v.parse::<f64>().ok().context(InvalidCellSnafu {
                    lineno,
                    question: "duration",
                    content: v,
                    detail: "not a number of seconds",
                })?;
                r.duration_secs = Some(d);
            }
        }
        Ok(r)
    }
}

enum ColumnTarget<'a> {
    Question(&'a QuestionDefinition),
    MatrixRow(&'a QuestionDefinition, String),
}

// QID[row]
fn split_matrix_header(h: &str) -> Option<(&str, &str)> {
    let (q, rest) = h.split_once('[')?;
    let row = rest.strip_suffix(']')?;
    Some((q.trim(), row.trim()))
}

fn wide_records(table: &Table, source: &DataSource, study: &StudyDefinition) -> BTabResult<Vec<ResponseRecord>> {
    let id_col = source.respondent_column()?;
    let wave = source.default_wave();
    let default_id = make_default_id(&table.path);
    let rcols = RespondentColumns::new(table, source)?;

    let mut targets: Vec<(usize, ColumnTarget)> = Vec::new();
    for (idx, h) in table.header.iter().enumerate() {
        if idx == id_col || rcols.contains(idx) {
            continue;
        }
        let h = h.trim();
        let target = match study.question(&QuestionId::from(h)) {
            Ok(q) => Some(ColumnTarget::Question(q)),
            Err(_) => match split_matrix_header(h) {
                Some((qid, row)) => match study.question(&QuestionId::from(qid)) {
                    Ok(q) if matches!(q.kind, QuestionKind::Matrix { .. }) => {
                        Some(ColumnTarget::MatrixRow(q, row.to_string()))
                    }
                    _ => None,
                },
                None => None,
            },
        };
        match target {
            Some(t) => targets.push((idx, t)),
            None => debug!("wide_records: {}: skipping column {:?}", table.path, h),
        }
    }

    let mut res: Vec<ResponseRecord> = Vec::with_capacity(table.rows.len());
    for (lineno, row) in table.rows.iter() {
        let lineno = *lineno;
        let raw_id = row
            .get(id_col)
            .context(LineTooShortSnafu {
                lineno,
                column: id_col + 1,
            })?
            .trim();
        let id = if raw_id.is_empty() {
            default_id(lineno)
        } else {
            raw_id.to_string()
        };
        let respondent = rcols.respondent(&id, wave, row, lineno)?;

        let mut answers: Vec<(QuestionId, Answer)> = Vec::new();
        let mut matrices: BTreeMap<&QuestionId, Vec<(String, f64)>> = BTreeMap::new();
        for (idx, target) in targets.iter() {
            let content = cell(row, *idx);
            match target {
                ColumnTarget::Question(q) => {
                    answers.push((q.id.clone(), parse_cell(q, content, lineno)?));
                }
                ColumnTarget::MatrixRow(q, matrix_row) => {
                    let cells = matrices.entry(&q.id).or_default();
                    let v = content.trim();
                    if v.is_empty() {
                        continue;
                    }
                    let x = v
                        .parse::<f64>()
                        .map_err(|_| invalid_cell(q, lineno, v, "not a number"))?;
                    cells.push((matrix_row.clone(), x));
                }
            }
        }
        for (qid, cells) in matrices.into_iter() {
            let answer = if cells.is_empty() {
                Answer::Missing
            } else {
                Answer::Matrix(cells)
            };
            answers.push((qid.clone(), answer));
        }
        debug!("wide_records: line {}: {} answers for {}", lineno, answers.len(), id);
        res.push(ResponseRecord { respondent, answers });
    }
    Ok(res)
}

fn long_records(table: &Table, source: &DataSource, study: &StudyDefinition) -> BTabResult<Vec<ResponseRecord>> {
    let id_col = source.respondent_column()?;
    let question_col = source.question_column()?;
    let answer_col = source.answer_column()?;
    let wave_col = source.wave_column()?;
    let rcols = RespondentColumns::new(table, source)?;

    let mut grouped: BTreeMap<(Wave, String), ResponseRecord> = BTreeMap::new();
    for (lineno, row) in table.rows.iter() {
        let lineno = *lineno;
        let too_short = |column: usize| LineTooShortSnafu {
            lineno,
            column: column + 1,
        };
        let id = row.get(id_col).context(too_short(id_col))?.trim().to_string();
        // Rows are grouped by respondent id, there is no default id here.
        snafu::ensure!(
            !id.is_empty(),
            InvalidCellSnafu {
                lineno,
                question: "respondent",
                content: "",
                detail: "a long layout row needs a respondent id",
            }
        );
        let qid = row
            .get(question_col)
            .context(too_short(question_col))?
            .trim()
            .to_string();
        let content = row.get(answer_col).context(too_short(answer_col))?;
        let wave = match wave_col {
            Some(idx) => {
                let v = cell(row, idx).trim();
                v.parse::<u32>().ok().map(Wave).context(InvalidCellSnafu {
                    lineno,
                    question: "wave",
                    content: v,
                    detail: "not a wave number",
                })?
            }
            None => source.default_wave(),
        };
        let question = match study.question(&QuestionId::from(qid.as_str())) {
            Ok(q) => q,
            Err(_) => {
                warn!(
                    "long_records: {} line {}: skipping unknown question {:?}",
                    table.path, lineno, qid
                );
                continue;
            }
        };
        let answer = parse_cell(question, content, lineno)?;
        let record = match grouped.entry((wave, id.clone())) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(ResponseRecord {
                respondent: rcols.respondent(&id, wave, row, lineno)?,
                answers: vec![],
            }),
        };
        record.answers.push((question.id.clone(), answer));
    }
    Ok(grouped.into_values().collect())
}

pub fn records_from_table(
    table: &Table,
    source: &DataSource,
    study: &StudyDefinition,
) -> BTabResult<Vec<ResponseRecord>> {
    match source.layout {
        Layout::Wide => wide_records(table, source, study),
        Layout::Long => long_records(table, source, study),
    }
}

/// Adds the records to the store. A second answer of a respondent to the same
/// question in the same wave is an error.
pub fn load_records(records: Vec<ResponseRecord>, builder: &mut StoreBuilder) -> BTabResult<()> {
    for r in records.into_iter() {
        let id = r.respondent.id.to_string();
        let wave = r.respondent.wave;
        builder.add_respondent(r.respondent);
        for (qid, answer) in r.answers.into_iter() {
            builder
                .add_response(&id, &qid.0, wave, answer)
                .context(AnalysisSnafu {})?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

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
        let scale = ScaleSpec {
            construct: "importance".to_string(),
            min: 1,
            points: 5,
            labels: vec![],
            direction: ScaleDirection::Ascending,
        };
        StudyDefinition {
            name: "io".to_string(),
            questions: vec![
                question("NPS", QuestionKind::Scale(ScaleSpec::nps())),
                question(
                    "AWARE",
                    QuestionKind::MultiChoice {
                        options: vec!["A".into(), "B".into()],
                    },
                ),
                question(
                    "IMP",
                    QuestionKind::Matrix {
                        rows: vec!["price".into(), "service".into()],
                        scale,
                    },
                ),
                question(
                    "MD",
                    QuestionKind::MaxDiffTask {
                        items: vec!["A".into(), "B".into(), "C".into()],
                        items_per_task: 2,
                    },
                ),
            ],
            brand_lists: vec![],
            funnels: vec![],
        }
    }

    fn table(header: &[&str], rows: &[&[&str]]) -> Table {
        Table {
            path: "data/responses.csv".to_string(),
            header: header.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .iter()
                .enumerate()
                .map(|(i, r)| (i + 2, r.iter().map(|s| s.to_string()).collect()))
                .collect(),
        }
    }

    fn source(json: &str) -> DataSource {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn cells() {
        let study = study();
        let md = study.question(&QuestionId::from("MD")).unwrap();
        match parse_cell(md, "A|B:A:B; B|C:C:B", 3).unwrap() {
            Answer::BestWorst(tasks) => {
                assert_eq!(tasks.len(), 2);
                assert_eq!(tasks[1].shown, vec!["B".to_string(), "C".to_string()]);
                assert_eq!(tasks[1].best, "C");
            }
            x => panic!("{:?}", x),
        }
        assert!(parse_cell(md, "A|B:A", 3).is_err());
        let imp = study.question(&QuestionId::from("IMP")).unwrap();
        assert_eq!(
            parse_cell(imp, "price=4; service=2", 3).unwrap(),
            Answer::Matrix(vec![("price".to_string(), 4.0), ("service".to_string(), 2.0)])
        );
        let nps = study.question(&QuestionId::from("NPS")).unwrap();
        assert_eq!(parse_cell(nps, " ", 3).unwrap(), Answer::Missing);
        assert!(matches!(
            parse_cell(nps, "ten", 3),
            Err(TabError::InvalidCell { lineno: 3, .. })
        ));
    }

    #[test]
    fn wide_layout() {
        let t = table(
            &["id", "region", "NPS", "AWARE", "IMP[price]", "IMP[service]", "comment"],
            &[
                &["r1", "North", "9", "A;B", "4", "5", "great"],
                &["", "South", "", "B", "3", ""],
            ],
        );
        let s = source(r#"{"provider": "csv", "filePath": "x.csv", "segmentColumns": ["region"]}"#);
        let records = records_from_table(&t, &s, &study()).unwrap();
        assert_eq!(records.len(), 2);
        let r1 = &records[0];
        assert_eq!(r1.respondent.attributes.get("region").unwrap(), "North");
        assert_eq!(r1.answers.len(), 3);
        assert!(r1.answers.contains(&(
            QuestionId::from("IMP"),
            Answer::Matrix(vec![("price".to_string(), 4.0), ("service".to_string(), 5.0)])
        )));
        let r2 = &records[1];
        assert_eq!(r2.respondent.id, RespondentId::from("responses.csv-00000003"));
        assert!(r2.answers.contains(&(QuestionId::from("NPS"), Answer::Missing)));
    }

    #[test]
    fn long_layout() {
        let t = table(
            &["respondent", "question", "wave", "answer", "region"],
            &[
                &["r1", "NPS", "1", "10", "North"],
                &["r1", "AWARE", "1", "A", "North"],
                &["r1", "NPS", "2", "7", "North"],
                &["r2", "UNKNOWN", "1", "x", "South"],
            ],
        );
        let s = source(
            r#"{"provider": "csv", "filePath": "x.csv", "layout": "long",
                "waveColumn": 3, "answerColumn": "D", "segmentColumns": ["region"]}"#,
        );
        let records = records_from_table(&t, &s, &study()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].respondent.wave, Wave(1));
        assert_eq!(records[0].answers.len(), 2);
        assert_eq!(records[1].respondent.wave, Wave(2));

        let mut builder = ResponseStore::builder();
        load_records(records.clone(), &mut builder).unwrap();
        assert_eq!(builder.build().current_wave(), Wave(2));

        // Loading the same answers twice is a duplicate.
        let mut builder = ResponseStore::builder();
        let mut twice = records.clone();
        twice.extend(records);
        assert!(load_records(twice, &mut builder).is_err());
    }

    #[test]
    fn long_layout_row_without_id() {
        let t = table(
            &["respondent", "question", "answer"],
            &[&["r1", "NPS", "10"], &[" ", "NPS", "7"]],
        );
        let s = source(r#"{"provider": "csv", "filePath": "x.csv", "layout": "long"}"#);
        let err = records_from_table(&t, &s, &study()).unwrap_err();
        assert!(matches!(*err, TabError::InvalidCell { lineno: 3, .. }));
    }

    #[test]
    fn missing_segment_column() {
        let t = table(&["id", "NPS"], &[&["r1", "9"]]);
        let s = source(r#"{"provider": "csv", "filePath": "x.csv", "segmentColumns": ["region"]}"#);
        let err = records_from_table(&t, &s, &study()).unwrap_err();
        assert!(matches!(*err, TabError::MissingColumn { .. }));
    }
}
