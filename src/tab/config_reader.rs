use crate::tab::*;

use serde::{Deserialize, Serialize};
use serde_json::Value as JSValue;

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSettings {
    pub study_name: String,
    pub output_path: Option<String>,
    /// The wave to report on. Defaults to the latest wave in the data.
    pub wave: Option<u32>,
}

/// The header of the JSON report.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    pub study: String,
    pub wave: u32,
    pub fingerprint: String,
    pub min_base: usize,
    pub significance_level: f64,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Layout {
    /// One row per answer.
    Long,
    /// One row per respondent, one column per question.
    #[default]
    Wide,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub provider: String,
    pub file_path: String,
    #[serde(default)]
    pub layout: Layout,
    /// Wave of the responses when the file has no wave column.
    pub wave: Option<u32>,
    #[serde(rename = "firstDataRow")]
    _first_data_row: Option<JSValue>,
    #[serde(rename = "respondentColumn")]
    _respondent_column: Option<JSValue>,
    #[serde(rename = "questionColumn")]
    _question_column: Option<JSValue>,
    #[serde(rename = "waveColumn")]
    _wave_column: Option<JSValue>,
    #[serde(rename = "answerColumn")]
    _answer_column: Option<JSValue>,
    /// Header names of the columns holding respondent attributes.
    #[serde(default)]
    pub segment_columns: Vec<String>,
    /// Header name of the column holding the interview duration in seconds.
    pub duration_column: Option<String>,
    pub worksheet_name: Option<String>,
    pub delimiter: Option<String>,
}

impl DataSource {
    pub fn from_path(provider: &str, path: &str) -> DataSource {
        DataSource {
            provider: provider.to_string(),
            file_path: path.to_string(),
            layout: Layout::Wide,
            wave: None,
            _first_data_row: None,
            _respondent_column: None,
            _question_column: None,
            _wave_column: None,
            _answer_column: None,
            segment_columns: vec![],
            duration_column: None,
            worksheet_name: None,
            delimiter: None,
        }
    }

    /// The first row holding data (0-based). The row before it holds the headers.
    pub fn first_data_row(&self) -> BTabResult<usize> {
        Ok(read_js_int_or(&self._first_data_row, 2)?.max(2) - 1)
    }

    pub fn respondent_column(&self) -> BTabResult<usize> {
        Ok(read_js_int_or(&self._respondent_column, 1)? - 1)
    }

    pub fn question_column(&self) -> BTabResult<usize> {
        Ok(read_js_int_or(&self._question_column, 2)? - 1)
    }

    pub fn wave_column(&self) -> BTabResult<Option<usize>> {
        match &self._wave_column {
            None => Ok(None),
            x => Ok(Some(read_js_int(x)? - 1)),
        }
    }

    pub fn answer_column(&self) -> BTabResult<usize> {
        Ok(read_js_int_or(&self._answer_column, 3)? - 1)
    }

    pub fn default_wave(&self) -> Wave {
        self.wave.map(Wave).unwrap_or(Wave::FIRST)
    }
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyConfig {
    pub output_settings: OutputSettings,
    #[serde(default)]
    pub data_sources: Vec<DataSource>,
    pub study: StudyDefinition,
    pub analyses: AnalysisPlan,
    #[serde(default)]
    pub options: MetricOptions,
}

pub fn read_config(path: &str) -> TabResult<StudyConfig> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let config: StudyConfig =
        serde_json::from_str(&contents).context(ParsingJsonSnafu { path })?;
    info!(
        "read_config: study {}: {} questions, {} analyses",
        config.study.name,
        config.study.questions.len(),
        config.analyses.analyses.len()
    );
    Ok(config)
}

pub fn read_reference(path: &str) -> TabResult<JSValue> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let js: JSValue = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path })?;
    Ok(js)
}

fn read_js_int_or(x: &Option<JSValue>, default: usize) -> BTabResult<usize> {
    match x {
        None => Ok(default),
        _ => read_js_int(x),
    }
}

// Column and row indexes are 1-based numbers, or Excel-style column letters.
fn read_js_int(x: &Option<JSValue>) -> BTabResult<usize> {
    let fail = || ParsingColumnIndexSnafu {
        content: format!("{:?}", x),
    };
    let res = match x {
        Some(JSValue::Number(n)) => n.as_u64().map(|x| x as usize),
        Some(JSValue::String(s)) if !s.is_empty() && s.chars().all(|c| c.is_ascii_alphabetic()) => {
            Some(
                s.to_ascii_lowercase()
                    .chars()
                    .fold(0, |acc, c| acc * 26 + (c as usize - 'a' as usize + 1)),
            )
        }
        Some(JSValue::String(s)) => s.parse::<usize>().ok(),
        _ => None,
    };
    match res {
        Some(i) if i >= 1 => Ok(i),
        _ => Err(Box::new(fail().build())),
    }
}
