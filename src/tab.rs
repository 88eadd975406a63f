use log::{debug, info, warn};

#[cfg(test)]
use snafu::ErrorCompat;
use snafu::{prelude::*, Snafu};
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use serde_json::Value as JSValue;
use survey_metrics::series::fingerprint;
use survey_metrics::*;
use text_diff::print_diff;

use crate::tab::config_reader::*;

pub mod config_reader;
mod io_common;
mod io_csv;
mod io_excel;
mod io_json;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TabError {
    #[snafu(display("Error opening file {path}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing the JSON content of {path}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Error serializing the report"))]
    SerializingJson { source: serde_json::Error },
    #[snafu(display("Error opening Excel file {path}"))]
    OpeningExcel {
        source: calamine::XlsxError,
        path: String,
    },
    #[snafu(display("Excel file {path} has no worksheet {worksheet}"))]
    MissingWorksheet { path: String, worksheet: String },
    #[snafu(display("Excel file {path}: cell at line {lineno} holds an error: {content}"))]
    ExcelErrorCell {
        path: String,
        lineno: usize,
        content: String,
    },
    #[snafu(display("Error opening CSV file {path}"))]
    CsvOpen { source: csv::Error, path: String },
    #[snafu(display("Error parsing line {lineno} of a CSV file"))]
    CsvLineParse { source: csv::Error, lineno: usize },
    #[snafu(display("Line {lineno} is too short: column {column} is missing"))]
    LineTooShort { lineno: usize, column: usize },
    #[snafu(display("Line {lineno}, question {question}: cannot read {content:?}: {detail}"))]
    InvalidCell {
        lineno: usize,
        question: String,
        content: String,
        detail: String,
    },
    #[snafu(display("Column {name} is not in the header of {path}"))]
    MissingColumn { name: String, path: String },
    #[snafu(display("Cannot read a column index from {content}"))]
    ParsingColumnIndex { content: String },
    #[snafu(display("Analysis failed: {source}"))]
    Analysis { source: AnalysisError },
    #[snafu(display("Error writing the report to {path}"))]
    WritingOutput {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("The configuration file has no parent directory"))]
    MissingParentDir {},

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type TabResult<T> = Result<T, TabError>;
pub type BTabResult<T> = Result<T, Box<TabError>>;

/// Command-line settings that take precedence over the configuration file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub input: Option<String>,
    pub input_type: Option<String>,
    pub out: Option<String>,
    pub min_base: Option<usize>,
    pub drop_flagged: bool,
}

fn apply_overrides(config: &mut StudyConfig, overrides: &Overrides) -> TabResult<()> {
    if let Some(input) = &overrides.input {
        if config.data_sources.is_empty() {
            let provider = match (&overrides.input_type, Path::new(input).extension()) {
                (Some(t), _) => t.clone(),
                (None, Some(ext)) => ext.to_string_lossy().to_lowercase(),
                (None, None) => whatever!("Cannot guess the type of input {}", input),
            };
            config.data_sources.push(DataSource::from_path(&provider, input));
        } else {
            config.data_sources[0].file_path = input.clone();
        }
    }
    if let Some(t) = &overrides.input_type {
        if let Some(source) = config.data_sources.first_mut() {
            source.provider = t.clone();
        }
    }
    if let Some(min_base) = overrides.min_base {
        config.options.min_base = min_base;
    }
    if overrides.drop_flagged {
        config.analyses.drop_flagged = true;
    }
    if config.analyses.wave.is_none() {
        config.analyses.wave = config.output_settings.wave.map(Wave);
    }
    Ok(())
}

fn read_source(
    root_path: &Path,
    source: &DataSource,
    study: &StudyDefinition,
    builder: &mut StoreBuilder,
) -> BTabResult<()> {
    let p: PathBuf = root_path.join(&source.file_path);
    let p2 = p.as_path().display().to_string();
    info!("Attempting to read response file {:?}", p2);
    let records = match source.provider.as_str() {
        "csv" => {
            let table = io_csv::read_csv_table(&p2, source)?;
            io_common::records_from_table(&table, source, study)?
        }
        "xlsx" | "excel" => {
            let table = io_excel::read_excel_table(&p2, source)?;
            io_common::records_from_table(&table, source, study)?
        }
        "json" => io_json::read_json_records(&p2, source, study)?,
        x => {
            return Err(Box::new(TabError::Whatever {
                message: format!("Provider not implemented {:?}", x),
                source: None,
            }))
        }
    };
    info!("read_source: {} records in {}", records.len(), p2);
    io_common::load_records(records, builder)
}

/// Reads the configuration and the responses, and computes the report.
pub fn compute_report(config_path: &str, overrides: &Overrides) -> TabResult<(StudyConfig, Report)> {
    let config_p = Path::new(config_path);
    let mut config = read_config(config_path)?;
    apply_overrides(&mut config, overrides)?;
    debug!("config: {:?}", config);

    if config.data_sources.is_empty() {
        whatever!("No data sources in configuration {}", config_path);
    }

    let root_p = config_p.parent().context(MissingParentDirSnafu {})?;
    let mut builder = ResponseStore::builder();
    for source in config.data_sources.iter() {
        read_source(root_p, source, &config.study, &mut builder).map_err(|e| *e)?;
    }
    let store = builder.build();
    info!(
        "compute_report: {} waves, current wave {}",
        store.waves().len(),
        store.current_wave()
    );

    let report = run_plan(&config.study, &store, &config.analyses, &config.options)
        .context(AnalysisSnafu {})?;
    Ok((config, report))
}

fn build_report_js(config: &StudyConfig, report: &Report) -> TabResult<JSValue> {
    let fp = fingerprint(&config.study).context(AnalysisSnafu {})?;
    let c = OutputConfig {
        study: config.output_settings.study_name.clone(),
        wave: report.wave.0,
        fingerprint: fp,
        min_base: config.options.min_base,
        significance_level: config.options.significance_level,
    };
    let report_js = serde_json::to_value(report).context(SerializingJsonSnafu {})?;
    Ok(json!({
        "config": c,
        "report": report_js }))
}

fn write_output(
    config: &StudyConfig,
    root_path: &Path,
    overrides: &Overrides,
    pretty_js: &str,
) -> TabResult<()> {
    let target: Option<PathBuf> = match (&overrides.out, &config.output_settings.output_path) {
        (Some(o), _) if o == "stdout" => None,
        (Some(o), _) => Some(PathBuf::from(o)),
        (None, Some(o)) if o == "stdout" => None,
        (None, Some(o)) => Some(root_path.join(o)),
        (None, None) => None,
    };
    match target {
        None => {
            println!("{}", pretty_js);
        }
        Some(p) => {
            let path = p.display().to_string();
            info!("Writing report to {}", path);
            fs::write(&p, pretty_js).context(WritingOutputSnafu { path })?;
        }
    }
    Ok(())
}

pub fn run_analysis(
    config_path: &str,
    check_report_path: Option<String>,
    overrides: &Overrides,
) -> TabResult<()> {
    let (config, report) = compute_report(config_path, overrides)?;
    for w in report.warnings.iter() {
        warn!("{}", w);
    }

    // Assemble the final json
    let result_js = build_report_js(&config, &report)?;
    let pretty_js_report = serde_json::to_string_pretty(&result_js).context(SerializingJsonSnafu {})?;
    let root_p = Path::new(config_path)
        .parent()
        .context(MissingParentDirSnafu {})?;
    write_output(&config, root_p, overrides, &pretty_js_report)?;

    // The reference report, if provided for comparison
    if let Some(report_p) = check_report_path {
        let report_ref = read_reference(&report_p)?;
        debug!("reference: {:?}", report_ref);
        let pretty_js_report_ref =
            serde_json::to_string_pretty(&report_ref).context(SerializingJsonSnafu {})?;
        if pretty_js_report_ref != pretty_js_report {
            warn!("Found differences with the reference report");
            print_diff(
                pretty_js_report_ref.as_str(),
                pretty_js_report.as_ref(),
                "\n",
            );
            whatever!("Difference detected between computed report and reference report")
        }
    }

    Ok(())
}

#[cfg(test)]
fn test_config_path(test_name: &str) -> String {
    let test_dir = option_env!("SURVEYTAB_TEST_DIR").unwrap_or(concat!(env!("CARGO_MANIFEST_DIR"), "/tests"));
    format!("{}/{}/{}_config.json", test_dir, test_name, test_name)
}

#[cfg(test)]
fn run_report_test(test_name: &str, overrides: &Overrides) -> (StudyConfig, Report) {
    let _ = env_logger::builder().is_test(true).try_init();
    info!("Running test {}", test_name);
    match compute_report(&test_config_path(test_name), overrides) {
        Ok(x) => x,
        Err(e) => {
            eprintln!("An error occured {}", e);
            if let Some(bt) = ErrorCompat::backtrace(&e) {
                eprintln!("trace: {}", bt);
            }
            panic!("test {} failed: {}", test_name, e);
        }
    }
}

#[cfg(test)]
pub fn test_wrapper(test_name: &str) -> Report {
    run_report_test(test_name, &Overrides::default()).1
}
