// ********* Identifiers ***********

use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::collections::BTreeMap;
use std::fmt::Display;

#[derive(Eq, PartialEq, Debug, Clone, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RespondentId(pub String);

#[derive(Eq, PartialEq, Debug, Clone, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuestionId(pub String);

/// A fielding wave of a tracking study. Ad-hoc studies only use wave 1.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Wave(pub u32);

impl Wave {
    pub const FIRST: Wave = Wave(1);
}

impl Display for RespondentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for QuestionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for Wave {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "W{}", self.0)
    }
}

impl From<&str> for RespondentId {
    fn from(s: &str) -> Self {
        RespondentId(s.to_string())
    }
}

impl From<&str> for QuestionId {
    fn from(s: &str) -> Self {
        QuestionId(s.to_string())
    }
}

// ********* Input data structures ***********

/// One choice task of a best-worst (MaxDiff) exercise.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct BestWorstTask {
    pub shown: Vec<String>,
    pub best: String,
    pub worst: String,
}

/// The raw answer of one respondent to one question.
///
/// Matrix answers carry every row answered by the respondent, and best-worst
/// answers carry every task of the exercise, so that a (respondent, question,
/// wave) triple always maps to exactly one answer.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Answer {
    /// Shown but not answered (or routed around).
    Missing,
    Number(f64),
    Choice(String),
    Choices(Vec<String>),
    Text(String),
    Matrix(Vec<(String, f64)>),
    Ranking(Vec<String>),
    BestWorst(Vec<BestWorstTask>),
}

impl Answer {
    pub fn is_missing(&self) -> bool {
        matches!(self, Answer::Missing)
    }

    /// The labels selected by this answer, for choice-style answers.
    pub fn selected_labels(&self) -> Option<Vec<&str>> {
        match self {
            Answer::Choice(s) => Some(vec![s.as_str()]),
            Answer::Choices(v) => Some(v.iter().map(|s| s.as_str()).collect()),
            Answer::Missing => Some(vec![]),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Answer::Missing => "missing",
            Answer::Number(_) => "number",
            Answer::Choice(_) => "choice",
            Answer::Choices(_) => "choices",
            Answer::Text(_) => "text",
            Answer::Matrix(_) => "matrix",
            Answer::Ranking(_) => "ranking",
            Answer::BestWorst(_) => "best_worst",
        }
    }
}

/// A respondent of one wave, with the attributes used for segmentation.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Respondent {
    pub id: RespondentId,
    pub wave: Wave,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Time taken to complete the interview, if the fielding system reports it.
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

impl Respondent {
    pub fn new(id: &str, wave: Wave) -> Respondent {
        Respondent {
            id: RespondentId::from(id),
            wave,
            attributes: BTreeMap::new(),
            duration_secs: None,
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Respondent {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }
}

// ********* Study definition ***********

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDirection {
    /// The highest scale point is the most favourable one.
    #[default]
    Ascending,
    Descending,
}

/// A rating scale. Every question measuring the same construct within a study
/// must use the same point count and labels.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleSpec {
    /// The construct measured, such as "satisfaction" or "likelihood_to_recommend".
    pub construct: String,
    /// Value of the lowest scale point (0 for NPS, 1 for most rating scales).
    #[serde(default = "ScaleSpec::default_min")]
    pub min: i32,
    pub points: u32,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub direction: ScaleDirection,
}

impl ScaleSpec {
    fn default_min() -> i32 {
        1
    }

    pub fn max(&self) -> i32 {
        self.min + self.points as i32 - 1
    }

    pub fn contains(&self, value: f64) -> bool {
        value.fract() == 0.0 && value >= self.min as f64 && value <= self.max() as f64
    }

    /// The standard 0-10 recommendation scale.
    pub fn nps() -> ScaleSpec {
        ScaleSpec {
            construct: "likelihood_to_recommend".to_string(),
            min: 0,
            points: 11,
            labels: vec![],
            direction: ScaleDirection::Ascending,
        }
    }

    pub fn signature(&self) -> ScaleSignature {
        ScaleSignature {
            min: self.min,
            points: self.points,
        }
    }
}

/// The part of a scale that matters for comparing two metric results.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScaleSignature {
    pub min: i32,
    pub points: u32,
}

/// The construct of a question. Each variant only carries what it needs.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    SingleChoice {
        options: Vec<String>,
    },
    MultiChoice {
        options: Vec<String>,
    },
    Matrix {
        rows: Vec<String>,
        scale: ScaleSpec,
    },
    Scale(ScaleSpec),
    OpenEnded,
    Numeric {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    Ranking {
        items: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    MaxDiffTask {
        items: Vec<String>,
        items_per_task: u32,
    },
}

impl QuestionKind {
    pub fn scale(&self) -> Option<&ScaleSpec> {
        match self {
            QuestionKind::Scale(s) => Some(s),
            QuestionKind::Matrix { scale, .. } => Some(scale),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            QuestionKind::SingleChoice { .. } => "single_choice",
            QuestionKind::MultiChoice { .. } => "multi_choice",
            QuestionKind::Matrix { .. } => "matrix",
            QuestionKind::Scale(_) => "scale",
            QuestionKind::OpenEnded => "open_ended",
            QuestionKind::Numeric { .. } => "numeric",
            QuestionKind::Ranking { .. } => "ranking",
            QuestionKind::MaxDiffTask { .. } => "max_diff_task",
        }
    }
}

/// Show the question only to respondents who gave one of the listed answers.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayCondition {
    pub question: QuestionId,
    pub any_of: Vec<String>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDefinition {
    pub id: QuestionId,
    #[serde(default)]
    pub text: Option<String>,
    pub kind: QuestionKind,
    /// The options of this question are the selections made at this question.
    #[serde(default)]
    pub piped_from: Option<QuestionId>,
    #[serde(default)]
    pub display_logic: Option<DisplayCondition>,
}

/// An ordered list of brands (or attributes) shared by all paired questions.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct BrandList {
    pub name: String,
    pub brands: Vec<String>,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct FunnelStage {
    pub name: String,
    pub question: QuestionId,
}

/// A piping chain such as awareness -> consideration -> trial -> usage.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunnelChain {
    pub name: String,
    pub brand_list: String,
    pub stages: Vec<FunnelStage>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyDefinition {
    pub name: String,
    pub questions: Vec<QuestionDefinition>,
    #[serde(default)]
    pub brand_lists: Vec<BrandList>,
    #[serde(default)]
    pub funnels: Vec<FunnelChain>,
}

impl StudyDefinition {
    pub fn question(&self, id: &QuestionId) -> AnalysisResult<&QuestionDefinition> {
        self.questions
            .iter()
            .find(|q| q.id == *id)
            .ok_or_else(|| AnalysisError::Configuration {
                detail: format!("question {} is not defined in study {}", id, self.name),
            })
    }

    pub fn brand_list(&self, name: &str) -> AnalysisResult<&BrandList> {
        self.brand_lists
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| AnalysisError::Configuration {
                detail: format!("brand list {} is not defined in study {}", name, self.name),
            })
    }

    pub fn funnel(&self, name: &str) -> AnalysisResult<&FunnelChain> {
        self.funnels
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| AnalysisError::Configuration {
                detail: format!("funnel {} is not defined in study {}", name, self.name),
            })
    }
}

// ********* Configuration **********

#[derive(PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpsThresholds {
    /// Scores up to and including this value are detractors.
    pub detractor_max: u8,
    /// Scores from this value upwards are promoters.
    pub promoter_min: u8,
}

impl Default for NpsThresholds {
    fn default() -> Self {
        NpsThresholds {
            detractor_max: 6,
            promoter_min: 9,
        }
    }
}

/// How respondents are weighted in every calculator.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Weighting {
    #[default]
    Unweighted,
    /// Read the weight from a numeric respondent attribute.
    Attribute(String),
}

/// Weight applied to one purchase-intent answer in demand estimation.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct IntentWeight {
    pub label: String,
    pub weight: f64,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Calibration(pub Vec<IntentWeight>);

impl Calibration {
    pub fn weight_of(&self, label: &str) -> Option<f64> {
        let l = label.trim();
        self.0
            .iter()
            .find(|iw| iw.label.eq_ignore_ascii_case(l))
            .map(|iw| iw.weight)
    }
}

impl Default for Calibration {
    fn default() -> Self {
        let w = |label: &str, weight: f64| IntentWeight {
            label: label.to_string(),
            weight,
        };
        Calibration(vec![
            w("definitely", 0.8),
            w("probably", 0.3),
            w("might or might not", 0.0),
            w("probably not", 0.0),
            w("definitely not", 0.0),
        ])
    }
}

/// Where the quadrant lines of an importance-performance grid are drawn.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum IpaSplit {
    #[default]
    Median,
    Thresholds { importance: f64, performance: f64 },
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricOptions {
    pub nps_thresholds: NpsThresholds,
    /// Number of favourable scale points counted in the top box (2 for T2B).
    pub top_box: u32,
    pub weighting: Weighting,
    pub calibration: Calibration,
    pub ipa_split: IpaSplit,
    /// Segments with fewer respondents than this are suppressed in crosstabs.
    pub min_base: usize,
    pub significance_level: f64,
    /// Matrices with fewer rows are not checked for straightlining.
    pub straightline_min_rows: usize,
    /// A respondent faster than this fraction of the median duration is a speeder.
    pub speeder_ratio: f64,
}

impl Default for MetricOptions {
    fn default() -> Self {
        MetricOptions {
            nps_thresholds: NpsThresholds::default(),
            top_box: 2,
            weighting: Weighting::Unweighted,
            calibration: Calibration::default(),
            ipa_split: IpaSplit::Median,
            min_base: 30,
            significance_level: 0.05,
            straightline_min_rows: 4,
            speeder_ratio: 0.33,
        }
    }
}

// ********* Errors **********

/// The three error classes of the propagation policy.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed input to one calculator. Reported next to the metric.
    Validation,
    /// Not enough data to compute. Reported next to the metric.
    DataSufficiency,
    /// The study design itself is broken. Aborts the report.
    Configuration,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AnalysisError {
    #[snafu(display("question {question} has no responses in wave {wave}"))]
    QuestionNotFound { question: QuestionId, wave: Wave },

    #[snafu(display(
        "respondent {respondent} answered question {question} twice in wave {wave}"
    ))]
    DuplicateResponse {
        respondent: RespondentId,
        question: QuestionId,
        wave: Wave,
    },

    #[snafu(display(
        "question {question}: value {value} (respondent {respondent}) is outside the scale [{min}, {max}]"
    ))]
    InvalidScale {
        question: QuestionId,
        respondent: RespondentId,
        value: f64,
        min: i32,
        max: i32,
    },

    #[snafu(display(
        "question {question}: respondent {respondent} gave a {found} answer where {expected} was expected"
    ))]
    UnexpectedAnswer {
        question: QuestionId,
        respondent: RespondentId,
        expected: String,
        found: String,
    },

    #[snafu(display("question {question}: unknown label {label:?}"))]
    UnknownLabel { question: QuestionId, label: String },

    #[snafu(display(
        "rows of {importance} and {performance} do not match: {detail}"
    ))]
    RowMismatch {
        importance: QuestionId,
        performance: QuestionId,
        detail: String,
    },

    #[snafu(display(
        "funnel {funnel}: {outside} of the {count} respondents at stage {stage} for brand {brand} are not among the {prior_count} at stage {prior_stage}"
    ))]
    PipingViolation {
        funnel: String,
        brand: String,
        stage: String,
        count: usize,
        outside: usize,
        prior_stage: String,
        prior_count: usize,
    },

    #[snafu(display("invalid price points: {detail}"))]
    InvalidPricePoints { detail: String },

    #[snafu(display("invalid best-worst design for {question}: {detail}"))]
    InvalidDesign { question: QuestionId, detail: String },

    #[snafu(display("invalid brand x attribute matrix: {detail}"))]
    InvalidMatrix { detail: String },

    #[snafu(display("no usable responses for {question}"))]
    NoResponses { question: QuestionId },

    #[snafu(display("metric results cannot be compared: {detail}"))]
    IncomparableMetric { detail: String },

    #[snafu(display("compared samples share {shared} respondents"))]
    OverlappingSamples { shared: usize },

    #[snafu(display("study configuration error: {detail}"))]
    Configuration { detail: String },

    #[snafu(display(
        "definition of series {series} changed (expected fingerprint {expected}, found {found})"
    ))]
    DefinitionChanged {
        series: u32,
        expected: String,
        found: String,
    },

    #[snafu(display("invalid option: {detail}"))]
    InvalidOption { detail: String },
}

impl AnalysisError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AnalysisError::QuestionNotFound { .. } | AnalysisError::NoResponses { .. } => {
                ErrorClass::DataSufficiency
            }
            AnalysisError::Configuration { .. } | AnalysisError::DefinitionChanged { .. } => {
                ErrorClass::Configuration
            }
            _ => ErrorClass::Validation,
        }
    }
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
