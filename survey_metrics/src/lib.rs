//! Analysis layer for market-research survey data.
//!
//! Responses are loaded into a [ResponseStore], turned into [ResponseSlice]s
//! and fed to the metric calculators: NPS, CSAT, brand funnels,
//! importance-performance, Van Westendorp and Gabor-Granger pricing, MaxDiff
//! and perceptual maps. Results can be broken down by respondent attributes
//! with a [CrosstabEngine], compared with a [SignificanceTester] and collected
//! into a [Report].
//!
//! ```
//! use survey_metrics::*;
//!
//! let mut builder = ResponseStore::builder();
//! for (id, score) in [("r1", 10.0), ("r2", 9.0), ("r3", 4.0), ("r4", 8.0)] {
//!     builder.add_respondent(Respondent::new(id, Wave::FIRST));
//!     builder
//!         .add_response(id, "LTR", Wave::FIRST, Answer::Number(score))
//!         .unwrap();
//! }
//! let store = builder.build();
//! let options = MetricOptions::default();
//! let slice = store
//!     .slice(&QuestionId::from("LTR"), &ResponseFilter::default(), &options.weighting)
//!     .unwrap();
//! let result = net_promoter_score(&slice, &options).unwrap();
//! match result.value {
//!     MetricValue::Nps(nps) => assert_eq!(nps.nps, 25.0),
//!     _ => unreachable!(),
//! }
//! ```
//!
//! See the [manual] for the configuration format.

mod config;
pub mod crosstab;
pub mod manual;
pub mod metrics;
pub mod plan;
pub mod quality;
pub mod report;
pub mod series;
pub mod significance;
pub mod store;
pub mod validation;

pub use crate::config::*;
pub use crate::crosstab::{Crosstab, CrosstabCell, CrosstabEngine, LevelOutcome};
pub use crate::metrics::*;
pub use crate::plan::{run_analysis, run_plan, Analysis, AnalysisPlan, AnalysisSpec};
pub use crate::quality::{assess, QualityReport};
pub use crate::report::{chart_for, ChartType, Report, ReportAssembler};
pub use crate::series::{SeriesChange, TrackingSeries};
pub use crate::significance::{SignificanceResult, SignificanceTester};
pub use crate::store::{ResponseFilter, ResponseSlice, ResponseStore, StoreBuilder};
pub use crate::validation::{ensure_valid, validate_study, ValidationFinding};
