use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::*;
use crate::crosstab::{ComparisonOutcome, Crosstab};
use crate::metrics::{MetricKind, MetricResult};
use crate::quality::QualityReport;
use crate::significance::Direction;
use crate::validation::ValidationFinding;

// ******** Chart hints *********

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    StackedBar,
    Bar,
    Funnel,
    QuadrantScatter,
    LineCurves,
    Biplot,
    Heatmap,
}

/// The chart a renderer should draw for a metric.
pub fn chart_for(metric: MetricKind) -> ChartType {
    match metric {
        MetricKind::Nps => ChartType::StackedBar,
        MetricKind::Csat | MetricKind::MeanScore | MetricKind::MaxDiff => ChartType::Bar,
        MetricKind::BrandFunnel => ChartType::Funnel,
        MetricKind::ImportancePerformance => ChartType::QuadrantScatter,
        MetricKind::VanWestendorp | MetricKind::GaborGranger => ChartType::LineCurves,
        MetricKind::PerceptualMap => ChartType::Biplot,
    }
}

// ******** Report structures *********

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SectionFailure {
    pub class: ErrorClass,
    pub reason: String,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ReportSection {
    pub name: String,
    pub metric: Option<MetricKind>,
    pub chart: Option<ChartType>,
    pub result: Option<MetricResult>,
    /// Present when the metric could not be computed.
    pub failure: Option<SectionFailure>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct CrosstabSection {
    pub name: String,
    pub chart: ChartType,
    pub crosstab: Crosstab,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub study: String,
    pub wave: Wave,
    pub executive_summary: Vec<String>,
    pub validation: Vec<ValidationFinding>,
    pub data_quality: Option<QualityReport>,
    pub sections: Vec<ReportSection>,
    pub crosstabs: Vec<CrosstabSection>,
    /// Every warning raised while assembling: flags, suppressions and failures.
    pub warnings: Vec<String>,
}

impl Report {
    pub fn section(&self, name: &str) -> Option<&ReportSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn failed_sections(&self) -> Vec<&ReportSection> {
        self.sections.iter().filter(|s| s.failure.is_some()).collect()
    }
}

/// Collects metric results, failures and crosstabs into a [Report].
///
/// Sections keep the order in which they were added. A failed metric becomes
/// a section with its failure, unless the failure is a configuration error: a
/// broken study definition makes the whole report fail.
#[derive(Debug, Default)]
pub struct ReportAssembler {
    study: String,
    wave: Option<Wave>,
    summary: Vec<String>,
    validation: Vec<ValidationFinding>,
    quality: Option<QualityReport>,
    sections: Vec<ReportSection>,
    crosstabs: Vec<CrosstabSection>,
    fatal: Vec<(String, AnalysisError)>,
}

impl ReportAssembler {
    pub fn new(study: &str, wave: Wave) -> ReportAssembler {
        ReportAssembler {
            study: study.to_string(),
            wave: Some(wave),
            ..Default::default()
        }
    }

    pub fn add_result(&mut self, name: &str, result: MetricResult) {
        self.sections.push(ReportSection {
            name: name.to_string(),
            metric: Some(result.metric),
            chart: Some(chart_for(result.metric)),
            result: Some(result),
            failure: None,
        });
    }

    pub fn add_failure(&mut self, name: &str, metric: Option<MetricKind>, error: AnalysisError) {
        let class = error.class();
        if class == ErrorClass::Configuration {
            self.fatal.push((name.to_string(), error));
            return;
        }
        warn!("add_failure: {}: {}", name, error);
        self.sections.push(ReportSection {
            name: name.to_string(),
            metric,
            chart: metric.map(chart_for),
            result: None,
            failure: Some(SectionFailure {
                class,
                reason: error.to_string(),
            }),
        });
    }

    /// Adds the outcome of one analysis.
    pub fn add_outcome(&mut self, name: &str, metric: Option<MetricKind>, outcome: AnalysisResult<MetricResult>) {
        match outcome {
            Ok(r) => self.add_result(name, r),
            Err(e) => self.add_failure(name, metric, e),
        }
    }

    pub fn add_crosstab(&mut self, name: &str, crosstab: Crosstab) {
        self.crosstabs.push(CrosstabSection {
            name: name.to_string(),
            chart: ChartType::Heatmap,
            crosstab,
        });
    }

    /// Adds a line to the executive summary.
    pub fn add_summary(&mut self, line: &str) {
        self.summary.push(line.to_string());
    }

    pub fn set_validation(&mut self, findings: Vec<ValidationFinding>) {
        self.validation = findings;
    }

    pub fn set_quality(&mut self, quality: QualityReport) {
        self.quality = Some(quality);
    }

    pub fn assemble(self) -> AnalysisResult<Report> {
        if let Some((name, error)) = self.fatal.into_iter().next() {
            warn!("assemble: analysis {} has a configuration error", name);
            return Err(error);
        }

        let mut summary = self.summary;
        let mut warnings: Vec<String> = Vec::new();
        for s in self.sections.iter() {
            match (&s.result, &s.failure) {
                (Some(r), _) => {
                    summary.push(format!("{}: {}", s.name, r.headline()));
                    warnings.extend(r.flags.iter().map(|f| format!("{}: {}", s.name, f)));
                }
                (None, Some(f)) => warnings.push(format!("{}: not computed: {}", s.name, f.reason)),
                (None, None) => {}
            }
        }
        for c in self.crosstabs.iter() {
            warnings.extend(c.crosstab.warnings.iter().map(|w| format!("{}: {}", c.name, w)));
            for p in c.crosstab.comparisons.iter() {
                if let ComparisonOutcome::Tested { result } = &p.outcome {
                    let word = match result.direction {
                        Direction::Higher => "higher",
                        Direction::Lower => "lower",
                        Direction::Equal => continue,
                    };
                    summary.push(format!(
                        "{} by {}: {} is significantly {} than {} (p={:.3})",
                        c.name, c.crosstab.variable, p.first, word, p.second, result.p_value
                    ));
                }
            }
        }
        if let Some(q) = &self.quality {
            if !q.flags.is_empty() {
                warnings.push(format!(
                    "data quality: {} speeders and {} straightliners{}",
                    q.speeders(),
                    q.straightliners(),
                    if q.dropped { " removed" } else { " kept" }
                ));
            }
        }
        info!(
            "assemble: {} sections, {} crosstabs, {} warnings",
            self.sections.len(),
            self.crosstabs.len(),
            warnings.len()
        );
        Ok(Report {
            study: self.study,
            wave: self.wave.unwrap_or(Wave::FIRST),
            executive_summary: summary,
            validation: self.validation,
            data_quality: self.quality,
            sections: self.sections,
            crosstabs: self.crosstabs,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::net_promoter_score;
    use crate::store::ResponseSlice;

    fn nps() -> MetricResult {
        let slice = ResponseSlice::unweighted(
            "NPS",
            vec![
                ("r1", Answer::Number(10.0)),
                ("r2", Answer::Number(9.0)),
                ("r3", Answer::Number(2.0)),
                ("r4", Answer::Number(7.0)),
            ],
        );
        net_promoter_score(&slice, &MetricOptions::default()).unwrap()
    }

    #[test]
    fn failed_metric_is_noted_next_to_the_others() {
        let mut asm = ReportAssembler::new("tracker", Wave::FIRST);
        asm.add_summary("Fieldwork closed early.");
        asm.add_result("loyalty", nps());
        asm.add_failure(
            "pricing",
            Some(MetricKind::VanWestendorp),
            AnalysisError::InvalidPricePoints {
                detail: "negative price".to_string(),
            },
        );
        let report = asm.assemble().unwrap();
        assert_eq!(report.sections.len(), 2);
        assert_eq!(report.section("loyalty").unwrap().chart, Some(ChartType::StackedBar));
        let failed = report.failed_sections();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "pricing");
        assert_eq!(failed[0].chart, Some(ChartType::LineCurves));
        assert_eq!(
            failed[0].failure.as_ref().unwrap().class,
            ErrorClass::Validation
        );
        assert_eq!(report.executive_summary[0], "Fieldwork closed early.");
        assert!(report.executive_summary[1].starts_with("loyalty: NPS 25.0"));
        assert!(report.warnings.iter().any(|w| w.starts_with("pricing: not computed")));
    }

    #[test]
    fn configuration_errors_fail_the_report() {
        let mut asm = ReportAssembler::new("tracker", Wave::FIRST);
        asm.add_result("loyalty", nps());
        asm.add_outcome(
            "funnel",
            Some(MetricKind::BrandFunnel),
            Err(AnalysisError::Configuration {
                detail: "unknown funnel".to_string(),
            }),
        );
        let err = asm.assemble().unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[test]
    fn every_metric_has_a_chart() {
        assert_eq!(chart_for(MetricKind::PerceptualMap), ChartType::Biplot);
        assert_eq!(chart_for(MetricKind::ImportancePerformance), ChartType::QuadrantScatter);
        assert_eq!(chart_for(MetricKind::MaxDiff), ChartType::Bar);
        assert_eq!(chart_for(MetricKind::BrandFunnel), ChartType::Funnel);
    }
}
