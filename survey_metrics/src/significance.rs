//! Significance testing between two metric results.
//!
//! Proportions are compared with a chi-square test on the 2 x 2 table of hits
//! and misses, means with Welch's t-test. Both tests assume independent
//! samples: results computed on overlapping respondents of the same wave are
//! refused.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::*;
use crate::metrics::{MetricResult, SampleSummary};

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    ChiSquare,
    WelchT,
}

/// How the first result compares to the second one.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Higher,
    Lower,
    /// No significant difference.
    Equal,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SignificanceResult {
    pub test: TestKind,
    pub statistic: f64,
    pub degrees_of_freedom: f64,
    pub p_value: f64,
    pub significant: bool,
    /// Estimate of the first result minus estimate of the second one.
    pub difference: f64,
    pub direction: Direction,
}

#[derive(PartialEq, Debug, Clone, Copy)]
pub struct SignificanceTester {
    alpha: f64,
}

impl SignificanceTester {
    pub fn new(alpha: f64) -> AnalysisResult<SignificanceTester> {
        snafu::ensure!(
            alpha > 0.0 && alpha < 1.0,
            InvalidOptionSnafu {
                detail: format!("significance level {} is not between 0 and 1", alpha),
            }
        );
        Ok(SignificanceTester { alpha })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Tests whether two results differ significantly.
    ///
    /// Both results must be of the same metric, on the same scale, and carry
    /// sample statistics of the same kind.
    pub fn compare(&self, a: &MetricResult, b: &MetricResult) -> AnalysisResult<SignificanceResult> {
        snafu::ensure!(
            a.metric == b.metric,
            IncomparableMetricSnafu {
                detail: format!("{:?} cannot be compared with {:?}", a.metric, b.metric),
            }
        );
        snafu::ensure!(
            a.scale == b.scale,
            IncomparableMetricSnafu {
                detail: format!(
                    "{:?} results on different scales: {:?} and {:?}",
                    a.metric, a.scale, b.scale
                ),
            }
        );
        if a.wave == b.wave {
            let shared = a.respondents.intersection(&b.respondents).count();
            snafu::ensure!(shared == 0, OverlappingSamplesSnafu { shared });
        }
        let res = match (a.sample, b.sample) {
            (
                Some(SampleSummary::Proportion { hits: h1, n: n1 }),
                Some(SampleSummary::Proportion { hits: h2, n: n2 }),
            ) => self.proportions(h1, n1, h2, n2)?,
            (
                Some(SampleSummary::Mean {
                    n: n1,
                    mean: m1,
                    variance: v1,
                }),
                Some(SampleSummary::Mean {
                    n: n2,
                    mean: m2,
                    variance: v2,
                }),
            ) => self.means(n1, m1, v1, n2, m2, v2)?,
            (x, y) => {
                return IncomparableMetricSnafu {
                    detail: format!(
                        "{:?} results carry no comparable sample statistics: {:?} and {:?}",
                        a.metric, x, y
                    ),
                }
                .fail()
            }
        };
        debug!("compare: {:?} {:?}: {:?}", a.metric, a.questions, res);
        Ok(res)
    }

    fn conclude(&self, test: TestKind, statistic: f64, df: f64, p_value: f64, difference: f64) -> SignificanceResult {
        let significant = p_value < self.alpha;
        let direction = if !significant {
            Direction::Equal
        } else if difference > 0.0 {
            Direction::Higher
        } else {
            Direction::Lower
        };
        SignificanceResult {
            test,
            statistic,
            degrees_of_freedom: df,
            p_value,
            significant,
            difference,
            direction,
        }
    }

    fn proportions(&self, h1: f64, n1: f64, h2: f64, n2: f64) -> AnalysisResult<SignificanceResult> {
        snafu::ensure!(
            n1 > 0.0 && n2 > 0.0 && h1 >= 0.0 && h2 >= 0.0 && h1 <= n1 && h2 <= n2,
            IncomparableMetricSnafu {
                detail: format!("invalid proportions {}/{} and {}/{}", h1, n1, h2, n2),
            }
        );
        let chi2 = chi_square_2x2(h1, n1 - h1, h2, n2 - h2);
        let p = chi_square_sf(chi2, 1.0);
        Ok(self.conclude(TestKind::ChiSquare, chi2, 1.0, p, 100.0 * (h1 / n1 - h2 / n2)))
    }

    fn means(&self, n1: f64, m1: f64, v1: f64, n2: f64, m2: f64, v2: f64) -> AnalysisResult<SignificanceResult> {
        snafu::ensure!(
            n1 >= 2.0 && n2 >= 2.0,
            IncomparableMetricSnafu {
                detail: format!("a t-test needs two respondents per sample, got {} and {}", n1, n2),
            }
        );
        let (t, df) = welch_t(n1, m1, v1, n2, m2, v2);
        let p = student_t_two_sided(t, df);
        Ok(self.conclude(TestKind::WelchT, t, df, p, m1 - m2))
    }
}

impl Default for SignificanceTester {
    fn default() -> Self {
        SignificanceTester { alpha: 0.05 }
    }
}

/// Pearson chi-square statistic of the table [[a, b], [c, d]].
pub fn chi_square_2x2(a: f64, b: f64, c: f64, d: f64) -> f64 {
    let n = a + b + c + d;
    let denom = (a + b) * (c + d) * (a + c) * (b + d);
    if denom <= 0.0 {
        return 0.0;
    }
    n * (a * d - b * c).powi(2) / denom
}

/// Welch's t statistic and its Welch-Satterthwaite degrees of freedom.
pub fn welch_t(n1: f64, m1: f64, v1: f64, n2: f64, m2: f64, v2: f64) -> (f64, f64) {
    let s1 = v1 / n1;
    let s2 = v2 / n2;
    let se = (s1 + s2).sqrt();
    let df_pooled = n1 + n2 - 2.0;
    if se <= 0.0 {
        // No variance at all: either identical or infinitely far apart.
        let t = if m1 == m2 { 0.0 } else { (m1 - m2).signum() * f64::INFINITY };
        return (t, df_pooled);
    }
    let t = (m1 - m2) / se;
    let df = (s1 + s2).powi(2) / (s1 * s1 / (n1 - 1.0) + s2 * s2 / (n2 - 1.0));
    (t, df)
}

/// Upper tail probability of a chi-square distribution.
pub fn chi_square_sf(x: f64, df: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    gamma_q(df / 2.0, x / 2.0)
}

/// Two-sided p-value of a Student t statistic.
pub fn student_t_two_sided(t: f64, df: f64) -> f64 {
    if t.is_infinite() {
        return 0.0;
    }
    if t == 0.0 {
        return 1.0;
    }
    incomplete_beta(df / 2.0, 0.5, df / (df + t * t))
}

// ******** Special functions *********

pub(crate) fn ln_gamma(x: f64) -> f64 {
    // Lanczos approximation, g = 7.
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut acc = COEFFS[0];
    for (i, c) in COEFFS.iter().enumerate().skip(1) {
        acc += c / (x + i as f64);
    }
    let t = x + 7.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}

const MAX_ITER: usize = 300;
const TINY: f64 = 1e-300;
const PRECISION: f64 = 1e-15;

/// Regularised upper incomplete gamma function Q(a, x).
pub(crate) fn gamma_q(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    let ln_prefix = a * x.ln() - x - ln_gamma(a);
    if x < a + 1.0 {
        // Series for P(a, x).
        let mut ap = a;
        let mut sum = 1.0 / a;
        let mut del = sum;
        for _ in 0..MAX_ITER {
            ap += 1.0;
            del *= x / ap;
            sum += del;
            if del.abs() < sum.abs() * PRECISION {
                break;
            }
        }
        1.0 - sum * ln_prefix.exp()
    } else {
        // Continued fraction for Q(a, x), modified Lentz.
        let mut b = x + 1.0 - a;
        let mut c = 1.0 / TINY;
        let mut d = 1.0 / b;
        let mut h = d;
        for i in 1..MAX_ITER {
            let an = -(i as f64) * (i as f64 - a);
            b += 2.0;
            d = an * d + b;
            if d.abs() < TINY {
                d = TINY;
            }
            c = b + an / c;
            if c.abs() < TINY {
                c = TINY;
            }
            d = 1.0 / d;
            let del = d * c;
            h *= del;
            if (del - 1.0).abs() < PRECISION {
                break;
            }
        }
        ln_prefix.exp() * h
    }
}

/// Regularised incomplete beta function I_x(a, b).
pub(crate) fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    if x < (a + 1.0) / (a + b + 2.0) {
        ln_front.exp() * beta_fraction(a, b, x) / a
    } else {
        1.0 - ln_front.exp() * beta_fraction(b, a, 1.0 - x) / b
    }
}

fn beta_fraction(a: f64, b: f64, x: f64) -> f64 {
    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;
    for m in 1..MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;
        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;
        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;
        if (del - 1.0).abs() < PRECISION {
            break;
        }
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Base, MetricKind, MetricValue, MeanScoreResult};
    use std::collections::BTreeSet;

    fn result(wave: u32, ids: &[&str], sample: SampleSummary) -> MetricResult {
        MetricResult {
            metric: MetricKind::MeanScore,
            questions: vec![QuestionId::from("Q1")],
            wave: Wave(wave),
            base: Base {
                respondents: ids.len(),
                weighted: ids.len() as f64,
            },
            respondents: ids.iter().map(|s| RespondentId::from(*s)).collect::<BTreeSet<_>>(),
            scale: None,
            sample: Some(sample),
            value: MetricValue::MeanScore(MeanScoreResult {
                mean: 0.0,
                std_dev: 0.0,
                median: 0.0,
                min: 0.0,
                max: 0.0,
            }),
            flags: vec![],
        }
    }

    #[test]
    fn special_functions() {
        // Gamma(5) = 24
        assert!((ln_gamma(5.0) - 24f64.ln()).abs() < 1e-10);
        // Gamma(1/2) = sqrt(pi)
        assert!((ln_gamma(0.5) - std::f64::consts::PI.sqrt().ln()).abs() < 1e-10);
        // Q(1, x) = exp(-x)
        assert!((gamma_q(1.0, 0.5) - (-0.5f64).exp()).abs() < 1e-12);
        assert!((gamma_q(1.0, 3.0) - (-3.0f64).exp()).abs() < 1e-12);
        // I_x(1, 1) = x
        assert!((incomplete_beta(1.0, 1.0, 0.3) - 0.3).abs() < 1e-12);
        assert!((incomplete_beta(2.0, 3.0, 0.4) - 0.5248).abs() < 1e-10);
    }

    #[test]
    fn chi_square_of_two_proportions() {
        let tester = SignificanceTester::default();
        let a = result(1, &["a1"], SampleSummary::Proportion { hits: 60.0, n: 100.0 });
        let b = result(1, &["b1"], SampleSummary::Proportion { hits: 40.0, n: 100.0 });
        let c = tester.compare(&a, &b).unwrap();
        assert_eq!(c.test, TestKind::ChiSquare);
        assert!((c.statistic - 8.0).abs() < 1e-9);
        assert!((c.p_value - 0.004678).abs() < 1e-5);
        assert!(c.significant);
        assert_eq!(c.direction, Direction::Higher);
        assert!((c.difference - 20.0).abs() < 1e-9);
    }

    #[test]
    fn welch_t_test_of_two_means() {
        let tester = SignificanceTester::default();
        // [1, 2, 3, 4, 5] against [3, 4, 5, 6, 7]
        let a = result(1, &["a1"], SampleSummary::Mean { n: 5.0, mean: 3.0, variance: 2.5 });
        let b = result(1, &["b1"], SampleSummary::Mean { n: 5.0, mean: 5.0, variance: 2.5 });
        let c = tester.compare(&a, &b).unwrap();
        assert_eq!(c.test, TestKind::WelchT);
        assert!((c.statistic + 2.0).abs() < 1e-12);
        assert!((c.degrees_of_freedom - 8.0).abs() < 1e-12);
        assert!((c.p_value - 0.0805).abs() < 1e-3);
        assert!(!c.significant);
        assert_eq!(c.direction, Direction::Equal);

        let loose = SignificanceTester::new(0.1).unwrap();
        assert_eq!(loose.compare(&a, &b).unwrap().direction, Direction::Lower);
    }

    #[test]
    fn different_metrics_are_incomparable() {
        let a = result(1, &["a1"], SampleSummary::Mean { n: 5.0, mean: 3.0, variance: 2.5 });
        let mut b = result(1, &["b1"], SampleSummary::Mean { n: 5.0, mean: 5.0, variance: 2.5 });
        b.metric = MetricKind::Nps;
        let err = SignificanceTester::default().compare(&a, &b).unwrap_err();
        assert!(matches!(err, AnalysisError::IncomparableMetric { .. }));

        let mut c = result(1, &["c1"], SampleSummary::Mean { n: 5.0, mean: 5.0, variance: 2.5 });
        c.scale = Some(ScaleSignature { min: 1, points: 7 });
        let err = SignificanceTester::default().compare(&a, &c).unwrap_err();
        assert!(matches!(err, AnalysisError::IncomparableMetric { .. }));

        let d = result(1, &["d1"], SampleSummary::Proportion { hits: 1.0, n: 5.0 });
        let err = SignificanceTester::default().compare(&a, &d).unwrap_err();
        assert!(matches!(err, AnalysisError::IncomparableMetric { .. }));
    }

    #[test]
    fn overlapping_samples() {
        let a = result(1, &["r1", "r2"], SampleSummary::Proportion { hits: 1.0, n: 2.0 });
        let b = result(1, &["r2", "r3"], SampleSummary::Proportion { hits: 1.0, n: 2.0 });
        let err = SignificanceTester::default().compare(&a, &b).unwrap_err();
        assert!(matches!(err, AnalysisError::OverlappingSamples { shared: 1 }));
        // The same respondents in another wave are a different sample.
        let c = result(2, &["r2", "r3"], SampleSummary::Proportion { hits: 1.0, n: 2.0 });
        assert!(SignificanceTester::default().compare(&a, &c).is_ok());
    }

    #[test]
    fn invalid_level() {
        assert!(SignificanceTester::new(0.0).is_err());
        assert!(SignificanceTester::new(1.5).is_err());
    }
}
