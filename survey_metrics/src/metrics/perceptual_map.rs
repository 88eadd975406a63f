//! Perceptual maps: brands and attributes projected on the first two
//! dimensions of a brand x attribute table.
//!
//! Association counts are mapped with correspondence analysis. Mean ratings
//! are mapped with a principal component analysis of the standardised
//! ratings. Both go through the singular value decomposition below.

use log::debug;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::*;
use crate::metrics::*;
use crate::store::{ResponseSlice, SliceRow};

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapMethod {
    CorrespondenceAnalysis,
    Pca,
}

/// A brand x attribute table: association counts or mean ratings.
#[derive(PartialEq, Debug, Clone)]
pub struct BrandAttributeTable {
    pub brands: Vec<String>,
    pub attributes: Vec<String>,
    /// One row per brand, one column per attribute.
    pub values: Array2<f64>,
    pub questions: Vec<QuestionId>,
    pub wave: Wave,
    pub base: Base,
    pub respondents: BTreeSet<RespondentId>,
}

impl BrandAttributeTable {
    pub fn new(brands: Vec<String>, attributes: Vec<String>, values: Array2<f64>) -> AnalysisResult<BrandAttributeTable> {
        snafu::ensure!(
            values.dim() == (brands.len(), attributes.len()),
            InvalidMatrixSnafu {
                detail: format!(
                    "a table of {} brands and {} attributes cannot hold {:?} values",
                    brands.len(),
                    attributes.len(),
                    values.dim()
                ),
            }
        );
        Ok(BrandAttributeTable {
            brands,
            attributes,
            values,
            questions: vec![],
            wave: Wave::FIRST,
            base: Base::default(),
            respondents: BTreeSet::new(),
        })
    }

    /// Builds association counts from one brand-selection question per attribute
    /// ("which of these brands are ...").
    pub fn from_associations(
        brands: &BrandList,
        attribute_questions: &[(String, ResponseSlice)],
    ) -> AnalysisResult<BrandAttributeTable> {
        let first = attribute_questions
            .first()
            .ok_or_else(|| AnalysisError::InvalidMatrix {
                detail: "no attribute questions".to_string(),
            })?;
        let mut values = Array2::<f64>::zeros((brands.brands.len(), attribute_questions.len()));
        let mut rows: Vec<&SliceRow> = Vec::new();
        for (j, (_, slice)) in attribute_questions.iter().enumerate() {
            for row in slice.rows.iter() {
                let labels = row
                    .answer
                    .selected_labels()
                    .ok_or_else(|| AnalysisError::UnexpectedAnswer {
                        question: slice.question.clone(),
                        respondent: row.respondent.clone(),
                        expected: "a brand selection".to_string(),
                        found: row.answer.type_name().to_string(),
                    })?;
                if labels.is_empty() {
                    continue;
                }
                for label in labels {
                    let i = brands
                        .brands
                        .iter()
                        .position(|b| b == label)
                        .ok_or_else(|| AnalysisError::UnknownLabel {
                            question: slice.question.clone(),
                            label: label.to_string(),
                        })?;
                    values[[i, j]] += row.weight;
                }
                rows.push(row);
            }
        }
        let (base, respondents) = base_of(rows.into_iter());
        Ok(BrandAttributeTable {
            brands: brands.brands.clone(),
            attributes: attribute_questions.iter().map(|(a, _)| a.clone()).collect(),
            values,
            questions: attribute_questions
                .iter()
                .map(|(_, s)| s.question.clone())
                .collect(),
            wave: first.1.wave,
            base,
            respondents,
        })
    }

    /// Builds mean ratings from one attribute-rating matrix per brand. Every
    /// matrix must list the same attributes in the same order.
    pub fn from_ratings(brand_matrices: &[(String, MatrixInput)]) -> AnalysisResult<BrandAttributeTable> {
        let (_, first) = brand_matrices
            .first()
            .ok_or_else(|| AnalysisError::InvalidMatrix {
                detail: "no brand rating questions".to_string(),
            })?;
        let mut values = Array2::<f64>::zeros((brand_matrices.len(), first.rows.len()));
        let mut rows: Vec<&SliceRow> = Vec::new();
        for (i, (_, m)) in brand_matrices.iter().enumerate() {
            check_paired_rows(&first.slice.question, &first.rows, &m.slice.question, &m.rows)?;
            for (j, x) in m.row_means()?.into_iter().enumerate() {
                values[[i, j]] = x;
            }
            rows.extend(m.slice.answered());
        }
        let (base, respondents) = base_of(rows.into_iter());
        Ok(BrandAttributeTable {
            brands: brand_matrices.iter().map(|(b, _)| b.clone()).collect(),
            attributes: first.rows.clone(),
            values,
            questions: brand_matrices
                .iter()
                .map(|(_, m)| m.slice.question.clone())
                .collect(),
            wave: first.slice.wave,
            base,
            respondents,
        })
    }
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct MapPoint {
    pub label: String,
    pub x: f64,
    pub y: f64,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct PerceptualMap {
    pub method: MapMethod,
    pub brands: Vec<MapPoint>,
    pub attributes: Vec<MapPoint>,
    /// Share of the total inertia (or variance) on each axis, in percent.
    pub explained: [f64; 2],
    pub total_inertia: f64,
    pub singular_values: Vec<f64>,
}

// ******** Linear algebra *********

const EPS: f64 = 1e-12;

/// Eigen-decomposition of a symmetric matrix with cyclic Jacobi rotations.
///
/// Returns the eigenvalues in decreasing order and the matching eigenvectors
/// as columns.
pub(crate) fn symmetric_eigen(m: &Array2<f64>) -> (Vec<f64>, Array2<f64>) {
    let n = m.nrows();
    let mut a = m.clone();
    let mut v = Array2::<f64>::eye(n);
    for _ in 0..100 {
        let mut off = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off += a[[p, q]] * a[[p, q]];
            }
        }
        if off < 1e-24 {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq.abs() < 1e-300 {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|i, j| a[[*j, *j]].total_cmp(&a[[*i, *i]]));
    let values: Vec<f64> = order.iter().map(|i| a[[*i, *i]]).collect();
    let mut vectors = Array2::<f64>::zeros((n, n));
    for (k, i) in order.iter().enumerate() {
        vectors.column_mut(k).assign(&v.column(*i));
    }
    (values, vectors)
}

struct Svd {
    u: Array2<f64>,
    sigma: Vec<f64>,
    v: Array2<f64>,
}

// Thin SVD through the eigen-decomposition of MᵀM. Components are signed so
// that the largest column loading is positive.
fn svd(m: &Array2<f64>) -> Svd {
    let (values, mut v) = symmetric_eigen(&m.t().dot(m));
    let sigma: Vec<f64> = values.iter().map(|x| x.max(0.0).sqrt()).collect();
    let mut u = Array2::<f64>::zeros((m.nrows(), sigma.len()));
    for (k, s) in sigma.iter().enumerate() {
        let largest = v
            .column(k)
            .iter()
            .cloned()
            .fold(0.0, |acc: f64, x| if x.abs() > acc.abs() { x } else { acc });
        if largest < 0.0 {
            v.column_mut(k).mapv_inplace(|x| -x);
        }
        if *s > EPS {
            let uk: Array1<f64> = m.dot(&v.column(k)) / *s;
            u.column_mut(k).assign(&uk);
        }
    }
    Svd { u, sigma, v }
}

fn check_table(table: &BrandAttributeTable, min_brands: usize, min_attributes: usize) -> AnalysisResult<()> {
    let (b, a) = table.values.dim();
    snafu::ensure!(
        b >= min_brands && a >= min_attributes,
        InvalidMatrixSnafu {
            detail: format!(
                "a {} x {} table is too small, at least {} brands and {} attributes are needed",
                b, a, min_brands, min_attributes
            ),
        }
    );
    snafu::ensure!(
        table.values.iter().all(|x| x.is_finite()),
        InvalidMatrixSnafu {
            detail: "the table contains non-finite values".to_string()
        }
    );
    Ok(())
}

fn points(labels: &[String], coords: &Array2<f64>) -> Vec<MapPoint> {
    labels
        .iter()
        .enumerate()
        .map(|(i, l)| MapPoint {
            label: l.clone(),
            x: coords[[i, 0]],
            y: coords[[i, 1]],
        })
        .collect()
}

fn explained(sigma: &[f64]) -> (f64, [f64; 2]) {
    let total: f64 = sigma.iter().map(|s| s * s).sum();
    let pct = |k: usize| {
        sigma
            .get(k)
            .map(|s| if total > 0.0 { 100.0 * s * s / total } else { 0.0 })
            .unwrap_or(0.0)
    };
    (total, [pct(0), pct(1)])
}

fn correspondence_analysis(table: &BrandAttributeTable) -> AnalysisResult<PerceptualMap> {
    check_table(table, 3, 3)?;
    snafu::ensure!(
        table.values.iter().all(|x| *x >= 0.0),
        InvalidMatrixSnafu {
            detail: "association counts cannot be negative".to_string()
        }
    );
    // Empty margins are checked on the counts, before any division.
    let row_counts = table.values.sum_axis(Axis(1));
    let col_counts = table.values.sum_axis(Axis(0));
    if let Some(i) = row_counts.iter().position(|x| *x <= 0.0) {
        return InvalidMatrixSnafu {
            detail: format!("brand {} has no associations", table.brands[i]),
        }
        .fail();
    }
    if let Some(j) = col_counts.iter().position(|x| *x <= 0.0) {
        return InvalidMatrixSnafu {
            detail: format!("attribute {} has no associations", table.attributes[j]),
        }
        .fail();
    }
    let n = table.values.sum();
    let p = &table.values / n;
    let r = p.sum_axis(Axis(1));
    let c = p.sum_axis(Axis(0));
    let mut s = Array2::<f64>::zeros(p.dim());
    for ((i, j), x) in p.indexed_iter() {
        let expected = r[i] * c[j];
        s[[i, j]] = (x - expected) / expected.sqrt();
    }
    let d = svd(&s);
    let (total, explained) = explained(&d.sigma);
    snafu::ensure!(
        total > EPS,
        InvalidMatrixSnafu {
            detail: "all brands have the same association profile".to_string()
        }
    );
    let mut rows = Array2::<f64>::zeros((r.len(), 2));
    let mut cols = Array2::<f64>::zeros((c.len(), 2));
    for k in 0..2 {
        for i in 0..r.len() {
            rows[[i, k]] = d.u[[i, k]] * d.sigma[k] / r[i].sqrt();
        }
        for j in 0..c.len() {
            cols[[j, k]] = d.v[[j, k]] * d.sigma[k] / c[j].sqrt();
        }
    }
    Ok(PerceptualMap {
        method: MapMethod::CorrespondenceAnalysis,
        brands: points(&table.brands, &rows),
        attributes: points(&table.attributes, &cols),
        explained,
        total_inertia: total,
        singular_values: d.sigma,
    })
}

fn principal_components(table: &BrandAttributeTable) -> AnalysisResult<PerceptualMap> {
    check_table(table, 3, 2)?;
    let (b, _) = table.values.dim();
    let dof = (b - 1) as f64;
    let mut x = table.values.clone();
    for (j, mut col) in x.axis_iter_mut(Axis(1)).enumerate() {
        let mean = col.sum() / b as f64;
        let sd = (col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / dof).sqrt();
        snafu::ensure!(
            sd > EPS,
            InvalidMatrixSnafu {
                detail: format!("every brand has the same rating on {}", table.attributes[j]),
            }
        );
        col.mapv_inplace(|v| (v - mean) / sd);
    }
    let d = svd(&x);
    let (total, explained) = explained(&d.sigma);
    let mut scores = Array2::<f64>::zeros((b, 2));
    let mut loadings = Array2::<f64>::zeros((table.attributes.len(), 2));
    for k in 0..2 {
        for i in 0..b {
            scores[[i, k]] = d.u[[i, k]] * d.sigma[k];
        }
        for j in 0..table.attributes.len() {
            loadings[[j, k]] = d.v[[j, k]] * d.sigma[k] / dof.sqrt();
        }
    }
    Ok(PerceptualMap {
        method: MapMethod::Pca,
        brands: points(&table.brands, &scores),
        attributes: points(&table.attributes, &loadings),
        explained,
        total_inertia: total,
        singular_values: d.sigma,
    })
}

/// Projects a brand x attribute table on two dimensions.
pub fn perceptual_map(
    table: &BrandAttributeTable,
    method: MapMethod,
    _options: &MetricOptions,
) -> AnalysisResult<MetricResult> {
    let map = match method {
        MapMethod::CorrespondenceAnalysis => correspondence_analysis(table)?,
        MapMethod::Pca => principal_components(table)?,
    };
    debug!(
        "perceptual_map: {:?} explains {:?}",
        map.method, map.explained
    );
    Ok(MetricResult {
        metric: MetricKind::PerceptualMap,
        questions: table.questions.clone(),
        wave: table.wave,
        base: table.base,
        respondents: table.respondents.clone(),
        scale: None,
        sample: None,
        value: MetricValue::PerceptualMap(map),
        flags: vec![],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn labels(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    fn map_of(r: &MetricResult) -> &PerceptualMap {
        match &r.value {
            MetricValue::PerceptualMap(m) => m,
            x => panic!("{:?}", x),
        }
    }

    #[test]
    fn eigen_of_a_small_matrix() {
        let (values, vectors) = symmetric_eigen(&array![[2.0, 1.0], [1.0, 2.0]]);
        assert!((values[0] - 3.0).abs() < 1e-9);
        assert!((values[1] - 1.0).abs() < 1e-9);
        let v0 = vectors.column(0);
        assert!((v0[0].abs() - 0.5f64.sqrt()).abs() < 1e-9);
        assert!((v0[0] - v0[1]).abs() < 1e-9);
    }

    #[test]
    fn correspondence_analysis_of_a_diagonal_table() {
        let table = BrandAttributeTable::new(
            labels(&["Acme", "Globex", "Initech"]),
            labels(&["Cheap", "Fast", "Reliable"]),
            array![[20.0, 5.0, 5.0], [5.0, 20.0, 5.0], [5.0, 5.0, 20.0]],
        )
        .unwrap();
        let res = perceptual_map(&table, MapMethod::CorrespondenceAnalysis, &MetricOptions::default())
            .unwrap();
        let m = map_of(&res);
        assert_eq!(m.brands.len(), 3);
        assert_eq!(m.attributes.len(), 3);
        // A 3 x 3 table has two non-trivial dimensions.
        assert!((m.explained[0] + m.explained[1] - 100.0).abs() < 1e-6);
        assert!(m.explained[0] >= m.explained[1]);
        // Each brand sits on the side of the attribute it is associated with.
        for (b, a) in m.brands.iter().zip(m.attributes.iter()) {
            assert!(b.x * a.x + b.y * a.y > 0.0);
        }
    }

    #[test]
    fn brand_without_associations() {
        let table = BrandAttributeTable::new(
            labels(&["Acme", "Globex", "Initech"]),
            labels(&["Cheap", "Fast", "Reliable"]),
            array![[20.0, 5.0, 5.0], [0.0, 0.0, 0.0], [5.0, 5.0, 20.0]],
        )
        .unwrap();
        let err = perceptual_map(&table, MapMethod::CorrespondenceAnalysis, &MetricOptions::default())
            .unwrap_err();
        match err {
            AnalysisError::InvalidMatrix { detail } => assert!(detail.contains("Globex")),
            x => panic!("{:?}", x),
        }
    }

    #[test]
    fn empty_table() {
        let table = BrandAttributeTable::new(
            labels(&["Acme", "Globex", "Initech"]),
            labels(&["Cheap", "Fast", "Reliable"]),
            Array2::zeros((3, 3)),
        )
        .unwrap();
        let err = perceptual_map(&table, MapMethod::CorrespondenceAnalysis, &MetricOptions::default())
            .unwrap_err();
        match err {
            AnalysisError::InvalidMatrix { detail } => {
                assert_eq!(detail, "brand Acme has no associations")
            }
            x => panic!("{:?}", x),
        }
    }

    #[test]
    fn table_too_small() {
        let table = BrandAttributeTable::new(
            labels(&["Acme", "Globex"]),
            labels(&["Cheap", "Fast", "Reliable"]),
            array![[20.0, 5.0, 5.0], [5.0, 5.0, 20.0]],
        )
        .unwrap();
        assert!(matches!(
            perceptual_map(&table, MapMethod::CorrespondenceAnalysis, &MetricOptions::default()),
            Err(AnalysisError::InvalidMatrix { .. })
        ));
        assert!(BrandAttributeTable::new(labels(&["Acme"]), labels(&["Cheap"]), array![[1.0, 2.0]]).is_err());
    }

    #[test]
    fn pca_of_ratings() {
        let table = BrandAttributeTable::new(
            labels(&["Acme", "Globex", "Initech", "Umbrella"]),
            labels(&["Quality", "Value", "Service"]),
            array![
                [4.5, 2.0, 4.0],
                [3.0, 4.0, 3.5],
                [2.0, 4.5, 2.0],
                [4.0, 3.0, 4.5]
            ],
        )
        .unwrap();
        let res = perceptual_map(&table, MapMethod::Pca, &MetricOptions::default()).unwrap();
        let m = map_of(&res);
        assert_eq!(m.method, MapMethod::Pca);
        assert!(m.explained[0] >= m.explained[1]);
        assert!(m.explained[0] + m.explained[1] <= 100.0 + 1e-9);
        // Standardised data: total variance is (brands - 1) * attributes.
        assert!((m.total_inertia - 9.0).abs() < 1e-6);
        // Quality and Value pull in opposite directions on the first axis.
        assert!(m.attributes[0].x * m.attributes[1].x < 0.0);
    }

    #[test]
    fn constant_rating_column() {
        let table = BrandAttributeTable::new(
            labels(&["Acme", "Globex", "Initech"]),
            labels(&["Quality", "Value"]),
            array![[4.0, 2.0], [4.0, 4.0], [4.0, 3.0]],
        )
        .unwrap();
        assert!(matches!(
            perceptual_map(&table, MapMethod::Pca, &MetricOptions::default()),
            Err(AnalysisError::InvalidMatrix { .. })
        ));
    }

    #[test]
    fn associations_from_responses() {
        let brands = BrandList {
            name: "brands".to_string(),
            brands: labels(&["Acme", "Globex"]),
        };
        let choices = |xs: &[&str]| Answer::Choices(labels(xs));
        let cheap = ResponseSlice::unweighted(
            "A_CHEAP",
            vec![("r1", choices(&["Acme"])), ("r2", choices(&["Acme", "Globex"]))],
        );
        let fast = ResponseSlice::unweighted(
            "A_FAST",
            vec![("r1", choices(&["Globex"])), ("r3", choices(&[]))],
        );
        let table = BrandAttributeTable::from_associations(
            &brands,
            &[("Cheap".to_string(), cheap), ("Fast".to_string(), fast)],
        )
        .unwrap();
        assert_eq!(table.values, array![[2.0, 0.0], [1.0, 1.0]]);
        assert_eq!(table.base.respondents, 2);
    }
}
