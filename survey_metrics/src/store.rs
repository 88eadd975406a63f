use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::*;

/// Restricts a store lookup to one wave and a subset of respondents.
#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseFilter {
    /// Defaults to the latest wave of the store.
    pub wave: Option<Wave>,
    pub segment: Option<SegmentPredicate>,
    pub respondents: Option<BTreeSet<RespondentId>>,
}

impl ResponseFilter {
    pub fn wave(wave: Wave) -> ResponseFilter {
        ResponseFilter {
            wave: Some(wave),
            ..Default::default()
        }
    }

    pub fn with_segment(&self, attribute: &str, level: &str) -> ResponseFilter {
        ResponseFilter {
            segment: Some(SegmentPredicate {
                attribute: attribute.to_string(),
                any_of: vec![level.to_string()],
            }),
            ..self.clone()
        }
    }
}

/// Keeps the respondents whose attribute takes one of the listed values.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentPredicate {
    pub attribute: String,
    pub any_of: Vec<String>,
}

impl SegmentPredicate {
    fn accepts(&self, respondent: Option<&Respondent>) -> bool {
        respondent
            .and_then(|r| r.attributes.get(&self.attribute))
            .map(|v| self.any_of.iter().any(|l| l == v))
            .unwrap_or(false)
    }
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SliceRow {
    pub respondent: RespondentId,
    pub answer: Answer,
    pub weight: f64,
}

/// The answers to one question, ready to be fed to a calculator.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSlice {
    pub question: QuestionId,
    pub wave: Wave,
    pub rows: Vec<SliceRow>,
}

impl ResponseSlice {
    /// Builds an unweighted slice, mostly useful for tests and ad-hoc data.
    pub fn unweighted(question: &str, answers: Vec<(&str, Answer)>) -> ResponseSlice {
        ResponseSlice {
            question: QuestionId::from(question),
            wave: Wave::FIRST,
            rows: answers
                .into_iter()
                .map(|(rid, answer)| SliceRow {
                    respondent: RespondentId::from(rid),
                    answer,
                    weight: 1.0,
                })
                .collect(),
        }
    }

    pub fn answered(&self) -> impl Iterator<Item = &SliceRow> {
        self.rows.iter().filter(|r| !r.answer.is_missing())
    }
}

/// Read-only view over the ingested responses.
///
/// Responses are created once at ingestion time through a [StoreBuilder] and
/// are never modified afterwards.
#[derive(PartialEq, Debug, Clone)]
pub struct ResponseStore {
    respondents: BTreeMap<(Wave, RespondentId), Respondent>,
    responses: HashMap<(Wave, QuestionId), BTreeMap<RespondentId, Answer>>,
    current_wave: Wave,
}

impl ResponseStore {
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    pub fn current_wave(&self) -> Wave {
        self.current_wave
    }

    pub fn waves(&self) -> BTreeSet<Wave> {
        self.respondents.keys().map(|(w, _)| *w).collect()
    }

    pub fn respondent(&self, wave: Wave, id: &RespondentId) -> Option<&Respondent> {
        self.respondents.get(&(wave, id.clone()))
    }

    pub fn respondents(&self, wave: Wave) -> impl Iterator<Item = &Respondent> {
        self.respondents
            .iter()
            .filter(move |((w, _), _)| *w == wave)
            .map(|(_, r)| r)
    }

    /// The distinct values taken by a respondent attribute in a wave, sorted.
    pub fn segment_levels(&self, attribute: &str, wave: Wave) -> Vec<String> {
        let levels: BTreeSet<String> = self
            .respondents(wave)
            .filter_map(|r| r.attributes.get(attribute).cloned())
            .collect();
        levels.into_iter().collect()
    }

    /// All the answers of a wave, grouped by question.
    pub fn answers_in_wave(
        &self,
        wave: Wave,
    ) -> impl Iterator<Item = (&QuestionId, &BTreeMap<RespondentId, Answer>)> {
        self.responses
            .iter()
            .filter(move |((w, _), _)| *w == wave)
            .map(|((_, q), answers)| (q, answers))
    }

    pub fn has_question(&self, question: &QuestionId, wave: Wave) -> bool {
        self.responses.contains_key(&(wave, question.clone()))
    }

    /// Returns the answers to a question, ordered by respondent id.
    pub fn get_responses(
        &self,
        question: &QuestionId,
        filter: &ResponseFilter,
    ) -> AnalysisResult<Vec<(RespondentId, Answer)>> {
        let wave = filter.wave.unwrap_or(self.current_wave);
        let answers = self
            .responses
            .get(&(wave, question.clone()))
            .ok_or_else(|| AnalysisError::QuestionNotFound {
                question: question.clone(),
                wave,
            })?;
        let res: Vec<(RespondentId, Answer)> = answers
            .iter()
            .filter(|(rid, _)| self.accepts(filter, wave, rid))
            .map(|(rid, a)| (rid.clone(), a.clone()))
            .collect();
        debug!(
            "get_responses: {} {}: {} of {} answers kept",
            question,
            wave,
            res.len(),
            answers.len()
        );
        Ok(res)
    }

    /// Like [ResponseStore::get_responses], with the respondent weights attached.
    pub fn slice(
        &self,
        question: &QuestionId,
        filter: &ResponseFilter,
        weighting: &Weighting,
    ) -> AnalysisResult<ResponseSlice> {
        let wave = filter.wave.unwrap_or(self.current_wave);
        let mut rows: Vec<SliceRow> = Vec::new();
        for (respondent, answer) in self.get_responses(question, filter)? {
            let weight = self.weight_of(wave, &respondent, weighting)?;
            rows.push(SliceRow {
                respondent,
                answer,
                weight,
            });
        }
        Ok(ResponseSlice {
            question: question.clone(),
            wave,
            rows,
        })
    }

    /// Counts the respondents of a wave that pass the filter.
    pub fn base_size(&self, filter: &ResponseFilter) -> usize {
        let wave = filter.wave.unwrap_or(self.current_wave);
        self.respondents(wave)
            .filter(|r| self.accepts(filter, wave, &r.id))
            .count()
    }

    pub fn weight_of(
        &self,
        wave: Wave,
        respondent: &RespondentId,
        weighting: &Weighting,
    ) -> AnalysisResult<f64> {
        match weighting {
            Weighting::Unweighted => Ok(1.0),
            Weighting::Attribute(name) => {
                let raw = self
                    .respondent(wave, respondent)
                    .and_then(|r| r.attributes.get(name));
                match raw.map(|s| s.trim().parse::<f64>()) {
                    Some(Ok(w)) if w > 0.0 && w.is_finite() => Ok(w),
                    x => InvalidOptionSnafu {
                        detail: format!(
                            "respondent {} has no usable weight in attribute {}: {:?}",
                            respondent, name, x
                        ),
                    }
                    .fail(),
                }
            }
        }
    }

    /// A copy of this store without the given respondents of one wave.
    pub fn without_respondents(&self, wave: Wave, ids: &BTreeSet<RespondentId>) -> ResponseStore {
        let respondents = self
            .respondents
            .iter()
            .filter(|((w, rid), _)| !(*w == wave && ids.contains(rid)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let responses = self
            .responses
            .iter()
            .map(|((w, q), answers)| {
                let kept: BTreeMap<RespondentId, Answer> = answers
                    .iter()
                    .filter(|(rid, _)| !(*w == wave && ids.contains(*rid)))
                    .map(|(rid, a)| (rid.clone(), a.clone()))
                    .collect();
                ((*w, q.clone()), kept)
            })
            .collect();
        ResponseStore {
            respondents,
            responses,
            current_wave: self.current_wave,
        }
    }

    fn accepts(&self, filter: &ResponseFilter, wave: Wave, rid: &RespondentId) -> bool {
        if let Some(allowed) = &filter.respondents {
            if !allowed.contains(rid) {
                return false;
            }
        }
        if let Some(segment) = &filter.segment {
            return segment.accepts(self.respondent(wave, rid));
        }
        true
    }
}

/// A builder for ingesting responses.
///
/// ```
/// use survey_metrics::*;
///
/// let mut builder = ResponseStore::builder();
/// builder.add_respondent(Respondent::new("r1", Wave::FIRST).with_attribute("region", "North"));
/// builder.add_response("r1", "NPS", Wave::FIRST, Answer::Number(9.0))?;
/// let store = builder.build();
///
/// let answers = store.get_responses(&QuestionId::from("NPS"), &ResponseFilter::default())?;
/// assert_eq!(answers.len(), 1);
/// # Ok::<(), AnalysisError>(())
/// ```
#[derive(Debug, Default)]
pub struct StoreBuilder {
    _respondents: BTreeMap<(Wave, RespondentId), Respondent>,
    _responses: HashMap<(Wave, QuestionId), BTreeMap<RespondentId, Answer>>,
}

impl StoreBuilder {
    /// Registers a respondent. Attributes of an already registered respondent
    /// are merged.
    pub fn add_respondent(&mut self, respondent: Respondent) {
        let key = (respondent.wave, respondent.id.clone());
        match self._respondents.get_mut(&key) {
            Some(existing) => {
                existing.attributes.extend(respondent.attributes);
                if respondent.duration_secs.is_some() {
                    existing.duration_secs = respondent.duration_secs;
                }
            }
            None => {
                self._respondents.insert(key, respondent);
            }
        }
    }

    /// Adds one answer. Unknown respondents are registered without attributes.
    pub fn add_response(
        &mut self,
        respondent: &str,
        question: &str,
        wave: Wave,
        answer: Answer,
    ) -> AnalysisResult<()> {
        let rid = RespondentId::from(respondent);
        let qid = QuestionId::from(question);
        self._respondents
            .entry((wave, rid.clone()))
            .or_insert_with(|| Respondent::new(respondent, wave));
        let answers = self._responses.entry((wave, qid.clone())).or_default();
        snafu::ensure!(
            !answers.contains_key(&rid),
            DuplicateResponseSnafu {
                respondent: rid,
                question: qid,
                wave
            }
        );
        answers.insert(rid, answer);
        Ok(())
    }

    pub fn build(self) -> ResponseStore {
        let current_wave = self
            ._respondents
            .keys()
            .map(|(w, _)| *w)
            .max()
            .unwrap_or(Wave::FIRST);
        ResponseStore {
            respondents: self._respondents,
            responses: self._responses,
            current_wave,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> ResponseStore {
        let mut b = ResponseStore::builder();
        b.add_respondent(
            Respondent::new("r2", Wave::FIRST)
                .with_attribute("region", "North")
                .with_attribute("w", "2.0"),
        );
        b.add_respondent(
            Respondent::new("r1", Wave::FIRST)
                .with_attribute("region", "South")
                .with_attribute("w", "0.5"),
        );
        b.add_response("r2", "Q1", Wave::FIRST, Answer::Number(9.0))
            .unwrap();
        b.add_response("r1", "Q1", Wave::FIRST, Answer::Number(3.0))
            .unwrap();
        b.add_response("r1", "Q1", Wave(2), Answer::Number(7.0))
            .unwrap();
        b.build()
    }

    #[test]
    fn duplicate_response_is_rejected() {
        let mut b = ResponseStore::builder();
        b.add_response("r1", "Q1", Wave::FIRST, Answer::Number(1.0))
            .unwrap();
        let err = b
            .add_response("r1", "Q1", Wave::FIRST, Answer::Number(2.0))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::DuplicateResponse { .. }));
        // Same respondent and question in another wave is fine.
        assert!(b
            .add_response("r1", "Q1", Wave(2), Answer::Number(2.0))
            .is_ok());
    }

    #[test]
    fn current_wave_is_the_latest() {
        let store = sample_store();
        assert_eq!(store.current_wave(), Wave(2));
        let w2 = store
            .get_responses(&QuestionId::from("Q1"), &ResponseFilter::default())
            .unwrap();
        assert_eq!(w2, vec![(RespondentId::from("r1"), Answer::Number(7.0))]);
    }

    #[test]
    fn responses_are_ordered_by_respondent() {
        let store = sample_store();
        let res = store
            .get_responses(&QuestionId::from("Q1"), &ResponseFilter::wave(Wave::FIRST))
            .unwrap();
        let ids: Vec<&str> = res.iter().map(|(r, _)| r.0.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
    }

    #[test]
    fn missing_question_is_not_found() {
        let store = sample_store();
        let err = store
            .get_responses(&QuestionId::from("Q9"), &ResponseFilter::default())
            .unwrap_err();
        assert!(matches!(err, AnalysisError::QuestionNotFound { .. }));
        assert_eq!(err.class(), ErrorClass::DataSufficiency);
    }

    #[test]
    fn segment_filter_and_weights() {
        let store = sample_store();
        let filter = ResponseFilter::wave(Wave::FIRST).with_segment("region", "North");
        let slice = store
            .slice(
                &QuestionId::from("Q1"),
                &filter,
                &Weighting::Attribute("w".to_string()),
            )
            .unwrap();
        assert_eq!(slice.rows.len(), 1);
        assert_eq!(slice.rows[0].respondent, RespondentId::from("r2"));
        assert_eq!(slice.rows[0].weight, 2.0);
        assert_eq!(store.base_size(&filter), 1);
        assert_eq!(
            store.segment_levels("region", Wave::FIRST),
            vec!["North".to_string(), "South".to_string()]
        );
    }

    #[test]
    fn unusable_weight_is_an_error() {
        let store = sample_store();
        let err = store
            .slice(
                &QuestionId::from("Q1"),
                &ResponseFilter::wave(Wave::FIRST),
                &Weighting::Attribute("region".to_string()),
            )
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidOption { .. }));
    }

    #[test]
    fn dropping_respondents() {
        let store = sample_store();
        let ids: BTreeSet<RespondentId> = [RespondentId::from("r1")].into_iter().collect();
        let cleaned = store.without_respondents(Wave::FIRST, &ids);
        assert_eq!(cleaned.base_size(&ResponseFilter::wave(Wave::FIRST)), 1);
        // Other waves are untouched.
        assert_eq!(cleaned.base_size(&ResponseFilter::wave(Wave(2))), 1);
    }
}
