use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::*;

/// Whether a wave continues the current tracking series or starts a new one.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesChange {
    SameSeries,
    /// The definition was deliberately changed. Results are not comparable
    /// with the previous series.
    NewSeries,
}

/// Computes the fingerprint of a study definition.
pub fn fingerprint(definition: &StudyDefinition) -> AnalysisResult<String> {
    let js = serde_json::to_string(definition).map_err(|e| AnalysisError::Configuration {
        detail: format!("cannot serialize study {}: {}", definition.name, e),
    })?;
    Ok(sha256::digest(js))
}

/// A tracking series: a study definition frozen for all the waves it covers.
///
/// Question wording, scales and brand lists cannot change inside a series.
/// Changing them requires starting a new series explicitly.
#[derive(Debug, Clone)]
pub struct TrackingSeries {
    series_id: u32,
    definition: Arc<StudyDefinition>,
    fingerprint: String,
    waves: BTreeMap<Wave, String>,
}

impl TrackingSeries {
    pub fn start(series_id: u32, definition: StudyDefinition) -> AnalysisResult<TrackingSeries> {
        let fp = fingerprint(&definition)?;
        info!(
            "Starting series {} for study {} (fingerprint {})",
            series_id, definition.name, fp
        );
        Ok(TrackingSeries {
            series_id,
            definition: Arc::new(definition),
            fingerprint: fp,
            waves: BTreeMap::new(),
        })
    }

    pub fn series_id(&self) -> u32 {
        self.series_id
    }

    pub fn definition(&self) -> &StudyDefinition {
        &self.definition
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn waves(&self) -> Vec<Wave> {
        self.waves.keys().cloned().collect()
    }

    /// Opens a wave fielded with the given definition.
    ///
    /// Returns the series the wave belongs to: this one if the definition is
    /// unchanged, a fresh one if `change` is [SeriesChange::NewSeries].
    pub fn open_wave(
        &self,
        wave: Wave,
        definition: &StudyDefinition,
        change: SeriesChange,
    ) -> AnalysisResult<TrackingSeries> {
        let fp = fingerprint(definition)?;
        match change {
            SeriesChange::SameSeries if fp == self.fingerprint => {
                let mut next = self.clone();
                next.waves.insert(wave, fp);
                Ok(next)
            }
            SeriesChange::SameSeries => {
                warn!(
                    "open_wave: definition of series {} changed at wave {}",
                    self.series_id, wave
                );
                DefinitionChangedSnafu {
                    series: self.series_id,
                    expected: self.fingerprint.clone(),
                    found: fp,
                }
                .fail()
            }
            SeriesChange::NewSeries => {
                let mut next = TrackingSeries::start(self.series_id + 1, definition.clone())?;
                next.waves.insert(wave, next.fingerprint.clone());
                Ok(next)
            }
        }
    }
}
