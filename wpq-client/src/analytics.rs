//! Derived session aggregates
//!
//! Everything here is a pure function of an attendee list. The cache decides
//! when to recompute; this module only decides what the numbers are.

use serde::Serialize;
use std::collections::BTreeMap;
use wpq_common::models::{Attendee, Generation, PreferenceScores};

/// Mean score at or above which a dimension earns its "high" adjective
pub const DNA_HIGH_THRESHOLD: f64 = 7.0;
/// Mean score at or below which a dimension earns its "low" adjective
pub const DNA_LOW_THRESHOLD: f64 = 3.0;
/// Label used when no dimension crosses a threshold
pub const DNA_BALANCED: &str = "Balanced";
pub const DNA_SEPARATOR: &str = " & ";

/// Arithmetic means per dimension, unrounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MeanScores {
    pub collaboration: f64,
    pub formality: f64,
    pub technology: f64,
    pub wellness: f64,
}

impl MeanScores {
    pub const ZERO: MeanScores = MeanScores {
        collaboration: 0.0,
        formality: 0.0,
        technology: 0.0,
        wellness: 0.0,
    };

    /// Mean of each dimension; zeros for an empty slice
    pub fn of(scores: &[PreferenceScores]) -> MeanScores {
        if scores.is_empty() {
            return MeanScores::ZERO;
        }
        let n = scores.len() as f64;
        let sum = |f: fn(&PreferenceScores) -> u8| {
            scores.iter().map(|s| f64::from(f(s))).sum::<f64>() / n
        };
        MeanScores {
            collaboration: sum(|s| s.collaboration),
            formality: sum(|s| s.formality),
            technology: sum(|s| s.technology),
            wellness: sum(|s| s.wellness),
        }
    }

    /// Integer display form: rounded half away from zero, clamped to 0-10
    pub fn rounded(&self) -> PreferenceScores {
        let r = |v: f64| v.round().clamp(0.0, 10.0) as u8;
        PreferenceScores::new(
            r(self.collaboration),
            r(self.formality),
            r(self.technology),
            r(self.wellness),
        )
    }
}

/// One weighted word cloud entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WordCloudTerm {
    pub text: String,
    pub weight: u32,
}

/// All derived views of one session's attendee list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionAnalytics {
    pub total_count: usize,
    /// Joined but not yet completed
    pub active_count: usize,
    pub completed_count: usize,
    /// Whole percent, 0 when nobody has joined
    pub response_rate: u32,
    /// Always holds all four cohorts
    pub generation_distribution: BTreeMap<Generation, usize>,
    /// Over completed attendees with a score record
    pub mean_scores: MeanScores,
    pub generation_scores: BTreeMap<Generation, MeanScores>,
    pub workplace_dna: String,
    pub word_cloud: Vec<WordCloudTerm>,
}

impl SessionAnalytics {
    /// Analytics of an empty session
    pub fn empty() -> Self {
        compute(&[])
    }
}

/// Completed attendees' score records
fn completed_scores<'a>(attendees: impl Iterator<Item = &'a Attendee>) -> Vec<PreferenceScores> {
    attendees
        .filter(|a| a.completed)
        .filter_map(|a| a.preferences)
        .collect()
}

/// `round(completed / total * 100)`, 0 when total is 0
pub fn response_rate(completed: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (completed as f64 / total as f64 * 100.0).round() as u32
}

/// Count per cohort; unrecognized and missing labels are left out
pub fn generation_distribution(attendees: &[Attendee]) -> BTreeMap<Generation, usize> {
    let mut counts: BTreeMap<Generation, usize> =
        Generation::ALL.iter().map(|g| (*g, 0)).collect();
    for cohort in attendees.iter().filter_map(Attendee::cohort) {
        *counts.entry(cohort).or_insert(0) += 1;
    }
    counts
}

/// Per-cohort means over that cohort's completed attendees
pub fn generation_scores(attendees: &[Attendee]) -> BTreeMap<Generation, MeanScores> {
    Generation::ALL
        .iter()
        .map(|g| {
            let scores = completed_scores(attendees.iter().filter(|a| a.cohort() == Some(*g)));
            (*g, MeanScores::of(&scores))
        })
        .collect()
}

/// Threshold each mean into at most one adjective per dimension
pub fn workplace_dna(means: &MeanScores) -> String {
    let dimensions = [
        (means.collaboration, "Collaborative", "Independent"),
        (means.formality, "Structured", "Casual"),
        (means.technology, "Tech-Forward", "Traditional"),
        (means.wellness, "Wellness-Focused", "Results-Driven"),
    ];

    let traits: Vec<&str> = dimensions
        .iter()
        .filter_map(|(value, high, low)| {
            if *value >= DNA_HIGH_THRESHOLD {
                Some(*high)
            } else if *value <= DNA_LOW_THRESHOLD {
                Some(*low)
            } else {
                None
            }
        })
        .collect();

    if traits.is_empty() {
        DNA_BALANCED.to_string()
    } else {
        traits.join(DNA_SEPARATOR)
    }
}

/// Weighted terms: dimensions by mean score, then cohorts by headcount
///
/// Zero-weight terms are skipped. Order is insertion order only.
pub fn word_cloud(means: &MeanScores, distribution: &BTreeMap<Generation, usize>) -> Vec<WordCloudTerm> {
    let dimensions = [
        ("Collaboration", means.collaboration),
        ("Formality", means.formality),
        ("Technology", means.technology),
        ("Wellness", means.wellness),
    ];

    let mut terms: Vec<WordCloudTerm> = dimensions
        .iter()
        .map(|(text, mean)| WordCloudTerm {
            text: text.to_string(),
            weight: (mean * 10.0).round().max(0.0) as u32,
        })
        .collect();

    terms.extend(Generation::ALL.iter().map(|g| WordCloudTerm {
        text: g.display_name().to_string(),
        weight: distribution.get(g).copied().unwrap_or(0) as u32 * 10,
    }));

    terms.retain(|t| t.weight > 0);
    terms
}

/// Compute every derived view from an attendee list
pub fn compute(attendees: &[Attendee]) -> SessionAnalytics {
    let total_count = attendees.len();
    let completed_count = attendees.iter().filter(|a| a.completed).count();
    let scored = completed_scores(attendees.iter());
    let mean_scores = MeanScores::of(&scored);
    let distribution = generation_distribution(attendees);

    // No scores yet means no signal, not "low on everything"
    let dna = if scored.is_empty() {
        DNA_BALANCED.to_string()
    } else {
        workplace_dna(&mean_scores)
    };

    SessionAnalytics {
        total_count,
        active_count: total_count - completed_count,
        completed_count,
        response_rate: response_rate(completed_count, total_count),
        generation_scores: generation_scores(attendees),
        workplace_dna: dna,
        word_cloud: word_cloud(&mean_scores, &distribution),
        generation_distribution: distribution,
        mean_scores,
    }
}
