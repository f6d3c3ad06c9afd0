//! Cognitive Strain Index: a short-window signal of momentary frustration
//! built from the timing of the learner's last few interactions.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::CsiWeights;
use crate::types::{sorted_by_time, EventType, InteractionEvent};

const CSI_WINDOW: usize = 10;
const RAPID_RESUBMISSION_MS: i64 = 5_000;
const SHORT_ERROR_INTERVAL_MS: i64 = 10_000;
const LONG_PAUSE_MS: i64 = 30_000;
const BURST_WINDOW_MS: i64 = 60_000;
const BURST_MIN_ERRORS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrainLevel {
    Low,
    Medium,
    High,
}

impl StrainLevel {
    pub fn from_score(score: f64) -> Self {
        if score < 0.3 {
            Self::Low
        } else if score < 0.6 {
            Self::Medium
        } else {
            Self::High
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsiComponents {
    pub rapid_resubmission: f64,
    pub short_interval_errors: f64,
    pub long_pause_before_help: f64,
    pub burst_error_clusters: f64,
    pub escalation_density: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsiResult {
    pub csi: f64,
    pub level: StrainLevel,
    pub components: CsiComponents,
}

pub fn calculate_csi(interactions: &[InteractionEvent], weights: &CsiWeights) -> CsiResult {
    let sorted = sorted_by_time(interactions);
    let window = &sorted[sorted.len().saturating_sub(CSI_WINDOW)..];

    let components = CsiComponents {
        rapid_resubmission: rapid_resubmission(window),
        short_interval_errors: short_interval_errors(window),
        long_pause_before_help: long_pause_before_help(window),
        burst_error_clusters: burst_error_clusters(window),
        escalation_density: escalation_density(window),
    };

    let csi = (weights.rapid_resubmission * components.rapid_resubmission
        + weights.short_interval_errors * components.short_interval_errors
        + weights.long_pause_before_help * components.long_pause_before_help
        + weights.burst_error_clusters * components.burst_error_clusters
        + weights.escalation_density * components.escalation_density)
        .clamp(0.0, 1.0);

    CsiResult {
        csi,
        level: StrainLevel::from_score(csi),
        components,
    }
}

fn timestamps_of(window: &[&InteractionEvent], event_type: EventType) -> Vec<i64> {
    window
        .iter()
        .filter(|e| e.event_type == event_type)
        .map(|e| e.timestamp)
        .collect()
}

/// Fraction of consecutive gaps shorter than `limit_ms`.
fn close_pair_fraction(timestamps: &[i64], limit_ms: i64) -> f64 {
    if timestamps.len() < 2 {
        return 0.0;
    }
    let close = timestamps
        .windows(2)
        .filter(|pair| pair[1] - pair[0] < limit_ms)
        .count();
    close as f64 / (timestamps.len() - 1) as f64
}

pub fn rapid_resubmission(window: &[&InteractionEvent]) -> f64 {
    close_pair_fraction(&timestamps_of(window, EventType::Execution), RAPID_RESUBMISSION_MS)
}

pub fn short_interval_errors(window: &[&InteractionEvent]) -> f64 {
    close_pair_fraction(&timestamps_of(window, EventType::Error), SHORT_ERROR_INTERVAL_MS)
}

/// Help requests whose nearest earlier error is more than 30s old. Requests
/// with no earlier error do not count as a long pause.
pub fn long_pause_before_help(window: &[&InteractionEvent]) -> f64 {
    let mut requests = 0usize;
    let mut long_pauses = 0usize;
    let mut last_error: Option<i64> = None;

    for event in window {
        if event.event_type == EventType::Error {
            last_error = Some(event.timestamp);
        } else if event.event_type.is_help_request() {
            requests += 1;
            if last_error.is_some_and(|ts| event.timestamp - ts > LONG_PAUSE_MS) {
                long_pauses += 1;
            }
        }
    }

    if requests == 0 {
        return 0.0;
    }
    long_pauses as f64 / requests as f64
}

/// Number of errors that open a window of at least three errors within 60s,
/// divided by three and capped at 1.
pub fn burst_error_clusters(window: &[&InteractionEvent]) -> f64 {
    let errors = timestamps_of(window, EventType::Error);
    let cluster_starts = (0..errors.len())
        .filter(|&idx| {
            let start = errors[idx];
            errors[idx..]
                .iter()
                .take_while(|&&ts| ts - start <= BURST_WINDOW_MS)
                .count()
                >= BURST_MIN_ERRORS
        })
        .count();
    (cluster_starts as f64 / 3.0).min(1.0)
}

pub fn escalation_density(window: &[&InteractionEvent]) -> f64 {
    let problems: HashSet<&str> = window.iter().map(|e| e.problem_id.as_str()).collect();
    if problems.is_empty() {
        return 0.0;
    }
    let escalations = window
        .iter()
        .filter(|e| e.event_type == EventType::GuidanceEscalate)
        .count();
    (escalations as f64 / problems.len() as f64).min(1.0)
}
