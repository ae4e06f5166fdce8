//! Emotion vocabulary and temporal smoothing
//!
//! ## Responsibilities
//!
//! - Fixed emotion label set shared across the pipeline
//! - Bounded-history majority-vote smoothing of the per-frame label stream

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// Number of recent labels the smoothing filter retains
pub const HISTORY_CAPACITY: usize = 50;

/// One value from the fixed emotion vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Happy,
    Sad,
    Angry,
    #[default]
    Neutral,
    Surprised,
    Fearful,
    Disgusted,
}

impl EmotionLabel {
    /// String form used in API responses and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionLabel::Happy => "happy",
            EmotionLabel::Sad => "sad",
            EmotionLabel::Angry => "angry",
            EmotionLabel::Neutral => "neutral",
            EmotionLabel::Surprised => "surprised",
            EmotionLabel::Fearful => "fearful",
            EmotionLabel::Disgusted => "disgusted",
        }
    }

    /// All labels, in vocabulary order
    pub fn all() -> &'static [EmotionLabel] {
        &[
            EmotionLabel::Happy,
            EmotionLabel::Sad,
            EmotionLabel::Angry,
            EmotionLabel::Neutral,
            EmotionLabel::Surprised,
            EmotionLabel::Fearful,
            EmotionLabel::Disgusted,
        ]
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmotionLabel {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "happy" => Ok(EmotionLabel::Happy),
            "sad" => Ok(EmotionLabel::Sad),
            "angry" => Ok(EmotionLabel::Angry),
            "neutral" => Ok(EmotionLabel::Neutral),
            "surprised" | "surprise" => Ok(EmotionLabel::Surprised),
            "fearful" | "fear" => Ok(EmotionLabel::Fearful),
            "disgusted" | "disgust" => Ok(EmotionLabel::Disgusted),
            other => Err(UnknownLabel(other.to_string())),
        }
    }
}

/// Classifier returned a label outside the fixed vocabulary
#[derive(Debug, Clone, thiserror::Error)]
#[error("Unknown emotion label: {0}")]
pub struct UnknownLabel(pub String);

/// Bounded-history majority-vote filter
///
/// Keeps the most recent [`HISTORY_CAPACITY`] observed labels in a ring
/// buffer and derives the stable label by majority vote. Ties resolve to the
/// candidate seen first in the current history's insertion order, so the
/// output is a deterministic pure function of the observed sequence.
pub struct SmoothingFilter {
    history: VecDeque<EmotionLabel>,
    capacity: usize,
}

impl SmoothingFilter {
    /// Create filter with default capacity
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    /// Create filter with explicit capacity (tests)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append one observation, evicting the oldest at capacity, and return
    /// the recomputed stable label
    pub fn observe(&mut self, label: EmotionLabel) -> EmotionLabel {
        if self.history.len() >= self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(label);
        self.majority()
    }

    /// Current stable label: most frequent label in history, ties broken by
    /// first appearance in insertion order. Empty history yields the default.
    pub fn majority(&self) -> EmotionLabel {
        let mut best = EmotionLabel::default();
        let mut best_count = 0usize;

        for (i, &candidate) in self.history.iter().enumerate() {
            // Only the first occurrence of each label is a candidate, which
            // gives the insertion-order tie-break for free.
            if self.history.iter().take(i).any(|&seen| seen == candidate) {
                continue;
            }
            let count = self.history.iter().filter(|&&l| l == candidate).count();
            if count > best_count {
                best = candidate;
                best_count = count;
            }
        }

        best
    }

    /// Number of labels currently held
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// True if nothing has been observed yet
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Oldest label still in history (tests)
    pub fn oldest(&self) -> Option<EmotionLabel> {
        self.history.front().copied()
    }
}

impl Default for SmoothingFilter {
    fn default() -> Self {
        Self::new()
    }
}
