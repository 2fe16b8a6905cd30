//! Expression labels, score mappings and the label → icon table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The fixed label set the expression model is trained to score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    Happy,
    Sad,
    Angry,
    Neutral,
    Surprised,
    Fearful,
    Disgusted,
}

impl Expression {
    pub const ALL: [Expression; 7] = [
        Expression::Happy,
        Expression::Sad,
        Expression::Angry,
        Expression::Neutral,
        Expression::Surprised,
        Expression::Fearful,
        Expression::Disgusted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Expression::Happy => "happy",
            Expression::Sad => "sad",
            Expression::Angry => "angry",
            Expression::Neutral => "neutral",
            Expression::Surprised => "surprised",
            Expression::Fearful => "fearful",
            Expression::Disgusted => "disgusted",
        }
    }

    /// Icon shown next to the label.
    pub fn icon(self) -> Icon {
        match self {
            Expression::Happy => Icon::new("sentiment_very_satisfied", "warning", '😄'),
            Expression::Sad => Icon::new("sentiment_dissatisfied", "primary", '🙁'),
            Expression::Angry => Icon::new("sentiment_very_dissatisfied", "error", '😠'),
            Expression::Neutral => Icon::new("sentiment_neutral", "action", '😐'),
            Expression::Surprised => Icon::new("mood", "secondary", '😮'),
            Expression::Fearful => Icon::new("sentiment_satisfied_alt", "info", '😨'),
            Expression::Disgusted => Icon::new("sentiment_dissatisfied", "success", '🤢'),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown expression label: {0}")]
pub struct UnknownExpression(pub String);

impl FromStr for Expression {
    type Err = UnknownExpression;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expression::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownExpression(s.to_string()))
    }
}

/// Static icon descriptor: Material icon name, colour role and a terminal glyph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Icon {
    pub name: &'static str,
    pub color: &'static str,
    pub glyph: char,
}

impl Icon {
    const fn new(name: &'static str, color: &'static str, glyph: char) -> Self {
        Self { name, color, glyph }
    }
}

/// Mapping from expression label to probability, in engine iteration order.
///
/// Labels are kept as strings because the vocabulary belongs to the engine;
/// use [`Expression::from_str`] to resolve a known label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpressionScores {
    entries: Vec<(String, f32)>,
}

impl ExpressionScores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the score for `label`, keeping its original position if present.
    pub fn insert(&mut self, label: impl Into<String>, score: f32) {
        let label = label.into();
        match self.entries.iter_mut().find(|(l, _)| *l == label) {
            Some(entry) => entry.1 = score,
            None => self.entries.push((label, score)),
        }
    }

    pub fn get(&self, label: &str) -> Option<f32> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, s)| *s)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.entries.iter().map(|(l, s)| (l.as_str(), *s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Label with the strictly highest score.
    ///
    /// Ties keep the label that comes first in iteration order. NaN scores
    /// never win.
    pub fn dominant(&self) -> Option<(&str, f32)> {
        let mut best: Option<(&str, f32)> = None;
        for (label, score) in self.iter() {
            if score.is_nan() {
                continue;
            }
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((label, score));
            }
        }
        best
    }
}

impl<S: Into<String>> FromIterator<(S, f32)> for ExpressionScores {
    fn from_iter<I: IntoIterator<Item = (S, f32)>>(iter: I) -> Self {
        let mut scores = ExpressionScores::new();
        for (label, score) in iter {
            scores.insert(label, score);
        }
        scores
    }
}
