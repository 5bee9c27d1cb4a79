//! Scored segments produced by the content classifier.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::timestamp::{parse_timestamp, TimestampError};

/// Segment validation error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SegmentError {
    #[error("invalid segment: {0}")]
    InvalidSegment(String),

    #[error("invalid segment timestamp: {0}")]
    Timestamp(#[from] TimestampError),
}

impl SegmentError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidSegment(msg.into())
    }
}

/// Ordinal severity of flagged content. Declaration order is the ranking.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    None,
    Questionable,
    Mild,
    Moderate,
    Severe,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Questionable => "questionable",
            Severity::Mild => "mild",
            Severity::Moderate => "moderate",
            Severity::Severe => "severe",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = SegmentError;

    /// Accepts both label vocabularies the classifier has used.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "halal" | "clean" | "" => Ok(Severity::None),
            "questionable" => Ok(Severity::Questionable),
            "mild" => Ok(Severity::Mild),
            "moderate" | "heavy" => Ok(Severity::Moderate),
            "severe" => Ok(Severity::Severe),
            other => Err(SegmentError::invalid(format!("unknown severity '{other}'"))),
        }
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Ordinal action suggested for a flagged range, least to most restrictive.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    #[default]
    None,
    AudioOnly,
    Blur,
    Skip,
    Cut,
}

impl SuggestedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestedAction::None => "none",
            SuggestedAction::AudioOnly => "audio_only",
            SuggestedAction::Blur => "blur",
            SuggestedAction::Skip => "skip",
            SuggestedAction::Cut => "cut",
        }
    }
}

impl fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SuggestedAction {
    type Err = SegmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "none" | "" => Ok(SuggestedAction::None),
            "audio_only" => Ok(SuggestedAction::AudioOnly),
            "blur" | "blur_scene" => Ok(SuggestedAction::Blur),
            "skip" => Ok(SuggestedAction::Skip),
            "cut" | "cut_segment" => Ok(SuggestedAction::Cut),
            other => Err(SegmentError::invalid(format!("unknown action '{other}'"))),
        }
    }
}

impl<'de> Deserialize<'de> for SuggestedAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One classified time range on the source timeline.
///
/// Construction validates `start < end`; a `ScoredSegment` that exists is
/// always well formed.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct ScoredSegment {
    /// Start of the range in seconds
    pub start: f64,
    /// End of the range in seconds
    pub end: f64,
    pub severity: Severity,
    /// Issue tags; order is not significant
    pub issues: BTreeSet<String>,
    pub suggested_action: SuggestedAction,
    /// Classifier confidence/intensity
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ScoredSegment {
    /// Create a validated segment with no metadata.
    pub fn new(start: f64, end: f64) -> Result<Self, SegmentError> {
        validate_range(start, end)?;
        Ok(Self {
            start,
            end,
            severity: Severity::None,
            issues: BTreeSet::new(),
            suggested_action: SuggestedAction::None,
            score: 0.0,
            description: None,
        })
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_action(mut self, action: SuggestedAction) -> Self {
        self.suggested_action = action;
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn with_issues<I, S>(mut self, issues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issues.extend(issues.into_iter().map(Into::into));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

fn validate_range(start: f64, end: f64) -> Result<(), SegmentError> {
    if !start.is_finite() || !end.is_finite() {
        return Err(SegmentError::invalid(format!(
            "non-finite bounds ({start}, {end})"
        )));
    }
    if start < 0.0 {
        return Err(SegmentError::invalid(format!("negative start {start}")));
    }
    if end <= start {
        return Err(SegmentError::invalid(format!(
            "end {end} is not after start {start}"
        )));
    }
    Ok(())
}

/// A position as written by the classifier: seconds or a clock string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TimeValue {
    Seconds(f64),
    Clock(String),
}

impl TimeValue {
    fn seconds(&self) -> Result<f64, SegmentError> {
        match self {
            TimeValue::Seconds(s) => Ok(*s),
            TimeValue::Clock(s) => Ok(parse_timestamp(s)?),
        }
    }
}

/// Persisted classifier shape, with every alias it has been written under.
#[derive(Debug, Deserialize)]
struct RawScoredSegment {
    start: Option<TimeValue>,
    end: Option<TimeValue>,
    start_seconds: Option<f64>,
    end_seconds: Option<f64>,
    #[serde(default)]
    severity: Severity,
    #[serde(default)]
    issues: Vec<String>,
    suggested_action: Option<SuggestedAction>,
    replacement: Option<SuggestedAction>,
    // Merged records carry several of these at once.
    score: Option<f64>,
    haram_score: Option<f64>,
    confidence: Option<f64>,
    description: Option<String>,
    reason: Option<String>,
}

impl TryFrom<RawScoredSegment> for ScoredSegment {
    type Error = SegmentError;

    fn try_from(raw: RawScoredSegment) -> Result<Self, Self::Error> {
        // Explicit seconds win over clock strings, which lose sub-millisecond precision.
        let start = match (raw.start_seconds, raw.start) {
            (Some(s), _) => s,
            (None, Some(v)) => v.seconds()?,
            (None, None) => return Err(SegmentError::invalid("missing start")),
        };
        let end = match (raw.end_seconds, raw.end) {
            (Some(s), _) => s,
            (None, Some(v)) => v.seconds()?,
            (None, None) => return Err(SegmentError::invalid("missing end")),
        };
        validate_range(start, end)?;

        let score = raw
            .score
            .or(raw.haram_score)
            .or(raw.confidence)
            .unwrap_or(0.0);
        if !score.is_finite() {
            return Err(SegmentError::invalid("non-finite score"));
        }

        Ok(Self {
            start,
            end,
            severity: raw.severity,
            issues: raw
                .issues
                .into_iter()
                .map(|i| i.trim().to_string())
                .filter(|i| !i.is_empty())
                .collect(),
            suggested_action: raw.suggested_action.or(raw.replacement).unwrap_or_default(),
            score,
            description: raw
                .description
                .filter(|d| !d.trim().is_empty())
                .or(raw.reason.filter(|d| !d.trim().is_empty())),
        })
    }
}

impl<'de> Deserialize<'de> for ScoredSegment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawScoredSegment::deserialize(deserializer)?;
        ScoredSegment::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// Parse a JSON array of classifier records, rejecting the whole batch on
/// the first malformed segment.
pub fn parse_segments(json: &str) -> Result<Vec<ScoredSegment>, SegmentError> {
    let values: Vec<serde_json::Value> =
        serde_json::from_str(json).map_err(|e| SegmentError::invalid(e.to_string()))?;

    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            let raw: RawScoredSegment = serde_json::from_value(v)
                .map_err(|e| SegmentError::invalid(format!("segment {i}: {e}")))?;
            ScoredSegment::try_from(raw).map_err(|e| match e {
                SegmentError::InvalidSegment(msg) => {
                    SegmentError::InvalidSegment(format!("segment {i}: {msg}"))
                }
                other => other,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::None < Severity::Questionable);
        assert!(Severity::Mild < Severity::Moderate);
        assert!(Severity::Moderate < Severity::Severe);
        assert_eq!(Severity::Mild.max(Severity::Severe), Severity::Severe);
    }

    #[test]
    fn test_severity_legacy_labels() {
        assert_eq!("halal".parse::<Severity>().unwrap(), Severity::None);
        assert_eq!("clean".parse::<Severity>().unwrap(), Severity::None);
        assert_eq!("heavy".parse::<Severity>().unwrap(), Severity::Moderate);
        assert_eq!("SEVERE".parse::<Severity>().unwrap(), Severity::Severe);
        assert!("extreme".parse::<Severity>().is_err());
    }

    #[test]
    fn test_action_ordering_and_aliases() {
        assert!(SuggestedAction::AudioOnly < SuggestedAction::Blur);
        assert!(SuggestedAction::Skip < SuggestedAction::Cut);
        assert_eq!("blur_scene".parse::<SuggestedAction>().unwrap(), SuggestedAction::Blur);
        assert_eq!("cut_segment".parse::<SuggestedAction>().unwrap(), SuggestedAction::Cut);
        assert_eq!("audio-only".parse::<SuggestedAction>().unwrap(), SuggestedAction::AudioOnly);
    }

    #[test]
    fn test_new_rejects_inverted_range() {
        assert!(matches!(
            ScoredSegment::new(5.0, 5.0),
            Err(SegmentError::InvalidSegment(_))
        ));
        assert!(ScoredSegment::new(6.0, 2.0).is_err());
        assert!(ScoredSegment::new(-1.0, 2.0).is_err());
        assert!(ScoredSegment::new(0.0, f64::NAN).is_err());
    }

    #[test]
    fn test_deserialize_classifier_shape() {
        let json = r#"{
            "start": "00:00:10.500",
            "end": "00:00:12",
            "severity": "heavy",
            "issues": ["revealing clothing", "kissing", ""],
            "replacement": "blur_scene",
            "haram_score": 0.72,
            "reason": "close embrace"
        }"#;
        let seg: ScoredSegment = serde_json::from_str(json).unwrap();
        assert!((seg.start - 10.5).abs() < 1e-9);
        assert_eq!(seg.end, 12.0);
        assert_eq!(seg.severity, Severity::Moderate);
        assert_eq!(seg.issues.len(), 2);
        assert_eq!(seg.suggested_action, SuggestedAction::Blur);
        assert_eq!(seg.score, 0.72);
        assert_eq!(seg.description.as_deref(), Some("close embrace"));
    }

    #[test]
    fn test_parse_merged_record_with_every_score_key() {
        let json = r#"[{
            "start": "00:00:10",
            "end": "00:00:15",
            "severity": "severe",
            "issues": ["kissing"],
            "replacement": "cut_segment",
            "haram_score": 0.8,
            "confidence": 0.6,
            "reason": "kiss; embrace",
            "description": ""
        }]"#;
        let segs = parse_segments(json).unwrap();
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].score, 0.8);
        assert_eq!(segs[0].suggested_action, SuggestedAction::Cut);
        assert_eq!(segs[0].description.as_deref(), Some("kiss; embrace"));

        let both = r#"[{"start": 1, "end": 2, "score": 0.3, "haram_score": 0.9}]"#;
        assert_eq!(parse_segments(both).unwrap()[0].score, 0.3);
    }

    #[test]
    fn test_seconds_fields_take_precedence() {
        let json = r#"{"start": "00:00:10", "end": "00:00:12",
                       "start_seconds": 10.04, "end_seconds": 12.96,
                       "confidence": 0.5}"#;
        let seg: ScoredSegment = serde_json::from_str(json).unwrap();
        assert_eq!(seg.start, 10.04);
        assert_eq!(seg.end, 12.96);
        assert_eq!(seg.score, 0.5);
    }

    #[test]
    fn test_deserialize_rejects_malformed() {
        let err = serde_json::from_str::<ScoredSegment>(r#"{"start": 4, "end": 3}"#);
        assert!(err.is_err());
        let err = serde_json::from_str::<ScoredSegment>(r#"{"end": 3}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_parse_segments_reports_index() {
        let json = r#"[{"start": 1, "end": 2}, {"start": 9, "end": 8}]"#;
        match parse_segments(json) {
            Err(SegmentError::InvalidSegment(msg)) => assert!(msg.starts_with("segment 1")),
            other => panic!("expected InvalidSegment, got {other:?}"),
        }
    }

    #[test]
    fn test_serialize_uses_canonical_labels() {
        let seg = ScoredSegment::new(1.0, 2.0)
            .unwrap()
            .with_severity(Severity::Mild)
            .with_action(SuggestedAction::AudioOnly);
        let json = serde_json::to_value(&seg).unwrap();
        assert_eq!(json["severity"], "mild");
        assert_eq!(json["suggested_action"], "audio_only");
        let back: ScoredSegment = serde_json::from_value(json).unwrap();
        assert_eq!(back, seg);
    }
}
