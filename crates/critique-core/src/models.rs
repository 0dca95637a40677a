//! Data model: rubric dimensions, dimensional profiles, jobs, and results.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// RUBRIC DIMENSIONS
// =============================================================================

/// One of the eight rubric dimensions every profile is scored on.
///
/// The declaration order is the canonical order used everywhere output must
/// be deterministic (prompts, delta tables, distance sums).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Composition,
    Lighting,
    Focus,
    Color,
    Isolation,
    Depth,
    Balance,
    Emotion,
}

impl Dimension {
    /// All dimensions in canonical order.
    pub const ALL: [Dimension; 8] = [
        Dimension::Composition,
        Dimension::Lighting,
        Dimension::Focus,
        Dimension::Color,
        Dimension::Isolation,
        Dimension::Depth,
        Dimension::Balance,
        Dimension::Emotion,
    ];

    /// Storage/wire key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Composition => "composition",
            Dimension::Lighting => "lighting",
            Dimension::Focus => "focus",
            Dimension::Color => "color",
            Dimension::Isolation => "isolation",
            Dimension::Depth => "depth",
            Dimension::Balance => "balance",
            Dimension::Emotion => "emotion",
        }
    }

    /// Human-readable rubric label.
    pub fn label(&self) -> &'static str {
        match self {
            Dimension::Composition => "Composition",
            Dimension::Lighting => "Lighting",
            Dimension::Focus => "Focus & Sharpness",
            Dimension::Color => "Color Harmony",
            Dimension::Isolation => "Subject Isolation",
            Dimension::Depth => "Depth & Perspective",
            Dimension::Balance => "Visual Balance",
            Dimension::Emotion => "Emotional Impact",
        }
    }

    /// Parse a dimension key, accepting the long rubric names models tend to emit.
    pub fn from_key(key: &str) -> Option<Self> {
        let normalized = key
            .trim()
            .to_ascii_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("_");
        match normalized.as_str() {
            "composition" => Some(Dimension::Composition),
            "lighting" | "light" => Some(Dimension::Lighting),
            "focus" | "sharpness" | "focus_sharpness" => Some(Dimension::Focus),
            "color" | "colour" | "color_harmony" | "colour_harmony" => Some(Dimension::Color),
            "isolation" | "subject_isolation" => Some(Dimension::Isolation),
            "depth" | "perspective" | "depth_perspective" => Some(Dimension::Depth),
            "balance" | "visual_balance" => Some(Dimension::Balance),
            "emotion" | "emotional_impact" | "impact" => Some(Dimension::Emotion),
            _ => None,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowest valid rubric score.
pub const SCORE_MIN: f64 = 0.0;

/// Highest valid rubric score.
pub const SCORE_MAX: f64 = 10.0;

/// Eight nullable rubric scores.
///
/// A missing score means the dimension could not be assessed; distance
/// computations skip it rather than treating it as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lighting: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<f64>,
}

impl DimensionScores {
    /// Scores with every dimension set to the same value.
    pub fn uniform(value: f64) -> Self {
        let mut scores = Self::default();
        for dim in Dimension::ALL {
            scores.set(dim, Some(value));
        }
        scores
    }

    pub fn get(&self, dim: Dimension) -> Option<f64> {
        match dim {
            Dimension::Composition => self.composition,
            Dimension::Lighting => self.lighting,
            Dimension::Focus => self.focus,
            Dimension::Color => self.color,
            Dimension::Isolation => self.isolation,
            Dimension::Depth => self.depth,
            Dimension::Balance => self.balance,
            Dimension::Emotion => self.emotion,
        }
    }

    pub fn set(&mut self, dim: Dimension, value: Option<f64>) {
        let slot = match dim {
            Dimension::Composition => &mut self.composition,
            Dimension::Lighting => &mut self.lighting,
            Dimension::Focus => &mut self.focus,
            Dimension::Color => &mut self.color,
            Dimension::Isolation => &mut self.isolation,
            Dimension::Depth => &mut self.depth,
            Dimension::Balance => &mut self.balance,
            Dimension::Emotion => &mut self.emotion,
        };
        *slot = value;
    }

    /// Builder-style setter.
    pub fn with(mut self, dim: Dimension, value: f64) -> Self {
        self.set(dim, Some(value));
        self
    }

    /// Iterate `(dimension, score)` in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Dimension, Option<f64>)> + '_ {
        Dimension::ALL.into_iter().map(move |d| (d, self.get(d)))
    }

    /// Number of dimensions carrying a score.
    pub fn present_count(&self) -> usize {
        self.iter().filter(|(_, v)| v.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.present_count() == 0
    }

    /// Mean of present scores, `None` when nothing is scored.
    pub fn mean(&self) -> Option<f64> {
        let present: Vec<f64> = self.iter().filter_map(|(_, v)| v).collect();
        if present.is_empty() {
            return None;
        }
        Some(present.iter().sum::<f64>() / present.len() as f64)
    }

    /// Reject non-finite or out-of-domain scores.
    pub fn validate(&self) -> Result<()> {
        for (dim, value) in self.iter() {
            if let Some(v) = value {
                if !v.is_finite() || !(SCORE_MIN..=SCORE_MAX).contains(&v) {
                    return Err(Error::Validation(format!(
                        "score for {} must be within [{}, {}], got {}",
                        dim, SCORE_MIN, SCORE_MAX, v
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Derive a letter grade from the mean of present scores.
///
/// Bands are one point wide starting at 9 (A), 8 (B), 7 (C), 6 (D); anything
/// lower is F. The upper third of a band earns `+`, the lower third `-`; A has
/// no `+` and F has neither.
pub fn grade_for_mean(mean: f64) -> &'static str {
    const BANDS: [(f64, [&str; 3]); 4] = [
        (9.0, ["A-", "A", "A"]),
        (8.0, ["B-", "B", "B+"]),
        (7.0, ["C-", "C", "C+"]),
        (6.0, ["D-", "D", "D+"]),
    ];
    for (floor, grades) in BANDS {
        if mean >= floor {
            let within = (mean - floor).min(1.0);
            let idx = if within < 1.0 / 3.0 {
                0
            } else if within < 2.0 / 3.0 {
                1
            } else {
                2
            };
            return grades[idx];
        }
    }
    "F"
}

// =============================================================================
// DIMENSIONAL PROFILE
// =============================================================================

/// Optional descriptive metadata attached to a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub significance: Option<String>,
    /// Technique identifiers such as `zone_system` or `depth_of_field`.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub technique_tags: BTreeSet<String>,
}

impl ProfileMetadata {
    /// Normalize a raw technique label to its identifier form.
    pub fn normalize_tag(raw: &str) -> String {
        raw.trim()
            .to_ascii_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Add technique tags, normalizing each and dropping empties.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for tag in tags {
            let tag = Self::normalize_tag(tag.as_ref());
            if !tag.is_empty() {
                self.technique_tags.insert(tag);
            }
        }
        self
    }
}

/// Per-image 8-dimension characterization, keyed by `(advisor_id, image_path)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionalProfile {
    pub id: Uuid,
    pub advisor_id: String,
    pub image_path: String,
    pub scores: DimensionScores,
    #[serde(default)]
    pub comments: BTreeMap<Dimension, String>,
    #[serde(default)]
    pub metadata: ProfileMetadata,
    pub overall_grade: Option<String>,
    /// Set for transient query images (user uploads); such profiles never
    /// take part in retrieval.
    pub working_set: bool,
    /// First time this key was written; retrieval ties break on it.
    pub created_at: DateTime<Utc>,
    /// Stamp of the latest write; later stamps win.
    pub updated_at: DateTime<Utc>,
}

/// Request to upsert a profile by `(advisor_id, image_path)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpsertProfileRequest {
    /// Filled from the route on import.
    #[serde(default)]
    pub advisor_id: String,
    pub image_path: String,
    #[serde(default)]
    pub scores: DimensionScores,
    #[serde(default)]
    pub comments: BTreeMap<Dimension, String>,
    #[serde(default)]
    pub metadata: ProfileMetadata,
    #[serde(default)]
    pub overall_grade: Option<String>,
    #[serde(default)]
    pub working_set: bool,
}

impl UpsertProfileRequest {
    /// Validate the key and scores.
    pub fn validate(&self) -> Result<()> {
        if self.advisor_id.trim().is_empty() {
            return Err(Error::Validation("advisor_id is required".into()));
        }
        if self.image_path.trim().is_empty() {
            return Err(Error::Validation("image_path is required".into()));
        }
        self.scores.validate()
    }

    /// The provided grade, or one derived from the mean score.
    pub fn effective_grade(&self) -> Option<String> {
        self.overall_grade
            .clone()
            .filter(|g| !g.trim().is_empty())
            .or_else(|| self.scores.mean().map(|m| grade_for_mean(m).to_string()))
    }
}

// =============================================================================
// ANALYSIS MODES
// =============================================================================

/// Analysis strategy requested for, or effectively used by, a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    Baseline,
    Rag,
    Lora,
    RagLora,
}

impl AnalysisMode {
    pub const ALL: [AnalysisMode; 4] = [
        AnalysisMode::Baseline,
        AnalysisMode::Rag,
        AnalysisMode::Lora,
        AnalysisMode::RagLora,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Baseline => "baseline",
            AnalysisMode::Rag => "rag",
            AnalysisMode::Lora => "lora",
            AnalysisMode::RagLora => "rag_lora",
        }
    }

    /// Next strategy to try when this one is unavailable.
    pub fn fallback(&self) -> Option<AnalysisMode> {
        match self {
            AnalysisMode::RagLora => Some(AnalysisMode::Lora),
            AnalysisMode::Lora => Some(AnalysisMode::Rag),
            AnalysisMode::Rag => Some(AnalysisMode::Baseline),
            AnalysisMode::Baseline => None,
        }
    }

    /// Whether the mode needs the retrieval pass.
    pub fn uses_retrieval(&self) -> bool {
        matches!(self, AnalysisMode::Rag | AnalysisMode::RagLora)
    }

    /// Whether the mode needs a fine-tuned adapter.
    pub fn uses_adapter(&self) -> bool {
        matches!(self, AnalysisMode::Lora | AnalysisMode::RagLora)
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "baseline" => Ok(AnalysisMode::Baseline),
            "rag" => Ok(AnalysisMode::Rag),
            "lora" => Ok(AnalysisMode::Lora),
            "rag_lora" | "raglora" => Ok(AnalysisMode::RagLora),
            other => Err(Error::Validation(format!(
                "unknown analysis mode '{}' (expected baseline, rag, lora, rag_lora)",
                other
            ))),
        }
    }
}

// =============================================================================
// JOBS
// =============================================================================

/// Job lifecycle state.
///
/// `queued → extracting → (retrieving) → analyzing → done`, with `error`
/// reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Extracting,
    Retrieving,
    Analyzing,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Extracting => "extracting",
            JobStatus::Retrieving => "retrieving",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "extracting" => Some(JobStatus::Extracting),
            "retrieving" => Some(JobStatus::Retrieving),
            "analyzing" => Some(JobStatus::Analyzing),
            "done" => Some(JobStatus::Done),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    /// Position along the lifecycle. Terminal states share the top rank so an
    /// observer never moves from one terminal state to another.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Extracting => 1,
            JobStatus::Retrieving => 2,
            JobStatus::Analyzing => 3,
            JobStatus::Done | JobStatus::Error => 4,
        }
    }

    /// Progress reported on entering this state.
    pub fn entry_progress(&self) -> i32 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Extracting => 10,
            JobStatus::Retrieving => 40,
            JobStatus::Analyzing => 60,
            JobStatus::Done => 100,
            // error keeps whatever progress was reached
            JobStatus::Error => 0,
        }
    }

    /// Failure kind for a job stopped while in this pass; `None` outside the
    /// in-flight states.
    pub fn stage_kind(&self) -> Option<ErrorKind> {
        match self {
            JobStatus::Extracting => Some(ErrorKind::ExtractionFailed),
            JobStatus::Retrieving => Some(ErrorKind::RetrievalFailed),
            JobStatus::Analyzing => Some(ErrorKind::AnalysisFailed),
            _ => None,
        }
    }

    /// Whether the state machine allows `self → next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Extracting)
                | (Extracting, Retrieving)
                | (Extracting, Analyzing)
                | (Retrieving, Analyzing)
                | (Analyzing, Done)
        ) || (!self.is_terminal() && next == Error)
    }

    /// States from which `next` may be entered.
    pub fn allowed_predecessors(next: JobStatus) -> Vec<JobStatus> {
        [
            JobStatus::Queued,
            JobStatus::Extracting,
            JobStatus::Retrieving,
            JobStatus::Analyzing,
            JobStatus::Done,
            JobStatus::Error,
        ]
        .into_iter()
        .filter(|s| s.can_transition_to(next))
        .collect()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-visible failure taxonomy persisted on failed jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    NoStrategyAvailable,
    ExtractionFailed,
    RetrievalFailed,
    AnalysisFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::NoStrategyAvailable => "no_strategy_available",
            ErrorKind::ExtractionFailed => "extraction_failed",
            ErrorKind::RetrievalFailed => "retrieval_failed",
            ErrorKind::AnalysisFailed => "analysis_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "validation_error" => Some(ErrorKind::ValidationError),
            "no_strategy_available" => Some(ErrorKind::NoStrategyAvailable),
            "extraction_failed" => Some(ErrorKind::ExtractionFailed),
            "retrieval_failed" => Some(ErrorKind::RetrievalFailed),
            "analysis_failed" => Some(ErrorKind::AnalysisFailed),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure recorded on a job in the `error` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Recorded on jobs found mid-pass at startup.
    pub fn interrupted(kind: ErrorKind) -> Self {
        Self::new(kind, "interrupted by restart")
    }

    /// Build from a pipeline error raised while `stage` was running.
    pub fn from_error(err: &Error, stage: ErrorKind) -> Self {
        Self::new(err.kind_or(stage), err.to_string())
    }
}

/// An analysis job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub advisor_id: String,
    pub image_path: String,
    pub mode_requested: AnalysisMode,
    /// Unset until the strategy resolver has run.
    pub mode_effective: Option<AnalysisMode>,
    /// Whether resolution followed the fallback chain.
    pub fell_back: bool,
    pub status: JobStatus,
    pub progress_percent: i32,
    pub result: Option<CritiqueResult>,
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub advisor_id: String,
    pub image_path: String,
    pub mode_requested: AnalysisMode,
}

/// Queue statistics summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: i64,
    pub in_flight: i64,
    pub done: i64,
    pub error: i64,
    pub total: i64,
}

// =============================================================================
// RETRIEVAL + RESULTS
// =============================================================================

/// A reference profile retrieved for comparison with a query profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub profile: DimensionalProfile,
    /// Euclidean distance over dimensions scored on both sides.
    pub distance: f64,
    /// `reference - query`, one entry per dimension scored on both sides.
    pub deltas: BTreeMap<Dimension, f64>,
    /// Technique tags shared with the query, sorted.
    #[serde(default)]
    pub shared_techniques: Vec<String>,
}

/// Reference image cited in a retrieval-mode result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceUsed {
    pub image_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub distance: f64,
    pub deltas: BTreeMap<Dimension, f64>,
    #[serde(default)]
    pub shared_techniques: Vec<String>,
}

impl From<&SimilarityResult> for ReferenceUsed {
    fn from(r: &SimilarityResult) -> Self {
        Self {
            image_path: r.profile.image_path.clone(),
            title: r.profile.metadata.title.clone(),
            date: r.profile.metadata.date.clone(),
            location: r.profile.metadata.location.clone(),
            distance: r.distance,
            deltas: r.deltas.clone(),
            shared_techniques: r.shared_techniques.clone(),
        }
    }
}

/// Critique for a single rubric dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionCritique {
    pub dimension: Dimension,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_technique: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_technique: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_gap: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

/// Final structured critique persisted on a `done` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CritiqueResult {
    pub advisor_id: String,
    pub mode: AnalysisMode,
    pub summary: String,
    pub overall_grade: Option<String>,
    pub dimensions: Vec<DimensionCritique>,
    /// Pass-1 scores for the submitted image.
    pub query_scores: DimensionScores,
    /// Populated for retrieval modes.
    #[serde(default)]
    pub references: Vec<ReferenceUsed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}
