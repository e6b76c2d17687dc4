//! Core data models for dossier.
//!
//! These types are shared across all dossier crates and represent the
//! ingestion domain: persisted source records, transient progress entries,
//! and enrichment attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// =============================================================================
// CATEGORIES
// =============================================================================

/// Declared category of an ingested source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceCategory {
    Resume,
    CoverLetter,
    Linkedin,
    CaseStudies,
}

impl SourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resume => "resume",
            Self::CoverLetter => "coverLetter",
            Self::Linkedin => "linkedin",
            Self::CaseStudies => "caseStudies",
        }
    }
}

impl std::fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceCategory {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "resume" => Ok(Self::Resume),
            "coverLetter" | "cover_letter" => Ok(Self::CoverLetter),
            "linkedin" => Ok(Self::Linkedin),
            "caseStudies" | "case_studies" => Ok(Self::CaseStudies),
            _ => Err(format!("Invalid source category: {}", s)),
        }
    }
}

// =============================================================================
// PROCESSING STATE MACHINE
// =============================================================================

/// Persisted processing status of a [`SourceRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// `Processing -> Processing` is allowed so that intermediate stage
    /// output (raw text) can be persisted without a status change.
    /// `Failed -> Pending` is only reached through an explicit retry.
    pub fn can_transition_to(&self, next: ProcessingStatus) -> bool {
        use ProcessingStatus::{Completed, Failed, Pending, Processing};
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Pending)
        )
    }

    /// Terminal under normal flow. `Failed` is still re-entrant via retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Invalid processing status: {}", s)),
        }
    }
}

/// Pipeline stage, recorded on failure so a retry can resume there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Extraction,
    Analysis,
}

impl ProcessingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Analysis => "analysis",
        }
    }
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessingStage {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "extraction" => Ok(Self::Extraction),
            "analysis" => Ok(Self::Analysis),
            _ => Err(format!("Invalid processing stage: {}", s)),
        }
    }
}

// =============================================================================
// SOURCE RECORDS
// =============================================================================

/// The durable unit of ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    pub id: Uuid,
    pub owner_id: String,
    pub category: SourceCategory,
    pub file_name: String,
    pub declared_mime_type: String,
    pub byte_size: i64,
    /// 64-char lowercase hex SHA-256 of the raw bytes.
    pub checksum: String,
    pub storage_path: String,
    pub status: ProcessingStatus,
    pub raw_text: Option<String>,
    pub structured_data: Option<JsonValue>,
    pub processing_error: Option<String>,
    pub retryable: bool,
    pub failed_stage: Option<ProcessingStage>,
    /// Enrichment provider that supplied the data, for identity records.
    pub data_source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SourceRecord {
    /// A failed record the caller may retry without changing input.
    pub fn is_retryable_failure(&self) -> bool {
        self.status == ProcessingStatus::Failed && self.retryable
    }
}

/// Metadata required to create a [`SourceRecord`].
#[derive(Debug, Clone)]
pub struct NewSourceRecord {
    pub owner_id: String,
    pub category: SourceCategory,
    pub file_name: String,
    pub declared_mime_type: String,
    pub byte_size: i64,
    pub checksum: String,
    pub storage_path: String,
}

/// Stage output persisted alongside a status change.
#[derive(Debug, Clone, PartialEq)]
pub enum StagePayload {
    /// Output of the extraction stage.
    RawText(String),
    /// Output of the analysis stage.
    Structured(JsonValue),
}

/// Last-writer-wins patch applied by `SourceRecordRepository::update_status`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: ProcessingStatus,
    pub payload: Option<StagePayload>,
    /// `None` clears any previous error.
    pub error: Option<String>,
    pub retryable: bool,
    pub failed_stage: Option<ProcessingStage>,
    pub data_source: Option<String>,
}

impl StatusUpdate {
    fn status(status: ProcessingStatus) -> Self {
        Self {
            status,
            payload: None,
            error: None,
            retryable: false,
            failed_stage: None,
            data_source: None,
        }
    }

    /// Orchestrator picked the record up.
    pub fn processing() -> Self {
        Self::status(ProcessingStatus::Processing)
    }

    /// Extraction produced text; status stays PROCESSING.
    pub fn extracted(raw_text: impl Into<String>) -> Self {
        Self {
            payload: Some(StagePayload::RawText(raw_text.into())),
            ..Self::processing()
        }
    }

    /// Analysis produced structured data.
    pub fn completed(structured: JsonValue) -> Self {
        Self {
            payload: Some(StagePayload::Structured(structured)),
            ..Self::status(ProcessingStatus::Completed)
        }
    }

    /// A stage failed.
    pub fn failed(stage: ProcessingStage, error: impl Into<String>, retryable: bool) -> Self {
        Self {
            error: Some(error.into()),
            retryable,
            failed_stage: Some(stage),
            ..Self::status(ProcessingStatus::Failed)
        }
    }

    /// Explicit retry: FAILED -> PENDING, clearing the previous error.
    pub fn reset() -> Self {
        Self::status(ProcessingStatus::Pending)
    }

    /// Attach the enrichment provider that supplied the data.
    pub fn with_data_source(mut self, source: impl Into<String>) -> Self {
        self.data_source = Some(source.into());
        self
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

/// Machine-readable validation failure code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    FileTooLarge,
    InvalidType,
    EmptyFileName,
    EmptyContent,
    InvalidUrl,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileTooLarge => "FILE_TOO_LARGE",
            Self::InvalidType => "INVALID_TYPE",
            Self::EmptyFileName => "EMPTY_FILE_NAME",
            Self::EmptyContent => "EMPTY_CONTENT",
            Self::InvalidUrl => "INVALID_URL",
        }
    }
}

impl std::fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of validating a candidate upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ValidationCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

impl ValidationResult {
    pub fn valid(file_type: impl Into<String>, file_size: u64) -> Self {
        Self {
            valid: true,
            error: None,
            error_code: None,
            file_type: Some(file_type.into()),
            file_size: Some(file_size),
        }
    }

    pub fn invalid(code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(message.into()),
            error_code: Some(code),
            file_type: None,
            file_size: None,
        }
    }

    /// Convert into a `Result`, turning a rejection into `Error::Validation`.
    pub fn into_result(self) -> crate::Result<Self> {
        if self.valid {
            return Ok(self);
        }
        let code = self.error_code.unwrap_or(ValidationCode::InvalidType);
        let message = self
            .error
            .unwrap_or_else(|| "Invalid file".to_string());
        Err(crate::Error::validation(code, message))
    }
}

// =============================================================================
// PROGRESS
// =============================================================================

/// Session-local identifier assigned before a record exists.
pub type FileId = Uuid;

/// Transient, UI-facing status of one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Transient progress of one upload within a session. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
    pub file_id: FileId,
    pub file_name: String,
    pub status: ProgressStatus,
    /// 0-100.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    /// Set once the SourceRecord exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<Uuid>,
}

impl ProgressEntry {
    pub fn new(file_id: FileId, file_name: impl Into<String>) -> Self {
        Self {
            file_id,
            file_name: file_name.into(),
            status: ProgressStatus::Pending,
            progress: 0,
            error: None,
            retryable: None,
            record_id: None,
        }
    }

    pub fn is_retryable_failure(&self) -> bool {
        self.status == ProgressStatus::Failed && self.retryable == Some(true)
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            ProgressStatus::Completed | ProgressStatus::Failed
        )
    }
}

// =============================================================================
// UPLOAD RESULTS
// =============================================================================

/// Result returned to callers of the upload operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub success: bool,
    pub file_id: FileId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProcessingStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl UploadResult {
    /// Success carrying the record and its status at return time.
    pub fn accepted(file_id: FileId, record: &SourceRecord) -> Self {
        let failed = record.status == ProcessingStatus::Failed;
        Self {
            success: !failed,
            file_id,
            record_id: Some(record.id),
            status: Some(record.status),
            error: record.processing_error.clone(),
            error_code: failed.then(|| "PROCESSING_ERROR".to_string()),
            retryable: failed.then_some(record.retryable),
        }
    }

    /// Record created and handed to background processing.
    pub fn queued(file_id: FileId, record_id: Uuid) -> Self {
        Self {
            success: true,
            file_id,
            record_id: Some(record_id),
            status: Some(ProcessingStatus::Pending),
            error: None,
            error_code: None,
            retryable: None,
        }
    }

    /// Failure before or outside of processing.
    pub fn rejected(file_id: FileId, err: &crate::Error) -> Self {
        Self {
            success: false,
            file_id,
            record_id: None,
            status: None,
            error: Some(err.to_string()),
            error_code: Some(err.code().to_string()),
            retryable: Some(err.is_retryable()),
        }
    }
}

// =============================================================================
// IDENTITY ENRICHMENT
// =============================================================================

/// Lookup hints handed to every enrichment provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileHints {
    pub profile_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// OAuth access token for the identity provider, if connected.
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
}

/// One position in a professional profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePosition {
    pub title: String,
    pub company: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One education entry in a professional profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileEducation {
    pub school: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degree: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_of_study: Option<String>,
}

/// Identity/profile data produced by the enrichment chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileData {
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub positions: Vec<ProfilePosition>,
    #[serde(default)]
    pub education: Vec<ProfileEducation>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub profile_url: String,
}

impl ProfileData {
    /// Plain-text rendering persisted as a record's `raw_text`.
    pub fn to_text(&self) -> String {
        let mut out = self.full_name.clone();
        if let Some(headline) = &self.headline {
            out.push('\n');
            out.push_str(headline);
        }
        if let Some(location) = &self.location {
            out.push('\n');
            out.push_str(location);
        }
        if let Some(summary) = &self.summary {
            out.push_str("\n\n");
            out.push_str(summary);
        }
        if !self.positions.is_empty() {
            out.push_str("\n\nExperience");
            for p in &self.positions {
                out.push_str(&format!("\n- {} at {}", p.title, p.company));
            }
        }
        if !self.education.is_empty() {
            out.push_str("\n\nEducation");
            for e in &self.education {
                out.push_str(&format!("\n- {}", e.school));
                if let Some(degree) = &e.degree {
                    out.push_str(&format!(", {}", degree));
                }
            }
        }
        if !self.skills.is_empty() {
            out.push_str("\n\nSkills: ");
            out.push_str(&self.skills.join(", "));
        }
        out
    }
}

/// Outcome of a single provider attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentResult {
    pub success: bool,
    pub provider_used: String,
    /// Only set by probabilistic providers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likelihood_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ProfileData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retryable: bool,
}

impl EnrichmentResult {
    pub fn found(provider: impl Into<String>, data: ProfileData, likelihood: Option<f32>) -> Self {
        Self {
            success: true,
            provider_used: provider.into(),
            likelihood_score: likelihood,
            data: Some(data),
            error: None,
            retryable: false,
        }
    }

    pub fn failed(provider: impl Into<String>, error: impl Into<String>, retryable: bool) -> Self {
        Self {
            success: false,
            provider_used: provider.into(),
            likelihood_score: None,
            data: None,
            error: Some(error.into()),
            retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_follow_state_machine() {
        use ProcessingStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ProcessingStatus::Completed.is_terminal());
        assert!(ProcessingStatus::Failed.is_terminal());
        assert!(!ProcessingStatus::Pending.is_terminal());
        assert!(!ProcessingStatus::Processing.is_terminal());
    }

    #[test]
    fn test_status_serde_uses_uppercase() {
        let json = serde_json::to_string(&ProcessingStatus::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
        let parsed: ProcessingStatus = "failed".parse().unwrap();
        assert_eq!(parsed, ProcessingStatus::Failed);
    }

    #[test]
    fn test_category_round_trips_through_str() {
        for category in [
            SourceCategory::Resume,
            SourceCategory::CoverLetter,
            SourceCategory::Linkedin,
            SourceCategory::CaseStudies,
        ] {
            let parsed: SourceCategory = category.as_str().parse().unwrap();
            assert_eq!(parsed, category);
        }
        assert!("portfolio".parse::<SourceCategory>().is_err());
    }

    #[test]
    fn test_category_serde_is_camel_case() {
        let json = serde_json::to_string(&SourceCategory::CoverLetter).unwrap();
        assert_eq!(json, "\"coverLetter\"");
    }

    #[test]
    fn test_status_update_failed_sets_stage_and_flag() {
        let update = StatusUpdate::failed(ProcessingStage::Extraction, "boom", true);
        assert_eq!(update.status, ProcessingStatus::Failed);
        assert_eq!(update.error.as_deref(), Some("boom"));
        assert!(update.retryable);
        assert_eq!(update.failed_stage, Some(ProcessingStage::Extraction));
    }

    #[test]
    fn test_status_update_reset_clears_error() {
        let update = StatusUpdate::reset();
        assert_eq!(update.status, ProcessingStatus::Pending);
        assert!(update.error.is_none());
        assert!(update.failed_stage.is_none());
    }

    #[test]
    fn test_validation_result_into_result() {
        let ok = ValidationResult::valid("application/pdf", 10);
        assert!(ok.into_result().is_ok());

        let bad = ValidationResult::invalid(ValidationCode::InvalidType, "nope");
        let err = bad.into_result().unwrap_err();
        assert_eq!(err.code(), "INVALID_TYPE");
        assert_eq!(err.to_string(), "nope");
    }

    #[test]
    fn test_progress_entry_retryable_failure() {
        let mut entry = ProgressEntry::new(Uuid::new_v4(), "cv.pdf");
        assert!(!entry.is_retryable_failure());
        entry.status = ProgressStatus::Failed;
        entry.retryable = Some(false);
        assert!(!entry.is_retryable_failure());
        entry.retryable = Some(true);
        assert!(entry.is_retryable_failure());
        assert!(entry.is_finished());
    }

    #[test]
    fn test_upload_result_rejected_carries_code() {
        let err = crate::Error::Transport("503".into());
        let result = UploadResult::rejected(Uuid::nil(), &err);
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("TRANSPORT_ERROR"));
        assert_eq!(result.retryable, Some(true));
    }

    #[test]
    fn test_profile_to_text_includes_sections() {
        let profile = ProfileData {
            full_name: "Ada Lovelace".into(),
            headline: Some("Analyst".into()),
            positions: vec![ProfilePosition {
                title: "Engineer".into(),
                company: "Analytical Engines".into(),
                ..Default::default()
            }],
            skills: vec!["math".into(), "poetry".into()],
            profile_url: "https://www.linkedin.com/in/ada".into(),
            ..Default::default()
        };
        let text = profile.to_text();
        assert!(text.starts_with("Ada Lovelace\nAnalyst"));
        assert!(text.contains("- Engineer at Analytical Engines"));
        assert!(text.ends_with("Skills: math, poetry"));
    }

    #[test]
    fn test_hints_never_serialize_access_token() {
        let hints = ProfileHints {
            profile_url: "https://www.linkedin.com/in/ada".into(),
            access_token: Some("secret".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&hints).unwrap();
        assert!(!json.contains("secret"));
    }
}
