//! Campaign job definition and related types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a campaign job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new random JobId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single delivery target within a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    /// Provider-side identifier (phone number, user id, ...).
    pub id: String,
    /// Display name, used for personalization tokens.
    pub name: Option<String>,
    /// Free-form per-recipient metadata carried by the dashboard.
    pub metadata: Option<serde_json::Value>,
}

impl Recipient {
    /// Create a recipient with just an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            metadata: None,
        }
    }

    /// Set the display name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// A recipient is dispatchable only with a non-empty identifier.
    pub fn is_valid(&self) -> bool {
        !self.id.trim().is_empty()
    }
}

/// Interactive button attached to a `Buttons` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub id: String,
    pub title: String,
}

/// The message a campaign delivers, tagged by message type.
///
/// Each variant owns its payload fields; the payload builders in
/// `payload.rs` turn a variant into the provider wire form, so adding a
/// message type does not touch the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    /// Plain text message.
    Text { body: String },
    /// Image with optional caption.
    Image { url: String, caption: Option<String> },
    /// Video with optional caption.
    Video { url: String, caption: Option<String> },
    /// Interactive button template, optionally headed by an image.
    Buttons {
        body: String,
        buttons: Vec<Button>,
        image_url: Option<String>,
    },
    /// Quick-reply template.
    QuickReplies { body: String, replies: Vec<String> },
}

impl MessagePayload {
    /// Whether the payload carries media (images/videos/rich templates
    /// with an image header). Media sends get a pacing surcharge.
    pub fn has_media(&self) -> bool {
        match self {
            MessagePayload::Text { .. } => false,
            MessagePayload::Image { .. } | MessagePayload::Video { .. } => true,
            MessagePayload::Buttons { image_url, .. } => image_url.is_some(),
            MessagePayload::QuickReplies { .. } => false,
        }
    }
}

/// Pacing strategy between consecutive recipient sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayMode {
    Fixed,
    Random,
    Incremental,
    Adaptive,
}

impl std::fmt::Display for DelayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DelayMode::Fixed => "fixed",
            DelayMode::Random => "random",
            DelayMode::Incremental => "incremental",
            DelayMode::Adaptive => "adaptive",
        };
        write!(f, "{}", s)
    }
}

/// Inter-recipient pacing configuration.
///
/// Bounds (`min <= max` for random mode) are validated at job creation by
/// the dashboard; the engine does not re-validate them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayConfig {
    pub enabled: bool,
    pub mode: DelayMode,
    /// Fixed mode: seconds between sends.
    pub delay_secs: u64,
    /// Random mode bounds, inclusive.
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
    /// Incremental mode: start + index * step, unbounded growth.
    pub incremental_start_secs: u64,
    pub incremental_step_secs: u64,
    /// Adaptive mode base delay.
    pub adaptive_base_secs: u64,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: DelayMode::Fixed,
            delay_secs: 0,
            min_delay_secs: 0,
            max_delay_secs: 0,
            incremental_start_secs: 0,
            incremental_step_secs: 0,
            adaptive_base_secs: 0,
        }
    }
}

impl DelayConfig {
    /// Fixed pacing of `secs` seconds between sends.
    pub fn fixed(secs: u64) -> Self {
        Self {
            enabled: true,
            mode: DelayMode::Fixed,
            delay_secs: secs,
            ..Default::default()
        }
    }

    /// Uniform random pacing in `[min, max]` seconds.
    pub fn random(min: u64, max: u64) -> Self {
        Self {
            enabled: true,
            mode: DelayMode::Random,
            min_delay_secs: min,
            max_delay_secs: max,
            ..Default::default()
        }
    }
}

/// The status of a campaign job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is being edited, not yet submitted.
    Draft,
    /// Job is ready to run as soon as a worker claims it.
    Pending,
    /// Job is waiting for its scheduled time.
    Scheduled,
    /// Job is currently being processed under a held lock.
    Processing,
    /// Job finished iterating all recipients.
    Completed,
    /// Job aborted on a configuration or infrastructure error.
    Failed,
    /// Job was canceled by its owner.
    Canceled,
}

impl JobStatus {
    /// Terminal statuses never transition again and never hold the lock.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }

    /// Statuses a worker may claim for processing.
    pub fn is_claimable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Scheduled)
    }
}

/// Outcome of delivering to one recipient.
///
/// Folded into the job's bounded `results` window, not a full audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub recipient_id: String,
    pub success: bool,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    /// Retries performed beyond the first attempt.
    pub retries: u32,
    pub response_time_ms: u64,
    pub sent_at: i64,
}

impl DeliveryOutcome {
    /// Successful delivery outcome.
    pub fn success(
        recipient_id: impl Into<String>,
        message_id: impl Into<String>,
        retries: u32,
        response_time_ms: u64,
    ) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            success: true,
            provider_message_id: Some(message_id.into()),
            error: None,
            error_code: None,
            retries,
            response_time_ms,
            sent_at: now_ms(),
        }
    }

    /// Failed delivery outcome.
    pub fn failure(
        recipient_id: impl Into<String>,
        error: impl Into<String>,
        error_code: Option<String>,
        retries: u32,
        response_time_ms: u64,
    ) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            success: false,
            provider_message_id: None,
            error: Some(error.into()),
            error_code,
            retries,
            response_time_ms,
            sent_at: now_ms(),
        }
    }
}

/// Per-send pacing telemetry, appended in batches alongside outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayMetric {
    pub message_index: usize,
    pub recipient_id: String,
    pub target_ms: u64,
    pub actual_ms: u64,
    pub mode: DelayMode,
    pub timestamp: i64,
}

/// Aggregate delivery statistics written when a job completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryStats {
    pub avg_response_ms: u64,
    pub avg_delay_ms: u64,
    /// Successful sends over processed recipients, in `[0, 1]`.
    pub success_rate: f64,
    pub duration_ms: u64,
}

/// A persisted unit of bulk-delivery work: one campaign or scheduled send.
///
/// The record is exclusively owned by whichever worker holds
/// `processing_lock`; all other readers treat it as read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Owning user, the billing subject.
    pub owner: String,
    /// Ordered delivery list; processed strictly in order.
    pub recipients: Vec<Recipient>,
    pub message: MessagePayload,
    /// Substitute `{{name}}`, `{{date}}`, `{{time}}` tokens in text bodies.
    pub personalize: bool,
    pub delay: DelayConfig,
    pub scheduled: bool,
    /// Epoch millis; meaningful only when `scheduled` is set.
    pub scheduled_at: Option<i64>,

    pub status: JobStatus,
    /// Index of the next unprocessed recipient. Invariant:
    /// `0 <= current <= recipients.len()`.
    pub current: usize,
    pub sent: u64,
    pub failed: u64,
    /// Most-recent-N per-recipient outcomes (oldest evicted past the cap).
    pub results: Vec<DeliveryOutcome>,
    /// Most-recent-N pacing metrics, same eviction policy as `results`.
    pub delay_metrics: Vec<DelayMetric>,

    pub processing_lock: bool,
    pub lock_acquired_at: Option<i64>,
    pub processing_started_at: Option<i64>,
    pub processing_completed_at: Option<i64>,
    pub last_error: Option<String>,
    pub stats: Option<DeliveryStats>,

    /// Points debited at creation by the dashboard.
    pub deducted_points: u64,
    /// Invariant: `points_refunded <= deducted_points`.
    pub points_refunded: u64,

    pub created_at: i64,
}

impl Job {
    /// Create a pending job with the given owner, recipients, and message.
    pub fn new(owner: impl Into<String>, recipients: Vec<Recipient>, message: MessagePayload) -> Self {
        Self {
            id: JobId::new(),
            owner: owner.into(),
            recipients,
            message,
            personalize: false,
            delay: DelayConfig::default(),
            scheduled: false,
            scheduled_at: None,
            status: JobStatus::Pending,
            current: 0,
            sent: 0,
            failed: 0,
            results: Vec::new(),
            delay_metrics: Vec::new(),
            processing_lock: false,
            lock_acquired_at: None,
            processing_started_at: None,
            processing_completed_at: None,
            last_error: None,
            stats: None,
            deducted_points: 0,
            points_refunded: 0,
            created_at: now_ms(),
        }
    }

    /// Schedule the job to run at a specific epoch-millis timestamp.
    pub fn schedule_at(mut self, timestamp: i64) -> Self {
        self.scheduled = true;
        self.scheduled_at = Some(timestamp);
        self.status = JobStatus::Scheduled;
        self
    }

    /// Set the pacing configuration.
    pub fn with_delay(mut self, delay: DelayConfig) -> Self {
        self.delay = delay;
        self
    }

    /// Set the points debited for this job at creation.
    pub fn with_deducted_points(mut self, points: u64) -> Self {
        self.deducted_points = points;
        self
    }

    /// Enable personalization token substitution.
    pub fn personalized(mut self) -> Self {
        self.personalize = true;
        self
    }

    /// Whether the job is due to run at `now` (epoch millis).
    pub fn is_due(&self, now: i64) -> bool {
        if !self.scheduled {
            return true;
        }
        self.scheduled_at.map(|at| at <= now).unwrap_or(true)
    }

    /// Recipients not yet processed.
    pub fn remaining(&self) -> usize {
        self.recipients.len().saturating_sub(self.current)
    }

    /// Serialize the job to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a job from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Get current Unix timestamp in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}
