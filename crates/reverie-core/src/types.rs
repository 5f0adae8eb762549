use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What a memory is about. Drives λ selection in decay and the category
/// match rule in relation detection and fusion clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    Preference,
    Fact,
    Event,
    Relationship,
    Insight,
}

impl std::fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Preference => "preference",
            Self::Fact => "fact",
            Self::Event => "event",
            Self::Relationship => "relationship",
            Self::Insight => "insight",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MemoryCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preference" => Ok(Self::Preference),
            "fact" => Ok(Self::Fact),
            "event" => Ok(Self::Event),
            "relationship" => Ok(Self::Relationship),
            "insight" => Ok(Self::Insight),
            other => Err(format!("unknown memory category: {other}")),
        }
    }
}

/// What produced a memory row, distinct from its `category`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Regular,
    StaticProfile,
    Summary,
    Derived,
    Superseded,
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Regular => "regular",
            Self::StaticProfile => "static_profile",
            Self::Summary => "summary",
            Self::Derived => "derived",
            Self::Superseded => "superseded",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regular" => Ok(Self::Regular),
            "static_profile" => Ok(Self::StaticProfile),
            "summary" => Ok(Self::Summary),
            "derived" => Ok(Self::Derived),
            "superseded" => Ok(Self::Superseded),
            other => Err(format!("unknown memory type: {other}")),
        }
    }
}

/// A single memory entry. See data model §3: content-addressed, versioned,
/// embedding-indexed, with prominence-based decay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub category: MemoryCategory,
    pub memory_type: MemoryType,
    /// 1..=10
    pub importance: u8,
    /// 0.0..=1.0
    pub confidence: f64,
    /// 0.0..=1.0 salience weight, independent of confidence.
    pub prominence: f64,
    pub access_count: u32,
    pub times_confirmed: u32,
    pub is_latest: bool,
    pub source: String,
    pub source_chunk: Option<String>,
    pub learned_from: Option<String>,
    /// ms since epoch.
    pub document_date: i64,
    pub event_date: Option<i64>,
    pub last_accessed: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub contradiction_ids: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl MemoryEntry {
    /// `true` if `importance`/`confidence`/`prominence`/`document_date` hold
    /// their invariants. Violations are programmer errors, not recoverable
    /// at runtime — callers should construct valid rows, never "repair" one.
    pub fn invariants_hold(&self, now_ms: i64) -> bool {
        (1..=10).contains(&self.importance)
            && (0.0..=1.0).contains(&self.confidence)
            && (0.0..=1.0).contains(&self.prominence)
            && self.document_date <= now_ms + 60_000
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    Updates,
    Extends,
    Derives,
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Updates => "UPDATES",
            Self::Extends => "EXTENDS",
            Self::Derives => "DERIVES",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RelationType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UPDATES" => Ok(Self::Updates),
            "EXTENDS" => Ok(Self::Extends),
            "DERIVES" => Ok(Self::Derives),
            other => Err(format!("unknown relation type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRelation {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub relation_type: RelationType,
    pub confidence: f64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub source: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: String,
    pub summary: String,
    pub topics: Vec<String>,
    pub message_count: u32,
    pub duration_ms: i64,
    pub embedding: Option<Vec<f32>>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledItemSource {
    User,
    Agent,
}

impl std::fmt::Display for ScheduledItemSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", if matches!(self, Self::User) { "user" } else { "agent" })
    }
}

impl std::str::FromStr for ScheduledItemSource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            other => Err(format!("unknown scheduled item source: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledItemKind {
    Nudge,
    Task,
}

impl std::fmt::Display for ScheduledItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", if matches!(self, Self::Nudge) { "nudge" } else { "task" })
    }
}

impl std::str::FromStr for ScheduledItemKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nudge" => Ok(Self::Nudge),
            "task" => Ok(Self::Task),
            other => Err(format!("unknown scheduled item kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledItemStatus {
    Pending,
    Processing,
    Fired,
    Acted,
    Expired,
}

impl std::fmt::Display for ScheduledItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Fired => "fired",
            Self::Acted => "acted",
            Self::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ScheduledItemStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "fired" => Ok(Self::Fired),
            "acted" => Ok(Self::Acted),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown scheduled item status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardStatus {
    Scheduled,
    Waiting,
    InProgress,
    Done,
    Archived,
}

impl std::fmt::Display for BoardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Scheduled => "scheduled",
            Self::Waiting => "waiting",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Archived => "archived",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for BoardStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "waiting" => Ok(Self::Waiting),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown board status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurringType {
    Daily,
    Weekly,
    Weekdays,
    Weekends,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringSpec {
    #[serde(rename = "type")]
    pub kind: RecurringType,
    pub hour: u8,
    pub minute: u8,
    /// 0 = Monday .. 6 = Sunday. Required when `kind == Weekly`.
    pub day_of_week: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduledItemResult {
    pub response: Option<String>,
    pub completed_at: Option<i64>,
    pub iterations_used: Option<u32>,
    pub notified_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledItem {
    pub id: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub source: ScheduledItemSource,
    pub kind: ScheduledItemKind,
    #[serde(rename = "type")]
    pub item_type: String,
    pub message: String,
    pub context: Option<HashMap<String, serde_json::Value>>,
    pub trigger_at: i64,
    pub status: ScheduledItemStatus,
    pub board_status: BoardStatus,
    pub recurring: Option<RecurringSpec>,
    pub source_memory_id: Option<String>,
    pub task_config: Option<serde_json::Value>,
    pub depends_on: Vec<String>,
    pub priority: i32,
    pub labels: Vec<String>,
    pub goal_id: Option<String>,
    pub result: Option<ScheduledItemResult>,
    pub fired_at: Option<i64>,
    pub acted_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DynamicProfile {
    pub recent_topics: Vec<String>,
    pub active_projects: Vec<String>,
    pub current_mood: Option<String>,
    pub last_interaction_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AffectState {
    /// EMA of valence, -1.0..=1.0
    pub valence: f64,
    /// EMA of arousal, 0.0..=1.0
    pub arousal: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehavioralPatterns {
    pub communication_style: Option<String>,
    pub expertise_areas: Vec<String>,
    pub active_hours: Vec<u8>,
    pub response_preferences: HashMap<String, serde_json::Value>,
    pub message_frequency: f64,
    pub session_engagement: f64,
    pub topic_switch: f64,
    pub response_length: f64,
    pub affect_state: AffectState,
    pub smoothed_affect: AffectState,
    /// Number of messages already folded into these aggregates — drives the
    /// incremental-inference cursor in the gardener.
    pub last_analyzed_count: u64,
}
