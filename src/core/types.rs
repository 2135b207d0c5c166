//! Canonical type definitions for the core domain
//!
//! Single source of truth for the types shared by delivery, llm, storage and
//! bridge. Other modules re-export these rather than defining their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    #[default]
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
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

/// Content kind of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Code,
    Image,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Code => "code",
            Self::Image => "image",
            Self::System => "system",
        }
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "code" => Ok(Self::Code),
            "image" => Ok(Self::Image),
            "system" => Ok(Self::System),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

/// Delivery status of a message
///
/// `Error` is a transient failure with a retry scheduled; `Failed` means the
/// retry budget is spent and the message waits for manual intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Pending,
    Sent,
    Error,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Error => "error",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "error" => Ok(Self::Error),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown message status: {other}")),
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat message as mirrored locally and persisted server-side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_retry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    pub chat_session_id: String,
}

impl Message {
    /// Create a new pending message for a session
    pub fn new(
        chat_session_id: impl Into<String>,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            message_type: MessageType::Text,
            status: MessageStatus::Pending,
            created_at: now,
            updated_at: now,
            last_retry: None,
            retry_count: 0,
            chat_session_id: chat_session_id.into(),
        }
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    /// Move to a new status, bumping `updated_at`
    pub fn set_status(&mut self, status: MessageStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Status of an entry in the offline queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    #[default]
    Pending,
    Failed,
    Sent,
}

/// A message waiting in the offline queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: String,
    pub content: String,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
    pub status: QueueStatus,
    /// Entries written before these fields existed read back as user text
    #[serde(default)]
    pub role: MessageRole,
    #[serde(default)]
    pub message_type: MessageType,
}

impl QueuedMessage {
    pub fn from_message(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            content: message.content.clone(),
            attempts: 0,
            timestamp: Utc::now(),
            status: QueueStatus::Pending,
            role: message.role,
            message_type: message.message_type,
        }
    }

    /// Rebuild the message this entry was queued for
    pub fn to_message(&self, session_id: &str) -> Message {
        let mut message =
            Message::new(session_id, self.role, &self.content).with_type(self.message_type);
        message.id = self.id.clone();
        message.created_at = self.timestamp;
        message
    }
}

/// Classification of a model request, used to pick a fallback chain
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    Conversation,
    CodeGeneration,
    ImageGeneration,
    Summarization,
    Analysis,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::Conversation,
        TaskType::CodeGeneration,
        TaskType::ImageGeneration,
        TaskType::Summarization,
        TaskType::Analysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::CodeGeneration => "code_generation",
            Self::ImageGeneration => "image_generation",
            Self::Summarization => "summarization",
            Self::Analysis => "analysis",
        }
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown task type: {s}"))
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversation mode selected in the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    #[default]
    Chat,
    Code,
    Image,
    Assistant,
}

impl ChatMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Chat => "Chat",
            Self::Code => "Code",
            Self::Image => "Image",
            Self::Assistant => "Assistant",
        }
    }

    /// Task type used to pick the fallback chain for replies in this mode
    pub fn task_type(&self) -> TaskType {
        match self {
            Self::Chat | Self::Assistant => TaskType::Conversation,
            Self::Code => TaskType::CodeGeneration,
            Self::Image => TaskType::ImageGeneration,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Chat | Self::Assistant => MessageType::Text,
            Self::Code => MessageType::Code,
            Self::Image => MessageType::Image,
        }
    }

    /// Feature that must be enabled before messages can be sent in this mode
    pub fn required_feature(&self) -> Option<Feature> {
        match self {
            Self::Code => Some(Feature::CodeAssistant),
            Self::Image => Some(Feature::ImageGeneration),
            Self::Chat | Self::Assistant => None,
        }
    }
}

impl std::str::FromStr for ChatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "code" => Ok(Self::Code),
            "image" => Ok(Self::Image),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!(
                "unknown mode '{other}' (expected chat, code, image or assistant)"
            )),
        }
    }
}

impl std::fmt::Display for ChatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chat => write!(f, "chat"),
            Self::Code => write!(f, "code"),
            Self::Image => write!(f, "image"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// Toggleable product features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    CodeAssistant,
    ImageGeneration,
    Rag,
    AutoReply,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeAssistant => "code_assistant",
            Self::ImageGeneration => "image_generation",
            Self::Rag => "rag",
            Self::AutoReply => "auto_reply",
        }
    }
}

impl std::str::FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code_assistant" => Ok(Self::CodeAssistant),
            "image_generation" => Ok(Self::ImageGeneration),
            "rag" => Ok(Self::Rag),
            "auto_reply" => Ok(Self::AutoReply),
            other => Err(format!("unknown feature: {other}")),
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feature flag set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub code_assistant: bool,
    pub image_generation: bool,
    pub rag: bool,
    pub auto_reply: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            code_assistant: true,
            image_generation: false,
            rag: false,
            auto_reply: true,
        }
    }
}

impl FeatureFlags {
    pub fn is_enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::CodeAssistant => self.code_assistant,
            Feature::ImageGeneration => self.image_generation,
            Feature::Rag => self.rag,
            Feature::AutoReply => self.auto_reply,
        }
    }

    pub fn set(&mut self, feature: Feature, enabled: bool) {
        let slot = match feature {
            Feature::CodeAssistant => &mut self.code_assistant,
            Feature::ImageGeneration => &mut self.image_generation,
            Feature::Rag => &mut self.rag,
            Feature::AutoReply => &mut self.auto_reply,
        };
        *slot = enabled;
    }
}

/// Per-user delivery settings (the `chat_settings` row)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    pub rate_limit_per_minute: u32,
    pub max_offline_messages: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 10,
            max_offline_messages: 100,
        }
    }
}

/// Generation settings exposed through the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationSettings {
    /// Explicit model override; `None` follows the fallback chain
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.7,
            max_tokens: 1024,
            system_prompt: None,
        }
    }
}

/// Partial update for [`ConversationSettings`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsPatch {
    /// `Some(None)` clears the override
    pub model: Option<Option<String>>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<Option<String>>,
}

impl ConversationSettings {
    pub fn apply(&mut self, patch: SettingsPatch) {
        if let Some(model) = patch.model {
            self.model = model;
        }
        if let Some(temperature) = patch.temperature {
            self.temperature = temperature;
        }
        if let Some(max_tokens) = patch.max_tokens {
            self.max_tokens = max_tokens;
        }
        if let Some(system_prompt) = patch.system_prompt {
            self.system_prompt = system_prompt;
        }
    }
}

/// Observable bridge state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeState {
    pub session_id: String,
    pub mode: ChatMode,
    pub provider: Option<String>,
    pub online: bool,
    pub is_generating: bool,
    pub title: Option<String>,
}

impl BridgeState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            mode: ChatMode::default(),
            provider: None,
            online: true,
            is_generating: false,
            title: None,
        }
    }
}

/// Partial update for [`BridgeState`]
///
/// Only UI-owned fields are patchable; mode, provider and connectivity have
/// dedicated setters that emit their own events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatePatch {
    pub title: Option<Option<String>>,
    pub is_generating: Option<bool>,
}
