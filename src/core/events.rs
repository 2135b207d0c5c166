//! Application Events
//!
//! Events broadcast by the delivery core and the bridge to any subscribed
//! front-end.

use serde::Serialize;

use super::types::{
    BridgeState, ChatMode, ConversationSettings, Feature, Message, MessageStatus, TaskType,
};

/// Severity of a user-visible notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// Events emitted to subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChatEvent {
    // ========== Message Events ==========
    /// A message was added to the local list (optimistic)
    MessageAdded(Message),

    /// A message changed delivery status
    MessageStatusChanged {
        id: String,
        status: MessageStatus,
        retry_count: u32,
    },

    /// A message was parked in the offline queue
    MessageQueued { id: String },

    /// A retry was scheduled for a failed send
    RetryScheduled {
        id: String,
        attempt: u32,
        delay_ms: u64,
    },

    /// Offline queue replay finished
    QueueFlushed {
        sent: usize,
        failed: usize,
        remaining: usize,
    },

    /// All messages of a session were cleared
    MessagesCleared { session_id: String },

    // ========== Completion Events ==========
    CompletionStarted {
        trace_id: String,
        task_type: TaskType,
    },

    CompletionFinished {
        trace_id: String,
        model: String,
        provider: String,
        fallbacks_used: usize,
        cached: bool,
    },

    CompletionFailed { trace_id: String, error: String },

    // ========== Bridge State Events ==========
    ModeChanged { from: ChatMode, to: ChatMode },

    SettingsUpdated(ConversationSettings),

    ProviderChanged { provider: Option<String> },

    FeatureToggled { feature: Feature, enabled: bool },

    ConnectivityChanged { online: bool },

    StateChanged(BridgeState),

    ConversationStarted { session_id: String },

    ConversationEnded { session_id: String },

    // ========== UI Events ==========
    /// User-visible toast
    Notification {
        level: NotificationLevel,
        message: String,
    },

    /// Application-defined event passed through `emit`
    Custom {
        name: String,
        payload: serde_json::Value,
    },
}

/// Discriminant of [`ChatEvent`], used to filter subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageAdded,
    MessageStatusChanged,
    MessageQueued,
    RetryScheduled,
    QueueFlushed,
    MessagesCleared,
    CompletionStarted,
    CompletionFinished,
    CompletionFailed,
    ModeChanged,
    SettingsUpdated,
    ProviderChanged,
    FeatureToggled,
    ConnectivityChanged,
    StateChanged,
    ConversationStarted,
    ConversationEnded,
    Notification,
    Custom,
}

impl ChatEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::MessageAdded(_) => EventKind::MessageAdded,
            Self::MessageStatusChanged { .. } => EventKind::MessageStatusChanged,
            Self::MessageQueued { .. } => EventKind::MessageQueued,
            Self::RetryScheduled { .. } => EventKind::RetryScheduled,
            Self::QueueFlushed { .. } => EventKind::QueueFlushed,
            Self::MessagesCleared { .. } => EventKind::MessagesCleared,
            Self::CompletionStarted { .. } => EventKind::CompletionStarted,
            Self::CompletionFinished { .. } => EventKind::CompletionFinished,
            Self::CompletionFailed { .. } => EventKind::CompletionFailed,
            Self::ModeChanged { .. } => EventKind::ModeChanged,
            Self::SettingsUpdated(_) => EventKind::SettingsUpdated,
            Self::ProviderChanged { .. } => EventKind::ProviderChanged,
            Self::FeatureToggled { .. } => EventKind::FeatureToggled,
            Self::ConnectivityChanged { .. } => EventKind::ConnectivityChanged,
            Self::StateChanged(_) => EventKind::StateChanged,
            Self::ConversationStarted { .. } => EventKind::ConversationStarted,
            Self::ConversationEnded { .. } => EventKind::ConversationEnded,
            Self::Notification { .. } => EventKind::Notification,
            Self::Custom { .. } => EventKind::Custom,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::Notification {
            level: NotificationLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::Notification {
            level: NotificationLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Notification {
            level: NotificationLevel::Error,
            message: message.into(),
        }
    }
}
