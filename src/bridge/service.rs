//! ChatBridge - the single seam between a front-end and the core
//!
//! A front-end never talks to storage or providers directly: it sends through
//! the bridge, reads state from it and listens to its events. The bridge is
//! constructed explicitly (see [`ChatBridgeBuilder`]) and shared by `Arc`.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;

use super::errors::BridgeError;
use super::middleware::{OutgoingMessage, SendContext, SendPipeline};
use crate::core::{
    BridgeState, ChatEvent, ChatMode, ChatSettings, ConversationSettings, EventBus, EventKind,
    Feature, FeatureFlags, Message, MessageRole, MessageStore, SettingsPatch, SettingsStore,
    StatePatch, StorageError, Subscription, TaskType,
};
use crate::delivery::{FlushReport, MessageManager, RetryConfig, SendOutcome, RATE_LIMIT_WINDOW};
use crate::llm::{CompletionOptions, ModelRouter, ResponseEnvelope};
use crate::storage::{LocalStorage, MemoryMessageStore};

/// Result of [`ChatBridge::send_message`]
#[derive(Debug, Clone)]
pub struct SendReport {
    /// What happened to the user's message
    pub outcome: SendOutcome,
    /// Assistant reply, when auto-reply produced one
    pub reply: Option<Message>,
    /// Envelope of the completion behind `reply`
    pub envelope: Option<ResponseEnvelope>,
}

impl SendReport {
    pub fn message(&self) -> &Message {
        self.outcome.message()
    }
}

pub struct ChatBridge {
    manager: MessageManager,
    router: Option<Arc<ModelRouter>>,
    events: EventBus,
    pipeline: SendPipeline,
    state: RwLock<BridgeState>,
    settings: RwLock<ConversationSettings>,
    features: RwLock<FeatureFlags>,
}

impl std::fmt::Debug for ChatBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatBridge")
            .field("state", &self.get_state())
            .field("router", &self.router.is_some())
            .finish()
    }
}

impl ChatBridge {
    pub fn builder(session_id: impl Into<String>) -> ChatBridgeBuilder {
        ChatBridgeBuilder::new(session_id)
    }

    pub fn session_id(&self) -> &str {
        self.manager.session_id()
    }

    pub fn manager(&self) -> &MessageManager {
        &self.manager
    }

    pub fn router(&self) -> Option<&Arc<ModelRouter>> {
        self.router.as_ref()
    }

    // ========== Messages ==========

    /// Validate, deliver and (with auto-reply) answer a user message
    ///
    /// Validation runs before any I/O, so a rejected message never reaches
    /// the rate limiter or the store.
    pub async fn send_message(&self, content: &str) -> Result<SendReport, BridgeError> {
        let outgoing = {
            let state = self.get_state();
            let features = self.features();
            let ctx = SendContext {
                features: &features,
                state: &state,
            };
            self.pipeline
                .process(OutgoingMessage::new(content, state.mode), &ctx)?
        };

        let outcome = self
            .manager
            .send_message(&outgoing.content, outgoing.message_type)
            .await?;

        let mut report = SendReport {
            outcome,
            reply: None,
            envelope: None,
        };

        if !self.should_reply(&report.outcome) {
            return Ok(report);
        }
        if let Some(router) = &self.router {
            let (reply, envelope) = self.generate_reply(router, &outgoing).await?;
            report.reply = Some(reply);
            report.envelope = Some(envelope);
        }
        Ok(report)
    }

    fn should_reply(&self, outcome: &SendOutcome) -> bool {
        // Queued means offline; there is nobody to ask
        !matches!(outcome, SendOutcome::Queued(_)) && self.is_feature_enabled(Feature::AutoReply)
    }

    async fn generate_reply(
        &self,
        router: &ModelRouter,
        outgoing: &OutgoingMessage,
    ) -> Result<(Message, ResponseEnvelope), BridgeError> {
        let trace_id = uuid::Uuid::new_v4().to_string();
        let task_type = outgoing.mode.task_type();
        let options = self.completion_options(task_type, &trace_id);

        self.events.emit(ChatEvent::CompletionStarted {
            trace_id: trace_id.clone(),
            task_type,
        });
        self.patch_state(|s| s.is_generating = true);
        let result = router.generate_completion(&outgoing.content, &options).await;
        self.patch_state(|s| s.is_generating = false);

        let completion = match result {
            Ok(completion) => completion,
            Err(e) => {
                self.events.emit(ChatEvent::CompletionFailed {
                    trace_id,
                    error: e.to_string(),
                });
                let hint = if e.is_retryable() {
                    "; try again later"
                } else {
                    ""
                };
                self.events
                    .emit(ChatEvent::error(format!("No model could answer: {e}{hint}")));
                return Err(e.into());
            }
        };

        self.events.emit(ChatEvent::CompletionFinished {
            trace_id,
            model: completion.envelope.model.clone(),
            provider: completion.envelope.provider.clone(),
            fallbacks_used: completion.envelope.fallbacks_used,
            cached: completion.envelope.cached,
        });

        let outcome = self
            .manager
            .record_message(
                MessageRole::Assistant,
                &completion.content,
                outgoing.message_type,
            )
            .await?;
        Ok((outcome.message().clone(), completion.envelope))
    }

    fn completion_options(&self, task_type: TaskType, trace_id: &str) -> CompletionOptions {
        let settings = self.get_settings();
        let mut options = CompletionOptions::for_task(task_type)
            .with_session(self.session_id())
            .with_trace_id(trace_id);
        options.model = settings.model;
        options.provider = self.get_provider();
        options.temperature = Some(settings.temperature);
        options.max_tokens = Some(settings.max_tokens);
        options.system_prompt = settings.system_prompt;
        options
    }

    /// Local list, oldest first
    pub fn get_messages(&self) -> Vec<Message> {
        self.manager.messages()
    }

    /// Reload from the store, or the offline cache when the store fails
    pub async fn load_history(&self) -> Vec<Message> {
        self.manager.load_history().await
    }

    pub async fn clear_messages(&self) -> Result<usize, BridgeError> {
        Ok(self.manager.clear().await?)
    }

    pub async fn delete_message(&self, id: &str) -> Result<(), BridgeError> {
        Ok(self.manager.delete_message(id).await?)
    }

    /// Retry a failed message with a fresh budget
    pub async fn retry_message(&self, id: &str) -> Result<SendOutcome, BridgeError> {
        Ok(self.manager.retry_message(id).await?)
    }

    // ========== State ==========

    pub fn get_state(&self) -> BridgeState {
        let mut state = self
            .state
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|_| BridgeState::new(self.session_id()));
        state.online = self.manager.is_online();
        state
    }

    /// Apply a patch to the UI-owned fields and broadcast the new state
    pub fn set_state(&self, patch: StatePatch) -> BridgeState {
        self.patch_state(|state| {
            if let Some(title) = patch.title {
                state.title = title;
            }
            if let Some(generating) = patch.is_generating {
                state.is_generating = generating;
            }
        })
    }

    fn patch_state(&self, f: impl FnOnce(&mut BridgeState)) -> BridgeState {
        if let Ok(mut state) = self.state.write() {
            f(&mut state);
        }
        let snapshot = self.get_state();
        self.events.emit(ChatEvent::StateChanged(snapshot.clone()));
        snapshot
    }

    pub fn get_current_mode(&self) -> ChatMode {
        self.get_state().mode
    }

    /// Switch mode, returning the previous one
    ///
    /// Switching is always allowed; a disabled feature only blocks sends.
    pub fn set_mode(&self, mode: ChatMode) -> ChatMode {
        let previous = match self.state.write() {
            Ok(mut state) => std::mem::replace(&mut state.mode, mode),
            Err(_) => return mode,
        };
        if previous != mode {
            tracing::info!(session_id = %self.session_id(), from = %previous, to = %mode, "Mode changed");
            self.events.emit(ChatEvent::ModeChanged {
                from: previous,
                to: mode,
            });
        }
        previous
    }

    pub fn get_settings(&self) -> ConversationSettings {
        self.settings
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Apply a settings patch; a model override must resolve to a provider
    pub fn update_settings(&self, patch: SettingsPatch) -> Result<ConversationSettings, BridgeError> {
        if let (Some(Some(model)), Some(router)) = (&patch.model, &self.router) {
            if router.chains().provider_for(model).is_none() {
                return Err(BridgeError::UnknownModel(model.clone()));
            }
        }
        let updated = match self.settings.write() {
            Ok(mut settings) => {
                settings.apply(patch);
                settings.clone()
            }
            Err(_) => return Ok(self.get_settings()),
        };
        self.events.emit(ChatEvent::SettingsUpdated(updated.clone()));
        Ok(updated)
    }

    pub fn get_provider(&self) -> Option<String> {
        self.state.read().ok().and_then(|s| s.provider.clone())
    }

    /// Prefer a provider; `None` follows the chains as configured
    pub fn set_provider(&self, provider: Option<&str>) -> Result<(), BridgeError> {
        if let (Some(name), Some(router)) = (provider, &self.router) {
            if !router.registry().contains(name) {
                return Err(BridgeError::UnknownProvider(name.to_string()));
            }
        }
        let provider = provider.map(str::to_string);
        if let Ok(mut state) = self.state.write() {
            state.provider = provider.clone();
        }
        self.events.emit(ChatEvent::ProviderChanged { provider });
        Ok(())
    }

    // ========== Features ==========

    pub fn features(&self) -> FeatureFlags {
        self.features
            .read()
            .map(|f| f.clone())
            .unwrap_or_default()
    }

    pub fn is_feature_enabled(&self, feature: Feature) -> bool {
        self.features().is_enabled(feature)
    }

    pub fn set_feature(&self, feature: Feature, enabled: bool) {
        if let Ok(mut flags) = self.features.write() {
            flags.set(feature, enabled);
        }
        self.events
            .emit(ChatEvent::FeatureToggled { feature, enabled });
    }

    /// Flip a feature, returning its new value
    pub fn toggle_feature(&self, feature: Feature) -> bool {
        let enabled = !self.is_feature_enabled(feature);
        self.set_feature(feature, enabled);
        enabled
    }

    // ========== Connectivity ==========

    /// Going back online replays the offline queue
    pub async fn set_online(&self, online: bool) -> Option<FlushReport> {
        let report = self.manager.set_online(online).await;
        if let Ok(mut state) = self.state.write() {
            state.online = online;
        }
        report
    }

    // ========== Events ==========

    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ChatEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, handler)
    }

    pub fn on_any<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChatEvent) + Send + Sync + 'static,
    {
        self.events.on_any(handler)
    }

    pub fn off(&self, subscription: Subscription) {
        self.events.off(subscription)
    }

    pub fn emit(&self, event: ChatEvent) {
        self.events.emit(event)
    }

    /// Broadcast an application-defined event
    pub fn emit_custom(&self, name: impl Into<String>, payload: serde_json::Value) {
        self.events.emit(ChatEvent::Custom {
            name: name.into(),
            payload,
        })
    }

    /// Every event from now on, for async consumers
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ChatEvent> {
        self.events.subscribe_channel()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // ========== Lifecycle ==========

    /// Cancel pending retries and timers; the bridge accepts no more retries
    pub fn shutdown(&self) {
        self.manager.shutdown();
        self.events.emit(ChatEvent::ConversationEnded {
            session_id: self.session_id().to_string(),
        });
    }
}

/// Builder for [`ChatBridge`]
pub struct ChatBridgeBuilder {
    session_id: String,
    store: Option<Arc<dyn MessageStore>>,
    storage: Option<Arc<LocalStorage>>,
    router: Option<Arc<ModelRouter>>,
    events: EventBus,
    pipeline: SendPipeline,
    chat: ChatSettings,
    retry: RetryConfig,
    features: FeatureFlags,
    settings: ConversationSettings,
    provider: Option<String>,
    mode: ChatMode,
    rate_window: Option<Duration>,
}

impl ChatBridgeBuilder {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            store: None,
            storage: None,
            router: None,
            events: EventBus::new(),
            pipeline: SendPipeline::standard(),
            chat: ChatSettings::default(),
            retry: RetryConfig::default(),
            features: FeatureFlags::default(),
            settings: ConversationSettings::default(),
            provider: None,
            mode: ChatMode::default(),
            rate_window: Some(RATE_LIMIT_WINDOW),
        }
    }

    pub fn store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn storage(mut self, storage: Arc<LocalStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn router(mut self, router: Arc<ModelRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// Share an existing bus (several bridges, one UI)
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn pipeline(mut self, pipeline: SendPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn chat_settings(mut self, chat: ChatSettings) -> Self {
        self.chat = chat;
        self
    }

    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    pub fn settings(mut self, settings: ConversationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn provider(mut self, provider: Option<String>) -> Self {
        self.provider = provider;
        self
    }

    pub fn mode(mut self, mode: ChatMode) -> Self {
        self.mode = mode;
        self
    }

    /// Rate window length; `None` leaves the counter to manual resets
    pub fn rate_window(mut self, window: Option<Duration>) -> Self {
        self.rate_window = window;
        self
    }

    /// Override chat and retry settings with the user's stored rows
    ///
    /// Read once here; later changes to the rows do not affect this bridge.
    pub fn user_settings(
        mut self,
        store: &dyn SettingsStore,
        user_id: &str,
    ) -> Result<Self, StorageError> {
        if let Some(chat) = store.load_chat_settings(user_id)? {
            self.chat = chat;
        }
        if let Some(retry) = store.load_retry_config(user_id)? {
            self.retry = retry;
        }
        Ok(self)
    }

    /// Build the bridge; must run inside a Tokio runtime when a rate window is set
    pub fn build(self) -> ChatBridge {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryMessageStore::new()));
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(LocalStorage::in_memory()));

        let manager = MessageManager::new(
            self.session_id.clone(),
            store,
            storage,
            self.events.clone(),
            self.chat,
            self.retry,
        );
        if let Some(window) = self.rate_window {
            manager.start_rate_window(window);
        }

        let mut state = BridgeState::new(self.session_id.clone());
        state.mode = self.mode;
        state.provider = self.provider;

        self.events.emit(ChatEvent::ConversationStarted {
            session_id: self.session_id,
        });

        ChatBridge {
            manager,
            router: self.router,
            events: self.events,
            pipeline: self.pipeline,
            state: RwLock::new(state),
            settings: RwLock::new(self.settings),
            features: RwLock::new(self.features),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FallbackChains, ProviderRegistry, SimProvider};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sim_router(sim: SimProvider) -> Arc<ModelRouter> {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(sim));
        Arc::new(ModelRouter::new(FallbackChains::defaults(), registry))
    }

    #[tokio::test]
    async fn test_send_without_router_only_delivers() {
        let bridge = ChatBridge::builder("s1").build();
        let report = bridge.send_message("hello").await.unwrap();
        assert!(matches!(report.outcome, SendOutcome::Sent(_)));
        assert!(report.reply.is_none());
        assert_eq!(bridge.get_messages().len(), 1);
    }

    #[tokio::test]
    async fn test_send_records_reply() {
        let bridge = ChatBridge::builder("s1")
            .router(sim_router(SimProvider::new("openai")))
            .build();

        let report = bridge.send_message("  hi there ").await.unwrap();
        assert_eq!(report.message().content, "hi there");
        let reply = report.reply.unwrap();
        assert_eq!(reply.role, MessageRole::Assistant);
        assert_eq!(reply.content, "[gpt-4o] hi there");
        assert_eq!(report.envelope.unwrap().session_id, "s1");

        let messages = bridge.get_messages();
        assert_eq!(messages.len(), 2);
        assert!(!bridge.get_state().is_generating);
    }

    #[tokio::test]
    async fn test_disabled_feature_rejects_before_io() {
        let store = Arc::new(MemoryMessageStore::new());
        let bridge = ChatBridge::builder("s1").store(store.clone()).build();
        bridge.set_mode(ChatMode::Image);

        let err = bridge.send_message("a cat").await.unwrap_err();
        assert!(matches!(err, BridgeError::FeatureDisabled { .. }));
        assert_eq!(store.insert_calls(), 0);
        assert!(bridge.get_messages().is_empty());
        assert_eq!(bridge.manager().rate_limiter().message_count(), 0);
    }

    #[tokio::test]
    async fn test_mode_change_emits_once() {
        let bridge = ChatBridge::builder("s1").build();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let _sub = bridge.on(EventKind::ModeChanged, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bridge.set_mode(ChatMode::Code), ChatMode::Chat);
        bridge.set_mode(ChatMode::Code);
        assert_eq!(bridge.get_current_mode(), ChatMode::Code);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_settings_and_provider_validation() {
        let bridge = ChatBridge::builder("s1")
            .router(sim_router(SimProvider::new("openai")))
            .build();

        let err = bridge
            .update_settings(SettingsPatch {
                model: Some(Some("mystery".into())),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnknownModel(_)));

        let settings = bridge
            .update_settings(SettingsPatch {
                model: Some(Some("gpt-4o-mini".into())),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(settings.model.as_deref(), Some("gpt-4o-mini"));

        assert!(matches!(
            bridge.set_provider(Some("anthropic")),
            Err(BridgeError::UnknownProvider(_))
        ));
        bridge.set_provider(Some("openai")).unwrap();
        assert_eq!(bridge.get_provider().as_deref(), Some("openai"));
    }

    #[tokio::test]
    async fn test_toggle_feature() {
        let bridge = ChatBridge::builder("s1").build();
        assert!(!bridge.is_feature_enabled(Feature::ImageGeneration));
        assert!(bridge.toggle_feature(Feature::ImageGeneration));
        assert!(bridge.is_feature_enabled(Feature::ImageGeneration));
    }

    #[tokio::test]
    async fn test_offline_send_is_queued_without_reply() {
        let sim = Arc::new(SimProvider::new("openai"));
        let mut registry = ProviderRegistry::new();
        registry.register(sim.clone());
        let router = Arc::new(ModelRouter::new(FallbackChains::defaults(), registry));
        let bridge = ChatBridge::builder("s1").router(router).build();

        bridge.set_online(false).await;
        let report = bridge.send_message("later").await.unwrap();
        assert!(matches!(report.outcome, SendOutcome::Queued(_)));
        assert!(report.reply.is_none());
        assert_eq!(sim.call_count(), 0);
        assert!(!bridge.get_state().online);

        let flushed = bridge.set_online(true).await.unwrap();
        assert_eq!(flushed.sent, 1);
    }

    #[tokio::test]
    async fn test_set_state_patches_title() {
        let bridge = ChatBridge::builder("s1").build();
        let state = bridge.set_state(StatePatch {
            title: Some(Some("Planning".into())),
            ..Default::default()
        });
        assert_eq!(state.title.as_deref(), Some("Planning"));
        assert_eq!(bridge.get_state().title.as_deref(), Some("Planning"));
    }
}
