//! Public handle to the sync coordinator.
//!
//! [`ParleyClient`] is cheap to clone; every clone talks to the same
//! coordinator task. Calls that change state are queued and applied in
//! order, so a send issued during a resync never interleaves with the
//! merge.

use std::sync::Arc;
use std::time::Duration;

use parley_core::{Calendar, ConfigState, Snapshot};
use parley_types::{DeviceId, LocalId, LocalMedia, Message, PushEnvelope, RemotePayload};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::debug;

use crate::actor::{Actor, ActorParts, Command};
use crate::api::ParleyApi;
use crate::config::ParleyConfig;
use crate::error::ParleyError;
use crate::events::ParleyEvent;
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::storage::{KeyValueStore, MemoryKeyValueStore, MemoryMessageStore, MessageStore};
use crate::store::ConversationStore;
use crate::transport::Transport;

/// Buffered events per subscriber before the oldest are dropped.
pub const EVENT_CAPACITY: usize = 256;

/// Builder for [`ParleyClient`].
pub struct ParleyClientBuilder {
    config: ParleyConfig,
    transport: Arc<dyn Transport>,
    kv: Option<Arc<dyn KeyValueStore>>,
    messages: Option<Arc<dyn MessageStore>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    reachability: Option<watch::Receiver<bool>>,
    calendar: Option<Calendar>,
}

impl std::fmt::Debug for ParleyClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParleyClientBuilder")
            .field("config", &self.config)
            .field("calendar", &self.calendar)
            .finish_non_exhaustive()
    }
}

impl ParleyClientBuilder {
    /// Use a key-value store (default: in memory).
    pub fn with_key_value_store(mut self, kv: Arc<dyn KeyValueStore>) -> Self {
        self.kv = Some(kv);
        self
    }

    /// Use a message store (default: in memory).
    pub fn with_message_store(mut self, messages: Arc<dyn MessageStore>) -> Self {
        self.messages = Some(messages);
        self
    }

    /// Use a scheduler for typing and polling timers (default: tokio).
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Follow a reachability signal (default: always reachable).
    pub fn with_reachability(mut self, reachability: watch::Receiver<bool>) -> Self {
        self.reachability = Some(reachability);
        self
    }

    /// Bucket messages into days with a fixed calendar instead of the
    /// local time zone.
    pub fn with_calendar(mut self, calendar: Calendar) -> Self {
        self.calendar = Some(calendar);
        self
    }

    /// Start the coordinator. Must be called within a tokio runtime.
    pub fn build(self) -> ParleyClient {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let kv = self
            .kv
            .unwrap_or_else(|| Arc::new(MemoryKeyValueStore::new()));
        let messages = self
            .messages
            .unwrap_or_else(|| Arc::new(MemoryMessageStore::new()));
        let reachable = self.reachability.as_ref().map_or(true, |rx| *rx.borrow());

        let actor = Actor::new(ActorParts {
            api: ParleyApi::new(self.transport, &self.config.network),
            config: self.config,
            store: ConversationStore::new(kv, messages),
            scheduler: self
                .scheduler
                .unwrap_or_else(|| Arc::new(TokioScheduler)),
            events: events.clone(),
            commands: commands.downgrade(),
            calendar: self.calendar,
            reachable,
        });
        tokio::spawn(actor.run(receiver));

        if let Some(mut reachability) = self.reachability {
            let weak = commands.downgrade();
            tokio::spawn(async move {
                while reachability.changed().await.is_ok() {
                    let reachable = *reachability.borrow_and_update();
                    let Some(commands) = weak.upgrade() else {
                        break;
                    };
                    if commands.send(Command::Reachability(reachable)).is_err() {
                        break;
                    }
                }
                debug!("Reachability forwarder stopped");
            });
        }

        ParleyClient { commands, events }
    }
}

/// Handle to a running sync coordinator.
#[derive(Clone)]
pub struct ParleyClient {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ParleyEvent>,
}

impl std::fmt::Debug for ParleyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParleyClient")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl ParleyClient {
    /// Start building a client.
    pub fn builder(config: ParleyConfig, transport: Arc<dyn Transport>) -> ParleyClientBuilder {
        ParleyClientBuilder {
            config,
            transport,
            kv: None,
            messages: None,
            scheduler: None,
            reachability: None,
            calendar: None,
        }
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ParleyError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| ParleyError::Shutdown)?;
        rx.await.map_err(|_| ParleyError::Shutdown)
    }

    fn post(&self, command: Command) -> Result<(), ParleyError> {
        self.commands
            .send(command)
            .map_err(|_| ParleyError::Shutdown)
    }

    /// Configure the session.
    ///
    /// With the offline cache enabled this returns as soon as the cache is
    /// loaded and the resync continues in the background. Otherwise it
    /// waits for device registration and the resync.
    ///
    /// # Errors
    ///
    /// [`ParleyError::Busy`] if a configure is already in flight,
    /// [`ParleyError::Offline`] or [`ParleyError::Configuration`] if the
    /// resync failed.
    pub async fn configure(
        &self,
        secret: &str,
        device_id: Option<DeviceId>,
    ) -> Result<(), ParleyError> {
        self.call(|respond_to| Command::Configure {
            secret: secret.to_string(),
            device_id,
            respond_to,
        })
        .await?
    }

    /// Send a text message. Returns its local id as soon as it is queued.
    pub async fn send_text(&self, text: &str) -> Result<LocalId, ParleyError> {
        self.send(Message::user_text(text)).await
    }

    /// Send a media message; the media is uploaded first.
    pub async fn send_media(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        file_name: &str,
    ) -> Result<LocalId, ParleyError> {
        self.send(Message::user_media(LocalMedia {
            bytes,
            mime_type: mime_type.to_string(),
            file_name: file_name.to_string(),
        }))
        .await
    }

    /// Send a prepared user message.
    pub async fn send(&self, message: Message) -> Result<LocalId, ParleyError> {
        self.call(|respond_to| Command::Send {
            message,
            respond_to,
        })
        .await?
    }

    /// Retry a failed message.
    pub async fn resend(&self, local_id: LocalId) -> Result<(), ParleyError> {
        self.call(|respond_to| Command::Resend {
            local_id,
            respond_to,
        })
        .await?
    }

    /// Fetch the next older page. Returns how many messages were added.
    pub async fn load_more(&self) -> Result<usize, ParleyError> {
        self.call(|respond_to| Command::LoadMore { respond_to }).await?
    }

    /// Report a keystroke of the local user.
    pub fn user_typing(&self) -> Result<(), ParleyError> {
        self.post(Command::UserTyping)
    }

    /// Handle a push payload (`{ "parley": { ... } }`).
    pub fn handle_push(&self, payload: &[u8]) -> Result<(), ParleyError> {
        let envelope = PushEnvelope::from_json(payload)?;
        self.handle_remote(envelope.parley)
    }

    /// Handle an already decoded remote payload.
    pub fn handle_remote(&self, payload: RemotePayload) -> Result<(), ParleyError> {
        self.post(Command::HandleRemote(payload))
    }

    /// Set the user authorization token.
    pub fn set_user_information(&self, authorization: &str) -> Result<(), ParleyError> {
        self.post(Command::SetUserInformation(Some(authorization.to_string())))
    }

    /// Remove the user authorization token.
    pub fn clear_user_information(&self) -> Result<(), ParleyError> {
        self.post(Command::SetUserInformation(None))
    }

    /// Register a push token of the given provider (e.g. `fcm`).
    pub fn set_push_token(&self, token: &str, kind: &str) -> Result<(), ParleyError> {
        self.post(Command::SetPushToken {
            token: token.to_string(),
            kind: kind.to_string(),
        })
    }

    /// Tell the remote side whether push delivery works. Polling runs
    /// while it does not.
    pub fn set_push_enabled(&self, enabled: bool) -> Result<(), ParleyError> {
        self.post(Command::SetPushEnabled(enabled))
    }

    /// Page the user is on; attached to outgoing messages.
    pub fn set_referrer(&self, referrer: Option<&str>) -> Result<(), ParleyError> {
        self.post(Command::SetReferrer(referrer.map(str::to_string)))
    }

    /// Pause polling in the background, resume it in the foreground.
    pub fn set_foreground(&self, foreground: bool) -> Result<(), ParleyError> {
        self.post(Command::SetForeground(foreground))
    }

    /// Feed a reachability change directly.
    pub fn set_reachable(&self, reachable: bool) -> Result<(), ParleyError> {
        self.post(Command::Reachability(reachable))
    }

    /// The current display snapshot.
    pub async fn snapshot(&self) -> Result<Snapshot, ParleyError> {
        self.call(Command::Snapshot).await
    }

    /// Every held message, in conversation order.
    pub async fn messages(&self) -> Result<Vec<Message>, ParleyError> {
        self.call(Command::Messages).await
    }

    /// Pending and failed messages in time order.
    pub async fn pending_messages(&self) -> Result<Vec<Message>, ParleyError> {
        self.call(Command::PendingMessages).await
    }

    /// Current configuration state.
    pub async fn state(&self) -> Result<ConfigState, ParleyError> {
        self.call(Command::State).await
    }

    /// Current polling delay.
    pub async fn polling_interval(&self) -> Result<Duration, ParleyError> {
        self.call(Command::PollingInterval).await
    }

    /// Subscribe to coordinator events.
    pub fn subscribe(&self) -> broadcast::Receiver<ParleyEvent> {
        self.events.subscribe()
    }

    /// Cancel in-flight work and forget the conversation, keeping the
    /// session settings.
    pub async fn purge_local_memory(&self) -> Result<(), ParleyError> {
        self.call(Command::Purge).await
    }

    /// Cancel in-flight work and forget everything, session included.
    pub async fn reset(&self) -> Result<(), ParleyError> {
        self.call(Command::Reset).await
    }

    /// Wait until no network work is in flight.
    pub async fn settle(&self) -> Result<(), ParleyError> {
        while self.call(Command::Idle).await? > 0 {
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}
