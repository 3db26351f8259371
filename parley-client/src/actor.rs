//! The sync coordinator.
//!
//! A single task owns the conversation, the display snapshot and the
//! configuration machine. [`crate::ParleyClient`] handles talk to it through
//! an unbounded command queue. Network calls run in spawned tasks that
//! post a completion back into the same queue, so every mutation happens
//! on this task in arrival order.
//!
//! Completions and timers carry the epoch they were started in. Reset and
//! purge bump the epoch, which turns anything still in flight into a
//! stale result that is dropped on arrival.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parley_core::{
    Action, AgentTyping, Calendar, Change, ConfigEvent, ConfigMachine, ConfigState, Conversation,
    MergeMode, PollingBackoff, Snapshot, StoreOp, UserTyping,
};
use parley_types::{
    DeviceId, EventName, LocalId, Media, Message, MessageCollection, MessageKind, RemoteId,
    RemotePayload, SendStatus,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{DeviceRegistration, ParleyApi, UserEvent, SDK_VERSION};
use crate::config::ParleyConfig;
use crate::error::{ApiError, ParleyError};
use crate::events::ParleyEvent;
use crate::scheduler::{Scheduler, TimerHandle};
use crate::store::ConversationStore;

/// Reply channel of a command.
pub(crate) type Reply<T> = oneshot::Sender<T>;

/// Commands accepted by the coordinator.
pub(crate) enum Command {
    Configure {
        secret: String,
        device_id: Option<DeviceId>,
        respond_to: Reply<Result<(), ParleyError>>,
    },
    Send {
        message: Message,
        respond_to: Reply<Result<LocalId, ParleyError>>,
    },
    Resend {
        local_id: LocalId,
        respond_to: Reply<Result<(), ParleyError>>,
    },
    LoadMore {
        respond_to: Reply<Result<usize, ParleyError>>,
    },
    UserTyping,
    HandleRemote(RemotePayload),
    SetUserInformation(Option<String>),
    SetPushToken {
        token: String,
        kind: String,
    },
    SetPushEnabled(bool),
    SetReferrer(Option<String>),
    SetForeground(bool),
    Reachability(bool),

    Snapshot(Reply<Snapshot>),
    Messages(Reply<Vec<Message>>),
    PendingMessages(Reply<Vec<Message>>),
    State(Reply<ConfigState>),
    PollingInterval(Reply<Duration>),
    Idle(Reply<usize>),

    Purge(Reply<()>),
    Reset(Reply<()>),

    Completed {
        epoch: u64,
        completion: Completion,
    },
    Timer {
        epoch: u64,
        timer: Timer,
    },
}

/// Results of spawned network work.
pub(crate) enum Completion {
    Resynced(Result<(MessageCollection, MergeMode), ApiError>),
    MediaUploaded {
        local_id: LocalId,
        result: Result<String, ApiError>,
    },
    Stored {
        local_id: LocalId,
        result: Result<RemoteId, ApiError>,
    },
    RemoteFetched {
        fallback: Message,
        result: Result<Message, ApiError>,
    },
    LoadedMore(Result<MessageCollection, ApiError>),
    Polled {
        mode: MergeMode,
        result: Result<MessageCollection, ApiError>,
    },
    Done,
}

/// Timers armed on the scheduler.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Timer {
    UserTypingStop(u64),
    AgentTypingTimeout(u64),
    Poll(u64),
}

struct Session {
    secret: String,
    device_id: DeviceId,
    api: ParleyApi,
}

/// Coordinator state. Only [`Actor::run`] touches it.
pub(crate) struct Actor {
    config: ParleyConfig,
    api: ParleyApi,
    store: ConversationStore,
    scheduler: Arc<dyn Scheduler>,
    events: broadcast::Sender<ParleyEvent>,
    commands: mpsc::WeakUnboundedSender<Command>,
    calendar: Option<Calendar>,

    machine: ConfigMachine,
    session: Option<Session>,
    conversation: Conversation,
    snapshot: Snapshot,
    reachable: bool,

    // Work in flight
    epoch: u64,
    outstanding: usize,
    tasks: Vec<JoinHandle<()>>,
    sending: HashSet<LocalId>,
    configure_waiters: Vec<Reply<Result<(), ParleyError>>>,
    load_more_waiter: Option<Reply<Result<usize, ParleyError>>>,

    // Typing
    user_typing: UserTyping,
    user_typing_timer: Option<TimerHandle>,
    agent_typing: AgentTyping,
    agent_typing_timer: Option<TimerHandle>,

    // Polling
    backoff: PollingBackoff,
    poll_timer: Option<TimerHandle>,
    poll_generation: u64,
    poll_in_flight: bool,
    foreground: bool,

    // Registration details
    push_token: Option<(String, String)>,
    push_enabled: bool,
    referrer: Option<String>,
}

/// Everything the coordinator is built from.
pub(crate) struct ActorParts {
    pub config: ParleyConfig,
    pub api: ParleyApi,
    pub store: ConversationStore,
    pub scheduler: Arc<dyn Scheduler>,
    pub events: broadcast::Sender<ParleyEvent>,
    pub commands: mpsc::WeakUnboundedSender<Command>,
    pub calendar: Option<Calendar>,
    pub reachable: bool,
}

impl Actor {
    pub(crate) fn new(parts: ActorParts) -> Self {
        let config = parts.config;
        let calendar = parts.calendar;
        let snapshot = Snapshot::new(
            calendar.unwrap_or_else(Calendar::local),
            config.adaptive_welcome,
        );
        Self {
            user_typing: UserTyping::new(config.typing.start_interval(), config.typing.stop_after()),
            agent_typing: AgentTyping::new(config.typing.agent_timeout()),
            backoff: PollingBackoff::new(
                config.polling.intervals(),
                config.polling.repeats_before_escalation,
            ),
            config,
            api: parts.api,
            store: parts.store,
            scheduler: parts.scheduler,
            events: parts.events,
            commands: parts.commands,
            calendar,
            machine: ConfigMachine::new(),
            session: None,
            conversation: Conversation::new(),
            snapshot,
            reachable: parts.reachable,
            epoch: 0,
            outstanding: 0,
            tasks: Vec::new(),
            sending: HashSet::new(),
            configure_waiters: Vec::new(),
            load_more_waiter: None,
            user_typing_timer: None,
            agent_typing_timer: None,
            poll_timer: None,
            poll_generation: 0,
            poll_in_flight: false,
            foreground: true,
            push_token: None,
            push_enabled: false,
            referrer: None,
        }
    }

    /// Process commands until every client handle is dropped.
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!("Parley coordinator started");
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }
        self.cancel_in_flight();
        info!("Parley coordinator stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Configure {
                secret,
                device_id,
                respond_to,
            } => self.configure(secret, device_id, respond_to),
            Command::Send {
                message,
                respond_to,
            } => {
                let _ = respond_to.send(self.send(message));
            }
            Command::Resend {
                local_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.resend(local_id));
            }
            Command::LoadMore { respond_to } => self.load_more(respond_to),
            Command::UserTyping => self.user_typing(),
            Command::HandleRemote(payload) => self.handle_remote(payload),
            Command::SetUserInformation(authorization) => self.set_user_information(authorization),
            Command::SetPushToken { token, kind } => {
                self.push_token = Some((token, kind));
                self.register_in_background();
            }
            Command::SetPushEnabled(enabled) => {
                if self.push_enabled != enabled {
                    self.push_enabled = enabled;
                    self.register_in_background();
                    self.update_polling();
                }
            }
            Command::SetReferrer(referrer) => self.referrer = referrer,
            Command::SetForeground(foreground) => self.set_foreground(foreground),
            Command::Reachability(reachable) => self.reachability_changed(reachable),

            Command::Snapshot(respond_to) => {
                let _ = respond_to.send(self.snapshot.clone());
            }
            Command::Messages(respond_to) => {
                let _ = respond_to.send(self.conversation.messages().to_vec());
            }
            Command::PendingMessages(respond_to) => {
                let _ = respond_to.send(self.conversation.pending_messages());
            }
            Command::State(respond_to) => {
                let _ = respond_to.send(self.machine.state());
            }
            Command::PollingInterval(respond_to) => {
                let _ = respond_to.send(self.backoff.interval());
            }
            Command::Idle(respond_to) => {
                let _ = respond_to.send(self.outstanding);
            }

            Command::Purge(respond_to) => {
                self.purge(false);
                let _ = respond_to.send(());
            }
            Command::Reset(respond_to) => {
                self.purge(true);
                let _ = respond_to.send(());
            }

            Command::Completed { epoch, completion } => {
                if epoch != self.epoch {
                    debug!(epoch, current = self.epoch, "Dropping stale completion");
                    return;
                }
                self.outstanding = self.outstanding.saturating_sub(1);
                self.completed(completion);
            }
            Command::Timer { epoch, timer } => {
                if epoch != self.epoch {
                    return;
                }
                self.timer_fired(timer);
            }
        }
    }

    // ===========================================
    // Configuration
    // ===========================================

    fn configure(
        &mut self,
        secret: String,
        device_id: Option<DeviceId>,
        respond_to: Reply<Result<(), ParleyError>>,
    ) {
        if self.machine.is_in_flight() {
            debug!("Rejecting configure while another is in flight");
            let _ = respond_to.send(Err(ParleyError::Busy));
            return;
        }

        let cached_secret = match self.store.secret() {
            Ok(secret) => secret,
            Err(e) => {
                warn!("Failed to read cached secret: {}", e);
                None
            }
        };
        let clear_cache = cached_secret.is_some_and(|cached| cached != secret);

        let device_id = match device_id {
            Some(id) => id,
            None => self.cached_device_id().unwrap_or_else(DeviceId::random),
        };
        if let Err(e) = self.store.set_secret(&secret) {
            warn!("Failed to cache secret: {}", e);
        }
        if let Err(e) = self.store.set_device_id(&device_id) {
            warn!("Failed to cache device id: {}", e);
        }

        self.session = Some(self.open_session(secret, device_id));
        self.begin_configure(clear_cache, Some(respond_to));
    }

    fn cached_device_id(&self) -> Option<DeviceId> {
        match self.store.device_id() {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to read cached device id: {}", e);
                None
            }
        }
    }

    fn open_session(&self, secret: String, device_id: DeviceId) -> Session {
        let authorization = match self.store.authorization() {
            Ok(authorization) => authorization,
            Err(e) => {
                warn!("Failed to read user authorization: {}", e);
                None
            }
        };
        let api = self
            .api
            .clone()
            .with_session(&secret, &device_id, authorization.as_deref());
        Session {
            secret,
            device_id,
            api,
        }
    }

    fn begin_configure(
        &mut self,
        clear_cache: bool,
        respond_to: Option<Reply<Result<(), ParleyError>>>,
    ) {
        let (machine, actions) = self.machine.on_event(ConfigEvent::ConfigureRequested {
            offline_cache: self.config.offline_messaging,
            clear_cache,
        });
        self.machine = machine;

        if actions.contains(&Action::RejectBusy) {
            if let Some(respond_to) = respond_to {
                let _ = respond_to.send(Err(ParleyError::Busy));
            }
            return;
        }

        info!(clear_cache, "Configuring");
        self.execute(actions);

        if let Some(respond_to) = respond_to {
            // Optimistic: a loaded cache is usable before the resync lands
            if self.machine.is_configured() {
                let _ = respond_to.send(Ok(()));
            } else {
                self.configure_waiters.push(respond_to);
            }
        }
    }

    fn reconfigure(&mut self, clear_cache: bool) {
        let Some(session) = self.session.take() else {
            return;
        };
        let session = self.open_session(session.secret, session.device_id);
        self.session = Some(session);
        self.begin_configure(clear_cache, None);
    }

    fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::RejectBusy => {}
                Action::ClearCache => {
                    // Another session: nothing held belongs to it, unsent messages included
                    self.conversation.clear();
                    if let Err(e) = self.store.clear_conversation() {
                        warn!("Failed to clear cached conversation: {}", e);
                    }
                }
                Action::LoadCache => {
                    self.conversation = Conversation::restore(self.store.load_cached());
                    self.rebuild_snapshot();
                }
                Action::ClearConversation => self.clear_conversation(),
                Action::RegisterAndResync => self.register_and_resync(),
                Action::FlushPending => self.flush_pending(),
                Action::Reconfigure => self.reconfigure(false),
                Action::CancelInFlight => self.cancel_in_flight(),
                Action::EmitState(state) => {
                    info!(?state, "Configuration state changed");
                    self.emit(ParleyEvent::StateChanged(state));
                }
                Action::EmitError { code, message } => {
                    warn!(code, %message, "Configuration failed");
                    self.emit(ParleyEvent::ConfigurationFailed { code, message });
                }
                Action::EmitReachability(reachable) => {
                    self.emit(ParleyEvent::ReachabilityChanged(reachable));
                }
            }
        }
        self.update_polling();
    }

    /// Drop the conversation, keeping messages the user has not got out yet.
    ///
    /// A cache clear for a new session runs first, so only a reconfigure of
    /// the same session carries unsent messages over.
    fn clear_conversation(&mut self) {
        let unsent = self.conversation.pending_messages();
        self.conversation.clear();
        if let Err(e) = self.store.clear_conversation() {
            warn!("Failed to clear cached conversation: {}", e);
        }
        let ops: Vec<StoreOp> = unsent
            .into_iter()
            .filter_map(|message| self.conversation.add(message))
            .collect();
        self.store.apply(ops);
        self.rebuild_snapshot();
    }

    fn registration(&self) -> DeviceRegistration {
        let mut user_additional_information = BTreeMap::new();
        if let Some(referrer) = &self.referrer {
            user_additional_information.insert("referrer".to_string(), referrer.clone());
        }
        DeviceRegistration {
            push_token: self.push_token.as_ref().map(|(token, _)| token.clone()),
            push_type: self.push_token.as_ref().map(|(_, kind)| kind.clone()),
            push_enabled: self.push_enabled,
            user_additional_information,
            version: SDK_VERSION.to_string(),
        }
    }

    fn register_and_resync(&mut self) {
        let Some(api) = self.session_api() else {
            return;
        };
        let registration = self.registration();
        let anchor = self
            .conversation
            .last_sent_message()
            .and_then(|m| m.remote_id);
        self.spawn(async move { Completion::Resynced(resync(api, registration, anchor).await) });
    }

    fn register_in_background(&mut self) {
        if !self.machine.is_configured() || self.machine.is_in_flight() {
            return;
        }
        let Some(api) = self.session_api() else {
            return;
        };
        let registration = self.registration();
        self.spawn(async move {
            if let Err(e) = api.register_device(&registration).await {
                debug!("Device re-registration failed: {}", e);
            }
            Completion::Done
        });
    }

    fn resynced(&mut self, result: Result<(MessageCollection, MergeMode), ApiError>) {
        let failure = match result {
            Ok((collection, mode)) => {
                let added = self.merge(collection, mode, mode == MergeMode::All);
                info!(added, ?mode, "Resync finished");
                None
            }
            Err(e) => Some(e),
        };
        let event = match &failure {
            None => ConfigEvent::ResyncSucceeded,
            Some(e) => ConfigEvent::ResyncFailed {
                offline: e.is_offline(),
                offline_cache: self.config.offline_messaging,
                code: e.code(),
                message: e
                    .server_message()
                    .map(str::to_string)
                    .unwrap_or_else(|| e.to_string()),
            },
        };
        let (machine, actions) = self.machine.on_event(event);
        self.machine = machine;
        self.execute(actions);

        let outcome = if self.machine.is_configured() {
            Ok(())
        } else {
            Err(failure.map_or(ParleyError::NotConfigured, ParleyError::from))
        };
        for waiter in self.configure_waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
    }

    fn reachability_changed(&mut self, reachable: bool) {
        if self.reachable == reachable {
            return;
        }
        info!(reachable, "Reachability changed");
        self.reachable = reachable;
        let (machine, actions) = self
            .machine
            .on_event(ConfigEvent::ReachabilityChanged { reachable });
        self.machine = machine;
        self.execute(actions);
    }

    fn set_user_information(&mut self, authorization: Option<String>) {
        if let Err(e) = self.store.set_authorization(authorization.as_deref()) {
            warn!("Failed to store user authorization: {}", e);
        }
        if self.machine.state() != ConfigState::Unconfigured {
            // Another user: the cached conversation is not theirs
            self.reconfigure(true);
        }
    }

    fn purge(&mut self, reset: bool) {
        let (machine, actions) = self.machine.on_event(ConfigEvent::ResetRequested);
        self.machine = machine;
        self.execute(actions);

        self.conversation.clear();
        let cleared = if reset {
            self.session = None;
            self.push_token = None;
            self.push_enabled = false;
            self.referrer = None;
            self.store.clear_all()
        } else {
            self.store.clear_conversation()
        };
        if let Err(e) = cleared {
            warn!("Failed to clear local data: {}", e);
        }
        self.backoff.reset();
        self.rebuild_snapshot();
        info!(reset, "Local data cleared");
    }

    fn cancel_in_flight(&mut self) {
        self.epoch += 1;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.outstanding = 0;
        self.sending.clear();
        self.poll_in_flight = false;

        for timer in [
            self.poll_timer.take(),
            self.user_typing_timer.take(),
            self.agent_typing_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            timer.cancel();
        }
        self.user_typing.stop();
        self.agent_typing.stop();

        for waiter in self.configure_waiters.drain(..) {
            let _ = waiter.send(Err(ParleyError::NotConfigured));
        }
        if let Some(waiter) = self.load_more_waiter.take() {
            let _ = waiter.send(Err(ParleyError::NotConfigured));
        }
    }

    // ===========================================
    // Conversation and snapshot
    // ===========================================

    /// Merge a fetched page and publish the result. Returns how many
    /// messages were new.
    ///
    /// With `reload` the snapshot is rebuilt and published whole; otherwise
    /// only the new rows and the welcome text are applied. A merge never
    /// drops held messages, so the incremental path stays exact.
    fn merge(&mut self, collection: MessageCollection, mode: MergeMode, reload: bool) -> usize {
        let outcome = self.conversation.handle(collection, mode);
        self.store.apply(outcome.ops);
        debug!(added = outcome.added.len(), ?mode, "Merged messages");

        if reload {
            self.rebuild_snapshot();
        } else {
            for message in &outcome.added {
                self.apply_snapshot(|snapshot| snapshot.insert(message));
            }
            if outcome.welcome_changed {
                let welcome = self.conversation.welcome_message().map(str::to_string);
                self.apply_snapshot(|snapshot| snapshot.set_welcome(welcome));
            }
        }

        if outcome.welcome_changed {
            let welcome = self.conversation.welcome_message().map(str::to_string);
            self.emit(ParleyEvent::WelcomeMessage(welcome));
        }
        if outcome.sticky_changed {
            let sticky = self.conversation.sticky_message().map(str::to_string);
            self.emit(ParleyEvent::StickyMessage(sticky));
        }
        if outcome.added.iter().any(|m| m.kind == MessageKind::Agent) {
            self.agent_stopped_typing();
        }
        outcome.added.len()
    }

    fn add_message(&mut self, message: &Message) -> bool {
        match self.conversation.add(message.clone()) {
            Some(op) => {
                self.store.apply([op]);
                self.apply_snapshot(|snapshot| snapshot.insert(message));
                true
            }
            None => false,
        }
    }

    fn update_message(&mut self, message: Message) {
        if let Some(op) = self.conversation.update(message.clone()) {
            self.store.apply([op]);
            self.apply_snapshot(|snapshot| snapshot.update(&message));
        }
    }

    fn rebuild_snapshot(&mut self) {
        let calendar = self.calendar.unwrap_or_else(Calendar::local);
        let snapshot = Snapshot::from_messages(
            self.conversation.messages(),
            self.conversation.welcome_message().map(str::to_string),
            calendar,
            self.config.adaptive_welcome,
        );
        let (snapshot, _) = snapshot.set_loading(self.load_more_waiter.is_some());
        let (snapshot, _) = snapshot.set_agent_typing(self.agent_typing.is_typing());
        self.snapshot = snapshot;
        self.emit(ParleyEvent::SnapshotReloaded(self.snapshot.clone()));
    }

    fn apply_snapshot(&mut self, command: impl FnOnce(Snapshot) -> (Snapshot, Option<Change>)) {
        let placeholder = Snapshot::new(self.snapshot.calendar(), self.snapshot.is_adaptive());
        let current = std::mem::replace(&mut self.snapshot, placeholder);
        let (next, change) = command(current);
        self.snapshot = next;
        if let Some(change) = change {
            self.emit(ParleyEvent::SnapshotChanged(change));
        }
    }

    fn load_more(&mut self, respond_to: Reply<Result<usize, ParleyError>>) {
        if !self.machine.is_configured() {
            let _ = respond_to.send(Err(ParleyError::NotConfigured));
            return;
        }
        if self.load_more_waiter.is_some() || !self.conversation.can_load_more() {
            let _ = respond_to.send(Ok(0));
            return;
        }
        let (Some(api), Some(paging)) = (self.session_api(), self.conversation.paging()) else {
            let _ = respond_to.send(Ok(0));
            return;
        };
        let cursor = paging.before.clone();
        debug!(
            anchor = ?self.conversation.oldest_displayable_message().and_then(|m| m.remote_id),
            %cursor,
            "Loading older messages"
        );

        self.load_more_waiter = Some(respond_to);
        self.apply_snapshot(|snapshot| snapshot.set_loading(true));
        self.spawn(async move { Completion::LoadedMore(api.get_messages_before(&cursor).await) });
    }

    fn loaded_more(&mut self, result: Result<MessageCollection, ApiError>) {
        self.apply_snapshot(|snapshot| snapshot.set_loading(false));
        let reply = match result {
            Ok(collection) => Ok(self.merge(collection, MergeMode::Before, false)),
            Err(e) => {
                warn!("Loading older messages failed: {}", e);
                Err(ParleyError::from(e))
            }
        };
        if let Some(waiter) = self.load_more_waiter.take() {
            let _ = waiter.send(reply);
        }
    }

    // ===========================================
    // Send pipeline
    // ===========================================

    fn send(&mut self, mut message: Message) -> Result<LocalId, ParleyError> {
        if self.machine.state() == ConfigState::Unconfigured {
            return Err(ParleyError::NotConfigured);
        }
        if message.referrer.is_none() {
            message.referrer = self.referrer.clone();
        }
        message.send_status = SendStatus::Pending;
        message.failure_reason = None;

        let local_id = message.local_id;
        self.add_message(&message);
        self.dispatch(local_id);
        Ok(local_id)
    }

    fn resend(&mut self, local_id: LocalId) -> Result<(), ParleyError> {
        if self.machine.state() == ConfigState::Unconfigured {
            return Err(ParleyError::NotConfigured);
        }
        let Some(mut message) = self.conversation.by_local_id(&local_id).cloned() else {
            return Ok(());
        };
        if message.send_status != SendStatus::Failed {
            return Ok(());
        }
        message.send_status = SendStatus::Pending;
        message.failure_reason = None;
        self.update_message(message);
        self.dispatch(local_id);
        Ok(())
    }

    fn flush_pending(&mut self) {
        let pending = self.conversation.pending_messages();
        if !pending.is_empty() {
            info!(count = pending.len(), "Flushing pending messages");
        }
        for message in pending {
            self.dispatch(message.local_id);
        }
    }

    /// Push one held message towards the remote side.
    ///
    /// Only runs while configured; unsent messages are flushed once the
    /// next resync lands.
    fn dispatch(&mut self, local_id: LocalId) {
        if !self.machine.is_configured() || self.sending.contains(&local_id) {
            return;
        }
        let Some(message) = self.conversation.by_local_id(&local_id).cloned() else {
            return;
        };
        if !self.reachable {
            debug!(%local_id, "Unreachable, message stays pending");
            return;
        }
        let Some(api) = self.session_api() else {
            return;
        };

        self.sending.insert(local_id);
        match message.upload.clone() {
            Some(upload) => self.spawn(async move {
                Completion::MediaUploaded {
                    local_id,
                    result: api.upload_media(&upload).await,
                }
            }),
            None => self.spawn(async move {
                Completion::Stored {
                    local_id,
                    result: api.store_message(&message).await,
                }
            }),
        }
    }

    fn media_uploaded(&mut self, local_id: LocalId, result: Result<String, ApiError>) {
        let Some(mut message) = self.conversation.by_local_id(&local_id).cloned() else {
            self.sending.remove(&local_id);
            return;
        };
        match result {
            Ok(media_id) => {
                let mime_type = message
                    .upload
                    .take()
                    .map(|upload| upload.mime_type)
                    .unwrap_or_default();
                message.media = Some(Media {
                    id: media_id,
                    description: None,
                    mime_type,
                });
                self.update_message(message.clone());
                self.sending.remove(&local_id);
                self.dispatch(local_id);
            }
            Err(e) => {
                self.sending.remove(&local_id);
                let upload = ParleyError::MediaUpload(
                    e.server_message()
                        .map(str::to_string)
                        .unwrap_or_else(|| e.to_string()),
                );
                self.send_failed(local_id, &e, Some(upload.to_string()));
            }
        }
    }

    fn stored(&mut self, local_id: LocalId, result: Result<RemoteId, ApiError>) {
        self.sending.remove(&local_id);
        match result {
            Ok(remote_id) => {
                let Some(mut message) = self.conversation.by_local_id(&local_id).cloned() else {
                    return;
                };
                message.remote_id = Some(remote_id);
                message.send_status = SendStatus::Success;
                message.failure_reason = None;
                debug!(%local_id, remote_id = remote_id.value(), "Message stored");
                self.update_message(message);
            }
            Err(e) => {
                let reason = e.server_message().map(str::to_string);
                self.send_failed(local_id, &e, reason);
            }
        }
    }

    fn send_failed(&mut self, local_id: LocalId, error: &ApiError, reason: Option<String>) {
        if error.is_offline() && self.config.offline_messaging {
            debug!(%local_id, "Offline, message stays pending");
            return;
        }
        let Some(mut message) = self.conversation.by_local_id(&local_id).cloned() else {
            return;
        };
        warn!(%local_id, "Send failed: {}", error);
        message.send_status = SendStatus::Failed;
        message.failure_reason = reason.clone();
        self.update_message(message);
        self.emit(ParleyEvent::MessageFailed { local_id, reason });
    }

    // ===========================================
    // Remote payloads and typing
    // ===========================================

    fn handle_remote(&mut self, payload: RemotePayload) {
        if self.machine.state() == ConfigState::Unconfigured {
            return;
        }
        if self.machine.is_in_flight() {
            debug!("Ignoring remote payload during resync");
            return;
        }
        match payload {
            RemotePayload::Message(message) => match (message.remote_id, self.session_api()) {
                (Some(id), Some(api)) => self.spawn(async move {
                    Completion::RemoteFetched {
                        result: api.get_message(id).await,
                        fallback: message,
                    }
                }),
                _ => self.receive(message),
            },
            RemotePayload::Event(event) => match event.name {
                EventName::StartTyping => self.agent_started_typing(),
                EventName::StopTyping => self.agent_stopped_typing(),
                EventName::Unknown => debug!("Ignoring unknown remote event"),
            },
        }
    }

    fn receive(&mut self, message: Message) {
        let from_agent = message.kind == MessageKind::Agent;
        self.add_message(&message);
        if from_agent {
            self.agent_stopped_typing();
        }
    }

    fn agent_started_typing(&mut self) {
        let (announce, generation) = self.agent_typing.start();
        if announce {
            self.apply_snapshot(|snapshot| snapshot.set_agent_typing(true));
            self.emit(ParleyEvent::AgentTyping(true));
        }
        if let Some(timer) = self.agent_typing_timer.take() {
            timer.cancel();
        }
        self.agent_typing_timer = self.arm(
            self.agent_typing.timeout(),
            Timer::AgentTypingTimeout(generation),
        );
    }

    fn agent_stopped_typing(&mut self) {
        if let Some(timer) = self.agent_typing_timer.take() {
            timer.cancel();
        }
        if self.agent_typing.stop() {
            self.agent_typing_cleared();
        }
    }

    fn agent_typing_cleared(&mut self) {
        self.apply_snapshot(|snapshot| snapshot.set_agent_typing(false));
        self.emit(ParleyEvent::AgentTyping(false));
    }

    fn user_typing(&mut self) {
        if !self.machine.is_configured() || !self.reachable {
            return;
        }
        let keystroke = self.user_typing.keystroke(self.scheduler.now());
        if keystroke.announce_start {
            self.send_user_event(UserEvent::StartTyping);
        }
        if let Some(timer) = self.user_typing_timer.take() {
            timer.cancel();
        }
        self.user_typing_timer = self.arm(
            keystroke.stop_after,
            Timer::UserTypingStop(keystroke.generation),
        );
    }

    fn send_user_event(&mut self, event: UserEvent) {
        let Some(api) = self.session_api() else {
            return;
        };
        self.spawn(async move {
            if let Err(e) = api.send_event(event).await {
                debug!(?event, "Typing event failed: {}", e);
            }
            Completion::Done
        });
    }

    // ===========================================
    // Polling
    // ===========================================

    fn should_poll(&self) -> bool {
        self.machine.is_configured()
            && !self.machine.is_in_flight()
            && self.foreground
            && (self.config.always_polling || !self.push_enabled)
    }

    fn update_polling(&mut self) {
        if self.should_poll() {
            if self.poll_timer.is_none() && !self.poll_in_flight {
                self.arm_poll(self.backoff.interval());
            }
        } else if let Some(timer) = self.poll_timer.take() {
            debug!("Polling paused");
            timer.cancel();
        }
    }

    fn arm_poll(&mut self, delay: Duration) {
        self.poll_generation += 1;
        self.poll_timer = self.arm(delay, Timer::Poll(self.poll_generation));
    }

    fn set_foreground(&mut self, foreground: bool) {
        if self.foreground == foreground {
            return;
        }
        self.foreground = foreground;
        self.update_polling();
    }

    fn poll(&mut self) {
        self.poll_timer = None;
        if !self.should_poll() {
            return;
        }
        if !self.reachable {
            self.arm_poll(self.backoff.interval());
            return;
        }
        let Some(api) = self.session_api() else {
            return;
        };
        let anchor = self
            .conversation
            .last_sent_message()
            .and_then(|m| m.remote_id);
        self.poll_in_flight = true;
        self.spawn(async move {
            match anchor {
                Some(id) => Completion::Polled {
                    mode: MergeMode::After,
                    result: api.get_messages_after(id).await,
                },
                None => Completion::Polled {
                    mode: MergeMode::All,
                    result: api.get_messages().await,
                },
            }
        });
    }

    fn polled(&mut self, mode: MergeMode, result: Result<MessageCollection, ApiError>) {
        self.poll_in_flight = false;
        let next = match result {
            Ok(_) if self.machine.is_in_flight() => self.backoff.interval(),
            Ok(collection) => {
                let added = self.merge(collection, mode, false);
                self.backoff.record(added)
            }
            Err(e) => {
                debug!("Poll failed: {}", e);
                self.backoff.interval()
            }
        };
        if self.should_poll() && self.poll_timer.is_none() {
            self.arm_poll(next);
        }
    }

    // ===========================================
    // Plumbing
    // ===========================================

    fn completed(&mut self, completion: Completion) {
        match completion {
            Completion::Resynced(result) => self.resynced(result),
            Completion::MediaUploaded { local_id, result } => self.media_uploaded(local_id, result),
            Completion::Stored { local_id, result } => self.stored(local_id, result),
            Completion::RemoteFetched { fallback, result } => {
                if self.machine.is_in_flight() {
                    debug!("Ignoring remote message during resync");
                    return;
                }
                let message = match result {
                    Ok(message) => message,
                    Err(e) => {
                        debug!("Fetching pushed message failed, using pushed copy: {}", e);
                        fallback
                    }
                };
                self.receive(message);
            }
            Completion::LoadedMore(result) => self.loaded_more(result),
            Completion::Polled { mode, result } => self.polled(mode, result),
            Completion::Done => {}
        }
    }

    fn timer_fired(&mut self, timer: Timer) {
        match timer {
            Timer::UserTypingStop(generation) => {
                self.user_typing_timer = None;
                if self.user_typing.stop_timer(generation)
                    && self.reachable
                    && self.machine.is_configured()
                {
                    self.send_user_event(UserEvent::StopTyping);
                }
            }
            Timer::AgentTypingTimeout(generation) => {
                self.agent_typing_timer = None;
                if self.agent_typing.timer(generation) {
                    self.agent_typing_cleared();
                }
            }
            Timer::Poll(generation) => {
                if generation == self.poll_generation {
                    self.poll();
                }
            }
        }
    }

    fn session_api(&self) -> Option<ParleyApi> {
        self.session.as_ref().map(|session| session.api.clone())
    }

    fn emit(&self, event: ParleyEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Run network work off the coordinator, posting its completion back.
    fn spawn<F>(&mut self, work: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        let epoch = self.epoch;
        self.outstanding += 1;
        self.tasks.retain(|task| !task.is_finished());
        self.tasks.push(tokio::spawn(async move {
            let completion = work.await;
            let _ = commands.send(Command::Completed { epoch, completion });
        }));
    }

    fn arm(&self, delay: Duration, timer: Timer) -> Option<TimerHandle> {
        let commands = self.commands.clone();
        let epoch = self.epoch;
        Some(self.scheduler.schedule_once(
            delay,
            Box::new(move || {
                if let Some(commands) = commands.upgrade() {
                    let _ = commands.send(Command::Timer { epoch, timer });
                }
            }),
        ))
    }
}

async fn resync(
    api: ParleyApi,
    registration: DeviceRegistration,
    anchor: Option<RemoteId>,
) -> Result<(MessageCollection, MergeMode), ApiError> {
    api.register_device(&registration).await?;
    match anchor {
        Some(id) => Ok((api.get_messages_after(id).await?, MergeMode::After)),
        None => Ok((api.get_messages().await?, MergeMode::All)),
    }
}
