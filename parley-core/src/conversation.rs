//! Conversation state and merge rules.
//!
//! [`Conversation`] owns the canonical in-memory message list, the paging
//! cursor and the welcome/sticky texts of a single conversation. Every
//! mutation returns the [`StoreOp`]s needed to mirror it into persistence;
//! executing them is left to the caller.
//!
//! Persisted message lists use a most-recent-first convention: index 0 is
//! the newest entry.

use parley_types::{Message, MessageCollection, MessageKind, Paging, SendStatus};

/// How a fetched page relates to what is already held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Full resync
    All,
    /// Older page, prepended
    Before,
    /// Incremental tail fetch since the last known message
    After,
}

/// A persistence operation produced by a mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    /// Replace the persisted list (most recent first).
    SaveMessages(Vec<Message>),
    /// Insert one message into the persisted list.
    InsertMessage {
        /// The new message.
        message: Message,
        /// Position in the persisted list.
        at: usize,
    },
    /// Replace the persisted copy of a message.
    UpdateMessage(Message),
    /// Store or clear the welcome text.
    SetWelcome(Option<String>),
    /// Store or clear the paging cursor.
    SetPaging(Option<Paging>),
}

/// Result of merging a fetched page.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// Messages that were not held before, in time order.
    pub added: Vec<Message>,
    /// Persistence operations to execute.
    pub ops: Vec<StoreOp>,
    /// The welcome text changed.
    pub welcome_changed: bool,
    /// The sticky text changed.
    pub sticky_changed: bool,
}

/// Conversation state as read back from persistence.
///
/// Each field is decoded independently; a field that failed to decode is
/// `None` and falls back to its default.
#[derive(Debug, Clone, Default)]
pub struct CachedConversation {
    /// Persisted messages, most recent first.
    pub messages: Option<Vec<Message>>,
    /// Persisted welcome text.
    pub welcome_message: Option<String>,
    /// Persisted paging cursor.
    pub paging: Option<Paging>,
}

/// The canonical state of one conversation.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    welcome_message: Option<String>,
    sticky_message: Option<String>,
    paging: Option<Paging>,
}

impl Conversation {
    /// Create an empty conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the in-memory state from persisted fields.
    ///
    /// Messages are put back into time order; equal times keep their
    /// original relative order.
    pub fn restore(cached: CachedConversation) -> Self {
        let mut messages = cached.messages.unwrap_or_default();
        messages.reverse();
        messages.sort_by_key(|m| m.time);
        Self {
            messages,
            welcome_message: cached.welcome_message,
            sticky_message: None,
            paging: cached.paging,
        }
    }

    /// All held messages.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Welcome text.
    pub fn welcome_message(&self) -> Option<&str> {
        self.welcome_message.as_deref()
    }

    /// Sticky text.
    pub fn sticky_message(&self) -> Option<&str> {
        self.sticky_message.as_deref()
    }

    /// Paging cursor from the last non-incremental merge.
    pub fn paging(&self) -> Option<&Paging> {
        self.paging.as_ref()
    }

    /// Whether a message with the same identity is held.
    pub fn contains(&self, message: &Message) -> bool {
        self.find(message).is_some()
    }

    /// Look up the held copy of a message.
    pub fn get(&self, message: &Message) -> Option<&Message> {
        self.find(message).map(|i| &self.messages[i])
    }

    /// Look up a held message by local id.
    pub fn by_local_id(&self, local_id: &parley_types::LocalId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.local_id == local_id)
    }

    fn find(&self, message: &Message) -> Option<usize> {
        self.messages.iter().position(|m| m.same_identity(message))
    }

    /// Merge a fetched page.
    ///
    /// `Before` prepends the new batch. `All` and `After` append it and then
    /// re-append every pending or failed message, so locally authored unsent
    /// messages always surface after the merged batch. An `After` merge
    /// leaves the welcome text and the paging cursor untouched.
    pub fn handle(&mut self, collection: MessageCollection, mode: MergeMode) -> MergeOutcome {
        let mut batch: Vec<Message> = Vec::with_capacity(collection.messages.len());
        for message in collection.messages {
            if !self.contains(&message) && !batch.iter().any(|m| m.same_identity(&message)) {
                batch.push(message);
            }
        }
        batch.sort_by_key(|m| m.time);

        match mode {
            MergeMode::Before => {
                self.messages.splice(0..0, batch.iter().cloned());
            }
            MergeMode::All | MergeMode::After => {
                let unsent: Vec<Message> = self
                    .messages
                    .iter()
                    .filter(|m| m.is_unsent())
                    .cloned()
                    .collect();
                self.messages.retain(|m| !m.is_unsent());
                self.messages.extend(batch.iter().cloned());
                self.messages.extend(unsent);
            }
        }

        let mut ops = vec![StoreOp::SaveMessages(self.persisted_order())];

        let sticky_changed = self.sticky_message != collection.sticky_message;
        self.sticky_message = collection.sticky_message;

        let mut welcome_changed = false;
        if mode != MergeMode::After {
            welcome_changed = self.welcome_message != collection.welcome_message;
            self.welcome_message = collection.welcome_message;
            self.paging = Some(collection.paging);
            ops.push(StoreOp::SetWelcome(self.welcome_message.clone()));
            ops.push(StoreOp::SetPaging(self.paging.clone()));
        }

        MergeOutcome {
            added: batch,
            ops,
            welcome_changed,
            sticky_changed,
        }
    }

    /// Append a message unless one with the same identity is held.
    ///
    /// Returns the persistence operation, or `None` for a duplicate.
    pub fn add(&mut self, message: Message) -> Option<StoreOp> {
        if self.contains(&message) {
            return None;
        }
        self.messages.push(message.clone());
        Some(StoreOp::InsertMessage { message, at: 0 })
    }

    /// Replace the held copy of a message. No-op when it is not held.
    pub fn update(&mut self, message: Message) -> Option<StoreOp> {
        let index = self.find(&message)?;
        self.messages[index] = message.clone();
        Some(StoreOp::UpdateMessage(message))
    }

    /// Whether an older page can be fetched.
    pub fn can_load_more(&self) -> bool {
        self.paging.as_ref().is_some_and(Paging::can_load_more)
    }

    /// Oldest user, agent or system message; anchors backward pagination.
    pub fn oldest_displayable_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .filter(|m| {
                matches!(
                    m.kind,
                    MessageKind::User
                        | MessageKind::Agent
                        | MessageKind::SystemUser
                        | MessageKind::SystemAgent
                )
            })
            .min_by_key(|m| m.time)
    }

    /// Pending and failed messages in time order.
    pub fn pending_messages(&self) -> Vec<Message> {
        let mut pending: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.is_unsent())
            .cloned()
            .collect();
        pending.sort_by_key(|m| m.time);
        pending
    }

    /// Most recent message confirmed by the remote side.
    ///
    /// Anchors incremental fetches and polling.
    pub fn last_sent_message(&self) -> Option<&Message> {
        // max_by_key keeps the last maximum: on equal times the later held message wins
        self.messages
            .iter()
            .filter(|m| m.remote_id.is_some() && m.send_status == SendStatus::Success)
            .max_by_key(|m| m.time)
    }

    /// Drop everything held in memory.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn persisted_order(&self) -> Vec<Message> {
        self.messages.iter().rev().cloned().collect()
    }
}
