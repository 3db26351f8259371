//! Events published to observers.

use parley_core::{Change, ConfigState, Snapshot};
use parley_types::LocalId;

/// Something observers may want to react to.
#[derive(Debug, Clone)]
pub enum ParleyEvent {
    /// The configuration state changed.
    StateChanged(ConfigState),
    /// A configure attempt failed.
    ConfigurationFailed {
        /// Error code
        code: i32,
        /// Error text
        message: String,
    },
    /// The reachability signal changed.
    ReachabilityChanged(bool),
    /// The display snapshot was rebuilt; replace whatever is shown.
    SnapshotReloaded(Snapshot),
    /// The display snapshot changed incrementally.
    SnapshotChanged(Change),
    /// The agent started or stopped typing.
    AgentTyping(bool),
    /// The sticky text changed.
    StickyMessage(Option<String>),
    /// The welcome text changed.
    WelcomeMessage(Option<String>),
    /// A message could not be sent.
    MessageFailed {
        /// The failed message
        local_id: LocalId,
        /// Server-provided reason, if any
        reason: Option<String>,
    },
}
