//! Configuration state machine for Parley.
//!
//! This module provides a pure, side-effect-free state machine for the
//! configure/resync lifecycle. It takes events as input and produces a new
//! machine plus a list of actions to execute.
//!
//! The actual I/O (registering the device, fetching messages, touching the
//! cache) is performed by parley-client, not by this module.

/// Where the session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigState {
    /// No secret given yet, or reset.
    #[default]
    Unconfigured,
    /// Registering and resyncing without a usable cache.
    Configuring,
    /// Messages can be sent and received.
    Configured,
    /// The last configure attempt failed.
    Failed,
}

/// Configuration machine - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigMachine {
    state: ConfigState,
    in_flight: bool,
}

/// Events that drive the configuration lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEvent {
    /// `configure()` was called, by the caller or by a reachability change.
    ConfigureRequested {
        /// Whether the offline cache is enabled.
        offline_cache: bool,
        /// The cached conversation belongs to another session.
        clear_cache: bool,
    },
    /// Device registration and message resync finished.
    ResyncSucceeded,
    /// Device registration or message resync failed.
    ResyncFailed {
        /// The failure was classified as offline.
        offline: bool,
        /// Whether the offline cache is enabled.
        offline_cache: bool,
        /// Error code.
        code: i32,
        /// Error text.
        message: String,
    },
    /// The reachability signal changed.
    ReachabilityChanged {
        /// Whether the remote side is reachable now.
        reachable: bool,
    },
    /// `reset()` or `purge_local_memory()` was called.
    ResetRequested,
}

/// Actions to be executed by parley-client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Fail the configure call with a busy error.
    RejectBusy,
    /// Wipe persisted conversation state.
    ClearCache,
    /// Load the persisted conversation into memory.
    LoadCache,
    /// Drop the in-memory conversation.
    ClearConversation,
    /// Register the device, then resync messages.
    RegisterAndResync,
    /// Push every pending message through the send pipeline.
    FlushPending,
    /// Start a new configure without clearing the cache.
    Reconfigure,
    /// Abort in-flight work and drop its late results.
    CancelInFlight,
    /// Notify observers of a new state.
    EmitState(ConfigState),
    /// Notify observers of a configuration failure.
    EmitError {
        /// Error code.
        code: i32,
        /// Error text.
        message: String,
    },
    /// Notify observers of a reachability change.
    EmitReachability(bool),
}

impl ConfigMachine {
    /// Create a machine in the Unconfigured state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> ConfigState {
        self.state
    }

    /// Whether a configure/resync is in flight.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Whether messages may be sent.
    pub fn is_configured(&self) -> bool {
        self.state == ConfigState::Configured
    }

    /// Process an event and return the new machine plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller is responsible
    /// for executing the returned actions in order.
    pub fn on_event(self, event: ConfigEvent) -> (Self, Vec<Action>) {
        match event {
            ConfigEvent::ConfigureRequested { .. } if self.in_flight => {
                (self, vec![Action::RejectBusy])
            }
            ConfigEvent::ConfigureRequested {
                offline_cache,
                clear_cache,
            } => {
                let mut actions = Vec::new();
                if clear_cache {
                    actions.push(Action::ClearCache);
                }
                let next = if offline_cache {
                    actions.push(Action::LoadCache);
                    ConfigState::Configured
                } else {
                    actions.push(Action::ClearConversation);
                    ConfigState::Configuring
                };
                let machine = self.transition(next, true, &mut actions);
                actions.push(Action::RegisterAndResync);
                (machine, actions)
            }

            ConfigEvent::ResyncSucceeded if self.in_flight => {
                let mut actions = Vec::new();
                let machine = self.transition(ConfigState::Configured, false, &mut actions);
                actions.push(Action::FlushPending);
                (machine, actions)
            }
            ConfigEvent::ResyncFailed {
                offline,
                offline_cache,
                code,
                message,
            } if self.in_flight => {
                let mut actions = Vec::new();
                if offline && offline_cache {
                    let machine = self.transition(ConfigState::Configured, false, &mut actions);
                    (machine, actions)
                } else {
                    let machine = self.transition(ConfigState::Failed, false, &mut actions);
                    actions.push(Action::EmitError { code, message });
                    (machine, actions)
                }
            }

            ConfigEvent::ReachabilityChanged { reachable } => {
                let mut actions = vec![Action::EmitReachability(reachable)];
                if reachable
                    && !self.in_flight
                    && matches!(self.state, ConfigState::Configured | ConfigState::Failed)
                {
                    actions.push(Action::Reconfigure);
                }
                (self, actions)
            }

            ConfigEvent::ResetRequested => {
                let mut actions = vec![Action::CancelInFlight];
                let machine = self.transition(ConfigState::Unconfigured, false, &mut actions);
                (machine, actions)
            }

            // Late resync results after a reset - drop them
            _ => (self, vec![]),
        }
    }

    fn transition(self, state: ConfigState, in_flight: bool, actions: &mut Vec<Action>) -> Self {
        if state != self.state {
            actions.push(Action::EmitState(state));
        }
        Self { state, in_flight }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configure(offline_cache: bool) -> ConfigEvent {
        ConfigEvent::ConfigureRequested {
            offline_cache,
            clear_cache: false,
        }
    }

    fn failed(offline: bool, offline_cache: bool) -> ConfigEvent {
        ConfigEvent::ResyncFailed {
            offline,
            offline_cache,
            code: 13,
            message: "offline".into(),
        }
    }

    #[test]
    fn starts_unconfigured() {
        let machine = ConfigMachine::new();
        assert_eq!(machine.state(), ConfigState::Unconfigured);
        assert!(!machine.is_in_flight());
    }

    #[test]
    fn configure_without_cache_goes_through_configuring() {
        let (machine, actions) = ConfigMachine::new().on_event(configure(false));

        assert_eq!(machine.state(), ConfigState::Configuring);
        assert!(machine.is_in_flight());
        assert_eq!(
            actions,
            vec![
                Action::ClearConversation,
                Action::EmitState(ConfigState::Configuring),
                Action::RegisterAndResync,
            ]
        );
    }

    #[test]
    fn configure_with_cache_is_optimistically_configured() {
        let (machine, actions) = ConfigMachine::new().on_event(configure(true));

        assert_eq!(machine.state(), ConfigState::Configured);
        assert!(machine.is_in_flight());
        assert_eq!(actions[0], Action::LoadCache);
        assert!(actions.contains(&Action::RegisterAndResync));
    }

    #[test]
    fn secret_change_clears_cache_first() {
        let (_, actions) = ConfigMachine::new().on_event(ConfigEvent::ConfigureRequested {
            offline_cache: true,
            clear_cache: true,
        });
        assert_eq!(actions[0], Action::ClearCache);
        assert_eq!(actions[1], Action::LoadCache);
    }

    #[test]
    fn second_configure_while_in_flight_is_busy() {
        let (machine, _) = ConfigMachine::new().on_event(configure(false));
        let (machine, actions) = machine.on_event(configure(false));

        assert_eq!(actions, vec![Action::RejectBusy]);
        assert_eq!(machine.state(), ConfigState::Configuring);
        assert!(machine.is_in_flight());
    }

    #[test]
    fn resync_success_flushes_pending() {
        let (machine, _) = ConfigMachine::new().on_event(configure(false));
        let (machine, actions) = machine.on_event(ConfigEvent::ResyncSucceeded);

        assert_eq!(machine.state(), ConfigState::Configured);
        assert!(!machine.is_in_flight());
        assert_eq!(
            actions,
            vec![
                Action::EmitState(ConfigState::Configured),
                Action::FlushPending
            ]
        );
    }

    #[test]
    fn offline_failure_with_cache_stays_configured() {
        let (machine, _) = ConfigMachine::new().on_event(configure(true));
        let (machine, actions) = machine.on_event(failed(true, true));

        assert_eq!(machine.state(), ConfigState::Configured);
        assert!(!machine.is_in_flight());
        assert!(actions.is_empty());
    }

    #[test]
    fn offline_failure_without_cache_fails() {
        let (machine, _) = ConfigMachine::new().on_event(configure(false));
        let (machine, actions) = machine.on_event(failed(true, false));

        assert_eq!(machine.state(), ConfigState::Failed);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::EmitError { code: 13, .. })));
    }

    #[test]
    fn server_failure_with_cache_fails() {
        let (machine, _) = ConfigMachine::new().on_event(configure(true));
        let (machine, _) = machine.on_event(failed(false, true));
        assert_eq!(machine.state(), ConfigState::Failed);
    }

    #[test]
    fn reachable_again_reconfigures_failed_and_configured() {
        let failed_machine = ConfigMachine {
            state: ConfigState::Failed,
            in_flight: false,
        };
        let (_, actions) =
            failed_machine.on_event(ConfigEvent::ReachabilityChanged { reachable: true });
        assert_eq!(
            actions,
            vec![Action::EmitReachability(true), Action::Reconfigure]
        );

        let configured = ConfigMachine {
            state: ConfigState::Configured,
            in_flight: false,
        };
        let (_, actions) = configured.on_event(ConfigEvent::ReachabilityChanged { reachable: true });
        assert!(actions.contains(&Action::Reconfigure));
    }

    #[test]
    fn unreachable_only_notifies() {
        let configured = ConfigMachine {
            state: ConfigState::Configured,
            in_flight: false,
        };
        let (machine, actions) =
            configured.on_event(ConfigEvent::ReachabilityChanged { reachable: false });

        assert_eq!(machine, configured);
        assert_eq!(actions, vec![Action::EmitReachability(false)]);
    }

    #[test]
    fn reachability_does_not_reconfigure_unconfigured_or_in_flight() {
        let (_, actions) = ConfigMachine::new()
            .on_event(ConfigEvent::ReachabilityChanged { reachable: true });
        assert!(!actions.contains(&Action::Reconfigure));

        let (machine, _) = ConfigMachine::new().on_event(configure(true));
        let (_, actions) = machine.on_event(ConfigEvent::ReachabilityChanged { reachable: true });
        assert!(!actions.contains(&Action::Reconfigure));
    }

    #[test]
    fn reset_cancels_and_returns_to_unconfigured() {
        let (machine, _) = ConfigMachine::new().on_event(configure(false));
        let (machine, actions) = machine.on_event(ConfigEvent::ResetRequested);

        assert_eq!(machine.state(), ConfigState::Unconfigured);
        assert!(!machine.is_in_flight());
        assert_eq!(actions[0], Action::CancelInFlight);

        // A late resync result is dropped
        let (machine, actions) = machine.on_event(ConfigEvent::ResyncSucceeded);
        assert_eq!(machine.state(), ConfigState::Unconfigured);
        assert!(actions.is_empty());
    }
}
