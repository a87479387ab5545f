//! Network-mode lifecycle as a pure transition function so the controller
//! can be exercised without real network callbacks: the platform layer
//! feeds events in and interprets the returned effects.

/// Join attempts allowed before the machine gives up.
pub const MAX_JOIN_ATTEMPTS: u32 = 5;

/// Delay before the restart scheduled by the `Failed` transition.
pub const RESTART_DELAY_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Provisioning,
    Connecting,
    Connected,
    Failed,
}

impl NetworkState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provisioning => "PROVISIONING",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    /// A validated submission with non-empty credentials was persisted and
    /// acknowledged.
    CredentialsCommitted,
    /// The station lost or failed association during a join attempt.
    Disconnected,
    /// A join attempt exceeded its bounded wait for an address.
    JoinTimedOut,
    /// The station received an address assignment.
    GotAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeEffect {
    /// Stop the provisioning interface and its HTTP surface, releasing
    /// their resources before the station comes up.
    StopProvisioning,
    /// Initialize the station interface with the stored credentials and
    /// attempt the join.
    StartJoin,
    /// Re-attempt the join without re-initializing the interface.
    RetryJoin,
    /// Start the telemetry surface, the sensor loop and the override input.
    StartRuntime,
    /// Terminal: restart the whole device after the given delay. The only
    /// recovery path is the reboot back into provisioning.
    ScheduleRestart { delay_ms: u64 },
}

#[derive(Debug, Clone)]
pub struct ModeMachine {
    state: NetworkState,
    join_attempts: u32,
}

impl Default for ModeMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeMachine {
    /// Boot always enters provisioning, regardless of stored credentials.
    pub fn new() -> Self {
        Self {
            state: NetworkState::Provisioning,
            join_attempts: 0,
        }
    }

    pub fn state(&self) -> NetworkState {
        self.state
    }

    pub fn join_attempts(&self) -> u32 {
        self.join_attempts
    }

    /// Applies one event and returns the side effects the platform layer
    /// must carry out, in order. Events that do not apply to the current
    /// state are ignored.
    pub fn on_event(&mut self, event: NetworkEvent) -> Vec<ModeEffect> {
        use NetworkEvent::*;
        use NetworkState::*;

        match (self.state, event) {
            (Provisioning, CredentialsCommitted) => {
                self.state = Connecting;
                self.join_attempts = 0;
                vec![ModeEffect::StopProvisioning, ModeEffect::StartJoin]
            }
            // A timed-out wait counts as a failed attempt, same as an
            // explicit disconnect.
            (Connecting, Disconnected) | (Connecting, JoinTimedOut) => {
                self.join_attempts += 1;
                if self.join_attempts >= MAX_JOIN_ATTEMPTS {
                    self.state = Failed;
                    vec![ModeEffect::ScheduleRestart {
                        delay_ms: RESTART_DELAY_MS,
                    }]
                } else {
                    vec![ModeEffect::RetryJoin]
                }
            }
            (Connecting, GotAddress) => {
                self.state = Connected;
                self.join_attempts = 0;
                vec![ModeEffect::StartRuntime]
            }
            _ => Vec::new(),
        }
    }
}
