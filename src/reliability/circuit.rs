#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    /// Sends are skipped until `remaining` more ticks have been refused.
    Open { remaining: u64 },
    HalfOpen,
}

/// Guards the telemetry sink. After `threshold` consecutive failures the
/// circuit opens for `cooldown_ticks` ticks, then lets one trial send through.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    pub state: CircuitState,
    pub failures: u32,
    pub threshold: u32,
    pub cooldown_ticks: u64,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown_ticks: u64) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            threshold: threshold.max(1),
            cooldown_ticks,
        }
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.state = CircuitState::Closed;
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
        let tripped = matches!(self.state, CircuitState::HalfOpen) || self.failures >= self.threshold;
        if tripped {
            self.state = CircuitState::Open {
                remaining: self.cooldown_ticks,
            };
        }
    }

    /// Called once per tick before sending. Counts down the cooldown.
    pub fn allow(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open { remaining: 0 } => {
                self.state = CircuitState::HalfOpen;
                true
            }
            CircuitState::Open { remaining } => {
                self.state = CircuitState::Open {
                    remaining: remaining - 1,
                };
                false
            }
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, CircuitState::Open { .. })
    }
}
