//! Error injection for the simulated SDK.
//!
//! Operations are keyed by the vendor function name (`"SVBGetVideoData"`,
//! `"SVBSetROIFormat"`, ...). The wildcard key `"*"` applies a failure rate to
//! every operation.

use super::rng::MockRng;
use crate::error::SdkError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Per-operation failure rate (0.0 to 1.0)
    failure_rates: Arc<HashMap<&'static str, f64>>,
    scenarios: Arc<Vec<ErrorScenario>>,
    rng: Arc<MockRng>,
    state: Arc<Mutex<ErrorState>>,
}

#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Succeed `count` times, then fail every call with `error`
    FailAfterN {
        operation: &'static str,
        count: u32,
        error: SdkError,
    },
    /// Fail every call with `error`
    Always {
        operation: &'static str,
        error: SdkError,
    },
    /// Return `SVB_ERROR_TIMEOUT` for the first `count` calls
    TimeoutFor {
        operation: &'static str,
        count: u32,
    },
    /// After `after` successful calls of `operation`, every call on every
    /// operation reports the camera as removed
    DeviceRemoved {
        operation: &'static str,
        after: u32,
    },
}

#[derive(Default, Debug)]
struct ErrorState {
    operation_counts: HashMap<&'static str, u32>,
    removed: bool,
}

impl ErrorConfig {
    /// No injected errors.
    pub fn none() -> Self {
        Self {
            failure_rates: Arc::new(HashMap::new()),
            scenarios: Arc::new(Vec::new()),
            rng: Arc::new(MockRng::new(None)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Uniform random `SVB_ERROR_GENERAL_ERROR` on every operation.
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(Vec::new()),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self {
            failure_rates: Arc::new(HashMap::new()),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(None)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    pub fn with_rates(rates: HashMap<&'static str, f64>, seed: Option<u64>) -> Self {
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(Vec::new()),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Decide whether `operation` fails on this call.
    pub fn check_operation(&self, operation: &'static str) -> Result<(), SdkError> {
        let mut state = self.state.lock();

        if state.removed {
            return Err(SdkError::CameraRemoved);
        }

        let calls = {
            let count = state.operation_counts.entry(operation).or_insert(0);
            *count += 1;
            *count
        };

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                    error,
                } if *op == operation => {
                    if calls > *count {
                        return Err(*error);
                    }
                }
                ErrorScenario::Always {
                    operation: op,
                    error,
                } if *op == operation => {
                    return Err(*error);
                }
                ErrorScenario::TimeoutFor {
                    operation: op,
                    count,
                } if *op == operation => {
                    if calls <= *count {
                        return Err(SdkError::Timeout);
                    }
                }
                ErrorScenario::DeviceRemoved {
                    operation: op,
                    after,
                } if *op == operation => {
                    if calls > *after {
                        state.removed = true;
                        return Err(SdkError::CameraRemoved);
                    }
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);

        if self.rng.should_fail(rate) {
            return Err(SdkError::GeneralError);
        }

        Ok(())
    }

    /// Clear counters and the removed flag.
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}
