//! Fault injection for simulated backends.
//!
//! Every register write and read in a simulated backend passes through
//! [`FaultConfig::check_operation`], which can turn it into a
//! [`DriverError`]. Tests use this to drive the `BackendCommunication` paths
//! of the session without real hardware.

use super::rng::SimRng;
use parking_lot::Mutex;
use sdr_core::error::{DriverError, DriverErrorKind};
use std::collections::HashMap;
use std::sync::Arc;

/// Fault injection configuration shared by all clones.
#[derive(Clone, Debug)]
pub struct FaultConfig {
    failure_rates: Arc<HashMap<&'static str, f64>>,
    scenarios: Arc<Vec<FaultScenario>>,
    rng: Arc<SimRng>,
    state: Arc<Mutex<FaultState>>,
}

/// Scripted failure.
#[derive(Debug, Clone)]
pub enum FaultScenario {
    /// Let `count` calls of `operation` succeed, fail every later one.
    FailAfterN {
        /// Operation name (`set_gain`, `set_center_freq`, ...).
        operation: &'static str,
        /// Successful calls before failing.
        count: u32,
    },
    /// `operation` always times out.
    Timeout {
        /// Operation name.
        operation: &'static str,
    },
    /// The first checked call loses the link; all later calls fail too.
    CommunicationLoss,
    /// The first checked call latches a hardware fault code.
    HardwareFault {
        /// Vendor fault code.
        code: u32,
    },
}

#[derive(Default, Debug)]
struct FaultState {
    operation_counts: HashMap<&'static str, u32>,
    communication_lost: bool,
    hardware_fault_code: u32,
}

impl FaultConfig {
    /// No faults.
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Uniform random failures on every operation.
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self::build(rates, Vec::new(), seed)
    }

    /// A single scripted scenario.
    pub fn scenario(scenario: FaultScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Several scripted scenarios.
    pub fn scenarios(scenarios: Vec<FaultScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    fn build(
        rates: HashMap<&'static str, f64>,
        scenarios: Vec<FaultScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(SimRng::new(seed)),
            state: Arc::new(Mutex::new(FaultState::default())),
        }
    }

    /// Decide whether `operation` on `backend` fails.
    pub fn check_operation(&self, backend: &str, operation: &'static str) -> Result<(), DriverError> {
        let mut state = self.state.lock();

        if state.communication_lost {
            return Err(DriverError::new(
                backend,
                DriverErrorKind::Communication,
                "Communication lost",
            ));
        }

        if state.hardware_fault_code != 0 {
            return Err(DriverError::new(
                backend,
                DriverErrorKind::Hardware,
                format!("Hardware fault: {}", state.hardware_fault_code),
            ));
        }

        for scenario in self.scenarios.iter() {
            match scenario {
                FaultScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation => {
                    let current = state.operation_counts.entry(operation).or_insert(0);
                    *current += 1;
                    if *current > *count {
                        return Err(DriverError::new(
                            backend,
                            DriverErrorKind::Hardware,
                            format!("Injected failure after {} operations", count),
                        ));
                    }
                }
                FaultScenario::Timeout { operation: op } if *op == operation => {
                    return Err(DriverError::new(
                        backend,
                        DriverErrorKind::Timeout,
                        format!("Operation '{}' timed out", operation),
                    ));
                }
                FaultScenario::CommunicationLoss => {
                    state.communication_lost = true;
                    return Err(DriverError::new(
                        backend,
                        DriverErrorKind::Communication,
                        "Communication lost",
                    ));
                }
                FaultScenario::HardwareFault { code } => {
                    state.hardware_fault_code = *code;
                    return Err(DriverError::new(
                        backend,
                        DriverErrorKind::Hardware,
                        format!("Hardware fault: {}", code),
                    ));
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
            return Err(DriverError::new(
                backend,
                DriverErrorKind::Communication,
                format!("Random failure on operation '{}'", operation),
            ));
        }

        Ok(())
    }

    /// Same scenarios and failure rates with fresh counters and no latched
    /// fault. Factories hand one fork to every board they build, so a fault
    /// on one device never spills over to another.
    pub fn fork(&self) -> Self {
        Self {
            failure_rates: self.failure_rates.clone(),
            scenarios: self.scenarios.clone(),
            rng: self.rng.clone(),
            state: Arc::new(Mutex::new(FaultState::default())),
        }
    }

    /// Clear counters and latched faults.
    pub fn reset(&self) {
        *self.state.lock() = FaultState::default();
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_never_fails() {
        let faults = FaultConfig::none();
        for _ in 0..100 {
            assert!(faults.check_operation("rtl", "set_gain").is_ok());
        }
    }

    #[test]
    fn fail_after_n() {
        let faults = FaultConfig::scenario(FaultScenario::FailAfterN {
            operation: "set_gain",
            count: 2,
        });
        assert!(faults.check_operation("rtl", "set_gain").is_ok());
        assert!(faults.check_operation("rtl", "set_gain").is_ok());
        assert!(faults.check_operation("rtl", "set_center_freq").is_ok());
        let err = faults.check_operation("rtl", "set_gain").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Hardware);
    }

    #[test]
    fn communication_loss_latches() {
        let faults = FaultConfig::scenario(FaultScenario::CommunicationLoss);
        let first = faults.check_operation("uhd", "get_gain").unwrap_err();
        assert_eq!(first.kind, DriverErrorKind::Communication);
        assert!(faults.check_operation("uhd", "set_gain").is_err());
        faults.reset();
        // Scenario re-arms after reset.
        assert!(faults.check_operation("uhd", "set_gain").is_err());
    }

    #[test]
    fn forks_keep_their_own_counters() {
        let faults = FaultConfig::scenario(FaultScenario::FailAfterN {
            operation: "set_center_freq",
            count: 1,
        });
        let first = faults.fork();
        let second = faults.fork();
        assert!(first.check_operation("rtl", "set_center_freq").is_ok());
        assert!(first.check_operation("rtl", "set_center_freq").is_err());
        assert!(second.check_operation("rtl", "set_center_freq").is_ok());

        let lost = FaultConfig::scenario(FaultScenario::CommunicationLoss);
        let board = lost.fork();
        assert!(board.check_operation("uhd", "get_gain").is_err());
        // The latch stays with the board that lost its link.
        assert!(!lost.fork().state.lock().communication_lost);
    }

    #[test]
    fn timeout_only_hits_named_operation() {
        let faults = FaultConfig::scenario(FaultScenario::Timeout {
            operation: "set_time_now",
        });
        assert!(faults.check_operation("uhd", "set_gain").is_ok());
        let err = faults.check_operation("uhd", "set_time_now").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Timeout);
    }

    #[test]
    fn random_failures_always() {
        let faults = FaultConfig::random_failures_seeded(1.0, Some(1));
        assert!(faults.check_operation("hackrf", "set_gain").is_err());
    }
}
