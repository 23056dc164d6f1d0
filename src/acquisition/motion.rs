//! Actuator synchronizer.
//!
//! Sends every motor its target, then polls positions until all motors are
//! within tolerance or the timeout runs out. A motor that never arrives is
//! not an error: the run carries on from wherever the optic stopped, and the
//! returned [`SettleReport`] says which motors made it.

use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::MotorController;
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

/// Motor port number on the driver.
pub type MotorId = u8;

/// Motor port → target position in steps.
pub type TargetAssignment = BTreeMap<MotorId, i64>;

/// Convert an angle to the nearest motor step.
pub fn degrees_to_steps(degrees: f64, steps_per_revolution: u32) -> i64 {
    (degrees * f64::from(steps_per_revolution) / 360.0).round() as i64
}

/// Convert motor steps back to degrees.
pub fn steps_to_degrees(steps: i64, steps_per_revolution: u32) -> f64 {
    steps as f64 * 360.0 / f64::from(steps_per_revolution)
}

/// Outcome for one motor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActuatorStatus {
    /// Motor port
    pub motor: MotorId,
    /// Requested position in steps
    pub target: i64,
    /// Position read after waiting, if the read succeeded
    pub final_position: Option<i64>,
    /// Reached the target within tolerance before the timeout
    pub settled: bool,
}

/// Result of one [`ActuatorSynchronizer::move_and_wait`] call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettleReport {
    /// One entry per commanded motor, ordered by port
    pub actuators: Vec<ActuatorStatus>,
    /// Time spent waiting
    pub elapsed: Duration,
}

impl SettleReport {
    /// Every motor settled.
    pub fn all_settled(&self) -> bool {
        self.actuators.iter().all(|a| a.settled)
    }

    /// Motors that did not settle.
    pub fn unsettled(&self) -> Vec<MotorId> {
        self.actuators
            .iter()
            .filter(|a| !a.settled)
            .map(|a| a.motor)
            .collect()
    }
}

/// Drives a set of motors to a target assignment and waits for them.
pub struct ActuatorSynchronizer {
    driver: Arc<dyn MotorController>,
    steps_per_revolution: u32,
    tolerance_steps: i64,
    poll_interval: Duration,
}

impl ActuatorSynchronizer {
    /// Synchronizer with a one-step tolerance and 50 ms polling.
    pub fn new(driver: Arc<dyn MotorController>, steps_per_revolution: u32) -> Self {
        Self {
            driver,
            steps_per_revolution,
            tolerance_steps: 1,
            poll_interval: Duration::from_millis(50),
        }
    }

    /// Override the settle tolerance.
    pub fn with_tolerance(mut self, tolerance_steps: i64) -> Self {
        self.tolerance_steps = tolerance_steps;
        self
    }

    /// Override the position polling interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Move every motor in `targets` and wait up to `timeout` for all to settle.
    ///
    /// Errors only on invalid arguments or when a target cannot be issued.
    /// Motors still travelling at the timeout are reported unsettled and
    /// logged as a warning.
    pub async fn move_and_wait(
        &self,
        targets: &TargetAssignment,
        timeout: Duration,
    ) -> AppResult<SettleReport> {
        if targets.is_empty() {
            return Err(DaqError::Configuration(
                "move_and_wait needs at least one motor target".into(),
            ));
        }
        if timeout.is_zero() {
            return Err(DaqError::Configuration("settle timeout must be > 0".into()));
        }

        for (&motor, &steps) in targets {
            self.driver
                .set_target(motor, steps)
                .await
                .map_err(|e| DaqError::Instrument(format!("Cannot set motor {motor}: {e:#}")))?;
        }

        let start = Instant::now();
        let deadline = start + timeout;
        let mut settled: BTreeMap<MotorId, bool> = targets.keys().map(|&m| (m, false)).collect();

        loop {
            for (&motor, &target) in targets {
                if settled[&motor] {
                    continue;
                }
                match self.driver.current_position(motor).await {
                    Ok(pos) if (pos - target).abs() <= self.tolerance_steps => {
                        settled.insert(motor, true);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(motor, error = %e, "Position read failed while settling"),
                }
            }

            if settled.values().all(|&s| s) {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
        let elapsed = start.elapsed();

        let finals = join_all(targets.keys().map(|&m| self.driver.current_position(m))).await;
        let actuators: Vec<ActuatorStatus> = targets
            .iter()
            .zip(finals)
            .map(|((&motor, &target), read)| {
                let final_position = match read {
                    Ok(pos) => {
                        info!(
                            motor,
                            steps = pos,
                            degrees = %format!("{:.1}", steps_to_degrees(pos, self.steps_per_revolution)),
                            "Motor position"
                        );
                        Some(pos)
                    }
                    Err(e) => {
                        warn!(motor, error = %e, "Could not read final motor position");
                        None
                    }
                };
                ActuatorStatus {
                    motor,
                    target,
                    final_position,
                    settled: settled[&motor],
                }
            })
            .collect();

        let report = SettleReport { actuators, elapsed };
        if !report.all_settled() {
            warn!(
                motors = ?report.unsettled(),
                timeout = ?timeout,
                "Some motors timed out, continuing from the reached position"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degree_conversion_is_invertible_to_one_step() {
        for spr in [4800_u32, 3600, 1000] {
            let mut deg = 0.0;
            while deg <= 360.0 {
                let steps = degrees_to_steps(deg, spr);
                let back = steps_to_degrees(steps, spr);
                assert!((degrees_to_steps(back, spr) - steps).abs() <= 1);
                assert!((back - deg).abs() <= 360.0 / f64::from(spr));
                deg += 7.3;
            }
        }
    }

    #[test]
    fn degree_conversion_is_monotonic() {
        let mut last = i64::MIN;
        for tenth in 0..3600 {
            let steps = degrees_to_steps(f64::from(tenth) / 10.0, 4800);
            assert!(steps >= last);
            last = steps;
        }
        assert_eq!(degrees_to_steps(90.0, 4800), 1200);
    }

    #[test]
    fn report_lists_unsettled_motors() {
        let report = SettleReport {
            actuators: vec![
                ActuatorStatus {
                    motor: 1,
                    target: 10,
                    final_position: Some(10),
                    settled: true,
                },
                ActuatorStatus {
                    motor: 3,
                    target: 10,
                    final_position: Some(2),
                    settled: false,
                },
            ],
            elapsed: Duration::from_secs(5),
        };
        assert!(!report.all_settled());
        assert_eq!(report.unsettled(), vec![3]);
    }
}
