//! Integration tests for waiting on motorized optics.
//!
//! Run under paused tokio time so settle and timeout durations are exact.

use photon_daq::acquisition::{ActuatorSynchronizer, TargetAssignment};
use photon_daq::error::DaqError;
use photon_daq::hardware::{MockMotorController, MotorController};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn targets(pairs: &[(u8, i64)]) -> TargetAssignment {
    pairs.iter().copied().collect()
}

#[tokio::test(start_paused = true)]
async fn test_target_within_tolerance_settles_immediately() {
    let motors = Arc::new(MockMotorController::new());
    let sync = ActuatorSynchronizer::new(motors.clone(), 4800);

    let start = Instant::now();
    // already within one step of the start position
    let report = sync
        .move_and_wait(&targets(&[(1, 1), (2, 0)]), Duration::from_secs(5))
        .await
        .unwrap();

    assert!(report.all_settled());
    assert!(start.elapsed() < Duration::from_millis(100));
    assert_eq!(report.actuators.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reachable_targets_settle_before_timeout() {
    let motors = Arc::new(MockMotorController::new().with_speed(4800.0));
    let sync = ActuatorSynchronizer::new(motors.clone(), 4800);

    // 2400 steps at 4800 steps/s
    let report = sync
        .move_and_wait(&targets(&[(2, 2400), (3, 600)]), Duration::from_secs(5))
        .await
        .unwrap();

    assert!(report.all_settled());
    assert!(report.elapsed >= Duration::from_millis(450));
    assert!(report.elapsed <= Duration::from_millis(600));
    for status in &report.actuators {
        let pos = status.final_position.unwrap();
        assert!((pos - status.target).abs() <= 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_target_reports_unsettled_at_timeout() {
    let motors = Arc::new(MockMotorController::new().with_stuck_motor(4));
    let sync = ActuatorSynchronizer::new(motors.clone(), 4800);

    let start = Instant::now();
    let report = sync
        .move_and_wait(&targets(&[(1, 1200), (4, 1200)]), Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(start.elapsed(), Duration::from_secs(5));
    assert!(!report.all_settled());
    assert_eq!(report.unsettled(), vec![4]);

    // the stuck motor's final position is still read and reported
    let stuck = report.actuators.iter().find(|a| a.motor == 4).unwrap();
    assert_eq!(stuck.final_position, Some(0));
    assert_eq!(motors.current_position(1).await.unwrap(), 1200);
}

#[tokio::test(start_paused = true)]
async fn test_slow_motor_times_out_then_continues_from_reached_position() {
    let motors = Arc::new(MockMotorController::new().with_speed(100.0));
    let sync = ActuatorSynchronizer::new(motors.clone(), 4800).with_poll_interval(Duration::from_millis(30));

    let report = sync
        .move_and_wait(&targets(&[(2, 1000)]), Duration::from_millis(1000))
        .await
        .unwrap();
    assert!(!report.all_settled());
    let reached = report.actuators[0].final_position.unwrap();
    assert!((95..=105).contains(&reached), "reached {reached}");
}

#[tokio::test(start_paused = true)]
async fn test_failed_position_reads_count_as_not_yet_settled() {
    // 2400 steps take 500 ms, but the first 20 reads (polls at 0..=950 ms) fail
    let motors = Arc::new(MockMotorController::new().with_failing_reads(2, 20));
    let sync = ActuatorSynchronizer::new(motors.clone(), 4800);

    let report = sync
        .move_and_wait(&targets(&[(2, 2400)]), Duration::from_secs(5))
        .await
        .unwrap();

    assert!(report.all_settled());
    assert!(report.elapsed >= Duration::from_millis(950), "{:?}", report.elapsed);
    assert!(report.elapsed <= Duration::from_millis(1100), "{:?}", report.elapsed);
    assert_eq!(report.actuators[0].final_position, Some(2400));
}

#[tokio::test(start_paused = true)]
async fn test_unreadable_motor_times_out_without_error() {
    let motors = Arc::new(MockMotorController::new().with_failing_reads(3, usize::MAX));
    let sync = ActuatorSynchronizer::new(motors.clone(), 4800);

    let start = Instant::now();
    let report = sync
        .move_and_wait(&targets(&[(1, 600), (3, 600)]), Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(start.elapsed(), Duration::from_secs(2));
    assert_eq!(report.unsettled(), vec![3]);
    let unreadable = report.actuators.iter().find(|a| a.motor == 3).unwrap();
    assert_eq!(unreadable.final_position, None);
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let motors = Arc::new(MockMotorController::new());
    let sync = ActuatorSynchronizer::new(motors, 4800);

    assert!(matches!(
        sync.move_and_wait(&TargetAssignment::new(), Duration::from_secs(1)).await,
        Err(DaqError::Configuration(_))
    ));
    assert!(matches!(
        sync.move_and_wait(&targets(&[(1, 10)]), Duration::ZERO).await,
        Err(DaqError::Configuration(_))
    ));
    // port 9 does not exist on the driver
    assert!(matches!(
        sync.move_and_wait(&targets(&[(9, 10)]), Duration::from_secs(1)).await,
        Err(DaqError::Instrument(_))
    ));
}
