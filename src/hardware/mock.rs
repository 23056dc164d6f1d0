//! Mock Hardware Implementations
//!
//! Simulated counting unit and motor driver for running experiments without
//! the apparatus. All mock devices use async-safe operations
//! (tokio::time::sleep, not std::thread::sleep) and read `tokio::time::Instant`,
//! so tests can run them under paused time.
//!
//! # Available Mocks
//!
//! - `MockMotorController` - stepper driver that moves at a fixed speed
//! - `MockCountSource` - counting unit that pushes one event per channel per window
//! - `MockDeviceLink` - connection lifecycle, optionally refusing to connect
//!
//! Count values come from a [`CountModel`]: either fixed per channel
//! ([`FixedCounts`]) or derived from a polarization state and the optics the
//! motors currently hold ([`StateCounts`]).

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info};

use crate::acquisition::latch::{ChannelLatch, CountEvent};
use crate::acquisition::motion::{steps_to_degrees, MotorId};
use crate::analysis::tomography::DensityMatrix;
use crate::config::MotionConfig;
use crate::experiment::{Channel, Component, Projection};
use crate::hardware::capabilities::{CountSource, DeviceLink, MotorController};

// =============================================================================
// MockMotorController - Simulated Stepper Driver
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Travel {
    from: i64,
    to: i64,
    started: Instant,
}

/// Mock stepper driver with linear motion
///
/// Simulates a four-port driver with:
/// - 4800 steps/sec motion speed (one revolution per second)
/// - Optional stuck ports that accept targets but never move
/// - Optional position reads that fail a set number of times
/// - A log of every commanded target
///
/// # Example
///
/// ```rust,ignore
/// let motors = MockMotorController::new();
/// motors.set_target(2, 1200).await?;
/// // position is interpolated from elapsed time
/// let pos = motors.current_position(2).await?;
/// ```
pub struct MockMotorController {
    travel: Arc<RwLock<HashMap<MotorId, Travel>>>,
    history: Arc<RwLock<Vec<(MotorId, i64)>>>,
    stuck: HashSet<MotorId>,
    failing_reads: Mutex<HashMap<MotorId, usize>>,
    ports: Vec<MotorId>,
    speed_steps_per_sec: f64,
}

impl MockMotorController {
    /// Ports 1-4, all at step 0
    pub fn new() -> Self {
        Self {
            travel: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(Vec::new())),
            stuck: HashSet::new(),
            failing_reads: Mutex::new(HashMap::new()),
            ports: vec![1, 2, 3, 4],
            speed_steps_per_sec: 4800.0,
        }
    }

    /// Override the motion speed
    ///
    /// # Arguments
    /// * `speed_steps_per_sec` - Steps travelled per second
    pub fn with_speed(mut self, speed_steps_per_sec: f64) -> Self {
        self.speed_steps_per_sec = speed_steps_per_sec;
        self
    }

    /// Make `motor` ignore every target
    pub fn with_stuck_motor(mut self, motor: MotorId) -> Self {
        self.stuck.insert(motor);
        self
    }

    /// Fail the next `reads` position reads of `motor`
    pub fn with_failing_reads(mut self, motor: MotorId, reads: usize) -> Self {
        self.failing_reads
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(motor, reads);
        self
    }

    fn consume_read_failure(&self, motor: MotorId) -> bool {
        let mut failing = self.failing_reads.lock().unwrap_or_else(PoisonError::into_inner);
        match failing.get_mut(&motor) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }

    fn position_at(&self, travel: Option<&Travel>, now: Instant) -> i64 {
        let Some(t) = travel else {
            return 0;
        };
        let distance = t.to - t.from;
        let covered = (now.duration_since(t.started).as_secs_f64() * self.speed_steps_per_sec) as i64;
        if covered >= distance.abs() {
            t.to
        } else {
            t.from + distance.signum() * covered
        }
    }

    /// Current position of every port that has moved
    pub async fn positions(&self) -> BTreeMap<MotorId, i64> {
        let now = Instant::now();
        let travel = self.travel.read().await;
        self.ports
            .iter()
            .map(|&m| (m, self.position_at(travel.get(&m), now)))
            .collect()
    }

    /// Every `(motor, steps)` target issued, oldest first
    pub async fn history(&self) -> Vec<(MotorId, i64)> {
        self.history.read().await.clone()
    }
}

impl Default for MockMotorController {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MotorController for MockMotorController {
    async fn set_target(&self, motor: MotorId, steps: i64) -> Result<()> {
        if !self.ports.contains(&motor) {
            bail!("MockMotorController: no motor on port {motor}");
        }
        self.history.write().await.push((motor, steps));
        if self.stuck.contains(&motor) {
            debug!(motor, steps, "MockMotorController: motor is stuck, ignoring target");
            return Ok(());
        }

        let now = Instant::now();
        let mut travel = self.travel.write().await;
        let from = self.position_at(travel.get(&motor), now);
        debug!(motor, from, to = steps, "MockMotorController: moving");
        travel.insert(
            motor,
            Travel {
                from,
                to: steps,
                started: now,
            },
        );
        Ok(())
    }

    async fn current_position(&self, motor: MotorId) -> Result<i64> {
        if !self.ports.contains(&motor) {
            return Err(anyhow!("MockMotorController: no motor on port {motor}"));
        }
        if self.consume_read_failure(motor) {
            bail!("MockMotorController: no reply from port {motor}");
        }
        let travel = self.travel.read().await;
        Ok(self.position_at(travel.get(&motor), Instant::now()))
    }
}

// =============================================================================
// Count models
// =============================================================================

/// Expected counts per window for the optics currently in place.
pub trait CountModel: Send + Sync {
    /// Mean count on `channel`. `optics[k]` is the projection qubit `k` is
    /// set to, `None` when its optics are not at a known projection.
    fn mean_counts(&self, channel: Channel, optics: &[Option<Projection>]) -> f64;
}

/// Same count on a channel regardless of the optics.
#[derive(Debug, Clone, Default)]
pub struct FixedCounts {
    counts: HashMap<Channel, f64>,
}

impl FixedCounts {
    /// Every channel reports `count`
    pub fn uniform(count: f64) -> Self {
        Self {
            counts: Channel::ALL.into_iter().map(|c| (c, count)).collect(),
        }
    }

    /// Set the count of one channel
    pub fn with(mut self, channel: Channel, count: f64) -> Self {
        self.counts.insert(channel, count);
        self
    }
}

impl CountModel for FixedCounts {
    fn mean_counts(&self, channel: Channel, _optics: &[Option<Projection>]) -> f64 {
        self.counts.get(&channel).copied().unwrap_or(0.0)
    }
}

/// Counts of a source emitting photons (or pairs) in state `rho`.
///
/// APD 1 sees qubit 1 and APD 2 sees qubit 2 behind their own optics;
/// coincidences between them follow the joint outcome probability. Every
/// other channel only sees the background.
#[derive(Debug, Clone)]
pub struct StateCounts {
    rho: DensityMatrix,
    rate: f64,
    background: f64,
}

impl StateCounts {
    /// `rate` photons (or pairs) per window in state `rho`
    pub fn new(rho: DensityMatrix, rate: f64) -> Self {
        Self {
            rho,
            rate,
            background: 0.0,
        }
    }

    /// Add `background` counts to every channel
    pub fn with_background(mut self, background: f64) -> Self {
        self.background = background;
        self
    }

    fn qubits(&self) -> usize {
        self.rho.dim().trailing_zeros() as usize
    }

    /// Probability of passing the optics on the qubits in `observed`.
    fn probability(&self, optics: &[Option<Projection>], observed: &[usize]) -> f64 {
        let projector = (0..self.qubits())
            .map(|k| match optics.get(k).copied().flatten() {
                Some(p) if observed.contains(&k) => DensityMatrix::from_projections(&[p]),
                _ => DensityMatrix::identity(2),
            })
            .reduce(|acc, m| acc.kron(&m))
            .unwrap_or_else(|| DensityMatrix::identity(1));
        self.rho.matmul(&projector).trace().re
    }
}

impl CountModel for StateCounts {
    fn mean_counts(&self, channel: Channel, optics: &[Option<Projection>]) -> f64 {
        let signal = match channel {
            Channel::Ch1 => self.rate * self.probability(optics, &[0]),
            Channel::Ch2 if self.qubits() > 1 => self.rate * self.probability(optics, &[1]),
            Channel::Coinc12 if self.qubits() > 1 => self.rate * self.probability(optics, &[0, 1]),
            _ => 0.0,
        };
        signal + self.background
    }
}

// =============================================================================
// MockCountSource - Simulated Counting Unit
// =============================================================================

/// Optics a count source reads back from a mock driver.
#[derive(Clone)]
struct OpticsProbe {
    motors: Arc<MockMotorController>,
    motion: MotionConfig,
}

impl OpticsProbe {
    async fn projections(&self) -> Vec<Option<Projection>> {
        let positions = self.motors.positions().await;
        let degrees = |component: Component| {
            let port = self.motion.ports.port(component);
            positions
                .get(&port)
                .map(|&steps| steps_to_degrees(steps, self.motion.steps_per_revolution))
        };
        (0..2)
            .map(|qubit| {
                let (qwp, pol) = Component::for_qubit(qubit)?;
                Projection::from_angles(degrees(qwp)?, degrees(pol)?, 0.5)
            })
            .collect()
    }
}

/// Mock counting unit
///
/// Once registered, a background task publishes one event per channel every
/// `window`, like the real unit's callback thread. Values are the model's
/// mean plus optional uniform noise of `noise · √mean`.
pub struct MockCountSource {
    model: Arc<dyn CountModel>,
    optics: Option<OpticsProbe>,
    window: Duration,
    noise: f64,
    producer: Mutex<Option<JoinHandle<()>>>,
}

impl MockCountSource {
    /// Source emitting counts from `model` every 100 ms
    pub fn new(model: Arc<dyn CountModel>) -> Self {
        Self {
            model,
            optics: None,
            window: Duration::from_millis(100),
            noise: 0.0,
            producer: Mutex::new(None),
        }
    }

    /// Read the optics from `motors` to feed the model
    pub fn with_optics(mut self, motors: Arc<MockMotorController>, motion: MotionConfig) -> Self {
        self.optics = Some(OpticsProbe { motors, motion });
        self
    }

    /// Override the counting window
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Add shot-noise-like jitter
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise;
        self
    }

    /// Whether the producer task is running
    pub fn is_running(&self) -> bool {
        self.producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl CountSource for MockCountSource {
    fn register(&self, latch: Arc<ChannelLatch>) -> Result<()> {
        let mut producer = self.producer.lock().unwrap_or_else(PoisonError::into_inner);
        if producer.is_some() {
            bail!("MockCountSource: already registered");
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow!("MockCountSource: no async runtime: {e}"))?;

        let model = Arc::clone(&self.model);
        let optics = self.optics.clone();
        let window = self.window;
        let noise = self.noise;
        *producer = Some(runtime.spawn(async move {
            let mut index: i32 = 0;
            loop {
                sleep(window).await;
                let projections = match &optics {
                    Some(probe) => probe.projections().await,
                    None => Vec::new(),
                };
                for channel in Channel::ALL {
                    let mean = model.mean_counts(channel, &projections);
                    let jitter = if noise > 0.0 {
                        rand::thread_rng().gen_range(-1.0..=1.0) * noise * mean.max(0.0).sqrt()
                    } else {
                        0.0
                    };
                    let value = (mean + jitter).round().max(0.0) as i64;
                    latch.on_event(&CountEvent::single(channel, index, value));
                }
                index = index.wrapping_add(1);
            }
        }));
        info!(window = ?self.window, "MockCountSource: registered");
        Ok(())
    }

    fn unregister(&self) -> Result<()> {
        if let Some(handle) = self
            .producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
            info!("MockCountSource: unregistered");
        }
        Ok(())
    }
}

impl Drop for MockCountSource {
    fn drop(&mut self) {
        let _ = self.unregister();
    }
}

// =============================================================================
// MockDeviceLink - Simulated Connection
// =============================================================================

/// Mock device link
pub struct MockDeviceLink {
    connected: AtomicBool,
    refuse: Option<String>,
}

impl MockDeviceLink {
    /// Link that always connects
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            refuse: None,
        }
    }

    /// Link whose `connect` fails with `reason`
    pub fn refusing(reason: impl Into<String>) -> Self {
        Self {
            connected: AtomicBool::new(false),
            refuse: Some(reason.into()),
        }
    }
}

impl Default for MockDeviceLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceLink for MockDeviceLink {
    async fn connect(&self, address: &str) -> Result<()> {
        if let Some(reason) = &self.refuse {
            bail!("{reason}");
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(address, "MockDeviceLink: connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            bail!("MockDeviceLink: not connected");
        }
        info!("MockDeviceLink: disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_mock_motor_moves_at_speed() {
        let motors = MockMotorController::new().with_speed(1000.0);
        motors.set_target(2, 500).await.unwrap();

        sleep(Duration::from_millis(200)).await;
        assert_eq!(motors.current_position(2).await.unwrap(), 200);

        sleep(Duration::from_millis(400)).await;
        assert_eq!(motors.current_position(2).await.unwrap(), 500);

        // reverse from where it stands
        motors.set_target(2, 0).await.unwrap();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(motors.current_position(2).await.unwrap(), 400);
    }

    #[tokio::test]
    async fn test_mock_motor_stuck_and_unknown_ports() {
        let motors = MockMotorController::new().with_stuck_motor(3);
        motors.set_target(3, 900).await.unwrap();
        assert_eq!(motors.current_position(3).await.unwrap(), 0);
        assert_eq!(motors.history().await, vec![(3, 900)]);

        assert!(motors.set_target(7, 1).await.is_err());
        assert!(motors.current_position(0).await.is_err());
    }

    #[test]
    fn test_state_counts_follow_projections() {
        let rho = DensityMatrix::from_projections(&[Projection::H, Projection::P]);
        let model = StateCounts::new(rho, 1000.0).with_background(2.0);

        let hp = [Some(Projection::H), Some(Projection::P)];
        let vp = [Some(Projection::V), Some(Projection::P)];
        let hr = [Some(Projection::H), Some(Projection::R)];
        assert!((model.mean_counts(Channel::Coinc12, &hp) - 1002.0).abs() < 1e-9);
        assert!((model.mean_counts(Channel::Coinc12, &vp) - 2.0).abs() < 1e-9);
        assert!((model.mean_counts(Channel::Coinc12, &hr) - 502.0).abs() < 1e-9);
        assert!((model.mean_counts(Channel::Ch1, &vp) - 2.0).abs() < 1e-9);
        assert!((model.mean_counts(Channel::Ch2, &vp) - 1002.0).abs() < 1e-9);
        assert_eq!(model.mean_counts(Channel::Ch4, &hp), 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_count_source_publishes_until_unregistered() {
        let latch = Arc::new(ChannelLatch::new([Channel::Ch1, Channel::Ch3]));
        let source = MockCountSource::new(Arc::new(
            FixedCounts::uniform(5.0).with(Channel::Ch3, 9.0),
        ));
        source.register(Arc::clone(&latch)).unwrap();
        assert!(source.register(Arc::clone(&latch)).is_err());

        let values = latch
            .take_all(&[Channel::Ch1, Channel::Ch3], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(values, vec![5, 9]);

        source.unregister().unwrap();
        tokio::task::yield_now().await;
        assert!(!source.is_running());
        latch.clear();
        assert!(latch
            .take_all(&[Channel::Ch1], Duration::from_millis(300))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_mock_device_link() {
        let link = MockDeviceLink::new();
        link.connect("192.168.0.1").await.unwrap();
        assert!(link.is_connected());
        link.disconnect().await.unwrap();
        assert!(!link.is_connected());
        assert!(link.disconnect().await.is_err());

        let refusing = MockDeviceLink::refusing("no route to host");
        let err = refusing.connect("10.0.0.1").await.unwrap_err();
        assert_eq!(err.to_string(), "no route to host");
        assert!(!refusing.is_connected());
    }
}
