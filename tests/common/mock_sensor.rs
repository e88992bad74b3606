//! Instrumented mock motion sensor for scheduler tests

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bno08x_imu_node::{Feature, MotionSensor, SensorError};

/// Shared state the test inspects while the sensor is owned by the node
#[derive(Debug, Default)]
pub struct BusMonitor {
    in_flight: AtomicBool,
    /// Transactions that started while another was in flight
    pub overlaps: AtomicU64,
    /// `(start, end)` of every transaction
    pub windows: Mutex<Vec<(Instant, Instant)>>,

    pub inertial_reads: AtomicU64,
    pub magnetic_reads: AtomicU64,
    pub enabled: Mutex<Vec<(Feature, Duration)>>,

    /// Number of upcoming acceleration reads that fail
    pub fail_acceleration: AtomicU64,
    /// Number of upcoming magnetic field reads that fail
    pub fail_magnetic: AtomicU64,
    pub dropped: AtomicBool,
}

impl BusMonitor {
    pub fn enabled_features(&self) -> Vec<Feature> {
        self.enabled.lock().unwrap().iter().map(|(f, _)| *f).collect()
    }

    /// Check that no two recorded windows overlap
    pub fn assert_no_overlap(&self) {
        assert_eq!(self.overlaps.load(Ordering::SeqCst), 0);

        let mut windows = self.windows.lock().unwrap().clone();
        windows.sort_by_key(|(start, _)| *start);
        for pair in windows.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "bus windows overlap: {:?}", pair);
        }
    }
}

/// Take one failure from a counter, returning whether one was pending
fn take_failure(counter: &AtomicU64) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Fake sensor whose every accessor is a timed bus transaction
pub struct MockSensor {
    pub bus: Arc<BusMonitor>,
    pub acceleration: [f64; 3],
    pub angular_velocity: [f64; 3],
    pub orientation: [f64; 4],
    pub magnetic_field: [f64; 3],
    /// Time each transaction holds the bus
    pub transaction_time: Duration,
}

impl MockSensor {
    pub fn new() -> (Self, Arc<BusMonitor>) {
        let bus = Arc::new(BusMonitor::default());
        let sensor = Self {
            bus: Arc::clone(&bus),
            acceleration: [1.0, 2.0, 3.0],
            angular_velocity: [0.1, 0.2, 0.3],
            orientation: [0.0, 0.0, 0.0, 1.0],
            magnetic_field: [20.0, -5.0, 42.5],
            transaction_time: Duration::from_micros(100),
        };
        (sensor, bus)
    }

    fn transaction<T>(&self, value: T) -> T {
        let start = Instant::now();
        if self.bus.in_flight.swap(true, Ordering::SeqCst) {
            self.bus.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        thread::sleep(self.transaction_time);
        self.bus.in_flight.store(false, Ordering::SeqCst);
        let end = Instant::now();
        self.bus.windows.lock().unwrap().push((start, end));
        value
    }
}

impl Drop for MockSensor {
    fn drop(&mut self) {
        self.bus.dropped.store(true, Ordering::SeqCst);
    }
}

impl MotionSensor for MockSensor {
    fn enable_feature(&mut self, feature: Feature, interval: Duration) -> Result<(), SensorError> {
        self.bus.enabled.lock().unwrap().push((feature, interval));
        Ok(())
    }

    fn read_acceleration(&mut self) -> Result<[f64; 3], SensorError> {
        self.bus.inertial_reads.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.bus.fail_acceleration) {
            return self.transaction(Err(SensorError::Bus("simulated NACK".into())));
        }
        self.transaction(Ok(self.acceleration))
    }

    fn read_angular_velocity(&mut self) -> Result<[f64; 3], SensorError> {
        self.transaction(Ok(self.angular_velocity))
    }

    fn read_orientation(&mut self) -> Result<[f64; 4], SensorError> {
        self.transaction(Ok(self.orientation))
    }

    fn read_magnetic_field(&mut self) -> Result<[f64; 3], SensorError> {
        self.bus.magnetic_reads.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.bus.fail_magnetic) {
            return self.transaction(Err(SensorError::Bus("simulated NACK".into())));
        }
        self.transaction(Ok(self.magnetic_field))
    }
}
