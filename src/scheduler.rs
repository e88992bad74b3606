//! Dual-rate scheduler
//!
//! Each enabled stream gets its own thread running a deadline loop. A tick
//! reads the sensor, builds a message stamped with the read time and hands it
//! to the stream's publisher. Failures are logged and counted, and the loop
//! carries on with the next deadline.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, info, warn};

use crate::config::SensorConfig;
use crate::error::{NodeError, Result};
use crate::messages::{build_inertial, build_magnetic, Message, INERTIAL_TOPIC, MAGNETIC_FIELD_TOPIC};
use crate::sensor::{Feature, MotionSensor, SensorHandle};
use crate::sink::{Publisher, Transport, DEFAULT_QUEUE_DEPTH};

/// A periodic sampling stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Inertial,
    Magnetometer,
}

impl Stream {
    /// Topic the stream publishes on
    pub fn topic(self) -> &'static str {
        match self {
            Stream::Inertial => INERTIAL_TOPIC,
            Stream::Magnetometer => MAGNETIC_FIELD_TOPIC,
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Inertial => f.write_str("inertial"),
            Stream::Magnetometer => f.write_str("magnetometer"),
        }
    }
}

/// Result of polling a [`TickSchedule`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Not due yet, wait this long
    Idle(Duration),
    /// Fire now; `skipped` deadlines were missed and coalesced into this one
    Due { skipped: u64 },
}

/// Fixed-period deadlines anchored at the start instant
///
/// Deadline `k` is always `start + k * period`, so lateness on one tick never
/// shifts the ones after it.
#[derive(Debug, Clone)]
pub struct TickSchedule {
    period: Duration,
    next: Instant,
}

impl TickSchedule {
    /// First deadline is one period after `start`
    pub fn new(period: Duration, start: Instant) -> Self {
        debug_assert!(!period.is_zero(), "tick period must be non-zero");
        Self {
            period,
            next: start + period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn next_deadline(&self) -> Instant {
        self.next
    }

    /// Check the schedule against `now`, advancing past every elapsed deadline
    pub fn poll(&mut self, now: Instant) -> Tick {
        if now < self.next {
            return Tick::Idle(self.next - now);
        }

        let period_ns = self.period.as_nanos().max(1);
        let skipped = ((now - self.next).as_nanos() / period_ns) as u64;
        let advance = period_ns.saturating_mul(u128::from(skipped) + 1);
        self.next += Duration::from_nanos(u64::try_from(advance).unwrap_or(u64::MAX));

        Tick::Due { skipped }
    }
}

/// Counters for one stream
#[derive(Debug, Default)]
pub struct StreamStats {
    ticks: AtomicU64,
    published: AtomicU64,
    read_errors: AtomicU64,
    publish_errors: AtomicU64,
    overruns: AtomicU64,
}

/// Point-in-time copy of [`StreamStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub ticks: u64,
    pub published: u64,
    pub read_errors: u64,
    pub publish_errors: u64,
    /// Deadlines coalesced because a tick ran late
    pub overruns: u64,
}

impl StreamStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ticks, {} published, {} read errors, {} publish errors, {} overruns",
            self.ticks, self.published, self.read_errors, self.publish_errors, self.overruns
        )
    }
}

/// Stops a running scheduler from another thread
///
/// Cheap to clone, so it can be moved into a Ctrl+C handler.
#[derive(Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
    threads: Vec<Thread>,
}

impl StopHandle {
    /// Clear the running flag and wake every sleeping stream
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        for thread in &self.threads {
            thread.unpark();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Per-tick work of one stream
struct StreamTask<S> {
    stream: Stream,
    sensor: Arc<SensorHandle<S>>,
    publisher: Box<dyn Publisher>,
    stats: Arc<StreamStats>,
    failing_since: Option<u64>,
}

impl<S: MotionSensor> StreamTask<S> {
    fn sample(&self) -> Result<Message> {
        let message = match self.stream {
            Stream::Inertial => {
                let sample = self.sensor.read_inertial()?;
                build_inertial(&sample, Utc::now()).into()
            }
            Stream::Magnetometer => {
                let sample = self.sensor.read_magnetic()?;
                build_magnetic(&sample, Utc::now()).into()
            }
        };
        Ok(message)
    }

    fn tick(&mut self) {
        let tick = self.stats.ticks.fetch_add(1, Ordering::Relaxed) + 1;

        let outcome = self.sample().and_then(|message| {
            self.publisher.publish(message).map_err(|e| {
                self.stats.publish_errors.fetch_add(1, Ordering::Relaxed);
                e
            })
        });

        match outcome {
            Ok(()) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                if let Some(first) = self.failing_since.take() {
                    info!(
                        "{} stream recovered after {} failed ticks",
                        self.stream,
                        tick - first
                    );
                }
            }
            Err(e) => {
                if matches!(e, NodeError::DeviceRead(_)) {
                    self.stats.read_errors.fetch_add(1, Ordering::Relaxed);
                }
                // warn once per run of failures, then keep quiet until recovery
                if self.failing_since.is_none() {
                    warn!("{} tick {} skipped: {}", self.stream, tick, e);
                    self.failing_since = Some(tick);
                } else {
                    debug!("{} tick {} skipped: {}", self.stream, tick, e);
                }
            }
        }
    }
}

fn run_stream<S: MotionSensor>(mut task: StreamTask<S>, period: Duration, running: Arc<AtomicBool>) {
    let mut schedule = TickSchedule::new(period, Instant::now());
    debug!("{} stream armed, period {:?}", task.stream, period);

    while running.load(Ordering::Acquire) {
        match schedule.poll(Instant::now()) {
            Tick::Idle(wait) => thread::park_timeout(wait),
            Tick::Due { skipped } => {
                if skipped > 0 {
                    task.stats.overruns.fetch_add(skipped, Ordering::Relaxed);
                    warn!("{} stream overran, {} ticks coalesced", task.stream, skipped);
                }
                task.tick();
            }
        }
    }

    debug!("{} stream stopped", task.stream);
}

struct Worker {
    stream: Stream,
    stats: Arc<StreamStats>,
    handle: Option<JoinHandle<()>>,
}

/// Owns the stream threads and the shared sensor
pub struct Scheduler<S: MotionSensor> {
    sensor: Arc<SensorHandle<S>>,
    running: Arc<AtomicBool>,
    workers: Vec<Worker>,
}

impl<S: MotionSensor + Send + 'static> Scheduler<S> {
    /// Create the publishers for every enabled stream and arm their threads
    ///
    /// The magnetometer topic is only created when the magnetometer stream is
    /// enabled, and that stream is refused unless the sensor was initialized
    /// with the magnetic field feature. Publishers are created before any thread starts, so a
    /// failure leaves nothing running.
    pub fn start<T>(config: &SensorConfig, sensor: Arc<SensorHandle<S>>, transport: &T) -> Result<Self>
    where
        T: Transport + ?Sized,
    {
        config.validate()?;
        if config.enable_magnetometer && !sensor.enabled_features().contains(Feature::MagneticField) {
            return Err(NodeError::Config(
                "magnetometer stream enabled but the sensor was initialized without the magnetic field feature"
                    .into(),
            ));
        }

        let mut plans = Vec::new();
        if config.enable_inertial {
            plans.push((Stream::Inertial, config.inertial_period()));
        }
        if config.enable_magnetometer {
            plans.push((Stream::Magnetometer, config.magnetometer_period()));
        }

        let mut publishers = Vec::with_capacity(plans.len());
        for &(stream, _) in &plans {
            publishers.push(transport.create_publisher(stream.topic(), DEFAULT_QUEUE_DEPTH)?);
        }

        if plans.is_empty() {
            warn!("No streams enabled, nothing will be published");
        }

        let mut scheduler = Self {
            sensor,
            running: Arc::new(AtomicBool::new(true)),
            workers: Vec::with_capacity(plans.len()),
        };

        for ((stream, period), publisher) in plans.into_iter().zip(publishers) {
            let stats = Arc::new(StreamStats::default());
            let task = StreamTask {
                stream,
                sensor: Arc::clone(&scheduler.sensor),
                publisher,
                stats: Arc::clone(&stats),
                failing_since: None,
            };
            let running = Arc::clone(&scheduler.running);

            let spawned = thread::Builder::new()
                .name(format!("{}-stream", stream))
                .spawn(move || run_stream(task, period, running));

            match spawned {
                Ok(handle) => scheduler.workers.push(Worker {
                    stream,
                    stats,
                    handle: Some(handle),
                }),
                Err(e) => {
                    scheduler.shutdown();
                    return Err(NodeError::Startup(format!("{} stream thread: {}", stream, e)));
                }
            }
            info!("{} stream publishing on {} at {} Hz", stream, stream.topic(), rate_of(config, stream));
        }

        Ok(scheduler)
    }
}

impl<S: MotionSensor> Scheduler<S> {
    /// Streams that were armed, in start order
    pub fn streams(&self) -> Vec<Stream> {
        self.workers.iter().map(|w| w.stream).collect()
    }

    /// Current counters of a stream, `None` if it was never armed
    pub fn stats(&self, stream: Stream) -> Option<StatsSnapshot> {
        self.workers
            .iter()
            .find(|w| w.stream == stream)
            .map(|w| w.stats.snapshot())
    }

    /// Handle that can stop the streams without owning the scheduler
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: Arc::clone(&self.running),
            threads: self
                .workers
                .iter()
                .filter_map(|w| w.handle.as_ref().map(|h| h.thread().clone()))
                .collect(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop and join every stream, then release the sensor
    ///
    /// Safe to call more than once and while a tick is in flight: the tick
    /// completes its read before the sensor goes away. Returns the final
    /// counters of every armed stream.
    pub fn shutdown(&mut self) -> Vec<(Stream, StatsSnapshot)> {
        self.stop_handle().stop();

        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    warn!("{} stream thread panicked", worker.stream);
                }
            }
        }

        self.sensor.release();

        self.workers
            .iter()
            .map(|w| (w.stream, w.stats.snapshot()))
            .collect()
    }
}

impl<S: MotionSensor> Drop for Scheduler<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn rate_of(config: &SensorConfig, stream: Stream) -> f64 {
    match stream {
        Stream::Inertial => config.inertial_rate_hz,
        Stream::Magnetometer => config.magnetometer_rate_hz,
    }
}
