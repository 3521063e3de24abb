use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{info, warn};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::backend::GpioBackend;
use crate::error::GpioError;
use crate::gpio::{Direction, PinBinding, Value};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_BROADCAST_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct WatcherConfig {
    /// Delay between samples. Shorter intervals catch briefer pulses at the
    /// cost of CPU time.
    pub poll_interval: Duration,
    pub broadcast_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    Rising,
    Falling,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub pin: u32,
    pub edge: Edge,
    pub value: Value,
    pub timestamp_ms: u64,
}

impl ChangeEvent {
    fn new(pin: u32, value: Value) -> Self {
        Self {
            pin,
            edge: if value.is_on() {
                Edge::Rising
            } else {
                Edge::Falling
            },
            value,
            timestamp_ms: epoch_millis(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Running,
    Stopped,
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WatcherState::Idle => "idle",
            WatcherState::Running => "running",
            WatcherState::Stopped => "stopped",
        })
    }
}

type ChangeCallback = Box<dyn FnMut(ChangeEvent) + Send>;

#[derive(Default)]
struct CallbackSlot {
    callback: Option<ChangeCallback>,
    // bumped on every registration or removal
    generation: u64,
}

struct Shared {
    cancelled: Mutex<bool>,
    wake: Condvar,
    slot: Mutex<CallbackSlot>,
    event_tx: broadcast::Sender<ChangeEvent>,
    read_errors: AtomicU64,
}

impl Shared {
    fn new(broadcast_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(broadcast_capacity.max(1));
        Self {
            cancelled: Mutex::new(false),
            wake: Condvar::new(),
            slot: Mutex::new(CallbackSlot::default()),
            event_tx,
            read_errors: AtomicU64::new(0),
        }
    }

    /// Sleeps for `timeout` unless cancelled first. Returns whether the
    /// watcher has been cancelled.
    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = self.cancelled.lock();
        while !*cancelled {
            if self.wake.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        *cancelled
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.lock()
    }

    fn cancel(&self) {
        *self.cancelled.lock() = true;
        self.wake.notify_all();
    }

    fn replace_callback(&self, callback: Option<ChangeCallback>) {
        let mut slot = self.slot.lock();
        slot.callback = callback;
        slot.generation += 1;
    }

    /// Runs the callback outside the slot lock so it may register or clear
    /// callbacks itself. It is put back only if the slot was left untouched.
    fn dispatch(&self, event: ChangeEvent) {
        let taken = {
            let mut slot = self.slot.lock();
            let generation = slot.generation;
            slot.callback.take().map(|callback| (callback, generation))
        };
        if let Some((mut callback, generation)) = taken {
            callback(event.clone());
            let mut slot = self.slot.lock();
            if slot.generation == generation {
                slot.callback = Some(callback);
            }
        }
        let _ = self.event_tx.send(event);
    }
}

/// Polls an input [`PinBinding`] on a dedicated thread and reports every
/// observed transition.
///
/// The registered callback runs on the watcher thread. A failed sample is
/// logged and counted, the baseline is kept and polling continues with the
/// next interval.
pub struct ChangeWatcher<B: GpioBackend + ?Sized + 'static> {
    binding: Arc<PinBinding<B>>,
    config: WatcherConfig,
    shared: Arc<Shared>,
    state: WatcherState,
    worker: Option<JoinHandle<()>>,
}

impl<B: GpioBackend + ?Sized + 'static> ChangeWatcher<B> {
    pub fn new(binding: Arc<PinBinding<B>>) -> Result<Self, GpioError> {
        Self::with_config(binding, WatcherConfig::default())
    }

    pub fn with_config(
        binding: Arc<PinBinding<B>>,
        config: WatcherConfig,
    ) -> Result<Self, GpioError> {
        if binding.direction() != Direction::In {
            return Err(GpioError::DirectionMismatch {
                pin: binding.pin(),
                direction: binding.direction(),
                op: "watch",
            });
        }

        Ok(Self {
            binding,
            config,
            shared: Arc::new(Shared::new(config.broadcast_capacity)),
            state: WatcherState::Idle,
            worker: None,
        })
    }

    pub fn binding(&self) -> &Arc<PinBinding<B>> {
        &self.binding
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// Number of samples that failed since construction.
    pub fn error_count(&self) -> u64 {
        self.shared.read_errors.load(Ordering::Relaxed)
    }

    /// Registers the transition callback, replacing any previous one.
    pub fn set_on_change<F>(&self, callback: F)
    where
        F: FnMut(ChangeEvent) + Send + 'static,
    {
        self.shared.replace_callback(Some(Box::new(callback)));
    }

    pub fn clear_on_change(&self) {
        self.shared.replace_callback(None);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Samples the baseline and starts polling. Only an idle watcher can be
    /// started; a stopped one stays stopped.
    pub fn start(&mut self) -> Result<(), GpioError> {
        if self.state != WatcherState::Idle {
            return Err(self.state_error());
        }

        let baseline = self.binding.read()?;
        let binding = Arc::clone(&self.binding);
        let shared = Arc::clone(&self.shared);
        let interval = self.config.poll_interval;
        let pin = binding.pin();

        let handle = thread::Builder::new()
            .name(format!("gpio{pin}-watcher"))
            .spawn(move || poll_loop(&binding, &shared, interval, baseline))
            .map_err(GpioError::Spawn)?;

        self.worker = Some(handle);
        self.state = WatcherState::Running;
        info!("watching pin {pin} every {interval:?}, baseline {baseline}");
        Ok(())
    }

    /// Cancels polling and joins the watcher thread. No callback runs after
    /// this returns.
    pub fn stop(&mut self) -> Result<(), GpioError> {
        match self.state {
            WatcherState::Idle => Err(self.state_error()),
            WatcherState::Stopped => Ok(()),
            WatcherState::Running => {
                self.shared.cancel();
                if let Some(handle) = self.worker.take() {
                    if handle.join().is_err() {
                        warn!("watcher thread for pin {} panicked", self.binding.pin());
                    }
                }
                self.state = WatcherState::Stopped;
                info!("stopped watching pin {}", self.binding.pin());
                Ok(())
            }
        }
    }

    fn state_error(&self) -> GpioError {
        GpioError::WatcherState {
            pin: self.binding.pin(),
            state: self.state,
        }
    }
}

impl<B: GpioBackend + ?Sized + 'static> Drop for ChangeWatcher<B> {
    fn drop(&mut self) {
        if self.state == WatcherState::Running {
            let _ = self.stop();
        }
    }
}

fn poll_loop<B: GpioBackend + ?Sized>(
    binding: &PinBinding<B>,
    shared: &Shared,
    interval: Duration,
    mut last: Value,
) {
    while !shared.wait(interval) {
        let value = match binding.read() {
            Ok(v) => v,
            Err(e) => {
                shared.read_errors.fetch_add(1, Ordering::Relaxed);
                warn!("sample error for pin {}: {e}", binding.pin());
                continue;
            }
        };
        if value == last {
            continue;
        }
        if shared.is_cancelled() {
            break;
        }
        last = value;
        shared.dispatch(ChangeEvent::new(binding.pin(), value));
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
