use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use gpiowatch::{
    ChangeEvent, ChangeWatcher, Direction, Edge, GpioError, MockGpioBackend, PinBinding, Value,
    WatcherConfig, WatcherState,
};

const PIN: u32 = 20;
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

fn fast() -> WatcherConfig {
    WatcherConfig {
        poll_interval: Duration::from_millis(5),
        ..WatcherConfig::default()
    }
}

fn open_input(backend: &Arc<MockGpioBackend>) -> Arc<PinBinding<MockGpioBackend>> {
    let binding = Arc::new(PinBinding::new(backend.clone(), PIN, Direction::In));
    binding.open().unwrap();
    binding
}

fn forward_events(watcher: &ChangeWatcher<MockGpioBackend>) -> Receiver<ChangeEvent> {
    let (tx, rx) = mpsc::channel();
    watcher.set_on_change(move |event| {
        let _ = tx.send(event);
    });
    rx
}

fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + RECV_TIMEOUT;
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn reports_each_transition_once_in_order() {
    let backend = Arc::new(MockGpioBackend::default());
    let binding = open_input(&backend);
    backend.set_input_sequence(PIN, [Value::Off, Value::Off, Value::On, Value::On, Value::Off]);

    let mut watcher = ChangeWatcher::with_config(binding, fast()).unwrap();
    let events = forward_events(&watcher);
    watcher.start().unwrap();

    let first = events.recv_timeout(RECV_TIMEOUT).unwrap();
    let second = events.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!((first.pin, first.edge, first.value), (PIN, Edge::Rising, Value::On));
    assert_eq!((second.pin, second.edge, second.value), (PIN, Edge::Falling, Value::Off));
    assert!(first.timestamp_ms <= second.timestamp_ms);

    let reads = backend.read_count(PIN);
    wait_until(|| backend.read_count(PIN) > reads + 5);
    watcher.stop().unwrap();
    assert!(events.try_recv().is_err());
}

#[test]
fn stop_right_after_start_is_prompt_and_silent() {
    let backend = Arc::new(MockGpioBackend::default());
    let binding = open_input(&backend);
    backend.set_input_sequence(PIN, [Value::Off, Value::On]);

    let interval = Duration::from_millis(500);
    let mut watcher = ChangeWatcher::with_config(
        binding,
        WatcherConfig {
            poll_interval: interval,
            ..WatcherConfig::default()
        },
    )
    .unwrap();
    let events = forward_events(&watcher);
    watcher.start().unwrap();

    let started = Instant::now();
    watcher.stop().unwrap();
    assert!(started.elapsed() < interval);
    assert_eq!(watcher.state(), WatcherState::Stopped);
    assert_eq!(backend.read_count(PIN), 1);
    assert!(events.try_recv().is_err());
}

#[test]
fn output_pin_cannot_be_watched() {
    let backend = Arc::new(MockGpioBackend::default());
    let output = Arc::new(PinBinding::new(backend, 26, Direction::Out));
    assert!(matches!(
        ChangeWatcher::new(output),
        Err(GpioError::DirectionMismatch { pin: 26, op: "watch", .. })
    ));
}

#[test]
fn lifecycle_is_idle_running_stopped() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut watcher = ChangeWatcher::with_config(open_input(&backend), fast()).unwrap();
    assert_eq!(watcher.state(), WatcherState::Idle);
    assert!(matches!(
        watcher.stop(),
        Err(GpioError::WatcherState { state: WatcherState::Idle, .. })
    ));

    watcher.start().unwrap();
    assert_eq!(watcher.state(), WatcherState::Running);
    assert!(matches!(
        watcher.start(),
        Err(GpioError::WatcherState { state: WatcherState::Running, .. })
    ));

    watcher.stop().unwrap();
    watcher.stop().unwrap();
    assert!(matches!(
        watcher.start(),
        Err(GpioError::WatcherState { state: WatcherState::Stopped, .. })
    ));
}

#[test]
fn failed_baseline_leaves_watcher_idle() {
    let backend = Arc::new(MockGpioBackend::default());
    let binding = Arc::new(PinBinding::new(backend.clone(), PIN, Direction::In));
    let mut watcher = ChangeWatcher::with_config(binding.clone(), fast()).unwrap();

    assert!(matches!(watcher.start(), Err(GpioError::NotOpen(PIN))));
    assert_eq!(watcher.state(), WatcherState::Idle);

    binding.open().unwrap();
    watcher.start().unwrap();
    assert_eq!(watcher.state(), WatcherState::Running);
}

#[test]
fn baseline_is_taken_at_start() {
    let backend = Arc::new(MockGpioBackend::default());
    let binding = open_input(&backend);
    let mut watcher = ChangeWatcher::with_config(binding.clone(), fast()).unwrap();
    let events = forward_events(&watcher);

    backend.set_value(PIN, Value::On);
    watcher.start().unwrap();
    assert_eq!(binding.value(), Value::On);

    backend.set_value(PIN, Value::Off);
    let event = events.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(event.edge, Edge::Falling);
    watcher.stop().unwrap();
    assert!(events.try_recv().is_err());
}

#[test]
fn registering_again_replaces_callback() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut watcher = ChangeWatcher::with_config(open_input(&backend), fast()).unwrap();
    let replaced = forward_events(&watcher);
    let current = forward_events(&watcher);
    watcher.start().unwrap();

    backend.set_value(PIN, Value::On);
    assert_eq!(current.recv_timeout(RECV_TIMEOUT).unwrap().edge, Edge::Rising);
    watcher.stop().unwrap();
    assert!(replaced.try_recv().is_err());
}

#[test]
fn callback_can_clear_itself() {
    let backend = Arc::new(MockGpioBackend::default());
    let binding = open_input(&backend);
    backend.set_input_sequence(PIN, [Value::Off, Value::On, Value::On, Value::Off]);

    let watcher = Arc::new(Mutex::new(
        ChangeWatcher::with_config(binding, fast()).unwrap(),
    ));
    let (tx, events) = mpsc::channel();
    let handle: Weak<Mutex<ChangeWatcher<MockGpioBackend>>> = Arc::downgrade(&watcher);
    watcher.lock().set_on_change(move |event| {
        if let Some(watcher) = handle.upgrade() {
            watcher.lock().clear_on_change();
        }
        let _ = tx.send(event);
    });
    let mut falling = watcher.lock().subscribe();
    watcher.lock().start().unwrap();

    assert_eq!(events.recv_timeout(RECV_TIMEOUT).unwrap().edge, Edge::Rising);
    wait_until(|| matches!(falling.try_recv(), Ok(event) if event.edge == Edge::Falling));

    watcher.lock().stop().unwrap();
    assert!(events.try_recv().is_err());
}

#[test]
fn callback_can_replace_itself() {
    let backend = Arc::new(MockGpioBackend::default());
    let binding = open_input(&backend);
    backend.set_input_sequence(PIN, [Value::Off, Value::On, Value::Off, Value::On]);

    let watcher = Arc::new(Mutex::new(
        ChangeWatcher::with_config(binding, fast()).unwrap(),
    ));
    let (first_tx, first) = mpsc::channel();
    let (rest_tx, rest) = mpsc::channel();
    let handle = Arc::downgrade(&watcher);
    watcher.lock().set_on_change(move |event: ChangeEvent| {
        if let Some(watcher) = handle.upgrade() {
            let rest_tx = rest_tx.clone();
            watcher.lock().set_on_change(move |event| {
                let _ = rest_tx.send(event);
            });
        }
        let _ = first_tx.send(event);
    });
    watcher.lock().start().unwrap();

    assert_eq!(first.recv_timeout(RECV_TIMEOUT).unwrap().edge, Edge::Rising);
    assert_eq!(rest.recv_timeout(RECV_TIMEOUT).unwrap().edge, Edge::Falling);
    assert_eq!(rest.recv_timeout(RECV_TIMEOUT).unwrap().edge, Edge::Rising);

    watcher.lock().stop().unwrap();
    assert!(first.try_recv().is_err());
}

#[test]
fn transitions_without_callback_are_dropped() {
    let backend = Arc::new(MockGpioBackend::default());
    let binding = open_input(&backend);
    let mut watcher = ChangeWatcher::with_config(binding.clone(), fast()).unwrap();
    watcher.start().unwrap();

    backend.set_value(PIN, Value::On);
    wait_until(|| binding.value() == Value::On);
    // the next sample starts only after the previous one was dispatched
    let reads = backend.read_count(PIN);
    wait_until(|| backend.read_count(PIN) > reads + 1);

    let events = forward_events(&watcher);
    thread::sleep(Duration::from_millis(30));
    assert!(events.try_recv().is_err());

    backend.set_value(PIN, Value::Off);
    assert_eq!(events.recv_timeout(RECV_TIMEOUT).unwrap().edge, Edge::Falling);

    watcher.clear_on_change();
    backend.set_value(PIN, Value::On);
    wait_until(|| binding.value() == Value::On);
    watcher.stop().unwrap();
    assert!(events.try_recv().is_err());
}

#[test]
fn read_errors_are_counted_and_polling_continues() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut watcher = ChangeWatcher::with_config(open_input(&backend), fast()).unwrap();
    let events = forward_events(&watcher);
    watcher.start().unwrap();

    backend.fail_reads(PIN, 3);
    backend.set_value(PIN, Value::On);

    assert_eq!(events.recv_timeout(RECV_TIMEOUT).unwrap().edge, Edge::Rising);
    assert_eq!(watcher.error_count(), 3);
    assert_eq!(watcher.state(), WatcherState::Running);
    watcher.stop().unwrap();
}

#[test]
fn closed_binding_keeps_watcher_alive() {
    let backend = Arc::new(MockGpioBackend::default());
    let binding = open_input(&backend);
    let mut watcher = ChangeWatcher::with_config(binding.clone(), fast()).unwrap();
    watcher.start().unwrap();

    binding.close().unwrap();
    wait_until(|| watcher.error_count() >= 2);
    assert_eq!(watcher.state(), WatcherState::Running);
    watcher.stop().unwrap();
}

#[test]
fn dropping_running_watcher_stops_polling() {
    let backend = Arc::new(MockGpioBackend::default());
    let binding = open_input(&backend);
    let mut watcher = ChangeWatcher::with_config(binding, fast()).unwrap();
    watcher.start().unwrap();
    wait_until(|| backend.read_count(PIN) > 3);

    drop(watcher);
    let reads = backend.read_count(PIN);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(backend.read_count(PIN), reads);
}

#[tokio::test]
async fn subscribers_receive_transitions() {
    let backend = Arc::new(MockGpioBackend::default());
    let binding = open_input(&backend);
    backend.set_input_sequence(PIN, [Value::Off, Value::On, Value::Off]);

    let mut watcher = ChangeWatcher::with_config(binding, fast()).unwrap();
    let mut rx = watcher.subscribe();
    watcher.start().unwrap();

    let rising = rx.recv().await.unwrap();
    let falling = rx.recv().await.unwrap();
    assert_eq!(rising.edge, Edge::Rising);
    assert_eq!(falling.edge, Edge::Falling);

    let json = serde_json::to_value(&falling).unwrap();
    assert_eq!(json["edge"], "falling");
    assert_eq!(json["value"], "off");
    assert_eq!(json["pin"], PIN);

    watcher.stop().unwrap();
}
