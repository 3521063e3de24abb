use log::{info, warn};
use std::error::Error;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use gpiowatch::{AppConfig, ChangeWatcher, Direction, GpioBackend, PinBinding};

#[cfg(feature = "mock-gpio")]
use gpiowatch::MockGpioBackend;
#[cfg(not(feature = "mock-gpio"))]
use gpiowatch::SysfsBackend;

type Binding = PinBinding<dyn GpioBackend>;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GPIOWATCH_CONFIG").ok())
        .unwrap_or_else(|| "config.json".to_string());
    let config = AppConfig::load_from_file(&config_path)?;

    let backend: Arc<dyn GpioBackend> = {
        #[cfg(feature = "mock-gpio")]
        {
            Arc::new(MockGpioBackend::default())
        }
        #[cfg(not(feature = "mock-gpio"))]
        {
            Arc::new(SysfsBackend::new(&config.sysfs_root))
        }
    };

    let mut ids: Vec<u32> = config.pins.keys().copied().collect();
    ids.sort_unstable();

    let mut bindings: Vec<Arc<Binding>> = Vec::with_capacity(ids.len());
    let mut watched: Vec<(String, Arc<Binding>)> = Vec::new();
    for id in ids {
        let pin = &config.pins[&id];
        let binding = Arc::new(PinBinding::with_default(
            Arc::clone(&backend),
            id,
            pin.direction,
            pin.default_value,
        ));
        binding.open()?;
        if pin.direction == Direction::In {
            binding.read()?;
        }
        info!("opened {} (gpio{id}) as {}", pin.name, pin.direction);
        if pin.watch {
            watched.push((pin.name.clone(), Arc::clone(&binding)));
        }
        bindings.push(binding);
    }

    let mut watchers = Vec::with_capacity(watched.len());
    for (name, binding) in &watched {
        let mut watcher = ChangeWatcher::with_config(Arc::clone(binding), config.watcher_config())?;
        let name = name.clone();
        watcher.set_on_change(move |event| match serde_json::to_string(&event) {
            Ok(text) => info!("{name}: {text}"),
            Err(e) => warn!("{name}: failed to encode event: {e}"),
        });
        watcher.start()?;
        watchers.push(watcher);
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();
    loop {
        let status: Vec<String> = watched
            .iter()
            .map(|(name, binding)| format!("{name} {}", binding.value()))
            .collect();
        write!(stdout, "\rCurrent State {}", status.join(", "))?;
        stdout.flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 || line.trim() == "exit" {
            break;
        }
    }

    for mut watcher in watchers {
        watcher.stop()?;
    }
    for binding in bindings {
        if let Err(e) = binding.close() {
            warn!("failed to release gpio{}: {e}", binding.pin());
        }
    }

    Ok(())
}
