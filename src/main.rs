use clap::Parser;
use door_sentinel::config::{Config, load_dotenv};
use door_sentinel::error::SentinelError;
use door_sentinel::input::simulation::run_door_simulation;
use door_sentinel::input::{Edge, GpioLine, SimulatedLine, SysfsLine};
use door_sentinel::instance_lock::InstanceLock;
use door_sentinel::notify::NotificationDispatcher;
use door_sentinel::relay::DeliveryRelay;
use door_sentinel::sensors::SensorMonitor;
use log::{error, info, warn};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long the relay gets to pick up changes emitted before shutdown.
const RELAY_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "door-sentinel")]
#[command(about = "Watch a door reed switch and report changes to a signed webhook")]
struct Cli {
    /// GPIO pin the reed switch is wired to
    #[arg(long, env = "DOOR_PIN")]
    pin: Option<u32>,

    /// Edge mode: both, rising or falling
    #[arg(long, env = "DOOR_EDGE")]
    edge: Option<Edge>,

    /// How long an opening must persist before it is reported
    #[arg(long, env = "DOOR_OPEN_DELAY_MS")]
    open_delay_ms: Option<u64>,

    /// Raw level (0 or 1) that means the door is open
    #[arg(long, env = "DOOR_OPEN_VALUE")]
    open_value: Option<u8>,

    /// Drive a simulated door that toggles every SECS seconds instead of real GPIO
    #[arg(long, value_name = "SECS")]
    simulate: Option<u64>,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() -> ExitCode {
    // Environment must be populated before the runtime spawns worker threads
    load_dotenv();
    init_logger();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("[System] Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("[System] {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, SentinelError> {
    let mut config = Config::from_env()?;

    if let Some(pin) = cli.pin {
        config.sensor.pin = pin;
    }
    if let Some(edge) = cli.edge {
        config.sensor.edge = edge;
    }
    if let Some(delay) = cli.open_delay_ms {
        config.sensor.open_delay = Duration::from_millis(delay);
    }
    if let Some(level) = cli.open_value {
        config.sensor.open_level = level;
    }
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<(), SentinelError> {
    info!("[System] Starting Door Sentinel");

    let config = load_config(&cli)?;
    info!("[System] Configuration loaded:");
    info!("[System]   Webhook URL: {}", config.webhook.url);
    info!("[System]   Retry count: {}", config.webhook.retry_count);
    info!("[System]   GPIO pin: {}", config.sensor.pin);
    info!("[System]   Edge: {}", config.sensor.edge);
    info!(
        "[System]   Open delay: {}ms",
        config.sensor.open_delay.as_millis()
    );
    info!("[System]   Open value: {}", config.sensor.open_level);

    if config.webhook.uses_default_key() {
        warn!("[System] Using the default signing key; set SIGN_KEY for production use");
    }

    let _lock = InstanceLock::acquire(config.sensor.pin)?;

    let (line, simulation): (Arc<dyn GpioLine>, Option<JoinHandle<()>>) = match cli.simulate {
        Some(secs) => {
            let open_level = config.sensor.open_level;
            let sim = Arc::new(SimulatedLine::new(config.sensor.pin, 1 - open_level));
            let task = run_door_simulation(
                sim.clone(),
                open_level,
                Duration::from_secs(secs.max(1)),
            );
            info!("[Sim] Simulating door on GPIO{} every {}s", config.sensor.pin, secs.max(1));
            let line: Arc<dyn GpioLine> = sim;
            (line, Some(task))
        }
        None => {
            // Export waits for udev to create the pin directory
            let root = config.runtime.gpio_sysfs_root.clone();
            let pin = config.sensor.pin;
            let sysfs = tokio::task::spawn_blocking(move || SysfsLine::open_at(root, pin)).await??;
            let line: Arc<dyn GpioLine> = Arc::new(sysfs);
            (line, None)
        }
    };

    let monitor = SensorMonitor::new(line, config.sensor.clone());
    let events = monitor.subscribe();

    let dispatcher = match NotificationDispatcher::new(&config.webhook) {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            monitor.shutdown().await;
            return Err(e);
        }
    };
    let relay = DeliveryRelay::new(dispatcher);
    let stop_relay = CancellationToken::new();
    let mut relay_task = relay.start(events, stop_relay.clone());

    if let Err(e) = monitor.start() {
        monitor.shutdown().await;
        return Err(e);
    }

    info!("[System] Door Sentinel is running");
    info!("[System]   - Monitoring GPIO{}", config.sensor.pin);
    info!("[System]   - Press Ctrl+C to exit");

    let relay_finished = wait_for_shutdown(&mut relay_task).await;

    if let Some(task) = simulation {
        task.abort();
    }
    // Shutdown closes the event stream once buffered changes are relayed
    monitor.shutdown().await;
    if !relay_finished {
        let result = match tokio::time::timeout(RELAY_FLUSH_TIMEOUT, &mut relay_task).await {
            Ok(result) => result,
            Err(_) => {
                stop_relay.cancel();
                relay_task.await
            }
        };
        if let Err(e) = result {
            error!("[System] Relay task failed: {}", e);
        }
    }

    relay.drain(config.runtime.delivery_grace()).await;

    info!("[System] Door Sentinel stopped");
    if relay_finished {
        // Non-zero exit so a supervisor restarts us
        return Err(SentinelError::MonitorStopped);
    }
    Ok(())
}

/// Wait for Ctrl+C, SIGTERM or the relay ending on its own. The relay ends
/// when the monitor stops, e.g. because the GPIO watcher died.
///
/// Returns `true` if the relay task already completed.
async fn wait_for_shutdown(relay_task: &mut JoinHandle<()>) -> bool {
    let mut terminate = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            error!("[System] Failed to listen for SIGTERM: {}", e);
            None
        }
    };

    let sigterm = async {
        match terminate.as_mut() {
            Some(stream) => {
                stream.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => info!("[System] Received shutdown signal"),
                Err(e) => error!("[System] Failed to listen for shutdown signal: {}", e),
            }
            false
        }
        _ = sigterm => {
            info!("[System] Received SIGTERM");
            false
        }
        result = relay_task => {
            if let Err(e) = result {
                error!("[System] Relay task failed: {}", e);
            } else {
                warn!("[System] Sensor monitoring stopped unexpectedly, shutting down");
            }
            true
        }
    }
}
