//! vibrationd
//!
//! Haptic effect scheduling daemon. Drives simulated actuators described in
//! the configuration file and plays effects given as JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use vibrationd::{
    config::{load_shared_config, new_shared_config, Config, SharedConfig},
    CombinedVibration, ConfigWatcher, LifecycleToken, ServiceEvent, VibrationStatus,
    VibratorService,
};

/// How long to wait for the scheduler thread after a cancel on shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Package the daemon's own playback is attributed to
const PACKAGE_NAME: &str = "vibrationd";

/// vibrationd - haptic effect scheduling daemon
#[derive(Parser, Debug)]
#[command(name = "vibrationd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (defaults to ~/.config/vibrationd/config.json, created if missing)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Play the combined vibration in this JSON file and exit
    #[arg(short, long)]
    effect: Option<PathBuf>,

    /// Uid the vibration is attributed to
    #[arg(long, default_value_t = 1000)]
    uid: u32,

    /// Reason recorded with the played effect
    #[arg(long, default_value = "cli")]
    reason: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// List configured actuators and exit
    #[arg(long)]
    list_actuators: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("vibrationd starting...");

    let shared_config = match load_shared_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to load config, using defaults: {}", e);
            new_shared_config()
        }
    };
    let config = read_config(&shared_config);

    if args.list_actuators {
        list_actuators(&config);
        return Ok(());
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServiceEvent>();
    let service = Arc::new(VibratorService::simulated(&config, Some(event_tx))?);

    // Hot reload is optional; the daemon keeps running on the loaded settings
    let (config_tx, mut config_rx) = mpsc::unbounded_channel::<Config>();
    let _watcher = match config.config_path.as_deref() {
        Some(path) => match ConfigWatcher::start(path, config_tx) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("Config hot reload disabled: {}", e);
                None
            }
        },
        None => None,
    };
    let reload_service = Arc::clone(&service);
    let reload_config = Arc::clone(&shared_config);
    let reload_handle = tokio::spawn(async move {
        while let Some(config) = config_rx.recv().await {
            reload_service.on_settings_changed(&config);
            *reload_config.write().unwrap_or_else(|e| e.into_inner()) = config;
        }
    });

    let vibration_id = match &args.effect {
        Some(path) => {
            let effect = read_effect(path)?;
            let play_service = Arc::clone(&service);
            let vibration = service
                .new_vibration(effect, args.uid, LifecycleToken::new())
                .with_package(PACKAGE_NAME, &args.reason);
            // Submitting may wait for a superseded vibration to release the thread
            let id = tokio::task::spawn_blocking(move || play_service.submit(vibration)).await??;
            info!(vibration_id = id, path = %path.display(), "Playing effect");
            Some(id)
        }
        None => None,
    };

    info!("vibrationd ready");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, exiting...");
                break;
            }
            event = event_rx.recv() => {
                match event {
                    Some(ServiceEvent::Completed { id, status }) => {
                        info!(vibration_id = id, %status, "Vibration completed");
                    }
                    Some(ServiceEvent::Released { id }) => {
                        if vibration_id == Some(id) {
                            break;
                        }
                    }
                    None => {
                        error!("Service event channel closed");
                        break;
                    }
                }
            }
        }
    }

    reload_handle.abort();
    shutdown(service).await;
    Ok(())
}

fn read_config(shared: &SharedConfig) -> Config {
    shared.read().unwrap_or_else(|e| e.into_inner()).clone()
}

fn read_effect(path: &Path) -> Result<CombinedVibration, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let effect: CombinedVibration = serde_json::from_str(&contents)?;
    effect.validate()?;
    Ok(effect)
}

/// Cancel anything still playing and wait for the scheduler thread
async fn shutdown(service: Arc<VibratorService>) {
    let result = tokio::task::spawn_blocking(move || {
        service.cancel(VibrationStatus::CancelledByUser);
        service.wait_for_idle(SHUTDOWN_TIMEOUT)
    })
    .await;
    match result {
        Ok(true) => info!("vibrationd stopped"),
        Ok(false) => warn!("Scheduler thread still busy at shutdown"),
        Err(e) => error!("Shutdown task panicked: {:?}", e),
    }
}

/// Print the actuators described by the configuration
fn list_actuators(config: &Config) {
    if config.actuators.is_empty() {
        println!("No actuators configured.");
        return;
    }

    println!("Configured actuator(s): {}\n", config.actuators.len());

    for actuator in &config.actuators {
        let info = actuator.to_info();
        println!("Actuator {}", info.id);
        println!("   Capabilities: {:?}", info.capabilities);
        println!("   Effects:      {:?}", info.supported_effects);
        println!("   Primitives:   {:?}", info.supported_primitives);
        if info.composition_size_max > 0 {
            println!("   Compose max:  {}", info.composition_size_max);
        }
        if info.pwle_size_max > 0 {
            println!("   PWLE max:     {}", info.pwle_size_max);
        }
        println!();
    }
}
