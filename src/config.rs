//! Configuration management for vibrationd
//!
//! Handles loading, validation, and hot-reload of JSON configuration files.
//! Configuration is stored at `~/.config/vibrationd/config.json`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::capability::{ActuatorInfo, Braking, Capabilities, FrequencyProfile};
use crate::effect::{effect_ids, primitive_ids};

// ============================================================================
// Constants
// ============================================================================

/// Default config directory name
const CONFIG_DIR: &str = "vibrationd";

/// Default config file name
const CONFIG_FILE: &str = "config.json";

/// Default duration of each quantized ramp step (milliseconds)
const DEFAULT_RAMP_STEP_DURATION_MS: u64 = 5;

/// Default share of a PWLE batch filled before a split may happen early
const DEFAULT_SPLIT_LOOKAHEAD_FILL: f32 = 0.5;

/// Upper bound for the ramp-down tail (milliseconds)
const MAX_RAMP_DOWN_DURATION_MS: u64 = 60_000;

/// Upper bound for the ramp step duration (milliseconds)
const MAX_RAMP_STEP_DURATION_MS: u64 = 1_000;

// ============================================================================
// Vibration Settings
// ============================================================================

/// Device-wide settings consumed by the effect adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VibrationConfig {
    /// Duration of each step when a ramp is quantized (default: 5)
    #[serde(default = "default_ramp_step_duration")]
    pub ramp_step_duration_ms: u64,

    /// Length of the decaying tail after waveforms, 0 disables it (default: 0)
    #[serde(default)]
    pub ramp_down_duration_ms: u64,

    /// Amplitude used for default-amplitude steps and actuators without
    /// amplitude control (default: 1.0)
    #[serde(default = "default_amplitude")]
    pub default_amplitude: f32,

    /// Share of the PWLE batch limit after which a boundary may win on
    /// amplitude alone (default: 0.5)
    #[serde(default = "default_split_lookahead_fill")]
    pub split_lookahead_fill: f32,
}

fn default_ramp_step_duration() -> u64 { DEFAULT_RAMP_STEP_DURATION_MS }
fn default_amplitude() -> f32 { 1.0 }
fn default_split_lookahead_fill() -> f32 { DEFAULT_SPLIT_LOOKAHEAD_FILL }

impl Default for VibrationConfig {
    fn default() -> Self {
        Self {
            ramp_step_duration_ms: DEFAULT_RAMP_STEP_DURATION_MS,
            ramp_down_duration_ms: 0,
            default_amplitude: 1.0,
            split_lookahead_fill: DEFAULT_SPLIT_LOOKAHEAD_FILL,
        }
    }
}

impl VibrationConfig {
    /// Validate and clamp all values
    pub fn validate(&mut self) {
        self.ramp_step_duration_ms = self.ramp_step_duration_ms.clamp(1, MAX_RAMP_STEP_DURATION_MS);
        self.ramp_down_duration_ms = self.ramp_down_duration_ms.min(MAX_RAMP_DOWN_DURATION_MS);
        self.default_amplitude = if self.default_amplitude.is_finite() && self.default_amplitude > 0.0 {
            self.default_amplitude.min(1.0)
        } else {
            1.0
        };
        self.split_lookahead_fill = if self.split_lookahead_fill.is_finite() {
            self.split_lookahead_fill.clamp(0.0, 1.0)
        } else {
            DEFAULT_SPLIT_LOOKAHEAD_FILL
        };
    }
}

// ============================================================================
// Actuator Configuration
// ============================================================================

/// Description of one simulated actuator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorConfig {
    pub id: i32,

    #[serde(default)]
    pub amplitude_control: bool,

    #[serde(default)]
    pub frequency_control: bool,

    #[serde(default)]
    pub compose_effects: bool,

    #[serde(default)]
    pub compose_pwle_effects: bool,

    #[serde(default = "default_true")]
    pub synced_start: bool,

    #[serde(default)]
    pub supported_effects: Vec<i32>,

    #[serde(default)]
    pub supported_primitives: Vec<i32>,

    /// Supports CLAB braking at the end of PWLE calls
    #[serde(default)]
    pub clab_braking: bool,

    /// Max primitives per compose call, 0 for unlimited
    #[serde(default)]
    pub composition_size_max: usize,

    /// Max ramps per PWLE call, 0 for unlimited
    #[serde(default)]
    pub pwle_size_max: usize,

    #[serde(default)]
    pub min_frequency_hz: f32,

    #[serde(default)]
    pub resonant_frequency_hz: f32,

    #[serde(default)]
    pub frequency_resolution_hz: f32,

    /// Max amplitude per frequency step, starting at `min_frequency_hz`
    #[serde(default)]
    pub max_amplitudes: Vec<f32>,

    /// Artificial latency added to every hardware call (milliseconds)
    #[serde(default)]
    pub latency_ms: u64,
}

fn default_true() -> bool { true }

impl ActuatorConfig {
    /// Plain actuator with only on/off control
    pub fn new(id: i32) -> Self {
        Self {
            id,
            amplitude_control: false,
            frequency_control: false,
            compose_effects: false,
            compose_pwle_effects: false,
            synced_start: true,
            supported_effects: Vec::new(),
            supported_primitives: Vec::new(),
            clab_braking: false,
            composition_size_max: 0,
            pwle_size_max: 0,
            min_frequency_hz: 0.0,
            resonant_frequency_hz: 0.0,
            frequency_resolution_hz: 0.0,
            max_amplitudes: Vec::new(),
            latency_ms: 0,
        }
    }

    /// Validate and clamp all values
    pub fn validate(&mut self) {
        for amplitude in &mut self.max_amplitudes {
            *amplitude = amplitude.clamp(0.0, 1.0);
        }
        self.min_frequency_hz = self.min_frequency_hz.max(0.0);
        self.resonant_frequency_hz = self.resonant_frequency_hz.max(0.0);
        self.frequency_resolution_hz = self.frequency_resolution_hz.max(0.0);
    }

    /// Capability descriptor for this actuator
    pub fn to_info(&self) -> ActuatorInfo {
        let flags = [
            (self.amplitude_control, Capabilities::AMPLITUDE_CONTROL),
            (self.frequency_control, Capabilities::FREQUENCY_CONTROL),
            (self.compose_effects, Capabilities::COMPOSE_EFFECTS),
            (self.compose_pwle_effects, Capabilities::COMPOSE_PWLE_EFFECTS),
            (self.synced_start, Capabilities::SYNCED_START),
        ];
        let capabilities = flags
            .iter()
            .filter(|(enabled, _)| *enabled)
            .fold(Capabilities::ON_CALLBACK | Capabilities::PERFORM_CALLBACK, |acc, (_, flag)| {
                acc | *flag
            });
        let braking: &[Braking] = if self.clab_braking {
            &[Braking::None, Braking::Clab]
        } else {
            &[Braking::None]
        };

        ActuatorInfo::new(self.id)
            .with_capabilities(capabilities)
            .with_effects(&self.supported_effects)
            .with_primitives(&self.supported_primitives)
            .with_braking(braking)
            .with_composition_size_max(self.composition_size_max)
            .with_pwle_size_max(self.pwle_size_max)
            .with_frequency_profile(FrequencyProfile {
                min_frequency_hz: self.min_frequency_hz,
                resonant_frequency_hz: self.resonant_frequency_hz,
                frequency_resolution_hz: self.frequency_resolution_hz,
                max_amplitudes: self.max_amplitudes.clone(),
            })
    }
}

/// Single actuator with amplitude control and the common click/tick effects
fn default_actuators() -> Vec<ActuatorConfig> {
    let mut actuator = ActuatorConfig::new(1);
    actuator.amplitude_control = true;
    actuator.compose_effects = true;
    actuator.supported_effects = vec![effect_ids::CLICK, effect_ids::TICK];
    actuator.supported_primitives = vec![primitive_ids::CLICK, primitive_ids::TICK];
    vec![actuator]
}

// ============================================================================
// Main Configuration
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Effect adaptation settings
    #[serde(default)]
    pub vibration: VibrationConfig,

    /// Simulated actuators driven by the daemon
    #[serde(default = "default_actuators")]
    pub actuators: Vec<ActuatorConfig>,

    /// Whether the actuator manager accepts synchronized starts
    #[serde(default = "default_true")]
    pub manager_synced_start: bool,

    /// Configuration file path (not serialized)
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vibration: VibrationConfig::default(),
            actuators: default_actuators(),
            manager_synced_start: true,
            config_path: None,
        }
    }
}

impl Config {
    /// Get the default config directory path
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(CONFIG_DIR))
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|p| p.join(CONFIG_FILE))
    }

    /// Load configuration from the default location
    ///
    /// Returns default config if file doesn't exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_config_path() {
            Some(path) => Self::load(&path),
            None => {
                tracing::warn!("Could not determine config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from file path
    ///
    /// Returns default config if file doesn't exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            let mut config = Self::default();
            config.config_path = Some(path.to_path_buf());
            return Ok(config);
        }

        let contents = fs::read_to_string(path).map_err(ConfigError::IoError)?;
        let mut config: Config =
            serde_json::from_str(&contents).map_err(ConfigError::ParseError)?;

        config.validate()?;
        config.config_path = Some(path.to_path_buf());

        tracing::info!(
            path = %path.display(),
            actuators = config.actuators.len(),
            ramp_down_ms = config.vibration.ramp_down_duration_ms,
            ramp_step_ms = config.vibration.ramp_step_duration_ms,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = match &self.config_path {
            Some(p) => p.clone(),
            None => Self::default_config_path()
                .ok_or_else(|| ConfigError::ValidationError("No config path".to_string()))?,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::IoError)?;
        }

        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::ParseError)?;
        fs::write(&path, contents).map_err(ConfigError::IoError)?;

        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Load `path`, writing the defaults there first if it doesn't exist
    pub fn create_default_if_missing<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let existed = path.exists();
        let config = Self::load(path)?;

        if !existed {
            config.save()?;
            tracing::info!(path = %path.display(), "Created default configuration file");
        }

        Ok(config)
    }

    /// Clamp values and reject inconsistent actuator lists
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.vibration.validate();

        let mut seen = BTreeSet::new();
        for actuator in &mut self.actuators {
            actuator.validate();
            if !seen.insert(actuator.id) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate actuator id {}",
                    actuator.id
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Shared Config (for hot-reload)
// ============================================================================

use std::sync::{Arc, RwLock};

/// Thread-safe shared configuration for hot-reload support
pub type SharedConfig = Arc<RwLock<Config>>;

/// Create a new shared config with defaults
pub fn new_shared_config() -> SharedConfig {
    Arc::new(RwLock::new(Config::default()))
}

/// Create a new shared config from file (or defaults if file doesn't exist)
pub fn load_shared_config(path: Option<&Path>) -> Result<SharedConfig, ConfigError> {
    let config = match path {
        Some(path) => Config::load(path)?,
        None => match Config::default_config_path() {
            Some(path) => Config::create_default_if_missing(path)?,
            None => Config::load_default()?,
        },
    };
    Ok(Arc::new(RwLock::new(config)))
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration error type
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error reading/writing file
    IoError(std::io::Error),
    /// JSON parsing error
    ParseError(serde_json::Error),
    /// Validation error
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "I/O error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Parse error: {}", e),
            ConfigError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            ConfigError::ParseError(e) => Some(e),
            ConfigError::ValidationError(_) => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
