//! Actuator capability descriptor
//!
//! Describes what one actuator can play: capability flags, supported prebaked
//! effects and primitives, batch limits and the frequency profile used to
//! clip PWLE amplitudes.

use bitflags::bitflags;

bitflags! {
    /// Per-actuator hardware capabilities
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Completion callback after `on`
        const ON_CALLBACK = 1 << 0;
        /// Completion callback after `perform`
        const PERFORM_CALLBACK = 1 << 1;
        /// `set_amplitude` is honoured
        const AMPLITUDE_CONTROL = 1 << 2;
        /// Actuator can be driven by an external source
        const EXTERNAL_CONTROL = 1 << 3;
        /// Primitive compositions via `compose`
        const COMPOSE_EFFECTS = 1 << 4;
        /// Frequency can be set
        const FREQUENCY_CONTROL = 1 << 5;
        /// PWLE ramps via `compose_pwle`
        const COMPOSE_PWLE_EFFECTS = 1 << 6;
        /// Can take part in a synchronized multi-actuator start
        const SYNCED_START = 1 << 7;
    }
}

bitflags! {
    /// Capabilities a synchronized start needs from the actuator manager
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SyncCapabilities: u32 {
        const SYNC = 1 << 0;
        const PREPARE_ON = 1 << 1;
        const PREPARE_PERFORM = 1 << 2;
        const PREPARE_COMPOSE = 1 << 3;
        const MIXED_TRIGGER_ON = 1 << 4;
        const MIXED_TRIGGER_PERFORM = 1 << 5;
        const MIXED_TRIGGER_COMPOSE = 1 << 6;
        const TRIGGER_CALLBACK = 1 << 7;
    }
}

impl SyncCapabilities {
    /// Full mask for a set of prepare flags
    ///
    /// Adds `SYNC`, and a `MIXED_TRIGGER_*` bit for every prepare kind that is
    /// triggered together with a different kind.
    pub fn required_for(prepare: SyncCapabilities) -> SyncCapabilities {
        let prepare = prepare
            & (SyncCapabilities::PREPARE_ON
                | SyncCapabilities::PREPARE_PERFORM
                | SyncCapabilities::PREPARE_COMPOSE);
        let mut required = SyncCapabilities::SYNC | prepare;
        let pairs = [
            (SyncCapabilities::PREPARE_ON, SyncCapabilities::MIXED_TRIGGER_ON),
            (SyncCapabilities::PREPARE_PERFORM, SyncCapabilities::MIXED_TRIGGER_PERFORM),
            (SyncCapabilities::PREPARE_COMPOSE, SyncCapabilities::MIXED_TRIGGER_COMPOSE),
        ];
        for (kind, mixed) in pairs {
            if prepare.contains(kind) && !(prepare - kind).is_empty() {
                required |= mixed;
            }
        }
        required
    }
}

/// PWLE braking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Braking {
    None,
    Clab,
}

/// Resonance and max-amplitude table of a PWLE-capable actuator
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrequencyProfile {
    pub min_frequency_hz: f32,
    pub resonant_frequency_hz: f32,
    /// Spacing between entries of `max_amplitudes`
    pub frequency_resolution_hz: f32,
    /// Max amplitude at `min + i * resolution`
    pub max_amplitudes: Vec<f32>,
}

impl FrequencyProfile {
    pub fn is_empty(&self) -> bool {
        self.max_amplitudes.is_empty() || self.frequency_resolution_hz <= 0.0
    }

    pub fn max_frequency_hz(&self) -> f32 {
        if self.is_empty() {
            return self.min_frequency_hz;
        }
        self.min_frequency_hz
            + self.frequency_resolution_hz * (self.max_amplitudes.len() - 1) as f32
    }

    /// Clamp a frequency to the supported range
    pub fn clamp_frequency(&self, frequency_hz: f32) -> f32 {
        if self.is_empty() {
            return frequency_hz;
        }
        frequency_hz.clamp(self.min_frequency_hz, self.max_frequency_hz())
    }

    /// Linearly interpolated max amplitude at a frequency
    ///
    /// An empty profile imposes no limit.
    pub fn max_amplitude(&self, frequency_hz: f32) -> f32 {
        if self.is_empty() {
            return 1.0;
        }
        let position = (self.clamp_frequency(frequency_hz) - self.min_frequency_hz)
            / self.frequency_resolution_hz;
        let lower = position.floor() as usize;
        let last = self.max_amplitudes.len() - 1;
        if lower >= last {
            return self.max_amplitudes[last];
        }
        let fraction = position - lower as f32;
        let (a, b) = (self.max_amplitudes[lower], self.max_amplitudes[lower + 1]);
        a + (b - a) * fraction
    }
}

/// Capability descriptor of one actuator
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorInfo {
    pub id: i32,
    pub capabilities: Capabilities,
    pub supported_effects: Vec<i32>,
    pub supported_primitives: Vec<i32>,
    pub supported_braking: Vec<Braking>,
    /// Max primitives per `compose` call, 0 for unlimited
    pub composition_size_max: usize,
    /// Max ramps per `compose_pwle` call, 0 for unlimited
    pub pwle_size_max: usize,
    pub frequency_profile: FrequencyProfile,
}

impl ActuatorInfo {
    /// Bare actuator that can only be switched on and off
    pub fn new(id: i32) -> Self {
        Self {
            id,
            capabilities: Capabilities::empty(),
            supported_effects: Vec::new(),
            supported_primitives: Vec::new(),
            supported_braking: Vec::new(),
            composition_size_max: 0,
            pwle_size_max: 0,
            frequency_profile: FrequencyProfile::default(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities |= capabilities;
        self
    }

    pub fn with_effects(mut self, effects: &[i32]) -> Self {
        self.supported_effects = effects.to_vec();
        self
    }

    pub fn with_primitives(mut self, primitives: &[i32]) -> Self {
        self.supported_primitives = primitives.to_vec();
        self
    }

    pub fn with_braking(mut self, braking: &[Braking]) -> Self {
        self.supported_braking = braking.to_vec();
        self
    }

    pub fn with_composition_size_max(mut self, max: usize) -> Self {
        self.composition_size_max = max;
        self
    }

    pub fn with_pwle_size_max(mut self, max: usize) -> Self {
        self.pwle_size_max = max;
        self
    }

    pub fn with_frequency_profile(mut self, profile: FrequencyProfile) -> Self {
        self.frequency_profile = profile;
        self
    }

    pub fn has_capability(&self, capability: Capabilities) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn is_effect_supported(&self, effect_id: i32) -> bool {
        self.supported_effects.contains(&effect_id)
    }

    /// Primitive support requires compose capability as well
    pub fn is_primitive_supported(&self, primitive_id: i32) -> bool {
        self.has_capability(Capabilities::COMPOSE_EFFECTS)
            && self.supported_primitives.contains(&primitive_id)
    }

    /// Braking passed to every PWLE call
    pub fn default_braking(&self) -> Braking {
        if self.supported_braking.contains(&Braking::Clab) {
            Braking::Clab
        } else {
            Braking::None
        }
    }

    /// Resolve 0 Hz to the resonant frequency, then clamp to the supported range
    pub fn resolve_frequency(&self, frequency_hz: f32) -> f32 {
        let frequency_hz = if frequency_hz == 0.0 {
            self.frequency_profile.resonant_frequency_hz
        } else {
            frequency_hz
        };
        self.frequency_profile.clamp_frequency(frequency_hz)
    }

    pub fn max_amplitude(&self, frequency_hz: f32) -> f32 {
        self.frequency_profile.max_amplitude(frequency_hz)
    }
}

// ============================================================================
// Tests
// ============================================================================
