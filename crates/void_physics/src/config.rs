//! Physics configuration

use serde::{Deserialize, Serialize};

use crate::error::{PhysicsError, Result};

/// Simulation context configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicsConfig {
    /// Gravity vector (default: -9.81 in Y)
    pub gravity: [f32; 3],

    /// Largest substep the simulation will take
    pub timestep: f32,

    /// Maximum number of substeps per step call
    pub max_substeps: u32,

    /// Multiplier applied to every step's delta time
    pub time_scale: f32,

    /// Solver iterations for velocity
    pub solver_iterations: usize,

    /// Worker threads for the step dispatcher (0 = one per core)
    pub worker_threads: usize,

    /// Contact buffer capacity for descriptions that do not set one
    pub default_contact_capacity: usize,

    /// Enable sleeping for inactive bodies
    pub sleeping_enabled: bool,

    /// Start with stepping disabled
    pub simulation_disabled: bool,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: [0.0, -9.81, 0.0],
            timestep: 1.0 / 60.0,
            max_substeps: 4,
            time_scale: 1.0,
            solver_iterations: 4,
            worker_threads: 0,
            default_contact_capacity: 8,
            sleeping_enabled: true,
            simulation_disabled: false,
        }
    }
}

impl PhysicsConfig {
    /// Create a configuration for high-precision simulation
    pub fn high_precision() -> Self {
        Self {
            timestep: 1.0 / 120.0,
            solver_iterations: 8,
            max_substeps: 8,
            ..Default::default()
        }
    }

    /// Create a configuration for fast simulation (lower quality)
    pub fn fast() -> Self {
        Self {
            solver_iterations: 2,
            max_substeps: 2,
            ..Default::default()
        }
    }

    /// Set gravity
    pub fn with_gravity(mut self, x: f32, y: f32, z: f32) -> Self {
        self.gravity = [x, y, z];
        self
    }

    /// Set timestep
    pub fn with_timestep(mut self, timestep: f32) -> Self {
        self.timestep = timestep;
        self
    }

    /// Set the maximum substep count
    pub fn with_max_substeps(mut self, max_substeps: u32) -> Self {
        self.max_substeps = max_substeps;
        self
    }

    /// Set the time scale
    pub fn with_time_scale(mut self, time_scale: f32) -> Self {
        self.time_scale = time_scale;
        self
    }

    /// Set the dispatcher thread count
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set the default contact capacity
    pub fn with_contact_capacity(mut self, capacity: usize) -> Self {
        self.default_contact_capacity = capacity;
        self
    }

    /// Check that every value is usable
    pub fn validate(&self) -> Result<()> {
        if !(self.timestep > 0.0 && self.timestep.is_finite()) {
            return Err(PhysicsError::InvalidConfig(format!(
                "timestep must be positive, got {}",
                self.timestep
            )));
        }
        if self.max_substeps == 0 {
            return Err(PhysicsError::InvalidConfig(
                "max_substeps must be at least 1".into(),
            ));
        }
        if !(self.time_scale >= 0.0 && self.time_scale.is_finite()) {
            return Err(PhysicsError::InvalidConfig(format!(
                "time_scale must be finite and non-negative, got {}",
                self.time_scale
            )));
        }
        if self.solver_iterations == 0 {
            return Err(PhysicsError::InvalidConfig(
                "solver_iterations must be at least 1".into(),
            ));
        }
        if self.gravity.iter().any(|g| !g.is_finite()) {
            return Err(PhysicsError::InvalidConfig("gravity must be finite".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(PhysicsConfig::default().validate().is_ok());
        assert!(PhysicsConfig::high_precision().validate().is_ok());
        assert!(PhysicsConfig::fast().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(PhysicsConfig::default().with_timestep(0.0).validate().is_err());
        assert!(PhysicsConfig::default().with_max_substeps(0).validate().is_err());
        assert!(PhysicsConfig::default().with_time_scale(-1.0).validate().is_err());
        assert!(PhysicsConfig::default()
            .with_gravity(f32::NAN, 0.0, 0.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_serde_roundtrip_keeps_fields() {
        let config = PhysicsConfig::default()
            .with_gravity(0.0, 0.0, -3.0)
            .with_contact_capacity(16);
        let json = serde_json::to_string(&config).unwrap();
        let back: PhysicsConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.gravity, [0.0, 0.0, -3.0]);
        assert_eq!(back.default_contact_capacity, 16);
    }
}
