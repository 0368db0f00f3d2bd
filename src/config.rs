//! Domain configuration parsing from domain.toml files

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::domain::constants::{physics as physics_consts, visibility as visibility_consts};

/// Physics stepping configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct PhysicsConfig {
    /// Downward gravity in m/s²
    #[serde(default = "default_gravity")]
    pub gravity: f32,
    /// Internal fixed sub-step size in seconds
    #[serde(default = "default_fixed_timestep")]
    pub fixed_timestep: f32,
    /// Maximum sub-steps taken for a single tick
    #[serde(default = "default_max_substeps")]
    pub max_substeps: u32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: default_gravity(),
            fixed_timestep: default_fixed_timestep(),
            max_substeps: default_max_substeps(),
        }
    }
}

/// Visibility world configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct VisibilityConfig {
    /// Seconds between two visibility passes
    #[serde(default = "default_check_interval")]
    pub check_interval: f32,
    /// World coordinates are divided by this before entering the visibility world
    #[serde(default = "default_scaling_factor")]
    pub scaling_factor: f32,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            scaling_factor: default_scaling_factor(),
        }
    }
}

/// Domain configuration from domain.toml
#[derive(Debug, Clone, Deserialize)]
pub struct DomainConfig {
    #[serde(default)]
    pub physics: PhysicsConfig,
    #[serde(default)]
    pub visibility: VisibilityConfig,
    /// Reference water level used by floating entities
    #[serde(default)]
    pub water_level: f32,
    /// Height of the terrain contact volume when the containing entity has no bbox
    #[serde(default = "default_world_height")]
    pub world_height: f32,
    /// Directory that external mesh assets are resolved against
    #[serde(default)]
    pub mesh_asset_dir: Option<PathBuf>,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            physics: PhysicsConfig::default(),
            visibility: VisibilityConfig::default(),
            water_level: 0.0,
            world_height: default_world_height(),
            mesh_asset_dir: None,
        }
    }
}

fn default_gravity() -> f32 {
    physics_consts::DEFAULT_GRAVITY
}

fn default_fixed_timestep() -> f32 {
    physics_consts::TIMESTEP
}

fn default_max_substeps() -> u32 {
    physics_consts::MAX_SUBSTEPS
}

fn default_check_interval() -> f32 {
    visibility_consts::CHECK_INTERVAL_SECONDS
}

fn default_scaling_factor() -> f32 {
    visibility_consts::SCALING_FACTOR
}

fn default_world_height() -> f32 {
    physics_consts::DEFAULT_WORLD_HEIGHT
}

impl DomainConfig {
    /// Load domain configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::Parse(_, e) => ConfigError::Parse(path.to_path_buf(), e),
            other => other,
        })
    }

    /// Parse domain configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DomainConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.physics.fixed_timestep > 0.0) {
            return Err(ConfigError::Invalid("physics.fixed_timestep must be positive"));
        }
        if self.physics.max_substeps == 0 {
            return Err(ConfigError::Invalid("physics.max_substeps must be at least 1"));
        }
        if !(self.visibility.scaling_factor > 0.0) {
            return Err(ConfigError::Invalid("visibility.scaling_factor must be positive"));
        }
        Ok(())
    }
}

/// Errors that can occur when loading domain configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),
    #[error("failed to parse {}: {1}", .0.display())]
    Parse(PathBuf, #[source] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let config = DomainConfig::from_toml_str("").unwrap();
        assert_eq!(config.physics.max_substeps, physics_consts::MAX_SUBSTEPS);
        assert_eq!(config.visibility.scaling_factor, 100.0);
        assert_eq!(config.visibility.check_interval, 2.0);
        assert_eq!(config.water_level, 0.0);
        assert!(config.mesh_asset_dir.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            water_level = 2.5
            world_height = 400.0
            mesh_asset_dir = "assets/meshes"

            [physics]
            gravity = 10.0
            fixed_timestep = 0.02
            max_substeps = 4

            [visibility]
            check_interval = 0.5
            scaling_factor = 50.0
        "#;
        let config = DomainConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.physics.gravity, 10.0);
        assert_eq!(config.physics.fixed_timestep, 0.02);
        assert_eq!(config.physics.max_substeps, 4);
        assert_eq!(config.visibility.check_interval, 0.5);
        assert_eq!(config.visibility.scaling_factor, 50.0);
        assert_eq!(config.water_level, 2.5);
        assert_eq!(config.world_height, 400.0);
        assert_eq!(
            config.mesh_asset_dir,
            Some(PathBuf::from("assets/meshes"))
        );
    }

    #[test]
    fn test_rejects_non_positive_timestep() {
        let err = DomainConfig::from_toml_str("[physics]\nfixed_timestep = 0.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "got {err}");
    }

    #[test]
    fn test_from_file_reports_path_on_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "water_level = \"deep\"").unwrap();
        let err = DomainConfig::from_file(file.path()).unwrap_err();
        match err {
            ConfigError::Parse(path, _) => assert_eq!(path, file.path()),
            other => panic!("expected parse error, got {other}"),
        }
    }
}
