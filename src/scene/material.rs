//! Surface materials and the clamping applied to externally supplied ones.

use serde::{Deserialize, Serialize};

use super::constants::material as limits;

/// Physical surface properties of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Preset this material was derived from, if any
    pub preset: Option<MaterialPreset>,
    /// kg/m³
    pub density: f32,
    pub static_friction: f32,
    pub dynamic_friction: f32,
    pub restitution: f32,
    pub gravity_multiplier: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialPreset {
    Stone,
    Metal,
    Glass,
    Wood,
    Flesh,
    Plastic,
    Rubber,
}

impl MaterialPreset {
    pub const ALL: [MaterialPreset; 7] = [
        MaterialPreset::Stone,
        MaterialPreset::Metal,
        MaterialPreset::Glass,
        MaterialPreset::Wood,
        MaterialPreset::Flesh,
        MaterialPreset::Plastic,
        MaterialPreset::Rubber,
    ];

    pub fn material(self) -> Material {
        // static friction, dynamic friction, restitution, density
        let (sf, df, rest, density) = match self {
            MaterialPreset::Stone => (0.5, 0.35, 0.05, 2400.0),
            MaterialPreset::Metal => (0.3, 0.25, 0.4, 2700.0),
            MaterialPreset::Glass => (0.2, 0.15, 0.7, 2500.0),
            MaterialPreset::Wood => (0.6, 0.55, 0.5, 1000.0),
            MaterialPreset::Flesh => (0.9, 0.8, 0.3, 1400.0),
            MaterialPreset::Plastic => (0.4, 0.35, 0.7, 900.0),
            MaterialPreset::Rubber => (0.9, 0.87, 0.9, 1100.0),
        };
        Material {
            preset: Some(self),
            density,
            static_friction: sf,
            dynamic_friction: df,
            restitution: rest,
            gravity_multiplier: 1.0,
        }
    }
}

impl Default for Material {
    fn default() -> Self {
        MaterialPreset::Wood.material()
    }
}

/// Which fields of a foreign material the caller actually changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialChanges {
    pub density: bool,
    pub friction: bool,
    pub restitution: bool,
    pub gravity_multiplier: bool,
}

impl MaterialChanges {
    pub fn all() -> Self {
        Self {
            density: true,
            friction: true,
            restitution: true,
            gravity_multiplier: true,
        }
    }
}

/// Material properties supplied from outside the scene, unvalidated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForeignMaterial {
    pub density: f32,
    pub friction: f32,
    pub restitution: f32,
    pub gravity_multiplier: f32,
}

/// Material assignment requested by a `SetMaterial` command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MaterialSpec {
    /// Applied as is
    Native(Material),
    /// Clamped field by field; unchanged fields keep the current value
    Foreign {
        material: ForeignMaterial,
        changes: MaterialChanges,
    },
}

impl MaterialSpec {
    /// Produces the material that results from applying this spec to `current`.
    pub fn resolve(&self, current: &Material) -> Material {
        match self {
            MaterialSpec::Native(material) => *material,
            MaterialSpec::Foreign { material, changes } => {
                let mut resolved = *current;
                resolved.preset = None;
                if changes.density {
                    resolved.density = clamp(material.density, limits::DENSITY_RANGE);
                }
                if changes.friction {
                    let friction = clamp(material.friction, limits::FRICTION_RANGE);
                    resolved.static_friction = friction;
                    resolved.dynamic_friction = friction;
                }
                if changes.restitution {
                    resolved.restitution = clamp(material.restitution, limits::RESTITUTION_RANGE);
                }
                if changes.gravity_multiplier {
                    resolved.gravity_multiplier =
                        clamp(material.gravity_multiplier, limits::GRAVITY_MULTIPLIER_RANGE);
                }
                resolved
            }
        }
    }
}

fn clamp(value: f32, (min, max): (f32, f32)) -> f32 {
    if value.is_nan() {
        return min;
    }
    value.clamp(min, max)
}
