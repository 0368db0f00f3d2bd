//! Outbound notification records and move change detection.

use nalgebra::{Point3, UnitQuaternion, Vector3};
use serde::Serialize;

use super::constants::notify as consts;
use super::entity::{EntityId, Location, Mode};

/// Notification produced for the external dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Notification {
    /// `subject` became visible to `observer`
    Appear {
        observer: EntityId,
        subject: EntityId,
        stamp: i64,
    },
    /// `subject` is no longer visible to `observer`
    Disappear {
        observer: EntityId,
        subject: EntityId,
        stamp: i64,
    },
    /// `observer` perceives a movement
    Sight { observer: EntityId, movement: Move },
    /// Ground under `entity` was rebuilt
    PositionCorrection { entity: EntityId, position: [f32; 3] },
}

/// Changed parts of an entity's location. Unchanged parts are omitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Move {
    pub entity: EntityId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<[f32; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<[f32; 3]>,
    /// Quaternion as `[x, y, z, w]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<[f32; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub angular_velocity: Option<[f32; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    pub timestamp: f64,
}

fn fuzzy_equals(a: f32, b: f32) -> bool {
    (a - b).abs() <= consts::FUZZY_EPSILON
}

fn fuzzy_equals_vec(a: &Vector3<f32>, b: &Vector3<f32>) -> bool {
    a.iter().zip(b.iter()).all(|(a, b)| fuzzy_equals(*a, *b))
}

fn orientation_equals(a: &UnitQuaternion<f32>, b: &UnitQuaternion<f32>) -> bool {
    // q and -q are the same rotation
    let (a, b) = (a.coords, b.coords);
    let close = |b: nalgebra::Vector4<f32>| {
        a.iter()
            .zip(b.iter())
            .all(|(x, y)| (x - y).abs() <= consts::ORIENTATION_EPSILON)
    };
    close(b) || close(-b)
}

/// Location values last sent to observers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LastSentLocation {
    pub pos: Option<Point3<f32>>,
    pub velocity: Option<Vector3<f32>>,
    pub orientation: Option<UnitQuaternion<f32>>,
    pub angular_velocity: Option<Vector3<f32>>,
}

impl LastSentLocation {
    /// Compares `location` against what was last sent. Returns the move to send, if
    /// anything changed beyond tolerance, and records the sent values.
    pub fn diff(
        &mut self,
        entity: EntityId,
        location: &Location,
        mode: Option<Mode>,
        timestamp: f64,
    ) -> Option<Move> {
        let orientation_change = match (&location.orientation, &self.orientation) {
            (Some(current), Some(last)) => !orientation_equals(current, last),
            (Some(_), None) => true,
            _ => false,
        };

        let velocity_change = match (&location.velocity, &self.velocity) {
            (Some(_), None) => true,
            (Some(current), Some(last)) => {
                !fuzzy_equals_vec(current, last) || (*current == Vector3::zeros() && *last != Vector3::zeros())
            }
            (None, _) => false,
        };

        let angular_change = match &location.angular_velocity {
            Some(current) => {
                let last = self.angular_velocity.unwrap_or_else(Vector3::zeros);
                !fuzzy_equals_vec(&last, current)
                    || (*current == Vector3::zeros() && self.angular_velocity.map_or(false, |l| l != Vector3::zeros()))
            }
            None => false,
        };

        if !(velocity_change || orientation_change || angular_change || mode.is_some()) {
            return None;
        }

        let mut movement = Move {
            entity,
            position: location.pos.map(|p| p.coords.into()),
            velocity: None,
            orientation: None,
            angular_velocity: None,
            mode: mode.map(|m| m.as_str().to_string()),
            timestamp,
        };
        if velocity_change {
            self.velocity = location.velocity;
            movement.velocity = location.velocity.map(Into::into);
        }
        if angular_change {
            self.angular_velocity = location.angular_velocity;
            movement.angular_velocity = location.angular_velocity.map(Into::into);
        }
        if orientation_change {
            self.orientation = location.orientation;
            movement.orientation = location.orientation.map(|q| q.coords.into());
        }
        self.pos = location.pos;
        Some(movement)
    }
}
