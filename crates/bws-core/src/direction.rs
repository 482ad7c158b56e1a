use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Head pose requested for a captured image.
///
/// The lowercase names double as the `tag` query value on upload and as the
/// entries of a token's challenge matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementDirection {
    /// No specific head orientation required.
    #[default]
    Any,
    Up,
    Down,
    Left,
    Right,
}

impl MovementDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementDirection::Any => "any",
            MovementDirection::Up => "up",
            MovementDirection::Down => "down",
            MovementDirection::Left => "left",
            MovementDirection::Right => "right",
        }
    }
}

impl fmt::Display for MovementDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown movement direction: {0:?}")]
pub struct UnknownDirection(pub String);

impl FromStr for MovementDirection {
    type Err = UnknownDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(MovementDirection::Any),
            "up" => Ok(MovementDirection::Up),
            "down" => Ok(MovementDirection::Down),
            "left" => Ok(MovementDirection::Left),
            "right" => Ok(MovementDirection::Right),
            _ => Err(UnknownDirection(s.to_string())),
        }
    }
}
