//! Sweep direction

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Direction in which the orthogonality center moves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    /// The opposite direction
    pub fn reverse(self) -> Self {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            other => Err(CoreError::InvalidDirection(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_direction() {
        assert_eq!("left".parse::<Direction>().unwrap(), Direction::Left);
        assert_eq!("right".parse::<Direction>().unwrap(), Direction::Right);
    }

    #[test]
    fn test_parse_invalid_direction_names_value() {
        let err = "up".parse::<Direction>().unwrap_err();
        assert!(err.to_string().contains("'up'"));
    }

    #[test]
    fn test_reverse() {
        assert_eq!(Direction::Left.reverse(), Direction::Right);
        assert_eq!(Direction::Right.to_string(), "right");
    }
}
