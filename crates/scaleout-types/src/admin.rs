//! Administrative state of a kernel link.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Administrative state of a link, as reported by the `IFF_UP` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminState {
    /// Link is administratively down.
    #[default]
    Down,
    /// Link is administratively up.
    Up,
}

impl AdminState {
    /// Maps the kernel `IFF_UP` flag to an admin state.
    pub const fn from_up_flag(up: bool) -> Self {
        if up { AdminState::Up } else { AdminState::Down }
    }

    /// Returns true if the link is administratively up.
    pub const fn is_up(&self) -> bool {
        matches!(self, AdminState::Up)
    }

    /// Returns true if the link is administratively down.
    pub const fn is_down(&self) -> bool {
        matches!(self, AdminState::Down)
    }
}

impl fmt::Display for AdminState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminState::Up => write!(f, "up"),
            AdminState::Down => write!(f, "down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_up_flag() {
        assert_eq!(AdminState::from_up_flag(true), AdminState::Up);
        assert_eq!(AdminState::from_up_flag(false), AdminState::Down);
        assert!(AdminState::default().is_down());
    }

    #[test]
    fn test_display() {
        assert_eq!(AdminState::Up.to_string(), "up");
        assert_eq!(AdminState::Down.to_string(), "down");
    }
}
