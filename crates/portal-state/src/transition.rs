//! The `ServerStatus` transition table.
//!
//! A static table, not inheritance:
//! every legal edge is listed once here and `is_legal` is the only place
//! that consults it.

use portal_types::ServerStatus;

/// Returns the node's legal outgoing edges.
pub fn legal_targets(from: ServerStatus) -> &'static [ServerStatus] {
    use ServerStatus::*;
    match from {
        Unknown => &[Initializing, Stopped, Error],
        Initializing => &[Starting, Error, Stopped],
        Starting => &[Running, Error, Stopped],
        Running => &[Stopping, Paused, Restarting, Error, Maintenance],
        Stopping => &[Stopped, Error],
        Stopped => &[Starting, Error],
        Error => &[Starting, Stopped, Maintenance],
        Maintenance => &[Starting, Stopped],
        Updating => &[Running, Error, Stopped],
        Paused => &[Running, Stopped, Error],
        Restarting => &[Running, Error, Stopped],
    }
}

/// Whether `from -> to` is a legal edge in the table above.
pub fn is_legal(from: ServerStatus, to: ServerStatus) -> bool {
    legal_targets(from).contains(&to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ServerStatus::*;

    #[test]
    fn stopped_cannot_jump_straight_to_running() {
        assert!(!is_legal(Stopped, Running));
    }

    #[test]
    fn running_can_stop() {
        assert!(is_legal(Running, Stopping));
    }

    #[test]
    fn every_node_has_a_defined_edge_set() {
        for status in [
            Unknown, Initializing, Starting, Running, Stopping, Stopped, Error, Maintenance,
            Updating, Paused, Restarting,
        ] {
            // Must not panic: every variant is covered by the match in legal_targets.
            let _ = legal_targets(status);
        }
    }
}
