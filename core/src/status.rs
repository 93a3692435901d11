//! Shipment lifecycle states and the legal transitions between them.
//!
//! The transition graph is fixed:
//!
//! - `PLANNED` → `INITIATED`, `SENT`, `ROLLBACK`
//! - `INITIATED` → `SENT`, `DELIVERED`, `ROLLBACK`
//! - `SENT` → `DELIVERED`, `ROLLBACK`
//! - `DELIVERED` → `ROLLBACK`
//! - `ROLLBACK` is terminal
//!
//! Every pair not listed is illegal, including self-transitions. The rules are
//! consulted only when an existing record is about to be overwritten; the
//! initial insert of a shipment is not a transition.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a shipment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
    /// Shipment has been planned but no goods have moved.
    Planned,
    /// Picking/packing has started.
    Initiated,
    /// Goods have left the warehouse.
    Sent,
    /// Goods have arrived at the destination.
    Delivered,
    /// Shipment was cancelled or reversed. Absorbing.
    Rollback,
}

impl ShipmentStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Planned,
        Self::Initiated,
        Self::Sent,
        Self::Delivered,
        Self::Rollback,
    ];

    /// Wire name of the status (`"PLANNED"`, `"SENT"`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "PLANNED",
            Self::Initiated => "INITIATED",
            Self::Sent => "SENT",
            Self::Delivered => "DELIVERED",
            Self::Rollback => "ROLLBACK",
        }
    }

    /// Statuses reachable from `self` in one step.
    #[must_use]
    pub const fn allowed_transitions(self) -> &'static [Self] {
        match self {
            Self::Planned => &[Self::Initiated, Self::Sent, Self::Rollback],
            Self::Initiated => &[Self::Sent, Self::Delivered, Self::Rollback],
            Self::Sent => &[Self::Delivered, Self::Rollback],
            Self::Delivered => &[Self::Rollback],
            Self::Rollback => &[],
        }
    }

    /// Returns `true` when no transition leaves this status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rollback)
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns whether a shipment in `current` may move to `target`.
///
/// Pure and total over the status pair space. Absent from the table means
/// illegal.
///
/// # Examples
///
/// ```
/// use warehouse_sync_core::status::{ShipmentStatus, can_transition};
///
/// assert!(can_transition(ShipmentStatus::Planned, ShipmentStatus::Sent));
/// assert!(!can_transition(ShipmentStatus::Sent, ShipmentStatus::Planned));
/// assert!(!can_transition(ShipmentStatus::Rollback, ShipmentStatus::Rollback));
/// ```
#[must_use]
pub const fn can_transition(current: ShipmentStatus, target: ShipmentStatus) -> bool {
    use ShipmentStatus::{Delivered, Initiated, Planned, Rollback, Sent};

    matches!(
        (current, target),
        (Planned, Initiated | Sent | Rollback)
            | (Initiated, Sent | Delivered | Rollback)
            | (Sent, Delivered | Rollback)
            | (Delivered, Rollback)
    )
}
