//! Shipment status state machine.
//!
//! `pending -> in-transit -> delivered` is the happy path; `not-delivered` and
//! `returned` are side exits. Admins may set any status from any status, so
//! the only rule enforced here is who may move a shipment.

use serde::Serialize;

use crate::auth::RequestContext;
use crate::error::ShipmentError;
use crate::models::ShipmentStatus;

impl ShipmentStatus {
    pub const INITIAL: ShipmentStatus = ShipmentStatus::Pending;

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::NotDelivered | Self::Returned)
    }

    /// Position on the happy path, if the status is on it.
    pub fn step_index(self) -> Option<usize> {
        STEPS.iter().position(|(status, _)| *status == self)
    }
}

const STEPS: [(ShipmentStatus, &str); 3] = [
    (ShipmentStatus::Pending, "Order Placed"),
    (ShipmentStatus::InTransit, "In Transit"),
    (ShipmentStatus::Delivered, "Delivered"),
];

/// An admin-authorized status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ShipmentStatus,
    pub to: ShipmentStatus,
}

impl Transition {
    pub fn authorize(
        ctx: &RequestContext,
        from: ShipmentStatus,
        to: ShipmentStatus,
    ) -> Result<Self, ShipmentError> {
        let admin = ctx.require_admin()?;
        let transition = Self { from, to };
        if from.is_terminal() && !transition.is_noop() {
            tracing::warn!(admin = %admin.email, %from, %to, "moving shipment out of a terminal status");
        }
        Ok(transition)
    }

    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStep {
    pub status: ShipmentStatus,
    pub label: &'static str,
    pub completed: bool,
    pub current: bool,
}

/// Progress bar shown on the tracking page.
pub fn progress_steps(current: ShipmentStatus) -> Vec<ProgressStep> {
    let current_index = current.step_index();
    STEPS
        .iter()
        .enumerate()
        .map(|(index, (status, label))| ProgressStep {
            status: *status,
            label: *label,
            completed: current_index.is_some_and(|current| index <= current),
            current: current_index == Some(index),
        })
        .collect()
}
