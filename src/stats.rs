use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;

use crate::models::{Shipment, ShipmentStatus};

/// Window for the "recent shipments" figure.
pub const RECENT_WINDOW_DAYS: i64 = 7;

/// Figures shown on a user's dashboard and analytics pages.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentStats {
    pub total: usize,
    pub pending: usize,
    pub in_transit: usize,
    pub delivered: usize,
    pub not_delivered: usize,
    pub returned: usize,
    pub recent: usize,
    pub total_revenue: f64,
    pub average_cost: f64,
    /// Delivered share of all shipments, in whole percent.
    pub delivery_rate: f64,
}

pub fn summarize(shipments: &[Shipment], now: DateTime<Utc>) -> ShipmentStats {
    let cutoff = now - Duration::days(RECENT_WINDOW_DAYS);
    let mut stats = ShipmentStats {
        total: shipments.len(),
        ..ShipmentStats::default()
    };

    for shipment in shipments {
        match shipment.status {
            ShipmentStatus::Pending => stats.pending += 1,
            ShipmentStatus::InTransit => stats.in_transit += 1,
            ShipmentStatus::Delivered => stats.delivered += 1,
            ShipmentStatus::NotDelivered => stats.not_delivered += 1,
            ShipmentStatus::Returned => stats.returned += 1,
        }
        if shipment.created_at > cutoff {
            stats.recent += 1;
        }
        stats.total_revenue += shipment.amount;
    }

    if stats.total > 0 {
        let total = stats.total as f64;
        stats.average_cost = (stats.total_revenue / total).round();
        stats.delivery_rate = (stats.delivered as f64 * 100.0 / total).round();
    }

    stats
}

/// Figures over the whole collection, shown on the public home page.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStats {
    pub total_shipments: usize,
    pub delivered: usize,
    /// Delivered share of all shipments, in whole percent.
    pub delivery_rate: f64,
    /// Distinct shipment owners.
    pub active_users: usize,
}

pub fn summarize_platform(shipments: &[Shipment]) -> PlatformStats {
    let delivered = shipments
        .iter()
        .filter(|shipment| shipment.status == ShipmentStatus::Delivered)
        .count();
    let active_users = shipments
        .iter()
        .map(|shipment| shipment.user_id.as_str())
        .collect::<HashSet<_>>()
        .len();
    let delivery_rate = if shipments.is_empty() {
        0.0
    } else {
        (delivered as f64 * 100.0 / shipments.len() as f64).round()
    };

    PlatformStats {
        total_shipments: shipments.len(),
        delivered,
        delivery_rate,
        active_users,
    }
}
