//! Current state of the user terminal, as answered to a `get_status` request.
//!
//! Unlike the history buffer this is a single reading, reported as up to
//! three groups: general status, obstruction detail and alert detail.

use std::collections::BTreeSet;

use crate::history::{FieldValue, StatsGroup};

/// State reported when the terminal did not answer the status request.
pub const UNREACHABLE_STATE: &str = "DISH_UNREACHABLE";

/// Every state the terminal is known to report, plus [`UNREACHABLE_STATE`].
pub const STATES: [&str; 11] = [
    "UNKNOWN",
    "CONNECTED",
    "BOOTING",
    "SEARCHING",
    "STOWED",
    "THERMAL_SHUTDOWN",
    "NO_SATS",
    "OBSTRUCTED",
    "NO_DOWNLINK",
    "NO_PINGS",
    UNREACHABLE_STATE,
];

/// Alerts with a fixed column, in bit order of the `alerts` field.
pub const KNOWN_ALERTS: [&str; 9] = [
    "motors_stuck",
    "thermal_shutdown",
    "thermal_throttle",
    "unexpected_location",
    "mast_not_near_vertical",
    "slow_ethernet_speeds",
    "roaming",
    "install_pending",
    "is_heating",
];

/// Number of 30 degree wedges the obstruction detail is split in, starting
/// North and turning East.
pub const WEDGES: usize = 12;

/// Optional status groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    Status,
    ObstructionDetail,
    AlertDetail,
}

impl StatusKind {
    pub const ALL: [StatusKind; 3] = [
        StatusKind::Status,
        StatusKind::ObstructionDetail,
        StatusKind::AlertDetail,
    ];
}

/// General status. Every field is `None` when the terminal was unreachable,
/// except the state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusData {
    pub id: Option<String>,
    pub hardware_version: Option<String>,
    pub software_version: Option<String>,
    pub state: Option<String>,
    /// Seconds since the terminal booted.
    pub uptime: Option<u64>,
    /// No longer reported by the terminal, always empty.
    pub snr: Option<f64>,
    pub seconds_to_first_nonempty_slot: Option<f64>,
    pub pop_ping_drop_rate: Option<f64>,
    pub downlink_throughput_bps: Option<f64>,
    pub uplink_throughput_bps: Option<f64>,
    pub pop_ping_latency_ms: Option<f64>,
    /// Bit field of the active alerts, see [`KNOWN_ALERTS`].
    pub alerts: Option<u64>,
    pub fraction_obstructed: Option<f64>,
    pub currently_obstructed: Option<bool>,
    /// No longer reported by the terminal, always empty.
    pub seconds_obstructed: Option<f64>,
    /// Average length of prolonged obstructions, in seconds.
    pub obstruction_duration: Option<f64>,
    /// Average time between the start of prolonged obstructions, in seconds.
    pub obstruction_interval: Option<f64>,
    pub direction_azimuth: Option<f64>,
    pub direction_elevation: Option<f64>,
    pub is_snr_above_noise_floor: Option<bool>,
}

impl StatsGroup for StatusData {
    fn name(&self) -> &'static str {
        "status"
    }

    fn category(&self) -> &'static str {
        "status"
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("id", FieldValue::scalar(self.id.clone())),
            (
                "hardware_version",
                FieldValue::scalar(self.hardware_version.clone()),
            ),
            (
                "software_version",
                FieldValue::scalar(self.software_version.clone()),
            ),
            ("state", FieldValue::scalar(self.state.clone())),
            ("uptime", FieldValue::scalar(self.uptime)),
            ("snr", FieldValue::scalar(self.snr)),
            (
                "seconds_to_first_nonempty_slot",
                FieldValue::scalar(self.seconds_to_first_nonempty_slot),
            ),
            ("pop_ping_drop_rate", FieldValue::scalar(self.pop_ping_drop_rate)),
            (
                "downlink_throughput_bps",
                FieldValue::scalar(self.downlink_throughput_bps),
            ),
            (
                "uplink_throughput_bps",
                FieldValue::scalar(self.uplink_throughput_bps),
            ),
            ("pop_ping_latency_ms", FieldValue::scalar(self.pop_ping_latency_ms)),
            ("alerts", FieldValue::scalar(self.alerts)),
            ("fraction_obstructed", FieldValue::scalar(self.fraction_obstructed)),
            (
                "currently_obstructed",
                FieldValue::scalar(self.currently_obstructed),
            ),
            ("seconds_obstructed", FieldValue::scalar(self.seconds_obstructed)),
            (
                "obstruction_duration",
                FieldValue::scalar(self.obstruction_duration),
            ),
            (
                "obstruction_interval",
                FieldValue::scalar(self.obstruction_interval),
            ),
            ("direction_azimuth", FieldValue::scalar(self.direction_azimuth)),
            ("direction_elevation", FieldValue::scalar(self.direction_elevation)),
            (
                "is_snr_above_noise_floor",
                FieldValue::scalar(self.is_snr_above_noise_floor),
            ),
        ]
    }
}

/// Fraction of the sky found obstructed, per wedge.
#[derive(Debug, Clone, PartialEq)]
pub struct ObstructionDetail {
    /// Fraction of the whole sky, so they add up to `fraction_obstructed`.
    pub wedges_fraction_obstructed: [Option<f64>; WEDGES],
    /// Same wedges, on a scale of their own.
    pub raw_wedges_fraction_obstructed: [Option<f64>; WEDGES],
    pub valid_s: Option<f64>,
}

impl Default for ObstructionDetail {
    fn default() -> Self {
        Self {
            wedges_fraction_obstructed: [None; WEDGES],
            raw_wedges_fraction_obstructed: [None; WEDGES],
            valid_s: None,
        }
    }
}

impl ObstructionDetail {
    /// Fit a reported list in the fixed wedge count, padding or truncating.
    pub fn wedges(values: &[f64]) -> [Option<f64>; WEDGES] {
        let mut wedges = [None; WEDGES];
        for (wedge, value) in wedges.iter_mut().zip(values) {
            *wedge = Some(*value);
        }
        wedges
    }
}

impl StatsGroup for ObstructionDetail {
    fn name(&self) -> &'static str {
        "obstruction_detail"
    }

    fn category(&self) -> &'static str {
        "status"
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            (
                "wedges_fraction_obstructed",
                FieldValue::sequence(0, &self.wedges_fraction_obstructed),
            ),
            (
                "raw_wedges_fraction_obstructed",
                FieldValue::sequence(0, &self.raw_wedges_fraction_obstructed),
            ),
            ("valid_s", FieldValue::scalar(self.valid_s)),
        ]
    }
}

/// Alerts currently raised by the terminal, by snake case name. `None` when
/// the terminal was unreachable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertDetail {
    pub active: Option<BTreeSet<String>>,
}

impl AlertDetail {
    pub fn new(active: BTreeSet<String>) -> Self {
        Self {
            active: Some(active),
        }
    }

    pub fn is_active(&self, alert: &str) -> Option<bool> {
        self.active.as_ref().map(|active| active.contains(alert))
    }

    /// Known alerts as a bit field, bit `n` for the `n`th of [`KNOWN_ALERTS`].
    pub fn bits(&self) -> Option<u64> {
        let active = self.active.as_ref()?;
        Some(
            KNOWN_ALERTS
                .iter()
                .enumerate()
                .filter(|(_, alert)| active.contains(**alert))
                .fold(0, |bits, (bit, _)| bits | 1u64 << bit),
        )
    }
}

impl StatsGroup for AlertDetail {
    fn name(&self) -> &'static str {
        "alert_detail"
    }

    fn category(&self) -> &'static str {
        "status"
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        const NAMES: [&str; 9] = [
            "alert_motors_stuck",
            "alert_thermal_shutdown",
            "alert_thermal_throttle",
            "alert_unexpected_location",
            "alert_mast_not_near_vertical",
            "alert_slow_ethernet_speeds",
            "alert_roaming",
            "alert_install_pending",
            "alert_is_heating",
        ];

        NAMES
            .into_iter()
            .zip(KNOWN_ALERTS)
            .map(|(name, alert)| (name, FieldValue::scalar(self.is_active(alert))))
            .collect()
    }
}

/// One status reading, split in its reporting groups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DishStatus {
    pub status: StatusData,
    pub obstruction_detail: ObstructionDetail,
    pub alert_detail: AlertDetail,
}

impl DishStatus {
    /// Reading recorded in place of a failed status request.
    pub fn unreachable() -> Self {
        Self {
            status: StatusData {
                state: Some(UNREACHABLE_STATE.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn is_unreachable(&self) -> bool {
        self.status.state.as_deref() == Some(UNREACHABLE_STATE)
    }

    pub fn group(&self, kind: StatusKind) -> &dyn StatsGroup {
        match kind {
            StatusKind::Status => &self.status,
            StatusKind::ObstructionDetail => &self.obstruction_detail,
            StatusKind::AlertDetail => &self.alert_detail,
        }
    }

    /// The requested groups, in `kinds` order.
    pub fn groups(&self, kinds: &[StatusKind]) -> Vec<&dyn StatsGroup> {
        kinds.iter().map(|&kind| self.group(kind)).collect()
    }
}
