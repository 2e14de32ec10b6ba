use std::{collections::BTreeMap, str::FromStr};

use serde::Deserialize;
use tracing::*;

use super::DeviceError;
use crate::{
    history::RawHistorySnapshot,
    status::{AlertDetail, DishStatus, ObstructionDetail, StatusData, KNOWN_ALERTS, WEDGES},
};

/// `uint64` values, and floats that are not finite, are rendered as strings by
/// proto3 JSON, but hand written files often use plain numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Number<T> {
    Number(T),
    Text(String),
}

type Counter = Number<u64>;

impl<T: FromStr + Copy> Number<T> {
    fn parse(&self) -> Option<T> {
        match self {
            Number::Number(value) => Some(*value),
            Number::Text(text) => text.trim().parse().ok(),
        }
    }

    fn value(&self, field: &'static str) -> Result<T, DeviceError> {
        self.parse().ok_or_else(|| DeviceError::InvalidNumber {
            field,
            value: match self {
                Number::Text(text) => text.clone(),
                Number::Number(_) => String::new(),
            },
        })
    }
}

/// Read an optional proto3 number, absent meaning zero.
fn number<T: FromStr + Copy + Default>(
    field: &'static str,
    value: &Option<Number<T>>,
) -> Result<T, DeviceError> {
    value
        .as_ref()
        .map_or(Ok(T::default()), |number| number.value(field))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct HistoryMessage {
    current: Option<Counter>,
    pop_ping_drop_rate: Option<Vec<f64>>,
    pop_ping_latency_ms: Option<Vec<f64>>,
    downlink_throughput_bps: Option<Vec<f64>>,
    uplink_throughput_bps: Option<Vec<f64>>,
    snr: Option<Vec<f64>>,
    scheduled: Option<Vec<bool>>,
    obstructed: Option<Vec<bool>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Response {
    Wrapped {
        #[serde(rename = "dishGetHistory")]
        dish_get_history: HistoryMessage,
    },
    Bare(HistoryMessage),
}

impl HistoryMessage {
    fn capacity(&self) -> usize {
        [
            self.pop_ping_drop_rate.as_ref().map(Vec::len),
            self.pop_ping_latency_ms.as_ref().map(Vec::len),
            self.downlink_throughput_bps.as_ref().map(Vec::len),
            self.uplink_throughput_bps.as_ref().map(Vec::len),
            self.snr.as_ref().map(Vec::len),
            self.scheduled.as_ref().map(Vec::len),
            self.obstructed.as_ref().map(Vec::len),
        ]
        .into_iter()
        .flatten()
        .next()
        .unwrap_or_default()
    }
}

/// Decode a `get_history` response, either the full `grpcurl` output or just
/// the inner `dishGetHistory` object.
pub fn parse_history(text: &str) -> Result<RawHistorySnapshot, DeviceError> {
    let message = match serde_json::from_str::<Response>(text)? {
        Response::Wrapped { dish_get_history } => dish_get_history,
        Response::Bare(message) => message,
    };

    let write_counter = match &message.current {
        None => 0,
        Some(counter) => counter.parse().ok_or_else(|| {
            DeviceError::InvalidCounter(match counter {
                Counter::Text(text) => text.clone(),
                Counter::Number(number) => number.to_string(),
            })
        })?,
    };

    let snapshot = RawHistorySnapshot {
        write_counter,
        capacity: message.capacity(),
        is_contiguous: false,
        pop_ping_drop_rate: message.pop_ping_drop_rate,
        pop_ping_latency_ms: message.pop_ping_latency_ms,
        downlink_throughput_bps: message.downlink_throughput_bps,
        uplink_throughput_bps: message.uplink_throughput_bps,
        snr: message.snr,
        scheduled: message.scheduled,
        obstructed: message.obstructed,
    };
    snapshot.validate()?;

    Ok(snapshot)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DeviceInfo {
    id: String,
    hardware_version: String,
    software_version: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DeviceState {
    uptime_s: Option<Counter>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ObstructionStats {
    fraction_obstructed: Option<Number<f64>>,
    currently_obstructed: bool,
    valid_s: Option<Number<f64>>,
    wedge_fraction_obstructed: Vec<Number<f64>>,
    wedge_abs_fraction_obstructed: Vec<Number<f64>>,
    avg_prolonged_obstruction_duration_s: Option<Number<f64>>,
    avg_prolonged_obstruction_interval_s: Option<Number<f64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Outage {
    #[serde(default)]
    cause: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StatusMessage {
    device_info: DeviceInfo,
    device_state: DeviceState,
    outage: Option<Outage>,
    seconds_to_first_nonempty_slot: Option<Number<f64>>,
    pop_ping_drop_rate: Option<Number<f64>>,
    downlink_throughput_bps: Option<Number<f64>>,
    uplink_throughput_bps: Option<Number<f64>>,
    pop_ping_latency_ms: Option<Number<f64>>,
    alerts: BTreeMap<String, bool>,
    obstruction_stats: ObstructionStats,
    boresight_azimuth_deg: Option<Number<f64>>,
    boresight_elevation_deg: Option<Number<f64>>,
    is_snr_above_noise_floor: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StatusResponse {
    Wrapped {
        #[serde(rename = "dishGetStatus")]
        dish_get_status: StatusMessage,
    },
    Bare(StatusMessage),
}

/// `motorsStuck` to `motors_stuck`. Names already in snake case are kept.
fn snake_case(name: &str) -> String {
    let mut snake = String::with_capacity(name.len() + 4);
    for character in name.chars() {
        if character.is_ascii_uppercase() {
            snake.push('_');
            snake.push(character.to_ascii_lowercase());
        } else {
            snake.push(character);
        }
    }
    snake
}

fn wedges(values: &[Number<f64>]) -> Result<[Option<f64>; WEDGES], DeviceError> {
    let values = values
        .iter()
        .map(|value| value.value("wedgeFractionObstructed"))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ObstructionDetail::wedges(&values))
}

/// Decode a `get_status` response, either the full `grpcurl` output or just
/// the inner `dishGetStatus` object.
pub fn parse_status(text: &str) -> Result<DishStatus, DeviceError> {
    let message = match serde_json::from_str::<StatusResponse>(text)? {
        StatusResponse::Wrapped { dish_get_status } => dish_get_status,
        StatusResponse::Bare(message) => message,
    };

    let state = match &message.outage {
        None => "CONNECTED".to_string(),
        Some(outage) => match outage.cause.as_deref() {
            // Older firmware called this state searching
            Some("NO_SCHEDULE") => "SEARCHING".to_string(),
            Some(cause) => cause.to_string(),
            None => "UNKNOWN".to_string(),
        },
    };

    let alert_detail = AlertDetail::new(
        message
            .alerts
            .iter()
            .filter(|(_, active)| **active)
            .map(|(name, _)| snake_case(name))
            .collect(),
    );
    let unknown = alert_detail
        .active
        .iter()
        .flatten()
        .filter(|alert| !KNOWN_ALERTS.contains(&alert.as_str()))
        .collect::<Vec<_>>();
    if !unknown.is_empty() {
        debug!("Ignoring unknown alerts: {unknown:?}");
    }

    let obstruction = &message.obstruction_stats;
    let duration = number(
        "avgProlongedObstructionDurationS",
        &obstruction.avg_prolonged_obstruction_duration_s,
    )?;
    let interval = number(
        "avgProlongedObstructionIntervalS",
        &obstruction.avg_prolonged_obstruction_interval_s,
    )?;
    // Only meaningful once a prolonged obstruction was seen
    let (obstruction_duration, obstruction_interval) = if duration > 0.0 && !interval.is_nan() {
        (Some(duration), Some(interval))
    } else {
        (None, None)
    };

    let status = StatusData {
        id: Some(message.device_info.id),
        hardware_version: Some(message.device_info.hardware_version),
        software_version: Some(message.device_info.software_version),
        state: Some(state),
        uptime: Some(number("uptimeS", &message.device_state.uptime_s)?),
        snr: None,
        seconds_to_first_nonempty_slot: Some(number(
            "secondsToFirstNonemptySlot",
            &message.seconds_to_first_nonempty_slot,
        )?),
        pop_ping_drop_rate: Some(number("popPingDropRate", &message.pop_ping_drop_rate)?),
        downlink_throughput_bps: Some(number(
            "downlinkThroughputBps",
            &message.downlink_throughput_bps,
        )?),
        uplink_throughput_bps: Some(number(
            "uplinkThroughputBps",
            &message.uplink_throughput_bps,
        )?),
        pop_ping_latency_ms: Some(number("popPingLatencyMs", &message.pop_ping_latency_ms)?),
        alerts: alert_detail.bits(),
        fraction_obstructed: Some(number(
            "fractionObstructed",
            &obstruction.fraction_obstructed,
        )?),
        currently_obstructed: Some(obstruction.currently_obstructed),
        seconds_obstructed: None,
        obstruction_duration,
        obstruction_interval,
        direction_azimuth: Some(number(
            "boresightAzimuthDeg",
            &message.boresight_azimuth_deg,
        )?),
        direction_elevation: Some(number(
            "boresightElevationDeg",
            &message.boresight_elevation_deg,
        )?),
        is_snr_above_noise_floor: Some(message.is_snr_above_noise_floor),
    };

    let obstruction_detail = ObstructionDetail {
        wedges_fraction_obstructed: wedges(&obstruction.wedge_abs_fraction_obstructed)?,
        raw_wedges_fraction_obstructed: wedges(&obstruction.wedge_fraction_obstructed)?,
        valid_s: Some(number("validS", &obstruction.valid_s)?),
    };

    Ok(DishStatus {
        status,
        obstruction_detail,
        alert_detail,
    })
}
