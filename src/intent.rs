//! Energy search intents, as produced by consumer agents that picked a
//! delivery window such as `"2025-09-04 00:00-06:00"`.

use crate::{
    config::ProtocolConfig,
    error::{GatewayError, Result},
    protocol::{Context, SearchEnvelope, ACTION_SEARCH},
};
use serde_json::json;

const DEFAULT_HOUR_RANGE: &str = "00:00-01:00";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

fn pad_hour(hour: &str) -> String {
    if hour.contains(':') {
        hour.to_string()
    } else {
        format!("{}:00", hour)
    }
}

/// Parses `"<date> <HH[:MM]>-<HH[:MM]>"`. A window without an hour range
/// covers the first hour of the day.
pub fn parse_time_window(window: &str) -> Result<TimeRange> {
    let mut parts = window.split_whitespace();
    let date = parts
        .next()
        .ok_or_else(|| GatewayError::Validation("Time window is empty".to_string()))?;
    let hours = parts.next().unwrap_or(DEFAULT_HOUR_RANGE);

    let (start, end) = hours
        .split_once('-')
        .ok_or_else(|| GatewayError::Validation(format!("Hour range '{}' has no '-'", hours)))?;
    let start = start.trim();
    let end = end.trim().replace(['"', ','], "");
    if start.is_empty() || end.is_empty() {
        return Err(GatewayError::Validation(format!("Hour range '{}' is incomplete", hours)));
    }

    Ok(TimeRange {
        start: format!("{}T{}", date, pad_hour(start)),
        end: format!("{}T{}", date, pad_hour(&end)),
    })
}

/// Renders a quantity the way agents write it: whole numbers keep one
/// decimal place (`10.0`).
fn format_quantity(quantity_kwh: f64) -> String {
    if quantity_kwh.fract() == 0.0 && quantity_kwh.abs() < 1e16 {
        format!("{:.1}", quantity_kwh)
    } else {
        quantity_kwh.to_string()
    }
}

/// Intent body asking for `quantity_kwh` delivered to `meter` within `range`.
pub fn energy_intent(capability: &str, range: &TimeRange, quantity_kwh: f64, meter: &str, utility: &str) -> serde_json::Value {
    json!({
        "intent": {
            "item": {
                "descriptor": { "code": capability },
                "quantity": {
                    "selected": {
                        "measure": { "value": format_quantity(quantity_kwh), "unit": "kWH" }
                    }
                }
            },
            "fulfillment": {
                "agent": {
                    "organization": { "descriptor": { "name": utility } }
                },
                "stops": [{
                    "type": "end",
                    "location": { "address": meter },
                    "time": {
                        "range": { "start": range.start, "end": range.end }
                    }
                }]
            }
        }
    })
}

#[derive(Debug, Clone)]
pub struct EnergySearch {
    pub capability: String,
    pub time_window: String,
    pub quantity_kwh: f64,
    pub meter: String,
    pub utility: String,
}

impl EnergySearch {
    pub fn new(time_window: impl Into<String>, quantity_kwh: f64) -> Self {
        Self {
            capability: "energy".to_string(),
            time_window: time_window.into(),
            quantity_kwh,
            meter: "der://uppcl.meter/98765456".to_string(),
            utility: "UPPCL".to_string(),
        }
    }

    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = capability.into();
        self
    }

    pub fn build(&self, config: &ProtocolConfig) -> Result<SearchEnvelope> {
        if !self.quantity_kwh.is_finite() || self.quantity_kwh <= 0.0 {
            return Err(GatewayError::Validation("Quantity must be greater than 0".to_string()));
        }
        let range = parse_time_window(&self.time_window)?;

        Ok(SearchEnvelope {
            context: Context::new(config, ACTION_SEARCH),
            message: energy_intent(&self.capability, &range, self.quantity_kwh, &self.meter, &self.utility),
        })
    }
}

/// Search from `requester` for `quantity_kwh` of energy within `time_window`,
/// using the default meter and utility.
pub fn build_energy_search(requester: &ProtocolConfig, time_window: &str, quantity_kwh: f64) -> Result<SearchEnvelope> {
    EnergySearch::new(time_window, quantity_kwh).build(requester)
}
