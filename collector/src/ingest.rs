use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::risk::{self, RiskAssessment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("No data provided")]
    Empty,
    #[error("Invalid JSON")]
    InvalidJson,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredReading {
    pub device_id: String,
    pub timestamp: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub gas_resistance: Option<f64>,
    #[serde(flatten)]
    pub assessment: RiskAssessment,
}

struct InvalidValue;

/// Turns one POSTed body into a stored reading. Keys other than the device id
/// and the four sensor values are dropped.
pub fn parse(
    body: &[u8],
    default_device_id: &str,
    timestamp: String,
) -> Result<StoredReading, IngestError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(IngestError::Empty);
    }
    let value: Value = serde_json::from_slice(body).map_err(|_| IngestError::InvalidJson)?;
    let object = match value {
        Value::Object(object) if !object.is_empty() => object,
        _ => return Err(IngestError::Empty),
    };

    let device_id = object
        .get("device_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .unwrap_or(default_device_id)
        .to_string();

    let fields = (
        number(&object, "temperature"),
        number(&object, "humidity"),
        number(&object, "pressure"),
        number(&object, "gas_resistance"),
    );
    let reading = match fields {
        (Ok(temperature), Ok(humidity), Ok(pressure), Ok(gas_resistance)) => StoredReading {
            device_id,
            timestamp,
            temperature,
            humidity,
            pressure,
            gas_resistance,
            assessment: risk::assess(temperature, humidity, gas_resistance),
        },
        (temperature, humidity, pressure, gas_resistance) => StoredReading {
            device_id,
            timestamp,
            temperature: temperature.ok().flatten(),
            humidity: humidity.ok().flatten(),
            pressure: pressure.ok().flatten(),
            gas_resistance: gas_resistance.ok().flatten(),
            assessment: RiskAssessment::invalid_values(),
        },
    };
    Ok(reading)
}

// Numbers sent as strings are accepted; null counts as missing.
fn number(object: &Map<String, Value>, key: &str) -> Result<Option<f64>, InvalidValue> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number.as_f64().map(Some).ok_or(InvalidValue),
        Some(Value::String(text)) => text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(Some)
            .ok_or(InvalidValue),
        Some(_) => Err(InvalidValue),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use telemetry_common::{payload::encode, Reading};

    use super::*;
    use crate::risk::RiskLevel;

    const NOW: &str = "2026-10-18T09:30:00.000000Z";

    fn ingest(body: &str) -> Result<StoredReading, IngestError> {
        parse(body.as_bytes(), "device-1", NOW.to_string())
    }

    #[test]
    fn accepts_node_payload() {
        let reading = Reading {
            temperature: 23.456,
            humidity: 41.2,
            pressure: 1013.25,
            gas_resistance: 50432.0,
        };
        let body = encode(&reading, Some("dev-1")).unwrap();

        let stored = ingest(&body).unwrap();
        assert_eq!(stored.device_id, "dev-1");
        assert_eq!(stored.timestamp, NOW);
        assert_eq!(stored.temperature, Some(23.46));
        assert_eq!(stored.humidity, Some(41.2));
        assert_eq!(stored.pressure, Some(1013.25));
        assert_eq!(stored.gas_resistance, Some(50432.0));
        assert_eq!(stored.assessment.risk, RiskLevel::Safe);
    }

    #[test]
    fn fills_in_default_device_id() {
        let stored = ingest(r#"{"temperature":21.0,"humidity":40.0}"#).unwrap();
        assert_eq!(stored.device_id, "device-1");

        let stored = ingest(r#"{"device_id":"","temperature":21.0}"#).unwrap();
        assert_eq!(stored.device_id, "device-1");
    }

    #[test]
    fn rejects_empty_bodies() {
        assert_eq!(ingest(""), Err(IngestError::Empty));
        assert_eq!(ingest("  \r\n"), Err(IngestError::Empty));
        assert_eq!(ingest("{}"), Err(IngestError::Empty));
        assert_eq!(ingest("null"), Err(IngestError::Empty));
        assert_eq!(ingest("[1,2]"), Err(IngestError::Empty));
    }

    #[test]
    fn rejects_malformed_json() {
        assert_eq!(ingest(r#"{"temperature":"#), Err(IngestError::InvalidJson));
        assert_eq!(ingest("temperature=21"), Err(IngestError::InvalidJson));
    }

    #[test]
    fn partial_readings_are_kept_but_flagged() {
        let stored = ingest(r#"{"temperature":21.0,"humidity":null}"#).unwrap();
        assert_eq!(stored.humidity, None);
        assert_eq!(stored.assessment.risk, RiskLevel::Elevated);
        assert_eq!(
            stored.assessment.risk_reasons,
            vec!["Missing one or more required sensor values"]
        );
    }

    #[test]
    fn numeric_strings_count_and_other_types_do_not() {
        let stored =
            ingest(r#"{"temperature":"21.5","humidity":"45","gas_resistance":52000}"#).unwrap();
        assert_eq!(stored.temperature, Some(21.5));
        assert_eq!(stored.assessment.risk, RiskLevel::Safe);

        let stored =
            ingest(r#"{"temperature":true,"humidity":45,"gas_resistance":52000}"#).unwrap();
        assert_eq!(stored.temperature, None);
        assert_eq!(stored.humidity, Some(45.0));
        assert_eq!(
            stored.assessment.risk_reasons,
            vec!["Invalid sensor value types"]
        );
    }

    #[test]
    fn stored_reading_serializes_flat() {
        let stored = ingest(
            r#"{"device_id":"lab","temperature":21.0,"humidity":45.0,"pressure":1000.0,"gas_resistance":52000}"#,
        )
        .unwrap();
        let value = serde_json::to_value(&stored).unwrap();
        assert_eq!(value["risk"], "SAFE");
        assert_eq!(value["device_id"], "lab");
        assert_eq!(value["timestamp"], NOW);
        assert_eq!(value["gas_resistance"], 52000.0);
    }
}
