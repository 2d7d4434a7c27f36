use serde::{Serialize, Serializer};
use serde_json::value::RawValue;
use thiserror::Error;

use crate::types::Reading;

const FIELD_PLACES: usize = 2;
const GAS_RESISTANCE_PLACES: usize = 0;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("{field} is not a finite number ({value})")]
    NonFinite { field: &'static str, value: f32 },
    #[error("failed to serialize payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct TelemetryPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    device_id: Option<&'a str>,
    #[serde(serialize_with = "two_places")]
    temperature: f32,
    #[serde(serialize_with = "two_places")]
    humidity: f32,
    #[serde(serialize_with = "two_places")]
    pressure: f32,
    #[serde(serialize_with = "whole")]
    gas_resistance: f32,
}

pub fn encode(reading: &Reading, device_id: Option<&str>) -> Result<String, EncodeError> {
    for (field, value) in [
        ("temperature", reading.temperature),
        ("humidity", reading.humidity),
        ("pressure", reading.pressure),
        ("gas_resistance", reading.gas_resistance),
    ] {
        if !value.is_finite() {
            return Err(EncodeError::NonFinite { field, value });
        }
    }

    let payload = TelemetryPayload {
        device_id,
        temperature: reading.temperature,
        humidity: reading.humidity,
        pressure: reading.pressure,
        gas_resistance: reading.gas_resistance,
    };
    Ok(serde_json::to_string(&payload)?)
}

fn two_places<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
    fixed(*value, FIELD_PLACES, serializer)
}

fn whole<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
    fixed(*value, GAS_RESISTANCE_PLACES, serializer)
}

// serde_json would print the shortest round-trip form (`41.2`), so emit the
// fixed-precision text as a raw number token instead.
fn fixed<S: Serializer>(value: f32, places: usize, serializer: S) -> Result<S::Ok, S::Error> {
    use serde::ser::Error as _;

    let raw = RawValue::from_string(format!("{value:.places$}")).map_err(S::Error::custom)?;
    raw.serialize(serializer)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    use super::*;

    fn sample() -> Reading {
        Reading {
            temperature: 23.456,
            humidity: 41.2,
            pressure: 1013.25,
            gas_resistance: 50432.0,
        }
    }

    #[test]
    fn encodes_reference_reading() {
        let json = encode(&sample(), Some("dev-1")).unwrap();
        assert_eq!(
            json,
            r#"{"device_id":"dev-1","temperature":23.46,"humidity":41.20,"pressure":1013.25,"gas_resistance":50432}"#
        );
    }

    #[test]
    fn omits_device_id_when_unset() {
        let json = encode(&sample(), None).unwrap();
        assert_eq!(
            json,
            r#"{"temperature":23.46,"humidity":41.20,"pressure":1013.25,"gas_resistance":50432}"#
        );
    }

    #[test]
    fn output_parses_with_fixed_key_order() {
        let readings = [
            sample(),
            Reading {
                temperature: -12.0,
                humidity: 0.0,
                pressure: 870.1,
                gas_resistance: 1_250_000.4,
            },
            Reading {
                temperature: 85.0,
                humidity: 100.0,
                pressure: 1100.0,
                gas_resistance: 0.6,
            },
        ];

        for reading in readings {
            let json = encode(&reading, Some("roof")).unwrap();
            assert!(!json.contains(' '), "payload has whitespace: {json}");

            let value: Value = serde_json::from_str(&json).unwrap();
            assert_eq!(value.as_object().unwrap().len(), 5);

            let positions: Vec<usize> = [
                "device_id",
                "temperature",
                "humidity",
                "pressure",
                "gas_resistance",
            ]
            .iter()
            .map(|key| json.find(&format!("\"{key}\":")).unwrap())
            .collect();
            assert!(
                positions.windows(2).all(|pair| pair[0] < pair[1]),
                "keys out of order: {json}"
            );

            for field in ["temperature", "humidity", "pressure"] {
                let parsed = value[field].as_f64().unwrap();
                let expected = (f64::from(reading_field(&reading, field)) * 100.0).round() / 100.0;
                assert!(
                    (parsed - expected).abs() < 0.005 + f64::EPSILON,
                    "{field}: {parsed} vs {expected}"
                );
                let text = json
                    .split(&format!("\"{field}\":"))
                    .nth(1)
                    .and_then(|rest| rest.split([',', '}']).next())
                    .unwrap();
                assert_eq!(text.split('.').nth(1).map(str::len), Some(2), "{field}={text}");
            }
        }
    }

    fn reading_field(reading: &Reading, field: &str) -> f32 {
        match field {
            "temperature" => reading.temperature,
            "humidity" => reading.humidity,
            "pressure" => reading.pressure,
            _ => reading.gas_resistance,
        }
    }

    #[test]
    fn gas_resistance_is_rounded_to_whole_ohms() {
        let reading = Reading {
            gas_resistance: 12_345.7,
            ..sample()
        };
        let value: Value = serde_json::from_str(&encode(&reading, None).unwrap()).unwrap();
        assert_eq!(value["gas_resistance"], Value::from(12_346));
    }

    #[test]
    fn device_id_is_escaped() {
        let json = encode(&sample(), Some("lab \"b\"")).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["device_id"], "lab \"b\"");
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let reading = Reading {
            humidity: f32::NAN,
            ..sample()
        };
        assert!(matches!(
            encode(&reading, None),
            Err(EncodeError::NonFinite {
                field: "humidity",
                ..
            })
        ));

        let reading = Reading {
            gas_resistance: f32::INFINITY,
            ..sample()
        };
        assert!(matches!(
            encode(&reading, None),
            Err(EncodeError::NonFinite {
                field: "gas_resistance",
                ..
            })
        ));
    }
}
