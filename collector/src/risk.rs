use serde::Serialize;

const HIGH_HUMIDITY: f64 = 70.0;
const LOW_HUMIDITY: f64 = 25.0;
const HIGH_TEMPERATURE: f64 = 28.0;
const LOW_TEMPERATURE: f64 = 16.0;
const POOR_AIR_OHMS: f64 = 20_000.0;
const MODERATE_AIR_OHMS: f64 = 30_000.0;

const SEVERE_HIGH_HUMIDITY: f64 = 80.0;
const SEVERE_LOW_HUMIDITY: f64 = 20.0;
const SEVERE_HIGH_TEMPERATURE: f64 = 30.0;
const SEVERE_LOW_TEMPERATURE: f64 = 14.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Safe,
    Elevated,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub risk: RiskLevel,
    pub risk_reasons: Vec<String>,
}

impl RiskAssessment {
    fn elevated(reason: &str) -> Self {
        Self {
            risk: RiskLevel::Elevated,
            risk_reasons: vec![reason.to_string()],
        }
    }

    pub fn invalid_values() -> Self {
        Self::elevated("Invalid sensor value types")
    }
}

/// Pressure plays no part in the assessment.
pub fn assess(
    temperature: Option<f64>,
    humidity: Option<f64>,
    gas_resistance: Option<f64>,
) -> RiskAssessment {
    let (Some(temp_c), Some(humidity), Some(gas_ohms)) = (temperature, humidity, gas_resistance)
    else {
        return RiskAssessment::elevated("Missing one or more required sensor values");
    };

    let mut reasons = Vec::new();
    if humidity >= HIGH_HUMIDITY {
        reasons.push("High Humidity (>= 70%)");
    } else if humidity <= LOW_HUMIDITY {
        reasons.push("Very Low Humidity (<= 25%)");
    }
    if temp_c >= HIGH_TEMPERATURE {
        reasons.push("High Temperature (>= 28°C)");
    } else if temp_c <= LOW_TEMPERATURE {
        reasons.push("Low Temperature (<= 16°C)");
    }
    if gas_ohms <= POOR_AIR_OHMS {
        reasons.push("Poor Air Quality (Gas Resistance <= 20kΩ)");
    } else if gas_ohms <= MODERATE_AIR_OHMS {
        reasons.push("Moderate Air Quality (Gas Resistance <= 30kΩ)");
    }

    if reasons.is_empty() {
        return RiskAssessment {
            risk: RiskLevel::Safe,
            risk_reasons: vec!["All sensor values within safe ranges".to_string()],
        };
    }

    let severe = humidity >= SEVERE_HIGH_HUMIDITY
        || humidity <= SEVERE_LOW_HUMIDITY
        || temp_c >= SEVERE_HIGH_TEMPERATURE
        || temp_c <= SEVERE_LOW_TEMPERATURE
        || gas_ohms <= POOR_AIR_OHMS;

    RiskAssessment {
        risk: if severe {
            RiskLevel::Warning
        } else {
            RiskLevel::Elevated
        },
        risk_reasons: reasons.into_iter().map(str::to_string).collect(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn comfortable_room_is_safe() {
        let assessment = assess(Some(21.5), Some(45.0), Some(52_000.0));
        assert_eq!(assessment.risk, RiskLevel::Safe);
        assert_eq!(
            assessment.risk_reasons,
            vec!["All sensor values within safe ranges"]
        );
    }

    #[test]
    fn mild_deviation_is_elevated() {
        let assessment = assess(Some(28.5), Some(72.0), Some(25_000.0));
        assert_eq!(assessment.risk, RiskLevel::Elevated);
        assert_eq!(
            assessment.risk_reasons,
            vec![
                "High Humidity (>= 70%)",
                "High Temperature (>= 28°C)",
                "Moderate Air Quality (Gas Resistance <= 30kΩ)",
            ]
        );
    }

    #[test]
    fn severe_values_warn() {
        assert_eq!(
            assess(Some(21.0), Some(85.0), Some(50_000.0)).risk,
            RiskLevel::Warning
        );
        assert_eq!(
            assess(Some(13.0), Some(45.0), Some(50_000.0)).risk,
            RiskLevel::Warning
        );

        let poor_air = assess(Some(21.0), Some(45.0), Some(20_000.0));
        assert_eq!(poor_air.risk, RiskLevel::Warning);
        assert_eq!(
            poor_air.risk_reasons,
            vec!["Poor Air Quality (Gas Resistance <= 20kΩ)"]
        );
    }

    #[test]
    fn missing_values_are_elevated() {
        let assessment = assess(Some(21.0), None, Some(50_000.0));
        assert_eq!(assessment.risk, RiskLevel::Elevated);
        assert_eq!(
            assessment.risk_reasons,
            vec!["Missing one or more required sensor values"]
        );
    }

    #[test]
    fn serializes_level_in_upper_case() {
        let json = serde_json::to_string(&assess(Some(21.0), Some(45.0), Some(50_000.0))).unwrap();
        assert_eq!(
            json,
            r#"{"risk":"SAFE","risk_reasons":["All sensor values within safe ranges"]}"#
        );
    }
}
