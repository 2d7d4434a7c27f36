use std::time::Duration;

use thiserror::Error;

use crate::endpoint::Endpoint;

pub const ENV_WIFI_SSID: &str = "WIFI_SSID";
pub const ENV_WIFI_PASS: &str = "WIFI_PASS";
pub const ENV_POST_URL: &str = "SENSOR_POST_URL";
pub const ENV_DEVICE_ID: &str = "DEVICE_ID";
pub const ENV_POST_INTERVAL_MS: &str = "SENSOR_POST_INTERVAL_MS";
pub const ENV_ALLOW_INSECURE_TLS: &str = "ALLOW_INSECURE_TLS";

pub const DEFAULT_POST_URL: &str = "http://127.0.0.1:5000/sensor";
pub const DEFAULT_REPORT_INTERVAL_MS: u64 = 3_000;
pub const DEFAULT_SENSOR_RETRY_DELAY_MS: u64 = 3_000;
pub const DEFAULT_CONNECT_POLL_MS: u64 = 500;
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;

const MAX_SSID_LEN: usize = 32;
const MAX_PASSPHRASE_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unsupported endpoint scheme in `{0}` (expected http:// or https://)")]
    UnsupportedScheme(String),
    #[error("endpoint `{0}` has no host")]
    MissingHost(String),
    #[error("endpoint port `{0}` is not a valid port number")]
    InvalidPort(String),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("wifi ssid is empty")]
    MissingSsid,
    #[error("wifi ssid is longer than 32 bytes")]
    SsidTooLong,
    #[error("wifi passphrase is longer than 64 bytes")]
    PassphraseTooLong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oversampling {
    Skipped,
    X1,
    X2,
    X4,
    X8,
    X16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IirFilter {
    Off,
    Size1,
    Size3,
    Size7,
    Size15,
    Size31,
    Size63,
    Size127,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaterProfile {
    pub target_c: u16,
    pub duration_ms: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorTuning {
    pub temperature: Oversampling,
    pub humidity: Oversampling,
    pub pressure: Oversampling,
    pub filter: IirFilter,
    pub heater: HeaterProfile,
}

impl Default for SensorTuning {
    fn default() -> Self {
        // Favors accuracy over conversion time.
        Self {
            temperature: Oversampling::X8,
            humidity: Oversampling::X2,
            pressure: Oversampling::X4,
            filter: IirFilter::Size3,
            heater: HeaterProfile {
                target_c: 320,
                duration_ms: 150,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVerification {
    #[default]
    Verify,
    Insecure,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub network: NetworkConfig,
    pub endpoint_url: String,
    pub device_id: Option<String>,
    pub report_interval_ms: u64,
    pub sensor_retry_delay_ms: u64,
    pub connect_poll_ms: u64,
    pub http_timeout_ms: u64,
    pub tls: TlsVerification,
    pub sensor: SensorTuning,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            endpoint_url: DEFAULT_POST_URL.to_string(),
            device_id: None,
            report_interval_ms: DEFAULT_REPORT_INTERVAL_MS,
            sensor_retry_delay_ms: DEFAULT_SENSOR_RETRY_DELAY_MS,
            connect_poll_ms: DEFAULT_CONNECT_POLL_MS,
            http_timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
            tls: TlsVerification::Verify,
            sensor: SensorTuning::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_build_env() -> Self {
        Self::from_lookup(build_value)
    }

    // Missing or unparseable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(ssid) = lookup(ENV_WIFI_SSID) {
            config.network.wifi_ssid = ssid;
        }
        if let Some(pass) = lookup(ENV_WIFI_PASS) {
            config.network.wifi_pass = pass;
        }
        if let Some(url) = lookup(ENV_POST_URL).filter(|url| !url.trim().is_empty()) {
            config.endpoint_url = url.trim().to_string();
        }

        config.device_id = lookup(ENV_DEVICE_ID)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        if let Some(raw) = lookup(ENV_POST_INTERVAL_MS) {
            match raw.trim().parse::<u64>() {
                Ok(interval) => config.report_interval_ms = interval,
                Err(err) => log::warn!(
                    "ignoring {ENV_POST_INTERVAL_MS}=`{raw}` ({err}); using {}ms",
                    config.report_interval_ms
                ),
            }
        }

        if lookup(ENV_ALLOW_INSECURE_TLS).is_some_and(|value| is_truthy(&value)) {
            config.tls = TlsVerification::Insecure;
        }

        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Endpoint::parse(&self.endpoint_url)?;

        for (name, value) in [
            ("report interval", self.report_interval_ms),
            ("sensor retry delay", self.sensor_retry_delay_ms),
            ("connect poll interval", self.connect_poll_ms),
            ("http timeout", self.http_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDuration(name));
            }
        }

        Ok(())
    }

    pub fn validate_station(&self) -> Result<(), ConfigError> {
        if self.network.wifi_ssid.is_empty() {
            return Err(ConfigError::MissingSsid);
        }
        if self.network.wifi_ssid.len() > MAX_SSID_LEN {
            return Err(ConfigError::SsidTooLong);
        }
        if self.network.wifi_pass.len() > MAX_PASSPHRASE_LEN {
            return Err(ConfigError::PassphraseTooLong);
        }
        Ok(())
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    pub fn sensor_retry_delay(&self) -> Duration {
        Duration::from_millis(self.sensor_retry_delay_ms)
    }

    pub fn connect_poll(&self) -> Duration {
        Duration::from_millis(self.connect_poll_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

pub fn build_value(key: &str) -> Option<String> {
    let value = match key {
        ENV_WIFI_SSID => option_env!("WIFI_SSID"),
        ENV_WIFI_PASS => option_env!("WIFI_PASS"),
        ENV_POST_URL => option_env!("SENSOR_POST_URL"),
        ENV_DEVICE_ID => option_env!("DEVICE_ID"),
        ENV_POST_INTERVAL_MS => option_env!("SENSOR_POST_INTERVAL_MS"),
        ENV_ALLOW_INSECURE_TLS => option_env!("ALLOW_INSECURE_TLS"),
        _ => None,
    };
    value.map(str::to_string)
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_lookup_yields_defaults() {
        let config = NodeConfig::from_lookup(|_| None);
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.report_interval(), Duration::from_secs(3));
        assert_eq!(config.tls, TlsVerification::Verify);
    }

    #[test]
    fn lookup_overrides_named_fields() {
        let config = NodeConfig::from_lookup(lookup_from(&[
            (ENV_WIFI_SSID, "greenhouse"),
            (ENV_WIFI_PASS, "hunter22"),
            (ENV_POST_URL, " https://collector.example.com/sensor "),
            (ENV_DEVICE_ID, "dev-1"),
            (ENV_POST_INTERVAL_MS, "60000"),
        ]));

        assert_eq!(config.network.wifi_ssid, "greenhouse");
        assert_eq!(config.network.wifi_pass, "hunter22");
        assert_eq!(config.endpoint_url, "https://collector.example.com/sensor");
        assert_eq!(config.device_id.as_deref(), Some("dev-1"));
        assert_eq!(config.report_interval_ms, 60_000);
    }

    #[test]
    fn blank_device_id_is_omitted() {
        let config = NodeConfig::from_lookup(lookup_from(&[(ENV_DEVICE_ID, "   ")]));
        assert_eq!(config.device_id, None);
    }

    #[test]
    fn unparseable_interval_keeps_default() {
        let config = NodeConfig::from_lookup(lookup_from(&[(ENV_POST_INTERVAL_MS, "soon")]));
        assert_eq!(config.report_interval_ms, DEFAULT_REPORT_INTERVAL_MS);
    }

    #[test]
    fn insecure_tls_requires_explicit_opt_in() {
        let config = NodeConfig::from_lookup(lookup_from(&[(ENV_ALLOW_INSECURE_TLS, "0")]));
        assert_eq!(config.tls, TlsVerification::Verify);

        let config = NodeConfig::from_lookup(lookup_from(&[(ENV_ALLOW_INSECURE_TLS, "true")]));
        assert_eq!(config.tls, TlsVerification::Insecure);
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let config = NodeConfig {
            report_interval_ms: 0,
            ..NodeConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDuration("report interval"))
        );
    }

    #[test]
    fn validate_rejects_unknown_scheme() {
        let config = NodeConfig {
            endpoint_url: "mqtt://broker:1883".to_string(),
            ..NodeConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn station_credentials_are_bounded() {
        let mut config = NodeConfig::default();
        assert_eq!(config.validate_station(), Err(ConfigError::MissingSsid));

        config.network.wifi_ssid = "x".repeat(33);
        assert_eq!(config.validate_station(), Err(ConfigError::SsidTooLong));

        config.network.wifi_ssid = "greenhouse".to_string();
        config.network.wifi_pass = "p".repeat(65);
        assert_eq!(config.validate_station(), Err(ConfigError::PassphraseTooLong));

        config.network.wifi_pass = String::new();
        assert_eq!(config.validate_station(), Ok(()));
    }

    #[test]
    fn default_tuning_matches_accuracy_profile() {
        let tuning = SensorTuning::default();
        assert_eq!(tuning.temperature, Oversampling::X8);
        assert_eq!(tuning.humidity, Oversampling::X2);
        assert_eq!(tuning.pressure, Oversampling::X4);
        assert_eq!(tuning.filter, IirFilter::Size3);
        assert_eq!(
            tuning.heater,
            HeaterProfile {
                target_c: 320,
                duration_ms: 150
            }
        );
    }
}
