use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature: f32,
    pub humidity: f32,
    // hPa
    pub pressure: f32,
    pub gas_resistance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Connected,
    Disconnected,
}

impl ConnectivityState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "CONNECTED",
            Self::Disconnected => "DISCONNECTED",
        }
    }
}

impl From<bool> for ConnectivityState {
    fn from(connected: bool) -> Self {
        if connected {
            Self::Connected
        } else {
            Self::Disconnected
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOutcome {
    pub status: u16,
    pub body: String,
}

impl ReportOutcome {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusAddress(pub u8);

impl BusAddress {
    /// Where BME680 breakout boards answer with SDO pulled high.
    pub const PRIMARY: Self = Self(0x77);
    pub const FALLBACK: Self = Self(0x76);
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_2xx_is_success() {
        let outcome = |status| ReportOutcome {
            status,
            body: String::new(),
        };
        assert!(outcome(200).is_success());
        assert!(outcome(204).is_success());
        assert!(!outcome(199).is_success());
        assert!(!outcome(301).is_success());
        assert!(!outcome(500).is_success());
    }

    #[test]
    fn bus_address_formats_as_hex() {
        assert_eq!(BusAddress::PRIMARY.to_string(), "0x77");
        assert_eq!(BusAddress::FALLBACK.to_string(), "0x76");
    }
}
