use std::fmt;

use thiserror::Error;

use crate::types::{BusAddress, Reading};

pub const CANDIDATE_ADDRESSES: [BusAddress; 2] = [BusAddress::PRIMARY, BusAddress::FALLBACK];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorError {
    #[error("no sensor answered at {}", format_addresses(.0))]
    NotFound(Vec<BusAddress>),
    #[error("bus error: {0}")]
    Bus(String),
    #[error("gas measurement not valid (heater not stable)")]
    GasNotReady,
    #[error("i2c bus was lost to the driver that failed to initialize the sensor at {0}")]
    BusLost(BusAddress),
}

pub trait Sensor {
    fn take_reading(&mut self) -> Result<Reading, SensorError>;
}

impl<S: Sensor + ?Sized> Sensor for Box<S> {
    fn take_reading(&mut self) -> Result<Reading, SensorError> {
        (**self).take_reading()
    }
}

/// `open` probes the address and applies the measurement configuration.
pub fn discover<S, E>(
    candidates: &[BusAddress],
    mut open: impl FnMut(BusAddress) -> Result<S, E>,
) -> Result<(S, BusAddress), SensorError>
where
    E: fmt::Debug,
{
    for &address in candidates {
        match open(address) {
            Ok(sensor) => {
                log::info!("sensor found at {address}");
                return Ok((sensor, address));
            }
            Err(error) => log::debug!("no sensor at {address}: {error:?}"),
        }
    }

    Err(SensorError::NotFound(candidates.to_vec()))
}

/// A bus that a driver takes by value. Once handed over it stays with that
/// driver, even when the driver then fails to initialize.
#[derive(Debug)]
pub enum BusSlot<B> {
    Held(B),
    HandedTo(BusAddress),
}

impl<B> BusSlot<B> {
    pub fn get_mut(&mut self) -> Result<&mut B, SensorError> {
        match self {
            Self::Held(bus) => Ok(bus),
            Self::HandedTo(address) => Err(SensorError::BusLost(*address)),
        }
    }

    pub fn hand_over(&mut self, address: BusAddress) -> Result<B, SensorError> {
        match std::mem::replace(self, Self::HandedTo(address)) {
            Self::Held(bus) => Ok(bus),
            Self::HandedTo(previous) => {
                *self = Self::HandedTo(previous);
                Err(SensorError::BusLost(previous))
            }
        }
    }
}

pub fn pascal_to_hectopascal(pascal: f32) -> f32 {
    pascal / 100.0
}

fn format_addresses(addresses: &[BusAddress]) -> String {
    addresses
        .iter()
        .map(BusAddress::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
