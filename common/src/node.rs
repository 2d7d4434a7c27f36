use std::fmt;

use log::{error, info, warn};
use thiserror::Error;

use crate::{
    config::NodeConfig,
    link::{self, Link},
    payload::{self, EncodeError},
    report::{Reporter, TransportError},
    retry::{Delay, PollRetry},
    sensor::{self, Sensor, SensorError, CANDIDATE_ADDRESSES},
    types::{BusAddress, Reading, ReportOutcome},
};

#[derive(Debug, Error)]
pub enum InitError {
    #[error("sensor bring-up failed: {0}")]
    Sensor(#[from] SensorError),
}

#[derive(Debug)]
pub enum CycleOutcome {
    Reported(ReportOutcome),
    Rejected(ReportOutcome),
    SensorFailed(SensorError),
    EncodeFailed(EncodeError),
    TransportFailed(TransportError),
}

impl CycleOutcome {
    pub fn is_reported(&self) -> bool {
        matches!(self, Self::Reported(_))
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reported(outcome) => write!(f, "reported (HTTP {})", outcome.status),
            Self::Rejected(outcome) => write!(f, "rejected (HTTP {})", outcome.status),
            Self::SensorFailed(err) => write!(f, "sensor read failed: {err}"),
            Self::EncodeFailed(err) => write!(f, "encode failed: {err}"),
            Self::TransportFailed(err) => write!(f, "transport failed: {err}"),
        }
    }
}

pub struct ReportLoop<S, L, R, D> {
    config: NodeConfig,
    sensor: S,
    link: L,
    reporter: R,
    delay: D,
    connect_policy: PollRetry,
}

impl<S, L, R, D> ReportLoop<S, L, R, D>
where
    S: Sensor,
    L: Link,
    R: Reporter,
    D: Delay,
{
    pub fn new(config: NodeConfig, sensor: S, link: L, reporter: R, delay: D) -> Self {
        let connect_policy = PollRetry::forever(config.connect_poll()).with_target("link");
        Self {
            config,
            sensor,
            link,
            reporter,
            delay,
            connect_policy,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn run_cycle(&mut self) -> CycleOutcome {
        if !self.link.is_connected() {
            warn!("wifi disconnected, reconnecting...");
            link::connect(&mut self.link, &self.connect_policy, &mut self.delay);
        }

        let reading = match self.sensor.take_reading() {
            Ok(reading) => reading,
            Err(err) => {
                warn!(
                    "sensor reading failed: {err}; skipping report, retrying in {:?}",
                    self.config.sensor_retry_delay()
                );
                self.delay.delay(self.config.sensor_retry_delay());
                return CycleOutcome::SensorFailed(err);
            }
        };

        let outcome = self.report(&reading);
        self.delay.delay(self.config.report_interval());
        outcome
    }

    pub fn run(mut self) -> ! {
        info!(
            "reporting to {} every {:?}",
            self.config.endpoint_url,
            self.config.report_interval()
        );
        loop {
            let outcome = self.run_cycle();
            log::debug!("cycle finished: {outcome}");
        }
    }

    fn report(&mut self, reading: &Reading) -> CycleOutcome {
        let payload = match payload::encode(reading, self.config.device_id.as_deref()) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("dropping reading {reading:?}: {err}");
                return CycleOutcome::EncodeFailed(err);
            }
        };

        info!("sending data: {payload}");
        match self.reporter.send(&payload, &self.config.endpoint_url) {
            Ok(outcome) if outcome.is_success() => {
                info!("HTTP response code: {}", outcome.status);
                info!("{}", outcome.body);
                CycleOutcome::Reported(outcome)
            }
            Ok(outcome) => {
                warn!("HTTP response code: {}", outcome.status);
                warn!("{}", outcome.body);
                CycleOutcome::Rejected(outcome)
            }
            Err(err) => {
                warn!("failed to post reading: {err}");
                CycleOutcome::TransportFailed(err)
            }
        }
    }
}

/// Discovers the sensor, then brings up the network. The network is never
/// touched when no sensor answers.
pub fn bring_up<S, E, L, R, D>(
    config: NodeConfig,
    open: impl FnMut(BusAddress) -> Result<S, E>,
    mut link: L,
    reporter: R,
    mut delay: D,
) -> Result<ReportLoop<S, L, R, D>, InitError>
where
    S: Sensor,
    E: fmt::Debug,
    L: Link,
    R: Reporter,
    D: Delay,
{
    let (sensor, address) = sensor::discover(&CANDIDATE_ADDRESSES, open)?;
    info!("BME680 initialized at {address} with {:?}", config.sensor);

    let policy = PollRetry::forever(config.connect_poll()).with_target("link");
    link::connect(&mut link, &policy, &mut delay);

    Ok(ReportLoop::new(config, sensor, link, reporter, delay))
}

pub fn halt<D: Delay>(mut delay: D, reason: &dyn fmt::Display) -> ! {
    error!("{reason}");
    error!("halting until reset");
    loop {
        delay.delay(std::time::Duration::from_secs(1));
    }
}
