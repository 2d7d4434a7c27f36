use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use anyhow::Context;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, UdpSocket},
    runtime::Handle,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use telemetry_common::{
    bring_up, config::build_value, halt, report, sensor::pascal_to_hectopascal, BusAddress,
    Endpoint, Link, LinkError, NodeConfig, Reading, ReportOutcome, Reporter, Scheme, Sensor,
    SensorError, SensorTuning, ThreadSleep, TransportError,
};

const ENV_SIM_SENSOR_ADDRESS: &str = "SIM_SENSOR_ADDRESS";

/// Upper bound on bytes read from a response before parsing.
const MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// Stand-in for a BME680 on the bus. Answers at one address and produces a
/// slow drift of plausible indoor readings.
struct SimulatedBme680 {
    tuning: SensorTuning,
    tick: u64,
}

impl SimulatedBme680 {
    fn probe(
        address: BusAddress,
        present_at: Option<BusAddress>,
        tuning: SensorTuning,
    ) -> Result<Self, SensorError> {
        if present_at != Some(address) {
            return Err(SensorError::Bus(format!("no ACK from {address}")));
        }
        info!("simulated BME680 configured with {tuning:?}");
        Ok(Self { tuning, tick: 0 })
    }
}

impl Sensor for SimulatedBme680 {
    fn take_reading(&mut self) -> Result<Reading, SensorError> {
        self.tick = self.tick.wrapping_add(1);

        // The gas element needs a few heater cycles before its resistance
        // settles.
        if self.tick <= 2 {
            return Err(SensorError::GasNotReady);
        }

        let phase = (self.tick % 12) as f32;
        let raw_pressure_pa = 101_325.0 + phase * 7.5;
        let heater_bias = f32::from(self.tuning.heater.target_c) * 10.0;
        Ok(Reading {
            temperature: 21.5 + phase * 0.137,
            humidity: 40.0 + (self.tick % 9) as f32 * 0.61,
            pressure: pascal_to_hectopascal(raw_pressure_pa),
            gas_resistance: 48_000.0 + heater_bias + phase * 211.0,
        })
    }
}

/// The host's own network stack stands in for the Wi-Fi station. It counts as
/// associated once the collector resolves and the OS has a route to it.
struct HostLink {
    endpoint: Endpoint,
    runtime: Handle,
    timeout: Duration,
    remote: Option<SocketAddr>,
}

impl HostLink {
    fn new(endpoint: Endpoint, runtime: Handle, timeout: Duration) -> Self {
        Self {
            endpoint,
            runtime,
            timeout,
            remote: None,
        }
    }

    fn route_to(&self, remote: SocketAddr) -> Option<IpAddr> {
        self.runtime.block_on(async {
            let bind: SocketAddr = if remote.is_ipv4() {
                ([0u8; 4], 0).into()
            } else {
                ([0u16; 8], 0).into()
            };
            let socket = UdpSocket::bind(bind).await.ok()?;
            // connecting a UDP socket only consults the routing table
            socket.connect(remote).await.ok()?;
            socket.local_addr().ok().map(|addr| addr.ip())
        })
    }
}

impl Link for HostLink {
    fn is_connected(&mut self) -> bool {
        match self.remote {
            Some(remote) => self.route_to(remote).is_some(),
            None => false,
        }
    }

    fn associate(&mut self) -> Result<(), LinkError> {
        let authority = self.endpoint.authority();
        let timeout = self.timeout;
        let resolved = self.runtime.block_on(async {
            tokio::time::timeout(timeout, tokio::net::lookup_host(authority.as_str())).await
        });

        let mut addrs = match resolved {
            Ok(Ok(addrs)) => addrs,
            Ok(Err(err)) => {
                return Err(LinkError::Association(format!(
                    "failed to resolve {authority}: {err}"
                )))
            }
            Err(_) => {
                return Err(LinkError::Association(format!(
                    "resolving {authority} timed out after {timeout:?}"
                )))
            }
        };

        self.remote = addrs.next();
        if self.remote.is_none() {
            return Err(LinkError::Association(format!(
                "{authority} resolved to no addresses"
            )));
        }
        Ok(())
    }

    fn local_address(&mut self) -> Option<IpAddr> {
        self.remote.and_then(|remote| self.route_to(remote))
    }
}

/// Plain HTTP/1.1 over a fresh TCP connection per report.
struct HttpReporter {
    runtime: Handle,
    timeout: Duration,
}

impl HttpReporter {
    async fn post(endpoint: &Endpoint, payload: &str) -> Result<ReportOutcome, TransportError> {
        let mut stream = TcpStream::connect(endpoint.authority())
            .await
            .map_err(|err| TransportError::Connect(format!("{}: {err}", endpoint.authority())))?;

        let request = report::post_request(endpoint, payload);
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|err| TransportError::Request(err.to_string()))?;
        stream
            .flush()
            .await
            .map_err(|err| TransportError::Request(err.to_string()))?;

        // The peer may keep the socket open; stop once the response is complete.
        let mut raw = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let read = stream
                .read(&mut chunk)
                .await
                .map_err(|err| TransportError::Response(err.to_string()))?;
            if read == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..read]);
            if raw.len() >= MAX_RESPONSE_BYTES || report::is_complete(&raw)? {
                break;
            }
        }

        report::parse_response(&raw)
    }
}

impl Reporter for HttpReporter {
    fn send(&mut self, payload: &str, endpoint: &str) -> Result<ReportOutcome, TransportError> {
        let endpoint = Endpoint::parse(endpoint)?;
        if endpoint.scheme == Scheme::Https {
            return Err(TransportError::UnsupportedScheme(Scheme::Https.as_str()));
        }

        let timeout = self.timeout;
        // the stream lives inside `post`, so it is closed on every return path
        // including the timeout
        self.runtime.block_on(async {
            tokio::time::timeout(timeout, Self::post(&endpoint, payload))
                .await
                .unwrap_or(Err(TransportError::Timeout(timeout)))
        })
    }
}

fn sim_sensor_address() -> anyhow::Result<Option<BusAddress>> {
    let raw = match std::env::var(ENV_SIM_SENSOR_ADDRESS) {
        Ok(raw) => raw,
        Err(_) => return Ok(Some(BusAddress::PRIMARY)),
    };
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let digits = raw.trim_start_matches("0x").trim_start_matches("0X");
    let address = u8::from_str_radix(digits, 16)
        .with_context(|| format!("{ENV_SIM_SENSOR_ADDRESS}=`{raw}` is not a hex bus address"))?;
    Ok(Some(BusAddress(address)))
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config =
        NodeConfig::from_lookup(|key| std::env::var(key).ok().or_else(|| build_value(key)));
    config.validate().context("invalid node configuration")?;
    let endpoint = Endpoint::parse(&config.endpoint_url).context("invalid endpoint")?;
    if endpoint.scheme == Scheme::Https {
        anyhow::bail!("the host harness only speaks plain http; got {endpoint}");
    }

    let present_at = sim_sensor_address()?;
    info!(
        "telemetry node (host harness) starting; device id {:?}, endpoint {endpoint}",
        config.device_id
    );
    if present_at.is_none() {
        warn!("{ENV_SIM_SENSOR_ADDRESS}=none; no simulated sensor on the bus");
    }

    let runtime = Handle::current();
    let tuning = config.sensor;
    let link = HostLink::new(endpoint, runtime.clone(), config.http_timeout());
    let reporter = HttpReporter {
        runtime,
        timeout: config.http_timeout(),
    };

    // The report loop is synchronous; give it its own blocking thread and let
    // it drive I/O through the runtime handle.
    tokio::task::spawn_blocking(move || {
        match bring_up(
            config,
            |address| SimulatedBme680::probe(address, present_at, tuning),
            link,
            reporter,
            ThreadSleep,
        ) {
            Ok(node) => node.run(),
            Err(err) => halt(ThreadSleep, &err),
        }
    })
    .await
    .context("report loop thread exited")?;

    Ok(())
}
