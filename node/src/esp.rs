use std::{
    net::{IpAddr, Ipv4Addr},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use bosch_bme680::{
    Bme680, Configuration as Bme680Configuration, DeviceAddress, GasConfig, IIRFilter,
    MeasurmentData, Oversampling as Bme680Oversampling,
};
use embedded_svc::{
    http::{client::Client as HttpClient, Status},
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::{Ets, BLOCK},
    i2c::{I2cConfig, I2cDriver},
    prelude::*,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    log::EspLogger,
    nvs::EspDefaultNvsPartition,
    wifi::{BlockingWifi, EspWifi},
};
use log::{error, info, warn};

use telemetry_common::{
    bring_up, halt,
    report::{truncate_body, CONTENT_TYPE_JSON, MAX_RESPONSE_BODY},
    sensor::pascal_to_hectopascal,
    BusAddress, BusSlot, Delay, Endpoint, IirFilter, Link, LinkError, NetworkConfig, NodeConfig,
    Oversampling, Reading, ReportOutcome, Reporter, Scheme, Sensor, SensorError, SensorTuning,
    TlsVerification, TransportError,
};

const I2C_BAUDRATE_KHZ: u32 = 100;
const REG_CHIP_ID: u8 = 0xD0;
const BME680_CHIP_ID: u8 = 0x61;
// Used by the driver to pick the first heater resistance before any
// temperature has been measured.
const AMBIENT_TEMP_C: i32 = 20;

const WATCHDOG_TIMEOUT_SEC: u32 = 90;
const WATCHDOG_FEED_INTERVAL: Duration = Duration::from_secs(1);

struct Bme680Probe {
    bus: BusSlot<I2cDriver<'static>>,
    tuning: SensorTuning,
}

struct Bme680Sensor {
    sensor: Bme680<I2cDriver<'static>, Ets>,
}

struct WifiLink {
    wifi: BlockingWifi<EspWifi<'static>>,
    ssid: String,
    power_save_disabled: bool,
}

struct EspReporter {
    tls: TlsVerification,
    timeout: Duration,
}

/// Sleeps in short slices so the task watchdog keeps getting fed, even while
/// blocked on reconnects or halted.
#[derive(Debug, Clone, Copy)]
struct WatchdogSleep;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let config = NodeConfig::from_build_env();
    config.validate().context("invalid build configuration")?;
    config
        .validate_station()
        .context("invalid wifi credentials")?;
    info!(
        "telemetry node starting; device id {:?}, endpoint {}",
        config.device_id, config.endpoint_url
    );

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals {
        modem, pins, i2c0, ..
    } = Peripherals::take()?;

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    let i2c_config = I2cConfig::new().baudrate(I2C_BAUDRATE_KHZ.kHz().into());
    let i2c = I2cDriver::new(i2c0, pins.gpio21, pins.gpio22, &i2c_config)
        .context("failed to initialize I2C bus")?;
    let mut probe = Bme680Probe {
        bus: BusSlot::Held(i2c),
        tuning: config.sensor,
    };

    let link = WifiLink::new(modem, sys_loop, nvs_partition, &config.network)
        .context("wifi setup failed")?;
    let reporter = EspReporter {
        tls: config.tls,
        timeout: config.http_timeout(),
    };

    match bring_up(
        config,
        |address| probe.open(address),
        link,
        reporter,
        WatchdogSleep,
    ) {
        Ok(node) => node.run(),
        Err(err) => halt(WatchdogSleep, &err),
    }
}

impl Bme680Probe {
    fn open(&mut self, address: BusAddress) -> anyhow::Result<Bme680Sensor> {
        let device_address = match address {
            BusAddress::PRIMARY => DeviceAddress::Secondary,
            BusAddress::FALLBACK => DeviceAddress::Primary,
            other => anyhow::bail!("{other} is not a BME680 address"),
        };

        let bus = self.bus.get_mut()?;

        // The driver consumes the bus even when it fails, so check for the
        // chip first.
        let mut chip_id = [0_u8; 1];
        bus.write_read(address.0, &[REG_CHIP_ID], &mut chip_id, BLOCK)
            .map_err(|err| anyhow!("no response from {address}: {err}"))?;
        anyhow::ensure!(
            chip_id[0] == BME680_CHIP_ID,
            "device at {address} reports chip id {:#04x}, expected {BME680_CHIP_ID:#04x}",
            chip_id[0]
        );

        let bus = self.bus.hand_over(address)?;
        let config = driver_config(&self.tuning);
        info!("configuring BME680 at {address} with {config:?}");

        let sensor = Bme680::new(bus, device_address, Ets, &config, AMBIENT_TEMP_C)
            .map_err(|err| {
                error!(
                    "BME680 at {address} answered but failed to initialize: {err:?}; \
                     the I2C bus went with the driver, no other address can be probed"
                );
                anyhow!("failed to configure BME680 at {address}: {err:?}")
            })?;
        Ok(Bme680Sensor { sensor })
    }
}

impl Sensor for Bme680Sensor {
    fn take_reading(&mut self) -> Result<Reading, SensorError> {
        let MeasurmentData {
            temperature,
            pressure,
            humidity,
            gas_resistance,
            ..
        } = self
            .sensor
            .measure()
            .map_err(|err| SensorError::Bus(format!("{err:?}")))?;

        let gas_resistance = gas_resistance.ok_or(SensorError::GasNotReady)?;
        let reading = Reading {
            temperature,
            humidity,
            pressure: pascal_to_hectopascal(pressure),
            gas_resistance,
        };

        info!(
            "[BME680] Temp: {:.2}°C, Humidity: {:.2}%, Pressure: {:.2} hPa, Gas: {:.0} Ω",
            reading.temperature, reading.humidity, reading.pressure, reading.gas_resistance
        );
        Ok(reading)
    }
}

fn driver_config(tuning: &SensorTuning) -> Bme680Configuration {
    Bme680Configuration::builder()
        .temperature_oversampling(driver_oversampling(tuning.temperature))
        .humidity_oversampling(driver_oversampling(tuning.humidity))
        .pressure_oversampling(driver_oversampling(tuning.pressure))
        .filter(driver_filter(tuning.filter))
        .gas_config(GasConfig {
            heater_target_temperature: tuning.heater.target_c,
            heater_duration: Duration::from_millis(tuning.heater.duration_ms.into()),
        })
        .build()
}

fn driver_oversampling(oversampling: Oversampling) -> Bme680Oversampling {
    match oversampling {
        Oversampling::Skipped => Bme680Oversampling::Skipped,
        Oversampling::X1 => Bme680Oversampling::By1,
        Oversampling::X2 => Bme680Oversampling::By2,
        Oversampling::X4 => Bme680Oversampling::By4,
        Oversampling::X8 => Bme680Oversampling::By8,
        Oversampling::X16 => Bme680Oversampling::By16,
    }
}

fn driver_filter(filter: IirFilter) -> IIRFilter {
    match filter {
        IirFilter::Off => IIRFilter::Coeff0,
        IirFilter::Size1 => IIRFilter::Coeff1,
        IirFilter::Size3 => IIRFilter::Coeff3,
        IirFilter::Size7 => IIRFilter::Coeff7,
        IirFilter::Size15 => IIRFilter::Coeff15,
        IirFilter::Size31 => IIRFilter::Coeff31,
        IirFilter::Size63 => IIRFilter::Coeff63,
        IirFilter::Size127 => IIRFilter::Coeff127,
    }
}

impl WifiLink {
    /// Configures station mode. The radio is started on the first
    /// association so nothing goes on air before the sensor is found.
    fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs_partition: EspDefaultNvsPartition,
        network: &NetworkConfig,
    ) -> anyhow::Result<Self> {
        let esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
        let mut wifi = BlockingWifi::wrap(esp_wifi, sys_loop)?;

        let auth_method = if network.wifi_pass.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid: network
                .wifi_ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("wifi ssid too long"))?,
            password: network
                .wifi_pass
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("wifi password too long"))?,
            auth_method,
            ..Default::default()
        }))?;

        Ok(Self {
            wifi,
            ssid: network.wifi_ssid.clone(),
            power_save_disabled: false,
        })
    }
}

impl Link for WifiLink {
    fn is_connected(&mut self) -> bool {
        self.wifi.is_connected().unwrap_or(false) && self.wifi.is_up().unwrap_or(false)
    }

    fn associate(&mut self) -> Result<(), LinkError> {
        if !self.wifi.is_started().unwrap_or(false) {
            self.wifi
                .start()
                .map_err(|err| LinkError::Association(format!("failed to start wifi: {err}")))?;
            info!("wifi started, connecting to `{}`", self.ssid);
        }

        // drop any half-finished association before trying again
        let _ = self.wifi.disconnect();
        self.wifi
            .connect()
            .map_err(|err| LinkError::Association(format!("connect failed: {err}")))?;
        self.wifi
            .wait_netif_up()
            .map_err(|err| LinkError::Association(format!("netif did not come up: {err}")))?;

        if !self.power_save_disabled {
            disable_wifi_power_save();
            self.power_save_disabled = true;
        }
        Ok(())
    }

    fn local_address(&mut self) -> Option<IpAddr> {
        let ip = self.wifi.wifi().sta_netif().get_ip_info().ok()?.ip;
        (ip != Ipv4Addr::UNSPECIFIED).then_some(IpAddr::V4(ip))
    }
}

impl EspReporter {
    fn connection_config(&self, scheme: Scheme) -> HttpClientConfiguration {
        let mut conf = HttpClientConfiguration {
            timeout: Some(self.timeout),
            ..Default::default()
        };

        if scheme == Scheme::Https {
            match self.tls {
                TlsVerification::Verify => {
                    conf.crt_bundle_attach = Some(esp_idf_svc::sys::esp_crt_bundle_attach);
                }
                TlsVerification::Insecure => {
                    // Also needs CONFIG_ESP_TLS_INSECURE and
                    // CONFIG_ESP_TLS_SKIP_SERVER_CERT_VERIFY in sdkconfig.
                    conf.use_global_ca_store = false;
                    conf.skip_cert_common_name_check = true;
                }
            }
        }

        conf
    }
}

impl Reporter for EspReporter {
    fn send(&mut self, payload: &str, endpoint: &str) -> Result<ReportOutcome, TransportError> {
        let scheme = Endpoint::parse(endpoint)?.scheme;
        if scheme == Scheme::Https && self.tls == TlsVerification::Insecure {
            warn!("posting to {endpoint} without certificate verification");
        }

        // The connection is owned by `client` and closed when it goes out of
        // scope, on success and on every `?` below.
        let connection = EspHttpConnection::new(&self.connection_config(scheme))
            .map_err(|err| TransportError::Connect(format!("{err}")))?;
        let mut client = HttpClient::wrap(connection);

        let content_length = payload.len().to_string();
        let headers = [
            ("Content-Type", CONTENT_TYPE_JSON),
            ("Content-Length", content_length.as_str()),
        ];

        let mut request = client
            .post(endpoint, &headers)
            .map_err(|err| TransportError::Connect(format!("{err:?}")))?;
        request
            .write_all(payload.as_bytes())
            .map_err(|err| TransportError::Request(format!("{err:?}")))?;
        request
            .flush()
            .map_err(|err| TransportError::Request(format!("{err:?}")))?;

        let mut response = request
            .submit()
            .map_err(|err| TransportError::Request(format!("{err:?}")))?;
        let status = response.status();
        let body = read_body(&mut response)?;

        Ok(ReportOutcome { status, body })
    }
}

fn read_body<R: Read>(response: &mut R) -> Result<String, TransportError> {
    let mut body = Vec::new();
    let mut chunk = [0_u8; 512];

    while body.len() < MAX_RESPONSE_BODY {
        let read = response
            .read(&mut chunk)
            .map_err(|err| TransportError::Response(format!("{err:?}")))?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }

    Ok(truncate_body(&body))
}

impl Delay for WatchdogSleep {
    fn delay(&mut self, duration: Duration) {
        let mut remaining = duration;
        while !remaining.is_zero() {
            let step = remaining.min(WATCHDOG_FEED_INTERVAL);
            feed_watchdog();
            thread::sleep(step);
            remaining -= step;
        }
        feed_watchdog();
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}
