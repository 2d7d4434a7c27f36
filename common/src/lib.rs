pub mod config;
pub mod endpoint;
pub mod link;
pub mod node;
pub mod payload;
pub mod report;
pub mod retry;
pub mod sensor;
pub mod types;

pub use config::{
    ConfigError, HeaterProfile, IirFilter, NetworkConfig, NodeConfig, Oversampling, SensorTuning,
    TlsVerification,
};
pub use endpoint::{Endpoint, Scheme};
pub use link::{Link, LinkError};
pub use node::{bring_up, halt, CycleOutcome, InitError, ReportLoop};
pub use payload::{encode, EncodeError};
pub use report::{Reporter, TransportError};
pub use retry::{Delay, PollRetry, ThreadSleep};
pub use sensor::{BusSlot, Sensor, SensorError};
pub use types::{BusAddress, ConnectivityState, Reading, ReportOutcome};
