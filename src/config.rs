use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::{
    clock::DefaultDs,
    datastructures::common::{ClockIdentity, ClockQuality, TimeSource},
    network::MacAddress,
    port::PortSettings,
    servo::ServoConfig,
    time::Interval,
    timestamper::RetryPolicy,
    tracing::LogLevel,
};

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub loglevel: LogLevel,
    #[serde(default = "default_domain")]
    pub domain: u8,
    #[serde(default, deserialize_with = "deserialize_clock_identity")]
    pub identity: Option<ClockIdentity>,
    #[serde(default = "default_priority")]
    pub priority1: u8,
    #[serde(default = "default_priority")]
    pub priority2: u8,
    #[serde(default = "default_clock_class")]
    pub clock_class: u8,
    #[serde(default = "default_clock_accuracy")]
    pub clock_accuracy: u8,
    #[serde(default = "default_offset_scaled_log_variance")]
    pub offset_scaled_log_variance: u16,
    #[serde(default = "default_time_source")]
    pub time_source: u8,
    #[serde(default = "default_syntonize")]
    pub syntonize: bool,
    #[serde(default)]
    pub accelerated_sync_count: u32,
    #[serde(default)]
    pub servo: ServoSection,
    #[serde(default)]
    pub timestamp_retry: RetrySection,
    #[serde(rename = "port", default)]
    pub ports: Vec<PortConfig>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ServoSection {
    #[serde(default = "default_integral")]
    pub integral: f64,
    #[serde(default = "default_proportional")]
    pub proportional: f64,
    #[serde(default = "default_upper_freq_limit")]
    pub upper_freq_limit: f32,
    #[serde(default = "default_lower_freq_limit")]
    pub lower_freq_limit: f32,
}

impl Default for ServoSection {
    fn default() -> Self {
        ServoSection {
            integral: default_integral(),
            proportional: default_proportional(),
            upper_freq_limit: default_upper_freq_limit(),
            lower_freq_limit: default_lower_freq_limit(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RetrySection {
    /// Retries after the first attempt
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_base_timeout_us")]
    pub base_timeout_us: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        RetrySection {
            attempts: default_attempts(),
            base_timeout_us: default_base_timeout_us(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    #[default]
    Ethernet,
    Wireless,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PortConfig {
    pub interface: String,
    #[serde(default)]
    pub link: LinkKind,
    /// Timing measurement peer of a wireless link
    #[serde(default, deserialize_with = "deserialize_mac_address")]
    pub peer: Option<MacAddress>,
    #[serde(default = "default_sync_interval")]
    pub sync_interval: i8,
    #[serde(default = "default_announce_interval")]
    pub announce_interval: i8,
    #[serde(default = "default_pdelay_interval")]
    pub pdelay_interval: i8,
    #[serde(default = "default_neighbor_prop_delay_thresh")]
    pub neighbor_prop_delay_thresh: i64,
    #[serde(default = "default_receipt_timeout")]
    pub announce_receipt_timeout: u32,
    #[serde(default = "default_receipt_timeout")]
    pub sync_receipt_timeout: u32,
}

fn deserialize_clock_identity<'de, D>(deserializer: D) -> Result<Option<ClockIdentity>, D::Error>
where
    D: Deserializer<'de>,
{
    use hex::FromHex;
    use serde::de::Error;
    let raw: String = Deserialize::deserialize(deserializer)?;
    Ok(Some(ClockIdentity(<[u8; 8]>::from_hex(raw).map_err(
        |e| D::Error::custom(format!("Invalid clock identifier: {}", e)),
    )?)))
}

fn deserialize_mac_address<'de, D>(deserializer: D) -> Result<Option<MacAddress>, D::Error>
where
    D: Deserializer<'de>,
{
    use hex::FromHex;
    use serde::de::Error;
    let raw: String = Deserialize::deserialize(deserializer)?;
    let digits: String = raw.chars().filter(|c| *c != ':' && *c != '-').collect();
    Ok(Some(MacAddress(<[u8; 6]>::from_hex(digits).map_err(
        |e| D::Error::custom(format!("Invalid mac address: {}", e)),
    )?)))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config toml parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("wireless port {0} has no peer configured")]
    MissingPeer(String),
    #[error("{field} of port {interface} is {value}, outside the supported range {min}..={max}")]
    IntervalOutOfRange {
        interface: String,
        field: &'static str,
        value: i8,
        min: i8,
        max: i8,
    },
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(s)?;
        if let Some(port) = config
            .ports
            .iter()
            .find(|port| port.link == LinkKind::Wireless && port.peer.is_none())
        {
            return Err(ConfigError::MissingPeer(port.interface.clone()));
        }
        for port in &config.ports {
            port.check_intervals()?;
        }
        config.warn_when_unreasonable();
        Ok(config)
    }
}

impl Config {
    /// Warns about unreasonable config values
    pub fn warn_when_unreasonable(&self) {
        if self.ports.is_empty() {
            warn!("No ports configured.");
        }

        if self.servo.lower_freq_limit > self.servo.upper_freq_limit {
            warn!("Servo frequency limits are inverted.");
        }

        if self.priority1 == 255 {
            warn!("Priority1 of 255 makes this clock slave only.");
        }
    }

    /// Properties of the local clock, using `fallback` when no identity is
    /// configured
    pub fn default_ds(&self, fallback: ClockIdentity) -> DefaultDs {
        DefaultDs {
            clock_identity: self.identity.unwrap_or(fallback),
            priority_1: self.priority1,
            priority_2: self.priority2,
            clock_quality: ClockQuality {
                clock_class: self.clock_class,
                clock_accuracy: self.clock_accuracy,
                offset_scaled_log_variance: self.offset_scaled_log_variance,
            },
            time_source: TimeSource(self.time_source),
            domain_number: self.domain,
        }
    }

    pub fn servo_config(&self) -> ServoConfig {
        ServoConfig {
            syntonize: self.syntonize,
            integral: self.servo.integral,
            proportional: self.servo.proportional,
            upper_freq_limit: self.servo.upper_freq_limit,
            lower_freq_limit: self.servo.lower_freq_limit,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.timestamp_retry.attempts,
            base_timeout: std::time::Duration::from_micros(self.timestamp_retry.base_timeout_us),
        }
    }
}

impl PortConfig {
    fn check_intervals(&self) -> Result<(), ConfigError> {
        let supported = Interval::SUPPORTED_LOG_2;
        for (field, value) in [
            ("sync-interval", self.sync_interval),
            ("announce-interval", self.announce_interval),
            ("pdelay-interval", self.pdelay_interval),
        ] {
            if !supported.contains(&value) {
                return Err(ConfigError::IntervalOutOfRange {
                    interface: self.interface.clone(),
                    field,
                    value,
                    min: *supported.start(),
                    max: *supported.end(),
                });
            }
        }
        Ok(())
    }

    pub fn settings(&self, config: &Config) -> PortSettings {
        PortSettings {
            sync_interval: Interval::from_log_2(self.sync_interval),
            announce_interval: Interval::from_log_2(self.announce_interval),
            pdelay_interval: Interval::from_log_2(self.pdelay_interval),
            announce_receipt_timeout: self.announce_receipt_timeout,
            sync_receipt_timeout: self.sync_receipt_timeout,
            neighbor_prop_delay_thresh: self.neighbor_prop_delay_thresh,
            accelerated_sync_count: config.accelerated_sync_count,
            servo: config.servo_config(),
            ..PortSettings::default()
        }
    }
}

fn default_domain() -> u8 {
    0
}

fn default_priority() -> u8 {
    248
}

fn default_clock_class() -> u8 {
    248
}

fn default_clock_accuracy() -> u8 {
    0x22
}

fn default_offset_scaled_log_variance() -> u16 {
    0x436A
}

fn default_time_source() -> u8 {
    160
}

fn default_syntonize() -> bool {
    true
}

fn default_integral() -> f64 {
    0.0024
}

fn default_proportional() -> f64 {
    1.0
}

fn default_upper_freq_limit() -> f32 {
    250.0
}

fn default_lower_freq_limit() -> f32 {
    -250.0
}

fn default_attempts() -> u32 {
    6
}

fn default_base_timeout_us() -> u64 {
    1000
}

fn default_sync_interval() -> i8 {
    -3
}

fn default_announce_interval() -> i8 {
    0
}

fn default_pdelay_interval() -> i8 {
    0
}

fn default_neighbor_prop_delay_thresh() -> i64 {
    800
}

fn default_receipt_timeout() -> u32 {
    3
}
