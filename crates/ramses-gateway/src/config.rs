//! Gateway configuration.
//!
//! Durations are carried as milliseconds in JSON:
//!
//! ```json
//! {
//!   "dedup_window_ms": 500,
//!   "max_retries": 3,
//!   "backoff": { "kind": "exponential", "base_ms": 200, "max_ms": 5000 },
//!   "gateway_id": "18:013393",
//!   "block_list": ["04:999999"]
//! }
//! ```

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use ramses_frame::{Address, FrameConfig};
use ramses_schema::{FieldClass, RegistryConfig};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

const MAX_CONFIG_FILE_SIZE: usize = 64 * 1024;

/// Dedup window settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupConfig {
    /// Receptions of the same fingerprint closer than this are duplicates.
    pub window: Duration,
    /// How long an own transmission waits for its echo.
    pub echo_window: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(500),
            echo_window: Duration::from_secs(1),
        }
    }
}

/// Delay before a timed-out command is sent again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    Fixed {
        #[serde(rename = "delay_ms", with = "millis")]
        delay: Duration,
    },
    Exponential {
        #[serde(rename = "base_ms", with = "millis")]
        base: Duration,
        #[serde(rename = "max_ms", with = "millis")]
        max: Duration,
    },
}

impl Backoff {
    /// Delay before retry number `retry` (1 for the first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay } => delay,
            Backoff::Exponential { base, max } => {
                let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base: Duration::from_millis(200),
            max: Duration::from_secs(5),
        }
    }
}

/// Dispatcher pacing and retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Minimum spacing between two transmissions.
    pub min_gap: Duration,
    /// How long a sent command waits for its own echo.
    pub echo_timeout: Duration,
    /// How long an echoed command waits for its reply.
    pub reply_timeout: Duration,
    /// Retries after the first attempt, unless the command overrides it.
    pub max_retries: u8,
    pub backoff: Backoff,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            min_gap: Duration::from_millis(200),
            echo_timeout: Duration::from_millis(500),
            reply_timeout: Duration::from_secs(1),
            max_retries: 3,
            backoff: Backoff::default(),
        }
    }
}

/// RF binding handshake timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindConfig {
    /// How long each phase waits for the peer before resending or giving up.
    #[serde(rename = "wait_timeout_ms", with = "millis")]
    pub wait_timeout: Duration,
    /// Offers or accepts sent before the handshake fails.
    pub send_limit: u8,
    /// Confirms sent before the supplicant treats itself as bound.
    pub confirm_limit: u8,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(3),
            send_limit: 3,
            confirm_limit: 3,
        }
    }
}

/// Age past which a field counts as stale, per field class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessConfig {
    #[serde(rename = "measurement_ms", with = "millis")]
    pub measurement: Duration,
    #[serde(rename = "setting_ms", with = "millis")]
    pub setting: Duration,
    #[serde(rename = "configuration_ms", with = "millis")]
    pub configuration: Duration,
    #[serde(rename = "diagnostic_ms", with = "millis")]
    pub diagnostic: Duration,
}

impl StalenessConfig {
    pub fn threshold(&self, class: FieldClass) -> Duration {
        match class {
            FieldClass::Measurement => self.measurement,
            FieldClass::Setting => self.setting,
            FieldClass::Configuration => self.configuration,
            FieldClass::Diagnostic => self.diagnostic,
        }
    }
}

impl Default for StalenessConfig {
    fn default() -> Self {
        const HOUR: u64 = 60 * 60;
        Self {
            measurement: Duration::from_secs(12 * 60),
            setting: Duration::from_secs(2 * HOUR),
            configuration: Duration::from_secs(24 * HOUR),
            diagnostic: Duration::from_secs(24 * HOUR),
        }
    }
}

/// Complete gateway configuration, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    #[serde(rename = "dedup_window_ms", with = "millis")]
    pub dedup_window: Duration,
    #[serde(rename = "echo_window_ms", with = "millis")]
    pub echo_window: Duration,
    #[serde(rename = "min_gap_ms", with = "millis")]
    pub min_gap: Duration,
    #[serde(rename = "echo_timeout_ms", with = "millis")]
    pub echo_timeout: Duration,
    #[serde(rename = "reply_timeout_ms", with = "millis")]
    pub reply_timeout: Duration,
    pub max_retries: u8,
    pub backoff: Backoff,
    pub staleness: StalenessConfig,
    pub binding: BindConfig,

    /// Own gateway address. Commands built from the placeholder are sent from it.
    pub gateway_id: Address,
    pub known_list: Vec<Address>,
    pub block_list: Vec<Address>,
    /// Drop traffic from devices missing from `known_list`.
    pub enforce_known_list: bool,

    /// Expect a trailing hex checksum on every line.
    pub checksum: bool,
    pub max_zones: u8,
    /// Read timeout applied to streams that support one, so the reader
    /// notices shutdown.
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let dedup = DedupConfig::default();
        let dispatch = DispatchConfig::default();
        Self {
            dedup_window: dedup.window,
            echo_window: dedup.echo_window,
            min_gap: dispatch.min_gap,
            echo_timeout: dispatch.echo_timeout,
            reply_timeout: dispatch.reply_timeout,
            max_retries: dispatch.max_retries,
            backoff: dispatch.backoff,
            staleness: StalenessConfig::default(),
            binding: BindConfig::default(),
            gateway_id: Address::HGI_DEFAULT,
            known_list: Vec::new(),
            block_list: Vec::new(),
            enforce_known_list: false,
            checksum: false,
            max_zones: RegistryConfig::default().max_zones,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl GatewayConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: GatewayConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|err| GatewayError::Config(format!("{}: {err}", path.display())))?;
        let mut text = String::new();
        file.take(MAX_CONFIG_FILE_SIZE as u64 + 1)
            .read_to_string(&mut text)
            .map_err(|err| GatewayError::Config(format!("{}: {err}", path.display())))?;
        if text.len() > MAX_CONFIG_FILE_SIZE {
            return Err(GatewayError::Config(format!(
                "config file too large: {}",
                path.display()
            )));
        }
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dedup_window.is_zero() {
            return Err(GatewayError::Config("dedup window must be non-zero".into()));
        }
        if self.echo_timeout.is_zero() || self.reply_timeout.is_zero() {
            return Err(GatewayError::Config(
                "echo and reply timeouts must be non-zero".into(),
            ));
        }
        if self.binding.wait_timeout.is_zero()
            || self.binding.send_limit == 0
            || self.binding.confirm_limit == 0
        {
            return Err(GatewayError::Config(
                "binding timeout and send limits must be non-zero".into(),
            ));
        }
        if !self.gateway_id.is_gateway() {
            return Err(GatewayError::Config(format!(
                "gateway id {} is not a gateway address",
                self.gateway_id
            )));
        }
        if let Some(addr) = self.block_list.iter().find(|a| self.known_list.contains(a)) {
            return Err(GatewayError::Config(format!(
                "{addr} is on both the known list and the block list"
            )));
        }
        if !(1..=16).contains(&self.max_zones) {
            return Err(GatewayError::Config(format!(
                "max_zones must be 1..=16, got {}",
                self.max_zones
            )));
        }
        Ok(())
    }

    pub fn dedup(&self) -> DedupConfig {
        DedupConfig {
            window: self.dedup_window,
            echo_window: self.echo_window,
        }
    }

    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            min_gap: self.min_gap,
            echo_timeout: self.echo_timeout,
            reply_timeout: self.reply_timeout,
            max_retries: self.max_retries,
            backoff: self.backoff,
        }
    }

    pub fn registry(&self) -> RegistryConfig {
        RegistryConfig {
            max_zones: self.max_zones,
            ..RegistryConfig::default()
        }
    }

    pub fn frame(&self) -> FrameConfig {
        FrameConfig {
            checksum: self.checksum,
        }
    }
}

pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
