//! Receiver configuration: CLI flags, YAML file, and size/duration parsing.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

use crate::admission::{
    DEFAULT_CHECK_INTERVAL, DEFAULT_MAX_MEMORY, DEFAULT_MIN_HEADROOM, MemoryLimits,
};
use crate::append::PartialFailurePolicy;
use crate::codec::DEFAULT_MAX_DECODED_BYTES;
use crate::error::{Error, Result};
use crate::pool::{DEFAULT_BUFFER_SIZE, DEFAULT_MAX_BUFFER_SIZE, DEFAULT_POOL_CAPACITY};

lazy_static! {
    static ref BYTE_SIZE: Regex =
        Regex::new(r"(\d+)([GgMmKkBb]?)").expect("valid byte size regex");
}

/// CLI arguments for the receiver.
#[derive(Parser, Debug, Default)]
#[command(name = "receiver")]
#[command(about = "Memory-gated Prometheus remote-write receiver")]
pub struct CliArgs {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "RECEIVER_CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "RECEIVER_PORT")]
    pub port: Option<u16>,

    /// Memory ceiling, e.g. 32G (overrides the config file)
    #[arg(long = "mem-max", env = "RECEIVER_MEM_MAX")]
    pub mem_max: Option<ByteSize>,

    /// Headroom below the ceiling under which writes are refused, e.g. 512M
    #[arg(long = "mem-min", env = "RECEIVER_MEM_MIN")]
    pub mem_min: Option<ByteSize>,

    /// What a rejected sample does to its request
    #[arg(long, value_enum, env = "RECEIVER_PARTIAL_FAILURE")]
    pub partial_failure: Option<PartialFailurePolicy>,
}

impl CliArgs {
    /// Builds the effective configuration: file (or defaults), then flags.
    pub fn load(&self) -> Result<ReceiverConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ReceiverConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Overrides config values with the flags that were given.
    pub fn apply(&self, config: &mut ReceiverConfig) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(max) = self.mem_max {
            config.memory.max = max;
        }
        if let Some(min) = self.mem_min {
            config.memory.min = min;
        }
        if let Some(policy) = self.partial_failure {
            config.ingest.partial_failure = policy;
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub server: ServerSection,
    pub memory: MemorySection,
    pub ingest: IngestSection,
    pub buffer_pool: BufferPoolSection,
    pub storage: StorageSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: u16,
    /// Largest request body accepted.
    pub max_request_bytes: ByteSize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: 9089,
            max_request_bytes: ByteSize(32 * 1024 * 1024),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// Memory ceiling.
    pub max: ByteSize,
    /// Headroom below the ceiling under which writes are refused.
    pub min: ByteSize,
    /// How often resident memory is sampled, e.g. "10s".
    pub check_interval: String,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            max: ByteSize(DEFAULT_MAX_MEMORY),
            min: ByteSize(DEFAULT_MIN_HEADROOM),
            check_interval: format!("{}s", DEFAULT_CHECK_INTERVAL.as_secs()),
        }
    }
}

impl MemorySection {
    pub fn limits(&self) -> MemoryLimits {
        MemoryLimits {
            max: self.max.as_u64(),
            min: self.min.as_u64(),
        }
    }

    pub fn check_interval(&self) -> Result<Duration> {
        parse_duration(&self.check_interval)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestSection {
    pub partial_failure: PartialFailurePolicy,
    /// Largest decompressed frame accepted.
    pub max_decoded_bytes: ByteSize,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            partial_failure: PartialFailurePolicy::default(),
            max_decoded_bytes: ByteSize(DEFAULT_MAX_DECODED_BYTES as u64),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferPoolSection {
    /// Capacity of a fresh pooled buffer.
    pub buffer_size: ByteSize,
    /// Buffers that grew beyond this are dropped instead of pooled.
    pub max_buffer_size: ByteSize,
    /// Idle buffers kept.
    pub capacity: usize,
}

impl Default for BufferPoolSection {
    fn default() -> Self {
        Self {
            buffer_size: ByteSize(DEFAULT_BUFFER_SIZE as u64),
            max_buffer_size: ByteSize(DEFAULT_MAX_BUFFER_SIZE as u64),
            capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Samples older than this are rejected as out of bounds.
    pub min_valid_timestamp_ms: Option<i64>,
}

impl ReceiverConfig {
    /// Checks invariants the binary relies on.
    pub fn validate(&self) -> Result<()> {
        let limits = self.memory.limits();
        if limits.min >= limits.max {
            return Err(Error::InvalidConfig(format!(
                "memory.min ({}) must be below memory.max ({})",
                self.memory.min, self.memory.max
            )));
        }
        if self.memory.check_interval()?.is_zero() {
            return Err(Error::InvalidConfig(
                "memory.check_interval must be positive".to_string(),
            ));
        }
        if self.buffer_pool.max_buffer_size < self.buffer_pool.buffer_size {
            return Err(Error::InvalidConfig(format!(
                "buffer_pool.max_buffer_size ({}) must be at least buffer_pool.buffer_size ({})",
                self.buffer_pool.max_buffer_size, self.buffer_pool.buffer_size
            )));
        }
        if self.buffer_pool.capacity == 0 {
            return Err(Error::InvalidConfig(
                "buffer_pool.capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load receiver configuration from a YAML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ReceiverConfig> {
    let contents = std::fs::read_to_string(path.as_ref())
        .map_err(|e| Error::InvalidConfig(format!("Failed to read config file: {}", e)))?;

    serde_yaml::from_str(&contents)
        .map_err(|e| Error::InvalidConfig(format!("Failed to parse config file: {}", e)))
}

/// A positive byte quantity.
///
/// Parses from strings via [`parse_byte_size`] and, in config files, also
/// from plain integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "ByteSizeRepr")]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The size as `usize`, saturating on 32-bit targets.
    pub fn as_usize(&self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}B", self.0)
    }
}

impl FromStr for ByteSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_byte_size(s).map(ByteSize)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ByteSizeRepr {
    Number(u64),
    Text(String),
}

impl TryFrom<ByteSizeRepr> for ByteSize {
    type Error = Error;

    fn try_from(repr: ByteSizeRepr) -> Result<Self> {
        match repr {
            ByteSizeRepr::Number(0) => Err(Error::InvalidConfig(
                "byte size must be positive".to_string(),
            )),
            ByteSizeRepr::Number(n) => Ok(ByteSize(n)),
            ByteSizeRepr::Text(s) => s.parse(),
        }
    }
}

/// Parse a byte quantity with an optional binary unit suffix.
///
/// The first run of digits in `s` is the number and the character right
/// after it may be `G`, `M`, `K` or `B` (any case). Anything around that
/// match is ignored, so `"--mem.max=512M"` parses as 512 MiB. Input without
/// digits, a zero value, and values overflowing `u64` are errors.
pub fn parse_byte_size(s: &str) -> Result<u64> {
    let caps = BYTE_SIZE
        .captures(s)
        .ok_or_else(|| Error::InvalidConfig(format!("no number in byte size {:?}", s)))?;

    let n: u64 = caps[1]
        .parse()
        .map_err(|e| Error::InvalidConfig(format!("invalid byte size {:?}: {}", s, e)))?;
    if n == 0 {
        return Err(Error::InvalidConfig(format!(
            "byte size {:?} must be positive",
            s
        )));
    }

    let multiplier: u64 = match &caps[2] {
        "G" | "g" => 1024 * 1024 * 1024,
        "M" | "m" => 1024 * 1024,
        "K" | "k" => 1024,
        _ => 1,
    };
    n.checked_mul(multiplier)
        .ok_or_else(|| Error::InvalidConfig(format!("byte size {:?} overflows", s)))
}

/// Parse an interval such as `"500ms"`, `"10s"`, `"1m"`, `"2h"` or `"1d"`.
///
/// A bare number is seconds. Fractions are allowed (`"1.5s"`). Values too
/// large for a [`Duration`] are errors.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    if number.is_empty() {
        return Err(Error::InvalidConfig(format!(
            "interval {:?} must start with a number",
            s
        )));
    }

    let unit_secs = match unit {
        "ms" => 0.001,
        "" | "s" => 1.0,
        "m" => 60.0,
        "h" => 60.0 * 60.0,
        "d" => 24.0 * 60.0 * 60.0,
        other => {
            return Err(Error::InvalidConfig(format!(
                "unknown unit {:?} in interval {:?}",
                other, s
            )));
        }
    };
    let value: f64 = number
        .parse()
        .map_err(|e| Error::InvalidConfig(format!("invalid interval {:?}: {}", s, e)))?;

    Duration::try_from_secs_f64(value * unit_secs)
        .map_err(|e| Error::InvalidConfig(format!("interval {:?} out of range: {}", s, e)))
}
