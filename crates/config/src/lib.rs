//! realmd configuration
//!
//! Loads the server configuration from a `key = value` text file. Unknown
//! keys are ignored with a warning; scalar values that fail to parse keep
//! their default. `zone` and `area` lines may repeat and describe the world
//! layout; a malformed layout line is an error since the world cannot be
//! built without it.
//!
//! ```text
//! # realmd.cfg
//! bind_address = 0.0.0.0:10300
//! speed_tolerance_percent = 180
//! zone = 5, 1, 0, 0, 65536, 65536, Camelot Hills
//! area = 1, circle, 32000, 32000, 0, 800, 0, Camelot
//! area = 1, polygon, 10000, 10000, 3000, 9000;9000|12000;9000|10500;12000, Tor
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use realmd_core::RealmError;

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config/realmd.cfg";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Invalid value: {0}")]
    Invalid(String),
}

impl From<ConfigError> for RealmError {
    fn from(err: ConfigError) -> Self {
        RealmError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Movement validation and fall damage tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementConfig {
    /// Allowed distance as a percentage of what the speed permits
    pub speed_tolerance_percent: u32,
    /// Displacements at or below this never count as infractions
    pub speed_ignore_distance: u32,
    /// Log one speedhack report per this many infractions
    pub speedhack_log_every: u32,
    /// Minimum time between two area membership recomputations
    pub area_update_interval_ms: u64,
    /// Fall speed above which damage starts (clients before 1.88)
    pub fall_min_speed: i32,
    /// Fall speed units per damage percent (clients before 1.88)
    pub fall_divide: i32,
    pub fall_min_speed_188: i32,
    pub fall_divide_188: i32,
    /// Fall speed absorbed per safe-fall level
    pub safe_fall_step: i32,
    /// Radius of position rebroadcast
    pub visibility_distance: u32,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            speed_tolerance_percent: 180,
            speed_ignore_distance: 100,
            speedhack_log_every: 10,
            area_update_interval_ms: 2000,
            fall_min_speed: 400,
            fall_divide: 6,
            fall_min_speed_188: 500,
            fall_divide_188: 15,
            safe_fall_step: 100,
            visibility_distance: 3600,
        }
    }
}

/// One zone of the world layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSpec {
    pub id: u16,
    pub region: u16,
    pub x_offset: i32,
    pub y_offset: i32,
    pub width: i32,
    pub height: i32,
    pub description: String,
}

/// Geometry of a configured area
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AreaShapeSpec {
    Square {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    },
    Circle {
        x: i32,
        y: i32,
        z: i32,
        radius: i32,
        check_z: bool,
    },
    Polygon {
        x: i32,
        y: i32,
        radius: i32,
        points: String,
    },
}

/// One area of the world layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaSpec {
    pub region: u16,
    pub description: String,
    pub shape: AreaShapeSpec,
}

/// Complete server configuration
#[derive(Debug, Clone)]
pub struct RealmConfig {
    /// Server name shown in logs
    pub name: String,
    /// TCP listen address
    pub bind_address: SocketAddr,
    /// Session limit; further logins are refused
    pub max_sessions: usize,
    /// Malformed packets tolerated before a session is dropped
    pub max_bad_packets: u32,
    /// Grace period between link death and removal
    pub linkdead_timeout: Duration,
    /// Packets kept per session for diagnostics
    pub packet_history: usize,
    /// Largest frame accepted or sent
    pub max_packet_size: usize,
    /// Region scheduler resolution
    pub scheduler_tick: Duration,
    /// Fallback tracing filter when `RUST_LOG` is unset
    pub log_level: String,
    /// JSON file holding accounts and characters
    pub store_path: PathBuf,
    pub movement: MovementConfig,
    pub zones: Vec<ZoneSpec>,
    pub areas: Vec<AreaSpec>,
}

impl Default for RealmConfig {
    fn default() -> Self {
        Self {
            name: "realmd".into(),
            bind_address: SocketAddr::from(([0, 0, 0, 0], 10300)),
            max_sessions: 1500,
            max_bad_packets: 10,
            linkdead_timeout: Duration::from_millis(20_000),
            packet_history: 16,
            max_packet_size: 2048,
            scheduler_tick: Duration::from_millis(10),
            log_level: "info".into(),
            store_path: PathBuf::from("data/realm.json"),
            movement: MovementConfig::default(),
            zones: Vec::new(),
            areas: Vec::new(),
        }
    }
}

impl RealmConfig {
    /// Load configuration from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load [`DEFAULT_CONFIG_PATH`], or the defaults when the file is absent
    pub fn load_default() -> Result<Self> {
        match Self::load_from_file(DEFAULT_CONFIG_PATH) {
            Err(ConfigError::FileError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("{} not found, using default configuration", DEFAULT_CONFIG_PATH);
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Parse configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let mut config = Self::default();

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(eq_pos) = line.find('=') {
                let key = line[..eq_pos].trim();
                let value = line[eq_pos + 1..].trim();

                config
                    .parse_option(key, value)
                    .map_err(|message| ConfigError::ParseError {
                        line: index + 1,
                        message,
                    })?;
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn parse_option(&mut self, key: &str, value: &str) -> std::result::Result<(), String> {
        let movement = &mut self.movement;
        match key {
            "name" => self.name = value.into(),
            "bind_address" => match value.parse() {
                Ok(addr) => self.bind_address = addr,
                Err(_) => tracing::warn!("Invalid bind_address '{}', keeping {}", value, self.bind_address),
            },
            "max_sessions" => scalar(key, value, &mut self.max_sessions),
            "max_bad_packets" => scalar(key, value, &mut self.max_bad_packets),
            "linkdead_timeout_ms" => millis(key, value, &mut self.linkdead_timeout),
            "packet_history" => scalar(key, value, &mut self.packet_history),
            "max_packet_size" => scalar(key, value, &mut self.max_packet_size),
            "scheduler_tick_ms" => millis(key, value, &mut self.scheduler_tick),
            "log_level" => self.log_level = value.into(),
            "store_path" => self.store_path = PathBuf::from(value),
            "speed_tolerance_percent" => scalar(key, value, &mut movement.speed_tolerance_percent),
            "speed_ignore_distance" => scalar(key, value, &mut movement.speed_ignore_distance),
            "speedhack_log_every" => scalar(key, value, &mut movement.speedhack_log_every),
            "area_update_interval_ms" => scalar(key, value, &mut movement.area_update_interval_ms),
            "fall_min_speed" => scalar(key, value, &mut movement.fall_min_speed),
            "fall_divide" => scalar(key, value, &mut movement.fall_divide),
            "fall_min_speed_188" => scalar(key, value, &mut movement.fall_min_speed_188),
            "fall_divide_188" => scalar(key, value, &mut movement.fall_divide_188),
            "safe_fall_step" => scalar(key, value, &mut movement.safe_fall_step),
            "visibility_distance" => scalar(key, value, &mut movement.visibility_distance),
            "zone" => self.zones.push(parse_zone(value)?),
            "area" => self.areas.push(parse_area(value)?),
            _ => tracing::warn!("Unknown configuration key '{}'", key),
        }
        Ok(())
    }

    /// Validate the configuration
    ///
    /// # Checks
    /// - `max_sessions` must be > 0
    /// - divisors and intervals must be > 0
    /// - the frame limit must hold the largest position rebroadcast
    /// - zone ids must be unique and zones must have a positive size
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.max_sessions == 0 {
            return invalid("max_sessions must be > 0");
        }
        if self.max_sessions > u16::MAX as usize - 1 {
            return invalid("max_sessions must fit a 16-bit session id");
        }
        if self.movement.speedhack_log_every == 0 {
            return invalid("speedhack_log_every must be > 0");
        }
        if self.movement.fall_divide <= 0 || self.movement.fall_divide_188 <= 0 {
            return invalid("fall_divide values must be > 0");
        }
        if self.scheduler_tick.is_zero() {
            return invalid("scheduler_tick_ms must be > 0");
        }
        if self.max_packet_size < 64 {
            return invalid("max_packet_size must be >= 64");
        }

        let mut ids = std::collections::HashSet::new();
        for zone in &self.zones {
            if !ids.insert(zone.id) {
                return Err(ConfigError::Invalid(format!("duplicate zone id {}", zone.id)));
            }
            if zone.width <= 0 || zone.height <= 0 {
                return Err(ConfigError::Invalid(format!("zone {} has no extent", zone.id)));
            }
        }

        if self.movement.speed_tolerance_percent < 100 {
            tracing::warn!(
                "speed_tolerance_percent below 100 will flag legitimate movement"
            );
        }

        Ok(())
    }

    /// Display configuration summary
    pub fn display(&self) {
        let m = &self.movement;
        tracing::info!("Server configuration:");
        tracing::info!("  Name: {}", self.name);
        tracing::info!("  Bind: {}", self.bind_address);
        tracing::info!("  Max sessions: {}", self.max_sessions);
        tracing::info!("  Bad packet threshold: {}", self.max_bad_packets);
        tracing::info!("  Linkdead grace: {:?}", self.linkdead_timeout);
        tracing::info!("  Scheduler tick: {:?}", self.scheduler_tick);
        tracing::info!("  Store: {}", self.store_path.display());
        tracing::info!(
            "  Speed tolerance: {}% (floor {} units, log every {})",
            m.speed_tolerance_percent,
            m.speed_ignore_distance,
            m.speedhack_log_every
        );
        tracing::info!("  Area update interval: {}ms", m.area_update_interval_ms);
        tracing::info!("  Visibility distance: {}", m.visibility_distance);
        tracing::info!("  Zones: {}  Areas: {}", self.zones.len(), self.areas.len());
    }
}

fn scalar<T: FromStr + std::fmt::Display>(key: &str, value: &str, slot: &mut T) {
    match value.parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => tracing::warn!("Invalid value '{}' for {}, keeping {}", value, key, slot),
    }
}

fn millis(key: &str, value: &str, slot: &mut Duration) {
    match value.parse::<u64>() {
        Ok(ms) => *slot = Duration::from_millis(ms),
        Err(_) => tracing::warn!("Invalid value '{}' for {}, keeping {:?}", value, key, slot),
    }
}

fn field<T: FromStr>(parts: &[&str], index: usize, name: &str) -> std::result::Result<T, String> {
    parts
        .get(index)
        .ok_or_else(|| format!("missing {}", name))?
        .trim()
        .parse()
        .map_err(|_| format!("invalid {} '{}'", name, parts[index].trim()))
}

/// `zone = id, region, x_offset, y_offset, width, height, description`
fn parse_zone(value: &str) -> std::result::Result<ZoneSpec, String> {
    let parts: Vec<&str> = value.splitn(7, ',').collect();
    Ok(ZoneSpec {
        id: field(&parts, 0, "zone id")?,
        region: field(&parts, 1, "region")?,
        x_offset: field(&parts, 2, "x offset")?,
        y_offset: field(&parts, 3, "y offset")?,
        width: field(&parts, 4, "width")?,
        height: field(&parts, 5, "height")?,
        description: parts.get(6).map(|s| s.trim().to_string()).unwrap_or_default(),
    })
}

/// `area = region, kind, params..., description`
fn parse_area(value: &str) -> std::result::Result<AreaSpec, String> {
    let head: Vec<&str> = value.splitn(3, ',').collect();
    let region = field(&head, 0, "region")?;
    let kind = head.get(1).map(|s| s.trim().to_ascii_lowercase()).unwrap_or_default();
    let rest = head.get(2).copied().unwrap_or("");

    let (shape, description) = match kind.as_str() {
        "square" => {
            let p: Vec<&str> = rest.splitn(5, ',').collect();
            let shape = AreaShapeSpec::Square {
                x: field(&p, 0, "x")?,
                y: field(&p, 1, "y")?,
                width: field(&p, 2, "width")?,
                height: field(&p, 3, "height")?,
            };
            (shape, p.get(4).copied())
        }
        "circle" => {
            let p: Vec<&str> = rest.splitn(6, ',').collect();
            let check_z: u8 = field(&p, 4, "check_z")?;
            let shape = AreaShapeSpec::Circle {
                x: field(&p, 0, "x")?,
                y: field(&p, 1, "y")?,
                z: field(&p, 2, "z")?,
                radius: field(&p, 3, "radius")?,
                check_z: check_z != 0,
            };
            (shape, p.get(5).copied())
        }
        "polygon" => {
            let p: Vec<&str> = rest.splitn(5, ',').collect();
            let points = p.get(3).map(|s| s.trim().to_string()).ok_or("missing points")?;
            let shape = AreaShapeSpec::Polygon {
                x: field(&p, 0, "x")?,
                y: field(&p, 1, "y")?,
                radius: field(&p, 2, "radius")?,
                points,
            };
            (shape, p.get(4).copied())
        }
        other => return Err(format!("unknown area kind '{}'", other)),
    };

    Ok(AreaSpec {
        region,
        description: description.map(|s| s.trim().to_string()).unwrap_or_default(),
        shape,
    })
}
