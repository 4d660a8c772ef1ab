// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names, default values, and the
//! [`EngineConfig`] loaded from them once at startup. Invalid values fall
//! back to their defaults with a warning; missing required values are a
//! startup error.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Root directory for plan state, keys and audit logs | `/data` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM certificate chain and key; TLS off if unset | - |
//! | `LEDGER_RPC_URL` | JSON-RPC endpoint of the ledger | `http://127.0.0.1:8545` |
//! | `LEDGER_CHAIN_ID` | Chain ID used when signing | `31337` |
//! | `LEDGER_CONFIRMATIONS` | Confirmation depth that counts as committed | `1` |
//! | `RPC_MAX_ATTEMPTS` | Attempts per ledger call | `3` |
//! | `RPC_BASE_DELAY_MS` / `RPC_MAX_DELAY_MS` | Retry backoff bounds | `250` / `4000` |
//! | `CONFIRMATION_TIMEOUT_SECS` | Wait for a transfer to confirm | `60` |
//! | `CONFIRMATION_POLL_MS` | Receipt polling interval | `2000` |
//! | `FEE_COLLECTOR_ADDRESS` | Receives the relay fee | Required |
//! | `FEE_BPS` | Relay fee in basis points, below 10000 | `100` |
//! | `FEE_EXEMPT_TOKEN` | ERC-20 whose holders pay no fee | - |
//! | `FEE_EXEMPT_MIN_BALANCE` | Minimum raw token balance for exemption | `1` |
//! | `MIN_HOPS` / `MAX_HOPS` | Hop count window within 7..=12 | `7` / `12` |
//! | `JITTER_MIN_MS` / `JITTER_MAX_MS` | Pre-submission delay window | `500` / `3000` |
//! | `FUNDING_WINDOW_SECS` | Time allowed to fund the deposit account, at most 7 days | `600` |
//! | `FUNDING_TOLERANCE_BPS` | Shortfall tolerated when detecting funding, below 10000 | `50` |
//! | `MIN_TRANSFER_AMOUNT` | Smallest accepted transfer | `0.001` |
//! | `MAX_HOP_ATTEMPTS` | Ledger attempts per hop before the plan fails | `6` |
//! | `STEP_LEASE_SECS` | Claim lifetime of an in-flight hop | `300` |
//! | `ESTIMATED_CONFIRMATION_MS` | Per-hop confirmation estimate shown to callers | `2000` |
//! | `SANCTIONS_LIST_PATH` | Newline-separated sanctioned addresses | one source required |
//! | `SANCTIONS_API_URL` | HTTP screening service base URL | one source required |
//! | `COMPLIANCE_CACHE_CAPACITY` | Cached screening verdicts | `10000` |
//! | `COMPLIANCE_CACHE_TTL_SECS` | Verdict lifetime | `3600` |
//! | `NAME_DIRECTORY_PATH` | JSON map of destination aliases | - |
//! | `DRIVER_ENABLED` | Run the background plan driver | `true` |
//! | `DRIVER_POLL_INTERVAL_SECS` | Driver sweep interval | `5` |
//! | `RNG_SEED` | Seed for hop counts and jitter (deterministic runs) | - |

use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::blockchain::{
    parse_amount, Address, ConfirmationPolicy, NetworkConfig, RetryPolicy, NATIVE_DECIMALS,
};
use crate::storage::paths::DATA_ROOT;

/// Environment variable name for the data directory path.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// Environment variable name for the logging format.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Required: address that receives relay fees.
pub const FEE_COLLECTOR_ENV: &str = "FEE_COLLECTOR_ADDRESS";

/// Hop count bounds every plan must respect.
pub const HOP_COUNT_FLOOR: u8 = 7;
pub const HOP_COUNT_CEILING: u8 = 12;

/// Largest accepted basis-point setting. A full 10 000 would consume the
/// whole amount as fee, or accept an empty deposit as funded.
pub const MAX_BPS: u32 = 9_999;

pub const DEFAULT_FEE_BPS: u32 = 100;
pub const DEFAULT_FUNDING_TOLERANCE_BPS: u32 = 50;
pub const DEFAULT_FUNDING_WINDOW: Duration = Duration::from_secs(600);
pub const MAX_FUNDING_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_MIN_TRANSFER_AMOUNT: &str = "0.001";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    /// Read `LOG_FORMAT` directly, so logging can start before the rest of
    /// the configuration is loaded.
    pub fn from_env() -> Self {
        Self::parse(std::env::var(LOG_FORMAT_ENV).ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Parameters of the routing engine itself.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub fee_collector: Address,
    pub fee_bps: u32,
    pub min_hops: u8,
    pub max_hops: u8,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    pub funding_window: Duration,
    pub funding_tolerance_bps: u32,
    /// Smallest accepted transfer in base units.
    pub min_transfer_amount: u128,
    pub max_hop_attempts: u32,
    pub step_lease: Duration,
    pub estimated_confirmation_ms: u64,
}

impl RoutingConfig {
    /// Hop window clamped into the allowed 7..=12 range.
    pub fn hop_bounds(&self) -> (u8, u8) {
        let min = self.min_hops.clamp(HOP_COUNT_FLOOR, HOP_COUNT_CEILING);
        let max = self.max_hops.clamp(min, HOP_COUNT_CEILING);
        (min, max)
    }

    /// Rough end-to-end duration shown to callers at plan creation.
    pub fn estimated_time_ms(&self, hop_count: u8) -> u64 {
        let mean_jitter = (self.jitter_min_ms + self.jitter_max_ms) / 2;
        u64::from(hop_count) * (mean_jitter + self.estimated_confirmation_ms)
    }
}

/// Screening source and cache settings.
#[derive(Debug, Clone)]
pub struct ComplianceConfig {
    pub sanctions_list_path: Option<PathBuf>,
    pub sanctions_api_url: Option<url::Url>,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct FeeExemptionConfig {
    pub token: Address,
    pub min_balance: u128,
}

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub log_format: LogFormat,
    pub tls: Option<TlsConfig>,
    pub network: NetworkConfig,
    pub retry: RetryPolicy,
    pub confirmation: ConfirmationPolicy,
    pub routing: RoutingConfig,
    pub compliance: ComplianceConfig,
    pub fee_exemption: Option<FeeExemptionConfig>,
    pub name_directory_path: Option<PathBuf>,
    pub driver_enabled: bool,
    pub driver_poll_interval: Duration,
    pub rng_seed: Option<u64>,
}

impl EngineConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using `lookup` as the variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let fee_collector_raw = env.string(FEE_COLLECTOR_ENV).ok_or(ConfigError::Missing(FEE_COLLECTOR_ENV))?;
        let fee_collector =
            Address::parse(&fee_collector_raw).map_err(|e| ConfigError::Invalid {
                var: FEE_COLLECTOR_ENV,
                reason: e.to_string(),
            })?;

        let min_transfer_raw = env
            .string("MIN_TRANSFER_AMOUNT")
            .unwrap_or_else(|| DEFAULT_MIN_TRANSFER_AMOUNT.to_string());
        let min_transfer_amount = parse_amount(&min_transfer_raw, NATIVE_DECIMALS).map_err(|e| {
            ConfigError::Invalid {
                var: "MIN_TRANSFER_AMOUNT",
                reason: e.to_string(),
            }
        })?;

        let routing = RoutingConfig {
            fee_collector,
            fee_bps: env.parsed_in("FEE_BPS", DEFAULT_FEE_BPS, 0..=MAX_BPS),
            min_hops: env.parsed_in(
                "MIN_HOPS",
                HOP_COUNT_FLOOR,
                HOP_COUNT_FLOOR..=HOP_COUNT_CEILING,
            ),
            max_hops: env.parsed_in(
                "MAX_HOPS",
                HOP_COUNT_CEILING,
                HOP_COUNT_FLOOR..=HOP_COUNT_CEILING,
            ),
            jitter_min_ms: env.parsed("JITTER_MIN_MS", 500),
            jitter_max_ms: env.parsed("JITTER_MAX_MS", 3000),
            funding_window: Duration::from_secs(env.parsed_in(
                "FUNDING_WINDOW_SECS",
                DEFAULT_FUNDING_WINDOW.as_secs(),
                1..=MAX_FUNDING_WINDOW.as_secs(),
            )),
            funding_tolerance_bps: env.parsed_in(
                "FUNDING_TOLERANCE_BPS",
                DEFAULT_FUNDING_TOLERANCE_BPS,
                0..=MAX_BPS,
            ),
            min_transfer_amount,
            max_hop_attempts: env.parsed("MAX_HOP_ATTEMPTS", 6),
            step_lease: Duration::from_secs(env.parsed("STEP_LEASE_SECS", 300)),
            estimated_confirmation_ms: env.parsed("ESTIMATED_CONFIRMATION_MS", 2000),
        };

        let sanctions_list_path = env.string("SANCTIONS_LIST_PATH").map(PathBuf::from);
        let sanctions_api_url = match env.string("SANCTIONS_API_URL") {
            Some(raw) => Some(url::Url::parse(&raw).map_err(|e| ConfigError::Invalid {
                var: "SANCTIONS_API_URL",
                reason: e.to_string(),
            })?),
            None => None,
        };
        if sanctions_list_path.is_none() && sanctions_api_url.is_none() {
            return Err(ConfigError::Missing(
                "SANCTIONS_LIST_PATH or SANCTIONS_API_URL",
            ));
        }
        let compliance = ComplianceConfig {
            sanctions_list_path,
            sanctions_api_url,
            cache_capacity: env.parsed("COMPLIANCE_CACHE_CAPACITY", 10_000),
            cache_ttl: Duration::from_secs(env.parsed("COMPLIANCE_CACHE_TTL_SECS", 3600)),
        };

        let fee_exemption = match env.string("FEE_EXEMPT_TOKEN") {
            Some(raw) => Some(FeeExemptionConfig {
                token: Address::parse(&raw).map_err(|e| ConfigError::Invalid {
                    var: "FEE_EXEMPT_TOKEN",
                    reason: e.to_string(),
                })?,
                min_balance: env.parsed("FEE_EXEMPT_MIN_BALANCE", 1),
            }),
            None => None,
        };

        let tls = match (env.string("TLS_CERT_PATH"), env.string("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: cert.into(),
                key_path: key.into(),
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid {
                    var: "TLS_CERT_PATH",
                    reason: "TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string(),
                })
            }
        };

        let log_format = LogFormat::parse(env.string(LOG_FORMAT_ENV).as_deref());

        Ok(Self {
            host: env.string("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env.parsed("PORT", 8080),
            data_dir: env
                .string(DATA_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DATA_ROOT)),
            log_format,
            tls,
            network: NetworkConfig {
                name: env
                    .string("LEDGER_NAME")
                    .unwrap_or_else(|| "ledger".to_string()),
                chain_id: env.parsed("LEDGER_CHAIN_ID", 31337),
                rpc_url: env
                    .string("LEDGER_RPC_URL")
                    .unwrap_or_else(|| "http://127.0.0.1:8545".to_string()),
                confirmations: env.parsed::<u64>("LEDGER_CONFIRMATIONS", 1).max(1),
            },
            retry: RetryPolicy {
                max_attempts: env.parsed::<u32>("RPC_MAX_ATTEMPTS", 3).max(1),
                base_delay: Duration::from_millis(env.parsed("RPC_BASE_DELAY_MS", 250)),
                max_delay: Duration::from_millis(env.parsed("RPC_MAX_DELAY_MS", 4000)),
            },
            confirmation: ConfirmationPolicy {
                timeout: Duration::from_secs(env.parsed("CONFIRMATION_TIMEOUT_SECS", 60)),
                poll_interval: Duration::from_millis(env.parsed("CONFIRMATION_POLL_MS", 2000)),
            },
            routing,
            compliance,
            fee_exemption,
            name_directory_path: env.string("NAME_DIRECTORY_PATH").map(PathBuf::from),
            driver_enabled: env.parsed("DRIVER_ENABLED", true),
            driver_poll_interval: Duration::from_secs(
                env.parsed::<u64>("DRIVER_POLL_INTERVAL_SECS", 5).max(1),
            ),
            rng_seed: env.string("RNG_SEED").and_then(|s| s.parse().ok()),
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T: FromStr>(&self, name: &str, default: T) -> T {
        match self.string(name) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(var = name, value = %raw, "Invalid configuration value, using default");
                default
            }),
            None => default,
        }
    }

    /// Like [`Env::parsed`], but values outside `range` also fall back.
    fn parsed_in<T>(&self, name: &str, default: T, range: RangeInclusive<T>) -> T
    where
        T: FromStr + PartialOrd + Copy + fmt::Display,
    {
        let value = self.parsed(name, default);
        if range.contains(&value) {
            return value;
        }
        tracing::warn!(
            var = name,
            value = %value,
            min = %range.start(),
            max = %range.end(),
            "Configuration value out of range, using default"
        );
        default
    }
}
