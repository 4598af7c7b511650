use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::model::Party;
use crate::policy::{Approver, ApproverDirectory, CleanupPolicy, Exemption, SelfApprovalPolicy};

/// Business rules the engine is parameterised with.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub approvers: ApproverDirectory,
    pub self_approval: SelfApprovalPolicy,
    pub cleanup: CleanupPolicy,
    /// Grant an approver's own slot when they file a request themselves.
    pub auto_approve_own_requests: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            approvers: ApproverDirectory::default(),
            self_approval: SelfApprovalPolicy::default(),
            cleanup: CleanupPolicy::default(),
            auto_approve_own_requests: true,
        }
    }
}

/// Daemon configuration, read from `STAYBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// WAL appends after which the compactor rewrites the log.
    pub compact_threshold: u64,
    /// Local hour (0-23) at which the daily cleanup runs.
    pub cleanup_hour: u32,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub key: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.key, self.message)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key → value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = lookup("STAYBOOK_DATA_DIR").unwrap_or_else(|| "./data".into());
        let metrics_port = parse_opt::<u16>(&lookup, "STAYBOOK_METRICS_PORT")?;
        let compact_threshold =
            parse_opt::<u64>(&lookup, "STAYBOOK_COMPACT_THRESHOLD")?.unwrap_or(1000);
        let cleanup_hour = parse_opt::<u32>(&lookup, "STAYBOOK_CLEANUP_HOUR")?.unwrap_or(3);
        if cleanup_hour > 23 {
            return Err(ConfigError {
                key: "STAYBOOK_CLEANUP_HOUR".into(),
                message: format!("{cleanup_hour} is not an hour of the day"),
            });
        }

        let mut engine = EngineConfig {
            cleanup: parse_opt(&lookup, "STAYBOOK_CLEANUP_POLICY")?.unwrap_or_default(),
            auto_approve_own_requests: parse_opt(&lookup, "STAYBOOK_AUTO_APPROVE_OWN")?
                .unwrap_or(true),
            ..EngineConfig::default()
        };

        for party in Party::ALL {
            let upper = party.as_str().to_ascii_uppercase();
            let default = engine.approvers.get(party).clone();
            let email = lookup(&format!("STAYBOOK_APPROVER_{upper}_EMAIL")).unwrap_or(default.email);
            let notify = parse_opt(&lookup, &format!("STAYBOOK_APPROVER_{upper}_NOTIFY"))?
                .unwrap_or(default.notify);
            engine.approvers.set(party, Approver { email, notify });

            if let Some(exemption) =
                parse_opt::<Exemption>(&lookup, &format!("STAYBOOK_SELF_APPROVAL_{upper}"))?
            {
                engine.self_approval = engine.self_approval.with(party, exemption);
            }
        }

        Ok(Self {
            data_dir: PathBuf::from(data_dir),
            metrics_port,
            compact_threshold,
            cleanup_hour,
            engine,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}

fn parse_opt<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| ConfigError {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}
