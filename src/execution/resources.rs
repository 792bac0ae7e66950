//! Resource limits for training containers.
//!
//! A task either supplies its own [`ResourceLimits`] or gets
//! [`ResourceLimits::default`]. Explicit limits replace the defaults wholesale:
//! a field left `None` in an explicit request is simply not applied, it is
//! never filled in from the defaults.

use serde::{Deserialize, Serialize};

use crate::error::DockerError;

/// CFS period used by the defaults (100ms in microseconds).
pub const DEFAULT_CPU_PERIOD: i64 = 100_000;

/// CFS quota used by the defaults: two cores worth of `DEFAULT_CPU_PERIOD`.
pub const DEFAULT_CPU_QUOTA: i64 = 200_000;

/// Relative CPU share weight applied unless the limits carry their own.
pub const DEFAULT_CPU_SHARES: i64 = 1024;

/// Memory ceiling used by the defaults.
pub const DEFAULT_MEM_LIMIT: &str = "8g";

/// Resource limits requested for a training container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CFS quota in microseconds per period.
    pub cpu_quota: Option<i64>,
    /// CFS period in microseconds.
    pub cpu_period: Option<i64>,
    /// Relative share weight. Falls back to [`DEFAULT_CPU_SHARES`].
    pub cpu_shares: Option<i64>,
    /// Memory ceiling in Docker notation, e.g. `"512m"` or `"8g"`.
    pub mem_limit: Option<String>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_quota: Some(DEFAULT_CPU_QUOTA),
            cpu_period: Some(DEFAULT_CPU_PERIOD),
            cpu_shares: None,
            mem_limit: Some(DEFAULT_MEM_LIMIT.to_string()),
        }
    }
}

impl ResourceLimits {
    /// Limits with nothing set. Only the share weight will be applied.
    pub fn unbounded() -> Self {
        Self {
            cpu_quota: None,
            cpu_period: None,
            cpu_shares: None,
            mem_limit: None,
        }
    }

    /// Limits granting `cores` CPUs over the default period.
    pub fn with_cpus(mut self, cores: f64) -> Self {
        self.cpu_period = Some(DEFAULT_CPU_PERIOD);
        self.cpu_quota = Some((DEFAULT_CPU_PERIOD as f64 * cores) as i64);
        self
    }

    /// Sets the memory ceiling.
    pub fn with_mem_limit(mut self, mem_limit: impl Into<String>) -> Self {
        self.mem_limit = Some(mem_limit.into());
        self
    }

    /// Sets the relative CPU share weight.
    pub fn with_cpu_shares(mut self, shares: i64) -> Self {
        self.cpu_shares = Some(shares);
        self
    }

    /// Resolves the limits a container is actually created with.
    ///
    /// `explicit` wins wholesale over the defaults. The memory string is
    /// parsed here so that a malformed value fails before any container
    /// is touched.
    pub fn resolve(explicit: Option<ResourceLimits>, gpu: bool) -> Result<ResolvedLimits, DockerError> {
        let limits = explicit.unwrap_or_default();

        let memory_bytes = limits
            .mem_limit
            .as_deref()
            .map(parse_memory_limit)
            .transpose()?;

        if let Some(quota) = limits.cpu_quota {
            if quota <= 0 {
                return Err(DockerError::InvalidLimits(format!(
                    "cpu_quota must be positive, got {quota}"
                )));
            }
        }
        if let Some(period) = limits.cpu_period {
            if !(1_000..=1_000_000).contains(&period) {
                return Err(DockerError::InvalidLimits(format!(
                    "cpu_period must be between 1000 and 1000000, got {period}"
                )));
            }
        }

        Ok(ResolvedLimits {
            cpu_quota: limits.cpu_quota,
            cpu_period: limits.cpu_period,
            cpu_shares: limits.cpu_shares.unwrap_or(DEFAULT_CPU_SHARES),
            memory_bytes,
            gpu_requested: gpu,
        })
    }
}

/// Limits ready to hand to the container runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLimits {
    pub cpu_quota: Option<i64>,
    pub cpu_period: Option<i64>,
    pub cpu_shares: i64,
    pub memory_bytes: Option<i64>,
    /// Request every GPU the runtime can offer.
    pub gpu_requested: bool,
}

impl ResolvedLimits {
    /// CPU cores equivalent of the quota, if both quota and period are set.
    pub fn cpu_cores(&self) -> Option<f64> {
        match (self.cpu_quota, self.cpu_period) {
            (Some(quota), Some(period)) => Some(quota as f64 / period as f64),
            _ => None,
        }
    }
}

/// Parses a Docker-style memory string into bytes.
///
/// Accepts an optional `b`, `k`, `m` or `g` suffix (case-insensitive, binary
/// units). A bare number is taken as bytes.
pub fn parse_memory_limit(value: &str) -> Result<i64, DockerError> {
    let trimmed = value.trim();
    let invalid = || DockerError::InvalidLimits(format!("unrecognised memory limit '{value}'"));

    let (digits, multiplier) = match trimmed.chars().last() {
        Some(c) if c.is_ascii_digit() => (trimmed, 1),
        Some(c) => {
            let multiplier = match c.to_ascii_lowercase() {
                'b' => 1,
                'k' => 1024,
                'm' => 1024 * 1024,
                'g' => 1024 * 1024 * 1024,
                _ => return Err(invalid()),
            };
            (&trimmed[..trimmed.len() - c.len_utf8()], multiplier)
        }
        None => return Err(invalid()),
    };

    let amount: i64 = digits.parse().map_err(|_| invalid())?;
    if amount <= 0 {
        return Err(invalid());
    }

    amount.checked_mul(multiplier).ok_or_else(invalid)
}
