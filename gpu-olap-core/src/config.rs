//! Execution configuration.
//!
//! Values come from [`ExecConfig::default`] or from the environment:
//!
//! - `GPU_OLAP_QUEUE_DEPTH`: outstanding launches per queue before submit blocks.
//! - `GPU_OLAP_SYNC_LAUNCHES`: `1`/`true` waits for every launch at the call site.
//! - `GPU_OLAP_POOL_SLABS`: comma separated slab sizes (`64K,1M,16M`). Setting
//!   it switches result allocation to a slab pool.
//! - `GPU_OLAP_POOL_MAX_SLABS`: slabs per size class, default 64.

use anyhow::{anyhow, Context, Result};
use gpu_memory_manager::execution_queue::DEFAULT_QUEUE_DEPTH;

pub const ENV_QUEUE_DEPTH: &str = "GPU_OLAP_QUEUE_DEPTH";
pub const ENV_SYNC_LAUNCHES: &str = "GPU_OLAP_SYNC_LAUNCHES";
pub const ENV_POOL_SLABS: &str = "GPU_OLAP_POOL_SLABS";
pub const ENV_POOL_MAX_SLABS: &str = "GPU_OLAP_POOL_MAX_SLABS";

const DEFAULT_MAX_SLABS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecConfig {
    /// Maximum outstanding launches on the queue
    pub queue_depth: usize,
    /// Synchronize after every launch
    pub sync_launches: bool,
    /// Pooled allocation; `None` uses the host resource
    pub pool: Option<PoolConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub slab_sizes: Vec<usize>,
    pub max_slabs_per_class: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            sync_launches: false,
            pool: None,
        }
    }
}

impl ExecConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unset keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup(ENV_QUEUE_DEPTH) {
            config.queue_depth = val
                .trim()
                .parse()
                .with_context(|| format!("{}={:?} is not a count", ENV_QUEUE_DEPTH, val))?;
        }
        if let Some(val) = lookup(ENV_SYNC_LAUNCHES) {
            config.sync_launches = parse_flag(&val)
                .ok_or_else(|| anyhow!("{}={:?} is not a boolean", ENV_SYNC_LAUNCHES, val))?;
        }
        if let Some(val) = lookup(ENV_POOL_SLABS) {
            let slab_sizes = val
                .split(',')
                .filter(|part| !part.trim().is_empty())
                .map(|part| {
                    parse_byte_size(part)
                        .with_context(|| format!("bad slab size in {}={:?}", ENV_POOL_SLABS, val))
                })
                .collect::<Result<Vec<_>>>()?;
            config.pool = Some(PoolConfig {
                slab_sizes,
                max_slabs_per_class: DEFAULT_MAX_SLABS,
            });
        }
        if let Some(val) = lookup(ENV_POOL_MAX_SLABS) {
            let max: usize = val
                .trim()
                .parse()
                .with_context(|| format!("{}={:?} is not a count", ENV_POOL_MAX_SLABS, val))?;
            if let Some(pool) = config.pool.as_mut() {
                pool.max_slabs_per_class = max;
            }
        }
        Ok(config)
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Parse a byte size: plain integer or `K`/`KB`, `M`/`MB`, `G`/`GB`
/// suffix (case-insensitive).
pub fn parse_byte_size(s: &str) -> Result<usize> {
    let s = s.trim();
    let upper = s.to_ascii_uppercase();
    let (digits, multiplier) = if let Some(n) = upper.strip_suffix("GB").or_else(|| upper.strip_suffix('G')) {
        (n, 1usize << 30)
    } else if let Some(n) = upper.strip_suffix("MB").or_else(|| upper.strip_suffix('M')) {
        (n, 1 << 20)
    } else if let Some(n) = upper.strip_suffix("KB").or_else(|| upper.strip_suffix('K')) {
        (n, 1 << 10)
    } else {
        (upper.as_str(), 1)
    };
    let n: usize = digits
        .trim()
        .parse()
        .with_context(|| format!("invalid byte size {:?}", s))?;
    n.checked_mul(multiplier)
        .ok_or_else(|| anyhow!("byte size {:?} overflows", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_parse_byte_size() {
        assert_eq!(parse_byte_size("1024").unwrap(), 1024);
        assert_eq!(parse_byte_size("10K").unwrap(), 10 * 1024);
        assert_eq!(parse_byte_size("10kb").unwrap(), 10 * 1024);
        assert_eq!(parse_byte_size("5M").unwrap(), 5 * 1024 * 1024);
        assert_eq!(parse_byte_size("2GB").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_byte_size(" 100 ").unwrap(), 100);
        assert!(parse_byte_size("abc").is_err());
        assert!(parse_byte_size("").is_err());
    }

    #[test]
    fn defaults_without_env() {
        let config = ExecConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ExecConfig::default());
        assert_eq!(config.queue_depth, DEFAULT_QUEUE_DEPTH);
        assert!(!config.sync_launches);
        assert!(config.pool.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = ExecConfig::from_lookup(lookup(&[
            (ENV_QUEUE_DEPTH, "8"),
            (ENV_SYNC_LAUNCHES, "true"),
            (ENV_POOL_SLABS, "64K, 1M,"),
            (ENV_POOL_MAX_SLABS, "4"),
        ]))
        .unwrap();
        assert_eq!(config.queue_depth, 8);
        assert!(config.sync_launches);
        assert_eq!(
            config.pool,
            Some(PoolConfig {
                slab_sizes: vec![64 * 1024, 1024 * 1024],
                max_slabs_per_class: 4,
            })
        );
    }

    #[test]
    fn malformed_values_are_errors() {
        assert!(ExecConfig::from_lookup(lookup(&[(ENV_QUEUE_DEPTH, "deep")])).is_err());
        assert!(ExecConfig::from_lookup(lookup(&[(ENV_SYNC_LAUNCHES, "maybe")])).is_err());
        assert!(ExecConfig::from_lookup(lookup(&[(ENV_POOL_SLABS, "1X")])).is_err());
    }
}
