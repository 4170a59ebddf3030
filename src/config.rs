use std::{num::NonZeroUsize, time::Duration};

use serde::Deserialize;

use crate::stream::{TerminalPolicy, DEFAULT_COMPLETED_EVENTS};

pub const DEFAULT_BASE_URL: &str = "http://localhost:4004";

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    base_url: Option<String>,
    cache_capacity: Option<usize>,
    request_timeout_ms: Option<u64>,
    completed_events: Option<Vec<String>>,
    bus_capacity: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DetailConfig {
    pub base_url: String,
    pub cache_capacity: NonZeroUsize,
    pub request_timeout: Duration,
    pub terminal_policy: TerminalPolicy,
    pub bus_capacity: usize,
}

impl Default for DetailConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            cache_capacity: crate::store::DEFAULT_CACHE_CAPACITY,
            request_timeout: Duration::from_secs(10),
            terminal_policy: TerminalPolicy::default(),
            bus_capacity: 64,
        }
    }
}

pub fn parse_config(src: &str) -> Result<DetailConfig, String> {
    let raw = if src.trim().is_empty() {
        RawConfig::default()
    } else {
        serde_yaml::from_str::<RawConfig>(src).map_err(|e| e.to_string())?
    };
    let defaults = DetailConfig::default();

    let base_url = raw.base_url.unwrap_or(defaults.base_url);
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(format!("base_url must be an http(s) URL: `{}`", base_url));
    }

    let cache_capacity = match raw.cache_capacity {
        Some(capacity) => NonZeroUsize::new(capacity)
            .ok_or_else(|| "cache_capacity must be at least 1".to_string())?,
        None => defaults.cache_capacity,
    };

    let bus_capacity = raw.bus_capacity.unwrap_or(defaults.bus_capacity);
    if bus_capacity == 0 {
        return Err("bus_capacity must be at least 1".to_string());
    }

    Ok(DetailConfig {
        base_url,
        cache_capacity,
        request_timeout: raw
            .request_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.request_timeout),
        terminal_policy: TerminalPolicy {
            completed_events: raw.completed_events.unwrap_or_else(|| {
                DEFAULT_COMPLETED_EVENTS
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            }),
        },
        bus_capacity,
    })
}
