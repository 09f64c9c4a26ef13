use std::{env, time::Duration};

use anyhow::{Context, Result};

const DEFAULT_DISPATCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_WATCH_INTERVAL_SECS: u64 = 3;
const DEFAULT_WATCH_BUDGET_SECS: u64 = 60;

/// Runtime policy for the analysis pipeline. Every timer here is a policy
/// constant, not a protocol requirement, so each one can be overridden from
/// the environment.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    /// Endpoint of the external analysis worker. When unset, dispatches take
    /// the degraded path instead of calling out.
    pub worker_url: Option<String>,
    /// Callback URL advertised to the worker for asynchronous delivery.
    pub callback_url: Option<String>,
    /// How long a dispatched submission may stay `processing` before the
    /// stuck-state check forces it out.
    pub dispatch_timeout: Duration,
    /// Cadence of the periodic sweep that catches submissions whose one-shot
    /// check was lost (e.g. across a restart).
    pub sweep_interval: Duration,
    /// Poll interval of the wait endpoint.
    pub watch_interval: Duration,
    /// Hard time budget of the wait endpoint.
    pub watch_budget: Duration,
}

impl AnalysisSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            worker_url: env::var("ANALYSIS_WORKER_URL").ok(),
            callback_url: env::var("ANALYSIS_CALLBACK_URL").ok(),
            dispatch_timeout: env_duration(
                "ANALYSIS_DISPATCH_TIMEOUT_SECS",
                DEFAULT_DISPATCH_TIMEOUT_SECS,
            )?,
            sweep_interval: env_duration(
                "ANALYSIS_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL_SECS,
            )?,
            watch_interval: env_duration(
                "ANALYSIS_WATCH_INTERVAL_SECS",
                DEFAULT_WATCH_INTERVAL_SECS,
            )?,
            watch_budget: env_duration("ANALYSIS_WATCH_BUDGET_SECS", DEFAULT_WATCH_BUDGET_SECS)?,
        })
    }
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            worker_url: None,
            callback_url: None,
            dispatch_timeout: Duration::from_secs(DEFAULT_DISPATCH_TIMEOUT_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            watch_interval: Duration::from_secs(DEFAULT_WATCH_INTERVAL_SECS),
            watch_budget: Duration::from_secs(DEFAULT_WATCH_BUDGET_SECS),
        }
    }
}

fn env_duration(name: &str, default_secs: u64) -> Result<Duration> {
    let secs = match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("{name} must be a whole number of seconds"))?,
        Err(_) => default_secs,
    };
    Ok(Duration::from_secs(secs))
}
