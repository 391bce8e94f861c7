//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! section has defaults, so a partial file (or none of a section) works.
//! Secrets (the execution API key) are referenced by env-var name in the
//! config and resolved at runtime.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

use crate::engine::cycle::{CycleConfig, LaunchMode};
use crate::engine::economy::EconomyParams;
use crate::engine::executor::RetryPolicy;
use crate::engine::lifecycle::LifecycleConfig;
use crate::storage::DEFAULT_STATE_FILE;
use crate::strategy::bandit::DEFAULT_EXPLORATION_C;
use crate::strategy::risk::RiskConfig;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub economy: EconomyParams,
    pub policy: PolicyConfig,
    pub risk: RiskConfig,
    pub lifecycle: LifecycleConfig,
    pub execution: ExecutionConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub cycle_interval_secs: u64,
    pub state_path: String,
    /// JSON file the cognition service writes its verdict to.
    pub signal_path: String,
    pub initial_seer: f64,
    /// Initial SEER price in MON, until the oracle reports one.
    pub initial_seer_price: f64,
    pub seer_token: String,
    /// Use offline collaborators instead of the execution service.
    pub dry_run: bool,
    pub launch_mode: LaunchMode,
    pub max_events: usize,
    /// Fixes the outcome simulator's RNG.
    pub seed: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "MemeSeer".to_string(),
            cycle_interval_secs: 300,
            state_path: DEFAULT_STATE_FILE.to_string(),
            signal_path: "signals.json".to_string(),
            initial_seer: 1000.0,
            initial_seer_price: 1.0,
            seer_token: "SEER".to_string(),
            dry_run: true,
            launch_mode: LaunchMode::Simulated,
            max_events: 500,
            seed: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PolicyConfig {
    /// UCB exploration constant.
    pub exploration_c: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            exploration_c: DEFAULT_EXPLORATION_C,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExecutionConfig {
    pub base_url: String,
    pub api_key_env: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787".to_string(),
            api_key_env: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl ExecutionConfig {
    /// Resolve the API key, if one is configured and set.
    pub fn api_key(&self) -> Option<SecretString> {
        self.api_key_env
            .as_deref()
            .and_then(|env| AppConfig::resolve_env(env).ok())
            .filter(|k| !k.is_empty())
            .map(SecretString::new)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the agent misbehave silently.
    pub fn validate(&self) -> Result<()> {
        if self.agent.cycle_interval_secs == 0 {
            anyhow::bail!("agent.cycle_interval_secs must be positive");
        }
        if self.economy.mon_per_launch <= 0.0 {
            anyhow::bail!("economy.mon_per_launch must be positive");
        }
        if !(0.0..=1.0).contains(&self.economy.treasury_pct_of_profit) {
            anyhow::bail!("economy.treasury_pct_of_profit must be within [0, 1]");
        }
        if self.policy.exploration_c < 0.0 || !self.policy.exploration_c.is_finite() {
            anyhow::bail!("policy.exploration_c must be a non-negative number");
        }
        if self.agent.initial_seer_price <= 0.0 || !self.agent.initial_seer_price.is_finite() {
            anyhow::bail!("agent.initial_seer_price must be positive");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Settings the cycle orchestrator needs.
    pub fn cycle_config(&self) -> CycleConfig {
        CycleConfig {
            agent_name: self.agent.name.clone(),
            seer_token: self.agent.seer_token.clone(),
            launch_mode: self.agent.launch_mode,
        }
    }
}
