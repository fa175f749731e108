//! Drives one environment with one policy over full episodes.

use crate::error::Result;
use crate::telemetry::{EpisodeAccumulator, SimulationRecord};
use oraas_env::{Environment, SimSettings};
use oraas_policy::{
    Action, GreedyScheduler, Observation, RandomScheduler, Scheduler,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The shipped baseline policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyKind {
    /// Widest-link greedy baseline.
    Greedy,
    /// Uniform random baseline.
    Random,
}

impl PolicyKind {
    /// Instantiates the policy. The random baseline derives its own seed
    /// stream so it never perturbs the environment's randomness.
    #[must_use]
    pub fn build(self, seed: u64) -> Box<dyn Scheduler + Send> {
        match self {
            Self::Greedy => Box::new(GreedyScheduler::new()),
            Self::Random => Box::new(RandomScheduler::new(seed ^ 0x9e37_79b9_7f4a_7c15)),
        }
    }

    /// CLI label of this policy.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Greedy => "greedy",
            Self::Random => "random",
        }
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s {
            "greedy" => Ok(Self::Greedy),
            "random" => Ok(Self::Random),
            other => Err(format!("unknown policy '{other}' (greedy|random)")),
        }
    }
}

/// Runs `num_ep_train` episodes of one environment under one policy and
/// averages their telemetry.
pub struct Runner {
    env: Environment,
    scheduler: Box<dyn Scheduler + Send>,
}

impl Runner {
    /// Builds the environment and policy for one simulation.
    ///
    /// # Errors
    ///
    /// Returns a configuration error before anything runs.
    pub fn new(settings: SimSettings, policy: PolicyKind) -> Result<Self> {
        let seed = settings.seed;
        let env = Environment::new(settings)?;
        Ok(Self {
            env,
            scheduler: policy.build(seed),
        })
    }

    /// Wraps an already-built environment and scheduler.
    #[must_use]
    pub fn with_scheduler(env: Environment, scheduler: Box<dyn Scheduler + Send>) -> Self {
        Self { env, scheduler }
    }

    /// Runs every configured episode and returns the averaged record.
    ///
    /// # Errors
    ///
    /// Propagates the first episode failure.
    pub fn run(&mut self) -> Result<SimulationRecord> {
        let episodes = self.env.settings().num_ep_train.max(1);
        let mut records = Vec::with_capacity(episodes);
        for episode in 0..episodes {
            let record = self.run_episode()?;
            tracing::info!(
                episode,
                drop_rate = record.drop_rate,
                mean_reward = record.mean_reward,
                "episode finished"
            );
            records.push(record);
        }
        Ok(SimulationRecord::mean_of(&records).unwrap_or_else(SimulationRecord::sentinel))
    }

    /// Runs one episode of `max_ep_length` environment steps.
    ///
    /// # Errors
    ///
    /// Propagates environment aborts (bookkeeping faults, starvation).
    pub fn run_episode(&mut self) -> Result<SimulationRecord> {
        let layout = self.env.layout();
        let mut observation = self.env.reset()?;
        let mut accumulator = EpisodeAccumulator::new();

        for _ in 0..self.env.settings().max_ep_length {
            let action = Observation::from_flat(&observation, &layout)?
                .map_or(Action::Drop, |decoded| self.scheduler.choose(&decoded));
            let outcome = self.env.step(action.encode())?;
            accumulator.record_reward(outcome.reward);
            if outcome.entered_new_slot {
                if let Some(snapshot) = self.env.last_slot() {
                    accumulator.record_slot(snapshot);
                }
            }
            observation = outcome.observation;
        }

        Ok(accumulator.finish())
    }
}

/// Convenience entry point: one simulation, one policy, one record.
///
/// # Errors
///
/// Propagates configuration and episode failures.
pub fn run_with_policy(settings: SimSettings, policy: PolicyKind) -> Result<SimulationRecord> {
    Runner::new(settings, policy)?.run()
}
