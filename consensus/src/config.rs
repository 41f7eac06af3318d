//! # Consensus Parameters & Engine Configuration
//!
//! Every tunable for the sampling protocol and the engine runtime lives
//! here. The protocol parameters are consensus-critical: all replicas in
//! a network must run the same `Parameters` or they will disagree about
//! when blocks finalize. The engine knobs are local-only.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Protocol Parameters
// ---------------------------------------------------------------------------

/// Parameters of the repeated-sampling protocol.
///
/// Each poll samples `k` peers. A block that gathers at least
/// `alpha_preference` of those votes can become the replica's preference;
/// at least `alpha_confidence` votes advance its confidence counter; and
/// `beta` consecutive confidence-meeting rounds finalize it.
///
/// These values are set at network genesis and must not change without a
/// coordinated upgrade — replicas with mismatched parameters finalize at
/// different times and will split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameters {
    /// Number of peers sampled per poll round.
    pub k: u32,
    /// Votes required for a block to become (or stay) the preference.
    /// Must lie in `[ceil(k/2), k]`.
    pub alpha_preference: u32,
    /// Votes required in a round to advance a block's confidence counter.
    /// Must lie in `[alpha_preference, k]`.
    pub alpha_confidence: u32,
    /// Consecutive confidence-meeting rounds required for finality.
    pub beta: u32,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            k: 20,
            alpha_preference: 15,
            alpha_confidence: 15,
            beta: 20,
        }
    }
}

impl Parameters {
    /// Validates the parameter ranges.
    ///
    /// Called by the engine at construction; library users driving the
    /// voting core directly should call it themselves.
    pub fn validate(&self) -> Result<(), ParameterError> {
        if self.k < 1 {
            return Err(ParameterError::SampleSize { k: self.k });
        }
        // ceil(k/2) without floats.
        let half = (self.k + 1) / 2;
        if self.alpha_preference < half || self.alpha_preference > self.k {
            return Err(ParameterError::AlphaPreference {
                alpha: self.alpha_preference,
                min: half,
                k: self.k,
            });
        }
        if self.alpha_confidence < self.alpha_preference || self.alpha_confidence > self.k {
            return Err(ParameterError::AlphaConfidence {
                alpha: self.alpha_confidence,
                min: self.alpha_preference,
                k: self.k,
            });
        }
        if self.beta < 1 {
            return Err(ParameterError::Beta { beta: self.beta });
        }
        Ok(())
    }
}

/// Parameter range violations, reported at construction time.
#[derive(Debug, thiserror::Error)]
pub enum ParameterError {
    /// `k` must be at least 1.
    #[error("sample size k must be >= 1, got {k}")]
    SampleSize {
        /// The offending sample size.
        k: u32,
    },
    /// `alpha_preference` outside `[ceil(k/2), k]`.
    #[error("alpha_preference {alpha} outside [{min}, {k}]")]
    AlphaPreference {
        /// The offending value.
        alpha: u32,
        /// Minimum allowed value, `ceil(k/2)`.
        min: u32,
        /// Sample size upper bound.
        k: u32,
    },
    /// `alpha_confidence` outside `[alpha_preference, k]`.
    #[error("alpha_confidence {alpha} outside [{min}, {k}]")]
    AlphaConfidence {
        /// The offending value.
        alpha: u32,
        /// Minimum allowed value, `alpha_preference`.
        min: u32,
        /// Sample size upper bound.
        k: u32,
    },
    /// `beta` must be at least 1.
    #[error("beta must be >= 1, got {beta}")]
    Beta {
        /// The offending value.
        beta: u32,
    },
}

// ---------------------------------------------------------------------------
// Engine Configuration
// ---------------------------------------------------------------------------

/// Runtime knobs for the transitive engine.
///
/// Unlike [`Parameters`], these are local tuning: two replicas with
/// different engine configs still agree on finality, they just differ in
/// latency and buffering behavior.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Protocol parameters shared by the whole network.
    pub params: Parameters,

    /// How often the background sweep examines the pending-block map.
    /// Lower values reduce decision-to-callback latency at the cost of
    /// lock churn.
    pub poll_interval: Duration,

    /// Capacity of the bounded incoming-vote channel. Votes arriving
    /// while the channel is full are dropped, never queued unboundedly.
    pub vote_buffer: usize,

    /// Maximum number of undecided blocks tracked in the pending map.
    /// Blocks past this bound are refused admission until earlier ones
    /// decide.
    pub max_pending_blocks: usize,

    /// Label for this replica in log lines and self-votes.
    pub node_label: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            params: Parameters::default(),
            poll_interval: Duration::from_millis(50),
            vote_buffer: 1_000,
            max_pending_blocks: 1_024,
            node_label: "local".to_string(),
        }
    }
}

impl EngineConfig {
    /// Validates the configuration, including the embedded parameters.
    pub fn validate(&self) -> Result<(), ParameterError> {
        self.params.validate()
    }
}
