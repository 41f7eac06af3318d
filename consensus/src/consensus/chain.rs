//! # Voting Core
//!
//! The protocol heart: block admission, the repeated-sampling poll, and
//! the tree mutations that follow from decisions. One `ChainConsensus`
//! instance tracks one linear chain.
//!
//! ## How a poll works
//!
//! A poll is a [`Bag`] of votes: how many of the `k` sampled peers
//! preferred each block id. `record_poll` then:
//!
//! 1. Rolls votes up the tree — a vote for a block is a vote for every
//!    undecided ancestor on its chain.
//! 2. Picks the deepest block meeting the preference quorum and moves
//!    the replica's preference to it, resetting confidence on an
//!    abandoned branch.
//! 3. Advances the confidence counter of every block meeting the
//!    confidence quorum, and zeroes everyone else's.
//! 4. Finalizes blocks whose counters reached `beta`: ancestors first,
//!    then the block, then a depth-first rejection sweep over the
//!    siblings of everything newly accepted.
//!
//! ## Decision hooks
//!
//! Accept/reject callbacks fire *through* [`DecisionHooks`] before the
//! corresponding tree transition commits. If a hook fails, the poll
//! aborts with that error, the failing block is still Processing, and
//! everything already accepted stays accepted. The hooks are how the
//! engine layer delivers VM callbacks in causal order without a second
//! lock.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::Parameters;
use crate::consensus::bag::Bag;
use crate::consensus::confidence::Confidence;
use crate::consensus::tree::{BlockTree, TreeError};
use crate::types::{BlockInfo, Id, Status};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the voting core.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// A block with this id was already admitted.
    #[error("duplicate block {0}")]
    DuplicateBlock(Id),
    /// The block's parent is unknown to the tree.
    #[error("unknown parent {parent} for block {block}")]
    UnknownParent {
        /// The block that was refused.
        block: Id,
        /// Its missing parent.
        parent: Id,
    },
    /// The accept callback for a block failed. The block remains
    /// Processing; acceptances committed earlier in the same poll stand.
    #[error("accept callback failed for block {id}")]
    AcceptFailed {
        /// The block whose acceptance failed.
        id: Id,
        /// The underlying callback error.
        #[source]
        source: anyhow::Error,
    },
    /// The reject callback for a block failed mid-cascade.
    #[error("reject callback failed for block {id}")]
    RejectFailed {
        /// The block whose rejection failed.
        id: Id,
        /// The underlying callback error.
        #[source]
        source: anyhow::Error,
    },
    /// An internal tree invariant was violated.
    #[error(transparent)]
    Tree(#[from] TreeError),
}

// ---------------------------------------------------------------------------
// Decision Hooks
// ---------------------------------------------------------------------------

/// Observer invoked as the core commits decisions.
///
/// `accepted` runs for every finalized block in ascending height order;
/// `rejected` runs pre-order over each rejected subtree, so a parent's
/// rejection is always observed before its children's. A hook error
/// halts the current poll before the corresponding tree transition.
#[async_trait]
pub trait DecisionHooks: Send + Sync {
    /// Called immediately before a block is marked Accepted.
    async fn accepted(&self, id: Id, height: u64) -> anyhow::Result<()>;

    /// Called immediately before a block is marked Rejected.
    async fn rejected(&self, id: Id, height: u64) -> anyhow::Result<()>;
}

/// Hooks that observe nothing. For tests and for driving the core
/// without an attached VM.
pub struct NoopHooks;

#[async_trait]
impl DecisionHooks for NoopHooks {
    async fn accepted(&self, _id: Id, _height: u64) -> anyhow::Result<()> {
        Ok(())
    }

    async fn rejected(&self, _id: Id, _height: u64) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Poll Outcome
// ---------------------------------------------------------------------------

/// What a single `record_poll` call decided.
#[derive(Debug, Clone, Default)]
pub struct PollOutcome {
    /// Blocks accepted this poll, in commit (ascending height) order.
    pub accepted: Vec<Id>,
    /// Blocks rejected this poll, in commit order.
    pub rejected: Vec<Id>,
    /// The preference after the poll.
    pub preference: Id,
}

impl PollOutcome {
    /// True when the poll decided nothing.
    pub fn is_quiet(&self) -> bool {
        self.accepted.is_empty() && self.rejected.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Chain Consensus
// ---------------------------------------------------------------------------

/// Voting state for one linear chain.
#[derive(Debug)]
pub struct ChainConsensus {
    params: Parameters,
    tree: BlockTree,
    confidence: HashMap<Id, Confidence>,
    /// The replica's preferred undecided tip. Falls back to the
    /// finalized tip whenever it stops being a live Processing block.
    preference: Id,
}

impl ChainConsensus {
    /// Creates a core whose chain starts at an accepted genesis block
    /// with the given id.
    pub fn new(params: Parameters, genesis_id: Id) -> Self {
        Self {
            params,
            tree: BlockTree::new(genesis_id),
            confidence: HashMap::new(),
            preference: genesis_id,
        }
    }

    /// The protocol parameters this core runs with.
    pub fn params(&self) -> &Parameters {
        &self.params
    }

    // -- Admission ----------------------------------------------------------

    /// Admits a candidate block.
    ///
    /// Returns the status the block entered with: `Processing` normally,
    /// or `Rejected` when the block attaches to an already-rejected
    /// branch or to an accepted block the chain has moved past — such
    /// blocks are dead on arrival and never enter the processing set.
    pub fn add_block(&mut self, info: BlockInfo) -> Result<Status, ConsensusError> {
        if self.tree.contains(&info.id) {
            return Err(ConsensusError::DuplicateBlock(info.id));
        }

        let parent = info.parent_id;
        let parent_status = self.tree.status(&parent);
        if parent_status == Status::Unknown
            && parent != self.tree.genesis()
            && parent != self.tree.last_accepted()
        {
            return Err(ConsensusError::UnknownParent {
                block: info.id,
                parent,
            });
        }

        // A rejected parent, or an accepted parent the chain already
        // finalized past, condemns the block before it ever processes.
        let stillborn = parent_status == Status::Rejected
            || (parent_status == Status::Accepted && parent != self.tree.last_accepted());

        let id = info.id;
        let height = info.height;
        self.tree.add(info)?;

        if stillborn {
            self.tree.mark_rejected(&id)?;
            debug!(block = %id.short(), height, "block admitted onto a dead branch, rejected");
            return Ok(Status::Rejected);
        }

        self.confidence.insert(id, Confidence::new());

        // The new block becomes the preference when it extends the
        // current preference, or when nothing undecided is preferred
        // yet. Siblings at the same height never displace.
        let pref_height = self.tree.height_of(&self.preference).unwrap_or(0);
        if (parent == self.preference && height > pref_height)
            || self.preference == self.tree.last_accepted()
        {
            self.preference = id;
        }

        debug!(block = %id.short(), height, "block admitted");
        Ok(Status::Processing)
    }

    // -- Polling ------------------------------------------------------------

    /// Records one poll round and applies every decision that follows.
    ///
    /// `votes` maps block ids to how many of the `k` sampled peers
    /// preferred them; ids not in the tree are ignored. The sum of the
    /// counts must not exceed `k`.
    pub async fn record_poll(
        &mut self,
        votes: &Bag<Id>,
        hooks: &dyn DecisionHooks,
    ) -> Result<PollOutcome, ConsensusError> {
        let alpha_conf = u64::from(self.params.alpha_confidence);
        let beta = self.params.beta;

        // Step 1: transitive rollup. A vote for a block credits every
        // undecided ancestor on its chain; an ancestor shared by two
        // voted descendants receives the sum.
        let mut tally: Bag<Id> = Bag::new();
        tally.set_threshold(u64::from(self.params.alpha_preference));
        for (id, n) in votes.iter() {
            if n == 0 || self.tree.status(id) != Status::Processing {
                continue;
            }
            tally.add_count(*id, n);
            for ancestor in self.tree.processing_ancestors(id) {
                tally.add_count(ancestor, n);
            }
        }

        // Steps 2-3: find the deepest preference winner. Ties fall to
        // the larger vote count, then to first-seen order in the tally.
        let winners = tally.met_threshold();
        let mut best: Option<(Id, u64, u64)> = None;
        for id in &winners {
            let height = self.tree.height_of(id).unwrap_or(0);
            let count = tally.count(id);
            let better = match best {
                None => true,
                Some((_, best_height, best_count)) => {
                    height > best_height || (height == best_height && count > best_count)
                }
            };
            if better {
                best = Some((*id, height, count));
            }
        }

        let mut abandoned: Vec<Id> = Vec::new();
        if let Some((winner, _, _)) = best {
            let current = self.preference;
            let winner_is_ancestor = winner != current && self.tree.is_linked(&winner, &current);
            if winner != current && !winner_is_ancestor {
                let same_chain = self.tree.is_linked(&current, &winner);
                if !same_chain && self.tree.status(&current) == Status::Processing {
                    // Branch switch: every block on the old branch that
                    // is not an ancestor of the new preference loses its
                    // confidence streak (step 5, applied below).
                    abandoned = self
                        .branch_of(current)
                        .into_iter()
                        .filter(|id| !self.tree.is_linked(id, &winner))
                        .collect();
                    debug!(
                        from = %current.short(),
                        to = %winner.short(),
                        reset = abandoned.len(),
                        "preference switched branches"
                    );
                }
                self.preference = winner;
            }
        }

        // Step 4: confidence update for every undecided block.
        for id in self.tree.processing_ids() {
            let conf = self.confidence.entry(id).or_default();
            if tally.count(&id) >= alpha_conf {
                conf.record_success(beta);
            } else {
                conf.record_failure();
            }
        }

        // Step 5: branch-switch reset overrides anything the abandoned
        // branch gained this round.
        for id in &abandoned {
            if let Some(conf) = self.confidence.get_mut(id) {
                conf.record_failure();
            }
        }

        // Step 6: finality cascade. Candidates are walked shallow-first
        // so acceptances land in causal order.
        let mut candidates: Vec<Id> = self
            .tree
            .processing_ids()
            .into_iter()
            .filter(|id| {
                self.confidence
                    .get(id)
                    .is_some_and(|c| c.successes() >= beta)
            })
            .collect();
        candidates.sort_by_key(|id| self.tree.height_of(id).unwrap_or(0));

        let mut outcome = PollOutcome::default();
        for candidate in candidates {
            if self.tree.status(&candidate) != Status::Processing {
                // Decided by an earlier candidate's cascade.
                continue;
            }
            let mut chain = self.tree.processing_ancestors(&candidate);
            chain.reverse();
            chain.push(candidate);
            for id in chain {
                self.accept_one(id, hooks, &mut outcome).await?;
            }
        }

        if self.tree.status(&self.preference) != Status::Processing {
            self.preference = self.tree.last_accepted();
        }
        outcome.preference = self.preference();
        Ok(outcome)
    }

    /// Accepts a single block and rejects its undecided siblings.
    async fn accept_one(
        &mut self,
        id: Id,
        hooks: &dyn DecisionHooks,
        outcome: &mut PollOutcome,
    ) -> Result<(), ConsensusError> {
        let height = self.tree.height_of(&id).unwrap_or(0);
        hooks
            .accepted(id, height)
            .await
            .map_err(|source| ConsensusError::AcceptFailed { id, source })?;
        self.tree.mark_accepted(&id)?;
        self.confidence.remove(&id);
        outcome.accepted.push(id);
        info!(block = %id.short(), height, "block accepted");

        if let Some(parent) = self.tree.parent_of(&id) {
            for sibling in self.tree.children(&parent) {
                if sibling != id && self.tree.status(&sibling) == Status::Processing {
                    self.reject_cascade(sibling, hooks, outcome).await?;
                }
            }
        }
        Ok(())
    }

    /// Rejects a block and, depth-first, every descendant of it.
    async fn reject_cascade(
        &mut self,
        root: Id,
        hooks: &dyn DecisionHooks,
        outcome: &mut PollOutcome,
    ) -> Result<(), ConsensusError> {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if self.tree.status(&id) != Status::Processing {
                continue;
            }
            let height = self.tree.height_of(&id).unwrap_or(0);
            hooks
                .rejected(id, height)
                .await
                .map_err(|source| ConsensusError::RejectFailed { id, source })?;
            self.tree.mark_rejected(&id)?;
            self.confidence.remove(&id);
            outcome.rejected.push(id);
            debug!(block = %id.short(), height, "block rejected");

            let mut children = self.tree.children(&id);
            children.reverse();
            stack.append(&mut children);
        }
        Ok(())
    }

    /// The chain from the finalized tip up to `tip`, plus everything
    /// below `tip`: the blocks whose confidence a branch switch resets.
    fn branch_of(&self, tip: Id) -> Vec<Id> {
        let mut branch = self.tree.processing_ancestors(&tip);
        branch.reverse();
        branch.push(tip);
        branch.extend(self.tree.descendants(&tip));
        branch
    }

    // -- Queries ------------------------------------------------------------

    /// The replica's current preference: the preferred undecided tip if
    /// one exists, otherwise the finalized tip.
    ///
    /// The returned id always extends the finalized chain; it can never
    /// sit on a branch containing a rejected block.
    pub fn preference(&self) -> Id {
        if self.tree.status(&self.preference) == Status::Processing {
            self.preference
        } else {
            self.tree.finalized_tip()
        }
    }

    /// Status of a block; `Unknown` for ids never admitted.
    pub fn status(&self, id: &Id) -> Status {
        self.tree.status(id)
    }

    /// True if the block is known and accepted. False for unknown ids.
    pub fn is_accepted(&self, id: &Id) -> bool {
        self.tree.status(id) == Status::Accepted
    }

    /// True if the block is known and rejected. False for unknown ids.
    pub fn is_rejected(&self, id: &Id) -> bool {
        self.tree.status(id) == Status::Rejected
    }

    /// Deepest accepted block and its height.
    pub fn last_accepted(&self) -> (Id, u64) {
        (self.tree.last_accepted(), self.tree.last_accepted_height())
    }

    /// Number of undecided blocks.
    pub fn num_processing(&self) -> usize {
        self.tree.num_processing()
    }

    /// Confidence streak of a block; zero for unknown or decided ids.
    pub fn confidence_of(&self, id: &Id) -> u32 {
        self.confidence.get(id).map_or(0, |c| c.successes())
    }

    // -- Reconciliation -----------------------------------------------------

    /// Re-points the core at an externally decided head.
    ///
    /// Undecided entries at or below the synced height are dropped
    /// without callbacks (the import already decided their fate); the
    /// dropped ids are returned so the engine can purge its own records.
    pub fn sync_state(&mut self, head: Id, height: u64) -> Vec<Id> {
        let dropped = self.tree.sync_to(head, height);
        for id in &dropped {
            self.confidence.remove(id);
        }
        if self.tree.status(&self.preference) != Status::Processing {
            self.preference = head;
        }
        info!(head = %head.short(), height, dropped = dropped.len(), "consensus state synced");
        dropped
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
