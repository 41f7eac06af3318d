//! # In-Memory Block Tree
//!
//! The forest of candidate blocks a replica is currently deciding on.
//! Blocks are keyed by id and linked through `parent_id`; the tree tracks
//! which ids are tips (no children yet), which block is the deepest
//! accepted one, and the processing/decided status of every entry.
//!
//! The tree is a passive container: it enforces structural rules
//! (duplicate ids, unknown parents, terminal statuses) but contains no
//! voting logic. Child links are derived by scanning the insertion-order
//! list rather than kept as a separate index — the working set is small
//! (undecided blocks only) and the scan keeps iteration order
//! deterministic, which the rejection cascade relies on.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::types::{BlockInfo, Id, Status};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Structural violations reported by tree mutations.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// A block with this id is already present.
    #[error("duplicate block {0}")]
    DuplicateBlock(Id),
    /// The block's parent is not in the tree and is neither genesis nor
    /// the last-accepted block.
    #[error("unknown parent {parent} for block {block}")]
    UnknownParent {
        /// The block being inserted.
        block: Id,
        /// Its missing parent.
        parent: Id,
    },
    /// A status transition was attempted on a block that is not
    /// Processing. Accepted and Rejected are terminal.
    #[error("block {id} is {status:?}, not Processing")]
    NotProcessing {
        /// The block whose transition was refused.
        id: Id,
        /// Its current status.
        status: Status,
    },
}

// ---------------------------------------------------------------------------
// Tree Node
// ---------------------------------------------------------------------------

/// A block entry together with its consensus status.
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// The block's engine-visible attributes.
    pub info: BlockInfo,
    /// Current consensus status.
    pub status: Status,
}

// ---------------------------------------------------------------------------
// Block Tree
// ---------------------------------------------------------------------------

/// The in-memory forest of blocks under consideration.
#[derive(Debug)]
pub struct BlockTree {
    /// All known blocks, decided and undecided.
    blocks: HashMap<Id, TreeNode>,
    /// Ids in insertion order. Drives deterministic iteration.
    order: Vec<Id>,
    /// Ids that appear as no block's parent.
    tips: HashSet<Id>,
    /// Id of the genesis block.
    genesis_id: Id,
    /// Deepest accepted block. Equals the finalized tip of the chain.
    last_accepted: Id,
    /// Height of `last_accepted`.
    last_accepted_height: u64,
}

impl BlockTree {
    /// Creates a tree holding a single accepted genesis block with the
    /// given id, the empty sentinel parent, and height zero.
    pub fn new(genesis_id: Id) -> Self {
        let genesis = TreeNode {
            info: BlockInfo {
                id: genesis_id,
                parent_id: Id::EMPTY,
                height: 0,
                timestamp_ms: 0,
                bytes: Default::default(),
            },
            status: Status::Accepted,
        };

        let mut blocks = HashMap::new();
        blocks.insert(genesis_id, genesis);
        let mut tips = HashSet::new();
        tips.insert(genesis_id);

        Self {
            blocks,
            order: vec![genesis_id],
            tips,
            genesis_id,
            last_accepted: genesis_id,
            last_accepted_height: 0,
        }
    }

    /// Inserts a block as Processing and updates the tip set.
    pub fn add(&mut self, info: BlockInfo) -> Result<(), TreeError> {
        if self.blocks.contains_key(&info.id) {
            return Err(TreeError::DuplicateBlock(info.id));
        }
        if !self.blocks.contains_key(&info.parent_id)
            && info.parent_id != self.genesis_id
            && info.parent_id != self.last_accepted
        {
            return Err(TreeError::UnknownParent {
                block: info.id,
                parent: info.parent_id,
            });
        }

        trace!(block = %info.id.short(), parent = %info.parent_id.short(), height = info.height, "tree insert");

        self.tips.remove(&info.parent_id);
        self.tips.insert(info.id);
        self.order.push(info.id);
        self.blocks.insert(
            info.id,
            TreeNode {
                info,
                status: Status::Processing,
            },
        );
        Ok(())
    }

    /// Looks up a block entry.
    pub fn get(&self, id: &Id) -> Option<&TreeNode> {
        self.blocks.get(id)
    }

    /// Status of a block; `Unknown` for ids not in the tree.
    pub fn status(&self, id: &Id) -> Status {
        self.blocks.get(id).map_or(Status::Unknown, |n| n.status)
    }

    /// True if the id is present.
    pub fn contains(&self, id: &Id) -> bool {
        self.blocks.contains_key(id)
    }

    /// Parent id of a block, if the block is known.
    pub fn parent_of(&self, id: &Id) -> Option<Id> {
        self.blocks.get(id).map(|n| n.info.parent_id)
    }

    /// Height of a block, if the block is known.
    pub fn height_of(&self, id: &Id) -> Option<u64> {
        self.blocks.get(id).map(|n| n.info.height)
    }

    /// Transitions a Processing block to Accepted and advances the
    /// finalized tip when the block is deeper than the current one.
    pub fn mark_accepted(&mut self, id: &Id) -> Result<(), TreeError> {
        let node = self.blocks.get_mut(id).ok_or(TreeError::NotProcessing {
            id: *id,
            status: Status::Unknown,
        })?;
        if node.status != Status::Processing {
            return Err(TreeError::NotProcessing {
                id: *id,
                status: node.status,
            });
        }
        node.status = Status::Accepted;
        if node.info.height > self.last_accepted_height {
            self.last_accepted = *id;
            self.last_accepted_height = node.info.height;
        }
        Ok(())
    }

    /// Transitions a Processing block to Rejected.
    pub fn mark_rejected(&mut self, id: &Id) -> Result<(), TreeError> {
        let node = self.blocks.get_mut(id).ok_or(TreeError::NotProcessing {
            id: *id,
            status: Status::Unknown,
        })?;
        if node.status != Status::Processing {
            return Err(TreeError::NotProcessing {
                id: *id,
                status: node.status,
            });
        }
        node.status = Status::Rejected;
        Ok(())
    }

    /// Children of a block, in insertion order.
    pub fn children(&self, id: &Id) -> Vec<Id> {
        self.order
            .iter()
            .filter(|candidate| {
                self.blocks
                    .get(*candidate)
                    .is_some_and(|n| n.info.parent_id == *id)
            })
            .copied()
            .collect()
    }

    /// All Processing ids, in insertion order.
    pub fn processing_ids(&self) -> Vec<Id> {
        self.order
            .iter()
            .filter(|id| self.status(id) == Status::Processing)
            .copied()
            .collect()
    }

    /// Number of Processing blocks.
    pub fn num_processing(&self) -> usize {
        self.blocks
            .values()
            .filter(|n| n.status == Status::Processing)
            .count()
    }

    /// Processing ancestors of `id` (exclusive), nearest first, stopping
    /// at the last-accepted block or the first gap in the parent chain.
    pub fn processing_ancestors(&self, id: &Id) -> Vec<Id> {
        let mut out = Vec::new();
        let mut cursor = match self.parent_of(id) {
            Some(parent) => parent,
            None => return out,
        };
        while cursor != self.last_accepted && !cursor.is_empty() {
            match self.blocks.get(&cursor) {
                Some(node) if node.status == Status::Processing => {
                    out.push(cursor);
                    cursor = node.info.parent_id;
                }
                _ => break,
            }
        }
        out
    }

    /// True if `ancestor` equals `descendant` or lies on its parent chain.
    pub fn is_linked(&self, ancestor: &Id, descendant: &Id) -> bool {
        let mut cursor = *descendant;
        loop {
            if cursor == *ancestor {
                return true;
            }
            match self.parent_of(&cursor) {
                Some(parent) if !parent.is_empty() => cursor = parent,
                _ => return false,
            }
        }
    }

    /// Pre-order depth-first descendants of `id` (exclusive).
    pub fn descendants(&self, id: &Id) -> Vec<Id> {
        let mut out = Vec::new();
        let mut stack = self.children(id);
        stack.reverse();
        while let Some(next) = stack.pop() {
            out.push(next);
            let mut kids = self.children(&next);
            kids.reverse();
            stack.append(&mut kids);
        }
        out
    }

    /// Current tip set: ids no block claims as parent.
    pub fn tips(&self) -> &HashSet<Id> {
        &self.tips
    }

    /// The genesis id this tree was initialized with.
    pub fn genesis(&self) -> Id {
        self.genesis_id
    }

    /// Deepest accepted block.
    pub fn last_accepted(&self) -> Id {
        self.last_accepted
    }

    /// Height of the deepest accepted block.
    pub fn last_accepted_height(&self) -> u64 {
        self.last_accepted_height
    }

    /// The finalized tip of the chain. For a linear chain this is always
    /// the deepest accepted block.
    pub fn finalized_tip(&self) -> Id {
        self.last_accepted
    }

    /// Re-points the tree at an externally decided head.
    ///
    /// Processing entries at or below the synced height are dropped
    /// outright (the import decided their fate out-of-band); entries
    /// strictly above stay, since they may still extend the new head.
    /// Returns the ids that were dropped.
    pub fn sync_to(&mut self, head: Id, height: u64) -> Vec<Id> {
        let stale: Vec<Id> = self
            .order
            .iter()
            .filter(|id| {
                **id != head
                    && self
                        .blocks
                        .get(*id)
                        .is_some_and(|n| n.status == Status::Processing && n.info.height <= height)
            })
            .copied()
            .collect();
        for id in &stale {
            self.blocks.remove(id);
            self.tips.remove(id);
        }
        let blocks = &self.blocks;
        self.order.retain(|id| blocks.contains_key(id));

        match self.blocks.get_mut(&head) {
            Some(node) => {
                node.status = Status::Accepted;
            }
            None => {
                self.blocks.insert(
                    head,
                    TreeNode {
                        info: BlockInfo {
                            id: head,
                            parent_id: Id::EMPTY,
                            height,
                            timestamp_ms: 0,
                            bytes: Default::default(),
                        },
                        status: Status::Accepted,
                    },
                );
                self.order.push(head);
                self.tips.insert(head);
            }
        }

        self.last_accepted = head;
        self.last_accepted_height = height;
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> Id {
        Id::new([byte; 32])
    }

    fn info(block: Id, parent: Id, height: u64) -> BlockInfo {
        BlockInfo {
            id: block,
            parent_id: parent,
            height,
            timestamp_ms: 0,
            bytes: Default::default(),
        }
    }

    fn tree() -> BlockTree {
        BlockTree::new(id(1))
    }

    #[test]
    fn genesis_initialized_accepted() {
        let t = BlockTree::new(id(1));
        assert_eq!(t.status(&id(1)), Status::Accepted);
        assert_eq!(t.last_accepted(), id(1));
        assert_eq!(t.finalized_tip(), id(1));
        assert_eq!(t.last_accepted_height(), 0);
        assert!(t.tips().contains(&id(1)));
    }

    #[test]
    fn add_updates_tips() {
        let mut t = BlockTree::new(id(1));
        t.add(info(id(2), id(1), 1)).unwrap();
        assert!(!t.tips().contains(&id(1)));
        assert!(t.tips().contains(&id(2)));

        // A sibling makes two tips.
        t.add(info(id(3), id(1), 1)).unwrap();
        assert!(t.tips().contains(&id(2)));
        assert!(t.tips().contains(&id(3)));
        assert_eq!(t.tips().len(), 2);
    }

    #[test]
    fn duplicate_insert_rejected() {
        let mut t = BlockTree::new(id(1));
        t.add(info(id(2), id(1), 1)).unwrap();
        let err = t.add(info(id(2), id(1), 1)).unwrap_err();
        assert!(matches!(err, TreeError::DuplicateBlock(b) if b == id(2)));
    }

    #[test]
    fn unknown_parent_rejected() {
        let mut t = BlockTree::new(id(1));
        let err = t.add(info(id(3), id(9), 1)).unwrap_err();
        assert!(matches!(err, TreeError::UnknownParent { .. }));
    }

    #[test]
    fn status_transitions_are_terminal() {
        let mut t = BlockTree::new(id(1));
        t.add(info(id(2), id(1), 1)).unwrap();
        t.mark_accepted(&id(2)).unwrap();
        assert_eq!(t.status(&id(2)), Status::Accepted);

        assert!(t.mark_rejected(&id(2)).is_err());
        assert!(t.mark_accepted(&id(2)).is_err());
    }

    #[test]
    fn accept_advances_finalized_tip() {
        let mut t = BlockTree::new(id(1));
        t.add(info(id(2), id(1), 1)).unwrap();
        t.add(info(id(3), id(2), 2)).unwrap();

        t.mark_accepted(&id(2)).unwrap();
        assert_eq!(t.last_accepted(), id(2));
        assert_eq!(t.last_accepted_height(), 1);

        t.mark_accepted(&id(3)).unwrap();
        assert_eq!(t.last_accepted(), id(3));
        assert_eq!(t.last_accepted_height(), 2);
    }

    #[test]
    fn children_in_insertion_order() {
        let mut t = BlockTree::new(id(1));
        t.add(info(id(4), id(1), 1)).unwrap();
        t.add(info(id(2), id(1), 1)).unwrap();
        t.add(info(id(3), id(1), 1)).unwrap();
        assert_eq!(t.children(&id(1)), vec![id(4), id(2), id(3)]);
    }

    #[test]
    fn processing_ancestors_walk() {
        let mut t = BlockTree::new(id(1));
        t.add(info(id(2), id(1), 1)).unwrap();
        t.add(info(id(3), id(2), 2)).unwrap();
        t.add(info(id(4), id(3), 3)).unwrap();

        assert_eq!(t.processing_ancestors(&id(4)), vec![id(3), id(2)]);
        assert_eq!(t.processing_ancestors(&id(2)), Vec::<Id>::new());
    }

    #[test]
    fn is_linked_follows_parent_chain() {
        let mut t = BlockTree::new(id(1));
        t.add(info(id(2), id(1), 1)).unwrap();
        t.add(info(id(3), id(2), 2)).unwrap();
        t.add(info(id(9), id(1), 1)).unwrap();

        assert!(t.is_linked(&id(1), &id(3)));
        assert!(t.is_linked(&id(2), &id(3)));
        assert!(t.is_linked(&id(3), &id(3)));
        assert!(!t.is_linked(&id(9), &id(3)));
        assert!(!t.is_linked(&id(3), &id(2)));
    }

    #[test]
    fn descendants_depth_first() {
        let mut t = BlockTree::new(id(1));
        t.add(info(id(2), id(1), 1)).unwrap();
        t.add(info(id(3), id(2), 2)).unwrap();
        t.add(info(id(4), id(2), 2)).unwrap();
        t.add(info(id(5), id(3), 3)).unwrap();

        // Pre-order: 2, then 3 and its subtree, then 4.
        assert_eq!(t.descendants(&id(1)), vec![id(2), id(3), id(5), id(4)]);
    }

    #[test]
    fn sync_to_known_block() {
        let mut t = BlockTree::new(id(1));
        t.add(info(id(2), id(1), 1)).unwrap();
        t.add(info(id(3), id(1), 1)).unwrap();
        t.add(info(id(4), id(2), 2)).unwrap();

        // Sync to block 2: its sibling at height 1 is dropped, the
        // height-2 block survives.
        let dropped = t.sync_to(id(2), 1);
        assert_eq!(dropped, vec![id(3)]);
        assert_eq!(t.status(&id(2)), Status::Accepted);
        assert_eq!(t.status(&id(3)), Status::Unknown);
        assert_eq!(t.status(&id(4)), Status::Processing);
        assert_eq!(t.last_accepted(), id(2));
    }

    #[test]
    fn sync_to_foreign_head_inserts_entry() {
        let mut t = BlockTree::new(id(1));
        let dropped = t.sync_to(id(7), 1_000);
        assert!(dropped.is_empty());
        assert_eq!(t.status(&id(7)), Status::Accepted);
        assert_eq!(t.last_accepted(), id(7));
        assert_eq!(t.last_accepted_height(), 1_000);

        // New blocks can now attach to the synced head.
        t.add(info(id(8), id(7), 1_001)).unwrap();
        assert_eq!(t.status(&id(8)), Status::Processing);
    }

    #[test]
    fn tip_set_matches_parentless_definition() {
        let mut t = tree();
        let g = t.genesis();
        t.add(info(id(2), g, 1)).unwrap();
        t.add(info(id(3), id(2), 2)).unwrap();
        t.add(info(id(4), id(2), 2)).unwrap();

        // Tips are exactly the ids no block names as parent.
        assert_eq!(t.tips().len(), 2);
        assert!(t.tips().contains(&id(3)));
        assert!(t.tips().contains(&id(4)));
    }
}
