//! Forking block tree with bounded retention
//!
//! Nodes live in an arena keyed by block hash. A node names its parent by
//! hash (navigation only) and lists its children's hashes. Each node owns the
//! UTXO set as it stands after its block, so a block is always validated
//! against a clone of exactly its parent's state.
//!
//! Fork choice is by height, and the first block to reach a height keeps it.
//! Nodes more than `cutoff_age` heights below the tallest node can never be
//! extended again and are pruned.

use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ChainConfig, ConfigError};
use crate::consensus::Block;
use crate::crypto::Hash;
use crate::storage::{TransactionPool, UTXOKey, UTXOSet};
use crate::validation::{Transaction, TxError, TxHandler};

/// Reasons a block is refused. Chain state is unchanged in every case.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    #[error("Malformed block: coinbase claims inputs")]
    Malformed,
    #[error("Block has no parent hash")]
    MissingParent,
    #[error("Unknown parent block {0}")]
    UnknownParent(Hash),
    #[error("Block already in chain: {0}")]
    Duplicate(Hash),
    #[error("Parent at height {parent_height} is too far behind max height {max_height}")]
    Stale { parent_height: u64, max_height: u64 },
    #[error("Coinbase tagged with height {found}, block is at height {expected}")]
    CoinbaseHeight { expected: u64, found: u32 },
    #[error("Coinbase output would overwrite existing UTXO {0:?}")]
    CoinbaseCollision(UTXOKey),
    #[error("Invalid transaction at index {index}: {source}")]
    InvalidTransaction {
        index: usize,
        #[source]
        source: TxError,
    },
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Genesis block must not have a parent")]
    GenesisHasParent,
    #[error("Invalid genesis block: {0}")]
    InvalidGenesis(#[source] BlockError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug)]
struct BlockNode {
    block: Block,
    parent: Option<Hash>,
    children: Vec<Hash>,
    utxo_set: UTXOSet,
    height: u64,
}

#[derive(Debug)]
pub struct BlockChain {
    nodes: HashMap<Hash, BlockNode>,
    /// height -> hashes at that height, in arrival order
    heights: BTreeMap<u64, Vec<Hash>>,
    max_height_hash: Hash,
    max_height: u64,
    tx_pool: TransactionPool,
    config: ChainConfig,
}

impl BlockChain {
    /// Chain holding only `genesis`, with the default cutoff age
    pub fn new(genesis: Block) -> Result<Self, ChainError> {
        Self::with_config(genesis, ChainConfig::default())
    }

    pub fn with_config(genesis: Block, config: ChainConfig) -> Result<Self, ChainError> {
        config.validate()?;
        if !genesis.is_genesis() {
            return Err(ChainError::GenesisHasParent);
        }
        if !genesis.is_well_formed() {
            return Err(ChainError::InvalidGenesis(BlockError::Malformed));
        }

        let utxo_set =
            apply_block(UTXOSet::new(), &genesis, 1).map_err(ChainError::InvalidGenesis)?;
        let hash = genesis.hash();
        info!(hash = %hash.short(), utxos = utxo_set.len(), "genesis block loaded");

        let mut nodes = HashMap::new();
        nodes.insert(
            hash,
            BlockNode {
                block: genesis,
                parent: None,
                children: vec![],
                utxo_set,
                height: 1,
            },
        );

        Ok(Self {
            nodes,
            heights: BTreeMap::from([(1, vec![hash])]),
            max_height_hash: hash,
            max_height: 1,
            tx_pool: TransactionPool::new(),
            config,
        })
    }

    /// Admit `block` if it is valid, returning its height.
    ///
    /// The block must extend a known parent no more than `cutoff_age`
    /// heights below the current maximum, and every regular transaction
    /// must be valid against the parent's UTXO set as updated by the
    /// transactions before it. Admission is all or nothing.
    pub fn try_add_block(&mut self, block: &Block) -> Result<u64, BlockError> {
        if !block.is_well_formed() {
            return Err(BlockError::Malformed);
        }
        let prev_hash = block.prev_hash.ok_or(BlockError::MissingParent)?;
        let hash = block.hash();
        if self.nodes.contains_key(&hash) {
            return Err(BlockError::Duplicate(hash));
        }

        let parent = self
            .nodes
            .get(&prev_hash)
            .ok_or(BlockError::UnknownParent(prev_hash))?;
        // pruning normally removes such parents first; this backs it up
        if self.is_stale(parent.height) {
            return Err(BlockError::Stale {
                parent_height: parent.height,
                max_height: self.max_height,
            });
        }

        let height = parent.height + 1;
        let utxo_set = apply_block(parent.utxo_set.clone(), block, height)?;

        if let Some(parent) = self.nodes.get_mut(&prev_hash) {
            parent.children.push(hash);
        }
        self.nodes.insert(
            hash,
            BlockNode {
                block: block.clone(),
                parent: Some(prev_hash),
                children: vec![],
                utxo_set,
                height,
            },
        );
        self.heights.entry(height).or_default().push(hash);

        let included: Vec<Hash> = block.transactions.iter().map(Transaction::hash).collect();
        self.tx_pool.remove_all(&included);

        info!(
            hash = %hash.short(),
            parent = %prev_hash.short(),
            height,
            txs = block.transactions.len(),
            "block admitted"
        );

        if height > self.max_height {
            self.max_height = height;
            self.max_height_hash = hash;
            self.evict_conflicting(block);
            self.prune();
        }

        Ok(height)
    }

    /// True when a block on a parent at `parent_height` could never become canonical
    fn is_stale(&self, parent_height: u64) -> bool {
        parent_height + self.config.cutoff_age < self.max_height
    }

    /// Drop pooled transactions claiming an output the new tip block spent
    fn evict_conflicting(&mut self, block: &Block) {
        let spent: HashSet<UTXOKey> = block
            .transactions
            .iter()
            .flat_map(|tx| tx.inputs.iter().map(|input| input.utxo_key()))
            .collect();
        if spent.is_empty() {
            return;
        }

        let evicted = self
            .tx_pool
            .retain(|tx| tx.inputs.iter().all(|input| !spent.contains(&input.utxo_key())));
        if evicted > 0 {
            debug!(evicted, "evicted conflicting pending transactions");
        }
    }

    /// Boolean form of [`BlockChain::try_add_block`]
    pub fn add_block(&mut self, block: &Block) -> bool {
        match self.try_add_block(block) {
            Ok(_) => true,
            Err(err) => {
                debug!(hash = %block.hash().short(), %err, "block rejected");
                false
            }
        }
    }

    /// Drop every node below `max_height - cutoff_age`. A retained node
    /// whose parent is dropped becomes a root.
    fn prune(&mut self) {
        let floor = self.max_height.saturating_sub(self.config.cutoff_age);
        let retained = self.heights.split_off(&floor);
        let stale = std::mem::replace(&mut self.heights, retained);

        let mut pruned = 0usize;
        for hash in stale.into_values().flatten() {
            let Some(node) = self.nodes.remove(&hash) else {
                continue;
            };
            pruned += 1;
            for child in node.children {
                if let Some(child) = self.nodes.get_mut(&child) {
                    child.parent = None;
                }
            }
        }

        if pruned > 0 {
            debug!(pruned, floor, retained = self.nodes.len(), "pruned block nodes");
        }
    }

    pub fn get_max_height_block(&self) -> &Block {
        &self.max_node().block
    }

    /// Copy of the UTXO set at the tallest block, for building on top of it
    pub fn get_max_height_utxo_set(&self) -> UTXOSet {
        self.max_node().utxo_set.clone()
    }

    pub fn max_height(&self) -> u64 {
        self.max_height
    }

    pub fn get_transaction_pool(&self) -> &TransactionPool {
        &self.tx_pool
    }

    /// Add a transaction to the pending pool. Returns false for a repeat.
    pub fn add_transaction(&mut self, tx: Transaction) -> bool {
        self.tx_pool.add_transaction(tx)
    }

    pub fn contains_block(&self, hash: &Hash) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn get_block(&self, hash: &Hash) -> Option<&Block> {
        self.nodes.get(hash).map(|node| &node.block)
    }

    pub fn block_height(&self, hash: &Hash) -> Option<u64> {
        self.nodes.get(hash).map(|node| node.height)
    }

    /// Parent of a retained block, if the parent is itself retained
    pub fn parent_of(&self, hash: &Hash) -> Option<Hash> {
        self.nodes.get(hash).and_then(|node| node.parent)
    }

    pub fn children_of(&self, hash: &Hash) -> &[Hash] {
        self.nodes
            .get(hash)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    /// Copy of the UTXO set as it stands after block `hash`
    pub fn utxo_set_at(&self, hash: &Hash) -> Option<UTXOSet> {
        self.nodes.get(hash).map(|node| node.utxo_set.clone())
    }

    /// Number of retained block nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Lowest retained height
    pub fn min_height(&self) -> u64 {
        self.heights.keys().next().copied().unwrap_or(self.max_height)
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    fn max_node(&self) -> &BlockNode {
        &self.nodes[&self.max_height_hash]
    }
}

/// Validate and commit `block`'s regular transactions in order on top of
/// `utxo_set`, then mint its coinbase.
///
/// The coinbase must carry `height` and may not overwrite a live output.
/// Heights are unique along a branch, so a coinbase can never re-mint a key
/// that an ancestor created and a later transaction spent.
fn apply_block(utxo_set: UTXOSet, block: &Block, height: u64) -> Result<UTXOSet, BlockError> {
    if u64::from(block.coinbase.lock_time) != height {
        return Err(BlockError::CoinbaseHeight {
            expected: height,
            found: block.coinbase.lock_time,
        });
    }

    let mut handler = TxHandler::new(utxo_set);
    for (index, tx) in block.transactions.iter().enumerate() {
        handler
            .accept(tx)
            .map_err(|source| BlockError::InvalidTransaction { index, source })?;
    }

    let mut utxo_set = handler.into_utxo_set();
    if let Some(key) = block.coinbase.output_keys().find(|key| utxo_set.contains(key)) {
        return Err(BlockError::CoinbaseCollision(key));
    }
    utxo_set.apply_transaction(&block.coinbase);
    Ok(utxo_set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hash_bytes, PrivateKey, PublicKey};
    use crate::storage::UTXOKey;
    use crate::validation::{TxInput, TxOutput};

    fn key(label: &str) -> PrivateKey {
        PrivateKey::from_bytes(hash_bytes(label.as_bytes()).as_bytes()).unwrap()
    }

    fn miner() -> PublicKey {
        key("miner").public_key()
    }

    fn child_of(parent: &Block, height: u32, transactions: Vec<Transaction>) -> Block {
        sibling_of(parent, height, 25, transactions)
    }

    /// Same as `child_of` with a different reward, to tell siblings apart
    fn sibling_of(parent: &Block, height: u32, reward: i64, transactions: Vec<Transaction>) -> Block {
        Block::new(
            parent.hash(),
            Transaction::coinbase(height, reward, miner()),
            transactions,
        )
    }

    fn genesis_chain(cutoff_age: u64) -> (BlockChain, Block) {
        let genesis = Block::genesis(Transaction::coinbase(1, 10, key("alice").public_key()));
        let chain = BlockChain::with_config(genesis.clone(), ChainConfig { cutoff_age }).unwrap();
        (chain, genesis)
    }

    /// Alice spends the genesis output to `to`
    fn spend_genesis(genesis: &Block, to: PublicKey) -> Transaction {
        let mut tx = Transaction::new(
            vec![TxInput::new(genesis.coinbase.hash(), 0)],
            vec![TxOutput::new(10, to)],
        );
        tx.sign_input(0, &key("alice"));
        tx
    }

    #[test]
    fn test_genesis_initialization() {
        let (chain, genesis) = genesis_chain(10);
        assert_eq!(chain.max_height(), 1);
        assert_eq!(chain.get_max_height_block(), &genesis);
        assert_eq!(chain.get_max_height_utxo_set().len(), 1);
        assert!(chain.get_transaction_pool().is_empty());
    }

    #[test]
    fn test_genesis_with_parent_rejected() {
        let block = Block::new(hash_bytes(b"p"), Transaction::coinbase(1, 1, miner()), vec![]);
        assert!(matches!(
            BlockChain::new(block),
            Err(ChainError::GenesisHasParent)
        ));
    }

    #[test]
    fn test_admit_child_updates_max() {
        let (mut chain, genesis) = genesis_chain(10);
        let block = child_of(&genesis, 2, vec![spend_genesis(&genesis, key("bob").public_key())]);

        assert_eq!(chain.try_add_block(&block), Ok(2));
        assert_eq!(chain.get_max_height_block(), &block);
        assert_eq!(chain.parent_of(&block.hash()), Some(genesis.hash()));
        assert_eq!(chain.children_of(&genesis.hash()), &[block.hash()]);

        let utxos = chain.get_max_height_utxo_set();
        assert!(!utxos.contains(&UTXOKey::new(genesis.coinbase.hash(), 0)));
        assert_eq!(utxos.get_balance(&key("bob").public_key()), 10);
        assert_eq!(utxos.get_balance(&miner()), 25);

        // parent's snapshot is untouched
        let at_genesis = chain.utxo_set_at(&genesis.hash()).unwrap();
        assert!(at_genesis.contains(&UTXOKey::new(genesis.coinbase.hash(), 0)));
    }

    #[test]
    fn test_unknown_parent_and_missing_parent() {
        let (mut chain, _) = genesis_chain(10);
        let orphan = Block::new(hash_bytes(b"nowhere"), Transaction::coinbase(2, 1, miner()), vec![]);
        assert_eq!(
            chain.try_add_block(&orphan),
            Err(BlockError::UnknownParent(hash_bytes(b"nowhere")))
        );

        let second_genesis = Block::genesis(Transaction::coinbase(9, 1, miner()));
        assert_eq!(chain.try_add_block(&second_genesis), Err(BlockError::MissingParent));
        assert_eq!(chain.node_count(), 1);
    }

    #[test]
    fn test_duplicate_block_rejected() {
        let (mut chain, genesis) = genesis_chain(10);
        let block = child_of(&genesis, 2, vec![]);
        assert!(chain.add_block(&block));
        assert_eq!(chain.try_add_block(&block), Err(BlockError::Duplicate(block.hash())));
        assert_eq!(chain.children_of(&genesis.hash()).len(), 1);
    }

    #[test]
    fn test_block_is_all_or_nothing() {
        let (mut chain, genesis) = genesis_chain(10);
        let good = spend_genesis(&genesis, key("bob").public_key());
        let double = spend_genesis(&genesis, key("carol").public_key());
        let block = child_of(&genesis, 2, vec![good, double]);

        assert!(matches!(
            chain.try_add_block(&block),
            Err(BlockError::InvalidTransaction { index: 1, source: TxError::MissingInput(_) })
        ));
        assert_eq!(chain.node_count(), 1);
        assert_eq!(chain.max_height(), 1);
        assert!(chain
            .get_max_height_utxo_set()
            .contains(&UTXOKey::new(genesis.coinbase.hash(), 0)));
    }

    #[test]
    fn test_coinbase_not_spendable_within_its_own_block() {
        let (mut chain, genesis) = genesis_chain(10);
        let coinbase = Transaction::coinbase(2, 25, key("miner").public_key());
        let mut spend = Transaction::new(
            vec![TxInput::new(coinbase.hash(), 0)],
            vec![TxOutput::new(25, key("bob").public_key())],
        );
        spend.sign_input(0, &key("miner"));
        let block = Block::new(genesis.hash(), coinbase, vec![spend]);

        assert!(!chain.add_block(&block));
    }

    #[test]
    fn test_malformed_coinbase_rejected() {
        let (mut chain, genesis) = genesis_chain(10);
        let mut block = child_of(&genesis, 2, vec![]);
        block.coinbase.inputs.push(TxInput::new(genesis.coinbase.hash(), 0));
        assert_eq!(chain.try_add_block(&block), Err(BlockError::Malformed));
    }

    #[test]
    fn test_fork_first_seen_wins_tie() {
        let (mut chain, genesis) = genesis_chain(10);
        let first = sibling_of(&genesis, 2, 25, vec![]);
        let second = sibling_of(&genesis, 2, 26, vec![]);

        assert!(chain.add_block(&first));
        assert!(chain.add_block(&second));
        assert_eq!(chain.get_max_height_block(), &first);

        // the sibling branch overtakes once it is taller
        let third = child_of(&second, 3, vec![]);
        assert!(chain.add_block(&third));
        assert_eq!(chain.get_max_height_block(), &third);
        assert_eq!(chain.max_height(), 3);
    }

    #[test]
    fn test_forks_validate_against_their_own_parent() {
        let (mut chain, genesis) = genesis_chain(10);
        let bob = key("bob").public_key();
        let carol = key("carol").public_key();

        let to_bob = child_of(&genesis, 2, vec![spend_genesis(&genesis, bob)]);
        let to_carol = child_of(&genesis, 2, vec![spend_genesis(&genesis, carol)]);
        assert!(chain.add_block(&to_bob));
        assert!(chain.add_block(&to_carol));

        let bob_view = chain.utxo_set_at(&to_bob.hash()).unwrap();
        let carol_view = chain.utxo_set_at(&to_carol.hash()).unwrap();
        assert_eq!(bob_view.get_balance(&bob), 10);
        assert_eq!(bob_view.get_balance(&carol), 0);
        assert_eq!(carol_view.get_balance(&carol), 10);
    }

    #[test]
    fn test_stale_parent_rejected_and_pruned() {
        let (mut chain, genesis) = genesis_chain(3);
        let mut tip = genesis.clone();
        let mut blocks = vec![genesis.clone()];
        for height in 2..=5 {
            let next = child_of(&tip, height, vec![]);
            assert!(chain.add_block(&next));
            blocks.push(next.clone());
            tip = next;
        }
        // heights 1..=5, max 5, floor 2
        assert_eq!(chain.max_height(), 5);
        assert!(!chain.contains_block(&genesis.hash()));
        assert_eq!(chain.min_height(), 2);
        assert_eq!(chain.parent_of(&blocks[1].hash()), None);

        // height 2 is exactly at the floor and may still be extended
        assert!(chain.add_block(&sibling_of(&blocks[1], 3, 1, vec![])));

        // genesis is gone; a fork off it is now an unknown parent
        assert!(matches!(
            chain.try_add_block(&sibling_of(&genesis, 2, 1, vec![])),
            Err(BlockError::UnknownParent(_))
        ));
    }

    #[test]
    fn test_pool_drops_included_transactions() {
        let (mut chain, genesis) = genesis_chain(10);
        let tx = spend_genesis(&genesis, key("bob").public_key());
        assert!(chain.add_transaction(tx.clone()));
        assert!(!chain.add_transaction(tx.clone()));

        assert!(chain.add_block(&child_of(&genesis, 2, vec![tx.clone()])));
        assert!(!chain.get_transaction_pool().contains(&tx.hash()));
    }

    #[test]
    fn test_pool_evicts_spends_of_outputs_the_tip_consumed() {
        let (mut chain, genesis) = genesis_chain(10);
        let to_bob = spend_genesis(&genesis, key("bob").public_key());
        let to_carol = spend_genesis(&genesis, key("carol").public_key());
        let unrelated = Transaction::new(
            vec![TxInput::new(hash_bytes(b"elsewhere"), 0)],
            vec![TxOutput::new(1, miner())],
        );
        for tx in [&to_bob, &to_carol, &unrelated] {
            assert!(chain.add_transaction(tx.clone()));
        }

        assert!(chain.add_block(&child_of(&genesis, 2, vec![to_bob])));
        assert_eq!(chain.get_transaction_pool().transactions(), vec![unrelated]);
    }

    #[test]
    fn test_pool_kept_when_side_branch_spends() {
        let (mut chain, genesis) = genesis_chain(10);
        let to_carol = spend_genesis(&genesis, key("carol").public_key());
        assert!(chain.add_block(&child_of(&genesis, 2, vec![])));
        assert!(chain.add_transaction(to_carol.clone()));

        let to_bob = spend_genesis(&genesis, key("bob").public_key());
        assert!(chain.add_block(&sibling_of(&genesis, 2, 26, vec![to_bob])));
        assert!(chain.get_transaction_pool().contains(&to_carol.hash()));
    }

    #[test]
    fn test_coinbase_must_carry_block_height() {
        let (mut chain, genesis) = genesis_chain(10);
        assert_eq!(
            chain.try_add_block(&child_of(&genesis, 7, vec![])),
            Err(BlockError::CoinbaseHeight { expected: 2, found: 7 })
        );

        let untagged = Block::genesis(Transaction::coinbase(0, 10, miner()));
        assert!(matches!(
            BlockChain::new(untagged),
            Err(ChainError::InvalidGenesis(BlockError::CoinbaseHeight { expected: 1, found: 0 }))
        ));
        assert_eq!(chain.node_count(), 1);
    }

    #[test]
    fn test_reused_coinbase_cannot_revive_spent_output() {
        let (mut chain, genesis) = genesis_chain(10);
        let to_bob = spend_genesis(&genesis, key("bob").public_key());
        let spent = child_of(&genesis, 2, vec![to_bob.clone()]);
        assert!(chain.add_block(&spent));

        // genesis coinbase copied verbatim into a later block
        let replayed_coinbase = Block::new(spent.hash(), genesis.coinbase.clone(), vec![]);
        assert_eq!(
            chain.try_add_block(&replayed_coinbase),
            Err(BlockError::CoinbaseHeight { expected: 3, found: 1 })
        );

        let next = child_of(&spent, 3, vec![]);
        assert!(chain.add_block(&next));
        assert!(matches!(
            chain.try_add_block(&child_of(&next, 4, vec![to_bob])),
            Err(BlockError::InvalidTransaction { index: 0, source: TxError::MissingInput(_) })
        ));
        assert_eq!(chain.max_height(), 3);
    }

    #[test]
    fn test_coinbase_cannot_overwrite_live_output() {
        let (mut chain, genesis) = genesis_chain(10);
        // a zero-input regular transaction with the coinbase's exact content
        let coinbase = Transaction::coinbase(2, 0, miner());
        let block = Block::new(genesis.hash(), coinbase.clone(), vec![coinbase.clone()]);

        assert_eq!(
            chain.try_add_block(&block),
            Err(BlockError::CoinbaseCollision(UTXOKey::new(coinbase.hash(), 0)))
        );
        assert_eq!(chain.node_count(), 1);
    }

    #[test]
    fn test_stale_predicate_matches_pruning_floor() {
        let (mut chain, genesis) = genesis_chain(2);
        let mut tip = genesis;
        for height in 2..=6 {
            let next = child_of(&tip, height, vec![]);
            assert!(chain.add_block(&next));
            tip = next;
        }

        // max 6, cutoff 2: height 4 may be extended, height 3 may not
        assert!(!chain.is_stale(4));
        assert!(chain.is_stale(3));
        assert_eq!(chain.min_height(), 4);
    }
}
