//! Blocking index: bounds the comparison space below quadratic.
//!
//! Both stores are partitioned into blocks by a deterministic [`KeyFunction`]
//! over a chosen property. Only instances whose blocks fall into each other's
//! comparison neighborhood are ever compared.
//!
//! Blocking is a recall-reducing approximation: instances that should match
//! but land in non-adjacent blocks are permanently missed. The key function
//! and neighborhood size are the tunable recall/performance trade-off —
//! a longer `TokenPrefix` or a narrower `NumericBucket` means fewer
//! candidates and lower recall.
//!
//! An instance missing the blocking property (or carrying no usable value for
//! it) lands in a designated unblocked bucket and is compared against the
//! entire other side: full comparison for that instance only.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::instance::Instance;
use crate::store::EntityStore;

/// One coordinate of a block key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyPart {
    Int(i64),
    Text(String),
}

/// A block coordinate: a sequence of key parts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockKey(pub Vec<KeyPart>);

impl std::fmt::Display for BlockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            match part {
                KeyPart::Int(v) => write!(f, "{v}")?,
                KeyPart::Text(v) => write!(f, "{v}")?,
            }
        }
        write!(f, "]")
    }
}

/// Deterministic block-key generation strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeyFunction {
    /// One block per lowercase alphanumeric token prefix of the property's
    /// values. Comparison neighborhood is the identity block.
    TokenPrefix { property: String, len: usize },
    /// Values bucketed by `floor(value / width)`. Comparison neighborhood is
    /// the bucket ± `neighborhood`.
    NumericBucket {
        property: String,
        width: f64,
        neighborhood: i64,
    },
}

impl KeyFunction {
    /// The property this function keys on.
    pub fn property(&self) -> &str {
        match self {
            KeyFunction::TokenPrefix { property, .. } => property,
            KeyFunction::NumericBucket { property, .. } => property,
        }
    }

    /// Block keys of an instance. Empty means the instance is unblocked.
    pub fn keys(&self, instance: &Instance) -> Vec<BlockKey> {
        let Some(values) = instance.values(self.property()) else {
            return Vec::new();
        };

        let mut keys = BTreeSet::new();
        match self {
            KeyFunction::TokenPrefix { len, .. } => {
                for value in values {
                    for token in value
                        .split(|c: char| !c.is_alphanumeric())
                        .filter(|t| !t.is_empty())
                    {
                        let prefix: String = token.to_lowercase().chars().take(*len).collect();
                        keys.insert(BlockKey(vec![KeyPart::Text(prefix)]));
                    }
                }
            }
            KeyFunction::NumericBucket { width, .. } => {
                for value in values {
                    if let Ok(number) = value.trim().parse::<f64>() {
                        if number.is_finite() {
                            let bucket = (number / width).floor() as i64;
                            keys.insert(BlockKey(vec![KeyPart::Int(bucket)]));
                        }
                    }
                }
            }
        }
        keys.into_iter().collect()
    }

    /// The blocks of the other side that must be compared against `key`.
    pub fn blocks_to_compare(&self, key: &BlockKey) -> Vec<BlockKey> {
        match self {
            KeyFunction::TokenPrefix { .. } => vec![key.clone()],
            KeyFunction::NumericBucket { neighborhood, .. } => {
                let Some(KeyPart::Int(bucket)) = key.0.first() else {
                    return vec![key.clone()];
                };
                (-neighborhood..=*neighborhood)
                    .map(|offset| BlockKey(vec![KeyPart::Int(bucket + offset)]))
                    .collect()
            }
        }
    }
}

/// Block assignments for a source/target store pair.
#[derive(Debug)]
pub struct BlockIndex {
    key_fn: KeyFunction,
    source_blocks: BTreeMap<BlockKey, BTreeSet<String>>,
    target_blocks: BTreeMap<BlockKey, BTreeSet<String>>,
    unblocked_source: BTreeSet<String>,
    unblocked_target: BTreeSet<String>,
    source_uris: Vec<String>,
    target_uris: Vec<String>,
}

impl BlockIndex {
    /// Assign every instance of both stores its block keys.
    pub fn build(source: &EntityStore, target: &EntityStore, key_fn: KeyFunction) -> Self {
        let mut index = Self {
            key_fn,
            source_blocks: BTreeMap::new(),
            target_blocks: BTreeMap::new(),
            unblocked_source: BTreeSet::new(),
            unblocked_target: BTreeSet::new(),
            source_uris: source.uris().map(str::to_string).collect(),
            target_uris: target.uris().map(str::to_string).collect(),
        };

        for instance in source.iter() {
            let keys = index.key_fn.keys(instance);
            if keys.is_empty() {
                index.unblocked_source.insert(instance.uri.clone());
            }
            for key in keys {
                index
                    .source_blocks
                    .entry(key)
                    .or_default()
                    .insert(instance.uri.clone());
            }
        }
        for instance in target.iter() {
            let keys = index.key_fn.keys(instance);
            if keys.is_empty() {
                index.unblocked_target.insert(instance.uri.clone());
            }
            for key in keys {
                index
                    .target_blocks
                    .entry(key)
                    .or_default()
                    .insert(instance.uri.clone());
            }
        }

        tracing::debug!(
            source_blocks = index.source_blocks.len(),
            target_blocks = index.target_blocks.len(),
            unblocked_source = index.unblocked_source.len(),
            unblocked_target = index.unblocked_target.len(),
            "built block index"
        );
        index
    }

    /// Block keys of an instance (primary key first). Empty means unblocked.
    pub fn block_id(&self, instance: &Instance) -> Vec<BlockKey> {
        self.key_fn.keys(instance)
    }

    /// The blocks of the other side comparable to `key`.
    pub fn blocks_to_compare(&self, key: &BlockKey) -> Vec<BlockKey> {
        self.key_fn.blocks_to_compare(key)
    }

    /// All candidate pairs, sorted and deduplicated.
    ///
    /// This is the engine's only comparison feed: block-comparable pairs plus
    /// the unblocked instances of either side crossed with the whole other
    /// side.
    pub fn candidate_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: BTreeSet<(String, String)> = BTreeSet::new();

        for (key, source_uris) in &self.source_blocks {
            for comparable in self.blocks_to_compare(key) {
                if let Some(target_uris) = self.target_blocks.get(&comparable) {
                    for s in source_uris {
                        for t in target_uris {
                            pairs.insert((s.clone(), t.clone()));
                        }
                    }
                }
            }
        }

        // Fallback to full comparison for unblocked instances only.
        for s in &self.unblocked_source {
            for t in &self.target_uris {
                pairs.insert((s.clone(), t.clone()));
            }
        }
        for t in &self.unblocked_target {
            for s in &self.source_uris {
                pairs.insert((s.clone(), t.clone()));
            }
        }

        pairs.into_iter().collect()
    }
}
