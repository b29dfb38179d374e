//! Train/validation/test interaction graphs.
//!
//! A [`GraphProvider`] supplies everything the training loop reads from the
//! data side: the three split graphs, the negative graph contrasted against
//! the training positives, node counts and ground-truth lookups.
//! [`RecDataset`] is the provider built from interaction lists.
//!
//! # Interaction files
//!
//! One interaction per line, user id then item id, separated by whitespace
//! or tabs. Further columns (ratings, timestamps) are ignored; blank lines
//! and lines starting with `#` are skipped.
//!
//! ```text
//! # user  item
//! alice   book-1
//! alice   book-7
//! bob     book-1
//! ```
//!
//! The three splits share one user and one item vocabulary, so every split
//! graph has the same node counts; ids seen only in `val` or `test` still get
//! a node.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use tracing::info;

use crate::error::{Error, Result};
use crate::hetero::{EdgeType, HeteroGraph, NodeStore, NodeType, TypedNodeIndex};
use crate::sampling::{NegativeGraph, NegativeSampler};

/// An evaluation split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Val,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "val" => Ok(Split::Val),
            "test" => Ok(Split::Test),
            other => Err(Error::InvalidSplit(other.to_string())),
        }
    }
}

/// Source of the graphs a recommendation run trains and evaluates on.
pub trait GraphProvider {
    /// The user-item relation being trained and evaluated.
    fn target_link(&self) -> &EdgeType;

    /// `(train, val, test)` graphs.
    fn splits(&self) -> (&HeteroGraph, &HeteroGraph, &HeteroGraph);

    /// Negatives contrasted with the positives of `train`.
    fn construct_negatives(&self, train: &HeteroGraph) -> Result<NegativeGraph>;

    /// Number of nodes of `node_type`.
    fn num_nodes(&self, node_type: &NodeType) -> usize;

    /// Items `user` interacted with in `graph`, ascending.
    fn successors(&self, graph: &HeteroGraph, user: TypedNodeIndex) -> Vec<TypedNodeIndex> {
        graph.successors(self.target_link(), user)
    }

    fn train_graph(&self) -> &HeteroGraph {
        self.splits().0
    }

    /// Held-out graph of an evaluation split.
    fn split_graph(&self, split: Split) -> &HeteroGraph {
        let (_, val, test) = self.splits();
        match split {
            Split::Val => val,
            Split::Test => test,
        }
    }
}

/// Parse `user item` lines from `reader`.
///
/// `source` names the input in parse errors.
pub fn read_interactions<R: Read>(reader: R, source: &str) -> Result<Vec<(String, String)>> {
    let buf = BufReader::new(reader);
    let mut pairs = Vec::new();

    for (n, line) in buf.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some(user), Some(item)) => pairs.push((user.to_string(), item.to_string())),
            _ => {
                return Err(Error::Parse {
                    path: source.to_string(),
                    line: n + 1,
                    message: format!("expected `user item`, got {line:?}"),
                })
            }
        }
    }

    Ok(pairs)
}

/// Parse an interaction file.
pub fn read_interaction_file(path: impl AsRef<Path>) -> Result<Vec<(String, String)>> {
    let path = path.as_ref();
    read_interactions(File::open(path)?, &path.display().to_string())
}

/// Three interaction splits over a shared user/item vocabulary.
#[derive(Debug, Clone)]
pub struct RecDataset {
    target: EdgeType,
    train: HeteroGraph,
    val: HeteroGraph,
    test: HeteroGraph,
    users: NodeStore,
    items: NodeStore,
    sampler: NegativeSampler,
}

impl RecDataset {
    /// Build from dense `(user, item)` index pairs.
    ///
    /// Fails with [`Error::NodeOutOfRange`] on an index outside
    /// `[0, num_users)` or `[0, num_items)`.
    pub fn from_interactions(
        num_users: usize,
        num_items: usize,
        train: &[(usize, usize)],
        val: &[(usize, usize)],
        test: &[(usize, usize)],
        num_neg: usize,
        seed: u64,
    ) -> Result<Self> {
        let users = NodeStore::new();
        let items = NodeStore::new();
        Self::assemble(num_users, num_items, [train, val, test], users, items, num_neg, seed)
    }

    /// Build from string-id pairs, assigning dense indices in order of first
    /// appearance (train, then val, then test).
    pub fn from_id_pairs(
        train: &[(String, String)],
        val: &[(String, String)],
        test: &[(String, String)],
        num_neg: usize,
        seed: u64,
    ) -> Result<Self> {
        let mut users = NodeStore::new();
        let mut items = NodeStore::new();
        let mut index = |pairs: &[(String, String)]| -> Vec<(usize, usize)> {
            pairs
                .iter()
                .map(|(u, i)| (users.add_node(u.as_str()), items.add_node(i.as_str())))
                .collect()
        };
        let train = index(train);
        let val = index(val);
        let test = index(test);

        let (num_users, num_items) = (users.num_nodes(), items.num_nodes());
        Self::assemble(
            num_users,
            num_items,
            [train.as_slice(), val.as_slice(), test.as_slice()],
            users,
            items,
            num_neg,
            seed,
        )
    }

    /// Load the three splits from interaction files.
    pub fn from_files(
        train: impl AsRef<Path>,
        val: impl AsRef<Path>,
        test: impl AsRef<Path>,
        num_neg: usize,
        seed: u64,
    ) -> Result<Self> {
        let train = read_interaction_file(train)?;
        let val = read_interaction_file(val)?;
        let test = read_interaction_file(test)?;
        Self::from_id_pairs(&train, &val, &test, num_neg, seed)
    }

    fn assemble(
        num_users: usize,
        num_items: usize,
        splits: [&[(usize, usize)]; 3],
        users: NodeStore,
        items: NodeStore,
        num_neg: usize,
        seed: u64,
    ) -> Result<Self> {
        let target = EdgeType::user_item();
        let build = |pairs: &[(usize, usize)]| -> Result<HeteroGraph> {
            let mut graph = HeteroGraph::new()
                .with_node_count(NodeType::user(), num_users)
                .with_node_count(NodeType::item(), num_items);
            for &(u, i) in pairs {
                graph.add_edge(&target, u, i)?;
            }
            Ok(graph)
        };

        let [train, val, test] = splits;
        let dataset = Self {
            train: build(train)?,
            val: build(val)?,
            test: build(test)?,
            target: target.clone(),
            users,
            items,
            sampler: NegativeSampler::new(num_neg, seed),
        };

        info!(
            users = num_users,
            items = num_items,
            train = dataset.train.num_edges(&target),
            val = dataset.val.num_edges(&target),
            test = dataset.test.num_edges(&target),
            "dataset loaded"
        );
        Ok(dataset)
    }

    /// User id vocabulary; empty when built from dense indices.
    pub fn users(&self) -> &NodeStore {
        &self.users
    }

    /// Item id vocabulary; empty when built from dense indices.
    pub fn items(&self) -> &NodeStore {
        &self.items
    }

    pub fn num_users(&self) -> usize {
        self.train.num_nodes(&NodeType::user())
    }

    pub fn num_items(&self) -> usize {
        self.train.num_nodes(&NodeType::item())
    }
}

impl GraphProvider for RecDataset {
    fn target_link(&self) -> &EdgeType {
        &self.target
    }

    fn splits(&self) -> (&HeteroGraph, &HeteroGraph, &HeteroGraph) {
        (&self.train, &self.val, &self.test)
    }

    fn construct_negatives(&self, train: &HeteroGraph) -> Result<NegativeGraph> {
        self.sampler.sample(train, &self.target)
    }

    fn num_nodes(&self, node_type: &NodeType) -> usize {
        self.train.num_nodes(node_type)
    }
}
