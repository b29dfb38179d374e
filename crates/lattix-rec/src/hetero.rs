//! Heterogeneous interaction graphs.
//!
//! A recommendation graph has typed nodes (`user`, `item`) and typed edges
//! keyed by a canonical `(src_type, relation, dst_type)` triple, the same
//! representation PyG and DGL use. Node ids of every type are dense local
//! indices in `[0, count)`; edges are stored per type in COO form.
//!
//! # Example
//!
//! ```rust
//! use lattix_rec::hetero::{EdgeType, HeteroGraph, NodeType};
//!
//! let ui = EdgeType::user_item();
//! let mut hg = HeteroGraph::new()
//!     .with_node_count(NodeType::user(), 2)
//!     .with_node_count(NodeType::item(), 3);
//!
//! hg.add_edge(&ui, 0, 2).unwrap();
//! hg.add_edge(&ui, 1, 0).unwrap();
//!
//! assert_eq!(hg.num_nodes(&NodeType::item()), 3);
//! assert_eq!(hg.num_edges(&ui), 2);
//! assert_eq!(hg.successors(&ui, 0), vec![2]);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};

/// A node type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeType(pub String);

impl NodeType {
    /// Create a new node type.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The `user` node type.
    pub fn user() -> Self {
        Self::new("user")
    }

    /// The `item` node type.
    pub fn item() -> Self {
        Self::new("item")
    }

    /// Get the type name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for NodeType {
    fn from(s: S) -> Self {
        Self(s.into())
    }
}

/// An edge type identifier, represented as (src_type, relation, dst_type).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeType {
    /// Source node type.
    pub src_type: NodeType,
    /// Relation name.
    pub relation: String,
    /// Destination node type.
    pub dst_type: NodeType,
}

impl EdgeType {
    /// Create a new edge type.
    pub fn new(
        src_type: impl Into<NodeType>,
        relation: impl Into<String>,
        dst_type: impl Into<NodeType>,
    ) -> Self {
        Self {
            src_type: src_type.into(),
            relation: relation.into(),
            dst_type: dst_type.into(),
        }
    }

    /// The `("user", "user-item", "item")` interaction relation.
    pub fn user_item() -> Self {
        Self::new("user", "user-item", "item")
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}:{}", self.src_type, self.dst_type, self.relation)
    }
}

/// Node index within a specific node type.
pub type TypedNodeIndex = usize;

/// Edge storage for a specific edge type (COO format).
///
/// Indices are local to their respective node types. Edge order is
/// insertion order and is significant: score vectors are aligned with it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeStore {
    /// Source node indices (local to src_type).
    pub src: Vec<TypedNodeIndex>,
    /// Target node indices (local to dst_type).
    pub dst: Vec<TypedNodeIndex>,
}

impl EdgeStore {
    /// Create an empty edge store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from edge index vectors.
    pub fn from_edges(src: Vec<TypedNodeIndex>, dst: Vec<TypedNodeIndex>) -> Result<Self> {
        if src.len() != dst.len() {
            return Err(Error::ShapeMismatch {
                expected: src.len(),
                got: dst.len(),
            });
        }
        Ok(Self { src, dst })
    }

    /// Number of edges.
    pub fn num_edges(&self) -> usize {
        self.src.len()
    }

    /// Whether the store holds no edges.
    pub fn is_empty(&self) -> bool {
        self.src.is_empty()
    }

    /// Add an edge.
    pub fn add_edge(&mut self, src: TypedNodeIndex, dst: TypedNodeIndex) {
        self.src.push(src);
        self.dst.push(dst);
    }

    /// Iterate over (src, dst) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (TypedNodeIndex, TypedNodeIndex)> + '_ {
        self.src.iter().copied().zip(self.dst.iter().copied())
    }

    /// Keep only the edges at `positions`, in that order.
    pub fn select(&self, positions: &[usize]) -> Self {
        Self {
            src: positions.iter().map(|&p| self.src[p]).collect(),
            dst: positions.iter().map(|&p| self.dst[p]).collect(),
        }
    }
}

/// String-id vocabulary for one node type.
///
/// Maps external identifiers (as found in interaction files) to the dense
/// local indices the graph works with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStore {
    /// Node IDs (string identifiers), indexed by local index.
    pub ids: Vec<String>,
    id_to_idx: HashMap<String, TypedNodeIndex>,
}

impl NodeStore {
    /// Create an empty node store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.ids.len()
    }

    /// Add a node, returning its local index.
    pub fn add_node(&mut self, id: impl Into<String>) -> TypedNodeIndex {
        let id = id.into();
        if let Some(&idx) = self.id_to_idx.get(&id) {
            return idx;
        }
        let idx = self.ids.len();
        self.id_to_idx.insert(id.clone(), idx);
        self.ids.push(id);
        idx
    }

    /// Get a node's index by ID.
    pub fn get_index(&self, id: &str) -> Option<TypedNodeIndex> {
        self.id_to_idx.get(id).copied()
    }

    /// Get a node's ID by index.
    pub fn get_id(&self, idx: TypedNodeIndex) -> Option<&str> {
        self.ids.get(idx).map(|s| s.as_str())
    }
}

/// A heterogeneous graph with typed nodes and edges.
///
/// Node types only carry a count; their ids are the dense range
/// `[0, count)`. Edge types carry an [`EdgeStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeteroGraph {
    node_counts: HashMap<NodeType, usize>,
    edge_stores: HashMap<EdgeType, EdgeStore>,
}

impl HeteroGraph {
    /// Create an empty heterogeneous graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `count` nodes of `node_type`.
    pub fn with_node_count(mut self, node_type: NodeType, count: usize) -> Self {
        self.node_counts.insert(node_type, count);
        self
    }

    /// Dense bipartite graph holding every (src, dst) pair of `edge_type`.
    ///
    /// Edges are laid out source-major: edge `u * num_dst + i` is `(u, i)`,
    /// so a score vector over this graph reshapes directly into a
    /// `(num_src, num_dst)` row-major matrix.
    pub fn full_bipartite(edge_type: &EdgeType, num_src: usize, num_dst: usize) -> Self {
        let total = num_src * num_dst;
        let mut store = EdgeStore {
            src: Vec::with_capacity(total),
            dst: Vec::with_capacity(total),
        };
        for u in 0..num_src {
            for i in 0..num_dst {
                store.add_edge(u, i);
            }
        }

        let mut hg = Self::new()
            .with_node_count(edge_type.src_type.clone(), num_src)
            .with_node_count(edge_type.dst_type.clone(), num_dst);
        hg.edge_stores.insert(edge_type.clone(), store);
        hg
    }

    /// Number of node types.
    pub fn num_node_types(&self) -> usize {
        self.node_counts.len()
    }

    /// Number of edge types.
    pub fn num_edge_types(&self) -> usize {
        self.edge_stores.len()
    }

    /// Add an edge of the given type.
    ///
    /// Both endpoint types must already be declared and both indices must
    /// fall inside their dense ranges.
    pub fn add_edge(
        &mut self,
        edge_type: &EdgeType,
        src: TypedNodeIndex,
        dst: TypedNodeIndex,
    ) -> Result<()> {
        self.check_index(&edge_type.src_type, src)?;
        self.check_index(&edge_type.dst_type, dst)?;
        self.edge_stores
            .entry(edge_type.clone())
            .or_insert_with(EdgeStore::new)
            .add_edge(src, dst);
        Ok(())
    }

    /// Insert a whole edge store, replacing any existing edges of that type.
    pub fn insert_edges(&mut self, edge_type: &EdgeType, store: EdgeStore) -> Result<()> {
        for (s, d) in store.iter() {
            self.check_index(&edge_type.src_type, s)?;
            self.check_index(&edge_type.dst_type, d)?;
        }
        self.edge_stores.insert(edge_type.clone(), store);
        Ok(())
    }

    fn check_index(&self, node_type: &NodeType, index: TypedNodeIndex) -> Result<()> {
        let count = *self
            .node_counts
            .get(node_type)
            .ok_or_else(|| Error::MissingNodeType(node_type.to_string()))?;
        if index >= count {
            return Err(Error::NodeOutOfRange {
                node_type: node_type.to_string(),
                index,
                count,
            });
        }
        Ok(())
    }

    /// Get edge store for a type.
    pub fn edge_store(&self, edge_type: &EdgeType) -> Option<&EdgeStore> {
        self.edge_stores.get(edge_type)
    }

    /// Get edge store for a type, failing if the graph has no such relation.
    pub fn require_edges(&self, edge_type: &EdgeType) -> Result<&EdgeStore> {
        self.edge_stores
            .get(edge_type)
            .ok_or_else(|| Error::MissingEdgeType(edge_type.to_string()))
    }

    /// Number of nodes of a given type.
    pub fn num_nodes(&self, node_type: &NodeType) -> usize {
        self.node_counts.get(node_type).copied().unwrap_or(0)
    }

    /// Number of edges of a given type.
    pub fn num_edges(&self, edge_type: &EdgeType) -> usize {
        self.edge_stores
            .get(edge_type)
            .map(|s| s.num_edges())
            .unwrap_or(0)
    }

    /// Total number of nodes across all types.
    pub fn total_nodes(&self) -> usize {
        self.node_counts.values().sum()
    }

    /// Total number of edges across all types.
    pub fn total_edges(&self) -> usize {
        self.edge_stores.values().map(|s| s.num_edges()).sum()
    }

    /// Distinct successors of `src` via `edge_type`, ascending.
    pub fn successors(&self, edge_type: &EdgeType, src: TypedNodeIndex) -> Vec<TypedNodeIndex> {
        let mut out: Vec<TypedNodeIndex> = self
            .edge_stores
            .get(edge_type)
            .map(|store| {
                store
                    .iter()
                    .filter_map(|(s, d)| if s == src { Some(d) } else { None })
                    .collect()
            })
            .unwrap_or_default();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Distinct successors of every source node, ascending.
    ///
    /// One pass over the edges; entry `u` equals `successors(edge_type, u)`.
    pub fn successor_lists(&self, edge_type: &EdgeType) -> Vec<Vec<TypedNodeIndex>> {
        let mut lists = vec![Vec::new(); self.num_nodes(&edge_type.src_type)];
        if let Some(store) = self.edge_stores.get(edge_type) {
            for (s, d) in store.iter() {
                if let Some(list) = lists.get_mut(s) {
                    list.push(d);
                }
            }
        }
        for list in &mut lists {
            list.sort_unstable();
            list.dedup();
        }
        lists
    }

    /// Subgraph keeping every node type but only the listed edge types.
    pub fn edge_type_subgraph(&self, edge_types: &[EdgeType]) -> Self {
        Self {
            node_counts: self.node_counts.clone(),
            edge_stores: self
                .edge_stores
                .iter()
                .filter(|(t, _)| edge_types.contains(t))
                .map(|(t, s)| (t.clone(), s.clone()))
                .collect(),
        }
    }
}

/// Interaction counts of one relation, as printed by `lattix-rec stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionStats {
    pub users: usize,
    pub items: usize,
    /// Edges, repeats included.
    pub interactions: usize,
    /// Users with at least one interaction.
    pub active_users: usize,
}

impl HeteroGraph {
    /// Counts for the `edge_type` relation.
    pub fn interaction_stats(&self, edge_type: &EdgeType) -> InteractionStats {
        let active_users = self
            .successor_lists(edge_type)
            .iter()
            .filter(|items| !items.is_empty())
            .count();
        InteractionStats {
            users: self.num_nodes(&edge_type.src_type),
            items: self.num_nodes(&edge_type.dst_type),
            interactions: self.num_edges(edge_type),
            active_users,
        }
    }
}
