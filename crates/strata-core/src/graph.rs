//! In-process knowledge graph: an arena of relations indexed by endpoint.
//!
//! Nodes are entity IDs; edges are [`Relation`]s stored once in a `Vec` and
//! referenced by index from both endpoints, which avoids any shared or
//! cyclic ownership. Traversal is breadth-first over undirected adjacency
//! and stops after `max_hops` expansions.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::Serialize;

use crate::models::Relation;

/// Nodes reached and edges walked by a traversal.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Subgraph {
    /// Every reached node, start nodes included, sorted.
    pub node_ids: Vec<String>,
    /// Edges with at least one endpoint expanded, sorted by confidence then ID.
    pub relations: Vec<Relation>,
}

/// Adjacency-indexed edge list.
#[derive(Debug, Default)]
pub struct EdgeList {
    edges: Vec<Option<Relation>>,
    by_id: HashMap<String, usize>,
    by_node: HashMap<String, Vec<usize>>,
}

impl EdgeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Insert or merge an edge; confidence only ever rises.
    pub fn upsert(&mut self, relation: &Relation) {
        if let Some(&slot) = self.by_id.get(&relation.id) {
            if let Some(existing) = self.edges[slot].as_mut() {
                existing.confidence = existing.confidence.max(relation.confidence);
            }
            return;
        }
        let slot = self.edges.len();
        self.edges.push(Some(relation.clone()));
        self.by_id.insert(relation.id.clone(), slot);
        for node in [&relation.subject_id, &relation.object_id] {
            self.by_node.entry(node.clone()).or_default().push(slot);
        }
    }

    /// Remove every edge matching `predicate`; returns how many were removed.
    pub fn remove_where<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&Relation) -> bool,
    {
        let mut removed = 0;
        for slot in self.edges.iter_mut() {
            if slot.as_ref().is_some_and(&predicate) {
                if let Some(rel) = slot.take() {
                    self.by_id.remove(&rel.id);
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            let edges = &self.edges;
            self.by_node.retain(|_, slots| {
                slots.retain(|s| edges[*s].is_some());
                !slots.is_empty()
            });
        }
        removed
    }

    /// Edges touching `node`.
    pub fn neighbors<'a>(&'a self, node: &str) -> impl Iterator<Item = &'a Relation> + 'a {
        self.by_node
            .get(node)
            .into_iter()
            .flatten()
            .filter_map(move |slot| self.edges[*slot].as_ref())
    }

    /// Breadth-first expansion from `start` up to `max_hops` edges away.
    pub fn traverse(&self, start: &[String], max_hops: usize) -> Subgraph {
        let mut visited: BTreeSet<String> = start.iter().cloned().collect();
        let mut frontier: VecDeque<(String, usize)> =
            start.iter().map(|id| (id.clone(), 0)).collect();
        let mut seen_edges: HashSet<&str> = HashSet::new();
        let mut relations: Vec<Relation> = Vec::new();

        while let Some((node, depth)) = frontier.pop_front() {
            if depth >= max_hops {
                continue;
            }
            for rel in self.neighbors(&node) {
                if seen_edges.insert(rel.id.as_str()) {
                    relations.push(rel.clone());
                }
                let other = if rel.subject_id == node {
                    &rel.object_id
                } else {
                    &rel.subject_id
                };
                if visited.insert(other.clone()) {
                    frontier.push_back((other.clone(), depth + 1));
                }
            }
        }

        sort_relations(&mut relations);
        Subgraph {
            node_ids: visited.into_iter().collect(),
            relations,
        }
    }
}

/// Order relations by confidence descending, then ID.
pub fn sort_relations(relations: &mut [Relation]) {
    relations.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}
