//! The replica graph of one model.
//!
//! Every replica target has exactly one owner: the primary index or an
//! additional index it was declared under. Edges are typed by how the
//! replica relates to its owner, which decides both how the owner publishes
//! it in its `replicas` setting and which settings the replica receives.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::model::{IndexSettings, IndexTarget, REPLICAS_KEY, TargetId, TargetKind};

/// How a replica relates to its owning index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaEdge {
    /// A standalone replica with only its own settings.
    Standalone,
    /// A standalone replica receiving the owner's settings under its own.
    Inherit,
    /// A virtual replica, published as `virtual(<name>)`.
    Virtual,
}

/// Owner-to-replica edges of one model, resolved once at build time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaGraph {
    edges: BTreeMap<TargetId, Vec<(TargetId, ReplicaEdge)>>,
    parents: BTreeMap<TargetId, (TargetId, ReplicaEdge)>,
}

impl ReplicaGraph {
    /// Builds the graph from a flattened target list.
    pub fn build<R>(targets: &[IndexTarget<R>]) -> Self {
        let mut graph = Self::default();
        for target in targets {
            let edge = match target.kind {
                TargetKind::Replica { inherit: true } => ReplicaEdge::Inherit,
                TargetKind::Replica { inherit: false } => ReplicaEdge::Standalone,
                TargetKind::VirtualReplica => ReplicaEdge::Virtual,
                TargetKind::Primary | TargetKind::Additional => continue,
            };
            if let Some(parent) = target.parent {
                graph
                    .edges
                    .entry(parent)
                    .or_default()
                    .push((target.id, edge));
                graph.parents.insert(target.id, (parent, edge));
            }
        }
        graph
    }

    /// Direct replicas of an owner, in declaration order.
    pub fn replicas_of(&self, owner: TargetId) -> &[(TargetId, ReplicaEdge)] {
        self.edges.get(&owner).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The owner of a replica and the edge to it.
    pub fn parent_of(&self, replica: TargetId) -> Option<(TargetId, ReplicaEdge)> {
        self.parents.get(&replica).copied()
    }

    /// Returns true when the target is a replica of some owner.
    pub fn is_replica(&self, id: TargetId) -> bool {
        self.parents.contains_key(&id)
    }

    /// The `replicas` setting an owner publishes.
    ///
    /// `names` holds the resolved index name of every target, indexed by id.
    pub fn replica_list(&self, owner: TargetId, names: &[String]) -> Vec<String> {
        self.replicas_of(owner)
            .iter()
            .filter_map(|(id, edge)| {
                let name = names.get(id.index())?;
                Some(match edge {
                    ReplicaEdge::Virtual => format!("virtual({name})"),
                    ReplicaEdge::Standalone | ReplicaEdge::Inherit => name.clone(),
                })
            })
            .collect()
    }

    /// Declared settings of a target with inheritance applied.
    pub fn effective_settings<R>(&self, id: TargetId, targets: &[IndexTarget<R>]) -> IndexSettings {
        let Some(target) = targets.get(id.index()) else {
            return IndexSettings::default();
        };
        match self.parent_of(id) {
            Some((parent, ReplicaEdge::Inherit)) => {
                let base = self.effective_settings(parent, targets);
                target.settings.merged_over(&base)
            }
            _ => target.settings.clone(),
        }
    }

    /// The full settings map to push for a target.
    ///
    /// Owners always carry a `replicas` key (possibly empty) so that
    /// removing every replica is propagated; replicas never carry one.
    pub fn desired_settings<R>(
        &self,
        id: TargetId,
        targets: &[IndexTarget<R>],
        names: &[String],
    ) -> Map<String, Value> {
        let mut map = self.effective_settings(id, targets).to_map();
        if !self.is_replica(id) {
            let replicas = self.replica_list(id, names);
            map.insert(
                REPLICAS_KEY.to_string(),
                Value::Array(replicas.into_iter().map(Value::String).collect()),
            );
        }
        map
    }
}
