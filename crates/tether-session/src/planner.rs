//! Eager-load planning over dotted include paths.
//!
//! Requested paths are merged into a tree keyed by path prefix, so
//! `"employees.sales"` and `"employees.manager"` share one `employees`
//! load. The tree is executed breadth-first: every node runs one batch
//! load over the full parent set produced by its parent node. Total
//! queries therefore depend on the number of distinct
//! `(path prefix, relationship)` pairs, never on row counts.
//!
//! Loads are staged and only committed once the tree has run. A node is
//! committed when at least one requested path through it succeeded
//! end-to-end, so a failed hop leaves no slot of its path `Loaded`.
//! A cancelled or panicked run commits nothing: every slot it touched
//! ends `Failed`.

use crate::hydrate::Hydrator;
use crate::loader::{BatchLoader, LoadedBatch};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tether_core::{
    Cx, EntityRef, Error, Outcome, QueryExecutor, Registry, RelationshipDescriptor, Result,
};

/// One relationship to include, with nested relationships beneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludePath {
    pub relationship: &'static str,
    pub nested: Vec<IncludePath>,
    /// Whether a requested path ends here.
    pub requested: bool,
}

impl IncludePath {
    #[must_use]
    pub fn new(relationship: &'static str) -> Self {
        Self {
            relationship,
            nested: Vec::new(),
            requested: false,
        }
    }

    /// Merge dotted `paths` into a forest. Empty segments are ignored
    /// (`"a..b"` is `"a.b"`), as are blank paths.
    pub fn parse(paths: &[&'static str]) -> Vec<IncludePath> {
        let mut roots: Vec<IncludePath> = Vec::new();
        for &path in paths {
            let parts: Vec<&'static str> = path
                .split('.')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            if !parts.is_empty() {
                Self::insert(&mut roots, &parts);
            }
        }
        roots
    }

    fn insert(level: &mut Vec<IncludePath>, parts: &[&'static str]) {
        let Some((first, rest)) = parts.split_first() else {
            return;
        };
        let pos = match level.iter().position(|p| p.relationship == *first) {
            Some(pos) => pos,
            None => {
                level.push(IncludePath::new(*first));
                level.len() - 1
            }
        };
        let node = &mut level[pos];
        if rest.is_empty() {
            node.requested = true;
        } else {
            Self::insert(&mut node.nested, rest);
        }
    }
}

/// A resolved tree node.
#[derive(Debug, Clone)]
struct PlanNode {
    path: String,
    depth: usize,
    descriptor: Arc<RelationshipDescriptor>,
    children: Vec<usize>,
    requested: bool,
}

/// Include paths resolved against a registry, in breadth-first order.
#[derive(Debug, Clone)]
pub struct Plan {
    root_type: &'static str,
    nodes: Vec<PlanNode>,
    roots: Vec<usize>,
}

impl Plan {
    /// Resolve `paths` starting from `root_type`.
    ///
    /// Fails with a configuration error before any query when a hop names
    /// an unknown relationship.
    pub fn resolve(
        registry: &Registry,
        root_type: &'static str,
        paths: &[&'static str],
    ) -> Result<Self> {
        registry.entity(root_type)?;

        let mut plan = Plan {
            root_type,
            nodes: Vec::new(),
            roots: Vec::new(),
        };
        // (include, parent node, source entity type, prefix)
        let mut queue: VecDeque<(IncludePath, Option<usize>, &'static str, String)> =
            IncludePath::parse(paths)
                .into_iter()
                .map(|inc| (inc, None, root_type, String::new()))
                .collect();

        while let Some((include, parent, source, prefix)) = queue.pop_front() {
            let descriptor = registry.relationship(source, include.relationship)?;
            let path = if prefix.is_empty() {
                include.relationship.to_string()
            } else {
                format!("{prefix}.{}", include.relationship)
            };
            let depth = parent.map_or(0, |p| plan.nodes[p].depth + 1);
            let idx = plan.nodes.len();
            plan.nodes.push(PlanNode {
                path: path.clone(),
                depth,
                descriptor: Arc::clone(&descriptor),
                children: Vec::new(),
                requested: include.requested,
            });
            match parent {
                Some(p) => plan.nodes[p].children.push(idx),
                None => plan.roots.push(idx),
            }
            for nested in include.nested {
                queue.push_back((nested, Some(idx), descriptor.target, path.clone()));
            }
        }
        Ok(plan)
    }

    pub fn root_type(&self) -> &'static str {
        self.root_type
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of batch loads the plan may issue.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Requested paths, in breadth-first order.
    pub fn paths(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.requested)
            .map(|n| n.path.as_str())
            .collect()
    }
}

/// Outcome summary of an eager load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Requested paths that were fully loaded.
    pub loaded_paths: Vec<String>,
    /// Queries issued.
    pub queries: usize,
    /// Slots committed across all nodes.
    pub hydrated_parents: usize,
}

enum NodeState {
    /// A parent node failed or was never reached.
    Skipped,
    Staged {
        parents: Vec<EntityRef>,
        batch: LoadedBatch,
    },
    Failed,
}

/// Runs a [`Plan`] over a set of root entities.
pub struct EagerPlanner<'a, E> {
    loader: BatchLoader<'a, E>,
    hydrator: Hydrator<'a>,
}

impl<'a, E: QueryExecutor> EagerPlanner<'a, E> {
    pub fn new(loader: BatchLoader<'a, E>, hydrator: Hydrator<'a>) -> Self {
        Self { loader, hydrator }
    }

    /// Load every path in `plan` onto `roots`.
    ///
    /// Slots already `Loaded` are reused without a query. On error the
    /// failed node's parents are marked `Failed`, independent nodes still
    /// run and commit, and the first error is returned. Cancellation stops
    /// the remaining nodes, marking their parents `Failed`.
    pub async fn execute(
        &self,
        cx: &Cx,
        plan: &Plan,
        roots: &[EntityRef],
    ) -> Outcome<LoadReport, Error> {
        let mut report = LoadReport::default();
        if plan.is_empty() || roots.is_empty() {
            return Outcome::Ok(report);
        }

        let mut inputs: Vec<Option<Vec<EntityRef>>> = vec![None; plan.nodes.len()];
        for &r in &plan.roots {
            inputs[r] = Some(dedup(roots.iter().cloned()));
        }
        let mut states: Vec<NodeState> = Vec::with_capacity(plan.nodes.len());
        let mut failure: Option<Outcome<LoadReport, Error>> = None;
        let mut aborted = false;

        for (idx, node) in plan.nodes.iter().enumerate() {
            let Some(parents) = inputs[idx].take() else {
                states.push(NodeState::Skipped);
                continue;
            };
            let name = node.descriptor.name;

            if aborted {
                for p in parents.iter().filter(|p| !p.is_loaded(name)) {
                    p.mark_failed(name, "load cancelled");
                }
                states.push(NodeState::Failed);
                continue;
            }

            let (loaded, pending): (Vec<EntityRef>, Vec<EntityRef>) =
                parents.into_iter().partition(|p| p.is_loaded(name));

            let batch = if pending.is_empty() {
                LoadedBatch::default()
            } else {
                match self.loader.load(cx, &pending, &node.descriptor).await {
                    Outcome::Ok(batch) => batch,
                    Outcome::Err(e) => {
                        tracing::debug!(path = %node.path, error = %e, "Eager load hop failed");
                        for p in &pending {
                            p.mark_failed(name, e.to_string());
                        }
                        failure.get_or_insert(Outcome::Err(e));
                        states.push(NodeState::Failed);
                        continue;
                    }
                    Outcome::Cancelled(r) => {
                        for p in &pending {
                            p.mark_failed(name, "load cancelled");
                        }
                        failure = Some(Outcome::Cancelled(r));
                        aborted = true;
                        states.push(NodeState::Failed);
                        continue;
                    }
                    Outcome::Panicked(p) => {
                        for parent in &pending {
                            parent.mark_failed(name, "load panicked");
                        }
                        failure = Some(Outcome::Panicked(p));
                        aborted = true;
                        states.push(NodeState::Failed);
                        continue;
                    }
                }
            };
            report.queries += batch.queries;

            if !node.children.is_empty() {
                let key_column = node.descriptor.parent_key();
                let reused = loaded
                    .iter()
                    .filter_map(|p| p.relation(name))
                    .flat_map(|r| r.many().to_vec());
                let fresh = pending
                    .iter()
                    .filter_map(|p| p.key_of(key_column))
                    .flat_map(|k| batch.get(&k).to_vec());
                let next = dedup(reused.chain(fresh));
                for &child in &node.children {
                    inputs[child] = Some(next.clone());
                }
            }

            states.push(NodeState::Staged {
                parents: pending,
                batch,
            });
        }

        // A node commits when it succeeded and a requested path through it
        // succeeded; children always follow parents, so walk backwards. An
        // aborted run commits nothing.
        let mut commit = vec![false; plan.nodes.len()];
        for idx in (0..plan.nodes.len()).rev() {
            let node = &plan.nodes[idx];
            commit[idx] = !aborted
                && matches!(states[idx], NodeState::Staged { .. })
                && (node.requested || node.children.iter().any(|&c| commit[c]));
        }

        for (idx, state) in states.iter().enumerate() {
            let NodeState::Staged { parents, batch } = state else {
                continue;
            };
            let node = &plan.nodes[idx];
            if commit[idx] {
                if !parents.is_empty() {
                    self.hydrator
                        .hydrate(parents, &node.descriptor, batch, &node.path);
                    report.hydrated_parents += parents.len();
                }
                if node.requested {
                    report.loaded_paths.push(node.path.clone());
                }
            } else if aborted {
                for p in parents {
                    p.mark_failed(node.descriptor.name, "load cancelled");
                }
            } else {
                tracing::debug!(path = %node.path, "Discarding staged load of a failed path");
            }
        }

        tracing::info!(
            entity = plan.root_type,
            roots = roots.len(),
            paths = ?plan.paths(),
            loaded = report.loaded_paths.len(),
            queries = report.queries,
            failed = failure.is_some(),
            "Eager load finished"
        );

        match failure {
            Some(outcome) => outcome,
            None => Outcome::Ok(report),
        }
    }
}

/// Distinct instances in first-seen order.
fn dedup(entities: impl IntoIterator<Item = EntityRef>) -> Vec<EntityRef> {
    let mut seen = HashSet::new();
    entities
        .into_iter()
        .filter(|e| seen.insert(Arc::as_ptr(e)))
        .collect()
}
