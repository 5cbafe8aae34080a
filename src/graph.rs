//! Dependency-ordered provisioning step graph.
//!
//! Steps declare two kinds of ordering constraints:
//!
//! - **dependencies**: steps that must complete before this one
//! - **subscriptions**: a step to sit immediately after, without that step
//!   knowing about its subscribers (an extension point, not a data edge)
//!
//! [`StepGraph::resolve`] groups every subscription target with its
//! subscribers (in registration order, recursively) into one contiguous
//! block, lifts the dependencies of all members onto the block, and
//! topologically orders the blocks. Ties are broken by registration order,
//! so the result is deterministic.
//!
//! [`StepGraph::run`] then drives the steps one at a time against a single
//! [`ProvisioningContext`].

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::{ProvisioningContext, StepFailure};
use crate::error::ProvisionError;
use crate::platform::{Platform, PlatformTag};

/// A unit of provisioning work.
///
/// Handlers complete asynchronously; synchronous work can be wrapped with
/// [`sync_handler`].
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn run(&self, ctx: &mut ProvisioningContext) -> Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> StepHandler for FnHandler<F>
where
    F: Fn(&mut ProvisioningContext) -> Result<()> + Send + Sync,
{
    async fn run(&self, ctx: &mut ProvisioningContext) -> Result<()> {
        (self.0)(ctx)
    }
}

/// Wraps a synchronous closure as a [`StepHandler`].
pub fn sync_handler<F>(f: F) -> Arc<dyn StepHandler>
where
    F: Fn(&mut ProvisioningContext) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Handlers of one step, keyed by platform with an `all` fallback.
#[derive(Clone, Default)]
pub struct HandlerMap {
    fallback: Option<Arc<dyn StepHandler>>,
    platforms: HashMap<Platform, Arc<dyn StepHandler>>,
}

impl HandlerMap {
    pub fn insert(&mut self, tag: PlatformTag, handler: Arc<dyn StepHandler>) {
        match tag {
            PlatformTag::All => self.fallback = Some(handler),
            PlatformTag::Only(platform) => {
                self.platforms.insert(platform, handler);
            }
        }
    }

    /// Picks the platform-specific handler, falling back to `all`.
    pub fn select(&self, platform: Platform) -> Option<&Arc<dyn StepHandler>> {
        self.platforms.get(&platform).or(self.fallback.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.fallback.is_none() && self.platforms.is_empty()
    }
}

impl std::fmt::Debug for HandlerMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<String> = self.platforms.keys().map(|p| p.to_string()).collect();
        tags.sort();
        if self.fallback.is_some() {
            tags.push("all".to_string());
        }
        f.debug_struct("HandlerMap").field("tags", &tags).finish()
    }
}

/// A named unit of provisioning work with ordering constraints.
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub description: String,
    pub dependencies: Vec<String>,
    /// The first entry anchors placement; any further entries act as
    /// plain dependencies.
    pub subscriptions: Vec<String>,
    handlers: HandlerMap,
}

impl Step {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            dependencies: Vec::new(),
            subscriptions: Vec::new(),
            handlers: HandlerMap::default(),
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(names.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn subscribes_to(mut self, target: impl Into<String>) -> Self {
        self.subscriptions.push(target.into());
        self
    }

    #[must_use]
    pub fn handler(mut self, tag: PlatformTag, handler: Arc<dyn StepHandler>) -> Self {
        self.handlers.insert(tag, handler);
        self
    }

    /// Registers the handler used when no platform-specific one exists.
    #[must_use]
    pub fn all(self, handler: Arc<dyn StepHandler>) -> Self {
        self.handler(PlatformTag::All, handler)
    }

    #[must_use]
    pub fn on(self, platform: Platform, handler: Arc<dyn StepHandler>) -> Self {
        self.handler(PlatformTag::Only(platform), handler)
    }

    pub fn handlers(&self) -> &HandlerMap {
        &self.handlers
    }
}

/// What the graph does after a step handler fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and keep driving later steps (best-effort).
    #[default]
    Continue,
    /// Record the failure and skip every later step.
    Abort,
}

/// Outcome of [`StepGraph::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Steps whose handler completed without error.
    pub executed: Vec<String>,
    /// Steps with no handler for the current platform.
    pub skipped: Vec<String>,
    /// Steps never started because the run aborted.
    pub not_run: Vec<String>,
    /// Failures recorded in the context, in the order they happened.
    pub failures: Vec<StepFailure>,
    /// True only if no step marked the context as failed.
    pub success: bool,
}

/// Registry and driver for provisioning steps.
#[derive(Debug, Default)]
pub struct StepGraph {
    steps: IndexMap<String, Step>,
    policy: FailurePolicy,
}

impl StepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Adds a step. Names are unique within a graph.
    pub fn register(&mut self, step: Step) -> Result<(), ProvisionError> {
        if self.steps.contains_key(&step.name) {
            return Err(ProvisionError::DuplicateStep { name: step.name });
        }
        debug!(step = %step.name, "registered step");
        self.steps.insert(step.name.clone(), step);
        Ok(())
    }

    /// Computes the execution order.
    ///
    /// # Errors
    ///
    /// - [`ProvisionError::UnknownStep`] for a reference to an unregistered step
    /// - [`ProvisionError::Cycle`] when dependencies and subscriptions cannot
    ///   be satisfied together
    pub fn resolve(&self) -> Result<Vec<&Step>, ProvisionError> {
        let n = self.steps.len();
        let steps: Vec<&Step> = self.steps.values().collect();
        let name = |i: usize| steps[i].name.clone();
        let lookup = |step: &Step, reference: &str| {
            self.steps
                .get_index_of(reference)
                .ok_or_else(|| ProvisionError::UnknownStep {
                    step: step.name.clone(),
                    reference: reference.to_string(),
                })
        };

        // Placement anchor and "must come after" edges per step.
        let mut anchor: Vec<Option<usize>> = vec![None; n];
        let mut needs: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, step) in steps.iter().enumerate() {
            for dep in &step.dependencies {
                let d = lookup(step, dep)?;
                if d == i {
                    return Err(ProvisionError::Cycle {
                        cycle: vec![name(i), name(i)],
                    });
                }
                if !needs[i].contains(&d) {
                    needs[i].push(d);
                }
            }
            for (k, target) in step.subscriptions.iter().enumerate() {
                let t = lookup(step, target)?;
                if t == i {
                    return Err(ProvisionError::Cycle {
                        cycle: vec![name(i), name(i)],
                    });
                }
                if k == 0 {
                    anchor[i] = Some(t);
                } else if !needs[i].contains(&t) {
                    needs[i].push(t);
                }
            }
        }

        // Subscription chains must end in a step that subscribes to nothing.
        for start in 0..n {
            let mut chain = vec![start];
            let mut current = start;
            while let Some(target) = anchor[current] {
                if let Some(pos) = chain.iter().position(|&s| s == target) {
                    let mut cycle: Vec<String> = chain[pos..].iter().map(|&s| name(s)).collect();
                    cycle.push(name(target));
                    return Err(ProvisionError::Cycle { cycle });
                }
                chain.push(target);
                current = target;
            }
        }

        let mut subscribers: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, target) in anchor.iter().enumerate() {
            if let Some(t) = target {
                subscribers[*t].push(i);
            }
        }

        // Each root step plus its (transitive) subscribers forms a block.
        let mut block_of = vec![0usize; n];
        let mut position = vec![0usize; n];
        let mut blocks: Vec<Vec<usize>> = Vec::new();
        for root in (0..n).filter(|&i| anchor[i].is_none()) {
            let members = preorder(root, &subscribers);
            for (pos, &member) in members.iter().enumerate() {
                block_of[member] = blocks.len();
                position[member] = pos;
            }
            blocks.push(members);
        }

        // Block-level edges, each with a witness (dependent, dependency).
        let mut block_needs: Vec<Vec<BlockEdge>> = vec![Vec::new(); blocks.len()];
        for member in 0..n {
            for &dep in &needs[member] {
                let (own, other) = (block_of[member], block_of[dep]);
                if own == other {
                    if position[dep] > position[member] {
                        return Err(ProvisionError::Cycle {
                            cycle: vec![name(member), name(dep), name(member)],
                        });
                    }
                    continue;
                }
                if !block_needs[own].iter().any(|edge| edge.block == other) {
                    block_needs[own].push(BlockEdge {
                        block: other,
                        dependent: member,
                        dependency: dep,
                    });
                }
            }
        }

        let mut pending: Vec<usize> = block_needs.iter().map(Vec::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); blocks.len()];
        for (block, edges) in block_needs.iter().enumerate() {
            for edge in edges {
                dependents[edge.block].push(block);
            }
        }

        // Blocks are numbered in root registration order, so the smallest
        // ready block is the earliest registered one.
        let mut ready: BinaryHeap<Reverse<usize>> = pending
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(block, _)| Reverse(block))
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(block)) = ready.pop() {
            order.extend(blocks[block].iter().map(|&i| steps[i]));
            for &next in &dependents[block] {
                pending[next] -= 1;
                if pending[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != n {
            let cycle = find_block_cycle(&block_needs, &pending)
                .into_iter()
                .map(|i| name(i))
                .collect();
            return Err(ProvisionError::Cycle { cycle });
        }

        Ok(order)
    }

    /// Step names in execution order.
    pub fn plan(&self) -> Result<Vec<String>, ProvisionError> {
        Ok(self.resolve()?.into_iter().map(|s| s.name.clone()).collect())
    }

    /// Executes every step in resolved order, one at a time.
    ///
    /// Graph errors are returned before any handler runs. Handler failures
    /// are recorded on `ctx` (which then reports `status() == false`) and,
    /// under [`FailurePolicy::Continue`], later steps still run.
    pub async fn run(&self, ctx: &mut ProvisioningContext) -> Result<RunSummary, ProvisionError> {
        let order = self.resolve()?;
        let total = order.len();
        let platform = ctx.platform();
        let mut summary = RunSummary::default();
        let mut aborted = false;

        info!("running {} step(s) for {}", total, platform);

        for (index, step) in order.into_iter().enumerate() {
            if aborted {
                summary.not_run.push(step.name.clone());
                continue;
            }
            let Some(handler) = step.handlers.select(platform) else {
                debug!(step = %step.name, "no handler for {}, skipping", platform);
                summary.skipped.push(step.name.clone());
                continue;
            };

            info!("step {}/{}: {}: {}", index + 1, total, step.name, step.description);
            match handler.run(ctx).await {
                Ok(()) => summary.executed.push(step.name.clone()),
                Err(e) => {
                    ctx.fail(&step.name, &e);
                    if self.policy == FailurePolicy::Abort {
                        warn!(step = %step.name, "aborting run after failure");
                        aborted = true;
                    }
                }
            }
        }

        summary.failures = ctx.failures().to_vec();
        summary.success = ctx.status();
        Ok(summary)
    }
}

#[derive(Debug, Clone, Copy)]
struct BlockEdge {
    block: usize,
    dependent: usize,
    dependency: usize,
}

fn preorder(root: usize, subscribers: &[Vec<usize>]) -> Vec<usize> {
    let mut members = Vec::new();
    let mut stack = vec![root];
    while let Some(current) = stack.pop() {
        members.push(current);
        stack.extend(subscribers[current].iter().rev());
    }
    members
}

/// Walks unsatisfied block edges until a block repeats and returns the
/// step names along the loop, closed on the first one.
///
/// Every block left with pending edges has at least one prerequisite that
/// is also pending, so the walk always finds a loop.
fn find_block_cycle(block_needs: &[Vec<BlockEdge>], pending: &[usize]) -> Vec<usize> {
    let Some(start) = pending.iter().position(|&count| count > 0) else {
        return Vec::new();
    };

    let mut path: Vec<BlockEdge> = Vec::new();
    let mut seen: HashMap<usize, usize> = HashMap::new();
    let mut current = start;
    let edges = loop {
        if let Some(&at) = seen.get(&current) {
            break &path[at..];
        }
        seen.insert(current, path.len());
        let Some(edge) = block_needs[current]
            .iter()
            .find(|edge| pending[edge.block] > 0)
        else {
            break &path[..];
        };
        path.push(*edge);
        current = edge.block;
    };

    let mut names: Vec<usize> = Vec::new();
    for edge in edges {
        if names.last() != Some(&edge.dependent) {
            names.push(edge.dependent);
        }
        names.push(edge.dependency);
    }
    if let Some(&first) = names.first()
        && names.last() != Some(&first)
    {
        names.push(first);
    }
    names
}
