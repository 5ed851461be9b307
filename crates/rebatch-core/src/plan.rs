use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::transform::{NameContext, TransformRule, Transformer};
use crate::walker::Entry;

/// Where a step sits when an entry has to be routed through a temporary
/// name to break a rename cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepPhase {
    Direct,
    Staging,
    Final,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub source: PathBuf,
    pub target: PathBuf,
    pub entry: Entry,
    /// The target exists and may be replaced.
    pub overwrite: bool,
    pub phase: StepPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionKind {
    /// Two or more steps produce the same target.
    DuplicateTarget,
    /// A target lands on an entry that this plan does not move away.
    ExistingEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collision {
    pub target: PathBuf,
    /// Every path involved: the step sources, plus the existing entry for
    /// [`CollisionKind::ExistingEntry`].
    pub sources: Vec<PathBuf>,
    pub kind: CollisionKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Valid,
    InvalidCollisions(Vec<Collision>),
    InvalidEmpty,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStatus::Valid => write!(f, "valid"),
            PlanStatus::InvalidEmpty => write!(f, "nothing to rename"),
            PlanStatus::InvalidCollisions(collisions) => {
                write!(f, "{} naming collision(s)", collisions.len())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOptions {
    /// When false, entries below the first level are left out of the plan.
    pub recursive: bool,
    pub overwrite_existing: bool,
    pub dry_run: bool,
    /// Compare names the way a case-insensitive filesystem would.
    pub case_insensitive: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            overwrite_existing: false,
            dry_run: false,
            case_insensitive: cfg!(any(target_os = "macos", target_os = "windows")),
        }
    }
}

/// An ordered, validated set of renames computed against the tree as it was
/// before any of them ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamePlan {
    steps: Vec<PlanStep>,
    status: PlanStatus,
    dry_run: bool,
}

impl RenamePlan {
    pub(crate) fn from_ordered_steps(steps: Vec<PlanStep>) -> Self {
        let status = if steps.is_empty() {
            PlanStatus::InvalidEmpty
        } else {
            PlanStatus::Valid
        };
        Self {
            steps,
            status,
            dry_run: false,
        }
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn status(&self) -> &PlanStatus {
        &self.status
    }

    pub fn is_valid(&self) -> bool {
        self.status == PlanStatus::Valid
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn collisions(&self) -> &[Collision] {
        match &self.status {
            PlanStatus::InvalidCollisions(collisions) => collisions,
            _ => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Build a rename plan. The entries are drained up front since collision
/// checks need the complete set. Configuration errors in `rules` surface
/// here, before anything could touch the disk.
pub fn build_plan<I>(entries: I, rules: &[TransformRule], options: &PlanOptions) -> Result<RenamePlan>
where
    I: IntoIterator<Item = Entry>,
{
    let transformer = Transformer::new(rules)?;
    let entries: Vec<Entry> = entries
        .into_iter()
        .filter(|entry| options.recursive || entry.depth <= 1)
        .collect();

    let mut steps = Vec::new();
    for (index, entry) in entries.into_iter().enumerate() {
        let context = NameContext {
            kind: entry.kind,
            index,
        };
        let new_name = transformer.apply(&entry.name, context)?;
        if new_name == entry.name {
            debug!("No change for {:?}", entry.path);
            continue;
        }
        steps.push(PlanStep {
            source: entry.path.clone(),
            target: entry.path.with_file_name(&new_name),
            entry,
            overwrite: false,
            phase: StepPhase::Direct,
        });
    }

    let keys = KeyFold {
        case_insensitive: options.case_insensitive,
    };
    let mut collisions = duplicate_targets(&steps, &keys);
    collisions.extend(existing_entries(&mut steps, &keys, options.overwrite_existing));

    let status = if !collisions.is_empty() {
        for collision in &collisions {
            warn!("Collision on {:?}: {:?}", collision.target, collision.sources);
        }
        PlanStatus::InvalidCollisions(collisions)
    } else if steps.is_empty() {
        PlanStatus::InvalidEmpty
    } else {
        PlanStatus::Valid
    };

    let steps = if status == PlanStatus::Valid {
        order_steps(steps, &keys)
    } else {
        let mut steps = steps;
        steps.sort_by_key(|step| Reverse(step.entry.depth));
        steps
    };

    info!("Built rename plan: {} step(s), status {}", steps.len(), status);
    Ok(RenamePlan {
        steps,
        status,
        dry_run: options.dry_run,
    })
}

struct KeyFold {
    case_insensitive: bool,
}

impl KeyFold {
    fn key(&self, path: &Path) -> String {
        let text = path.to_string_lossy();
        if self.case_insensitive {
            text.to_lowercase()
        } else {
            text.into_owned()
        }
    }
}

fn duplicate_targets(steps: &[PlanStep], keys: &KeyFold) -> Vec<Collision> {
    let mut by_target: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, step) in steps.iter().enumerate() {
        by_target.entry(keys.key(&step.target)).or_default().push(i);
    }

    by_target
        .into_values()
        .filter(|group| group.len() > 1)
        .map(|group| Collision {
            target: steps[group[0]].target.clone(),
            sources: group.iter().map(|&i| steps[i].source.clone()).collect(),
            kind: CollisionKind::DuplicateTarget,
        })
        .collect()
}

/// Check each target against what is on disk. An existing entry is fine when
/// it is the step's own source (a case-only rename) or another step's source.
fn existing_entries(steps: &mut [PlanStep], keys: &KeyFold, overwrite: bool) -> Vec<Collision> {
    let sources: HashSet<PathBuf> = steps.iter().map(|step| step.source.clone()).collect();
    let mut listings: HashMap<PathBuf, HashMap<String, Vec<PathBuf>>> = HashMap::new();
    let mut collisions = Vec::new();

    for step in steps.iter_mut() {
        let parent = step.target.parent().map(Path::to_path_buf).unwrap_or_default();
        let listing = listings
            .entry(parent)
            .or_insert_with_key(|parent| list_directory(parent, keys));

        let blocking: Vec<PathBuf> = match listing.get(&keys.key(&step.target)) {
            Some(existing) => existing
                .iter()
                .filter(|path| **path != step.source && !sources.contains(*path))
                .cloned()
                .collect(),
            None if !listing.is_empty() => Vec::new(),
            None => fs::symlink_metadata(&step.target)
                .map(|_| vec![step.target.clone()])
                .unwrap_or_default(),
        };

        if blocking.is_empty() {
            continue;
        }
        if overwrite {
            debug!("Marking {:?} for overwrite", step.target);
            step.overwrite = true;
        } else {
            let mut involved = vec![step.source.clone()];
            involved.extend(blocking);
            collisions.push(Collision {
                target: step.target.clone(),
                sources: involved,
                kind: CollisionKind::ExistingEntry,
            });
        }
    }

    collisions
}

fn list_directory(dir: &Path, keys: &KeyFold) -> HashMap<String, Vec<PathBuf>> {
    let mut listing: HashMap<String, Vec<PathBuf>> = HashMap::new();
    match fs::read_dir(dir) {
        Ok(read) => {
            for item in read.flatten() {
                let path = item.path();
                listing.entry(keys.key(&path)).or_default().push(path);
            }
        }
        Err(e) => debug!("Could not list {:?} for collision checks: {}", dir, e),
    }
    for paths in listing.values_mut() {
        paths.sort();
    }
    listing
}

type Rank = (Reverse<usize>, usize, u8);

struct Node {
    step: PlanStep,
    rank: Rank,
}

/// Order steps deepest first, keeping walker order among equals, except that
/// a step whose target is still occupied by another step's source waits for
/// that step. Cycles are broken by routing one entry through a staging name.
fn order_steps(steps: Vec<PlanStep>, keys: &KeyFold) -> Vec<PlanStep> {
    let mut taken: HashSet<String> = steps
        .iter()
        .flat_map(|step| [keys.key(&step.source), keys.key(&step.target)])
        .collect();
    let mut nodes: Vec<Node> = steps
        .into_iter()
        .enumerate()
        .map(|(seq, step)| Node {
            rank: (Reverse(step.entry.depth), seq, 0),
            step,
        })
        .collect();

    loop {
        let requires = requirements(&nodes, keys);
        match topological_order(&nodes, &requires) {
            Ok(order) => {
                let mut slots: Vec<Option<PlanStep>> = nodes.into_iter().map(|n| Some(n.step)).collect();
                return order.into_iter().filter_map(|i| slots[i].take()).collect();
            }
            Err(cycle) => {
                let Some(&split) = cycle.iter().min_by_key(|&&i| nodes[i].rank) else {
                    nodes.sort_by_key(|n| n.rank);
                    return nodes.into_iter().map(|n| n.step).collect();
                };
                let staging = staging_path(&nodes[split].step, split, keys, &mut taken);
                debug!(
                    "Breaking rename cycle through {:?} for {:?}",
                    staging, nodes[split].step.source
                );

                let original = &mut nodes[split];
                let final_step = PlanStep {
                    source: staging.clone(),
                    target: original.step.target.clone(),
                    entry: original.step.entry.clone(),
                    overwrite: original.step.overwrite,
                    phase: StepPhase::Final,
                };
                original.step.target = staging;
                original.step.overwrite = false;
                original.step.phase = StepPhase::Staging;
                let (depth, seq, _) = original.rank;
                nodes.push(Node {
                    step: final_step,
                    rank: (depth, seq, 1),
                });
            }
        }
    }
}

/// `requires[i]` lists the steps that must run before step `i`: those that
/// vacate its target, and for a `Final` step the staging step that fills its
/// source. A `Final` step's source only exists once its staging step ran, so
/// it never occupies anything.
fn requirements(nodes: &[Node], keys: &KeyFold) -> Vec<Vec<usize>> {
    let mut by_source: HashMap<String, Vec<usize>> = HashMap::new();
    let mut by_target: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, node) in nodes.iter().enumerate() {
        if node.step.phase != StepPhase::Final {
            by_source.entry(keys.key(&node.step.source)).or_default().push(i);
        }
        by_target.entry(keys.key(&node.step.target)).or_default().push(i);
    }

    nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let mut required: Vec<usize> = by_source
                .get(&keys.key(&node.step.target))
                .map(|found| found.iter().copied().filter(|&j| j != i).collect())
                .unwrap_or_default();
            if node.step.phase == StepPhase::Final {
                if let Some(producers) = by_target.get(&keys.key(&node.step.source)) {
                    required.extend(producers.iter().copied().filter(|&j| j != i));
                }
            }
            required
        })
        .collect()
}

/// Kahn's algorithm with ready steps taken in rank order. On failure returns
/// one cycle among the steps that could not be scheduled.
fn topological_order(nodes: &[Node], requires: &[Vec<usize>]) -> std::result::Result<Vec<usize>, Vec<usize>> {
    let mut waiting: Vec<usize> = requires.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, required) in requires.iter().enumerate() {
        for &j in required {
            dependents[j].push(i);
        }
    }

    let mut ready: BTreeSet<(Rank, usize)> = (0..nodes.len())
        .filter(|&i| waiting[i] == 0)
        .map(|i| (nodes[i].rank, i))
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some((_, i)) = ready.pop_first() {
        order.push(i);
        for &d in &dependents[i] {
            waiting[d] -= 1;
            if waiting[d] == 0 {
                ready.insert((nodes[d].rank, d));
            }
        }
    }

    if order.len() == nodes.len() {
        return Ok(order);
    }

    // Every unscheduled step still requires another unscheduled step, so
    // following those links from any of them revisits a step.
    let Some(start) = (0..nodes.len()).find(|&i| waiting[i] > 0) else {
        return Err(Vec::new());
    };
    let mut path = vec![start];
    let mut seen: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;
    while let Some(&next) = requires[current].iter().find(|&&j| waiting[j] > 0) {
        if let Some(&at) = seen.get(&next) {
            return Err(path.split_off(at));
        }
        seen.insert(next, path.len());
        path.push(next);
        current = next;
    }
    Err(path)
}

fn staging_path(step: &PlanStep, salt: usize, keys: &KeyFold, taken: &mut HashSet<String>) -> PathBuf {
    let mut attempt = 0usize;
    loop {
        let name = format!(".{}.rebatch-{}-{}", step.entry.name, salt, attempt);
        let candidate = step.source.with_file_name(name);
        let key = keys.key(&candidate);
        if !taken.contains(&key) && fs::symlink_metadata(&candidate).is_err() {
            taken.insert(key);
            return candidate;
        }
        attempt += 1;
    }
}
