//! Plan governance: bounded, damped subtopic spawn, prune, and reprioritization.
//!
//! The plan is an ordered list of uniquely named subtopics. Removed names are
//! held in a separate "recently removed" map with the iteration they left,
//! which blocks exact and near-duplicate re-entry until the cooldown elapses.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::config::PlanConfig;
use crate::error::ValidationError;
use crate::research::evaluator::{Diagnostics, Evaluation};
use crate::research::keywords::{containment, jaccard, keywords};
use crate::types::{Plan, Priority, Subtopic, SubtopicStatus};

/// Structural outcome of a plan operation, recorded verbatim in the trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanDelta {
    pub plan_updates: Vec<String>,
    pub subtopics_added: Vec<String>,
    pub subtopics_removed: Vec<String>,
}

impl PlanDelta {
    pub fn absorb(&mut self, other: PlanDelta) {
        self.plan_updates.extend(other.plan_updates);
        self.subtopics_added.extend(other.subtopics_added);
        self.subtopics_removed.extend(other.subtopics_removed);
    }

    pub fn is_structural(&self) -> bool {
        !self.subtopics_added.is_empty() || !self.subtopics_removed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Removal {
    name: String,
    removed_in: u32,
}

#[derive(Debug, Clone)]
pub struct PlanManager {
    plan: Plan,
    config: PlanConfig,
    /// Keyed by keyword identity.
    recently_removed: BTreeMap<String, Removal>,
    setup_notes: Vec<String>,
}

fn clean_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keyword identity of a name; names without content words use their lowercase form.
fn identity(name: &str) -> BTreeSet<String> {
    let kw = keywords(name);
    if !kw.is_empty() {
        return kw;
    }
    let lower = clean_name(name).to_lowercase();
    if lower.is_empty() {
        BTreeSet::new()
    } else {
        BTreeSet::from([lower])
    }
}

fn identity_key(name: &str) -> String {
    identity(name).into_iter().collect::<Vec<_>>().join(" ")
}

impl PlanManager {
    /// Take ownership of an initial plan.
    ///
    /// Blank and duplicate names are dropped, the list is truncated to
    /// `max_subtopics`, and the first subtopic becomes the objective anchor
    /// when none is marked. Each adjustment is kept as a setup note.
    pub fn new(plan: Plan, config: PlanConfig) -> Result<Self, ValidationError> {
        let mut notes = Vec::new();
        let mut seen = BTreeSet::new();
        let mut subtopics = Vec::new();

        for mut subtopic in plan.subtopics {
            subtopic.name = clean_name(&subtopic.name);
            if subtopic.name.is_empty() {
                notes.push("Dropped a subtopic with a blank name".to_string());
                continue;
            }
            if !seen.insert(subtopic.name.to_lowercase()) {
                notes.push(format!("Dropped duplicate subtopic '{}'", subtopic.name));
                continue;
            }
            if subtopics.len() == config.max_subtopics {
                notes.push(format!(
                    "Dropped subtopic '{}': plan is limited to {} subtopics",
                    subtopic.name, config.max_subtopics
                ));
                continue;
            }
            subtopic.added_in_iteration = 0;
            subtopics.push(subtopic);
        }

        if subtopics.is_empty() {
            return Err(ValidationError::Malformed {
                message: "plan must contain at least one named subtopic".into(),
            });
        }
        if !subtopics.iter().any(|s| s.anchors_objective) {
            subtopics[0].anchors_objective = true;
        }
        for note in &notes {
            warn!(note = %note, "Initial plan adjusted");
        }

        Ok(Self {
            plan: Plan {
                objective: plan.objective,
                subtopics,
            },
            config,
            recently_removed: BTreeMap::new(),
            setup_notes: notes,
        })
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn config(&self) -> &PlanConfig {
        &self.config
    }

    pub fn setup_notes(&self) -> &[String] {
        &self.setup_notes
    }

    pub fn note_setup(&mut self, note: impl Into<String>) {
        self.setup_notes.push(note.into());
    }

    /// Subtopics to dispatch this iteration, highest priority first.
    ///
    /// Complete subtopics are skipped unless nothing else remains.
    pub fn dispatch_order(&self) -> Vec<Subtopic> {
        let mut open: Vec<Subtopic> = self
            .plan
            .subtopics
            .iter()
            .filter(|s| s.status != SubtopicStatus::Complete)
            .cloned()
            .collect();
        if open.is_empty() {
            open = self.plan.subtopics.clone();
        }
        open.sort_by_key(|s| s.priority);
        open
    }

    /// Record that these subtopics were dispatched.
    pub fn mark_dispatched(&mut self, names: &[String]) {
        for name in names {
            if let Some(subtopic) = self.plan.get_mut(name) {
                subtopic.times_addressed += 1;
                if subtopic.status == SubtopicStatus::Pending {
                    subtopic.status = SubtopicStatus::Active;
                }
            }
        }
    }

    /// Set each scored subtopic's status from the latest evaluation.
    pub fn apply_statuses(&mut self, evaluation: &Evaluation) {
        let complete: BTreeSet<&str> = evaluation
            .diagnostics
            .complete_subtopics
            .iter()
            .map(String::as_str)
            .collect();
        let diagnostics = &evaluation.diagnostics;
        for subtopic in &mut self.plan.subtopics {
            let Some(diag) = diagnostics.per_subtopic.get(&subtopic.name) else {
                continue;
            };
            if subtopic.times_addressed == 0 {
                continue;
            }
            let held_open =
                diagnostics.force_refinement && diagnostics.contested_subtopics.contains(&subtopic.name);
            subtopic.status = if complete.contains(subtopic.name.as_str()) && !held_open {
                SubtopicStatus::Complete
            } else if diag.weak {
                SubtopicStatus::Weak
            } else {
                SubtopicStatus::Active
            };
        }
    }

    /// Why `name` may not enter the plan at `iteration`, if it may not.
    pub fn entry_blocker(&self, name: &str, iteration: u32) -> Option<String> {
        let candidate = identity(name);
        if candidate.is_empty() {
            return Some("name is blank".into());
        }

        for existing in &self.plan.subtopics {
            if self.is_near_duplicate(&candidate, &existing.name) {
                return Some(format!("near-duplicate of active subtopic '{}'", existing.name));
            }
        }
        for removal in self.recently_removed.values() {
            if !self.in_cooldown(removal, iteration) {
                continue;
            }
            if self.is_near_duplicate(&candidate, &removal.name) {
                return Some(format!(
                    "'{}' was removed in iteration {}, cooldown until iteration {}",
                    removal.name,
                    removal.removed_in,
                    removal.removed_in + self.config.cooldown_iterations
                ));
            }
        }
        None
    }

    fn in_cooldown(&self, removal: &Removal, iteration: u32) -> bool {
        iteration < removal.removed_in + self.config.cooldown_iterations
    }

    /// Same keywords, one name's keywords wholly inside the other's, or
    /// Jaccard overlap at or above the configured threshold.
    fn is_near_duplicate(&self, candidate: &BTreeSet<String>, other_name: &str) -> bool {
        let other = identity(other_name);
        if other.is_empty() {
            return false;
        }
        if containment(candidate, &other) >= 1.0 || containment(&other, candidate) >= 1.0 {
            return true;
        }
        jaccard(candidate, &other) >= self.config.near_duplicate_threshold
    }

    fn expire_removals(&mut self, iteration: u32) {
        let cooldown = self.config.cooldown_iterations;
        self.recently_removed
            .retain(|_, r| iteration < r.removed_in + cooldown);
    }

    /// Add subtopics for missing aspects named by the diagnostics.
    ///
    /// At most `max_spawns_per_iteration` are added, never past
    /// `max_subtopics`. Near-duplicates of active or cooling-down names are
    /// refused. New subtopics start at the lowest priority.
    pub fn spawn_subtopics(&mut self, diagnostics: &Diagnostics, iteration: u32) -> PlanDelta {
        self.expire_removals(iteration);
        let mut delta = PlanDelta::default();

        for missing in &diagnostics.missing_aspects {
            let name = clean_name(&missing.aspect);
            if delta.subtopics_added.len() >= self.config.max_spawns_per_iteration {
                delta.plan_updates.push(format!(
                    "Deferred '{name}': spawn limit of {} per iteration reached",
                    self.config.max_spawns_per_iteration
                ));
                continue;
            }
            if self.plan.len() >= self.config.max_subtopics {
                delta.plan_updates.push(format!(
                    "Deferred '{name}': plan already has {} subtopics",
                    self.config.max_subtopics
                ));
                continue;
            }
            if let Some(reason) = self.entry_blocker(&name, iteration) {
                delta
                    .plan_updates
                    .push(format!("Refused to add '{name}': {reason}"));
                continue;
            }

            let mut subtopic = Subtopic::new(name.clone()).with_priority(Priority::LOW);
            subtopic.added_in_iteration = iteration;
            self.plan.subtopics.push(subtopic);
            info!(iteration, subtopic = %name, origin = %missing.subtopic, "Spawned subtopic");
            delta.plan_updates.push(format!(
                "Added subtopic '{name}' for a gap reported under '{}'",
                missing.subtopic
            ));
            delta.subtopics_added.push(name);
        }
        delta
    }

    /// Remove addressed, non-anchor subtopics that stayed below the prune floor.
    pub fn prune_subtopics(&mut self, diagnostics: &Diagnostics, iteration: u32) -> PlanDelta {
        let mut delta = PlanDelta::default();

        for name in &diagnostics.prune_candidates {
            let Some(index) = self.plan.subtopics.iter().position(|s| &s.name == name) else {
                continue;
            };
            let subtopic = &self.plan.subtopics[index];
            if subtopic.anchors_objective {
                delta
                    .plan_updates
                    .push(format!("Kept '{name}': it covers the research objective"));
                continue;
            }
            if subtopic.times_addressed == 0 || subtopic.added_in_iteration >= iteration {
                continue;
            }
            if self.plan.len() <= 1 {
                delta
                    .plan_updates
                    .push(format!("Kept '{name}': the plan needs at least one subtopic"));
                continue;
            }

            let removed = self.plan.subtopics.remove(index);
            self.recently_removed.insert(
                identity_key(&removed.name),
                Removal {
                    name: removed.name.clone(),
                    removed_in: iteration,
                },
            );
            info!(iteration, subtopic = %removed.name, "Pruned subtopic");
            delta.plan_updates.push(format!(
                "Removed subtopic '{}': confidence stayed below {:.2} after being researched",
                removed.name, self.config.prune_floor
            ));
            delta.subtopics_removed.push(removed.name);
        }
        delta
    }

    /// Raise the priority of every weak subtopic by one level.
    ///
    /// When refinement is forced, contested subtopics are raised as well.
    pub fn apply_priority_adjustments(&mut self, diagnostics: &Diagnostics) -> PlanDelta {
        let mut delta = PlanDelta::default();
        let contested: &[String] = if diagnostics.force_refinement {
            &diagnostics.contested_subtopics
        } else {
            &[]
        };
        let mut seen = BTreeSet::new();
        let targets = diagnostics
            .weak_subtopics
            .iter()
            .map(|n| (n, "weak"))
            .chain(contested.iter().map(|n| (n, "contested")));
        for (name, kind) in targets {
            if !seen.insert(name.as_str()) {
                continue;
            }
            let Some(subtopic) = self.plan.get_mut(name) else {
                continue;
            };
            let boosted = subtopic.priority.boosted();
            if boosted != subtopic.priority {
                subtopic.priority = boosted;
                delta.plan_updates.push(format!(
                    "Raised priority of {kind} subtopic '{name}' to {}",
                    boosted.value()
                ));
            }
        }
        delta
    }

    /// One adaptation step: prune, then spawn, then reprioritize.
    ///
    /// Structural changes are skipped when `allow_structure` is false.
    pub fn adapt(
        &mut self,
        diagnostics: &Diagnostics,
        iteration: u32,
        allow_structure: bool,
    ) -> PlanDelta {
        let mut delta = PlanDelta::default();
        if allow_structure {
            delta.absorb(self.prune_subtopics(diagnostics, iteration));
            delta.absorb(self.spawn_subtopics(diagnostics, iteration));
        }
        delta.absorb(self.apply_priority_adjustments(diagnostics));
        delta
    }
}
