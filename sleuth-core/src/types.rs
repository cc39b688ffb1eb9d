//! Core data model: plans, subtopics, and the evidence kinds held in memory.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Subtopic priority, 1 = high, 3 = low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const HIGH: Priority = Priority(1);
    pub const MEDIUM: Priority = Priority(2);
    pub const LOW: Priority = Priority(3);

    pub fn value(self) -> u8 {
        self.0
    }

    /// One level closer to `HIGH`, saturating.
    pub fn boosted(self) -> Priority {
        Priority(self.0.saturating_sub(1).max(1))
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::MEDIUM
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (1..=3).contains(&value) {
            Ok(Priority(value))
        } else {
            Err(format!("priority must be 1, 2, or 3, got {value}"))
        }
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> u8 {
        p.0
    }
}

/// Lifecycle status of a subtopic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtopicStatus {
    #[default]
    Pending,
    Active,
    Complete,
    Weak,
}

/// A bounded unit of the research plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtopic {
    pub name: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: SubtopicStatus,
    #[serde(default)]
    pub key_questions: Vec<String>,
    #[serde(default)]
    pub metrics_required: Vec<String>,
    /// Marks a subtopic that covers the stated research objective. Never pruned.
    #[serde(default)]
    pub anchors_objective: bool,
    /// Number of iterations in which this subtopic was dispatched.
    #[serde(default)]
    pub times_addressed: u32,
    /// Iteration that introduced the subtopic (0 for the initial plan).
    #[serde(default)]
    pub added_in_iteration: u32,
}

impl Subtopic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: Priority::default(),
            status: SubtopicStatus::Pending,
            key_questions: Vec::new(),
            metrics_required: Vec::new(),
            anchors_objective: false,
            times_addressed: 0,
            added_in_iteration: 0,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_key_questions(mut self, questions: Vec<String>) -> Self {
        self.key_questions = questions;
        self
    }

    pub fn with_metrics(mut self, metrics: Vec<String>) -> Self {
        self.metrics_required = metrics;
        self
    }

    pub fn anchoring(mut self) -> Self {
        self.anchors_objective = true;
        self
    }
}

/// The research plan: an objective plus an ordered set of uniquely named subtopics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub objective: String,
    pub subtopics: Vec<Subtopic>,
}

impl Plan {
    pub fn get(&self, name: &str) -> Option<&Subtopic> {
        self.subtopics.iter().find(|s| s.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Subtopic> {
        self.subtopics.iter_mut().find(|s| s.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.subtopics.iter().map(|s| s.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.subtopics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subtopics.is_empty()
    }
}

/// Coarse classification of a source's publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainType {
    Edu,
    Gov,
    News,
    Blog,
    Other,
}

impl DomainType {
    pub const ALL: [DomainType; 5] = [
        DomainType::Edu,
        DomainType::Gov,
        DomainType::News,
        DomainType::Blog,
        DomainType::Other,
    ];
}

impl fmt::Display for DomainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DomainType::Edu => "edu",
            DomainType::Gov => "gov",
            DomainType::News => "news",
            DomainType::Blog => "blog",
            DomainType::Other => "other",
        };
        f.write_str(s)
    }
}

/// A retrieved document. Immutable once stored in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<String>,
    pub domain_type: DomainType,
    #[serde(default)]
    pub author_present: bool,
    pub opinion_score: f64,
    /// Subtopic whose retrieval first produced this source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieved_for: Option<String>,
}

impl Source {
    /// Four-digit year at the start of `publication_date`, if any.
    pub fn publication_year(&self) -> Option<i32> {
        let date = self.publication_date.as_deref()?.trim();
        let head = date.get(..4)?;
        if !head.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        head.parse().ok()
    }
}

/// A synthesized claim about a subtopic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub subtopic: String,
    pub statement: String,
    pub confidence: f64,
    pub supporting_sources: BTreeSet<String>,
}

/// A statistic value is either numeric or a free-form figure such as "42%".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for StatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatValue::Number(n) => write!(f, "{n}"),
            StatValue::Text(t) => f.write_str(t),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistic {
    pub subtopic: String,
    pub value: StatValue,
    pub context: String,
    pub source_url: String,
}

/// Two claims from different sources that disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    pub subtopic: String,
    pub claim_a: String,
    pub source_a: String,
    pub claim_b: String,
    pub source_b: String,
    pub severity: f64,
    #[serde(default)]
    pub resolved: bool,
}
