//! Groups matches by category and priority for presentation.

use serde::Serialize;

use crate::items::{Category, Priority};
use crate::semantic::Match;

/// Names under one priority.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PriorityBucket {
    pub priority: Priority,
    pub names: Vec<String>,
}

/// All four priority buckets of one category, in display order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CategorySection {
    pub category: Category,
    pub buckets: Vec<PriorityBucket>,
}

impl CategorySection {
    fn new(category: Category) -> Self {
        Self {
            category,
            buckets: Priority::ORDERED
                .iter()
                .map(|&priority| PriorityBucket {
                    priority,
                    names: vec![],
                })
                .collect(),
        }
    }

    /// Names in the given bucket.
    pub fn bucket(&self, priority: Priority) -> &[String] {
        self.buckets
            .iter()
            .find(|b| b.priority == priority)
            .map(|b| b.names.as_slice())
            .unwrap_or(&[])
    }

    /// All names, critical first.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.buckets
            .iter()
            .flat_map(|b| b.names.iter().map(String::as_str))
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.names.is_empty())
    }
}

/// Matches grouped category -> priority -> names.
///
/// Only categories with at least one match appear; skills come before
/// agents. Inside a bucket names keep the order the matches were given in.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Report {
    pub sections: Vec<CategorySection>,
}

impl Report {
    pub fn category(&self, category: Category) -> Option<&CategorySection> {
        self.sections.iter().find(|s| s.category == category)
    }

    pub fn has(&self, category: Category) -> bool {
        self.category(category).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Total number of names in the report.
    pub fn len(&self) -> usize {
        self.sections.iter().map(|s| s.names().count()).sum()
    }
}

/// Which categories a caller wants to see.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    /// Whatever matched
    #[default]
    Auto,
    /// Skills only
    Skills,
    /// Agents only
    Agents,
}

impl OutputType {
    pub fn accepts(&self, category: Category) -> bool {
        match self {
            OutputType::Auto => true,
            OutputType::Skills => category == Category::Skill,
            OutputType::Agents => category == Category::Agent,
        }
    }
}

/// Stable partition of `matches` by category, then priority.
pub fn aggregate(matches: &[Match]) -> Report {
    aggregate_filtered(matches, OutputType::Auto)
}

/// [`aggregate`] restricted to the categories `output` accepts.
pub fn aggregate_filtered(matches: &[Match], output: OutputType) -> Report {
    let mut sections: Vec<CategorySection> = Category::ORDERED
        .iter()
        .map(|&category| CategorySection::new(category))
        .collect();

    for m in matches.iter().filter(|m| output.accepts(m.category)) {
        let Some(section) = sections.iter_mut().find(|s| s.category == m.category) else {
            continue;
        };
        if let Some(bucket) = section.buckets.iter_mut().find(|b| b.priority == m.priority) {
            bucket.names.push(m.name.clone());
        }
    }

    sections.retain(|s| !s.is_empty());

    Report { sections }
}
