//! In-memory gazetteer and topic indexes
//!
//! Snapshots of the persisted gazetteer, loaded once and shared read-only
//! with the analyzer, the planner's gazetteer reasoner and the adaptive
//! seeder. Lookups are by lower-cased name; URL slugs are matched with
//! hyphens folded to spaces.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::error::Result;
use crate::storage::{PlaceKind, Storage};

/// One name → place binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceMatch {
    pub place_id: i64,
    pub kind: PlaceKind,
}

/// Read-only name index over the gazetteer
#[derive(Debug, Default)]
pub struct Gazetteer {
    names: HashMap<String, SmallVec<[PlaceMatch; 2]>>,
}

impl Gazetteer {
    /// An index with no places; classification degrades gracefully
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot the persisted gazetteer
    pub async fn load(storage: &Storage) -> Result<Self> {
        let mut names: HashMap<String, SmallVec<[PlaceMatch; 2]>> = HashMap::new();
        for (place_id, text, kind) in storage.all_place_names().await? {
            let entry = names.entry(text.to_lowercase()).or_default();
            let matched = PlaceMatch { place_id, kind };
            if !entry.contains(&matched) {
                entry.push(matched);
            }
        }
        Ok(Self { names })
    }

    /// Exact lower-cased name lookup
    #[must_use]
    pub fn lookup(&self, name: &str) -> &[PlaceMatch] {
        self.names
            .get(&name.to_lowercase())
            .map_or(&[], |v| v.as_slice())
    }

    /// Match a URL path segment: `new-york` matches the name `new york`
    #[must_use]
    pub fn match_slug(&self, slug: &str) -> &[PlaceMatch] {
        let spaced = slug.replace(['-', '_'], " ").to_lowercase();
        self.names.get(&spaced).map_or(&[], |v| v.as_slice())
    }

    /// Number of distinct names indexed
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when no names are indexed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Slugs of all indexed names of a kind; feeds the pattern seeder
    #[must_use]
    pub fn slugs_of_kind(&self, kind: PlaceKind) -> Vec<String> {
        let mut slugs: Vec<String> = self
            .names
            .iter()
            .filter(|(_, matches)| matches.iter().any(|m| m.kind == kind))
            .map(|(name, _)| name.replace(' ', "-"))
            .collect();
        slugs.sort();
        slugs
    }
}

/// Topic keyword index; IDs are stable positions in the configured list
#[derive(Debug)]
pub struct TopicIndex {
    keywords: HashMap<String, i64>,
    labels: Vec<String>,
}

impl TopicIndex {
    /// Build from an explicit keyword list
    #[must_use]
    pub fn new(topics: &[&str]) -> Self {
        let mut keywords = HashMap::new();
        let mut labels = Vec::with_capacity(topics.len());
        for (idx, topic) in topics.iter().enumerate() {
            keywords.insert((*topic).to_lowercase(), idx as i64);
            labels.push((*topic).to_string());
        }
        Self { keywords, labels }
    }

    /// The default news-section vocabulary
    #[must_use]
    pub fn default_news() -> Self {
        Self::new(&[
            "politics",
            "business",
            "economy",
            "sport",
            "sports",
            "technology",
            "science",
            "health",
            "culture",
            "entertainment",
            "world",
            "national",
            "local",
            "opinion",
            "weather",
            "crime",
            "education",
            "environment",
            "travel",
        ])
    }

    /// Topic ID for an exact keyword
    #[must_use]
    pub fn lookup(&self, word: &str) -> Option<i64> {
        self.keywords.get(&word.to_lowercase()).copied()
    }

    /// Topic ID for a URL slug
    #[must_use]
    pub fn match_slug(&self, slug: &str) -> Option<i64> {
        self.lookup(&slug.replace(['-', '_'], " "))
    }

    /// Label for a topic ID
    #[must_use]
    pub fn label(&self, id: i64) -> Option<&str> {
        usize::try_from(id)
            .ok()
            .and_then(|i| self.labels.get(i))
            .map(String::as_str)
    }

    /// All topic slugs; feeds the pattern seeder
    #[must_use]
    pub fn slugs(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.replace(' ', "-")).collect()
    }
}
