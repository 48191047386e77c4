//! Item source: skill and agent documents loaded from disk.
//!
//! A path may be a single file or a directory tree. Metadata (`name`,
//! `priority`, `type`) comes from YAML-style frontmatter lines, with
//! fallbacks derived from the path.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::semantic::preprocess::strip_frontmatter;

/// Presentation priority of an item.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Display order, most important first.
    pub const ORDERED: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    /// Case-insensitive parse; unknown or empty values are `Medium`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "critical" => Priority::Critical,
            "high" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether an item is a skill or an agent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    Skill,
    Agent,
}

impl Category {
    pub const ORDERED: [Category; 2] = [Category::Skill, Category::Agent];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Skill => "skill",
            Category::Agent => "agent",
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skill" | "skills" => Ok(Category::Skill),
            "agent" | "agents" => Ok(Category::Agent),
            other => Err(format!("unknown item type '{other}'")),
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A candidate document. Immutable once loaded.
#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    pub name: String,
    pub path: PathBuf,
    pub content: String,
    pub priority: Priority,
    pub category: Category,
}

impl Item {
    /// Build an item from file content, resolving metadata from
    /// frontmatter and path.
    pub fn from_content(path: &Path, content: String) -> Self {
        let meta = extract_metadata(&content, path);
        Self {
            name: meta.name,
            path: path.to_path_buf(),
            content,
            priority: meta.priority,
            category: meta.category,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("path does not exist: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Options for [`load_items`].
#[derive(Clone, Copy, Debug, Default)]
pub struct LoadOptions {
    /// Only accept `.md` files with a valid frontmatter block.
    pub strict: bool,
}

/// Load items from a file or recursively from a directory.
///
/// Unreadable files inside a directory are logged and skipped. Directory
/// results come back in sorted path order.
pub fn load_items(path: &Path, opts: LoadOptions) -> Result<Vec<Item>, LoadError> {
    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => LoadError::NotFound(path.to_path_buf()),
        _ => LoadError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    if !metadata.is_dir() {
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        if opts.strict && !is_valid_item_file(path, &content) {
            log::warn!("{} is not a valid item file", path.display());
            return Ok(vec![]);
        }
        return Ok(vec![Item::from_content(path, content)]);
    }

    let mut items = Vec::new();
    let walker = WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("skipping unreadable entry: {err}");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let file_path = entry.path();
        let content = match std::fs::read_to_string(file_path) {
            Ok(content) => content,
            Err(err) => {
                log::warn!("failed to read {}: {err}", file_path.display());
                continue;
            }
        };

        if opts.strict && !is_valid_item_file(file_path, &content) {
            log::debug!("skipping {}: not a valid item file", file_path.display());
            continue;
        }

        items.push(Item::from_content(file_path, content));
    }

    log::debug!("loaded {} items from {}", items.len(), path.display());

    Ok(items)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|s| s.starts_with('.')).unwrap_or(false)
}

/// Metadata resolved for one item.
#[derive(Clone, Debug, PartialEq)]
pub struct ItemMetadata {
    pub name: String,
    pub priority: Priority,
    pub category: Category,
}

/// Read `name`, `priority` and `type` from frontmatter, falling back to
/// the absolute path for the name and to path segments for the category.
pub fn extract_metadata(content: &str, path: &Path) -> ItemMetadata {
    let mut name = None;
    let mut priority = Priority::Medium;
    let mut category = None;

    for (key, value) in frontmatter_fields(content) {
        match key {
            "name" => name = Some(value.to_string()),
            "priority" => priority = Priority::parse(value),
            "type" => match value.parse::<Category>() {
                Ok(parsed) => category = Some(parsed),
                Err(err) => log::debug!("{}: {err}", path.display()),
            },
            _ => {}
        }
    }

    let name = name.unwrap_or_else(|| {
        std::path::absolute(path)
            .unwrap_or_else(|_| path.to_path_buf())
            .to_string_lossy()
            .into_owned()
    });

    ItemMetadata {
        name,
        priority,
        category: category.unwrap_or_else(|| category_from_path(path)),
    }
}

/// `agents` directory segment wins, then `skills`, otherwise skill.
pub fn category_from_path(path: &Path) -> Category {
    let path = path.to_string_lossy();
    if path.contains("/agents/") || path.contains("\\agents\\") {
        Category::Agent
    } else {
        Category::Skill
    }
}

/// Non-empty `key: value` pairs of the opening frontmatter block. Values
/// have surrounding quotes removed. Lines after an unclosed block are
/// still read, matching how a partially written header is treated.
fn frontmatter_fields(content: &str) -> Vec<(&str, &str)> {
    let mut lines = content.lines();
    match lines.next() {
        Some(first) if first.starts_with("---") => {}
        _ => return vec![],
    }

    let mut fields = Vec::new();
    for line in lines {
        let line = line.trim();
        if line == "---" {
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        if !value.is_empty() {
            fields.push((key.trim(), value));
        }
    }
    fields
}

/// True when the text opens with a closed frontmatter block that declares
/// a non-empty `name`.
pub fn has_valid_frontmatter(content: &str) -> bool {
    if strip_frontmatter(content).len() == content.len() {
        return false;
    }
    frontmatter_fields(content)
        .iter()
        .any(|(key, _)| *key == "name")
}

/// `.md` (any case) with valid frontmatter.
pub fn is_valid_item_file(path: &Path, content: &str) -> bool {
    let is_markdown = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("md"))
        .unwrap_or(false);
    is_markdown && has_valid_frontmatter(content)
}
