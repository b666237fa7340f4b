//! Entry data model and its SurrealDB row mapping
//!
//! `MemoryEntry` is the unit of stored knowledge and also the export/import
//! interchange record, so its serde shape (camelCase field names, lowercase
//! enum tags, RFC 3339 timestamps) must stay stable.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StorageError;

/// Closed set of entry categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Decisions,
    Workflows,
    Preferences,
    People,
    Projects,
    Facts,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Decisions,
        Category::Workflows,
        Category::Preferences,
        Category::People,
        Category::Projects,
        Category::Facts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decisions => "decisions",
            Self::Workflows => "workflows",
            Self::Preferences => "preferences",
            Self::People => "people",
            Self::Projects => "projects",
            Self::Facts => "facts",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown category: {s}"))
    }
}

/// Visibility attribute of an entry. Not an access boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Workspace,
    Personal,
    Team,
    Project,
}

impl Scope {
    pub const ALL: [Scope; 4] = [Scope::Workspace, Scope::Personal, Scope::Team, Scope::Project];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workspace => "workspace",
            Self::Personal => "personal",
            Self::Team => "team",
            Self::Project => "project",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scope::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown scope: {s}"))
    }
}

/// A single stored memory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub id: String,
    pub title: String,
    pub content: String,
    pub category: Category,
    pub scope: Scope,
    pub tags: Vec<String>,
    pub token_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_accessed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub source_ref: Option<String>,
}

/// Logical collection boundary an entry belongs to.
///
/// Renders as `workspace` or `agent:<id>`; that string is also the durable
/// partition key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OwnerId {
    #[default]
    Workspace,
    Agent(String),
}

impl OwnerId {
    pub fn agent(id: impl Into<String>) -> Self {
        OwnerId::Agent(id.into())
    }

    /// Agents have a hard entry ceiling; the shared workspace does not.
    pub fn is_capacity_bounded(&self) -> bool {
        matches!(self, OwnerId::Agent(_))
    }

    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerId::Workspace => f.write_str("workspace"),
            OwnerId::Agent(id) => write!(f, "agent:{id}"),
        }
    }
}

impl FromStr for OwnerId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "workspace" {
            return Ok(OwnerId::Workspace);
        }
        match s.strip_prefix("agent:") {
            Some(id) if !id.is_empty() => Ok(OwnerId::Agent(id.to_string())),
            _ => Err(StorageError::InvalidOwner(s.to_string())),
        }
    }
}

impl TryFrom<String> for OwnerId {
    type Error = StorageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<OwnerId> for String {
    fn from(owner: OwnerId) -> Self {
        owner.to_string()
    }
}

// ---------------------------------------------------------------------------
// Database row
// ---------------------------------------------------------------------------

/// Row stored in the `memory_entries` table.
///
/// Timestamps are kept as RFC 3339 strings so they survive the round trip
/// without any datetime coercion on the database side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub owner: String,
    pub entry_id: String,
    pub title: String,
    pub content: String,
    pub category: String,
    pub scope: String,
    pub tags: Vec<String>,
    pub token_count: u64,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub last_accessed_at: Option<String>,
    pub access_count: u64,
    pub pinned: bool,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub source_ref: Option<String>,
}

// Fixed nanosecond precision keeps the strings lexicographically ordered.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

impl EntryRow {
    /// Record key parts. Stored as an array id, so no owner/entry pair can
    /// collide with another regardless of the characters either contains.
    pub fn record_key(owner: &OwnerId, entry_id: &str) -> [String; 2] {
        [owner.key(), entry_id.to_string()]
    }

    pub fn from_entry(owner: &OwnerId, entry: &MemoryEntry) -> Self {
        EntryRow {
            id: None,
            owner: owner.key(),
            entry_id: entry.id.clone(),
            title: entry.title.clone(),
            content: entry.content.clone(),
            category: entry.category.as_str().to_string(),
            scope: entry.scope.as_str().to_string(),
            tags: entry.tags.clone(),
            token_count: entry.token_count as u64,
            created_at: format_ts(&entry.created_at),
            updated_at: format_ts(&entry.updated_at),
            last_accessed_at: entry.last_accessed_at.as_ref().map(format_ts),
            access_count: entry.access_count,
            pinned: entry.pinned,
            source_type: entry.source_type.clone(),
            source_ref: entry.source_ref.clone(),
        }
    }

    pub fn into_entry(self) -> Result<MemoryEntry, StorageError> {
        let key = format!("{}/{}", self.owner, self.entry_id);
        let corrupt = |reason: String| StorageError::CorruptRow {
            key: key.clone(),
            reason,
        };
        let parse_ts = |raw: &str| {
            DateTime::parse_from_rfc3339(raw)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("bad timestamp {raw:?}: {e}")))
        };

        let created_at = parse_ts(&self.created_at)?;
        let updated_at = parse_ts(&self.updated_at)?;
        let last_accessed_at = self
            .last_accessed_at
            .as_deref()
            .map(parse_ts)
            .transpose()?;

        Ok(MemoryEntry {
            category: self.category.parse().map_err(corrupt)?,
            scope: self.scope.parse().map_err(corrupt)?,
            id: self.entry_id,
            title: self.title,
            content: self.content,
            tags: self.tags,
            token_count: self.token_count as usize,
            created_at,
            updated_at,
            last_accessed_at,
            access_count: self.access_count,
            pinned: self.pinned,
            source_type: self.source_type,
            source_ref: self.source_ref,
        })
    }
}
