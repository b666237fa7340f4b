//! ctxvault - token-budgeted memory for agent context
//!
//! ## Commands
//!
//! - `add` / `update` / `delete`: manage entries for one owner
//! - `list` / `show`: inspect entries (`show` records an access)
//! - `pin` / `unpin` / `touch`: adjust eviction priority
//! - `prune` / `health`: run the lifecycle policy and report utilization
//! - `export` / `import` / `clear`: bulk operations
//! - `tokens`: token cost of a piece of text

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use ctxvault_core::memory::lifecycle::importance_score;
use ctxvault_core::{
    count_tokens, format_token_count, Category, EntryOptions, EntryPatch, InsertOutcome,
    LifecycleConfig, MemoryEntry, MemoryRegistry, NewEntry, OwnerId, Scope, TOKEN_BUDGET,
};
use ctxvault_state::handle::DEFAULT_LOCAL_PATH;
use ctxvault_state::SurrealStorageBackend;

#[derive(Parser)]
#[command(name = "ctxvault")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Token-budgeted memory for agent context", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Collection to operate on: `workspace` or `agent:<id>`
    #[arg(long, global = true, env = "CTXVAULT_OWNER", default_value = "workspace")]
    owner: OwnerId,

    /// Local database directory, used when no SurrealDB endpoint is configured
    #[arg(long, global = true, env = "CTXVAULT_DB", default_value = DEFAULT_LOCAL_PATH)]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save a new entry
    Add {
        #[arg(short, long, default_value = "")]
        title: String,

        /// Entry body
        #[arg(short, long, conflicts_with = "file")]
        content: Option<String>,

        /// Read the entry body from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        #[arg(long, default_value = "facts")]
        category: Category,

        /// Repeat for several tags
        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long, default_value = "workspace")]
        scope: Scope,

        /// Pin the entry so pruning never removes it
        #[arg(long)]
        pin: bool,

        /// Where the entry came from (e.g. manual, template)
        #[arg(long, default_value = "manual")]
        source: String,

        #[arg(long)]
        source_ref: Option<String>,
    },

    /// List entries, oldest first
    List {
        #[arg(long)]
        category: Option<Category>,

        /// Only pinned entries
        #[arg(long)]
        pinned: bool,
    },

    /// Print one entry and record the access
    Show { id: String },

    /// Change fields of an entry
    Update {
        id: String,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long)]
        content: Option<String>,

        #[arg(long)]
        category: Option<Category>,

        /// Replaces all tags; repeat for several
        #[arg(long = "tag")]
        tags: Option<Vec<String>>,

        #[arg(long)]
        scope: Option<Scope>,
    },

    /// Delete an entry
    Delete { id: String },

    /// Record an access without printing the entry
    Touch { id: String },

    /// Pin an entry
    Pin { id: String },

    /// Unpin an entry
    Unpin { id: String },

    /// Remove expired, stale and (for agents) lowest-importance entries
    Prune,

    /// Show utilization and a recommendation
    Health,

    /// Write all entries as JSON
    Export {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replace all entries with the contents of an export file
    Import { path: PathBuf },

    /// Delete every entry for the owner
    Clear {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Token cost of some text
    Tokens { text: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    ctxvault_core::init_tracing(cli.json, level);

    if let Commands::Tokens { text } = &cli.command {
        return cmd_tokens(text);
    }

    let backend = SurrealStorageBackend::from_env(&cli.db)
        .await
        .context("Failed to connect to ctxvault database")?;
    let registry = MemoryRegistry::new(Arc::new(backend));
    let owner = &cli.owner;

    match cli.command {
        Commands::Add {
            title,
            content,
            file,
            category,
            tags,
            scope,
            pin,
            source,
            source_ref,
        } => {
            let content = match (content, file) {
                (Some(content), _) => content,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => String::new(),
            };
            let new = NewEntry::new(title, content, category)
                .with_tags(tags)
                .with_scope(scope);
            let opts = EntryOptions::default()
                .pinned(pin)
                .source(source, source_ref);
            cmd_add(&registry, owner, new, opts).await
        }
        Commands::List { category, pinned } => cmd_list(&registry, owner, category, pinned).await,
        Commands::Show { id } => cmd_show(&registry, owner, &id).await,
        Commands::Update {
            id,
            title,
            content,
            category,
            tags,
            scope,
        } => {
            let patch = EntryPatch {
                title,
                content,
                category,
                tags,
                scope,
            };
            cmd_update(&registry, owner, &id, patch).await
        }
        Commands::Delete { id } => cmd_delete(&registry, owner, &id).await,
        Commands::Touch { id } => cmd_touch(&registry, owner, &id).await,
        Commands::Pin { id } => cmd_pin(&registry, owner, &id, true).await,
        Commands::Unpin { id } => cmd_pin(&registry, owner, &id, false).await,
        Commands::Prune => {
            let config = LifecycleConfig::from_env().context("Invalid lifecycle configuration")?;
            cmd_prune(&registry, owner, &config).await
        }
        Commands::Health => {
            let config = LifecycleConfig::from_env().context("Invalid lifecycle configuration")?;
            cmd_health(&registry, owner, &config).await
        }
        Commands::Export { output } => cmd_export(&registry, owner, output.as_deref()).await,
        Commands::Import { path } => cmd_import(&registry, owner, &path).await,
        Commands::Clear { yes } => cmd_clear(&registry, owner, yes).await,
        Commands::Tokens { text } => cmd_tokens(&text),
    }
}

fn print_entry_line(entry: &MemoryEntry) {
    let pin = if entry.pinned { "*" } else { " " };
    println!(
        "{pin} {}  {:<11} {:>7}  {}",
        entry.id,
        entry.category.as_str(),
        format_token_count(entry.token_count),
        entry.title
    );
}

async fn cmd_add(
    registry: &MemoryRegistry,
    owner: &OwnerId,
    new: NewEntry,
    opts: EntryOptions,
) -> Result<()> {
    let store = registry.store(owner).await?;
    match store.insert(new, opts).await.context("Failed to save entry")? {
        InsertOutcome::Inserted(entry) => {
            info!(entry_id = %entry.id, "entry saved");
            println!("Saved {} ({} tokens)", entry.id, entry.token_count);
            Ok(())
        }
        InsertOutcome::Rejected(rejection) => {
            bail!("Not saved for {owner}: {rejection}")
        }
    }
}

async fn cmd_list(
    registry: &MemoryRegistry,
    owner: &OwnerId,
    category: Option<Category>,
    pinned_only: bool,
) -> Result<()> {
    let store = registry.store(owner).await?;
    let entries: Vec<MemoryEntry> = store
        .snapshot()
        .await
        .into_iter()
        .filter(|e| category.map_or(true, |c| e.category == c))
        .filter(|e| !pinned_only || e.pinned)
        .collect();

    if entries.is_empty() {
        println!("No entries for {owner}");
        return Ok(());
    }
    for entry in &entries {
        print_entry_line(entry);
    }
    println!(
        "{} entries, {} of {} tokens",
        entries.len(),
        format_token_count(store.total_tokens().await),
        format_token_count(store.budget())
    );
    Ok(())
}

async fn cmd_show(registry: &MemoryRegistry, owner: &OwnerId, id: &str) -> Result<()> {
    let store = registry.store(owner).await?;
    let Some(entry) = store.record_access(id).await? else {
        bail!("No entry {id} for {owner}");
    };

    println!("{}", entry.title);
    println!("id:         {}", entry.id);
    println!("category:   {}", entry.category);
    println!("scope:      {}", entry.scope);
    if !entry.tags.is_empty() {
        println!("tags:       {}", entry.tags.join(", "));
    }
    println!("tokens:     {}", entry.token_count);
    println!("pinned:     {}", entry.pinned);
    println!("accesses:   {}", entry.access_count);
    println!("importance: {}", importance_score(&entry, Utc::now()));
    println!("created:    {}", entry.created_at.to_rfc3339());
    println!("updated:    {}", entry.updated_at.to_rfc3339());
    if let Some(source) = &entry.source_type {
        match &entry.source_ref {
            Some(r) => println!("source:     {source} ({r})"),
            None => println!("source:     {source}"),
        }
    }
    println!();
    println!("{}", entry.content);
    Ok(())
}

async fn cmd_update(
    registry: &MemoryRegistry,
    owner: &OwnerId,
    id: &str,
    patch: EntryPatch,
) -> Result<()> {
    let store = registry.store(owner).await?;
    match store.update(id, patch).await? {
        Some(entry) => {
            println!("Updated {} ({} tokens)", entry.id, entry.token_count);
            let total = store.total_tokens().await;
            if total > store.budget() {
                println!(
                    "Warning: {owner} now holds {} tokens, over the {} budget",
                    format_token_count(total),
                    format_token_count(store.budget())
                );
            }
        }
        None => println!("No entry {id} for {owner}"),
    }
    Ok(())
}

async fn cmd_delete(registry: &MemoryRegistry, owner: &OwnerId, id: &str) -> Result<()> {
    let store = registry.store(owner).await?;
    match store.delete(id).await? {
        Some(entry) => println!("Deleted {} ({} tokens freed)", entry.id, entry.token_count),
        None => println!("No entry {id} for {owner}"),
    }
    Ok(())
}

async fn cmd_touch(registry: &MemoryRegistry, owner: &OwnerId, id: &str) -> Result<()> {
    let store = registry.store(owner).await?;
    match store.record_access(id).await? {
        Some(entry) => println!("{} accessed {} times", entry.id, entry.access_count),
        None => println!("No entry {id} for {owner}"),
    }
    Ok(())
}

async fn cmd_pin(registry: &MemoryRegistry, owner: &OwnerId, id: &str, pinned: bool) -> Result<()> {
    let store = registry.store(owner).await?;
    let verb = if pinned { "Pinned" } else { "Unpinned" };
    match store.set_pinned(id, pinned).await? {
        Some(entry) => println!("{verb} {}", entry.id),
        None => println!("No entry {id} for {owner}"),
    }
    Ok(())
}

async fn cmd_prune(
    registry: &MemoryRegistry,
    owner: &OwnerId,
    config: &LifecycleConfig,
) -> Result<()> {
    let result = registry.prune(owner, config).await?;

    println!(
        "Pruned {} entries from {owner}, {} tokens freed",
        result.deleted_count,
        format_token_count(result.freed_tokens)
    );
    for id in &result.deleted_ids {
        println!("  - {id}");
    }
    if !result.failures.is_empty() {
        for failure in &result.failures {
            println!(
                "  ! {} ({}): {}",
                failure.entry_id, failure.phase, failure.message
            );
        }
        bail!(
            "{} deletions failed; re-run prune to retry",
            result.failures.len()
        );
    }
    Ok(())
}

async fn cmd_health(
    registry: &MemoryRegistry,
    owner: &OwnerId,
    config: &LifecycleConfig,
) -> Result<()> {
    let report = registry.health(Some(owner), Some(config)).await?;

    println!("Health for {owner}");
    println!("  entries:  {}", report.total_entries);
    println!(
        "  tokens:   {} / {} ({:.1}%)",
        format_token_count(report.total_tokens),
        format_token_count(config.max_total_tokens),
        report.token_budget_usage_pct
    );
    println!("  pinned:   {}", report.pinned_count);
    println!("  stale:    {}", report.stale_count);
    println!("  expired:  {}", report.expired_count);
    println!("  status:   {}", report.recommendation);
    Ok(())
}

async fn cmd_export(registry: &MemoryRegistry, owner: &OwnerId, output: Option<&Path>) -> Result<()> {
    let store = registry.store(owner).await?;
    let json = store.export_json().await.context("Failed to export entries")?;

    match output {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Exported {} entries to {}", store.len().await, path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn cmd_import(registry: &MemoryRegistry, owner: &OwnerId, path: &Path) -> Result<()> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let store = registry.store(owner).await?;
    store
        .import_json(&json)
        .await
        .with_context(|| format!("Failed to import {}", path.display()))?;

    let total = store.total_tokens().await;
    println!(
        "Imported {} entries ({} tokens) into {owner}",
        store.len().await,
        format_token_count(total)
    );
    if total > TOKEN_BUDGET {
        println!("Warning: imported collection is over the token budget; run `ctxvault prune`");
    }
    Ok(())
}

async fn cmd_clear(registry: &MemoryRegistry, owner: &OwnerId, yes: bool) -> Result<()> {
    if !yes {
        bail!("Refusing to clear {owner} without --yes");
    }
    let store = registry.store(owner).await?;
    store.clear_all().await?;
    println!("Cleared {owner}");
    Ok(())
}

fn cmd_tokens(text: &str) -> Result<()> {
    let tokens = count_tokens(text);
    println!("{tokens} tokens ({})", format_token_count(tokens));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxvault_state::fakes::MemoryStorageBackend;

    fn registry() -> (MemoryRegistry, Arc<MemoryStorageBackend>) {
        let backend = Arc::new(MemoryStorageBackend::new());
        (MemoryRegistry::new(backend.clone()), backend)
    }

    fn note(title: &str, content: &str) -> NewEntry {
        NewEntry::new(title, content, Category::Facts)
    }

    #[test]
    fn test_cli_parses_owner_and_flags() {
        let cli = Cli::try_parse_from([
            "ctxvault",
            "--owner",
            "agent:planner",
            "add",
            "--title",
            "t",
            "--content",
            "c",
            "--category",
            "decisions",
            "--tag",
            "a",
            "--tag",
            "b",
            "--pin",
        ])
        .unwrap();
        assert_eq!(cli.owner, OwnerId::agent("planner"));
        match cli.command {
            Commands::Add {
                category,
                tags,
                pin,
                ..
            } => {
                assert_eq!(category, Category::Decisions);
                assert_eq!(tags, vec!["a", "b"]);
                assert!(pin);
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn test_cli_rejects_bad_owner() {
        assert!(Cli::try_parse_from(["ctxvault", "--owner", "robot", "health"]).is_err());
    }

    #[tokio::test]
    async fn test_add_list_show_delete() {
        let (registry, _) = registry();
        let owner = OwnerId::Workspace;

        cmd_add(&registry, &owner, note("first", "hello"), EntryOptions::default())
            .await
            .unwrap();
        let store = registry.store(&owner).await.unwrap();
        let id = store.snapshot().await[0].id.clone();

        cmd_list(&registry, &owner, None, false).await.unwrap();
        cmd_show(&registry, &owner, &id).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().access_count, 1);

        cmd_delete(&registry, &owner, &id).await.unwrap();
        assert!(store.is_empty().await);
        // Unknown id is reported, not an error
        cmd_delete(&registry, &owner, &id).await.unwrap();
        assert!(cmd_show(&registry, &owner, &id).await.is_err());
    }

    #[tokio::test]
    async fn test_add_over_budget_fails() {
        let (registry, _) = registry();
        let owner = OwnerId::agent("big");
        let huge = "x".repeat(TOKEN_BUDGET * 4 + 1);
        let err = cmd_add(&registry, &owner, note("huge", &huge), EntryOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("token budget exceeded"));
    }

    #[tokio::test]
    async fn test_pin_update_touch() {
        let (registry, _) = registry();
        let owner = OwnerId::Workspace;
        cmd_add(&registry, &owner, note("t", "abcd"), EntryOptions::default())
            .await
            .unwrap();
        let store = registry.store(&owner).await.unwrap();
        let id = store.snapshot().await[0].id.clone();

        cmd_pin(&registry, &owner, &id, true).await.unwrap();
        assert_eq!(store.pinned_ids().await, vec![id.clone()]);
        cmd_pin(&registry, &owner, &id, false).await.unwrap();
        assert!(store.pinned_ids().await.is_empty());

        cmd_update(
            &registry,
            &owner,
            &id,
            EntryPatch::default().content("a".repeat(12)),
        )
        .await
        .unwrap();
        assert_eq!(store.get(&id).await.unwrap().token_count, 3);

        cmd_touch(&registry, &owner, &id).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().access_count, 1);
    }

    #[tokio::test]
    async fn test_export_import_files() {
        let (registry, _) = registry();
        let owner = OwnerId::Workspace;
        cmd_add(&registry, &owner, note("a", "alpha"), EntryOptions::default())
            .await
            .unwrap();
        cmd_add(
            &registry,
            &owner,
            note("b", "beta"),
            EntryOptions::default().pinned(true),
        )
        .await
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        cmd_export(&registry, &owner, Some(&path)).await.unwrap();

        let target = OwnerId::agent("copy");
        cmd_import(&registry, &target, &path).await.unwrap();

        let source = registry.store(&owner).await.unwrap().snapshot().await;
        let copied = registry.store(&target).await.unwrap().snapshot().await;
        assert_eq!(source, copied);
    }

    #[tokio::test]
    async fn test_clear_requires_confirmation() {
        let (registry, backend) = registry();
        let owner = OwnerId::Workspace;
        cmd_add(&registry, &owner, note("a", "alpha"), EntryOptions::default())
            .await
            .unwrap();

        assert!(cmd_clear(&registry, &owner, false).await.is_err());
        assert_eq!(backend.fake(&owner).stored().len(), 1);

        cmd_clear(&registry, &owner, true).await.unwrap();
        assert!(backend.fake(&owner).stored().is_empty());
    }

    #[tokio::test]
    async fn test_prune_and_health() {
        let (registry, _) = registry();
        let owner = OwnerId::agent("coder");
        for i in 0..4 {
            cmd_add(
                &registry,
                &owner,
                note(&format!("n{i}"), "content"),
                EntryOptions::default(),
            )
            .await
            .unwrap();
        }
        let config = LifecycleConfig {
            max_entries_per_owner: 2,
            ..LifecycleConfig::default()
        };
        cmd_prune(&registry, &owner, &config).await.unwrap();
        assert_eq!(registry.store(&owner).await.unwrap().len().await, 2);

        cmd_health(&registry, &owner, &config).await.unwrap();
    }

    #[test]
    fn test_tokens() {
        cmd_tokens("seventeen chars!!").unwrap();
    }
}
