//! Linkboard CLI - command-line access to the bookmark board
//!
//! Usage: linkboard-cli [OPTIONS] <COMMAND>
//!
//! Works directly on the local database. Supports JSON output for scripting.

use clap::{Parser, Subcommand};
use linkboard_lib::board::{Board, BookmarkView, BoardSnapshot};
use linkboard_lib::db::{Database, IconLookupEntry};
use linkboard_lib::icons::{candidate_keys, match_icon, normalize_key, IconKind};
use linkboard_lib::ordering::BookmarkMove;
use linkboard_lib::settings::Settings;
use linkboard_lib::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "linkboard-cli")]
#[command(version, about = "Linkboard bookmark board CLI", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Database path (default: LINKBOARD_DB, settings, then the data directory)
    #[arg(long, global = true)]
    db: Option<String>,

    /// Output as JSON for scripting
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the board: groups in order with their bookmarks
    Show,
    /// Group operations
    Group {
        #[command(subcommand)]
        cmd: GroupCommands,
    },
    /// Bookmark operations
    Bookmark {
        #[command(subcommand)]
        cmd: BookmarkCommands,
    },
    /// Icon matching and resolution
    Icon {
        #[command(subcommand)]
        cmd: IconCommands,
    },
    /// Manage the website → icon lookup table
    Lookup {
        #[command(subcommand)]
        cmd: LookupCommands,
    },
}

#[derive(Subcommand)]
enum GroupCommands {
    /// Create a group at the end of the board
    Add { name: String },
    Rename { id: String, name: String },
    /// Delete a group and every bookmark in it
    Remove { id: String },
    /// Move a group to a 0-based position
    Move { id: String, index: usize },
}

#[derive(Subcommand)]
enum BookmarkCommands {
    /// Add a bookmark at the end of a group
    Add {
        name: String,
        url: String,
        /// Target group id
        #[arg(long, short)]
        group: String,
        /// Icon URL, data: URI or text:<letter>
        #[arg(long)]
        icon: Option<String>,
    },
    Edit {
        id: String,
        name: String,
        url: String,
        #[arg(long)]
        icon: Option<String>,
    },
    Remove { id: String },
    /// Move a bookmark to a 0-based position in a group
    Move {
        id: String,
        /// Destination group id
        #[arg(long)]
        to: String,
        #[arg(long, default_value = "0")]
        index: usize,
    },
}

#[derive(Subcommand)]
enum IconCommands {
    /// Show the lookup keys tried for a URL and the first hit
    Match { url: String },
    /// Probe icon candidates for a URL
    Resolve {
        url: String,
        #[arg(long, default_value = "")]
        name: String,
        /// Stored icon to preselect
        #[arg(long)]
        selected: Option<String>,
    },
}

#[derive(Subcommand)]
enum LookupCommands {
    List,
    Add { website: String, icon: String },
    Remove { website: String },
    /// Import entries from a JSON file: `[{"website","icon"}]` or `{"website": "icon"}`
    Import { file: PathBuf },
}

/// Accepted shapes of a lookup import file.
#[derive(Deserialize)]
#[serde(untagged)]
enum LookupFile {
    Rows(Vec<IconLookupEntry>),
    Map(BTreeMap<String, String>),
}

impl LookupFile {
    fn into_entries(self) -> Vec<IconLookupEntry> {
        match self {
            LookupFile::Rows(rows) => rows,
            LookupFile::Map(map) => map
                .into_iter()
                .map(|(website, icon)| IconLookupEntry { website, icon })
                .collect(),
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run_cli(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_cli(cli: Cli) -> Result<()> {
    let settings = Settings::from_environment();
    let db_path = settings.resolve_db_path(cli.db.as_deref());
    ensure_parent(&db_path)?;
    let db = Database::new(&db_path)?;
    let board = Board::open(db, settings)?;

    match cli.command {
        Commands::Show => handle_show(&board, cli.json),
        Commands::Group { cmd } => handle_group(cmd, &board, cli.json),
        Commands::Bookmark { cmd } => handle_bookmark(cmd, &board, cli.json).await,
        Commands::Icon { cmd } => handle_icon(cmd, &board, cli.json).await,
        Commands::Lookup { cmd } => handle_lookup(cmd, &board, cli.json),
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

// ============================================================================
// Output helpers
// ============================================================================

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value)?;
    println!("{}", out);
    Ok(())
}

fn short_id(id: &str) -> &str {
    id.char_indices().nth(8).map(|(i, _)| &id[..i]).unwrap_or(id)
}

fn icon_label(view: &BookmarkView) -> String {
    match view.display_icon.kind {
        IconKind::Glyph => format!("[{}]", view.display_icon.value),
        IconKind::Image if view.display_icon.value.starts_with("data:") => "[img]".to_string(),
        IconKind::Image => "[url]".to_string(),
    }
}

fn print_snapshot(snapshot: &BoardSnapshot) {
    for group in &snapshot.groups {
        println!("{} {}  ({})", short_id(&group.group.id), group.group.name, group.bookmarks.len());
        for b in &group.bookmarks {
            println!(
                "  {:>3}. {} {} {}  {}",
                b.bookmark.rank,
                short_id(&b.bookmark.id),
                icon_label(b),
                b.bookmark.name,
                b.bookmark.url
            );
        }
    }
    if !snapshot.orphans.is_empty() {
        println!("(no group)");
        for b in &snapshot.orphans {
            println!("       {} {} {}  {}", short_id(&b.bookmark.id), icon_label(b), b.bookmark.name, b.bookmark.url);
        }
    }
}

fn print_board(snapshot: &BoardSnapshot, json: bool) -> Result<()> {
    if json {
        print_json(snapshot)
    } else {
        print_snapshot(snapshot);
        Ok(())
    }
}

// ============================================================================
// Handlers
// ============================================================================

fn handle_show(board: &Board, json: bool) -> Result<()> {
    let snapshot = board.load()?;
    if !json && snapshot.groups.is_empty() && snapshot.orphans.is_empty() {
        println!("Board is empty. Create a group with `linkboard-cli group add <name>`.");
        return Ok(());
    }
    print_board(&snapshot, json)
}

fn handle_group(cmd: GroupCommands, board: &Board, json: bool) -> Result<()> {
    match cmd {
        GroupCommands::Add { name } => {
            let group = board.add_group(&name)?;
            if json {
                print_json(&group)?;
            } else {
                println!("Created group '{}' ({}) at rank {}", group.name, group.id, group.rank);
            }
        }
        GroupCommands::Rename { id, name } => {
            let group = board.rename_group(&id, &name)?;
            if json {
                print_json(&group)?;
            } else {
                println!("Renamed group {} to '{}'", short_id(&group.id), group.name);
            }
        }
        GroupCommands::Remove { id } => {
            let removed = board.remove_group(&id)?;
            if json {
                print_json(&serde_json::json!({"id": id, "bookmarks_removed": removed}))?;
            } else {
                println!("Removed group {} and {} bookmark(s)", short_id(&id), removed);
            }
        }
        GroupCommands::Move { id, index } => {
            let snapshot = board.move_group(&id, index)?;
            print_board(&snapshot, json)?;
        }
    }
    Ok(())
}

async fn handle_bookmark(cmd: BookmarkCommands, board: &Board, json: bool) -> Result<()> {
    match cmd {
        BookmarkCommands::Add { name, url, group, icon } => {
            let bookmark = board.add_bookmark(Some(&group), &name, &url, icon.as_deref()).await?;
            if json {
                print_json(&bookmark)?;
            } else {
                println!("Added '{}' ({}) at rank {}", bookmark.name, bookmark.id, bookmark.rank);
            }
        }
        BookmarkCommands::Edit { id, name, url, icon } => {
            let bookmark = board.edit_bookmark(&id, &name, &url, icon.as_deref()).await?;
            if json {
                print_json(&bookmark)?;
            } else {
                println!("Updated '{}'", bookmark.name);
            }
        }
        BookmarkCommands::Remove { id } => {
            board.remove_bookmark(&id)?;
            if json {
                print_json(&serde_json::json!({"id": id, "removed": true}))?;
            } else {
                println!("Removed bookmark {}", short_id(&id));
            }
        }
        BookmarkCommands::Move { id, to, index } => {
            let mv = BookmarkMove { bookmark_id: id, to_group_id: to, to_index: index };
            let snapshot = board.move_bookmark(&mv)?;
            print_board(&snapshot, json)?;
        }
    }
    Ok(())
}

async fn handle_icon(cmd: IconCommands, board: &Board, json: bool) -> Result<()> {
    let lookup = board.lookup_table();
    match cmd {
        IconCommands::Match { url } => {
            let keys = candidate_keys(&url).unwrap_or_default();
            let hit = match_icon(&url, &lookup);
            if json {
                print_json(&serde_json::json!({"url": url, "keys": keys, "icon": hit}))?;
            } else {
                for key in &keys {
                    let marker = if lookup.get(key).is_some() { "*" } else { " " };
                    println!("{} {}", marker, key);
                }
                match hit {
                    Some(icon) => println!("Match: {}", icon),
                    None => println!("No match"),
                }
            }
        }
        IconCommands::Resolve { url, name, selected } => {
            let choices = board.resolve_icons(&lookup, &name, &url, selected.as_deref()).await;
            if json {
                print_json(&choices)?;
            } else if choices.is_empty() {
                println!("No candidates (empty URL)");
            } else {
                for (i, option) in choices.options.iter().enumerate() {
                    let marker = if choices.selected == Some(i) { ">" } else { " " };
                    println!("{} {}", marker, option.to_stored());
                }
            }
        }
    }
    Ok(())
}

fn handle_lookup(cmd: LookupCommands, board: &Board, json: bool) -> Result<()> {
    let db = board.db();
    match cmd {
        LookupCommands::List => {
            let rows = db.get_icon_lookup()?;
            if json {
                print_json(&rows)?;
            } else {
                for row in &rows {
                    println!("{}  {}", row.website, row.icon);
                }
                println!("{} entries", rows.len());
            }
        }
        LookupCommands::Add { website, icon } => {
            let entry = lookup_entry(&website, &icon)?;
            db.upsert_icon_lookup(&entry)?;
            if json {
                print_json(&entry)?;
            } else {
                println!("{} -> {}", entry.website, entry.icon);
            }
        }
        LookupCommands::Remove { website } => {
            let removed = db.delete_icon_lookup(&normalize_key(&website))?;
            if removed == 0 {
                return Err(Error::not_found("lookup entry", website));
            }
            if json {
                print_json(&serde_json::json!({"website": website, "removed": true}))?;
            } else {
                println!("Removed {}", website);
            }
        }
        LookupCommands::Import { file } => {
            let content = std::fs::read_to_string(&file)?;
            let parsed: LookupFile = serde_json::from_str(&content)
                .map_err(|e| Error::invalid(format!("{}: {}", file.display(), e)))?;

            let mut imported = 0;
            let mut skipped = 0;
            for row in parsed.into_entries() {
                match lookup_entry(&row.website, &row.icon) {
                    Ok(entry) => {
                        db.upsert_icon_lookup(&entry)?;
                        imported += 1;
                    }
                    Err(_) => skipped += 1,
                }
            }
            if json {
                print_json(&serde_json::json!({"imported": imported, "skipped": skipped}))?;
            } else {
                println!("Imported {} entries ({} skipped)", imported, skipped);
            }
        }
    }
    Ok(())
}

/// Normalized row, rejecting empty keys and icons.
fn lookup_entry(website: &str, icon: &str) -> Result<IconLookupEntry> {
    let website = normalize_key(website.trim());
    let icon = icon.trim();
    if website.is_empty() || icon.is_empty() {
        return Err(Error::invalid("website and icon are required"));
    }
    Ok(IconLookupEntry { website, icon: icon.to_string() })
}
