use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use owo_colors::OwoColorize;
use pgdesk_branch_invariant::BranchInvariants;
use pgdesk_branch_invariant::ClassifiedIndex;
use pgdesk_branch_invariant::IndexClass;
use pgdesk_branch_invariant::InvariantConfig;
use pgdesk_branch_invariant::NewBranch;
use pgdesk_branch_invariant::ReconcileSummary;
use pgdesk_branch_invariant::RepairReport;
use pgdesk_branch_store::BranchId;
use pgdesk_branch_store::BranchRecord;
use pgdesk_branch_store::GroupId;
use pgdesk_branch_store::MemoryBranchStore;
use serde::Serialize;
use std::sync::Arc;

/// Maintenance commands over a persisted branch collection.
///
/// Every command opens the collection snapshot, performs one operation with
/// the same invariant guarantees the request handlers get, and writes the
/// collection back.
#[derive(Debug, Parser)]
#[command(name = "pgdesk", about = "Branch default-invariant maintenance")]
pub struct BranchCli {
    /// JSON snapshot of the branch collection.
    #[arg(long, global = true, env = "PGDESK_STORE", value_name = "PATH")]
    pub store: Option<PathBuf>,

    /// Optional TOML file with invariant settings.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: BranchCommand,
}

#[derive(Debug, Subcommand)]
pub enum BranchCommand {
    /// List the branches of a property group, oldest first.
    List(ListArgs),

    /// Create a branch; the first branch of a group becomes its default.
    Create(CreateArgs),

    /// Make a branch the sole default of its group.
    SetDefault(BranchArgs),

    /// Re-activate a soft-deleted branch.
    Activate(BranchArgs),

    /// Deactivate a branch that is not the default.
    Deactivate(BranchArgs),

    /// Soft-delete a branch, handing the default to the oldest sibling.
    Delete(BranchArgs),

    /// Collapse duplicate names and defaults.
    Reconcile(ReconcileArgs),

    /// Drop the unsafe unique default index and ensure the safe indexes.
    RepairIndexes,

    /// Show the collection's indexes and how they are classified.
    Inspect,
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    #[arg(long, value_name = "GROUP_ID")]
    pub group: String,

    /// Include soft-deleted branches.
    #[arg(long)]
    pub all: bool,
}

#[derive(Debug, Parser)]
pub struct CreateArgs {
    #[arg(long, value_name = "GROUP_ID")]
    pub group: String,

    #[arg(long)]
    pub name: String,

    /// Descriptive attributes stored with the branch.
    #[arg(long = "attr", value_parser = parse_attribute, value_name = "KEY=VALUE")]
    pub attributes: Vec<(String, String)>,
}

#[derive(Debug, Parser)]
pub struct BranchArgs {
    #[arg(value_name = "BRANCH_ID")]
    pub id: BranchId,
}

#[derive(Debug, Parser)]
pub struct ReconcileArgs {
    /// Only this group; every group when omitted.
    #[arg(long, value_name = "GROUP_ID")]
    pub group: Option<String>,
}

impl BranchCli {
    pub async fn run(self) -> Result<()> {
        let service = self.open_service().await?;
        let json = self.json;

        match self.command {
            BranchCommand::List(args) => {
                let records = service
                    .list(&GroupId::new(args.group), args.all)
                    .await
                    .context("failed to list branches")?;
                emit(json, records.as_slice(), print_records)
            }
            BranchCommand::Create(args) => {
                let mut new_branch = NewBranch::new(args.name);
                for (key, value) in args.attributes {
                    new_branch = new_branch.with_attribute(key, value);
                }
                let created = service
                    .create(&GroupId::new(args.group), new_branch)
                    .await
                    .context("failed to create branch")?;
                emit(json, &created, |record| print_changed("Created", record))
            }
            BranchCommand::SetDefault(args) => {
                let record = service
                    .set_default(&args.id)
                    .await
                    .with_context(|| format!("failed to make {} the default", args.id))?;
                emit(json, &record, |record| print_changed("Default is now", record))
            }
            BranchCommand::Activate(args) => {
                let record = service
                    .activate(&args.id)
                    .await
                    .with_context(|| format!("failed to activate {}", args.id))?;
                emit(json, &record, |record| print_changed("Activated", record))
            }
            BranchCommand::Deactivate(args) => {
                let record = service
                    .deactivate(&args.id)
                    .await
                    .with_context(|| format!("failed to deactivate {}", args.id))?;
                emit(json, &record, |record| print_changed("Deactivated", record))
            }
            BranchCommand::Delete(args) => {
                let record = service
                    .delete(&args.id)
                    .await
                    .with_context(|| format!("failed to delete {}", args.id))?;
                emit(json, &record, |record| print_changed("Deleted", record))
            }
            BranchCommand::Reconcile(args) => {
                let summaries = match args.group {
                    Some(group) => vec![
                        service
                            .reconcile_group(&GroupId::new(group))
                            .await
                            .context("reconciliation failed")?,
                    ],
                    None => service
                        .reconcile_all()
                        .await
                        .context("reconciliation failed")?,
                };
                emit(json, summaries.as_slice(), print_summaries)
            }
            BranchCommand::RepairIndexes => {
                let report = service
                    .repair_indexes()
                    .await
                    .context("index repair failed")?;
                emit(json, &report, print_repair)
            }
            BranchCommand::Inspect => {
                let indexes = service
                    .inspect_indexes()
                    .await
                    .context("failed to list indexes")?;
                emit(json, indexes.as_slice(), print_indexes)
            }
        }
    }

    async fn open_service(&self) -> Result<BranchInvariants> {
        let path = self
            .store
            .clone()
            .context("no branch collection given; pass --store or set PGDESK_STORE")?;

        let config = match &self.config {
            Some(config_path) => InvariantConfig::load(config_path)
                .with_context(|| format!("failed to load config from {}", config_path.display()))?,
            None => InvariantConfig::default(),
        };

        let store = MemoryBranchStore::open(&path)
            .await
            .with_context(|| format!("failed to open branch collection {}", path.display()))?;
        tracing::debug!(path = %path.display(), "opened branch collection");

        BranchInvariants::new(Arc::new(store), config).context("invalid invariant settings")
    }
}

fn emit<T, F>(json: bool, value: &T, print: F) -> Result<()>
where
    T: Serialize + ?Sized,
    F: FnOnce(&T),
{
    if json {
        let output = serde_json::to_string_pretty(value)?;
        println!("{output}");
    } else {
        print(value);
    }
    Ok(())
}

fn print_changed(verb: &str, record: &BranchRecord) {
    println!("{} {verb} {}", "✓".bright_green(), describe(record));
}

fn describe(record: &BranchRecord) -> String {
    let mut flags = Vec::new();
    if record.is_default {
        flags.push("default");
    }
    if !record.is_active {
        flags.push("inactive");
    }
    if flags.is_empty() {
        format!("{} ({})", record.name, record.id)
    } else {
        format!("{} ({}) [{}]", record.name, record.id, flags.join(", "))
    }
}

fn print_records(records: &[BranchRecord]) {
    if records.is_empty() {
        println!("No branches found.");
        return;
    }

    let name_width = records
        .iter()
        .map(|record| record.name.chars().count())
        .max()
        .unwrap_or(0)
        .max("Name".len());

    println!("{:<36}  {:<name_width$}  Default  Active  Created", "Id", "Name");
    for record in records {
        let default = if record.is_default { "yes" } else { "no" };
        let active = if record.is_active { "yes" } else { "no" };
        println!(
            "{:<36}  {:<name_width$}  {default:<7}  {active:<6}  {}",
            record.id.to_string(),
            record.name,
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
}

fn print_summaries(summaries: &[ReconcileSummary]) {
    if summaries.is_empty() {
        println!("No groups to reconcile.");
        return;
    }
    for summary in summaries {
        if summary.is_clean() {
            println!("{} {}: clean", "✓".bright_green(), summary.group_id);
        } else {
            println!(
                "{} {}: {} duplicate names retired, {} extra defaults cleared, {} default restored",
                "!".bright_yellow(),
                summary.group_id,
                summary.names_collapsed,
                summary.defaults_collapsed,
                summary.defaults_restored,
            );
        }
    }
}

fn print_repair(report: &RepairReport) {
    if !report.changed() {
        println!("{} Indexes already in place", "✓".bright_green());
    }
    for name in &report.dropped {
        println!("  dropped {name}");
    }
    for name in &report.created {
        println!("  created {name}");
    }
    for name in &report.present {
        println!("  present {name}");
    }
}

fn print_indexes(indexes: &[ClassifiedIndex]) {
    for classified in indexes {
        let keys = classified
            .index
            .keys
            .iter()
            .map(|key| key.field.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let unique = if classified.index.unique { " unique" } else { "" };
        let class = match classified.class {
            IndexClass::Safe => "safe".bright_green().to_string(),
            IndexClass::Unsafe => "unsafe".bright_red().to_string(),
            IndexClass::Other => "other".dimmed().to_string(),
        };
        println!("{:<40} {{{keys}}}{unique}  {class}", classified.index.name);
    }
}

fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| "attributes must be in KEY=VALUE form".to_string())?;
    let key = key.trim();
    if key.is_empty() {
        return Err("attributes must be in KEY=VALUE form".to_string());
    }
    Ok((key.to_string(), value.to_string()))
}
