use clap::{Parser, Subcommand, ValueEnum};
use sheetdb::config::{ConnectionString, SheetsOptions, DEFAULT_MIGRATIONS_DIR};
use sheetdb::migration::{unsafe_changes, MigrationSnapshot, SchemaChange, SnapshotManager};
use sheetdb::provider::{self, SheetProvider};
use sheetdb::schema::{parse_model, ModelBuilder};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// SheetDB CLI: manage the schema migrations of a spreadsheet-backed store
#[derive(Parser)]
#[command(name = "sheetdb", version, about)]
struct Cli {
    /// Path to the model file
    #[arg(long, default_value = "model.yaml")]
    model: PathBuf,

    /// Directory holding migration artifacts and the baseline snapshot
    /// (default: the connection's MigrationPath, else "Migrations")
    #[arg(long)]
    migrations_dir: Option<PathBuf>,

    /// Connection string (default: $SHEETDB_CONNECTION)
    #[arg(long)]
    connection: Option<String>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Snapshot the current model as a new migration
    Add {
        /// Migration name
        name: String,
    },

    /// Remove the newest migration and roll the baseline back
    Remove,

    /// List migration artifacts, oldest first
    List,

    /// Compare the model with the baseline
    Status,

    /// Apply the baseline to the store and record it in history
    Update,

    /// Print the structure described by the baseline
    Script,

    /// Generate entity source from the last migration applied to the store
    Scaffold {
        /// Output file for the generated source
        #[arg(long)]
        output: PathBuf,
    },

    /// Delete every sheet of the baseline, including history and id counters
    Drop {
        /// Required; there is no undo
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let connection = match &cli.connection {
        Some(raw) => Some(ConnectionString::parse(raw)?),
        None => ConnectionString::from_env().ok(),
    };
    let migrations_dir = cli.migrations_dir.clone().unwrap_or_else(|| {
        connection
            .as_ref()
            .map(|c| PathBuf::from(c.migration_path()))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MIGRATIONS_DIR))
    });
    let manager = SnapshotManager::new(&SheetsOptions::default().with_migrations_dir(migrations_dir));

    match &cli.command {
        Command::Add { name } => {
            let current = current_snapshot(&cli, &manager)?;
            let baseline = manager.load()?;
            if !baseline.is_empty() && baseline.model_hash == current.model_hash {
                print_output(
                    &serde_json::json!({ "ok": true, "message": "No model changes since the last migration" }),
                    &cli.format,
                )?;
                return Ok(());
            }

            let changes = manager.diff(&baseline, &current);
            for change in unsafe_changes(&changes) {
                log::warn!("{}", change.describe());
            }
            let mut snapshot = current;
            let id = manager.save(&mut snapshot, name)?;
            print_output(
                &serde_json::json!({
                    "ok": true,
                    "id": id,
                    "model_hash": snapshot.model_hash,
                    "changes": describe_all(&changes),
                }),
                &cli.format,
            )?;
        }

        Command::Remove => {
            let id = manager.remove_last()?;
            print_output(&serde_json::json!({ "ok": true, "removed": id }), &cli.format)?;
        }

        Command::List => {
            let artifacts = manager.list()?;
            print_output(&serde_json::to_value(artifacts)?, &cli.format)?;
        }

        Command::Status => {
            let current = current_snapshot(&cli, &manager)?;
            let baseline = manager.load()?;
            let drift = manager.check_drift(&baseline, &current).err();
            let changes = manager.diff(&baseline, &current);
            print_output(
                &serde_json::json!({
                    "baseline": baseline.migration_id(),
                    "baseline_hash": baseline.model_hash,
                    "model_hash": current.model_hash,
                    "drift": drift.is_some() || (baseline.is_empty() && !current.is_empty()),
                    "changes": describe_all(&changes),
                    "unsafe": describe_all(unsafe_changes(&changes)),
                }),
                &cli.format,
            )?;
        }

        Command::Update => {
            let baseline = require_baseline(&manager)?;
            let store = open_store(connection.as_ref())?;
            let report = manager.apply(store.as_ref(), &baseline).await?;
            let message = if report.is_noop() {
                "The store is up to date"
            } else {
                "Migration applied"
            };
            print_output(
                &serde_json::json!({
                    "ok": true,
                    "migration": baseline.migration_id(),
                    "message": message,
                    "report": report,
                }),
                &cli.format,
            )?;
        }

        Command::Script => {
            let baseline = manager.load()?;
            let snapshot = if baseline.is_empty() {
                current_snapshot(&cli, &manager)?
            } else {
                baseline
            };
            print!("{}", manager.script(&snapshot));
        }

        Command::Scaffold { output } => {
            let store = open_store(connection.as_ref())?;
            let snapshot = manager.scaffold_source(store.as_ref()).await?;
            std::fs::write(output, sheetdb_codegen::generate_entities(&snapshot))?;
            print_output(
                &serde_json::json!({
                    "ok": true,
                    "output": output,
                    "entities": snapshot.entities.values().map(|e| e.class_name.clone()).collect::<Vec<_>>(),
                }),
                &cli.format,
            )?;
        }

        Command::Drop { force } => {
            if !*force {
                return Err("drop deletes every sheet of the model; pass --force to proceed".into());
            }
            let baseline = require_baseline(&manager)?;
            let store = open_store(connection.as_ref())?;
            let dropped = manager.drop(store.as_ref(), &baseline).await?;
            print_output(&serde_json::json!({ "ok": true, "dropped": dropped }), &cli.format)?;
        }
    }

    Ok(())
}

fn current_snapshot(
    cli: &Cli,
    manager: &SnapshotManager,
) -> Result<MigrationSnapshot, Box<dyn std::error::Error>> {
    let registry = parse_model(&cli.model)
        .map_err(|e| format!("Failed to read model '{}': {e}", cli.model.display()))?;
    Ok(manager.build(&registry, &ModelBuilder::new())?)
}

fn require_baseline(manager: &SnapshotManager) -> Result<MigrationSnapshot, Box<dyn std::error::Error>> {
    let baseline = manager.load()?;
    if baseline.is_empty() {
        return Err(format!(
            "No baseline at {}; run `sheetdb add <name>` first",
            manager.baseline_path().display()
        )
        .into());
    }
    Ok(baseline)
}

fn open_store(
    connection: Option<&ConnectionString>,
) -> Result<Arc<dyn SheetProvider>, Box<dyn std::error::Error>> {
    let connection = connection.ok_or("No connection string; pass --connection or set SHEETDB_CONNECTION")?;
    connection.validate()?;
    Ok(provider::open(connection)?)
}

fn describe_all<'a>(changes: impl IntoIterator<Item = &'a SchemaChange>) -> Vec<String> {
    changes.into_iter().map(|c| c.describe()).collect()
}

fn print_output(value: &serde_json::Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}
