use anyhow::Result;
use clap::Parser;
use fireodm_runtime::Config;
use std::path::PathBuf;

mod commands;

use commands::DocumentInput;

#[derive(Debug, Parser)]
#[command(name = "fireodm", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the database (default: ~/.local/share/fireodm/fireodm.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Path to the schema file (default: ~/.config/fireodm/models.toml)
    #[arg(long, global = true)]
    schema: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Inspect the model declarations
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },
    /// Validate a document without saving it
    ///
    /// Reads a JSON object (from --json, --file or stdin), checks it against
    /// the model and prints every violation found. Exits with an error if
    /// the document is invalid. Nothing is written.
    Validate {
        /// Model id (e.g. User)
        model: String,
        #[command(flatten)]
        input: DocumentInput,
    },
    /// Validate and save a document
    ///
    /// An "id" key in the input selects the document to overwrite; without
    /// one a new id is generated. Prints the saved document.
    Save {
        model: String,
        #[command(flatten)]
        input: DocumentInput,
    },
    /// Print a stored document
    Get {
        model: String,
        id: String,
        /// Relation paths to populate (comma-separated, dotted for nesting)
        #[arg(long, value_delimiter = ',')]
        populate: Vec<String>,
        /// Maximum relation depth (default from config)
        #[arg(long)]
        depth: Option<usize>,
        /// Fail instead of skipping references whose target is missing
        #[arg(long)]
        fail_on_missing: bool,
    },
    /// List stored documents of a model
    List {
        model: String,
        /// Equality condition, e.g. --where status=draft (repeatable)
        #[arg(long = "where", value_name = "FIELD=VALUE")]
        conditions: Vec<String>,
    },
    /// Delete a stored document
    Delete { model: String, id: String },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, clap::Subcommand)]
enum SchemaAction {
    /// Print models, fields and rules
    Show {
        /// Only show this model
        model: Option<String>,
    },
    /// Check that every relation targets a declared model
    Check,
}

#[derive(Debug, clap::Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Create the config file with defaults if it does not exist
    Init,
    /// Print an example config file
    Example,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_with_overrides(cli.db, cli.schema)?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.as_str()),
    )
    .init();

    match cli.command {
        Commands::Schema { action } => match action {
            SchemaAction::Show { model } => commands::show_schema(&config, model.as_deref())?,
            SchemaAction::Check => commands::check_schema(&config)?,
        },
        Commands::Validate { model, input } => {
            commands::validate_document(&config, &model, &input)?;
        }
        Commands::Save { model, input } => {
            commands::save_document(&config, &model, &input).await?;
        }
        Commands::Get {
            model,
            id,
            populate,
            depth,
            fail_on_missing,
        } => {
            commands::get_document(&config, &model, &id, &populate, depth, fail_on_missing)
                .await?;
        }
        Commands::List { model, conditions } => {
            commands::list_documents(&config, &model, &conditions).await?;
        }
        Commands::Delete { model, id } => {
            commands::delete_document(&config, &model, &id).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show_config(&config),
            ConfigAction::Path => commands::config::show_path(),
            ConfigAction::Init => commands::config::init_config()?,
            ConfigAction::Example => commands::config::show_example(),
        },
    }

    Ok(())
}
