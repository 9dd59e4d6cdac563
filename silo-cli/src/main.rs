use clap::{Parser, Subcommand};
use colored::Colorize;
use silo_cli::migrate;

#[derive(Parser)]
#[command(name = "silo", version, about = "SILO CLI — migration generation and application")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate and apply schema migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Diff the entity registry against the last generated migration
    ///
    /// A generic `silo` binary has no way to know a host application's
    /// entity types, so this subcommand only explains how to invoke
    /// `silo_cli::migrate::generate` from the host's own binary — see
    /// `prepare_migrations` in either `demos` app's `main.rs` for a working
    /// example.
    New { name: String },
    /// Apply every migration file under `--migrations-dir` to one namespace
    Apply {
        /// Tenant namespace, or the shared public namespace
        #[arg(long)]
        namespace: String,
        /// Connection string; falls back to the `DATABASE_URL` env var
        #[arg(long)]
        database_url: Option<String>,
        /// Directory migration files are read from
        #[arg(long, default_value = "migrations")]
        migrations_dir: String,
        /// Apply the public-namespace statements instead of the tenant ones
        #[arg(long)]
        public: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Migrate { action } => match action {
            MigrateAction::New { name } => {
                println!(
                    "{}",
                    format!(
                        "`silo migrate new {name}` has no entity registry to diff against here.\n\
                         Add a small binary to your own crate that registers your entities and\n\
                         calls `silo_cli::migrate::generate(migrations_dir, public_tables, &registry, \"{name}\")`."
                    )
                    .yellow()
                );
                Ok(())
            }
            MigrateAction::Apply { namespace, database_url, migrations_dir, public } => {
                run_apply(namespace, database_url, migrations_dir, public).await
            }
        },
    };

    if let Err(err) = result {
        eprintln!("{}", format!("Error: {err}").red());
        std::process::exit(1);
    }
}

async fn run_apply(
    namespace: String,
    database_url: Option<String>,
    migrations_dir: String,
    public: bool,
) -> Result<(), String> {
    let database_url = database_url
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .ok_or_else(|| "no --database-url given and DATABASE_URL is not set".to_string())?;

    let applied = migrate::apply(&database_url, &migrations_dir, &namespace, public)
        .await
        .map_err(|err| err.to_string())?;

    println!(
        "{}",
        format!("applied {applied} migration(s) to namespace '{namespace}'").green()
    );
    Ok(())
}
