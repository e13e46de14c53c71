use anyhow::Result;
use clap::{CommandFactory, Parser};
use color_eyre::config::HookBuilder;
use osspilot_core::{load_config, Context, LoggingConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod handlers;
mod wizard;

/// osspilot - CLI pour le stockage d'objets Autodesk Platform Services
#[derive(Parser, Debug)]
#[command(name = "osspilot")]
#[command(author = "Kev <kev@m7academy.com>")]
#[command(version)]
#[command(about = "Uploads rate-limités et reprenables vers le stockage d'objets", long_about = None)]
struct Cli {
    /// Logs détaillés (niveau debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Délai maximal de l'opération, en secondes
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Access token (prioritaire sur la configuration)
    #[arg(long, global = true, env = "OSSPILOT_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Sous-commande à exécuter
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Uploader un fichier dans un bucket
    Upload {
        /// Fichier local à uploader
        file: PathBuf,
        /// Bucket cible
        #[arg(short, long)]
        bucket: String,
        /// Nom de l'objet (défaut: nom du fichier)
        #[arg(short, long)]
        name: Option<String>,
        /// Afficher la barre de progression
        #[arg(short, long)]
        progress: bool,
        /// Reprendre une session d'upload par morceaux interrompue
        #[arg(long, requires = "offset")]
        session: Option<String>,
        /// Premier octet non acquitté de la session reprise
        #[arg(long, requires = "session")]
        offset: Option<u64>,
    },

    /// Détails d'un objet
    Details {
        bucket: String,
        object: String,
        /// Sortie JSON brute
        #[arg(long)]
        json: bool,
    },

    /// Attendre la recombinaison d'un objet uploadé par morceaux
    Wait { bucket: String, object: String },

    /// Limites de débit par endpoint
    Limits {
        #[command(subcommand)]
        action: LimitsAction,
    },

    /// Gestion de la configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Shell completion
    Completion {
        /// Shell type (bash, zsh, fish, elvish, powershell)
        shell: String,
    },
}

#[derive(clap::Subcommand, Debug)]
enum LimitsAction {
    /// Lister les règles et leurs plafonds
    List {
        /// Filtrer par méthode HTTP
        #[arg(short, long)]
        method: Option<String>,
    },
    /// Afficher la limite appliquée à une requête
    Resolve { method: String, url: String },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Configuration initiale (wizard interactif)
    Init,
    /// Afficher la configuration actuelle
    Show,
    /// Valider la configuration
    Validate,
    /// Chemin du fichier de configuration
    Path,
}

/// Install the tracing subscriber; RUST_LOG wins over the configured level
fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup error handling
    if let Err(e) = HookBuilder::default().install() {
        eprintln!("Warning: Failed to install error handler: {}", e);
    }

    // Parse CLI arguments
    let cli = Cli::parse();

    let logging = load_config().map(|c| c.logging).unwrap_or_default();
    init_logging(cli.verbose, &logging);

    // Ctrl-C cancels whatever is in flight
    let mut ctx = Context::new();
    if let Some(secs) = cli.timeout {
        ctx = ctx.with_timeout(Duration::from_secs(secs));
    }
    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nInterrupted, cancelling...");
                ctx.cancel();
            }
        });
    }

    tracing::debug!(command = ?cli.command, timeout = ?cli.timeout, "starting");
    let token = cli.token.as_deref();

    // Execute command
    match cli.command {
        Commands::Upload {
            file,
            bucket,
            name,
            progress,
            session,
            offset,
        } => {
            let resume = session.as_deref().zip(offset);
            handlers::handle_upload(&ctx, token, &file, &bucket, name.as_deref(), progress, resume)
                .await
        }
        Commands::Details {
            bucket,
            object,
            json,
        } => handlers::handle_details(&ctx, token, &bucket, &object, json).await,
        Commands::Wait { bucket, object } => {
            handlers::handle_wait(&ctx, token, &bucket, &object).await
        }
        Commands::Limits { action } => match action {
            LimitsAction::List { method } => handlers::handle_limits_list(method.as_deref()),
            LimitsAction::Resolve { method, url } => handlers::handle_limits_resolve(&method, &url),
        },
        Commands::Config { action } => {
            let action_str = match action {
                ConfigAction::Init => "init",
                ConfigAction::Show => "show",
                ConfigAction::Validate => "validate",
                ConfigAction::Path => "path",
            };
            handlers::handle_config(action_str).await
        }
        Commands::Completion { shell } => {
            handlers::handle_completion(&shell, &mut Cli::command()).await
        }
    }
}
