//! market-cli: Browse and manage your own book listings from a terminal.
//!
//! Uses the same view model as a browser front-end would, backed by the
//! in-memory store and auth provider seeded from `config.json`.

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use market_cli::{Config, render_view};
use market_sync::{
    DeleteOutcome, FormValues, Listing, ListingViewModel, LoginController, NotificationSink,
    SessionStore, TracingNotifier,
};

#[derive(Parser, Debug)]
#[command(name = "market-cli")]
#[command(about = "Manage your book listings")]
struct Args {
    /// Directory holding config.json
    #[arg(long, env = "MARKET_CONFIG_PATH", default_value = "./market-data")]
    config_path: String,

    /// Account to sign in as
    #[arg(short, long, env = "MARKET_EMAIL")]
    email: String,

    /// Account password
    #[arg(short, long, env = "MARKET_PASSWORD")]
    password: String,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show your listings (default)
    List,
    /// Delete a listing
    Delete {
        id: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Set quantity to zero and mark a listing out of stock
    MarkSold { id: String },
}

fn ask(prompt: &str) -> bool {
    print!("{} [y/N] ", prompt);
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn find_listing(view: &ListingViewModel, id: &str) -> Result<Listing> {
    view.snapshot()
        .and_then(|snapshot| snapshot.get(id).cloned())
        .with_context(|| format!("You have no listing with id {}", id))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,market_sync=debug,market_cli=debug"
    } else {
        "info,market_sync=warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(&args.config_path)?;
    info!(
        "Using collection {:?} owned by {:?}",
        config.collection.name, config.collection.owner_field
    );

    let store = Arc::new(config.seed_store()?);
    let provider = Arc::new(config.seed_provider());
    let notifier: Arc<dyn NotificationSink> = Arc::new(TracingNotifier);

    let session = SessionStore::new(provider.clone());
    let view = ListingViewModel::mount(
        Arc::clone(&session),
        store.clone(),
        Arc::clone(&notifier),
        config.collection.clone(),
    );

    // No persisted session to restore.
    provider.resolve(None);

    let login = LoginController::new(provider.clone(), notifier);
    let form: FormValues = [("email", &args.email), ("password", &args.password)]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect();
    let principal = login.sign_in(&form).await.context("Sign in failed")?;
    debug!("Signed in as {}", principal.email);

    let changed = match args.command.unwrap_or(Command::List) {
        Command::List => false,
        Command::Delete { id, yes } => {
            let listing = find_listing(&view, &id)?;
            let confirm = |prompt: &str| yes || ask(prompt);
            match view.request_delete(&listing, &confirm).await {
                DeleteOutcome::Deleted => true,
                DeleteOutcome::Cancelled => {
                    println!("Cancelled");
                    false
                }
                DeleteOutcome::Failed(e) => bail!("Delete failed: {}", e),
            }
        }
        Command::MarkSold { id } => {
            let listing = find_listing(&view, &id)?;
            view.mark_sold_out(&listing)
                .await
                .context("Update failed")?;
            true
        }
    };

    println!("{}", render_view(&view.render()));

    if changed {
        config.sync_listings(&store);
        config.save(&args.config_path)?;
    }

    view.close();
    session.sign_out().await?;
    Ok(())
}
