use clap::{Parser, Subcommand};
use eyre::Context;
use meet_google_api::{BroadcastCatalog, Config, GoogleApi, SessionEvent, setup_google};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "google-api-cli", about = "Google calendar and YouTube Live from the terminal")]
struct Args {
    /// JSON config file; flags below override its values
    #[arg(long, env = "GOOGLE_API_CONFIG")]
    config: Option<PathBuf>,

    /// OAuth client id of the application
    #[arg(long, env = "GOOGLE_API_CLIENT_ID")]
    client_id: Option<String>,

    #[arg(long, env = "GOOGLE_API_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Where to keep the OAuth token between runs
    #[arg(long, env = "GOOGLE_API_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    /// Page with dial-in phone numbers, mentioned in event invitations
    #[arg(long, env = "GOOGLE_API_DIAL_IN_NUMBERS_URL")]
    dial_in_numbers_url: Option<String>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the session state and the signed-in user
    Status,
    /// Sign in, prompting in the browser if needed
    SignIn,
    SignOut,
    /// Fetch the signed-in user's profile
    Profile,
    /// List live broadcasts, one per bound stream
    Broadcasts,
    /// Print the stream key of a broadcast's bound stream
    StreamKey { bound_stream_id: String },
    /// List calendar entries around now
    Calendar {
        /// Days relative to today to start at (negative is in the past)
        #[arg(long, allow_negative_numbers = true)]
        start_days: Option<i32>,
        #[arg(long, allow_negative_numbers = true)]
        end_days: Option<i32>,
    },
    /// Point a calendar event at a meeting
    UpdateEvent {
        event_id: String,
        calendar_id: String,
        location: String,
    },
    /// Choose a different account on the next sign-in
    SwitchAccount,
}

#[derive(Serialize)]
struct Status {
    state: meet_google_api::SessionState,
    email: String,
}

impl Args {
    fn into_config(self) -> eyre::Result<(Config, Command)> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(client_id) = self.client_id {
            config.client_id = client_id;
        }
        if self.client_secret.is_some() {
            config.client_secret = self.client_secret;
        }
        if self.token_file.is_some() {
            config.token_file = self.token_file;
        }
        if self.dial_in_numbers_url.is_some() {
            config.dial_in_numbers_url = self.dial_in_numbers_url;
        }
        if config.token_file.is_none() {
            config.token_file = Some(PathBuf::from("google-token.json"));
        }
        Ok((config, self.command))
    }
}

fn print_json(value: &impl Serialize) -> eyre::Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{json}");
    Ok(())
}

async fn run(catalog: &BroadcastCatalog<GoogleApi>, command: Command) -> eyre::Result<()> {
    let gate = catalog.gate();
    match command {
        Command::Status => {
            let profile = gate.current_profile().await?;
            print_json(&Status {
                state: gate.state(),
                email: profile.email,
            })
        }
        Command::SignIn => {
            let email = gate.refresh_profile().await?;
            eprintln!("signed in as {email}");
            Ok(())
        }
        Command::SignOut => {
            gate.sign_out().await?;
            eprintln!("signed out");
            Ok(())
        }
        Command::Profile => print_json(&gate.refresh_profile().await?),
        Command::Broadcasts => print_json(&catalog.list_available_broadcasts().await?),
        Command::StreamKey { bound_stream_id } => {
            print_json(&catalog.resolve_stream_key(&bound_stream_id).await?)
        }
        Command::Calendar {
            start_days,
            end_days,
        } => {
            let window = gate.provider().config().calendar_window;
            let entries = catalog
                .fetch_calendar_entries(
                    start_days.or(window.start_days),
                    end_days.or(window.end_days),
                )
                .await?;
            print_json(&entries)
        }
        Command::UpdateEvent {
            event_id,
            calendar_id,
            location,
        } => {
            catalog
                .update_calendar_event(&event_id, &calendar_id, &location)
                .await?;
            eprintln!("updated event {event_id}");
            Ok(())
        }
        Command::SwitchAccount => {
            catalog.prompt_account_selection().await?;
            gate.sign_out().await?;
            let email = gate.refresh_profile().await?;
            eprintln!("signed in as {email}");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(args.log_level.into())
                .from_env_lossy(),
        )
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();

    let (config, command) = args.into_config()?;
    let client_id = config.client_id.clone();

    let (events, mut events_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                SessionEvent::StateChanged(state) => tracing::info!(%state, "session state"),
                SessionEvent::ProfileChanged(email) => tracing::info!(%email, "profile"),
            }
        }
    });

    let catalog = setup_google(config, events);
    let state = catalog
        .gate()
        .load(&client_id)
        .await
        .context("load Google session")?;
    tracing::debug!(%state, "session loaded");

    run(&catalog, command).await
}
