//! Command-line front end for the trip log.
//!
//! SYSTEM CONTEXT
//! ==============
//! Each invocation rehydrates the persisted session, runs one command through
//! the route guard, calls the backend, and prints JSON on stdout. A 401 from
//! the backend clears the stored session before the process exits.

#[cfg(test)]
#[path = "cli_test.rs"]
mod cli_test;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;

use koerebog::config::{ClientConfig, ConfigError};
use koerebog::net::api::{ApiClient, ApiError};
use koerebog::net::events::{AuthEvent, AuthEvents};
use koerebog::net::types::{Credentials, LocationInput, NewTrip, NewUser, UserUpdate};
use koerebog::router::{DenyReason, RouteError, RouteTable};
use koerebog::state::session::{Session, SessionError, SessionStore};
use koerebog::storage::{FileStorage, SessionStorage};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error("{path}: {}", .reason.notice())]
    NotPermitted { path: String, reason: DenyReason },
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "koerebog", about = "Trip log client")]
pub struct Cli {
    /// Backend base URL; overrides the config default.
    #[arg(long, env = "KOEREBOG_API_URL")]
    api_url: Option<String>,

    #[arg(long, env = "KOEREBOG_SESSION_FILE")]
    session_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "KOEREBOG_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Logout,
    Whoami,
    Trips(TripsCommand),
    Locations(LocationsCommand),
    Admin(AdminCommand),
}

impl Command {
    /// Front-end route a command belongs to. `None` runs unguarded.
    fn route_path(&self) -> Option<&'static str> {
        match self {
            Self::Login { .. } => Some("/login"),
            Self::Logout | Self::Whoami => None,
            Self::Trips(_) => Some("/trips"),
            Self::Locations(_) => Some("/locations"),
            Self::Admin(_) => Some("/admin/users"),
        }
    }
}

#[derive(Args, Debug)]
struct TripsCommand {
    #[command(subcommand)]
    command: TripsSubcommand,
}

#[derive(Subcommand, Debug)]
enum TripsSubcommand {
    List,
    Create {
        /// Trip date, e.g. 2024-05-01.
        #[arg(long)]
        date: String,
        #[arg(long = "from")]
        start_location_id: i64,
        #[arg(long = "to")]
        end_location_id: i64,
        #[arg(long)]
        distance_km: Option<f64>,
        #[arg(long)]
        purpose: Option<String>,
    },
}

#[derive(Args, Debug)]
struct LocationsCommand {
    #[command(subcommand)]
    command: LocationsSubcommand,
}

#[derive(Args, Debug)]
struct LocationFields {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    address: Option<String>,
    #[arg(long, allow_negative_numbers = true)]
    latitude: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    longitude: Option<f64>,
}

impl From<LocationFields> for LocationInput {
    fn from(fields: LocationFields) -> Self {
        Self { name: fields.name, address: fields.address, latitude: fields.latitude, longitude: fields.longitude }
    }
}

#[derive(Subcommand, Debug)]
enum LocationsSubcommand {
    List,
    Create(LocationFields),
    Update {
        id: i64,
        #[command(flatten)]
        fields: LocationFields,
    },
    Delete {
        id: i64,
    },
    /// Resolve an address to coordinates.
    Lookup {
        address: String,
    },
}

#[derive(Args, Debug)]
struct AdminCommand {
    #[command(subcommand)]
    command: AdminSubcommand,
}

#[derive(Subcommand, Debug)]
enum AdminSubcommand {
    Users(UsersCommand),
}

#[derive(Args, Debug)]
struct UsersCommand {
    #[command(subcommand)]
    command: UsersSubcommand,
}

#[derive(Subcommand, Debug)]
enum UsersSubcommand {
    List,
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value_t = false)]
        admin: bool,
    },
    Update {
        id: i64,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        admin: Option<bool>,
    },
    Delete {
        id: i64,
    },
}

// =============================================================================
// CONTEXT
// =============================================================================

/// Wired-up client state for one invocation.
struct CliContext {
    api: ApiClient,
    store: SessionStore,
    routes: RouteTable,
    events: broadcast::Receiver<AuthEvent>,
}

impl CliContext {
    fn new(config: &ClientConfig) -> Result<Self, CliError> {
        let storage: Arc<dyn SessionStorage> = Arc::new(FileStorage::new(&config.session_file));
        let events = AuthEvents::new();
        let rx = events.subscribe();
        let api = ApiClient::new(config, storage.clone(), events)?;
        let store = SessionStore::new(storage, Arc::new(api.clone()));

        store.initialize()?;
        Ok(Self { api, store, routes: RouteTable::default_table(), events: rx })
    }

    /// Run the route guard for `path` against the current session.
    fn guard(&self, path: &str) -> Result<(), CliError> {
        let nav = self.routes.navigate(path, &self.store.snapshot())?;
        match nav.denied {
            None => Ok(()),
            Some(reason) => Err(CliError::NotPermitted { path: path.to_owned(), reason }),
        }
    }

    /// Apply any session invalidation the last API call published.
    fn settle(&mut self) -> usize {
        self.store.apply_pending(&mut self.events)
    }
}

fn resolve_config(api_url: Option<&str>, session_file: Option<PathBuf>) -> Result<ClientConfig, CliError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(url) = api_url {
        config = config.with_api_url(url)?;
    }
    if let Some(path) = session_file {
        config.session_file = path;
    }
    Ok(config)
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Execute one parsed invocation.
///
/// # Errors
///
/// Returns the first config, guard, session or API failure.
pub async fn run(cli: Cli) -> Result<(), CliError> {
    let config = resolve_config(cli.api_url.as_deref(), cli.session_file)?;
    let mut ctx = CliContext::new(&config)?;

    let result = dispatch(&ctx, cli.command).await;
    if ctx.settle() > 0 && !ctx.store.is_authenticated() {
        eprintln!("session expired; run `koerebog login` again");
    }
    result
}

async fn dispatch(ctx: &CliContext, command: Command) -> Result<(), CliError> {
    if let Some(path) = command.route_path() {
        ctx.guard(path)?;
    }

    match command {
        Command::Login { username, password } => {
            let session = ctx.store.login(Credentials::new(username, password)).await?;
            print_json(&session_summary(&session))
        }
        Command::Logout => {
            ctx.store.logout()?;
            println!("ok");
            Ok(())
        }
        Command::Whoami => print_json(&session_summary(&ctx.store.snapshot())),
        Command::Trips(trips) => run_trips(ctx, trips).await,
        Command::Locations(locations) => run_locations(ctx, locations).await,
        Command::Admin(admin) => match admin.command {
            AdminSubcommand::Users(users) => run_users(ctx, users).await,
        },
    }
}

async fn run_trips(ctx: &CliContext, trips: TripsCommand) -> Result<(), CliError> {
    match trips.command {
        TripsSubcommand::List => print_json(&ctx.api.list_trips().await?),
        TripsSubcommand::Create { date, start_location_id, end_location_id, distance_km, purpose } => {
            let trip = NewTrip { date, start_location_id, end_location_id, distance_km, purpose };
            print_json(&ctx.api.create_trip(&trip).await?)
        }
    }
}

async fn run_locations(ctx: &CliContext, locations: LocationsCommand) -> Result<(), CliError> {
    match locations.command {
        LocationsSubcommand::List => print_json(&ctx.api.list_locations().await?),
        LocationsSubcommand::Create(fields) => print_json(&ctx.api.create_location(&fields.into()).await?),
        LocationsSubcommand::Update { id, fields } => {
            print_json(&ctx.api.update_location(id, &fields.into()).await?)
        }
        LocationsSubcommand::Delete { id } => {
            ctx.api.delete_location(id).await?;
            print_json(&json!({ "deleted": id }))
        }
        LocationsSubcommand::Lookup { address } => print_json(&ctx.api.lookup_address(&address).await?),
    }
}

async fn run_users(ctx: &CliContext, users: UsersCommand) -> Result<(), CliError> {
    match users.command {
        UsersSubcommand::List => print_json(&ctx.api.list_users().await?),
        UsersSubcommand::Create { username, password, admin } => {
            let user = NewUser { username, password, is_admin: admin };
            print_json(&ctx.api.create_user(&user).await?)
        }
        UsersSubcommand::Update { id, username, password, admin } => {
            let update = UserUpdate { username, password, is_admin: admin };
            print_json(&ctx.api.update_user(id, &update).await?)
        }
        UsersSubcommand::Delete { id } => {
            ctx.api.delete_user(id).await?;
            print_json(&json!({ "deleted": id }))
        }
    }
}

fn session_summary(session: &Session) -> serde_json::Value {
    json!({
        "authenticated": session.is_authenticated(),
        "username": session.username(),
        "is_admin": session.is_admin(),
        "last_error": session.last_error(),
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
