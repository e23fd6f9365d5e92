use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use fedauth::{
    AppState,
    auth::password::hash_password,
    build_app,
    config::BrokerConfig,
    db::{AccountRepo, DbPool, GroupRepo},
    models::{AccountType, CreateGroup, CreatePrincipal},
    observability,
};
use validator::Validate;

/// Config file used when `--config` is not given.
const DEFAULT_CONFIG_FILE: &str = "fedauth.toml";

#[derive(Parser, Debug)]
#[command(version, about = "Federated authentication broker", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./fedauth.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the broker (default)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Create a group
    CreateGroup {
        #[arg(long)]
        name: String,
    },
    /// Create a local account
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        /// Group id or name to attach the account to
        #[arg(long)]
        group: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config_path = args.config.as_deref();

    match args.command {
        Some(Command::Migrate) => run_migrate(config_path).await,
        Some(Command::CreateGroup { name }) => run_create_group(config_path, name).await,
        Some(Command::CreateUser {
            email,
            password,
            first_name,
            last_name,
            group,
        }) => {
            let input = CreatePrincipal {
                email,
                first_name,
                last_name,
                account_type: AccountType::Local,
                enabled: true,
                password_hash: None,
            };
            run_create_user(config_path, input, password, group).await
        }
        Some(Command::Serve) | None => run_server(config_path).await,
    }
}

/// Load the configuration, exiting on failure.
fn load_config(explicit_path: Option<&str>) -> BrokerConfig {
    let path = PathBuf::from(explicit_path.unwrap_or(DEFAULT_CONFIG_FILE));
    if explicit_path.is_none() && !path.exists() {
        eprintln!(
            "Error: No configuration found. Create {} or pass --config <path>.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    match BrokerConfig::from_file(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

/// Load the configuration and start logging for a one-shot command.
fn init_command(explicit_path: Option<&str>) -> BrokerConfig {
    let config = load_config(explicit_path);
    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {}", e);
        std::process::exit(1);
    }
    config
}

async fn connect_db(config: &BrokerConfig) -> DbPool {
    if config.database.is_memory() {
        eprintln!("Error: Database is in-memory; changes would be lost on exit.");
        std::process::exit(1);
    }
    match DbPool::from_config(&config.database).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            eprintln!("Error: Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_server(explicit_config_path: Option<&str>) {
    let config = init_command(explicit_config_path);

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }

    tracing::info!(
        emulate_idp = config.federation.emulate_idp,
        add_new_users = config.federation.add_new_users,
        "Starting authentication broker"
    );

    let state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize application state");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let app = build_app(&config, state);

    let bind_addr = SocketAddr::new(config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Error: Failed to bind to {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on http://{}", bind_addr);

    // Peer addresses feed the trusted-proxy check on the federated callback
    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

async fn run_migrate(explicit_config_path: Option<&str>) {
    let config = init_command(explicit_config_path);
    tracing::info!("Running database migrations");

    let pool = connect_db(&config).await;
    match pool.run_migrations().await {
        Ok(()) => tracing::info!("Database migrations completed successfully"),
        Err(e) => {
            tracing::error!(error = %e, "Database migrations failed");
            eprintln!("Error: Database migrations failed: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_create_group(explicit_config_path: Option<&str>, name: String) {
    let config = init_command(explicit_config_path);
    let input = CreateGroup { name };
    if let Err(e) = input.validate() {
        eprintln!("Error: Invalid group: {}", e);
        std::process::exit(1);
    }

    let pool = connect_db(&config).await;
    match pool.groups().create(input).await {
        Ok(group) => println!("Created group {} ({})", group.name, group.id),
        Err(e) => {
            eprintln!("Error: Failed to create group: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_create_user(
    explicit_config_path: Option<&str>,
    mut input: CreatePrincipal,
    password: String,
    group: Option<String>,
) {
    let config = init_command(explicit_config_path);
    if let Err(e) = input.validate() {
        eprintln!("Error: Invalid account: {}", e);
        std::process::exit(1);
    }
    if password.is_empty() {
        eprintln!("Error: Password must not be empty");
        std::process::exit(1);
    }
    input.password_hash = match hash_password(&password) {
        Ok(hash) => Some(hash),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let pool = connect_db(&config).await;
    let result = match group {
        Some(key) => match pool.groups().get_by_id_or_name(&key).await {
            Ok(Some(group)) => pool.accounts().create_with_group(input, group.id).await,
            Ok(None) => {
                eprintln!("Error: Group '{}' not found", key);
                std::process::exit(1);
            }
            Err(e) => Err(e),
        },
        None => pool.accounts().create(input).await,
    };

    match result {
        Ok(principal) => println!("Created account {} ({})", principal.email, principal.id),
        Err(e) => {
            eprintln!("Error: Failed to create account: {}", e);
            std::process::exit(1);
        }
    }
}
