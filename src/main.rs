//! scx-session -- command-line front end for the session core.
//!
//! Each invocation is a fresh process: the ephemeral tier starts empty, so
//! only sessions signed in with `--remember` carry over between commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use tracing_subscriber::EnvFilter;

use scx_session::config::Config;
use scx_session::models::parse_roles;
use scx_session::store::{CredentialStore, durable_from_config};
use scx_session::{AccessGate, Session};

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

struct LoginArgs {
    email: String,
    password: Option<String>,
    remember: bool,
}

enum Command {
    Login(LoginArgs),
    Inspect(SessionCommand),
}

/// Commands that act on the restored session.
enum SessionCommand {
    Status,
    WhoAmI,
    Refresh,
    Logout,
    CanEnter(String),
    Route(String),
    Get(String),
}

struct CliArgs {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;
    let mut command = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => match args.next() {
                Some(path) => config_path = Some(PathBuf::from(path)),
                None => fail("--config requires a path argument"),
            },
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("scx-session {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "login" => command = Some(parse_login(&mut args)),
            "status" => command = Some(Command::Inspect(SessionCommand::Status)),
            "whoami" => command = Some(Command::Inspect(SessionCommand::WhoAmI)),
            "refresh" => command = Some(Command::Inspect(SessionCommand::Refresh)),
            "logout" => command = Some(Command::Inspect(SessionCommand::Logout)),
            "can-enter" => {
                let roles = required(&mut args, "can-enter", "ROLES");
                command = Some(Command::Inspect(SessionCommand::CanEnter(roles)));
            }
            "route" => {
                let path = required(&mut args, "route", "PATH");
                command = Some(Command::Inspect(SessionCommand::Route(path)));
            }
            "get" => {
                let path = required(&mut args, "get", "PATH");
                command = Some(Command::Inspect(SessionCommand::Get(path)));
            }
            other => fail(&format!("Unknown argument: {other}")),
        }
    }

    match command {
        Some(command) => CliArgs {
            config_path,
            command,
        },
        None => {
            print_usage();
            std::process::exit(1);
        }
    }
}

fn parse_login(args: &mut impl Iterator<Item = String>) -> Command {
    let mut email = None;
    let mut password = None;
    let mut remember = false;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--email" | "-e" => email = args.next(),
            "--password" | "-p" => password = args.next(),
            "--remember" | "-r" => remember = true,
            other => fail(&format!("Unknown login argument: {other}")),
        }
    }
    match email {
        Some(email) => Command::Login(LoginArgs {
            email,
            password,
            remember,
        }),
        None => fail("login requires --email"),
    }
}

fn required(args: &mut impl Iterator<Item = String>, command: &str, what: &str) -> String {
    match args.next() {
        Some(value) => value,
        None => fail(&format!("{command} requires a {what} argument")),
    }
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {message}");
    eprintln!("Run with --help for usage information.");
    std::process::exit(1);
}

fn print_usage() {
    println!(
        "\
scx-session {version} -- SupplyChainX session client

USAGE:
    scx-session [OPTIONS] <COMMAND>

COMMANDS:
    login --email <EMAIL> [--password <PW>] [--remember]
                           Sign in (password also read from SCX_PASSWORD)
    status                 Show session phase and token diagnostics
    whoami                 Fetch the signed-in user from the server
    refresh                Renew the access token now
    logout                 Sign out and clear stored tokens
    can-enter <ROLES>      Check a comma-separated role list
    route <PATH>           Check a route against the gate table
    get <PATH>             GET an API path through the session

OPTIONS:
    -c, --config <PATH>    Path to configuration file
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    SCX_CONFIG             Alternative to --config flag
    SCX_PASSWORD           Password for login
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?
        .block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let cli = parse_args();

    let config_path = std::env::var("SCX_CONFIG")
        .map(PathBuf::from)
        .ok()
        .or(cli.config_path)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    init_tracing(&config);
    tracing::debug!(
        config = %config_path.display(),
        backend = %config.storage.backend,
        overrides = config.env_overrides.len(),
        "Configuration loaded"
    );

    let durable = durable_from_config(&config.storage);
    let store = Arc::new(CredentialStore::with_durable(durable));
    let session = Session::from_config(&config, store)
        .with_context(|| format!("Invalid API base URL: {}", config.api.base_url))?;

    let result = match cli.command {
        Command::Login(args) => login(&session, &config, args).await,
        Command::Inspect(command) => run(&session, &config, command).await,
    };
    session.shutdown();
    result
}

async fn login(session: &Arc<Session>, config: &Config, args: LoginArgs) -> anyhow::Result<()> {
    let password = match args.password.or_else(|| std::env::var("SCX_PASSWORD").ok()) {
        Some(password) => password,
        None => bail!("Password required (--password or SCX_PASSWORD)"),
    };
    let user = session
        .login(&args.email, &password, args.remember)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    let gate = AccessGate::from_config(Arc::clone(session), &config.gate);
    println!("Signed in as {} <{}>", user.display_name, user.email);
    println!("Home: {}", gate.home());
    Ok(())
}

async fn run(session: &Arc<Session>, config: &Config, command: SessionCommand) -> anyhow::Result<()> {
    session.restore().await;
    let gate = AccessGate::from_config(Arc::clone(session), &config.gate);

    match command {
        SessionCommand::Status => {
            let report = serde_json::json!({
                "state": session.state(),
                "token": session.diagnostics(),
                "expires_at": session
                    .store()
                    .get()
                    .and_then(|c| c.expires_at)
                    .and_then(|exp| chrono::DateTime::<chrono::Utc>::from_timestamp(exp, 0))
                    .map(|t| t.to_rfc3339()),
                "refresh_soon": session.should_refresh_soon(),
                "durable_backend": session.store().durable_backend(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        SessionCommand::WhoAmI => {
            let user = session
                .fetch_current_user()
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        SessionCommand::Refresh => {
            let credential = session
                .refresh()
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("Token refreshed: {credential:?}");
        }
        SessionCommand::Logout => {
            session.logout().await;
            println!("Signed out");
        }
        SessionCommand::CanEnter(list) => {
            let roles = parse_roles(&list);
            let outcome = gate.check(&roles);
            println!("{outcome}");
            if !outcome.is_allowed() {
                std::process::exit(2);
            }
        }
        SessionCommand::Route(path) => {
            let outcome = gate.authorize(&path);
            match outcome.navigation() {
                Some(navigation) => println!("{outcome} -> {navigation}"),
                None => println!("{outcome}"),
            }
            if !outcome.is_allowed() {
                std::process::exit(2);
            }
        }
        SessionCommand::Get(path) => {
            let body = session
                .client()
                .get_text(&path)
                .await
                .map_err(|e| anyhow::anyhow!("{} (status {})", e.message, e.status))?;
            println!("{body}");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tracing initialization
// ---------------------------------------------------------------------------

/// Set up the tracing subscriber based on configuration.
fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("scx_session={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
