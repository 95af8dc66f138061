//! quickcal CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use quickcal_client::cli::{Cli, Command, UpdateTarget};
use quickcal_client::commands::{add, auth, calendars, clear, events, update};
use quickcal_client::config::ClientConfig;
use quickcal_client::context::{AppContext, log_file};
use quickcal_client::error::{ClientError, ClientResult};
use quickcal_client::feedback::{self, Feedback};
use quickcal_core::{TracingConfig, init_tracing};

/// What a command hands back for printing.
enum Output {
    /// JSON for the launcher.
    Feedback(Feedback),
    /// A line for a human.
    Text(String),
    None,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let launcher = is_launcher(&cli.command);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => return fail(&e, launcher),
    };

    let tracing = if cli.command.is_background() {
        TracingConfig::background(log_file(&config.cache_dir()))
    } else {
        TracingConfig::interactive(cli.debug || config.debug)
    };
    if let Err(e) = init_tracing(tracing) {
        eprintln!("warning: failed to initialize logging: {}", e);
    }

    let result = match AppContext::new(config, cli.config.clone()) {
        Ok(ctx) => run(&ctx, cli.command).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(Output::Feedback(fb)) => {
            println!("{}", fb.to_json());
            ExitCode::SUCCESS
        }
        Ok(Output::Text(text)) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Ok(Output::None) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            fail(&e, launcher)
        }
    }
}

fn load_config(cli: &Cli) -> ClientResult<ClientConfig> {
    let config = match cli.config {
        Some(ref path) => ClientConfig::load_from(path),
        None => ClientConfig::load(),
    }
    .map_err(ClientError::Config)?;
    Ok(config.with_overrides(cli.event_cache_mins, cli.schedule_days))
}

/// Commands whose stdout is read by the launcher.
fn is_launcher(command: &Command) -> bool {
    matches!(
        command,
        Command::Events { .. }
            | Command::Calendars { .. }
            | Command::Active { .. }
            | Command::Accounts
    )
}

fn fail(err: &ClientError, launcher: bool) -> ExitCode {
    if launcher {
        let title = match err {
            ClientError::AuthRequired(_) => "Authentication Required",
            ClientError::Config(_) => "Configuration Error",
            _ => "Error",
        };
        println!("{}", feedback::message(title, err.to_string()).to_json());
    }
    eprintln!("error: {}", err);
    ExitCode::FAILURE
}

async fn run(ctx: &AppContext, command: Command) -> ClientResult<Output> {
    let output = match command {
        Command::Events { date, query } => {
            Output::Feedback(events::run(ctx, date, query.as_deref())?)
        }
        Command::Calendars { query } => {
            Output::Feedback(calendars::list(ctx, query.as_deref())?)
        }
        Command::Active { query } => {
            Output::Feedback(calendars::writable(ctx, query.as_deref())?)
        }
        Command::Toggle { calendar_id } => {
            let state = if calendars::toggle(ctx, &calendar_id)? {
                "activated"
            } else {
                "deactivated"
            };
            Output::Text(format!("Calendar {} {}", calendar_id, state))
        }
        Command::Update { target } => {
            match target {
                UpdateTarget::Calendars => update::calendars(ctx).await?,
                UpdateTarget::Events { date } => update::events(ctx, date).await?,
            };
            Output::None
        }
        Command::Add { calendar_id, text } => {
            let created = add::add(ctx, &calendar_id, &text.join(" ")).await?;
            Output::Text(format!("Created {}", created))
        }
        Command::Login {
            read_write,
            client_id,
            client_secret,
            credentials_file,
        } => {
            auth::login(ctx, read_write, client_id, client_secret, credentials_file).await?;
            Output::None
        }
        Command::Reauth {
            account,
            read_write,
        } => {
            auth::reauth(ctx, &account, read_write).await?;
            Output::None
        }
        Command::Logout { account } => {
            auth::logout(ctx, &account)?;
            Output::None
        }
        Command::Accounts => Output::Feedback(auth::accounts(ctx)?),
        Command::Clear => {
            let removed = clear::clear(ctx)?;
            Output::Text(format!("Removed {} cached file(s)", removed))
        }
    };
    Ok(output)
}
