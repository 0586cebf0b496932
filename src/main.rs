mod cli;
mod console;
mod context;
mod form;
mod interact;
mod js;
mod lifecycle;
mod navigate;
mod network;
mod page;

use clap::{CommandFactory, FromArgMatches};

use browser_probe::error::AppError;
use browser_probe::logging;
use browser_probe::session::SessionStore;

use cli::{Cli, Command};
use context::CommandContext;

#[tokio::main]
async fn main() {
    let (args, stripped) = cli::strip_unknown_flags(std::env::args_os(), &Cli::command());
    let cli = match parse(args) {
        Ok(cli) => cli,
        Err(e) => {
            e.print_json_stderr();
            std::process::exit(1);
        }
    };

    logging::init(cli.global.verbose);
    for flag in &stripped {
        tracing::debug!(flag = %flag, "ignoring unrecognized flag");
    }

    if let Err(e) = run(&cli).await {
        e.print_json_stderr();
        std::process::exit(1);
    }
}

/// Help and version requests print and exit 0; anything else clap rejects
/// becomes an `InvalidArgument` error.
fn parse(args: Vec<std::ffi::OsString>) -> Result<Cli, AppError> {
    let matches = Cli::command().try_get_matches_from(args).map_err(|e| {
        use clap::error::ErrorKind as ClapKind;
        if matches!(e.kind(), ClapKind::DisplayHelp | ClapKind::DisplayVersion) {
            e.exit();
        }
        AppError::invalid_argument(e.render().to_string().trim().to_owned())
    })?;
    Cli::from_arg_matches(&matches).map_err(|e| AppError::invalid_argument(e.to_string()))
}

async fn run(cli: &Cli) -> Result<(), AppError> {
    let ctx = CommandContext::from_global(&cli.global)?;
    let mut store = SessionStore::new()?;

    let outcome = dispatch(&cli.command, &ctx, &mut store).await;

    if store.current().is_some() {
        if cli.global.keep_open {
            store.keep_open().await;
        } else if let Err(e) = store.release().await {
            tracing::warn!(error = %e, "session teardown failed");
        }
    }
    outcome
}

async fn dispatch(
    command: &Command,
    ctx: &CommandContext,
    store: &mut SessionStore,
) -> Result<(), AppError> {
    match command {
        Command::Navigate(args) => navigate::execute_navigate(ctx, store, args).await,
        Command::Click(args) => interact::execute_click(ctx, store, args).await,
        Command::Fill(args) => form::execute_fill(ctx, store, args).await,
        Command::Evaluate(args) => js::execute_evaluate(ctx, store, args).await,
        Command::Screenshot(args) => page::execute_screenshot(ctx, store, args).await,
        Command::Snapshot(args) => page::execute_snapshot(ctx, store, args).await,
        Command::Describe(args) => page::execute_describe(ctx, store, args).await,
        Command::Wait(args) => page::execute_wait(ctx, store, args).await,
        Command::Console(args) => console::execute_console(ctx, store, args).await,
        Command::Network(args) => network::execute_network(ctx, store, args).await,
        Command::Status => lifecycle::execute_status(ctx, store).await,
        Command::Close => lifecycle::execute_close(ctx, store).await,
    }
}
