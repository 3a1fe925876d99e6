//! shell-jail binary entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use serde_json::json;
use tracing::{error, info};

use shell_jail::cli::{self, Args};
use shell_jail::config::Config;
use shell_jail::{logging, CommandResult, SessionId, ShellService};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Try 'shell-jail --help' for more information.");
            return ExitCode::from(2);
        }
    };

    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };

    logging::init_with_level(config.log_filter());

    match run(&args, &config).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "shell-jail failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args, config: &Config) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let jail = config.to_jail_config()?;
    let root = match &args.root {
        Some(root) => root.clone(),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };
    let id = match &args.session {
        Some(session) => SessionId::new(session.as_str())?,
        None => SessionId::generate(),
    };

    info!("shell-jail v{}", env!("CARGO_PKG_VERSION"));

    let service = ShellService::new(config.to_session_options());
    service.create_or_get_session(id.clone(), root, jail).await?;

    let mut outcome = Ok(ExitCode::SUCCESS);
    for command in &args.commands {
        match service.run_command(id.as_str(), command.as_str(), None).await {
            Ok(result) => println!("{}", render(&result)),
            Err(e) => {
                outcome = Err(e.into());
                break;
            }
        }
    }

    if let Err(e) = service.dispose_session(id.as_str()).await {
        error!(session = %id, error = %e, "failed to dispose session");
    }
    outcome
}

fn render(result: &CommandResult) -> serde_json::Value {
    json!({
        "exit_code": result.exit_code,
        "stdout": result.stdout_text(),
        "stderr": result.stderr_text(),
        "duration_ms": result.duration.as_millis() as u64,
    })
}
