use std::process::ExitCode;
use std::sync::Arc;

use clap::{ArgGroup, Parser};
use sessiongate::config::{load_config, print_schema};
use sessiongate::startup::{Command, run};
use sessiongate::utils::logger::init_logging;

#[derive(Parser, Debug)]
#[command(
    name = "sessiongate",
    about = "Resolve guarded routes and provider callbacks headlessly",
    group(
        ArgGroup::new("action")
            .required(true)
            .args(["print_schema", "callback", "route"])
    )
)]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, env = "SESSIONGATE_CONFIG", default_value = "./config.yaml")]
    config: String,

    /// Print the config JSON schema and exit
    #[arg(long)]
    print_schema: bool,

    /// Handle a provider redirect URL
    #[arg(long, value_name = "URL")]
    callback: Option<String>,

    /// Route path to evaluate the guard for
    route: Option<String>,
}

impl Cli {
    fn command(self) -> Option<Command> {
        match (self.callback, self.route) {
            (Some(url), _) => Some(Command::Callback(url)),
            (None, Some(path)) => Some(Command::Route(path)),
            (None, None) => None,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.print_schema {
        return match print_schema() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Failed to render config schema: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let config_path = cli.config.clone();
    let Some(command) = cli.command() else {
        eprintln!("Nothing to do: pass --print-schema, --callback <URL> or a route");
        return ExitCode::from(2);
    };

    let config = match load_config(&config_path) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Failed to load config from '{}': {}", config_path, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("Failed to initialise logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(config, command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
