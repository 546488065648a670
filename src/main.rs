//! Halldyll CLI entrypoint.
//!
//! This is the main entrypoint for the halldyll-stacks command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use halldyll_deploy_stacks::cli::{Cli, Commands, ConsoleSink, OutputFormat, OutputFormatter};
use halldyll_deploy_stacks::config::{
    ConfigParser, ConfigValidator, DeployConfig, StackConfig, find_config_file,
};
use halldyll_deploy_stacks::deploy::{Cancellation, StackDeployer, StackStatusUpdate};
use halldyll_deploy_stacks::error::{ConfigError, HalldyllError, Result};
use halldyll_deploy_stacks::provider::{CloudFormationProvider, S3TemplateStore, load_sdk_config};
use halldyll_deploy_stacks::stack::{DeployRequest, StackIdentity};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

type Deployer = StackDeployer<CloudFormationProvider, S3TemplateStore>;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", formatter.format_error(&e.to_string()));
            if e.is_retryable() {
                eprintln!("The failure looks transient; re-running the command is safe.");
            }
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` takes precedence over `--verbose`.
fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(cli.config.as_ref(), warnings, &formatter),
        Commands::Plan { stack } => cmd_plan(cli.config.as_ref(), stack.as_deref(), &formatter).await,
        Commands::Deploy { stack, yes } => {
            cmd_deploy(cli.config.as_ref(), stack.as_deref(), yes, cli.output, &formatter).await
        }
        Commands::Status { stack } => {
            cmd_status(cli.config.as_ref(), stack.as_deref(), &formatter).await
        }
    }
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating configuration: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(base_dir(&config_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new()
        .with_base_dir(parser.base_dir())
        .check(&config);
    emit(&formatter.format_validation(&result, show_warnings))?;

    if result.is_valid() {
        Ok(())
    } else {
        Err(HalldyllError::Config(ConfigError::validation_general(format!(
            "{} error(s) found",
            result.error_count()
        ))))
    }
}

/// Preview changes for the selected stacks.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    stack: Option<&str>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let workspace = Workspace::load(config_path).await?;
    let cancel = Cancellation::never();

    let mut previews = Vec::new();
    for entry in workspace.config.select(stack)? {
        let request = workspace.request(entry)?;
        previews.push(workspace.deployer.preview(&request, &cancel).await?);
    }

    emit(&formatter.format_previews(&previews))
}

/// Deploy the selected stacks in configuration order.
async fn cmd_deploy(
    config_path: Option<&PathBuf>,
    stack: Option<&str>,
    auto_approve: bool,
    output: OutputFormat,
    formatter: &OutputFormatter,
) -> Result<()> {
    let workspace = Workspace::load(config_path).await?;
    let entries = workspace.config.select(stack)?;
    let requests = entries
        .into_iter()
        .map(|entry| workspace.request(entry))
        .collect::<Result<Vec<_>>>()?;

    // Confirm
    if !auto_approve {
        let names: Vec<&str> = requests.iter().map(|r| r.identity.name.as_str()).collect();
        eprint!("Deploy {}? [y/N]: ", names.join(", "));
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Deploy cancelled.");
            return Ok(());
        }
    }

    let (handle, cancel) = Cancellation::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling deployment");
            handle.cancel();
        }
    });

    let sink = ConsoleSink;
    let mut updates = Vec::new();
    let mut failure = None;

    for request in &requests {
        match workspace.deployer.deploy(request, &sink, &cancel).await {
            Ok(outcome) => updates.push(StackStatusUpdate {
                stack: request.identity.name.clone(),
                outcome: Some(outcome),
                error: None,
            }),
            Err(e) => {
                updates.push(StackStatusUpdate {
                    stack: request.identity.name.clone(),
                    outcome: None,
                    error: Some(e.to_string()),
                });
                failure = Some(e);
                break;
            }
        }
    }

    if matches!(output, OutputFormat::Json) || requests.len() > 1 {
        emit(&formatter.format_deploy(&updates))?;
    }

    failure.map_or(Ok(()), Err)
}

/// Show the live status of the selected stacks.
async fn cmd_status(
    config_path: Option<&PathBuf>,
    stack: Option<&str>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let workspace = Workspace::load(config_path).await?;

    let mut stacks = Vec::new();
    for entry in workspace.config.select(stack)? {
        let identity = workspace.identity(entry)?;
        let description = workspace.deployer.describe(&identity).await?;
        stacks.push((identity.name, description));
    }

    emit(&formatter.format_status(&stacks))
}

/// Loaded configuration plus a deployer wired to the provider.
struct Workspace {
    config: DeployConfig,
    base_dir: PathBuf,
    region: String,
    deployer: Deployer,
}

impl Workspace {
    async fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let config_file = resolve_config_path(config_path)?;
        debug!("Loading configuration from: {}", config_file.display());

        let parser = ConfigParser::new().with_base_path(base_dir(&config_file));
        parser.load_dotenv()?;
        let config = parser.load_with_env(&config_file)?;

        let result = ConfigValidator::new().validate(&config)?;
        for warning in &result.warnings {
            warn!("{warning}");
        }

        let sdk_config = load_sdk_config(config.region()).await;
        let region = sdk_config
            .region()
            .map(ToString::to_string)
            .ok_or_else(|| {
                HalldyllError::Config(ConfigError::validation(
                    "No region configured; set project.region or AWS_REGION",
                    "project.region",
                ))
            })?;

        let provider = Arc::new(CloudFormationProvider::new(&sdk_config, config.engine.retry));
        let store = Arc::new(S3TemplateStore::new(&sdk_config));
        let deployer = StackDeployer::new(
            provider,
            store,
            config.artifacts.clone(),
            config.engine.clone(),
        );

        Ok(Self {
            base_dir: parser.base_dir(),
            config,
            region,
            deployer,
        })
    }

    fn identity(&self, entry: &StackConfig) -> Result<StackIdentity> {
        entry.identity(&self.config.project, &self.region)
    }

    fn request(&self, entry: &StackConfig) -> Result<DeployRequest> {
        let rendered = entry.render(&self.config.project, &self.base_dir)?;
        let account = self.config.project.account.as_deref().unwrap_or_default();
        DeployRequest::from_configuration(&rendered, &self.region, account)
    }
}

/// Writes command output to stdout.
fn emit(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", output.trim_end())?;
    Ok(())
}

fn base_dir(config_file: &Path) -> PathBuf {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}
