mod prompt;
mod snapshot;
mod transcript;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use merge::Merge;
use tokio::signal;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use ontapexec_config::ConfigServiceImpl;
use ontapexec_engine::{
    CancellationToken, ContextStore, EngineError, Executor, ExecutorSettings, RetryPolicy,
};
use ontapexec_logging::LoggingServiceImpl;
use ontapexec_ssh::{RusshSessionClient, ShellTarget, launch_shell};
use ontapexec_traits::batch::{
    BatchResult, ConnectionContext, NoProgress, ProgressSink, TargetDescriptor, Transport,
};
use ontapexec_traits::config::{Config, ConfigService};
use ontapexec_traits::logging::LoggingService;
use ontapexec_traits::probe::ProbeSettings;
use ontapexec_tunnel::{InstanceConnectTunnel, PortProber};

use crate::prompt::{CliPrompter, Presets};
use crate::transcript::{Transcript, batch_to_json};

type LiveExecutor = Executor<InstanceConnectTunnel, RusshSessionClient, PortProber>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[arg(long, global = true)]
    pub log_level: Option<String>,
    #[arg(long, global = true)]
    pub aws_profile: Option<String>,
    #[arg(long, global = true)]
    pub aws_region: Option<String>,
    #[arg(long, global = true)]
    pub no_color: bool,
    /// Never prompt; anything not given by flags or the context store is left empty.
    #[arg(long, global = true)]
    pub non_interactive: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs ONTAP CLI commands in order over one SSH session.
    Run {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
        /// Each argument is one command, e.g. "volume show".
        #[arg(required = true, num_args = 1..)]
        commands: Vec<String>,
    },
    /// Verifies credentials with `volume show` and remembers the connection context.
    Login {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Creates a snapshot of a volume.
    Snapshot {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long)]
        svm: String,
        #[arg(long)]
        volume: String,
        /// Defaults to `<volume>-snapshot-<UTC timestamp>`.
        #[arg(long)]
        name: Option<String>,
    },
    /// Opens an interactive shell with the system `ssh` client.
    Shell {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Removes the remembered connection context for a file system.
    Forget {
        #[command(flatten)]
        target: TargetArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Private IP address of the management endpoint.
    #[arg(long)]
    pub ip: String,
    #[arg(long)]
    pub file_system_id: Option<String>,
    /// Region of the file system.
    #[arg(long)]
    pub region: Option<String>,
    #[arg(long)]
    pub dns_name: Option<String>,
    /// SSH port on the management endpoint.
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub username: Option<String>,
    #[arg(long, env = "ONTAPEXEC_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// Connect through this EC2 Instance Connect endpoint.
    #[arg(long, conflicts_with = "direct")]
    pub endpoint_id: Option<String>,
    /// Connect straight to the management IP.
    #[arg(long)]
    pub direct: bool,
    /// Ignore the context store for this invocation.
    #[arg(long)]
    pub no_cache: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Commands {
    fn target(&self) -> &TargetArgs {
        match self {
            Commands::Run { target, .. }
            | Commands::Login { target }
            | Commands::Snapshot { target, .. }
            | Commands::Shell { target }
            | Commands::Forget { target } => target,
        }
    }
}

impl TargetArgs {
    fn descriptor(&self) -> TargetDescriptor {
        let mut target = TargetDescriptor::new(&self.ip);
        target.file_system_id = self.file_system_id.clone();
        target.dns_name = self.dns_name.clone();
        target.region = self.region.clone();
        target
    }

    fn transport(&self) -> Option<Transport> {
        if self.endpoint_id.is_some() {
            Some(Transport::Tunneled)
        } else if self.direct {
            Some(Transport::Direct)
        } else {
            None
        }
    }

    fn presets(&self) -> Presets {
        Presets {
            username: self.username.clone(),
            password: self.password.clone().map(Zeroizing::new),
            transport: self.transport(),
            endpoint_id: self.endpoint_id.clone(),
        }
    }

    /// Flags given on this invocation win over what was remembered.
    fn apply_overrides(&self, mut context: ConnectionContext) -> ConnectionContext {
        if let Some(username) = &self.username {
            context.username = username.clone();
        }
        match self.transport() {
            Some(Transport::Tunneled) => {
                context.instance_connect_endpoint_id = self.endpoint_id.clone();
            }
            Some(Transport::Direct) => context.instance_connect_endpoint_id = None,
            None => {}
        }
        context
    }
}

/// Everything a subcommand needs after configuration and logging are set up.
struct App {
    config: Config,
    interactive: bool,
    store: Option<ContextStore>,
}

impl App {
    fn executor(&self, prompter: CliPrompter, progress: Arc<dyn ProgressSink>) -> LiveExecutor {
        Executor::new(
            InstanceConnectTunnel::new(&self.config),
            RusshSessionClient::new(),
            PortProber::new(ProbeSettings::default()),
            ExecutorSettings::from_config(&self.config),
        )
        .with_prompter(Arc::new(prompter))
        .with_progress(progress)
    }

    fn cached_context(&self, args: &TargetArgs) -> Option<ConnectionContext> {
        if args.no_cache {
            return None;
        }
        let store = self.store.as_ref()?;
        let key = args.descriptor().cache_key()?;
        match store.load(&key) {
            Ok(cached) => cached.map(|context| {
                info!("Reusing stored connection context for {}", key);
                args.apply_overrides(context)
            }),
            Err(e) => {
                warn!("Ignoring context store {}: {}", store.path().display(), e);
                None
            }
        }
    }

    fn remember(&self, target: &TargetDescriptor, context: &ConnectionContext) {
        let (Some(store), Some(key)) = (self.store.as_ref(), target.cache_key()) else {
            warn!("Connection context not stored: --file-system-id and --region are both needed");
            return;
        };
        match store.save(&key, context) {
            Ok(()) => info!("Stored connection context for {} in {}", key, store.path().display()),
            Err(e) => error!("Failed to store connection context: {}", e),
        }
    }

    async fn run_batch(
        &self,
        args: &TargetArgs,
        commands: &[String],
        cached: Option<ConnectionContext>,
        output: OutputFormat,
    ) -> anyhow::Result<BatchResult> {
        let progress: Arc<dyn ProgressSink> = match output {
            OutputFormat::Text => Arc::new(Transcript::stdout()),
            OutputFormat::Json => Arc::new(NoProgress),
        };
        let executor = self.executor(CliPrompter::new(args.presets(), self.interactive), progress);

        // Prompts run before interrupts are captured so Ctrl-C still ends them.
        let context = executor.resolve(&args.descriptor(), cached).await;

        let cancel = CancellationToken::new();
        let watcher = watch_interrupts(cancel.clone());
        let outcome = executor
            .execute_with_context(context, commands, &cancel)
            .await;
        watcher.abort();

        let batch = outcome.map_err(|e: EngineError| {
            if e.is_timeout() {
                error!("The tunnel never accepted connections; check the endpoint ID and AWS credentials");
            }
            anyhow::Error::new(e)
        })?;

        if output == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&batch_to_json(&batch))?);
        }

        let policy = RetryPolicy::from_config(&self.config);
        for rejected in policy.commands_needing_correction(&batch) {
            warn!("`{}` was rejected as invalid syntax; correct it and retry", rejected.command);
        }
        Ok(batch)
    }
}

/// The first Ctrl-C cancels the batch and lets teardown run; a second one
/// exits at once.
fn watch_interrupts(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Received interrupt. Cleaning up; press Ctrl+C again to exit immediately...");
        cancel.cancel();
        if signal::ctrl_c().await.is_ok() {
            error!("Received second interrupt. Exiting.");
            std::process::exit(130);
        }
    })
}

fn exit_code_for(batch: &BatchResult) -> ExitCode {
    if batch.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        let failed = batch.failures().count();
        error!("{} of {} command(s) failed", failed, batch.results.len());
        ExitCode::FAILURE
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // --- Configuration Setup ---
    let file_config = ConfigServiceImpl::load_from_paths(cli.config.as_deref())?;
    let cli_config = Config {
        log_level: cli.log_level.clone(),
        ssh_port: cli.command.target().port,
        aws_profile: cli.aws_profile.clone(),
        aws_region: cli.aws_region.clone(),
        ..Config::empty()
    };
    let mut config = Config::default();
    config.merge(file_config);
    config.merge(cli_config);

    // --- Logging ---
    LoggingServiceImpl::init_logging(config.log_level.as_deref().unwrap_or("info"), !cli.no_color)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    debug!("Final configuration: {:#?}", config);

    let store = config
        .context_store_path
        .as_deref()
        .and_then(|path| ConfigServiceImpl::expand_tilde(path))
        .map(ContextStore::new);
    if store.is_none() {
        warn!("No home directory found; connection contexts will not be remembered");
    }

    let app = App {
        config,
        interactive: !cli.non_interactive,
        store,
    };

    match cli.command {
        Commands::Run { target, output, commands } => {
            let cached = app.cached_context(&target);
            let batch = app.run_batch(&target, &commands, cached, output).await?;
            Ok(exit_code_for(&batch))
        }
        Commands::Login { target } => {
            let commands = ["volume show".to_string()];
            let batch = app.run_batch(&target, &commands, None, OutputFormat::Text).await?;
            if batch.all_succeeded() {
                app.remember(&target.descriptor(), &batch.connection_context);
            }
            Ok(exit_code_for(&batch))
        }
        Commands::Snapshot { target, svm, volume, name } => {
            let name = name.unwrap_or_else(|| snapshot::default_name(&volume, chrono::Utc::now()));
            let command = snapshot::create_command(&svm, &volume, &name)?;
            let cached = app.cached_context(&target);
            let batch = app
                .run_batch(&target, &[command], cached, OutputFormat::Text)
                .await?;
            if batch.all_succeeded() {
                info!("Snapshot {} created for volume {}", name, volume);
            }
            Ok(exit_code_for(&batch))
        }
        Commands::Shell { target } => {
            let prompter = CliPrompter::new(target.presets(), app.interactive).without_password();
            let executor = app.executor(prompter, Arc::new(NoProgress));
            let descriptor = target.descriptor();
            let context = executor
                .resolve(&descriptor, app.cached_context(&target))
                .await;
            let shell = ShellTarget {
                host: descriptor
                    .management_dns_name()
                    .unwrap_or_else(|| context.private_ip_address.clone()),
                port: executor.settings().ssh_port,
                aws_cli: app.config.aws_cli.clone().unwrap_or_else(|| "aws".to_string()),
                aws: executor.settings().aws.clone(),
            };
            let status = launch_shell(&shell, &context)
                .await
                .context("Failed to open SSH shell")?;
            let code = status.code().and_then(|c| u8::try_from(c).ok()).unwrap_or(1);
            Ok(ExitCode::from(code))
        }
        Commands::Forget { target } => {
            let key = target
                .descriptor()
                .cache_key()
                .context("--file-system-id and --region are both needed to find a stored context")?;
            let Some(store) = app.store.as_ref() else {
                return Ok(ExitCode::SUCCESS);
            };
            if store.remove(&key)? {
                info!("Removed stored connection context for {}", key);
            } else {
                info!("No stored connection context for {}", key);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
