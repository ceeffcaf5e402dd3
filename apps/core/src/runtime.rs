use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{self, Config, ConfigError};
use crate::discovery::{DiscoveryProvider, FixtureWindowProvider};
use crate::inventory::InventoryService;
use crate::logging;
use crate::native::NativeWindowProvider;
use crate::transport::{self, ServeError};
use crate::worker_stream::ProcessWorkerTransport;

#[derive(Debug)]
pub enum RuntimeError {
    Config(ConfigError),
    Serve(ServeError),
    WorkerPath(String),
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(error) => write!(f, "config error: {error}"),
            Self::Serve(error) => write!(f, "worker serve error: {error}"),
            Self::WorkerPath(error) => write!(f, "worker path error: {error}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<ConfigError> for RuntimeError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<ServeError> for RuntimeError {
    fn from(value: ServeError) -> Self {
        Self::Serve(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    Service { once: bool },
    Worker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: RunMode,
    pub config_path: Option<PathBuf>,
}

pub fn parse_cli_args(args: &[String]) -> Result<RunOptions, String> {
    let mut mode = RunMode::Service { once: false };
    let mut config_path = None;

    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--worker" => mode = RunMode::Worker,
            "--once" => {
                if mode == (RunMode::Service { once: false }) {
                    mode = RunMode::Service { once: true };
                }
            }
            "--config" => {
                index += 1;
                let Some(path) = args.get(index) else {
                    return Err("--config requires a path".to_string());
                };
                config_path = Some(PathBuf::from(path));
            }
            other => return Err(format!("unknown argument '{other}'")),
        }
        index += 1;
    }

    Ok(RunOptions { mode, config_path })
}

pub fn run_with_options(options: RunOptions) -> Result<(), RuntimeError> {
    match options.mode {
        RunMode::Worker => run_worker_mode(options.config_path.as_deref()),
        RunMode::Service { once } => run_service(options.config_path.as_deref(), once),
    }
}

fn run_worker_mode(config_path: Option<&std::path::Path>) -> Result<(), RuntimeError> {
    let config = config::load(config_path)?;
    let providers = runtime_providers(&config);
    transport::run_worker(&providers)?;
    Ok(())
}

fn run_service(config_path: Option<&std::path::Path>, once: bool) -> Result<(), RuntimeError> {
    let config = config::load(config_path)?;
    if !config.config_path.exists() {
        config::save(&config)?;
        println!(
            "[winscout-core] wrote default config to {}",
            config.config_path.display()
        );
    }

    if let Err(error) = logging::init() {
        eprintln!("[winscout-core] file logging unavailable: {error}");
    }

    println!(
        "[winscout-core] startup mode={} refresh_interval_ms={} config_path={}",
        runtime_mode(),
        config.refresh_interval_ms,
        config.config_path.display(),
    );

    let (local, delegated) = partition_providers(runtime_providers(&config), &config);
    println!(
        "[winscout-core] providers local={} delegated={}",
        names_of(&local),
        names_of(&delegated),
    );

    let has_delegated = !delegated.is_empty();
    let worker_path = resolve_worker_path(&config)?;
    let transport = Arc::new(ProcessWorkerTransport::new(
        &worker_path,
        Duration::from_secs(config.worker_timeout_secs),
    ));

    let interval = Duration::from_millis(config.refresh_interval_ms);
    let service = Arc::new(
        InventoryService::new(config)
            .with_local_providers(local)
            .with_worker_providers(delegated),
    );

    let mut cycle: u64 = 0;
    loop {
        cycle += 1;
        let items = service.refresh();
        if has_delegated {
            service.request_worker_scan(transport.clone());
        }
        println!(
            "[winscout-core] refresh cycle={cycle} items={}",
            items.len()
        );

        if once {
            return Ok(());
        }
        std::thread::sleep(interval);
    }
}

fn runtime_providers(config: &Config) -> Vec<Arc<dyn DiscoveryProvider>> {
    let mut providers: Vec<Arc<dyn DiscoveryProvider>> =
        vec![Arc::new(NativeWindowProvider::new())];

    if std::env::var("WINSCOUT_FIXTURE").is_ok_and(|v| v == "1") {
        providers.push(Arc::new(FixtureWindowProvider::deterministic_fixture()));
    }

    providers.retain(|provider| {
        !config
            .disabled_providers
            .iter()
            .any(|disabled| disabled.eq_ignore_ascii_case(provider.provider_name()))
    });
    providers
}

fn partition_providers(
    providers: Vec<Arc<dyn DiscoveryProvider>>,
    config: &Config,
) -> (Vec<Arc<dyn DiscoveryProvider>>, Vec<Arc<dyn DiscoveryProvider>>) {
    providers.into_iter().partition(|provider| {
        !config
            .worker_providers
            .iter()
            .any(|name| name.eq_ignore_ascii_case(provider.provider_name()))
    })
}

fn resolve_worker_path(config: &Config) -> Result<PathBuf, RuntimeError> {
    if let Some(path) = &config.worker_path {
        return Ok(path.clone());
    }
    std::env::current_exe()
        .map_err(|error| RuntimeError::WorkerPath(format!("current_exe failed: {error}")))
}

fn names_of(providers: &[Arc<dyn DiscoveryProvider>]) -> String {
    if providers.is_empty() {
        return "<none>".to_string();
    }
    providers
        .iter()
        .map(|p| p.provider_name().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn runtime_mode() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        "windows-native-scan"
    }

    #[cfg(not(target_os = "windows"))]
    {
        "non-windows-idle-scan"
    }
}
