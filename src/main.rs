//! Component Operator
//!
//! Runs the RabbitmqUser and AppPlatform controllers, plus an HTTP server
//! for health probes, metrics and the controller listing.

use clap::Parser;
use kube::Client;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use component_operator::controllers::{appplatform, rabbitmquser};
use component_operator::crd::crds_yaml;
use component_operator::domain::{
    RabbitmqConfig, RabbitmqHttpAdmin, RegistryTagFetcher, TagCache,
};
use component_operator::engine::TemplateRendererRef;
use component_operator::{
    ApiServer, ApiServerConfig, ComponentController, ControllerConfig, EngineMetrics, Error,
    KubeStore, ObjectStoreRef, RabbitmqAdminRef, RequeueConfig, RestRouter, Result, TemplateSet,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Component Operator - pipelines of reconcile stages for Kubernetes resources
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Health, metrics and REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8080")]
    api_addr: String,

    /// Only watch this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Intercept deletion to run cleanup stages
    #[arg(long, env = "ENABLE_FINALIZERS", default_value_t = true, action = clap::ArgAction::Set)]
    enable_finalizers: bool,

    /// Deadline for one reconcile invocation in seconds (0 disables it)
    #[arg(long, env = "RECONCILE_TIMEOUT", default_value = "60")]
    reconcile_timeout_secs: u64,

    /// Minimal delay for immediate requeues in milliseconds
    #[arg(long, env = "REQUEUE_DELAY_MS", default_value = "1000")]
    requeue_delay_ms: u64,

    /// Periodic resync of converged objects in seconds (0 disables it)
    #[arg(long, env = "RESYNC_INTERVAL", default_value = "0")]
    resync_interval_secs: u64,

    /// First retry delay after a failed reconcile in seconds
    #[arg(long, env = "BACKOFF_INITIAL", default_value = "5")]
    backoff_initial_secs: u64,

    /// Retry delay ceiling in seconds
    #[arg(long, env = "BACKOFF_MAX", default_value = "300")]
    backoff_max_secs: u64,

    /// Teardown passes before a deletion is reported as stalled
    #[arg(long, env = "MAX_TEARDOWN_ATTEMPTS", default_value = "10")]
    max_teardown_attempts: u32,

    /// Delay between teardown passes in seconds
    #[arg(long, env = "TEARDOWN_INTERVAL", default_value = "10")]
    teardown_interval_secs: u64,

    /// Directory holding the object templates
    #[arg(long, env = "TEMPLATES_DIR", default_value = "templates")]
    templates_dir: PathBuf,

    /// RabbitMQ management API URL
    #[arg(long, env = "RABBITMQ_URL", default_value = "http://rabbitmq:15672")]
    rabbitmq_url: String,

    /// RabbitMQ management user
    #[arg(long, env = "RABBITMQ_USERNAME", default_value = "guest")]
    rabbitmq_username: String,

    /// RabbitMQ management password
    #[arg(long, env = "RABBITMQ_PASSWORD", default_value = "guest", hide_env_values = true)]
    rabbitmq_password: String,

    /// Container registry URL (Docker Registry v2 API)
    #[arg(long, env = "REGISTRY_URL", default_value = "http://registry:5000")]
    registry_url: String,

    /// Image repository used when an AppPlatform names none
    #[arg(long, env = "IMAGE_REPOSITORY", default_value = "")]
    image_repository: String,

    /// How long registry tag listings are cached in seconds
    #[arg(long, env = "TAG_CACHE_TTL", default_value = "60")]
    tag_cache_ttl_secs: u64,

    /// Timeout for external HTTP calls in seconds
    #[arg(long, env = "HTTP_TIMEOUT", default_value = "10")]
    http_timeout_secs: u64,

    /// Print the CRDs as YAML and exit
    #[arg(long)]
    print_crds: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn controller_config(&self) -> ControllerConfig {
        let optional = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));
        ControllerConfig {
            finalizers_enabled: self.enable_finalizers,
            reconcile_timeout: optional(self.reconcile_timeout_secs),
            requeue: RequeueConfig {
                immediate_delay: Duration::from_millis(self.requeue_delay_ms),
                resync_interval: optional(self.resync_interval_secs),
                backoff_initial: Duration::from_secs(self.backoff_initial_secs),
                backoff_max: Duration::from_secs(self.backoff_max_secs),
            },
            max_teardown_attempts: self.max_teardown_attempts,
            teardown_interval: Duration::from_secs(self.teardown_interval_secs),
            namespace: self.namespace.clone(),
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_crds {
        print!("{}", crds_yaml()?);
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting Component Operator");
    info!("  Version: {}", component_operator::VERSION);
    info!("  API: {}", args.api_addr);
    info!("  Namespace: {}", args.namespace.as_deref().unwrap_or("<all>"));
    info!("  Finalizers: {}", args.enable_finalizers);

    let api_addr: SocketAddr = args
        .api_addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid API address: {}", e)))?;
    let http_timeout = Duration::from_secs(args.http_timeout_secs);
    let tag_ttl = Duration::from_secs(args.tag_cache_ttl_secs);

    let client = Client::try_default().await?;
    let store: ObjectStoreRef = Arc::new(KubeStore::new(client.clone()));
    let templates: TemplateRendererRef = Arc::new(TemplateSet::from_dir(&args.templates_dir)?);
    let metrics = Arc::new(EngineMetrics::new()?);
    let shutdown = CancellationToken::new();
    let config = args.controller_config();

    // RabbitmqUser
    let admin: RabbitmqAdminRef = Arc::new(RabbitmqHttpAdmin::new(RabbitmqConfig {
        url: args.rabbitmq_url.clone(),
        username: args.rabbitmq_username.clone(),
        password: args.rabbitmq_password.clone(),
        timeout: http_timeout,
    })?);
    let rabbitmq_users = Arc::new(
        ComponentController::new(
            rabbitmquser::CONTROLLER_NAME,
            rabbitmquser::pipeline(admin),
            store.clone(),
            config.clone(),
        )
        .with_metrics(metrics.clone())
        .with_shutdown(shutdown.clone()),
    );

    // AppPlatform
    let tags = Arc::new(TagCache::new(
        Arc::new(RegistryTagFetcher::new(args.registry_url.clone(), http_timeout)?),
        tag_ttl,
    ));
    let settings = appplatform::AppPlatformSettings {
        default_image: args.image_repository.clone(),
        tag_poll_interval: tag_ttl,
        ..Default::default()
    };
    let app_platforms = Arc::new(
        ComponentController::new(
            appplatform::CONTROLLER_NAME,
            appplatform::pipeline(&settings, tags),
            store,
            config,
        )
        .with_templates(templates)
        .with_metrics(metrics.clone())
        .with_shutdown(shutdown.clone()),
    );

    // API server
    let ready = Arc::new(AtomicBool::new(false));
    let router = RestRouter::new(
        metrics,
        vec![rabbitmq_users.info(), app_platforms.info()],
        ready.clone(),
    );
    let api = ApiServer::new(ApiServerConfig { addr: api_addr }, router);
    let api_handle = tokio::spawn(api.run(shutdown.clone()));

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        signal.cancel();
    });

    ready.store(true, Ordering::Release);
    let result = tokio::try_join!(
        rabbitmq_users.run(client.clone()),
        app_platforms.run(client),
    );
    shutdown.cancel();

    match api_handle.await {
        Ok(Err(e)) => error!("API server error: {}", e),
        Err(e) => error!("API server task failed: {}", e),
        Ok(Ok(())) => {}
    }
    result?;

    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive(directive("hyper=warn")?)
        .add_directive(directive("kube=info")?)
        .add_directive(directive("tower=warn")?)
        .add_directive(directive("tower_http=info")?);

    let installed = if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
    };
    installed.map_err(|e| Error::Configuration(format!("Failed to install logger: {}", e)))
}

fn directive(spec: &str) -> Result<tracing_subscriber::filter::Directive> {
    spec.parse()
        .map_err(|e| Error::Configuration(format!("Invalid log directive {}: {}", spec, e)))
}
