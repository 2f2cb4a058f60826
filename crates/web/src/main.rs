mod handlers;
mod lifecycle;

use std::{
    env,
    future::Future,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    process::ExitCode,
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use argp::FromArgs;
use axum::{
    Router,
    extract::{ConnectInfo, FromRef},
    http::{Request, StatusCode, header},
};
use pullhook_core::config::{Config, ServerConfig};
use pullhook_sync::{SyncRunner, TaskGate};
use tokio::{net::TcpListener, sync::oneshot};
use tower::ServiceBuilder;
use tower_http::{
    ServiceBuilderExt,
    timeout::TimeoutLayer,
    trace::{DefaultOnRequest, DefaultOnResponse, MakeSpan, TraceLayer},
};
use tracing::{Level, Span};
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::{
    handlers::build_router,
    lifecycle::{ExecutableWatcher, termination_signal, wait_for_shutdown},
};

#[derive(Clone, FromRef)]
pub struct AppState {
    config: Arc<Config>,
    runner: Arc<SyncRunner>,
    gate: TaskGate,
    started: Instant,
}

impl AppState {
    pub fn new(config: Arc<Config>, runner: Arc<SyncRunner>) -> Self {
        Self { config, runner, gate: TaskGate::new(), started: Instant::now() }
    }
}

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// Runs `git pull` in the current directory whenever GitHub reports a push.
struct Args {
    #[argp(option, short = 'p')]
    /// port to listen on, 0 picks a free one
    port: Option<u16>,
    #[argp(option, short = 's')]
    /// webhook shared secret (defaults to $PULLHOOK_SECRET)
    secret: Option<String>,
    #[argp(option, short = 'c')]
    /// YAML config file
    config: Option<PathBuf>,
    #[argp(option)]
    /// address to listen on
    bind: Option<IpAddr>,
    #[argp(switch)]
    /// don't shut down when the executable is replaced
    no_watch: bool,
    #[argp(option)]
    /// seconds between checks of the executable
    poll_interval: Option<u64>,
}

impl Args {
    /// Flags take precedence over the config file.
    fn load_config(&self, env_secret: Option<String>) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(bind) = self.bind {
            config.server.bind = bind;
        }
        if let Some(secret) = &self.secret {
            config.webhook.secret = secret.clone();
        } else if config.webhook.secret.is_empty()
            && let Some(secret) = env_secret
        {
            config.webhook.secret = secret;
        }
        if self.no_watch {
            config.watch.enabled = false;
        }
        if let Some(secs) = self.poll_interval {
            config.watch.poll_interval_secs = secs;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let env_filter = EnvFilter::builder()
        // Default to info level
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    let args: Args = argp::parse_args_or_exit(argp::DEFAULT);
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pullhook: {e:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let started = Instant::now();
    let config = Arc::new(args.load_config(env::var("PULLHOOK_SECRET").ok())?);
    let working_dir = env::current_dir().context("Failed to get working directory")?;
    let executable = env::current_exe().context("Failed to locate executable")?;
    tracing::info!("Running in: {}", working_dir.display());
    tracing::info!("Executable: {}", executable.display());
    if config.webhook.secret.is_empty() {
        tracing::warn!("No webhook secret configured, deliveries won't be verified");
    }

    let runner = Arc::new(SyncRunner::new(config.sync.command.clone())?);
    let state = AppState { started, ..AppState::new(config.clone(), runner) };
    let gate = state.gate.clone();
    let listener = bind(&config.server).await?;

    let watcher = if config.watch.enabled {
        match ExecutableWatcher::new(&executable, config.watch.poll_interval()).await {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!("Failed to initialize watcher: {:?}", e);
                None
            }
        }
    } else {
        None
    };

    #[cfg(target_os = "linux")]
    {
        use libsystemd::daemon::{NotifyState, notify};
        if let Err(e) = notify(false, &[NotifyState::Ready]) {
            tracing::warn!("Failed to notify systemd: {e}");
        }
    }

    let (lifecycle_tx, lifecycle_rx) = oneshot::channel();
    let shutdown = async move {
        let result = wait_for_shutdown(watcher, termination_signal()).await;
        let _ = lifecycle_tx.send(result);
    };
    serve(listener, app(state), shutdown, &gate).await?;

    #[cfg(target_os = "linux")]
    {
        use libsystemd::daemon::{NotifyState, notify};
        if let Err(e) = notify(false, &[NotifyState::Stopping]) {
            tracing::warn!("Failed to notify systemd: {e}");
        }
    }

    tracing::info!("Shut down gracefully");
    lifecycle_rx.await.unwrap_or(Ok(()))
}

/// Use a socket passed by systemd if there is one, otherwise bind our own.
async fn bind(config: &ServerConfig) -> Result<TcpListener> {
    #[cfg(target_os = "linux")]
    {
        use std::os::fd::{FromRawFd, IntoRawFd};
        match libsystemd::activation::receive_descriptors_with_names(false) {
            Ok(fds) => {
                if let Some((fd, name)) = fds.into_iter().next() {
                    tracing::info!("Listening on: {}", name);
                    let std_listener =
                        unsafe { std::net::TcpListener::from_raw_fd(fd.into_raw_fd()) };
                    std_listener.set_nonblocking(true).context("Failed to set non-blocking")?;
                    return TcpListener::from_std(std_listener).context("Failed to create listener");
                }
            }
            Err(e) => tracing::warn!("Failed to receive fds: {e}"),
        }
    }
    let addr = SocketAddr::new(config.bind, config.port);
    let listener =
        TcpListener::bind(addr).await.with_context(|| format!("Failed to listen on {addr}"))?;
    tracing::info!("Listening on: {}", listener.local_addr()?);
    Ok(listener)
}

/// Serve until `shutdown` resolves, then wait for queued syncs to finish so
/// none is cut off when the process exits.
async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
    gate: &TaskGate,
) -> Result<()> {
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await
        .context("Web server error")?;
    tracing::info!("Web server stopped");
    let pending = gate.outstanding();
    if pending > 0 {
        tracing::info!("Waiting for {pending} sync task(s)");
    }
    gate.drain().await;
    Ok(())
}

fn app(state: AppState) -> Router {
    let sensitive_headers: Arc<[_]> = vec![
        header::AUTHORIZATION,
        header::HeaderName::from_static("x-hub-signature-256"),
        header::HeaderName::from_static("x-hub-signature"),
    ]
    .into();
    let middleware = ServiceBuilder::new()
        .sensitive_request_headers(sensitive_headers)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(RequestSpan { level: Level::INFO })
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(60),
        ));
    build_router().with_state(state).layer(middleware)
}

/// Request span carrying the method, remote address and path.
#[derive(Debug, Clone)]
pub struct RequestSpan {
    level: Level,
}

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let forwarded = ["CF-Connecting-IP", "X-Forwarded-For"].iter().find_map(|name| {
            let value = request.headers().get(*name)?.to_str().ok()?;
            IpAddr::from_str(value.split(',').next()?.trim()).ok()
        });
        let ip = forwarded.or_else(|| {
            request.extensions().get::<ConnectInfo<SocketAddr>>().map(|ConnectInfo(addr)| addr.ip())
        });
        let ip = ip.unwrap_or(IpAddr::from([0, 0, 0, 0]));
        macro_rules! make_span {
            ($level:expr) => {
                tracing::span!(
                    $level,
                    "request",
                    method = %request.method(),
                    ip = %ip,
                    path = %request.uri().path(),
                )
            }
        }
        match self.level {
            Level::ERROR => make_span!(Level::ERROR),
            Level::WARN => make_span!(Level::WARN),
            Level::INFO => make_span!(Level::INFO),
            Level::DEBUG => make_span!(Level::DEBUG),
            Level::TRACE => make_span!(Level::TRACE),
        }
    }
}
