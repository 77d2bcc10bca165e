// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of top-causes.
//
// top-causes is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// top-causes is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with top-causes.  If
// not, see <http://www.gnu.org/licenses/>.

//! # top-causesd
//!
//! The long-running top-causes server.
//!
//! Serves the [top causes API](top_causes::causes) along with `/healthcheck` & `/metrics`. On
//! `SIGHUP`, drains in-flight requests, re-reads its configuration & starts serving again; on
//! `SIGTERM`, drains & exits.

use std::{
    fmt::Display,
    future::IntoFuture,
    io,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use clap::{crate_authors, crate_version, value_parser, Arg, ArgAction, Command};
use http::{HeaderName, HeaderValue};
use opentelemetry::{global, KeyValue};
use prometheus::{Encoder, TextEncoder};
use snafu::prelude::*;
use tap::Pipe;
use tokio::{
    net::TcpListener,
    signal::unix::{signal, SignalKind},
    sync::Notify,
};
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{debug, error, info, Level};
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, Layer, Registry};

use top_causes::{
    causes::make_router as make_causes_router,
    config::{self, make_state, parse_config, ConfigV1},
    http::TopCauses,
    metrics::check_metric_registrations,
    util::Credentials,
};

#[derive(Snafu)]
pub enum Error {
    #[snafu(display("Failed to bind to {addr}: {source}"))]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },
    #[snafu(display("{source}"))]
    Config { source: config::Error },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    EnvFilter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Failed to build the Prometheus exporter: {detail}"))]
    Exporter { detail: String },
    #[snafu(display("Failed to install a signal handler: {source}"))]
    Signal { source: std::io::Error },
    #[snafu(display("Failed to set the tracing subscriber: {source}"))]
    Subscriber {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
    #[snafu(display("Failed to instantiate a Tokio runtime: {source}"))]
    TokioRuntime { source: std::io::Error },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self::Display::fmt(&self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

/// Logging-related options read from the command line or the environment
struct LogOpts {
    pub plain: bool,
    pub level: Level,
}

impl LogOpts {
    fn new(matches: &clap::ArgMatches) -> LogOpts {
        LogOpts {
            plain: matches.get_flag("plain"),
            level: match (
                matches.get_flag("debug"),
                matches.get_flag("verbose"),
                matches.get_flag("quiet"),
            ) {
                (true, _, _) => Level::TRACE,
                (false, true, _) => Level::DEBUG,
                (false, false, true) => Level::ERROR,
                (_, _, _) => Level::INFO,
            },
        }
    }
}

/// Configuration options read from the CLI (or the environment)
struct CliOpts {
    pub log_opts: LogOpts,
    pub cfg: Option<PathBuf>,
    pub credentials: Option<Credentials>,
}

impl CliOpts {
    fn new(matches: clap::ArgMatches) -> CliOpts {
        CliOpts {
            log_opts: LogOpts::new(&matches),
            cfg: matches.get_one::<PathBuf>("config").cloned(),
            credentials: matches.get_one::<Credentials>("credentials").cloned(),
        }
    }
}

/// Configure logging for the process
///
/// JSON to stdout by default, or a compact, human-readable format with `--plain`. The level is set
/// by `-D`, `-v` or `-q`, but `RUST_LOG` wins if it's set.
fn configure_logging(
    logopts: &LogOpts,
) -> Result<(Box<dyn Layer<Registry> + Send + Sync>, EnvFilter)> {
    let filter = EnvFilter::builder()
        .with_default_directive(logopts.level.into())
        .from_env()
        .context(EnvFilterSnafu)?;

    // `json()` & `compact()` produce layers *of different types*, hence the box
    let formatter: Box<dyn Layer<Registry> + Send + Sync> = if logopts.plain {
        Box::new(fmt::Layer::default().compact().with_writer(io::stdout))
    } else {
        Box::new(
            fmt::Layer::default()
                .json()
                .with_current_span(true)
                .with_writer(io::stdout),
        )
    };

    Ok((formatter, filter))
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      operational endpoints                                     //
////////////////////////////////////////////////////////////////////////////////////////////////////

async fn healthcheck() -> &'static str {
    "GOOD"
}

async fn metrics(State(registry): State<Arc<prometheus::Registry>>) -> axum::response::Response {
    let mut output = Vec::new();
    match TextEncoder::new().encode(&registry.gather(), &mut output) {
        Ok(_) => (
            StatusCode::OK,
            [(CONTENT_TYPE, HeaderValue::from_static(prometheus::TEXT_FORMAT))],
            output,
        )
            .into_response(),
        Err(err) => {
            error!("Failed to encode Prometheus metrics: {:?}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{err}")).into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           the server                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Counter for generating request IDs; a u64 is more easily read than a UUID & doubles as a rough
/// gauge of how long the server's been up.
#[derive(Clone, Debug, Default)]
struct RequestIdGenerator {
    counter: Arc<AtomicU64>,
}

impl MakeRequestId for RequestIdGenerator {
    fn make_request_id<B>(&mut self, _request: &axum::extract::Request<B>) -> Option<RequestId> {
        self.counter
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
            .pipe(|s| RequestId::new(HeaderValue::from_str(&s).unwrap(/* known good */)))
            .pipe(Some)
    }
}

/// Make the [Router] served by `top-causesd`
fn make_server_router(
    state: Arc<TopCauses>,
    registry: Arc<prometheus::Registry>,
) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/metrics", get(metrics))
        .with_state(registry)
        .merge(make_causes_router(state))
        // Incoming requests should hit the `SetRequestIdLayer` *first*, so it's applied last:
        //
        //                 requests
        //                    |
        //                    v
        // +---------  SetRequestIdLayer      ---------+
        // | +-----      TraceLayer         -----+     |
        // | | +--- PropagateRequestIdLayer ---+ |     |
        // | | |          handler              | |     |
        // | | +--- PropagateRequestIdLayer ---+ |     |
        // | +-----      TraceLayer         -----+     |
        // +---------   SetRequestIdLayer     ---------+
        //                    |
        //                    v
        //                responses
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            "x-request-id",
        )))
        // Not including headers; the Authorization header carries a credential
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
            RequestIdGenerator::default(),
        ))
}

/// Re-read the configuration at `pth` & rebuild the application state from it
///
/// If the new configuration can't be read, or the state can't be built from it, the failure is
/// logged & `cfg` and `state` are handed back unchanged.
async fn reload(
    pth: &Option<PathBuf>,
    credentials: Option<Credentials>,
    cfg: ConfigV1,
    state: Arc<TopCauses>,
) -> (ConfigV1, Arc<TopCauses>) {
    let new_cfg = match parse_config(pth) {
        Ok(new_cfg) => new_cfg,
        Err(err) => {
            error!("Failed to re-read configuration ({}); keeping the old one.", err);
            return (cfg, state);
        }
    };
    match make_state(&new_cfg, credentials).await {
        Ok(new_state) => (new_cfg, new_state),
        Err(err) => {
            error!("Failed to apply the new configuration ({}); keeping the old one.", err);
            (cfg, state)
        }
    }
}

/// Serve top-causes API requests
#[tracing::instrument(skip(opts, cfg, registry))]
async fn serve(
    opts: CliOpts,
    mut cfg: ConfigV1,
    registry: Arc<prometheus::Registry>,
) -> Result<()> {
    async fn shutdown_signal(nfy: Arc<Notify>) {
        nfy.notified().await
    }

    fn log_on_err<T, E>(x: StdResult<T, E>)
    where
        E: std::error::Error + std::fmt::Debug,
    {
        if let Err(err) = x {
            error!("{:?}", err);
        }
    }

    let mut sighup = signal(SignalKind::hangup()).context(SignalSnafu)?;
    let mut sigterm = signal(SignalKind::terminate()).context(SignalSnafu)?;

    // A bad configuration at startup is fatal; on reload, we keep what we had.
    let mut state = make_state(&cfg, opts.credentials.clone())
        .await
        .context(ConfigSnafu)?;

    // Loop forever, handling SIGHUPs, until asked to terminate:
    loop {
        let nfy = Arc::new(Notify::new());
        let addr = *cfg.public_address();
        let listener = TcpListener::bind(addr)
            .await
            .context(BindSnafu { addr })?;
        info!("top-causesd listening on {}", addr);

        let mut server = axum::serve(listener, make_server_router(state.clone(), registry.clone()))
            .with_graceful_shutdown(shutdown_signal(nfy.clone()))
            .into_future();

        tokio::select! {
            res = &mut server => {
                // The server *should* never shut down on its own
                error!("top-causesd exited unexpectedly with {:?}; shutting-down.", res);
                break;
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP; draining requests to re-read configuration.");
                nfy.notify_one();
                log_on_err(server.await);
                // Rebuilds the DynamoDB client, too, in case its configuration changed
                (cfg, state) = reload(&opts.cfg, opts.credentials.clone(), cfg, state).await;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM; terminating.");
                nfy.notify_one();
                log_on_err(server.await);
                break;
            }
        }; // End tokio::select!.
    } // End loop.

    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    main() & process startup                                    //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Initialize telemetry
///
/// Install an SDK meter provider whose sole reader is a Prometheus exporter; the returned registry
/// backs the `/metrics` endpoint. Must be called before any instruments are built.
fn init_telemetry() -> Result<prometheus::Registry> {
    check_metric_registrations();
    let registry = prometheus::Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()
        .map_err(|err| {
            ExporterSnafu {
                detail: format!("{err}"),
            }
            .build()
        })?;
    let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
        .with_resource(opentelemetry_sdk::Resource::new([KeyValue::new(
            "service.name",
            "top-causes",
        )]))
        .with_reader(exporter)
        .build();
    global::set_meter_provider(provider);
    Ok(registry)
}

fn main() -> Result<()> {
    // Most of top-causesd's configuration is read from file; the command-line options govern where
    // to find that file & how to log. They all have corresponding environment variables for the
    // sake of convenience when running in a container.
    let opts = CliOpts::new(
        Command::new("top-causesd")
            .version(crate_version!())
            .author(crate_authors!())
            .about("Serve the causes with the most followers")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .num_args(1)
                    .value_parser(value_parser!(PathBuf))
                    .env("TOP_CAUSES_CONFIG")
                    .help(
                        "path (absolute or relative to the process' current directory) to a \
                       configuration file",
                    ),
            )
            .arg(
                Arg::new("credentials")
                    .short('a')
                    .long("credentials")
                    .num_args(1)
                    .value_parser(value_parser!(Credentials))
                    .env("TOP_CAUSES_CREDENTIALS")
                    .help("AWS credentials, as \"key-id,secret-key\"; overrides configuration"),
            )
            .arg(
                Arg::new("debug")
                    .short('D')
                    .long("debug")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("TOP_CAUSES_DEBUG")
                    .help("produce debug output"),
            )
            .arg(
                Arg::new("plain")
                    .short('p')
                    .long("plain")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("TOP_CAUSES_PLAIN")
                    .help("log in human-readable format, not JSON/structured logging"),
            )
            .arg(
                Arg::new("quiet")
                    .short('q')
                    .long("quiet")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("TOP_CAUSES_QUIET")
                    .help("produce only error output"),
            )
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("TOP_CAUSES_VERBOSE")
                    .help("produce prolix output"),
            )
            .get_matches(),
    );

    // Things can go wrong before we've parsed our configuration & configured logging, so log to
    // stderr in the meantime (see <https://github.com/tokio-rs/tracing/issues/2903>).
    let bootstrap_subscriber = Registry::default()
        .with(fmt::Layer::default().with_writer(io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(opts.log_opts.level.into())
                .from_env()
                .context(EnvFilterSnafu)?,
        );
    let bootstrap_logging_guard = tracing::subscriber::set_default(bootstrap_subscriber);
    debug!("Temporarily logging to stderr while initializing.");

    let cfg = parse_config(&opts.cfg).context(ConfigSnafu)?;
    let (formatter, filter) = configure_logging(&opts.log_opts)?;

    drop(bootstrap_logging_guard);
    tracing::subscriber::set_global_default(Registry::default().with(formatter).with(filter))
        .context(SubscriberSnafu)?;

    let registry = Arc::new(init_telemetry()?);

    tokio::runtime::Runtime::new()
        .context(TokioRuntimeSnafu)?
        .block_on(serve(opts, cfg, registry))
}
