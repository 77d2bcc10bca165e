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

//! # top-causes-lambda
//!
//! Serve the [top causes API](top_causes::causes) as an AWS Lambda function behind API Gateway.
//!
//! Configuration is read from the file named by `TOP_CAUSES_CONFIG` (falling back to the same
//! defaults as `top-causesd`). The application state, including the DynamoDB client, is built
//! once per execution environment & shared by every invocation it handles. Logs are always JSON,
//! at a level governed by `RUST_LOG` (default `info`).

use std::{fmt::Display, io, path::PathBuf};

use snafu::prelude::*;
use tracing::{info, Level};
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, Registry};

use top_causes::{
    causes::make_router,
    config::{self, make_state, parse_config},
};

#[derive(Snafu)]
pub enum Error {
    #[snafu(display("{source}"))]
    Config { source: config::Error },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    EnvFilter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("The Lambda runtime failed: {source}"))]
    Runtime { source: lambda_http::Error },
    #[snafu(display("Failed to set the tracing subscriber: {source}"))]
    Subscriber {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self::Display::fmt(&self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

fn configure_logging() -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env()
        .context(EnvFilterSnafu)?;
    // CloudWatch stamps each line itself
    let formatter = fmt::Layer::default()
        .json()
        .with_current_span(true)
        .with_ansi(false)
        .without_time()
        .with_writer(io::stdout);
    tracing::subscriber::set_global_default(Registry::default().with(formatter).with(filter))
        .context(SubscriberSnafu)
}

#[tokio::main]
async fn main() -> Result<()> {
    configure_logging()?;

    let cfg = parse_config(&std::env::var_os("TOP_CAUSES_CONFIG").map(PathBuf::from))
        .context(ConfigSnafu)?;
    // No meter provider is installed here, so the instruments are no-ops; there's no one to
    // scrape them.
    let state = make_state(&cfg, None).await.context(ConfigSnafu)?;
    info!("top-causes-lambda initialized");

    lambda_http::run(make_router(state))
        .await
        .context(RuntimeSnafu)
}
