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

//! # top-causes configuration
//!
//! Both binaries (the long-running daemon & the Lambda function) read the same TOML file:
//!
//! ```toml
//! version = "1"
//! public-address = "0.0.0.0:20679"
//! scan-timeout = { secs = 10, nanos = 0 }
//! issuer = "auth.example.com"
//! audience = "causes"
//!
//! [storage-config.Dynamo]
//! table = "causes"
//! location = { Region = "us-west-2" }
//!
//! [verifying-keys]
//! "keyid:20250101" = [ ... ]
//! ```
//!
//! Every key but `version` may be omitted, in which case the default is used.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::Deserialize;
use snafu::{prelude::*, IntoError};
use tracing::{debug, warn};

use crate::{
    authn::TokenVerifier,
    dynamodb::{self, Location as DynamoLocation},
    http::TopCauses,
    keys::VerifyingKeys,
    storage::Backend as StorageBackend,
    util::Credentials,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Unable to read configuration file {pth:?}: {source}"))]
    ConfigNotFound {
        pth: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Error parsing configuration file {pth:?}: {source}"))]
    ConfigParse {
        pth: PathBuf,
        source: toml::de::Error,
    },
    #[snafu(display("Failed to connect to DynamoDB: {source}"))]
    Dynamo { source: dynamodb::Error },
}

type Result<T> = std::result::Result<T, Error>;

/// Where the configuration is looked for when no path is given
pub static DEFAULT_CONFIG_PATH: &str = "/etc/top-causes.toml";

/// The table read when none is configured
pub static DEFAULT_TABLE: &str = "causes";

fn default_table() -> String {
    DEFAULT_TABLE.to_owned()
}

/// top-causes datastore configuration
///
/// There's only one implementation at present, but the rest of the crate only sees a
/// [StorageBackend], so adding another is a matter of adding a variant here.
// Nb that we can only deserialize (i.e. not serialize) due to the presence of secrets in the
// struct
#[derive(Clone, Debug, Deserialize)]
pub enum StorageConfig {
    /// Use DynamoDB (or anything speaking its protocol, such as ScyllaDB's Alternator interface)
    Dynamo {
        /// Static AWS credentials: key ID & secret key. If omitted, the SDK's usual credentials
        /// chain (environment, profile, instance role & so forth) applies.
        credentials: Option<Credentials>,
        /// A region or explicit endpoint URLs
        #[serde(default)]
        location: DynamoLocation,
        /// The table holding causes
        #[serde(default = "default_table")]
        table: String,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Dynamo {
            credentials: None,
            location: DynamoLocation::default(),
            table: default_table(),
        }
    }
}

/// top-causes configuration, version one
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ConfigV1 {
    /// Local address at which `top-causesd` listens; specify as "address:port"
    #[serde(rename = "public-address")]
    public_address: SocketAddr,
    /// Retrieving causes from the datastore will be abandoned after this long; None means wait
    /// indefinitely
    #[serde(rename = "scan-timeout")]
    scan_timeout: Option<Duration>,
    /// If given, identity tokens must name this issuer
    issuer: Option<String>,
    /// If given, identity tokens must name this audience
    audience: Option<String>,
    #[serde(rename = "storage-config")]
    storage_config: StorageConfig,
    /// Keys with which identity tokens may be verified
    #[serde(rename = "verifying-keys")]
    verifying_keys: VerifyingKeys,
}

impl ConfigV1 {
    pub fn public_address(&self) -> &SocketAddr {
        &self.public_address
    }
    pub fn scan_timeout(&self) -> Option<Duration> {
        self.scan_timeout
    }
    pub fn storage_config(&self) -> &StorageConfig {
        &self.storage_config
    }
    pub fn verifying_keys(&self) -> &VerifyingKeys {
        &self.verifying_keys
    }
}

impl Default for ConfigV1 {
    fn default() -> Self {
        ConfigV1 {
            public_address: "0.0.0.0:20679".parse::<SocketAddr>().unwrap(/* known good */),
            scan_timeout: Some(Duration::from_secs(10)),
            issuer: None,
            audience: None,
            storage_config: StorageConfig::default(),
            verifying_keys: VerifyingKeys::default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "version")] // tag "internally"
enum Configuration {
    #[serde(rename = "1")]
    V1(ConfigV1),
}

fn parse_config_text(text: &str, pth: &Path) -> Result<ConfigV1> {
    match toml::from_str::<Configuration>(text) {
        Ok(Configuration::V1(cfg)) => Ok(cfg),
        Err(err) => Err(ConfigParseSnafu {
            pth: pth.to_path_buf(),
        }
        .into_error(err)),
    }
}

/// Parse the top-causes configuration file
///
/// If `cfg` is None, [DEFAULT_CONFIG_PATH] is tried; if that doesn't exist, the defaults are
/// used. A file that was asked for by name must exist.
pub fn parse_config(cfg: &Option<PathBuf>) -> Result<ConfigV1> {
    let (pth, defaulted): (PathBuf, bool) = cfg.as_ref().map_or_else(
        || (PathBuf::from(DEFAULT_CONFIG_PATH), true),
        |p| (p.clone(), false),
    );
    match std::fs::read_to_string(&pth) {
        Ok(text) => parse_config_text(&text, &pth),
        Err(err) => {
            if defaulted {
                debug!("No configuration at {:?}; using defaults", pth);
                Ok(ConfigV1::default())
            } else {
                Err(ConfigNotFoundSnafu { pth }.into_error(err))
            }
        }
    }
}

/// Build the storage implementation called for by `config`
///
/// `credentials`, if given, override any in `config`.
pub async fn select_storage(
    config: &StorageConfig,
    credentials: Option<Credentials>,
) -> Result<Arc<dyn StorageBackend + Send + Sync>> {
    match config {
        StorageConfig::Dynamo {
            credentials: configured,
            location,
            table,
        } => {
            let credentials = credentials.or_else(|| configured.clone());
            Ok(Arc::new(
                dynamodb::Client::new(location, &credentials, table)
                    .await
                    .context(DynamoSnafu)?,
            ))
        }
    }
}

/// Build the application state described by `cfg`
pub async fn make_state(
    cfg: &ConfigV1,
    credentials: Option<Credentials>,
) -> Result<Arc<TopCauses>> {
    if cfg.verifying_keys.is_empty() {
        warn!("No verifying keys are configured; every request will be refused");
    }
    let storage = select_storage(&cfg.storage_config, credentials).await?;
    let verifier = Arc::new(TokenVerifier::new(
        cfg.verifying_keys.clone(),
        cfg.issuer.clone(),
        cfg.audience.clone(),
    ));
    Ok(Arc::new(TopCauses::new(storage, verifier, cfg.scan_timeout)))
}
