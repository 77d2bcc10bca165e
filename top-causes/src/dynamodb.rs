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

//! # dynamodb
//!
//! [Storage] implementation for DynamoDB.
//!
//! [Storage]: crate::storage

use async_trait::async_trait;
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion, Region};
use aws_sdk_dynamodb::{
    config::{http::HttpResponse, Credentials as AwsCredentials},
    error::SdkError,
    operation::scan::ScanError,
};
use serde::Deserialize;
use serde_dynamo::aws_sdk_dynamodb_1::from_items;
use snafu::{Backtrace, OptionExt, ResultExt, Snafu};
use tracing::debug;
use url::Url;

use crate::{entities::CauseRecord, storage, util::Credentials};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to deserialize causes read from {table}: {source}"))]
    Decode {
        table: String,
        source: serde_dynamo::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("No endpoint URLs specified"))]
    NoEndpoints { backtrace: Backtrace },
    #[snafu(display("Failed to scan table {table}: {source}"))]
    Scan {
        table: String,
        #[snafu(source(from(SdkError<ScanError, HttpResponse>, Box::new)))]
        source: Box<SdkError<ScanError, HttpResponse>>,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// The attributes we ask DynamoDB to return for each cause
static CAUSE_PROJECTION: &str = "cause_id, cause_desc, follower_count";

/// Where to find DynamoDB
///
/// If you're truly talking to DynamoDB in AWS, you can give a region. You can also give one or
/// more URLs (`http://localhost:8000` for DynamoDB local, say, or a ScyllaDB cluster's Alternator
/// interface); at present only the first is used.
#[derive(Clone, Debug, Deserialize)]
pub enum Location {
    Region(String),
    Endpoints(Vec<Url>),
}

impl Default for Location {
    fn default() -> Self {
        Location::Region("us-west-2".to_owned())
    }
}

pub struct Client {
    client: ::aws_sdk_dynamodb::Client,
    table: String,
    page_size: Option<i32>,
}

impl Client {
    pub async fn new(
        location: &Location,
        credentials: &Option<Credentials>,
        table: &str,
    ) -> Result<Client> {
        use secrecy::ExposeSecret;
        let creds = credentials.as_ref().map(|Credentials((id, secret))| {
            AwsCredentials::new(
                id.expose_secret(),
                secret.expose_secret(),
                None,
                None,
                "top-causes",
            )
        });

        let config = match location {
            Location::Region(region) => {
                let region_provider =
                    RegionProviderChain::first_try(Some(Region::new(region.clone())))
                        .or_default_provider()
                        .or_else(Region::new("us-west-2"));
                let mut loader =
                    aws_config::defaults(BehaviorVersion::latest()).region(region_provider);
                if let Some(creds) = creds {
                    loader = loader.credentials_provider(creds);
                }
                loader.load().await
            }
            Location::Endpoints(endpoints) => {
                let ep_url = endpoints.first().context(NoEndpointsSnafu)?;
                // The SDK insists on a region even when it's been given an endpoint
                let region_provider =
                    RegionProviderChain::default_provider().or_else(Region::new("us-west-2"));
                let mut loader = aws_config::defaults(BehaviorVersion::latest())
                    .region(region_provider)
                    .endpoint_url(ep_url.as_str());
                if let Some(creds) = creds {
                    loader = loader.credentials_provider(creds);
                }
                loader.load().await
            }
        };
        Ok(Client {
            client: ::aws_sdk_dynamodb::Client::new(&config),
            table: table.to_owned(),
            page_size: None,
        })
    }

    /// Cap the number of items DynamoDB evaluates per `Scan` page; by default, pages are limited
    /// only by DynamoDB's 1MB ceiling
    pub fn with_page_size(mut self, page_size: i32) -> Client {
        self.page_size = Some(page_size);
        self
    }

    /// Scan the causes table, following the paginator until the table's exhausted
    async fn scan_causes(&self) -> Result<Vec<CauseRecord>> {
        let items = self
            .client
            .scan()
            .table_name(&self.table)
            .projection_expression(CAUSE_PROJECTION)
            .set_limit(self.page_size)
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .context(ScanSnafu {
                table: self.table.clone(),
            })?;
        debug!("Scanned {} items from {}", items.len(), self.table);
        from_items::<CauseRecord>(items).context(DecodeSnafu {
            table: self.table.clone(),
        })
    }
}

#[async_trait]
impl storage::Backend for Client {
    async fn all_causes(&self) -> std::result::Result<Vec<CauseRecord>, storage::Error> {
        self.scan_causes().await.map_err(storage::Error::new)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn locations() {
        #[derive(Deserialize)]
        struct Holder {
            location: Location,
        }
        let holder: Holder = toml::from_str(r#"location = { Region = "us-east-1" }"#).unwrap();
        assert!(matches!(holder.location, Location::Region(r) if r == "us-east-1"));

        let holder: Holder =
            toml::from_str(r#"location = { Endpoints = ["http://localhost:8000"] }"#).unwrap();
        match holder.location {
            Location::Endpoints(urls) => {
                assert_eq!(urls.len(), 1);
                assert_eq!(urls[0].as_str(), "http://localhost:8000/");
            }
            _ => panic!("Expected endpoints"),
        }
    }

    /// Scan a real table, a page at a time
    ///
    /// Needs DynamoDB-local (or ScyllaDB's Alternator interface) listening at
    /// `TOP_CAUSES_TEST_ENDPOINT` (default `http://localhost:8000`).
    #[tokio::test]
    #[ignore = "requires a local DynamoDB"]
    async fn scan_local_table() {
        use aws_sdk_dynamodb::types::{
            AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType,
            ScalarAttributeType,
        };

        let endpoint = std::env::var("TOP_CAUSES_TEST_ENDPOINT")
            .unwrap_or_else(|_| "http://localhost:8000".to_owned());
        let table = format!("causes-test-{}", std::process::id());
        let client = Client::new(
            &Location::Endpoints(vec![Url::parse(&endpoint).unwrap()]),
            &Some(Credentials(("local".into(), "local".into()))),
            &table,
        )
        .await
        .unwrap()
        .with_page_size(1);

        client
            .client
            .create_table()
            .table_name(&table)
            .attribute_definitions(
                AttributeDefinition::builder()
                    .attribute_name("cause_id")
                    .attribute_type(ScalarAttributeType::S)
                    .build()
                    .unwrap(),
            )
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name("cause_id")
                    .key_type(KeyType::Hash)
                    .build()
                    .unwrap(),
            )
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await
            .unwrap();

        for (id, desc, count) in [
            ("cause1", Some("Environment"), Some("40")),
            ("cause2", Some("Labor"), Some("30")),
            ("cause3", Some("Housing"), None),
            ("cause4", None, Some("5")),
        ] {
            let mut req = client
                .client
                .put_item()
                .table_name(&table)
                .item("cause_id", AttributeValue::S(id.to_owned()))
                // Not projected, so it must not interfere with decoding
                .item("owner", AttributeValue::Bool(true));
            if let Some(desc) = desc {
                req = req.item("cause_desc", AttributeValue::S(desc.to_owned()));
            }
            if let Some(count) = count {
                req = req.item("follower_count", AttributeValue::N(count.to_owned()));
            }
            req.send().await.unwrap();
        }

        // Four items at one per page means following the paginator
        let records = client.scan_causes().await;
        client
            .client
            .delete_table()
            .table_name(&table)
            .send()
            .await
            .unwrap();
        let mut records = records.unwrap();
        records.sort_by(|a, b| a.cause_id.cmp(&b.cause_id));
        assert_eq!(
            records,
            vec![
                CauseRecord::new("cause1".parse().unwrap(), "Environment", Some(40)),
                CauseRecord::new("cause2".parse().unwrap(), "Labor", Some(30)),
                CauseRecord::new("cause3".parse().unwrap(), "Housing", None),
                CauseRecord::new("cause4".parse().unwrap(), "", Some(5)),
            ]
        );
    }

    #[tokio::test]
    async fn no_endpoints() {
        let result = Client::new(&Location::Endpoints(vec![]), &None, "causes").await;
        assert!(matches!(result, Err(Error::NoEndpoints { .. })));
    }
}
