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

//! Drive the top causes API end-to-end, against an in-memory datastore.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header::AUTHORIZATION, header::CONTENT_TYPE, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use top_causes::{
    authn::TokenVerifier,
    causes::make_router,
    entities::{CauseId, CauseRecord, Subject},
    http::TopCauses,
    keys::{KeyId, VerifyingKey, VerifyingKeys},
    storage::{self, Backend},
    token::mint_token,
};

// With apologies to J.R.R. Tolkein, but I needed 64 bytes exactly.
const TEST_KEY: &[u8; 64] = b"All that is gold does not glitter-- Not all who wander are lost.";

const KEY_ID: &str = "keyid:20250101";

/// An in-memory datastore that counts how many times it's consulted
struct Fixed {
    records: Vec<CauseRecord>,
    calls: AtomicUsize,
}

impl Fixed {
    fn new(records: Vec<CauseRecord>) -> Fixed {
        Fixed {
            records,
            calls: AtomicUsize::new(0),
        }
    }
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for Fixed {
    async fn all_causes(&self) -> Result<Vec<CauseRecord>, storage::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.clone())
    }
}

/// A datastore that's always down
struct Broken;

#[async_trait]
impl Backend for Broken {
    async fn all_causes(&self) -> Result<Vec<CauseRecord>, storage::Error> {
        Err(storage::Error::new(std::io::Error::other(
            "ProvisionedThroughputExceededException",
        )))
    }
}

/// A datastore that takes its time
struct Slow;

#[async_trait]
impl Backend for Slow {
    async fn all_causes(&self) -> Result<Vec<CauseRecord>, storage::Error> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Vec::new())
    }
}

fn record(id: &str, desc: &str, count: Option<u64>) -> CauseRecord {
    CauseRecord::new(CauseId::new(id).unwrap(), desc, count)
}

fn sample_records() -> Vec<CauseRecord> {
    vec![
        record("cause1", "Environment", Some(40)),
        record("cause2", "Labor", Some(30)),
        record("cause3", "Housing", None),
    ]
}

fn verifier() -> TokenVerifier {
    TokenVerifier::new(
        VerifyingKeys::from([(
            KeyId::new(KEY_ID).unwrap(),
            VerifyingKey::new(TEST_KEY.to_vec()).unwrap(),
        )]),
        None,
        None,
    )
}

fn router(storage: Arc<dyn Backend + Send + Sync>, scan_timeout: Option<Duration>) -> Router {
    make_router(Arc::new(TopCauses::new(
        storage,
        Arc::new(verifier()),
        scan_timeout,
    )))
}

fn token_signed_with(key: &[u8]) -> String {
    mint_token(
        &Subject::new("11111111-2222-3333-4444-555555555555").unwrap(),
        &KeyId::new(KEY_ID).unwrap(),
        &VerifyingKey::new(key.to_vec()).unwrap(),
        None,
        None,
        &chrono::Duration::minutes(5),
    )
    .unwrap()
}

fn good_token() -> String {
    token_signed_with(TEST_KEY)
}

/// Send a GET for `uri`, returning the status, the Content-Type & the parsed body
async fn get(router: Router, uri: &str, token: Option<&str>) -> (StatusCode, String, Value) {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
    }
    let rsp = router
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = rsp.status();
    let content_type = rsp
        .headers()
        .get(CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_owned())
        .unwrap_or_default();
    let body = to_bytes(rsp.into_body(), usize::MAX).await.unwrap();
    (status, content_type, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn top_two() {
    let storage = Arc::new(Fixed::new(sample_records()));
    let (status, content_type, body) =
        get(router(storage.clone(), None), "/causes/top/2", Some(&good_token())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "application/json");
    assert_eq!(
        body,
        json!([
            {"cause_id": "cause1", "cause_desc": "Environment", "follower_count": 40, "rank": 1},
            {"cause_id": "cause2", "cause_desc": "Labor", "follower_count": 30, "rank": 2}
        ])
    );
    assert_eq!(storage.calls(), 1);
}

#[tokio::test]
async fn fewer_eligible_than_asked_for() {
    let storage = Arc::new(Fixed::new(sample_records()));
    let (status, _, body) =
        get(router(storage.clone(), None), "/causes/top/5", Some(&good_token())).await;
    assert_eq!(status, StatusCode::OK);
    let ranked = body.as_array().unwrap();
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0]["rank"], 1);
    assert_eq!(ranked[1]["rank"], 2);
    assert!(ranked.iter().all(|r| r["cause_id"] != "cause3"));

    // A limit too large to represent still means "all of them"
    let (status, _, body) = get(
        router(storage.clone(), None),
        "/causes/top/99999999999999999999999",
        Some(&good_token()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert_eq!(storage.calls(), 2);
}

#[tokio::test]
async fn nothing_eligible() {
    let storage = Arc::new(Fixed::new(vec![record("cause3", "Housing", None)]));
    let (status, _, body) =
        get(router(storage.clone(), None), "/causes/top/3", Some(&good_token())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn bad_limits() {
    let storage = Arc::new(Fixed::new(sample_records()));
    let token = good_token();
    for uri in [
        "/causes/top/0",
        "/causes/top/-3",
        "/causes/top/abc",
        "/causes/top/2.5",
        "/causes/top/%202",
        "/causes/top",
        "/causes/top/",
    ] {
        let (status, content_type, body) =
            get(router(storage.clone(), None), uri, Some(&token)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(content_type, "application/json");
        assert_eq!(body, json!({"error": "Missing limit in path"}));
    }
    assert_eq!(storage.calls(), 0);
}

#[tokio::test]
async fn unauthorized() {
    let storage = Arc::new(Fixed::new(sample_records()));
    let wrong_key = token_signed_with(&[0x5a; 64]);
    for token in [None, Some("not-a-jwt"), Some(wrong_key.as_str())] {
        let (status, content_type, body) =
            get(router(storage.clone(), None), "/causes/top/2", token).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(content_type, "application/json");
        assert_eq!(body, json!({"message": "Unauthorized"}));
    }
    // Identity is checked before the limit
    let (status, _, _) = get(router(storage.clone(), None), "/causes/top/0", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(storage.calls(), 0);
}

#[tokio::test]
async fn storage_failure() {
    let (status, content_type, body) =
        get(router(Arc::new(Broken), None), "/causes/top/2", Some(&good_token())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(content_type, "application/json");
    let msg = body["error"].as_str().unwrap();
    assert!(msg.starts_with("Unexpected server error"));
    assert!(msg.contains("ProvisionedThroughputExceededException"));
}

#[tokio::test(start_paused = true)]
async fn storage_timeout() {
    let (status, _, body) = get(
        router(Arc::new(Slow), Some(Duration::from_secs(1))),
        "/causes/top/2",
        Some(&good_token()),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("Unexpected server error"));
}
