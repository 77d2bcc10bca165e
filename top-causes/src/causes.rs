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

//! # The top causes API
//!
//! A single resource: `GET /causes/top/{limit}` returns the `limit` causes with the most
//! followers, as a JSON array of [RankedCause]:
//!
//! ```json
//! [
//!   {"cause_id": "cause1", "cause_desc": "Environment", "follower_count": 40, "rank": 1},
//!   {"cause_id": "cause2", "cause_desc": "Labor", "follower_count": 30, "rank": 2}
//! ]
//! ```
//!
//! Callers must authenticate. Requests are handled in three steps, each of which can fail in its
//! own way:
//!
//! 1. identify the caller; failure is a 401 with a deliberately uninformative body
//! 2. parse the limit; failure is a 400
//! 3. retrieve & rank; failure is a 500
//!
//! The datastore is never touched unless the first two succeed.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{ExtensionRejection, PathRejection},
        Path, State,
    },
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use snafu::{prelude::*, Backtrace};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{debug, error, info};

use crate::{
    counter_add,
    entities::{self, Limit, RankedCause, Subject},
    gauge_setu,
    http::{ErrorResponseBody, MessageResponseBody, TopCauses},
    metrics::{self, Sort},
    ranking,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Couldn't parse the limit: {source}"))]
    BadLimit { source: entities::Error },
    #[snafu(display("No limit was given in the request path"))]
    NoLimit { backtrace: Backtrace },
    #[snafu(display("Failed to rank causes: {source}"))]
    Ranking { source: ranking::Error },
    #[snafu(display("The caller could not be identified"))]
    Unauthorized { backtrace: Backtrace },
}

impl Error {
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            ////////////////////////////////////////////////////////////////////////////////////////
            // Broken requests-- tell the caller how to fix it
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::BadLimit { .. } | Error::NoLimit { .. } => (
                StatusCode::BAD_REQUEST,
                "Missing limit in path".to_string(),
            ),
            ////////////////////////////////////////////////////////////////////////////////////////
            // Authorization failure-- don't tell a potential attacker the way in which they failed
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::Unauthorized { .. } => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ////////////////////////////////////////////////////////////////////////////////////////
            // Internal failure-- own up to it:
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::Ranking { source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Unexpected server error: {source}"),
            ),
        }
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (code, msg) = self.as_status_and_msg();
        match self {
            Error::Unauthorized { .. } => {
                (code, Json(MessageResponseBody { message: msg })).into_response()
            }
            _ => (code, Json(ErrorResponseBody { error: msg })).into_response(),
        }
    }
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         Authentication                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("causes.auth.successes", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("causes.auth.failures", Sort::IntegralCounter) }

/// Identify the caller
///
/// On success, the caller's [Subject] is attached to the request as an extension. On failure, the
/// reason is logged & the request passes through without one; it's up to the handler to refuse
/// it. That way every response, including authentication failures, comes from one place.
async fn authenticate(
    State(state): State<Arc<TopCauses>>,
    headers: axum::http::HeaderMap,
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    match state.verifier.identify(&headers).await {
        Ok(subject) => {
            debug!("top-causes identified caller {}", subject);
            request.extensions_mut().insert(subject);
            counter_add!(state.instruments, "causes.auth.successes", 1, &[]);
        }
        Err(err) => {
            info!("top-causes failed to identify the caller: {}", err);
            counter_add!(state.instruments, "causes.auth.failures", 1, &[]);
        }
    }
    next.run(request).await
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       `/causes/top/:limit`                                     //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("causes.top.successes", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("causes.top.bad_requests", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("causes.top.unauthorized", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("causes.top.failures", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("causes.top.last_returned", Sort::IntegralGauge) }

async fn top_causes_with_limit(
    State(state): State<Arc<TopCauses>>,
    subject: StdResult<Extension<Subject>, ExtensionRejection>,
    limit: StdResult<Path<String>, PathRejection>,
) -> axum::response::Response {
    // A path segment that can't even be decoded is no better than a missing one
    let limit = limit.ok().map(|Path(limit)| limit);
    top_causes(&state, subject.ok().map(|Extension(s)| s), limit.as_deref()).await
}

async fn top_causes_without_limit(
    State(state): State<Arc<TopCauses>>,
    subject: StdResult<Extension<Subject>, ExtensionRejection>,
) -> axum::response::Response {
    top_causes(&state, subject.ok().map(|Extension(s)| s), None).await
}

async fn top_causes(
    state: &TopCauses,
    subject: Option<Subject>,
    limit: Option<&str>,
) -> axum::response::Response {
    async fn top_causes1(
        state: &TopCauses,
        subject: Option<&Subject>,
        limit: Option<&str>,
    ) -> Result<Vec<RankedCause>> {
        ensure!(subject.is_some(), UnauthorizedSnafu);
        let limit = limit
            .context(NoLimitSnafu)?
            .parse::<Limit>()
            .context(BadLimitSnafu)?;
        ranking::top_causes(state.storage.as_ref(), limit, state.scan_timeout)
            .await
            .context(RankingSnafu)
    }

    match top_causes1(state, subject.as_ref(), limit).await {
        Ok(ranked) => {
            counter_add!(state.instruments, "causes.top.successes", 1, &[]);
            gauge_setu!(
                state.instruments,
                "causes.top.last_returned",
                ranked.len() as u64,
                &[]
            );
            (StatusCode::OK, Json(ranked)).into_response()
        }
        Err(err) => {
            let who = subject
                .as_ref()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "<unidentified>".to_owned());
            match err {
                Error::Unauthorized { .. } => {
                    info!("top-causes refused an unidentified caller");
                    counter_add!(state.instruments, "causes.top.unauthorized", 1, &[]);
                }
                Error::BadLimit { .. } | Error::NoLimit { .. } => {
                    info!("Bad top causes request from {}: {}", who, err);
                    counter_add!(state.instruments, "causes.top.bad_requests", 1, &[]);
                }
                Error::Ranking { .. } => {
                    error!("Failed to produce top causes for {}: {:?}", who, err);
                    counter_add!(state.instruments, "causes.top.failures", 1, &[]);
                }
            }
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Public API                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Return a router for the top causes API
///
/// The returned [Router] has its state already supplied; it may be served as-is (as the Lambda
/// does) or merged into a larger router (as `top-causesd` does).
pub fn make_router(state: Arc<TopCauses>) -> Router {
    Router::new()
        .route("/causes/top", get(top_causes_without_limit))
        .route("/causes/top/", get(top_causes_without_limit))
        .route("/causes/top/{limit}", get(top_causes_with_limit))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            authenticate,
        ))
        // All responses are JSON; add the appropriate Content-Type header (but leave the existing
        // Content-Type header should a handler set it specially).
        .layer(SetResponseHeaderLayer::if_not_present(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        ))
        .with_state(state)
}
