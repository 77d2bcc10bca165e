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

use std::{sync::Arc, time::Duration};

use axum::Json;
use serde::{Deserialize, Serialize};

use crate::{authn::IdentityVerifier, metrics, storage::Backend as StorageBackend};

/// A serializable struct for use in HTTP error responses
///
/// This is intended to be used in the [IntoResponse] implementations for whatever error type
/// an axum handler is using.
///
/// [IntoResponse]: https://docs.rs/axum/latest/axum/response/trait.IntoResponse.html
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponseBody {
    pub error: String,
}

impl axum::response::IntoResponse for ErrorResponseBody {
    fn into_response(self) -> axum::response::Response {
        Json(self).into_response()
    }
}

/// The body sent back on authentication failure
///
/// Callers written against the API gateway's own authorizer expect `{"message": "Unauthorized"}`
/// rather than an [ErrorResponseBody].
#[derive(Debug, Deserialize, Serialize)]
pub struct MessageResponseBody {
    pub message: String,
}

impl axum::response::IntoResponse for MessageResponseBody {
    fn into_response(self) -> axum::response::Response {
        Json(self).into_response()
    }
}

/// Application state available to all handlers
pub struct TopCauses {
    pub storage: Arc<dyn StorageBackend + Send + Sync>,
    pub verifier: Arc<dyn IdentityVerifier + Send + Sync>,
    pub instruments: metrics::Instruments,
    /// Upper bound on the time spent retrieving causes, if any
    pub scan_timeout: Option<Duration>,
}

impl TopCauses {
    pub fn new(
        storage: Arc<dyn StorageBackend + Send + Sync>,
        verifier: Arc<dyn IdentityVerifier + Send + Sync>,
        scan_timeout: Option<Duration>,
    ) -> TopCauses {
        TopCauses {
            storage,
            verifier,
            instruments: metrics::Instruments::new("top-causes"),
            scan_timeout,
        }
    }
}
