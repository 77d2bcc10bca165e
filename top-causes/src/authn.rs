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

//! # top-causes authentication support
//!
//! Every request must carry an identity token in the `Authorization` header, using the "Bearer"
//! scheme. Resolving that to a [Subject] is the job of an [IdentityVerifier]; the one used in
//! production, [TokenVerifier], checks an HMAC-signed JWT against the configured keys.

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue};
use itertools::Itertools;
use snafu::{prelude::*, Backtrace};

use crate::{
    entities::Subject,
    keys::VerifyingKeys,
    token::{self, verify_token},
};

/// authentication Error type
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("An Authorization header had a value that couldn't be parsed"))]
    BadAuthHeaderParse {
        value: HeaderValue,
        backtrace: Backtrace,
    },
    #[snafu(display("An Authorization header had a non-textual value: {source}"))]
    InvalidAuthHeaderValue {
        value: HeaderValue,
        source: axum::http::header::ToStrError,
        backtrace: Backtrace,
    },
    #[snafu(display("Multiple Authorization headers were supplied; only one is accepted"))]
    MultipleAuthnHeaders { backtrace: Backtrace },
    #[snafu(display("No Authorization header"))]
    NoAuthHeader { backtrace: Backtrace },
    #[snafu(display("Failed to verify token: {source}"))]
    Token {
        #[snafu(source(from(token::Error, Box::new)))]
        source: Box<token::Error>,
    },
    #[snafu(display("Authorization scheme {scheme} not supported"))]
    UnsupportedAuthScheme {
        scheme: String,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// Resolve the caller's identity from an inbound request's headers
#[async_trait]
pub trait IdentityVerifier {
    async fn identify(&self, headers: &HeaderMap) -> Result<Subject>;
}

/// Pull the bearer token out of `headers`
///
/// Exactly one `Authorization` header must be present, & it must use the "Bearer" scheme (compared
/// case-insensitively, per RFC 9110).
pub fn bearer_token(headers: &HeaderMap) -> Result<String> {
    let value = headers
        .get_all(http::header::AUTHORIZATION)
        .into_iter()
        .at_most_one()
        .map_err(|_| MultipleAuthnHeadersSnafu.build())?
        .context(NoAuthHeaderSnafu)?;
    let text = value
        .to_str()
        .context(InvalidAuthHeaderValueSnafu {
            value: value.clone(),
        })?
        .trim();
    let (scheme, payload) = text.split_once(' ').context(BadAuthHeaderParseSnafu {
        value: value.clone(),
    })?;
    ensure!(
        scheme.eq_ignore_ascii_case("bearer"),
        UnsupportedAuthSchemeSnafu {
            scheme: scheme.to_owned()
        }
    );
    let payload = payload.trim();
    ensure!(
        !payload.is_empty(),
        BadAuthHeaderParseSnafu {
            value: value.clone()
        }
    );
    Ok(payload.to_owned())
}

/// Verify HMAC-signed JWTs presented as bearer tokens
#[derive(Clone, Debug)]
pub struct TokenVerifier {
    keys: VerifyingKeys,
    issuer: Option<String>,
    audience: Option<String>,
}

impl TokenVerifier {
    pub fn new(keys: VerifyingKeys, issuer: Option<String>, audience: Option<String>) -> Self {
        TokenVerifier {
            keys,
            issuer,
            audience,
        }
    }
}

#[async_trait]
impl IdentityVerifier for TokenVerifier {
    async fn identify(&self, headers: &HeaderMap) -> Result<Subject> {
        let token = bearer_token(headers)?;
        verify_token(
            &token,
            &self.keys,
            self.issuer.as_deref(),
            self.audience.as_deref(),
        )
        .context(TokenSnafu)
    }
}
