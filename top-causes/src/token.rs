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

//! # Identity tokens
//!
//! Callers present a [JWT] naming them in its `sub` claim. Tokens are minted elsewhere (by
//! whatever identity service fronts this one); all we need to do is verify them. [mint_token] is
//! provided for operators & tests.
//!
//! [JWT]: https://www.rfc-editor.org/rfc/rfc7519.html

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use jwt::{Header, SignWithKey, Token, VerifyWithKey};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use snafu::{prelude::*, Backtrace};

use crate::{
    entities::Subject,
    keys::{self, KeyId, VerifyingKey, VerifyingKeys},
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Token expired at {expires}"))]
    Expired {
        expires: DateTime<Utc>,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to create an HMAC: {source}"))]
    Hmac {
        source: hmac::digest::InvalidLength,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to refine a string to a KeyId: {source}"))]
    KeyId {
        source: keys::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("The Key ID was missing from the JWT"))]
    MissingKeyId { backtrace: Backtrace },
    #[snafu(display("No verifying key matching {keyid}: {source}"))]
    NoKey { keyid: KeyId, source: keys::Error },
    #[snafu(display("Invalid token: not before {not_before}"))]
    NotBefore {
        not_before: DateTime<Utc>,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to parse JWT: {source}"))]
    Parse {
        source: jwt::error::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to sign JWT claims: {source}"))]
    Signature {
        source: jwt::error::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Unknown token audience {audience:?}"))]
    UnknownAudience {
        audience: Option<String>,
        backtrace: Backtrace,
    },
    #[snafu(display("Unknown token issuer {issuer:?}"))]
    UnknownIssuer {
        issuer: Option<String>,
        backtrace: Backtrace,
    },
    #[snafu(display("Verification failure: {source}"))]
    Verification {
        source: jwt::error::Error,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           the claims                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Identity token [claims]
///
/// [claims]: https://pragmaticwebsecurity.com/articles/apisecurity/hard-parts-of-jwt.html
///
/// Timestamps are NumericDate (seconds since the epoch) per RFC 7519. Only `sub` & `exp` are
/// required; `iss` & `aud` are only checked if this instance was configured to check them.
#[derive(Clone, Debug, Deserialize, Serialize)]
struct IdentityClaims {
    #[serde(rename = "sub")]
    subject: Subject,
    #[serde(rename = "exp", with = "chrono::serde::ts_seconds")]
    expires: DateTime<Utc>,
    #[serde(
        rename = "nbf",
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    not_before: Option<DateTime<Utc>>,
    #[serde(
        rename = "iat",
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    issued_at: Option<DateTime<Utc>>,
    #[serde(rename = "iss", default, skip_serializing_if = "Option::is_none")]
    issuer: Option<String>,
    #[serde(rename = "aud", default, skip_serializing_if = "Option::is_none")]
    audience: Option<String>,
}

fn hmac_for(key: &VerifyingKey) -> Result<Hmac<Sha256>> {
    Hmac::new_from_slice(key.as_ref().expose_secret()).context(HmacSnafu)
}

/// Mint a new JWT
///
/// Mint a token naming `subject`, signed using `key` (identified by `keyid`). The token will be
/// valid for duration `lifetime`. The fully serialized JWT will be returned.
pub fn mint_token(
    subject: &Subject,
    keyid: &KeyId,
    key: &VerifyingKey,
    issuer: Option<&str>,
    audience: Option<&str>,
    lifetime: &Duration,
) -> Result<String> {
    let key = hmac_for(key)?;
    let header = Header {
        key_id: Some(keyid.to_string()),
        ..Default::default()
    };
    let now = Utc::now();
    let claims = IdentityClaims {
        subject: subject.clone(),
        expires: now + *lifetime,
        not_before: Some(now),
        issued_at: Some(now),
        issuer: issuer.map(str::to_owned),
        audience: audience.map(str::to_owned),
    };
    Ok(Token::new(header, claims)
        .sign_with_key(&key)
        .context(SignatureSnafu)?
        .as_str()
        .to_owned())
}

/// Verify `token_string`, returning the [Subject] it names
///
/// The key is selected by the token's `kid` header; the signature, expiry & (if present) not-before
/// time are always checked, issuer & audience only when `issuer` and/or `audience` are given.
pub fn verify_token(
    token_string: &str,
    keys: &VerifyingKeys,
    issuer: Option<&str>,
    audience: Option<&str>,
) -> Result<Subject> {
    let token: Token<Header, IdentityClaims, _ /* Unverified<'_> */> =
        Token::parse_unverified(token_string).context(ParseSnafu)?;
    let keyid = token
        .header()
        .key_id
        .clone()
        .context(MissingKeyIdSnafu)?;
    let keyid = KeyId::new(&keyid).context(KeyIdSnafu)?;
    let verifying_key = keys.find(&keyid).context(NoKeySnafu { keyid })?;
    let key = hmac_for(&verifying_key)?;
    let token: Token<Header, IdentityClaims, _> = token_string
        .verify_with_key(&key)
        .context(VerificationSnafu)?;
    let claims = token.claims();

    let now = Utc::now();

    if let Some(not_before) = claims.not_before {
        ensure!(now >= not_before, NotBeforeSnafu { not_before });
    }
    ensure!(
        now <= claims.expires,
        ExpiredSnafu {
            expires: claims.expires
        }
    );
    if let Some(issuer) = issuer {
        ensure!(
            claims.issuer.as_deref() == Some(issuer),
            UnknownIssuerSnafu {
                issuer: claims.issuer.clone()
            }
        );
    }
    if let Some(audience) = audience {
        ensure!(
            claims.audience.as_deref() == Some(audience),
            UnknownAudienceSnafu {
                audience: claims.audience.clone()
            }
        );
    }

    Ok(claims.subject.clone())
}
