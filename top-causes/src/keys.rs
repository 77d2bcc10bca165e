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

//! # Token verification keys
//!
//! Callers identify themselves with HMAC-signed JWTs. This module holds the keys used to verify
//! them, each named by a key ID that the token carries in its header. They're read from
//! configuration at startup:
//!
//! ```toml
//! [verifying-keys]
//! "keyid:2025-02-12" = [1, 2, 3, 4, ..., 64] # Keys must be 64 octets in length
//! "keyid:2025-02-15" = [65, 66, 67,..., 128]
//! ```
//!
//! Rotating keys is a matter of adding the new key ID, re-starting (or `SIGHUP`-ing) the server
//! and, once outstanding tokens signed with the old key have expired, removing it.

use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use snafu::{prelude::*, Backtrace};

use crate::util::Key;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to recognize {text} as a KeyId"))]
    KeyId { text: String, backtrace: Backtrace },
    #[snafu(display("No verifying key {keyid}"))]
    NoKey { keyid: String, backtrace: Backtrace },
    #[snafu(display("Verifying keys must be 64 octets in length"))]
    VerifyingKey { backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             KeyId                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

lazy_static! {
    static ref KEY_ID : Regex = Regex::new("^keyid:[-0-9a-zA-Z]+$").unwrap(/* known good */);
}

#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct KeyId(String);

impl KeyId {
    pub fn new(s: &str) -> Result<KeyId> {
        if KEY_ID.find(s).is_none() {
            KeyIdSnafu { text: s.to_owned() }.fail()
        } else {
            Ok(KeyId(s.to_owned()))
        }
    }
}

impl Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for KeyId {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        KeyId::new(s)
    }
}

impl AsRef<str> for KeyId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Validate on the way in, so a typo'd key ID in the configuration file is caught at startup
impl<'de> Deserialize<'de> for KeyId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        KeyId::new(&s).map_err(<D::Error as serde::de::Error>::custom)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          VerifyingKey                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A refined type enforcing a key length (of 64 octets)
#[derive(Clone, Debug)]
pub struct VerifyingKey(Key);

impl VerifyingKey {
    pub fn new(b: Vec<u8>) -> Result<VerifyingKey> {
        ensure!(b.len() == 64, VerifyingKeySnafu);
        Ok(VerifyingKey(b.into()))
    }
}

impl<'de> Deserialize<'de> for VerifyingKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let key = Key::deserialize(deserializer)?;
        if key.len() == 64 {
            Ok(VerifyingKey(key))
        } else {
            Err(<D::Error as serde::de::Error>::custom(
                VerifyingKeySnafu.build(),
            ))
        }
    }
}

impl AsRef<Key> for VerifyingKey {
    fn as_ref(&self) -> &Key {
        &self.0
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         VerifyingKeys                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct VerifyingKeys {
    keys: BTreeMap<KeyId, VerifyingKey>,
}

impl VerifyingKeys {
    /// Retrieve a key by ID
    pub fn find(&self, keyid: &KeyId) -> Result<VerifyingKey> {
        Ok(self
            .keys
            .get(keyid)
            .context(NoKeySnafu {
                keyid: keyid.to_string(),
            })?
            .clone())
    }
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
    pub fn len(&self) -> usize {
        self.keys.len()
    }
}

impl<const N: usize> From<[(KeyId, VerifyingKey); N]> for VerifyingKeys {
    fn from(value: [(KeyId, VerifyingKey); N]) -> Self {
        Self {
            keys: BTreeMap::from(value),
        }
    }
}
