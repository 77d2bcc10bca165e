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

//! # util
//!
//! Small types that are needed by both the configuration layer & the library proper, and don't
//! obviously belong to either.

use std::ops::Deref;

use itertools::Itertools;
use secrecy::{ExposeSecret, SecretSlice, SecretString};
use serde::{Deserialize, Deserializer};
use serde_bytes::ByteBuf;
use tap::{Conv, Pipe};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Key                                               //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Secret key material
///
/// [Key] is a deserializable, secret, slice of byte. In configuration it's written as an array of
/// octets.
#[derive(Clone, Debug)]
pub struct Key(SecretSlice<u8>);

impl Key {
    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }
}

impl AsRef<SecretSlice<u8>> for Key {
    fn as_ref(&self) -> &SecretSlice<u8> {
        self.deref()
    }
}

impl Deref for Key {
    type Target = SecretSlice<u8>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// [u8] doesn't implement `DeserializeOwned`, so go through `ByteBuf`
impl<'de> Deserialize<'de> for Key {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        <ByteBuf as serde::Deserialize>::deserialize(deserializer)
            .map_err(|err| <D::Error as serde::de::Error>::custom(format!("{:?}", err)))?
            .pipe(|x| x.into_vec())
            .conv::<SecretSlice<u8>>()
            .pipe(Key)
            .pipe(Ok)
    }
}

impl From<Vec<u8>> for Key {
    fn from(value: Vec<u8>) -> Self {
        Key(value.into())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      generic credentials                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// General-purpose credentials; for DynamoDB, the access key ID & the secret access key
#[derive(Clone, Debug, Deserialize)]
pub struct Credentials(pub (SecretString, SecretString));

impl clap::builder::ValueParserFactory for Credentials {
    type Parser = CredentialsParser;

    fn value_parser() -> Self::Parser {
        CredentialsParser
    }
}

/// Parse credentials given on the command line as "id,secret"
#[derive(Clone, Debug)]
pub struct CredentialsParser;

impl clap::builder::TypedValueParser for CredentialsParser {
    type Value = Credentials;

    fn parse_ref(
        &self,
        _cmd: &clap::Command,
        _arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> std::result::Result<Self::Value, clap::Error> {
        use clap::error::ErrorKind;
        value
            .to_str()
            .ok_or(clap::Error::new(ErrorKind::InvalidValue))?
            .split(',')
            .collect_tuple::<(&str, &str)>()
            .ok_or(clap::Error::new(ErrorKind::WrongNumberOfValues))?
            .pipe(|(id, secret)| (id.into(), secret.into()))
            .pipe(Credentials)
            .pipe(Ok)
    }
}
