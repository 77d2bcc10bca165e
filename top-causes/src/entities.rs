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

//! # top-causes models
//!
//! ## Introduction
//!
//! The handful of types that flow between storage, the ranking logic & the HTTP layer. None of
//! them are ever written back; they're reconstructed from the datastore on each request.

use std::{
    fmt::Display,
    num::{IntErrorKind, NonZeroUsize},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Backtrace};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{text} is not a valid limit; limits are positive integers"))]
    BadLimit { text: String, backtrace: Backtrace },
    #[snafu(display("Cause IDs may not be empty"))]
    EmptyCauseId { backtrace: Backtrace },
    #[snafu(display("Subjects may not be empty"))]
    EmptySubject { backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            CauseId                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Opaque identifier for a cause
///
/// Cause IDs are assigned elsewhere; all we ask of them is that they be non-empty. They're ordered
/// so that they can serve as a tie-breaker when ranking.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct CauseId(String);

impl CauseId {
    pub fn new(s: &str) -> Result<CauseId> {
        ensure!(!s.is_empty(), EmptyCauseIdSnafu);
        Ok(CauseId(s.to_owned()))
    }
}

impl AsRef<str> for CauseId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for CauseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CauseId {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        CauseId::new(s)
    }
}

impl TryFrom<String> for CauseId {
    type Error = Error;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        ensure!(!value.is_empty(), EmptyCauseIdSnafu);
        Ok(CauseId(value))
    }
}

impl From<CauseId> for String {
    fn from(value: CauseId) -> Self {
        value.0
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Subject                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The stable identifier of an authenticated caller (the `sub` claim of their token)
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subject(String);

impl Subject {
    pub fn new(s: &str) -> Result<Subject> {
        ensure!(!s.is_empty(), EmptySubjectSnafu);
        Ok(Subject(s.to_owned()))
    }
}

impl AsRef<str> for Subject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Subject {
    type Error = Error;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        ensure!(!value.is_empty(), EmptySubjectSnafu);
        Ok(Subject(value))
    }
}

impl From<Subject> for String {
    fn from(value: Subject) -> Self {
        value.0
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          CauseRecord                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A cause, as read from the datastore
///
/// Only the attributes this service projects are modeled. `follower_count` is optional because
/// nothing in the datastore guarantees its presence; records without it are ineligible for
/// ranking.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CauseRecord {
    pub cause_id: CauseId,
    #[serde(default)]
    pub cause_desc: String,
    pub follower_count: Option<u64>,
}

impl CauseRecord {
    pub fn new(cause_id: CauseId, cause_desc: &str, follower_count: Option<u64>) -> CauseRecord {
        CauseRecord {
            cause_id,
            cause_desc: cause_desc.to_owned(),
            follower_count,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          RankedCause                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A cause along with its position in a ranking; this is what goes out on the wire
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RankedCause {
    pub cause_id: CauseId,
    pub cause_desc: String,
    pub follower_count: u64,
    pub rank: usize,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Limit                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The number of causes a caller wants back
///
/// A refined type: a [Limit] is always at least one, so once a caller has one in hand they never
/// need to check it again. Zero, negative numbers & anything that isn't an integer at all are
/// rejected at parse time.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Limit(NonZeroUsize);

impl Limit {
    pub fn new(n: usize) -> Option<Limit> {
        NonZeroUsize::new(n).map(Limit)
    }
    pub fn get(&self) -> usize {
        self.0.get()
    }
}

impl Display for Limit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Limit {
    type Err = Error;

    /// Parse a decimal integer, with no surrounding whitespace
    ///
    /// "0", "-1" & "abc" are all rejected alike. A positive integer too large to represent is
    /// still a valid request for "everything", so it's clamped rather than refused.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.parse::<NonZeroUsize>() {
            Ok(n) => Ok(Limit(n)),
            Err(err) if *err.kind() == IntErrorKind::PosOverflow => Ok(Limit(NonZeroUsize::MAX)),
            Err(_) => BadLimitSnafu { text: s.to_owned() }.fail(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use aws_sdk_dynamodb::types::AttributeValue;
    use serde_dynamo::aws_sdk_dynamodb_1::from_item;
    use std::collections::HashMap;

    #[test]
    fn limits() {
        assert_eq!(Limit::from_str("5").unwrap().get(), 5);
        assert_eq!(Limit::from_str("1").unwrap().get(), 1);
        assert!(Limit::from_str("0").is_err());
        assert!(Limit::from_str("-3").is_err());
        assert!(Limit::from_str("abc").is_err());
        assert!(Limit::from_str("").is_err());
        assert!(Limit::from_str("2.5").is_err());
        assert!(Limit::from_str(" 2").is_err());
        assert!(Limit::from_str("2 ").is_err());
        assert!(Limit::new(0).is_none());
        // Too big to represent, but still a positive integer
        assert_eq!(
            Limit::from_str("99999999999999999999999").unwrap().get(),
            usize::MAX
        );
        assert!(Limit::from_str("-99999999999999999999999").is_err());
    }

    #[test]
    fn cause_ids() {
        assert!(CauseId::new("").is_err());
        assert_eq!(CauseId::new("cause1").unwrap().as_ref(), "cause1");
        assert!(CauseId::new("cause1").unwrap() < CauseId::new("cause2").unwrap());
    }

    #[test]
    fn record_from_item() {
        let item = HashMap::from([
            ("cause_id".to_owned(), AttributeValue::S("cause1".to_owned())),
            (
                "cause_desc".to_owned(),
                AttributeValue::S("Environment".to_owned()),
            ),
            ("follower_count".to_owned(), AttributeValue::N("40".to_owned())),
        ]);
        let record: CauseRecord = from_item(item).unwrap();
        assert_eq!(
            record,
            CauseRecord::new(CauseId::new("cause1").unwrap(), "Environment", Some(40))
        );

        // No follower count: still a valid record, just not an eligible one
        let item = HashMap::from([
            ("cause_id".to_owned(), AttributeValue::S("cause3".to_owned())),
            ("cause_desc".to_owned(), AttributeValue::S("Housing".to_owned())),
        ]);
        let record: CauseRecord = from_item(item).unwrap();
        assert_eq!(record.follower_count, None);

        // A follower count that isn't a number is a decoding failure
        let item = HashMap::from([
            ("cause_id".to_owned(), AttributeValue::S("cause4".to_owned())),
            ("follower_count".to_owned(), AttributeValue::S("lots".to_owned())),
        ]);
        let record: std::result::Result<CauseRecord, _> = from_item(item);
        assert!(record.is_err());
    }

    #[test]
    fn ranked_cause_wire_format() {
        let ranked = RankedCause {
            cause_id: CauseId::new("cause1").unwrap(),
            cause_desc: "Environment".to_owned(),
            follower_count: 40,
            rank: 1,
        };
        assert_eq!(
            serde_json::to_value(&ranked).unwrap(),
            serde_json::json!({
                "cause_id": "cause1",
                "cause_desc": "Environment",
                "follower_count": 40,
                "rank": 1
            })
        );
    }
}
