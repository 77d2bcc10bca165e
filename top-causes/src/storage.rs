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

//! # storage
//!
//! Abstractions for the top-causes storage layer.
//!
//! The ranking logic doesn't care where causes live; it only needs some way to get all of them.
//! The production implementation is in [dynamodb](crate::dynamodb), but tests supply their own.

use async_trait::async_trait;

use crate::entities::CauseRecord;

#[derive(Debug)]
pub struct Error {
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error {
            source: Box::new(err),
        }
    }
}

#[async_trait]
pub trait Backend {
    /// Retrieve every cause in the datastore
    ///
    /// This is a full, unfiltered read: implementations are expected to follow whatever paging
    /// their datastore imposes & hand back the complete collection. Records without a follower
    /// count are returned as-is; filtering them is the caller's business.
    async fn all_causes(&self) -> Result<Vec<CauseRecord>, Error>;
}
