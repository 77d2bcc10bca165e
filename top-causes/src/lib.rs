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

//! # top-causes
//!
//! Serve the causes with the most followers.
//!
//! Causes (advocacy & boycott campaigns) live in a DynamoDB table along with the number of people
//! following each. This crate answers a single question on behalf of authenticated callers: which
//! `N` causes have the most followers? See [causes] for the HTTP API, [ranking] for how the answer
//! is computed & [config] for how the whole thing is set up.
//!
//! The library is served by two binaries: `top-causesd`, a conventional long-running HTTP server,
//! and `top-causes-lambda`, which serves the same router as an AWS Lambda function.
pub mod authn;
pub mod causes;
pub mod config;
pub mod dynamodb;
pub mod entities;
pub mod http;
pub mod keys;
pub mod metrics;
pub mod ranking;
pub mod storage;
pub mod token;
pub mod util;
