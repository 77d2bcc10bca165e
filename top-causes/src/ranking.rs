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

//! # Ranking causes
//!
//! Given a [Limit], read every cause, throw out the ones without a follower count, sort the rest
//! by follower count (descending), keep the first `limit` and number them from one.
//!
//! This is a full scan & an in-memory sort on every request. That's fine while the causes table is
//! small; should it grow, the ordering & limiting belong in the datastore (an index sorted by
//! follower count, say) rather than here.

use std::time::Duration;

use itertools::Itertools;
use snafu::{prelude::*, Backtrace};
use tracing::debug;

use crate::{
    entities::{CauseRecord, Limit, RankedCause},
    storage::{self, Backend as StorageBackend},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Retrieving causes took longer than {deadline:?}"))]
    Deadline {
        deadline: Duration,
        backtrace: Backtrace,
    },
    #[snafu(display("{source}"))]
    Retrieve { source: storage::Error },
}

type Result<T> = std::result::Result<T, Error>;

/// Rank `records`, returning at most `limit` of them
///
/// Records lacking a follower count are dropped. Equal follower counts are ordered by cause ID so
/// that the result doesn't depend on the order in which the datastore happened to return things.
pub fn rank<I>(records: I, limit: Limit) -> Vec<RankedCause>
where
    I: IntoIterator<Item = CauseRecord>,
{
    records
        .into_iter()
        .filter_map(|record| {
            record
                .follower_count
                .map(|count| (count, record.cause_id, record.cause_desc))
        })
        .sorted_by(|lhs, rhs| rhs.0.cmp(&lhs.0).then_with(|| lhs.1.cmp(&rhs.1)))
        .take(limit.get())
        .enumerate()
        .map(
            |(idx, (follower_count, cause_id, cause_desc))| RankedCause {
                cause_id,
                cause_desc,
                follower_count,
                rank: idx + 1,
            },
        )
        .collect()
}

/// Retrieve all causes from `storage` & return the top `limit`
///
/// If `deadline` is given, retrieval that takes longer fails. There are no retries; a storage
/// failure is handed straight back to the caller.
pub async fn top_causes(
    storage: &(dyn StorageBackend + Send + Sync),
    limit: Limit,
    deadline: Option<Duration>,
) -> Result<Vec<RankedCause>> {
    let records = match deadline {
        Some(deadline) => tokio::time::timeout(deadline, storage.all_causes())
            .await
            .ok()
            .context(DeadlineSnafu { deadline })?,
        None => storage.all_causes().await,
    }
    .context(RetrieveSnafu)?;

    let num_records = records.len();
    let ranked = rank(records, limit);
    debug!(
        "Ranked {} of {} causes (limit {})",
        ranked.len(),
        num_records,
        limit
    );
    Ok(ranked)
}

#[cfg(test)]
mod test {
    use super::*;

    use std::str::FromStr;

    use async_trait::async_trait;

    use crate::entities::CauseId;

    fn record(id: &str, desc: &str, count: Option<u64>) -> CauseRecord {
        CauseRecord::new(CauseId::new(id).unwrap(), desc, count)
    }

    fn limit(n: usize) -> Limit {
        Limit::new(n).unwrap()
    }

    #[test]
    fn ranks_two_causes() {
        let ranked = rank(
            vec![
                record("cause1", "Environment", Some(40)),
                record("cause2", "Labor", Some(30)),
            ],
            limit(2),
        );
        assert_eq!(
            ranked,
            vec![
                RankedCause {
                    cause_id: CauseId::new("cause1").unwrap(),
                    cause_desc: "Environment".to_owned(),
                    follower_count: 40,
                    rank: 1
                },
                RankedCause {
                    cause_id: CauseId::new("cause2").unwrap(),
                    cause_desc: "Labor".to_owned(),
                    follower_count: 30,
                    rank: 2
                },
            ]
        );
    }

    #[test]
    fn ineligible_records_are_dropped() {
        let ranked = rank(
            vec![
                record("cause3", "Housing", None),
                record("cause2", "Labor", Some(30)),
                record("cause1", "Environment", Some(40)),
            ],
            limit(5),
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].cause_id.as_ref(), "cause1");
        assert_eq!(ranked[1].cause_id.as_ref(), "cause2");
        assert!(ranked.iter().all(|r| r.cause_id.as_ref() != "cause3"));
    }

    #[test]
    fn truncates_to_limit() {
        let records = (0..20u64)
            .map(|i| record(&format!("cause{:02}", i), "x", Some(i * 7 % 13)))
            .collect::<Vec<CauseRecord>>();
        for n in [1usize, 3, 13, 20, 50] {
            let ranked = rank(records.clone(), limit(n));
            assert_eq!(ranked.len(), std::cmp::min(n, 20));
            // ranks are exactly 1..=len
            assert!(ranked.iter().enumerate().all(|(i, r)| r.rank == i + 1));
            // follower counts never increase
            assert!(ranked
                .iter()
                .tuple_windows()
                .all(|(a, b)| a.follower_count >= b.follower_count));
        }
    }

    #[test]
    fn ties_break_on_cause_id() {
        let ranked = rank(
            vec![
                record("b", "B", Some(10)),
                record("c", "C", Some(20)),
                record("a", "A", Some(10)),
            ],
            limit(3),
        );
        let ids = ranked
            .iter()
            .map(|r| r.cause_id.as_ref())
            .collect::<Vec<&str>>();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(
            ranked.iter().map(|r| r.rank).collect::<Vec<usize>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn nothing_eligible() {
        assert!(rank(Vec::new(), limit(3)).is_empty());
        assert!(rank(vec![record("cause1", "x", None)], limit(3)).is_empty());
    }

    struct Fixed(Vec<CauseRecord>);

    #[async_trait]
    impl StorageBackend for Fixed {
        async fn all_causes(&self) -> std::result::Result<Vec<CauseRecord>, storage::Error> {
            Ok(self.0.clone())
        }
    }

    struct Slow;

    #[async_trait]
    impl StorageBackend for Slow {
        async fn all_causes(&self) -> std::result::Result<Vec<CauseRecord>, storage::Error> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn top_causes_from_storage() {
        let storage = Fixed(vec![
            record("cause1", "Environment", Some(40)),
            record("cause2", "Labor", Some(30)),
            record("cause3", "Housing", None),
        ]);
        let ranked = top_causes(&storage, Limit::from_str("1").unwrap(), None)
            .await
            .unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].cause_desc, "Environment");
        assert_eq!(ranked[0].rank, 1);
    }

    #[tokio::test]
    async fn retrieval_deadline() {
        let result = top_causes(&Slow, limit(3), Some(Duration::from_millis(10))).await;
        assert!(matches!(result, Err(Error::Deadline { .. })));
    }
}
