//! Fans one logical query out over multiple backend targets and merges the
//! partial result sets.
//!
//! Shards are queried sequentially: each target's channel enforces its own
//! single-flight lock, and sequential issue keeps failure attribution
//! simple. Per-shard responses come back pre-sorted, but the combined set
//! is not, so the merge re-sorts explicitly.

use std::cmp::Ordering;
use std::io::{Read, Write};

use log::debug;

use crate::channel::Channel;
use crate::data::Fingerprint;
use crate::error::Error;
use crate::protocol::{random_request_id, QueryRequest, QueryResponse, SearchHit};

/// Anything that can resolve one query request. Implemented by [`Channel`];
/// test doubles implement it directly.
pub trait SearchBackend {
    fn search(&self, request: &QueryRequest) -> Result<QueryResponse, Error>;
}

impl<T: Read + Write> SearchBackend for Channel<T> {
    fn search(&self, request: &QueryRequest) -> Result<QueryResponse, Error> {
        self.query(request)
    }
}

/// One fan-out target: a backend plus the database name and key it serves.
pub struct FanOutTarget<'a, B: SearchBackend> {
    pub backend: &'a B,
    pub db_name: String,
    pub db_key: String,
}

/// Issues the fingerprint against every target, concatenates hits, sums the
/// approximate totals, re-sorts by descending score (stable, so pre-merge
/// order breaks ties) and truncates to `return_count`.
///
/// Any shard failure fails the whole call: a partial result would make the
/// summed approximate total a lie.
pub fn fan_out_search<B: SearchBackend>(
    targets: &[FanOutTarget<B>],
    return_count: u32,
    similarity_cutoff: f32,
    fingerprint: &Fingerprint,
) -> Result<(u64, Vec<SearchHit>), Error> {
    let mut approximate_total: u64 = 0;
    let mut hits: Vec<SearchHit> = Vec::new();

    for target in targets {
        let request = QueryRequest {
            targets: vec![(target.db_name.clone(), target.db_key.clone())],
            request_id: random_request_id(),
            return_count,
            similarity_cutoff,
            fingerprint: fingerprint.clone(),
        };
        let response = target.backend.search(&request)?;
        debug!(
            "shard {}: {} hits, ~{} total matches",
            target.db_name,
            response.hits.len(),
            response.approximate_total_matches
        );
        approximate_total += response.approximate_total_matches;
        hits.extend(response.hits);
    }

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    hits.truncate(return_count as usize);
    Ok((approximate_total, hits))
}
