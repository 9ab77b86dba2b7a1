//! Wire format for query requests and responses.
//!
//! Field order is a frozen contract shared with backend search processes;
//! see the module-level comments on each encode function. All values are
//! big-endian via the codec.

use rand::Rng;

use crate::codec::{ByteReader, ByteWriter};
use crate::data::Fingerprint;
use crate::error::Error;

/// One similarity query against one or more named databases.
#[derive(Debug, PartialEq, Clone)]
pub struct QueryRequest {
    /// `(db_name, db_key)` pairs, searched in order.
    pub targets: Vec<(String, String)>,
    /// Caller-chosen correlation token, unique among requests in flight on
    /// the same backend. Zero is reserved as the "not yet written" marker in
    /// shared response regions.
    pub request_id: u32,
    pub return_count: u32,
    pub similarity_cutoff: f32,
    pub fingerprint: Fingerprint,
}

impl QueryRequest {
    /// Wire order: target count, then (name, key) per target, then
    /// request id, return count, cutoff, fingerprint block.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.write_u32(self.targets.len() as u32);
        for (name, key) in &self.targets {
            writer.write_string(name.as_bytes());
            writer.write_string(key.as_bytes());
        }
        writer.write_u32(self.request_id);
        writer.write_u32(self.return_count);
        writer.write_f32(self.similarity_cutoff);
        writer.write_block(&self.fingerprint.data);
        writer.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let mut reader = ByteReader::new(bytes);
        let target_count = reader.read_u32()?;
        let mut targets = Vec::with_capacity(target_count as usize);
        for _ in 0..target_count {
            let name = String::from_utf8_lossy(reader.read_string()?).into_owned();
            let key = String::from_utf8_lossy(reader.read_string()?).into_owned();
            targets.push((name, key));
        }
        let request_id = reader.read_u32()?;
        let return_count = reader.read_u32()?;
        let similarity_cutoff = reader.read_f32()?;
        let fingerprint = Fingerprint::from_bytes(reader.read_block()?.to_vec());
        Ok(Self { targets, request_id, return_count, similarity_cutoff, fingerprint })
    }
}

/// One scored match. Backends return these pre-sorted by descending score
/// within a single response.
#[derive(Debug, PartialEq, Clone)]
pub struct SearchHit {
    pub id: String,
    pub smiles: String,
    pub score: f32,
}

#[derive(Debug, PartialEq, Clone)]
pub struct QueryResponse {
    /// Echo of the originating request's id.
    pub request_id: u32,
    /// Backend's estimate of how many database entries passed the cutoff,
    /// usually far more than were returned.
    pub approximate_total_matches: u64,
    pub hits: Vec<SearchHit>,
}

impl QueryResponse {
    /// Wire order: request id, returned count, approximate total, then the
    /// three parallel arrays: all smiles, all ids, all scores.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.write_u32(self.request_id);
        writer.write_u32(self.hits.len() as u32);
        writer.write_u64(self.approximate_total_matches);
        for hit in &self.hits {
            writer.write_string(hit.smiles.as_bytes());
        }
        for hit in &self.hits {
            writer.write_string(hit.id.as_bytes());
        }
        for hit in &self.hits {
            writer.write_f32(hit.score);
        }
        writer.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let mut reader = ByteReader::new(bytes);
        let request_id = reader.read_u32()?;
        let returned_count = reader.read_u32()? as usize;
        let approximate_total_matches = reader.read_u64()?;

        let mut smiles = Vec::with_capacity(returned_count);
        for _ in 0..returned_count {
            smiles.push(String::from_utf8_lossy(reader.read_string()?).into_owned());
        }
        let mut ids = Vec::with_capacity(returned_count);
        for _ in 0..returned_count {
            ids.push(String::from_utf8_lossy(reader.read_string()?).into_owned());
        }
        let mut scores = Vec::with_capacity(returned_count);
        for _ in 0..returned_count {
            scores.push(reader.read_f32()?);
        }

        let hits = ids
            .into_iter()
            .zip(smiles)
            .zip(scores)
            .map(|((id, smiles), score)| SearchHit { id, smiles, score })
            .collect();
        Ok(Self { request_id, approximate_total_matches, hits })
    }
}

/// Legacy single-target request: no target list, no request id. Correlation
/// is implicit in the connection, so it only works against a backend socket
/// dedicated to one database. Kept for talking to old backends; the
/// canonical decoder does not accept this layout.
pub fn encode_single_target_request(
    return_count: u32,
    similarity_cutoff: f32,
    fingerprint: &Fingerprint,
) -> Vec<u8> {
    let mut writer = ByteWriter::new();
    writer.write_u32(return_count);
    writer.write_f32(similarity_cutoff);
    writer.write_block(&fingerprint.data);
    writer.into_bytes()
}

/// Draws from `[1, 2^31)`: non-negative in a signed 32-bit field, and never
/// the zero marker a shared response region starts with.
pub fn random_request_id() -> u32 {
    rand::thread_rng().gen_range(1..(1u32 << 31))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> QueryRequest {
        QueryRequest {
            targets: vec![
                ("zinc".to_string(), "pass".to_string()),
                ("enamine".to_string(), "".to_string()),
            ],
            request_id: 123456,
            return_count: 20,
            similarity_cutoff: 0.35,
            fingerprint: Fingerprint::random(1024),
        }
    }

    fn sample_response() -> QueryResponse {
        QueryResponse {
            request_id: 123456,
            approximate_total_matches: 98765432101,
            hits: vec![
                SearchHit { id: "ZINC00000022".to_string(), smiles: "CCO".to_string(), score: 0.95 },
                SearchHit { id: "ZINC00000023".to_string(), smiles: "CCN".to_string(), score: 0.90 },
            ],
        }
    }

    #[test]
    fn request_round_trip() {
        let request = sample_request();
        let decoded = QueryRequest::decode(&request.encode()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn response_round_trip() {
        let response = sample_response();
        let decoded = QueryResponse::decode(&response.encode()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn empty_response_round_trip() {
        let response = QueryResponse {
            request_id: 7,
            approximate_total_matches: 0,
            hits: Vec::new(),
        };
        let decoded = QueryResponse::decode(&response.encode()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn truncated_messages_are_rejected() {
        let request = sample_request();
        let bytes = request.encode();
        for cut in [0, 1, 4, bytes.len() / 2, bytes.len() - 1] {
            assert!(matches!(QueryRequest::decode(&bytes[..cut]), Err(Error::TruncatedData)));
        }

        let response = sample_response();
        let bytes = response.encode();
        assert!(matches!(
            QueryResponse::decode(&bytes[..bytes.len() - 1]),
            Err(Error::TruncatedData)
        ));
    }

    #[test]
    fn request_field_order_is_stable() {
        let request = QueryRequest {
            targets: vec![("db".to_string(), "k".to_string())],
            request_id: 0x01020304,
            return_count: 10,
            similarity_cutoff: 0.0,
            fingerprint: Fingerprint::from_bytes(vec![0xAB, 0xCD, 0xEF, 0x01]),
        };
        let bytes = request.encode();
        let mut expected: Vec<u8> = Vec::new();
        expected.extend([0, 0, 0, 1]); // target count
        expected.extend([0, 0, 0, 2]); // name length
        expected.extend(b"db");
        expected.extend([0, 0, 0, 1]); // key length
        expected.extend(b"k");
        expected.extend([1, 2, 3, 4]); // request id
        expected.extend([0, 0, 0, 10]); // return count
        expected.extend([0, 0, 0, 0]); // cutoff 0.0
        expected.extend([0, 0, 0, 4]); // fingerprint block length
        expected.extend([0xAB, 0xCD, 0xEF, 0x01]);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn legacy_encoding_layout_is_stable() {
        let fingerprint = Fingerprint::from_bytes(vec![0xFF; 8]);
        let bytes = encode_single_target_request(10, 0.0, &fingerprint);
        let mut expected: Vec<u8> = Vec::new();
        expected.extend([0, 0, 0, 10]);
        expected.extend([0, 0, 0, 0]);
        expected.extend([0, 0, 0, 8]);
        expected.extend([0xFF; 8]);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn request_ids_avoid_the_zero_marker() {
        for _ in 0..1000 {
            let id = random_request_id();
            assert!(id >= 1);
            assert!(id < (1u32 << 31));
        }
    }
}
