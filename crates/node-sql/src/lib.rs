//! Repository layer over the node's durable Postgres store.
//!
//! Reads take a pool (or any executor); multi-statement writes take an
//! open transaction so callers control the commit boundary. Nested
//! transactions are forbidden by convention. Row structs mirror the
//! relational shapes and convert to `models` types at this boundary:
//! block indexes are `BIGINT` columns and `u64` in the domain.

pub mod device_tokens;
pub mod feeds;
pub mod key_generations;
pub mod messages;
pub mod participants;
pub mod profiles;
pub mod reactions;
pub mod read_positions;

/// Decoding failure of a textual enum column.
pub(crate) fn decode_err(msg: String) -> sqlx::Error {
    sqlx::Error::Decode(msg.into())
}
