//! `ObjectMapping`: a persistent bijection between `(collection, store
//! primary key)` and an opaque 17-character client id.
//!
//! Rows are inserted on first observation and never deleted. This table is
//! explicitly exempt from the retention/pruning policy a generic persistence
//! layer would otherwise apply, since a dangling mapping is harmless but a
//! reused one would let a stale client id silently resolve to the wrong row.

use ddp_core::id::IdGenerator;
use ddp_core::{Error, Result};
use sqlx::{PgPool, Row};

pub struct ObjectMapping<'a> {
    pool: &'a PgPool,
}

impl<'a> ObjectMapping<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// The opaque client id for `(collection, pk)`, creating one on first
    /// observation. If `pk` is itself a 17-character unmistakable-alphabet
    /// string, it is used directly and no mapping row is written.
    pub async fn meteor_id(&self, collection: &str, pk: &str) -> Result<String> {
        if is_already_opaque_id(pk) {
            return Ok(pk.to_string());
        }

        if let Some(row) = sqlx::query(
            "SELECT opaque_id FROM ddp_object_mapping WHERE collection = $1 AND pk = $2",
        )
        .bind(collection)
        .bind(pk)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| Error::Store(format!("object_mapping lookup failed: {e}")))?
        {
            return row
                .try_get("opaque_id")
                .map_err(|e| Error::Store(format!("malformed object_mapping row: {e}")));
        }

        let mut gen = IdGenerator::new();
        let opaque_id = gen.next_id();
        sqlx::query(
            "INSERT INTO ddp_object_mapping (collection, pk, opaque_id) VALUES ($1, $2, $3)
             ON CONFLICT (collection, pk) DO NOTHING",
        )
        .bind(collection)
        .bind(pk)
        .bind(&opaque_id)
        .execute(self.pool)
        .await
        .map_err(|e| Error::Store(format!("object_mapping insert failed: {e}")))?;

        // Another task may have won the insert race; re-read to return the
        // id that actually landed.
        let row = sqlx::query(
            "SELECT opaque_id FROM ddp_object_mapping WHERE collection = $1 AND pk = $2",
        )
        .bind(collection)
        .bind(pk)
        .fetch_one(self.pool)
        .await
        .map_err(|e| Error::Store(format!("object_mapping re-read failed: {e}")))?;
        row.try_get("opaque_id")
            .map_err(|e| Error::Store(format!("malformed object_mapping row: {e}")))
    }

    /// The store primary key mapped to `id`, if any.
    pub async fn pk(&self, collection: &str, id: &str) -> Result<Option<String>> {
        if is_already_opaque_id(id) {
            // Ambiguous without a mapping row: this path is reached only
            // when the collection never writes its own opaque primary key,
            // so absence of a row means "not an id we minted."
        }
        let row = sqlx::query(
            "SELECT pk FROM ddp_object_mapping WHERE collection = $1 AND opaque_id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| Error::Store(format!("object_mapping reverse lookup failed: {e}")))?;
        match row {
            Some(row) => row
                .try_get("pk")
                .map(Some)
                .map_err(|e| Error::Store(format!("malformed object_mapping row: {e}"))),
            None => Ok(None),
        }
    }
}

fn is_already_opaque_id(s: &str) -> bool {
    s.len() == 17 && s.bytes().all(|b| ddp_core::id::UNMISTAKABLE_ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_seventeen_char_unmistakable_strings() {
        assert!(is_already_opaque_id("23456789ABCDEFGHJ"));
        assert!(!is_already_opaque_id("too-short"));
        assert!(!is_already_opaque_id("0123456789012345671")); // contains '0', '1'
    }
}
