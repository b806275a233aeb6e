//! ECH key rows and the transactional lifecycle transitions.
//!
//! Each rotation phase (transition, retire, garbage-collect) is one
//! independent write transaction; the phases are idempotent so concurrent
//! rotations across processes converge.

use redb::ReadableTable;

use crate::models::{EchKey, EchKeyStatus};

use super::db::{bump_seq, from_bytes, to_bytes, Store, StoreResult, ECH_KEYS, META};

/// Meta key remembering the most recently allocated config id.
const LAST_CONFIG_ID: &str = "ech:last_config_id";

impl Store {
    /// Persist a freshly generated key, allocating its row id and recording
    /// the config id as last-used.
    pub fn ech_insert(&self, key: &mut EchKey) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut meta = write_txn.open_table(META)?;
            key.id = bump_seq(&mut meta, "seq:ech_keys")?;
            meta.insert(LAST_CONFIG_ID, key.config_id as u64)?;

            let mut table = write_txn.open_table(ECH_KEYS)?;
            table.insert(key.id, to_bytes(key)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// The config id handed out most recently (0 on a fresh store).
    pub fn ech_last_config_id(&self) -> StoreResult<u8> {
        let read_txn = self.db.begin_read()?;
        let meta = read_txn.open_table(META)?;
        Ok(meta.get(LAST_CONFIG_ID)?.map(|g| g.value() as u8).unwrap_or(0))
    }

    pub fn ech_all(&self) -> StoreResult<Vec<EchKey>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ECH_KEYS)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (_, raw) = entry?;
            out.push(from_bytes(raw.value())?);
        }
        Ok(out)
    }

    /// Move every active key whose `expires_at` has passed into grace.
    pub fn ech_transition_expired(&self, now: i64) -> StoreResult<usize> {
        self.ech_rewrite(|key| {
            if key.status == EchKeyStatus::Active && key.expires_at <= now {
                key.status = EchKeyStatus::GracePeriod;
                true
            } else {
                false
            }
        })
    }

    /// Retire grace-period keys whose grace window has elapsed.
    pub fn ech_retire_graced(&self, now: i64, grace_secs: i64) -> StoreResult<usize> {
        self.ech_rewrite(|key| {
            if key.status == EchKeyStatus::GracePeriod && key.expires_at + grace_secs <= now {
                key.status = EchKeyStatus::Retired;
                key.retired_at = Some(now);
                true
            } else {
                false
            }
        })
    }

    /// Delete retired keys older than the retention window.
    pub fn ech_gc_retired(&self, now: i64, keep_secs: i64) -> StoreResult<usize> {
        let write_txn = self.db.begin_write()?;
        let removed;
        {
            let mut table = write_txn.open_table(ECH_KEYS)?;
            let mut doomed = Vec::new();
            for entry in table.iter()? {
                let (id, raw) = entry?;
                let key: EchKey = from_bytes(raw.value())?;
                if key.status == EchKeyStatus::Retired
                    && key.retired_at.is_some_and(|t| t + keep_secs <= now)
                {
                    doomed.push(id.value());
                }
            }
            removed = doomed.len();
            for id in doomed {
                table.remove(id)?;
            }
        }
        write_txn.commit()?;
        Ok(removed)
    }

    /// Apply a mutation to every key it matches, in one write transaction.
    fn ech_rewrite(&self, mut apply: impl FnMut(&mut EchKey) -> bool) -> StoreResult<usize> {
        let write_txn = self.db.begin_write()?;
        let changed;
        {
            let mut table = write_txn.open_table(ECH_KEYS)?;
            let mut updates = Vec::new();
            for entry in table.iter()? {
                let (id, raw) = entry?;
                let mut key: EchKey = from_bytes(raw.value())?;
                if apply(&mut key) {
                    updates.push((id.value(), to_bytes(&key)?));
                }
            }
            changed = updates.len();
            for (id, raw) in updates {
                table.insert(id, raw.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(changed)
    }
}
