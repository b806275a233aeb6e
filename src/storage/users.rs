//! User rows and their lookup indexes.

use redb::ReadableTable;
use uuid::Uuid;

use crate::models::{now_ts, User};

use super::db::{bump_seq, from_bytes, to_bytes, Store, StoreResult};
use super::db::{META, USERS, USER_BY_ACCESS_KEY, USER_BY_EMAIL, USER_BY_UUID};
use super::StoreError;

impl Store {
    pub fn user(&self, id: u64) -> StoreResult<Option<User>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USERS)?;
        match table.get(id)? {
            Some(value) => Ok(Some(from_bytes(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn user_by_uuid(&self, uuid: &str) -> StoreResult<Option<User>> {
        self.user_by_index(USER_BY_UUID, uuid)
    }

    pub fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.user_by_index(USER_BY_EMAIL, email)
    }

    pub fn user_by_access_key(&self, key: &str) -> StoreResult<Option<User>> {
        self.user_by_index(USER_BY_ACCESS_KEY, key)
    }

    fn user_by_index(
        &self,
        index: redb::TableDefinition<&str, u64>,
        key: &str,
    ) -> StoreResult<Option<User>> {
        let read_txn = self.db.begin_read()?;
        let idx = read_txn.open_table(index)?;
        let Some(id) = idx.get(key)?.map(|g| g.value()) else {
            return Ok(None);
        };
        let table = read_txn.open_table(USERS)?;
        match table.get(id)? {
            Some(value) => Ok(Some(from_bytes(value.value())?)),
            None => Ok(None),
        }
    }

    /// Fetch the user for an email, creating a default (non-admin,
    /// non-retailer, expired-membership) record on first sight.
    pub fn get_or_create_user(&self, email: &str) -> StoreResult<User> {
        if let Some(user) = self.user_by_email(email)? {
            return Ok(user);
        }

        let write_txn = self.db.begin_write()?;
        let user = {
            let mut meta = write_txn.open_table(META)?;
            // Re-check inside the write txn; a racing creator may have won.
            let mut by_email = write_txn.open_table(USER_BY_EMAIL)?;
            let mut users = write_txn.open_table(USERS)?;
            let existing = by_email.get(email)?.map(|g| g.value());
            if let Some(id) = existing {
                let raw = users
                    .get(id)?
                    .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;
                from_bytes::<User>(raw.value())?
            } else {
                let id = bump_seq(&mut meta, "seq:users")?;
                let user = User {
                    id,
                    uuid: Uuid::new_v4().to_string(),
                    email: email.to_string(),
                    roles: 0,
                    expired_at: 0,
                    is_admin: false,
                    is_retailer: false,
                    access_key: None,
                    created_at: now_ts(),
                };
                users.insert(id, to_bytes(&user)?.as_slice())?;
                by_email.insert(email, id)?;
                let mut by_uuid = write_txn.open_table(USER_BY_UUID)?;
                by_uuid.insert(user.uuid.as_str(), id)?;
                user
            }
        };
        write_txn.commit()?;
        Ok(user)
    }

    /// Persist a user row, keeping the uuid/email/access-key indexes in step.
    pub fn save_user(&self, user: &User) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut users = write_txn.open_table(USERS)?;
            let previous: Option<User> = match users.get(user.id)? {
                Some(raw) => Some(from_bytes(raw.value())?),
                None => None,
            };
            users.insert(user.id, to_bytes(user)?.as_slice())?;

            let mut by_uuid = write_txn.open_table(USER_BY_UUID)?;
            by_uuid.insert(user.uuid.as_str(), user.id)?;
            let mut by_email = write_txn.open_table(USER_BY_EMAIL)?;
            by_email.insert(user.email.as_str(), user.id)?;

            let mut by_key = write_txn.open_table(USER_BY_ACCESS_KEY)?;
            if let Some(prev) = previous {
                if let Some(old_key) = prev.access_key.as_deref() {
                    if prev.access_key != user.access_key {
                        by_key.remove(old_key)?;
                    }
                }
            }
            if let Some(key) = user.access_key.as_deref() {
                by_key.insert(key, user.id)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}
