//! Device rows, keyed by udid with a per-user owner index.

use redb::ReadableTable;

use crate::models::Device;

use super::db::{
    device_index_bounds, device_index_key, from_bytes, to_bytes, Store, StoreResult, DEVICES,
    DEVICES_BY_USER,
};

impl Store {
    pub fn device(&self, udid: &str) -> StoreResult<Option<Device>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEVICES)?;
        match table.get(udid)? {
            Some(value) => Ok(Some(from_bytes(value.value())?)),
            None => Ok(None),
        }
    }

    /// Insert or update a device row and its owner-index entry. A udid that
    /// changes hands drops the previous owner's index entry in the same
    /// transaction, so each device is listed under exactly one user.
    pub fn save_device(&self, device: &Device) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut devices = write_txn.open_table(DEVICES)?;
            let previous_owner = devices
                .insert(device.udid.as_str(), to_bytes(device)?.as_slice())?
                .map(|raw| from_bytes::<Device>(raw.value()))
                .transpose()?
                .map(|d| d.user_id);

            let mut index = write_txn.open_table(DEVICES_BY_USER)?;
            if let Some(old) = previous_owner.filter(|&old| old != device.user_id) {
                index.remove(device_index_key(old, &device.udid).as_slice())?;
            }
            let key = device_index_key(device.user_id, &device.udid);
            index.insert(key.as_slice(), device.udid.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn delete_device(&self, udid: &str) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut devices = write_txn.open_table(DEVICES)?;
            let Some(raw) = devices.remove(udid)? else {
                return Err(super::StoreError::NotFound(format!("device {udid}")));
            };
            let device: Device = from_bytes(raw.value())?;

            let mut index = write_txn.open_table(DEVICES_BY_USER)?;
            let key = device_index_key(device.user_id, udid);
            index.remove(key.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// All devices owned by a user, via an owner-index range scan.
    pub fn devices_by_user(&self, user_id: u64) -> StoreResult<Vec<Device>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(DEVICES_BY_USER)?;
        let devices = read_txn.open_table(DEVICES)?;

        let (start, end) = device_index_bounds(user_id);
        let mut out = Vec::new();
        for entry in index.range(start.as_slice()..end.as_slice())? {
            let (_, udid) = entry?;
            if let Some(raw) = devices.get(udid.value())? {
                out.push(from_bytes(raw.value())?);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_store;

    #[test]
    fn save_and_fetch_round_trip() {
        let (store, _dir) = open_store();
        let device = Device::new("udid-1", 7);
        store.save_device(&device).unwrap();

        let loaded = store.device("udid-1").unwrap().unwrap();
        assert_eq!(loaded.user_id, 7);
        assert_eq!(loaded.token_issue_at, 0);
    }

    #[test]
    fn owner_index_scans_only_that_user() {
        let (store, _dir) = open_store();
        store.save_device(&Device::new("a", 1)).unwrap();
        store.save_device(&Device::new("b", 1)).unwrap();
        store.save_device(&Device::new("c", 2)).unwrap();

        let mine = store.devices_by_user(1).unwrap();
        let mut udids: Vec<_> = mine.iter().map(|d| d.udid.as_str()).collect();
        udids.sort_unstable();
        assert_eq!(udids, vec!["a", "b"]);
    }

    #[test]
    fn reowning_a_udid_moves_the_index_entry() {
        let (store, _dir) = open_store();
        store.save_device(&Device::new("shared-udid", 1)).unwrap();
        store.save_device(&Device::new("shared-udid", 2)).unwrap();

        assert!(store.devices_by_user(1).unwrap().is_empty());
        let theirs = store.devices_by_user(2).unwrap();
        assert_eq!(theirs.len(), 1);
        assert_eq!(theirs[0].udid, "shared-udid");
        assert_eq!(store.device("shared-udid").unwrap().unwrap().user_id, 2);
    }

    #[test]
    fn delete_removes_row_and_index() {
        let (store, _dir) = open_store();
        store.save_device(&Device::new("a", 1)).unwrap();
        store.delete_device("a").unwrap();

        assert!(store.device("a").unwrap().is_none());
        assert!(store.devices_by_user(1).unwrap().is_empty());
        assert!(store.delete_device("a").is_err());
    }
}
