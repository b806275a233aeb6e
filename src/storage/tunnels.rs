//! Tunnel, node, and cloud-instance rows.

use std::collections::HashMap;

use redb::ReadableTable;

use crate::models::{CloudInstance, SlaveNode, SlaveTunnel};

use super::db::{
    bump_seq, from_bytes, to_bytes, Store, StoreResult, CLOUD_INSTANCES, META, NODES, TUNNELS,
};

impl Store {
    pub fn save_tunnel(&self, tunnel: &mut SlaveTunnel) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            if tunnel.id == 0 {
                let mut meta = write_txn.open_table(META)?;
                tunnel.id = bump_seq(&mut meta, "seq:tunnels")?;
            }
            let mut table = write_txn.open_table(TUNNELS)?;
            table.insert(tunnel.id, to_bytes(tunnel)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn tunnels(&self) -> StoreResult<Vec<SlaveTunnel>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TUNNELS)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (_, raw) = entry?;
            out.push(from_bytes(raw.value())?);
        }
        Ok(out)
    }

    pub fn save_node(&self, node: &mut SlaveNode) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            if node.id == 0 {
                let mut meta = write_txn.open_table(META)?;
                node.id = bump_seq(&mut meta, "seq:nodes")?;
            }
            let mut table = write_txn.open_table(NODES)?;
            table.insert(node.id, to_bytes(node)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn node(&self, id: u64) -> StoreResult<Option<SlaveNode>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(NODES)?;
        match table.get(id)? {
            Some(value) => Ok(Some(from_bytes(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn node_by_ipv4(&self, ipv4: &str) -> StoreResult<Option<SlaveNode>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(NODES)?;
        for entry in table.iter()? {
            let (_, raw) = entry?;
            let node: SlaveNode = from_bytes(raw.value())?;
            if node.ipv4 == ipv4 {
                return Ok(Some(node));
            }
        }
        Ok(None)
    }

    /// Batched node lookup for a set of ids (tunnel listing uses this to
    /// avoid per-row queries).
    pub fn nodes_by_ids(&self, ids: &[u64]) -> StoreResult<HashMap<u64, SlaveNode>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(NODES)?;
        let mut out = HashMap::with_capacity(ids.len());
        for &id in ids {
            if let Some(raw) = table.get(id)? {
                out.insert(id, from_bytes(raw.value())?);
            }
        }
        Ok(out)
    }

    pub fn save_cloud_instance(&self, instance: &CloudInstance) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CLOUD_INSTANCES)?;
            table.insert(instance.ipv4.as_str(), to_bytes(instance)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Batched cloud-instance lookup keyed by node IPv4.
    pub fn cloud_instances_by_ips(
        &self,
        ips: &[String],
    ) -> StoreResult<HashMap<String, CloudInstance>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CLOUD_INSTANCES)?;
        let mut out = HashMap::with_capacity(ips.len());
        for ip in ips {
            if let Some(raw) = table.get(ip.as_str())? {
                out.insert(ip.clone(), from_bytes(raw.value())?);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TunnelProtocol;
    use crate::test_support::{open_store, sample_node, sample_tunnel};

    #[test]
    fn save_assigns_ids_once() {
        let (store, _dir) = open_store();
        let mut node = sample_node("1.2.3.4", "hk");
        store.save_node(&mut node).unwrap();
        assert_ne!(node.id, 0);
        let id = node.id;
        store.save_node(&mut node).unwrap();
        assert_eq!(node.id, id);
    }

    #[test]
    fn batched_lookups_return_only_known_rows() {
        let (store, _dir) = open_store();
        let mut node = sample_node("1.2.3.4", "hk");
        store.save_node(&mut node).unwrap();
        let mut tunnel = sample_tunnel(TunnelProtocol::K2v5, node.id);
        store.save_tunnel(&mut tunnel).unwrap();

        let nodes = store.nodes_by_ids(&[node.id, 999]).unwrap();
        assert_eq!(nodes.len(), 1);

        store
            .save_cloud_instance(&CloudInstance {
                ipv4: "1.2.3.4".into(),
                traffic_total_bytes: 100,
                traffic_used_bytes: 10,
                traffic_reset_at: None,
                expires_at: None,
            })
            .unwrap();
        let clouds = store
            .cloud_instances_by_ips(&["1.2.3.4".to_string(), "9.9.9.9".to_string()])
            .unwrap();
        assert_eq!(clouds.len(), 1);
    }

    #[test]
    fn node_by_ipv4_scans() {
        let (store, _dir) = open_store();
        let mut node = sample_node("10.0.0.1", "jp");
        store.save_node(&mut node).unwrap();
        assert_eq!(store.node_by_ipv4("10.0.0.1").unwrap().unwrap().id, node.id);
        assert!(store.node_by_ipv4("10.0.0.2").unwrap().is_none());
    }
}
