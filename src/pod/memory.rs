//! In-memory Pod, used by tests and as the fast tier of a `CachePod`.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::Result;

use super::Pod;

#[derive(Default)]
pub struct MemoryPod {
    // BTreeMap keeps `list`/`walk` output in sorted key order for free,
    // which the changelog's prefix scan relies on to find heads cheaply.
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryPod {
    pub fn new() -> Self {
        MemoryPod::default()
    }
}

impl Pod for MemoryPod {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().unwrap().get(key).cloned())
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.data.write().unwrap().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.data.write().unwrap().remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .data
            .read()
            .unwrap()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn walk(&self, prefix: &str) -> Result<Vec<String>> {
        self.list(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_value() {
        let pod = MemoryPod::new();
        pod.put("a/b", b"hello").unwrap();
        assert_eq!(pod.get("a/b").unwrap(), Some(b"hello".to_vec()));
        assert_eq!(pod.get("missing").unwrap(), None);
    }

    #[test]
    fn list_respects_prefix_and_order() {
        let pod = MemoryPod::new();
        pod.put("log/b", b"2").unwrap();
        pod.put("log/a", b"1").unwrap();
        pod.put("other/x", b"x").unwrap();
        assert_eq!(pod.list("log/").unwrap(), vec!["log/a", "log/b"]);
    }

    #[test]
    fn delete_removes_key() {
        let pod = MemoryPod::new();
        pod.put("k", b"v").unwrap();
        pod.delete("k").unwrap();
        assert_eq!(pod.get("k").unwrap(), None);
    }
}
