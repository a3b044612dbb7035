use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::model::Network;

/// Known chains used when the API cannot list its networks.
pub fn builtin() -> Vec<Network> {
    vec![
        Network::named(1, "Ethereum", Some("https://etherscan.io")),
        Network::named(137, "Polygon", Some("https://polygonscan.com")),
        Network::named(56, "BSC", Some("https://bscscan.com")),
    ]
}

/// Shared chain id -> network lookup. Cloning shares the same table.
#[derive(Clone)]
pub struct NetworkDirectory {
    inner: Arc<RwLock<HashMap<u64, Network>>>,
}

impl NetworkDirectory {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_builtin() -> Self {
        let dir = Self::new();
        dir.replace(builtin());
        dir
    }

    /// Swaps the whole table. An empty list keeps what we had.
    pub fn replace(&self, networks: Vec<Network>) -> usize {
        if networks.is_empty() {
            return self.inner.read().len();
        }
        let map: HashMap<u64, Network> = networks.into_iter().map(|n| (n.chain_id, n)).collect();
        let n = map.len();
        *self.inner.write() = map;
        n
    }

    pub fn name_for(&self, chain_id: u64) -> String {
        self.inner
            .read()
            .get(&chain_id)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| format!("Network {chain_id}"))
    }

    /// Sorted by chain id.
    pub fn list(&self) -> Vec<Network> {
        let mut out: Vec<Network> = self.inner.read().values().cloned().collect();
        out.sort_by_key(|n| n.chain_id);
        out
    }
}

impl Default for NetworkDirectory {
    fn default() -> Self {
        Self::new()
    }
}
