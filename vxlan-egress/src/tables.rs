use std::{
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use aya::Pod;
use aya::maps::{HashMap, Map, MapData, MapError};
use tracing::debug;

use vxlan_egress_common::{
    EndpointInfo, EndpointKey, LocalNodeKey, LocalNodeValue, MAP_ENDPOINTS, MAP_LOCAL_NODE,
    MAP_POD_NODES, PodNodeKey, PodNodeValue,
};

use crate::model::{LocalDevice, endpoint_key, node_addr, pod_key};

pub type EndpointTable = PinnedTable<EndpointKey, EndpointInfo>;
pub type PodNodeTable = PinnedTable<PodNodeKey, PodNodeValue>;
pub type LocalNodeTable = PinnedTable<LocalNodeKey, LocalNodeValue>;

/// Pinned path of table `name` inside `pin_dir`.
pub fn pin_path(pin_dir: &Path, name: &str) -> PathBuf {
    pin_dir.join(name)
}

/// Read-only handle on a table pinned by the control plane.
///
/// The kernel map behind it is shared with the classifier and the control
/// plane; opening it again by name yields the same instance.
pub struct PinnedTable<K, V> {
    name: &'static str,
    map: HashMap<MapData, K, V>,
}

impl<K: Pod, V: Pod> PinnedTable<K, V> {
    pub fn open(pin_dir: &Path, name: &'static str) -> Result<Self> {
        let path = pin_path(pin_dir, name);
        let map_data = MapData::from_pin(&path)
            .map_err(|e| anyhow!("failed to open pinned map {}: {}", path.display(), e))?;
        let map = HashMap::<_, K, V>::try_from(Map::HashMap(map_data))
            .with_context(|| format!("map {name} does not match the expected layout"))?;
        debug!(table = name, path = %path.display(), "opened pinned table");
        Ok(Self { name, map })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Point lookup. A missing key is `Ok(None)`.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        lookup_result(self.map.get(key, 0))
            .with_context(|| format!("lookup in {} failed", self.name))
    }
}

fn lookup_result<V>(res: Result<V, MapError>) -> Result<Option<V>, MapError> {
    match res {
        Ok(value) => Ok(Some(value)),
        Err(MapError::KeyNotFound) => Ok(None),
        Err(err) => Err(err),
    }
}

impl PinnedTable<PodNodeKey, PodNodeValue> {
    pub fn open_pod_nodes(pin_dir: &Path) -> Result<Self> {
        Self::open(pin_dir, MAP_POD_NODES)
    }

    pub fn node_of_pod(&self, pod: Ipv4Addr) -> Result<Option<Ipv4Addr>> {
        Ok(self.get(&pod_key(pod))?.map(node_addr))
    }
}

impl PinnedTable<EndpointKey, EndpointInfo> {
    pub fn open_endpoints(pin_dir: &Path) -> Result<Self> {
        Self::open(pin_dir, MAP_ENDPOINTS)
    }

    pub fn endpoint(&self, addr: Ipv4Addr) -> Result<Option<EndpointInfo>> {
        self.get(&endpoint_key(addr))
    }
}

impl PinnedTable<LocalNodeKey, LocalNodeValue> {
    pub fn open_local_node(pin_dir: &Path) -> Result<Self> {
        Self::open(pin_dir, MAP_LOCAL_NODE)
    }

    pub fn if_index(&self, device: LocalDevice) -> Result<Option<u32>> {
        Ok(self.get(&device.key())?.map(|v| v.if_index))
    }
}
