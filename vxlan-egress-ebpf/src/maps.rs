// Overlay tables. All three are pinned by name so the control plane, which
// owns every write, and this program share one instance across reloads.

use aya_ebpf::macros::map;
use aya_ebpf::maps::HashMap;
use vxlan_egress_common::{
    EndpointInfo, EndpointKey, LocalNodeKey, LocalNodeValue, MAX_ENTRIES, PodNodeKey,
    PodNodeLookup, PodNodeValue,
};

#[map(name = "ding_lxc")]
pub static ENDPOINTS: HashMap<EndpointKey, EndpointInfo> =
    HashMap::<EndpointKey, EndpointInfo>::pinned(MAX_ENTRIES, 0);

#[map(name = "ding_ip")]
pub static POD_NODES: HashMap<PodNodeKey, PodNodeValue> =
    HashMap::<PodNodeKey, PodNodeValue>::pinned(MAX_ENTRIES, 0);

#[map(name = "ding_local")]
pub static LOCAL_NODE: HashMap<LocalNodeKey, LocalNodeValue> =
    HashMap::<LocalNodeKey, LocalNodeValue>::pinned(MAX_ENTRIES, 0);

/// Read-only handle over the Pod-to-Node map handed to the classifier.
pub struct PodNodes<'a>(pub &'a HashMap<PodNodeKey, PodNodeValue>);

impl PodNodeLookup for PodNodes<'_> {
    #[inline(always)]
    fn node_of(&self, key: &PodNodeKey) -> Option<PodNodeValue> {
        unsafe { self.0.get(key) }.copied()
    }
}
