#![cfg_attr(not(test), no_std)]

// Table layouts and the egress decision shared between userspace and the
// eBPF program. Keep this crate `no_std` friendly so it can be used from eBPF code.

pub mod classify;

pub use classify::{EgressContext, PodNodeLookup, TunnelFailure, TunnelParams, Verdict, classify};

/// Name of the Endpoint table (local workload endpoints keyed by address).
pub const MAP_ENDPOINTS: &str = "ding_lxc";
/// Name of the Pod-to-Node table (pod address to hosting node address).
pub const MAP_POD_NODES: &str = "ding_ip";
/// Name of the Local-Node table (device role to ifindex).
pub const MAP_LOCAL_NODE: &str = "ding_local";

/// Pin namespace used by the tc loader; the control plane pins the tables here.
pub const DEFAULT_PIN_DIR: &str = "/sys/fs/bpf/tc/globals";

/// Capacity of every table. Fixed at creation, never resized.
pub const MAX_ENTRIES: u32 = 255;

/// VNI shared by every node of the overlay.
pub const DEFAULT_TUNNEL_ID: u32 = 13190;
pub const DEFAULT_TUNNEL_TTL: u8 = 64;
pub const DEFAULT_TUNNEL_TOS: u8 = 0;

pub const LOCAL_DEV_VXLAN: u32 = 1;
pub const LOCAL_DEV_VETH: u32 = 2;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct EndpointKey {
    pub ip: u32,
}

/// Location of a workload endpoint on this node. MACs are 6 bytes padded to 8.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct EndpointInfo {
    pub if_index: u32,
    pub lxc_if_index: u32,
    pub mac: [u8; 8],
    pub node_mac: [u8; 8],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct PodNodeKey {
    pub ip: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct PodNodeValue {
    pub ip: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct LocalNodeKey {
    pub kind: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct LocalNodeValue {
    pub if_index: u32,
}

// Userspace reads the pinned tables through aya's typed map APIs. Kept behind
// a feature so the eBPF side doesn't pull in userspace-only dependencies.
#[cfg(feature = "user")]
mod user_impls {
    extern crate aya;

    use super::{
        EndpointInfo, EndpointKey, LocalNodeKey, LocalNodeValue, PodNodeKey, PodNodeValue,
    };
    use aya::Pod;

    unsafe impl Pod for EndpointKey {}
    unsafe impl Pod for EndpointInfo {}
    unsafe impl Pod for PodNodeKey {}
    unsafe impl Pod for PodNodeValue {}
    unsafe impl Pod for LocalNodeKey {}
    unsafe impl Pod for LocalNodeValue {}
}
