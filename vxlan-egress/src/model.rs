use std::{fmt, net::Ipv4Addr};

use clap::ValueEnum;
use serde_json::{Value, json};

use vxlan_egress_common::{
    EndpointInfo, EndpointKey, LOCAL_DEV_VETH, LOCAL_DEV_VXLAN, LocalNodeKey, PodNodeKey,
    PodNodeValue, TunnelParams, Verdict,
};

/// Role of a local device in the Local-Node table.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum LocalDevice {
    Vxlan,
    Veth,
}

impl LocalDevice {
    pub fn key(self) -> LocalNodeKey {
        let kind = match self {
            LocalDevice::Vxlan => LOCAL_DEV_VXLAN,
            LocalDevice::Veth => LOCAL_DEV_VETH,
        };
        LocalNodeKey { kind }
    }
}

impl fmt::Display for LocalDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalDevice::Vxlan => f.write_str("vxlan"),
            LocalDevice::Veth => f.write_str("veth"),
        }
    }
}

// Table addresses are host-order integers of the dotted quad.
pub fn pod_key(addr: Ipv4Addr) -> PodNodeKey {
    PodNodeKey {
        ip: u32::from(addr),
    }
}

pub fn endpoint_key(addr: Ipv4Addr) -> EndpointKey {
    EndpointKey {
        ip: u32::from(addr),
    }
}

pub fn node_addr(value: PodNodeValue) -> Ipv4Addr {
    Ipv4Addr::from(value.ip)
}

/// 6-byte MAC stored zero-padded in an 8-byte table field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PaddedMac(pub [u8; 8]);

impl fmt::Display for PaddedMac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

pub fn pod_route_json(pod: Ipv4Addr, node: Option<Ipv4Addr>) -> Value {
    json!({
        "pod": pod.to_string(),
        "node": node.map(|n| n.to_string()),
    })
}

pub fn endpoint_json(addr: Ipv4Addr, info: Option<&EndpointInfo>) -> Value {
    let endpoint = info.map(|info| {
        json!({
            "if_index": info.if_index,
            "lxc_if_index": info.lxc_if_index,
            "mac": PaddedMac(info.mac).to_string(),
            "node_mac": PaddedMac(info.node_mac).to_string(),
        })
    });
    json!({
        "ip": addr.to_string(),
        "endpoint": endpoint,
    })
}

pub fn local_device_json(device: LocalDevice, if_index: Option<u32>) -> Value {
    json!({
        "device": device.to_string(),
        "if_index": if_index,
    })
}

pub fn tunnel_json(params: &TunnelParams) -> Value {
    json!({
        "remote": Ipv4Addr::from(params.remote_ipv4).to_string(),
        "id": params.tunnel_id,
        "tos": params.tos,
        "ttl": params.ttl,
        "zero_csum_tx": params.zero_csum_tx,
    })
}

pub fn verdict_name(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Unspec => "unspec",
        Verdict::Ok => "ok",
        Verdict::Shot => "shot",
    }
}
