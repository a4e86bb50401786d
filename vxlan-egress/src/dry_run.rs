use std::net::Ipv4Addr;

use anyhow::Result;
use serde_json::{Value, json};

use vxlan_egress_common::classify::{ETH_HDR_LEN, ETH_P_IP, IPV4_HDR_LEN};
use vxlan_egress_common::{
    EgressContext, PodNodeKey, PodNodeLookup, PodNodeValue, TunnelFailure, TunnelParams, Verdict,
    classify,
};

use crate::model::{tunnel_json, verdict_name};

const FRAME_LEN: usize = ETH_HDR_LEN + IPV4_HDR_LEN;

/// Outcome of a dry-run classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Resolution {
    pub verdict: Verdict,
    pub tunnel: Option<TunnelParams>,
}

impl Resolution {
    pub fn to_json(&self, src: Ipv4Addr, dst: Ipv4Addr) -> Value {
        json!({
            "src": src.to_string(),
            "dst": dst.to_string(),
            "verdict": verdict_name(self.verdict),
            "pass": self.verdict.is_pass(),
            "tunnel": self.tunnel.as_ref().map(tunnel_json),
        })
    }
}

/// Synthetic frame run through the classifier; tunnel metadata is recorded
/// instead of installed.
struct DryRun {
    frame: [u8; FRAME_LEN],
    tunnel: Option<TunnelParams>,
}

impl DryRun {
    fn new(src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        let mut frame = [0u8; FRAME_LEN];
        frame[12..14].copy_from_slice(&ETH_P_IP.to_be_bytes());
        let ip = &mut frame[ETH_HDR_LEN..];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&(IPV4_HDR_LEN as u16).to_be_bytes());
        ip[8] = 64;
        ip[12..16].copy_from_slice(&src.octets());
        ip[16..20].copy_from_slice(&dst.octets());
        Self {
            frame,
            tunnel: None,
        }
    }
}

unsafe impl EgressContext for DryRun {
    fn data(&self) -> usize {
        self.frame.as_ptr() as usize
    }

    fn data_end(&self) -> usize {
        self.frame.as_ptr() as usize + self.frame.len()
    }

    fn set_tunnel_key(&mut self, params: &TunnelParams) -> Result<(), i64> {
        self.tunnel = Some(*params);
        Ok(())
    }

    // set_tunnel_key never fails here.
    fn trace_tunnel_failure(&self, _failure: &TunnelFailure) {}
}

/// The one Pod-to-Node entry the dry run can hit, fetched up front.
struct Fetched {
    key: PodNodeKey,
    node: Option<PodNodeValue>,
}

impl PodNodeLookup for Fetched {
    fn node_of(&self, key: &PodNodeKey) -> Option<PodNodeValue> {
        if *key == self.key { self.node } else { None }
    }
}

/// Classify a packet `src -> dst` without touching the kernel.
///
/// `lookup` is asked for the destination's node before classification so a
/// failed table read surfaces as an error instead of a plain pass.
pub fn resolve<F>(lookup: F, src: Ipv4Addr, dst: Ipv4Addr) -> Result<Resolution>
where
    F: FnOnce(&PodNodeKey) -> Result<Option<PodNodeValue>>,
{
    let key = PodNodeKey {
        ip: u32::from(dst),
    };
    let pods = Fetched {
        node: lookup(&key)?,
        key,
    };
    let mut dry_run = DryRun::new(src, dst);
    let verdict = classify(&mut dry_run, &pods);
    Ok(Resolution {
        verdict,
        tunnel: dry_run.tunnel,
    })
}
