//! Per-packet egress decision for the VXLAN device.
//!
//! The classifier is stateless across packets: it checks framing, reads the
//! IPv4 destination, performs one Pod-to-Node lookup and, on a hit, asks the
//! context to install tunnel metadata. Every step is bounded and reads only
//! fixed offsets inside `[data, data_end)`.

use crate::{DEFAULT_TUNNEL_ID, DEFAULT_TUNNEL_TOS, DEFAULT_TUNNEL_TTL, PodNodeKey, PodNodeValue};

pub const ETH_HDR_LEN: usize = 14;
pub const IPV4_HDR_LEN: usize = 20;
pub const ETH_P_IP: u16 = 0x0800;

const ETH_PROTO_OFFSET: usize = 12;
const IPV4_SADDR_OFFSET: usize = 12;
const IPV4_DADDR_OFFSET: usize = 16;

pub const TC_ACT_UNSPEC: i32 = -1;
pub const TC_ACT_OK: i32 = 0;
pub const TC_ACT_SHOT: i32 = 2;

#[repr(i32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Verdict {
    /// Not ours to classify; default handling proceeds.
    Unspec = TC_ACT_UNSPEC,
    /// Explicit accept, with or without tunnel metadata.
    Ok = TC_ACT_OK,
    /// Discard.
    Shot = TC_ACT_SHOT,
}

impl Verdict {
    pub const fn tc_action(self) -> i32 {
        self as i32
    }

    pub const fn is_pass(self) -> bool {
        !matches!(self, Verdict::Shot)
    }
}

/// Tunnel metadata installed on a packet headed for a remote node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TunnelParams {
    /// Underlay address of the remote node, host byte order.
    pub remote_ipv4: u32,
    pub tunnel_id: u32,
    pub tos: u8,
    pub ttl: u8,
    /// Transmit the outer UDP header with a zero checksum.
    pub zero_csum_tx: bool,
}

impl TunnelParams {
    pub const fn towards(node_ip: u32) -> Self {
        Self {
            remote_ipv4: node_ip,
            tunnel_id: DEFAULT_TUNNEL_ID,
            tos: DEFAULT_TUNNEL_TOS,
            ttl: DEFAULT_TUNNEL_TTL,
            zero_csum_tx: true,
        }
    }
}

/// What gets traced when the tunnel metadata could not be installed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TunnelFailure {
    pub code: i64,
    pub src: u32,
    pub dst: u32,
    pub node: u32,
}

/// Read-only view of the Pod-to-Node table.
pub trait PodNodeLookup {
    fn node_of(&self, key: &PodNodeKey) -> Option<PodNodeValue>;
}

/// The packet being classified and the platform primitives acting on it.
///
/// # Safety
///
/// `data()..data_end()` must describe a readable byte range for the whole
/// lifetime of the call to [`classify`].
pub unsafe trait EgressContext {
    fn data(&self) -> usize;
    fn data_end(&self) -> usize;
    /// Install tunnel metadata on the packet. `Err` carries the negative
    /// return code of the primitive.
    fn set_tunnel_key(&mut self, params: &TunnelParams) -> Result<(), i64>;
    fn trace_tunnel_failure(&self, failure: &TunnelFailure);
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Ipv4Addrs {
    src: u32,
    dst: u32,
}

#[inline(always)]
fn parse_ipv4<C: EgressContext>(ctx: &C) -> Option<Ipv4Addrs> {
    let data = ctx.data();
    let data_end = ctx.data_end();
    if data + ETH_HDR_LEN + IPV4_HDR_LEN > data_end {
        return None;
    }

    let h_proto = unsafe {
        let p = (data + ETH_PROTO_OFFSET) as *const u16;
        u16::from_be(core::ptr::read_unaligned(p))
    };
    if h_proto != ETH_P_IP {
        return None;
    }

    let ip_start = data + ETH_HDR_LEN;
    let src = unsafe {
        let p = (ip_start + IPV4_SADDR_OFFSET) as *const u32;
        u32::from_be(core::ptr::read_unaligned(p))
    };
    let dst = unsafe {
        let p = (ip_start + IPV4_DADDR_OFFSET) as *const u32;
        u32::from_be(core::ptr::read_unaligned(p))
    };
    Some(Ipv4Addrs { src, dst })
}

/// Classify one packet leaving the VXLAN device.
#[inline(always)]
pub fn classify<C, L>(ctx: &mut C, pods: &L) -> Verdict
where
    C: EgressContext,
    L: PodNodeLookup + ?Sized,
{
    let Some(addrs) = parse_ipv4(ctx) else {
        return Verdict::Unspec;
    };

    let Some(node) = pods.node_of(&PodNodeKey { ip: addrs.dst }) else {
        return Verdict::Ok;
    };

    let params = TunnelParams::towards(node.ip);
    match ctx.set_tunnel_key(&params) {
        Ok(()) => Verdict::Ok,
        Err(code) => {
            ctx.trace_tunnel_failure(&TunnelFailure {
                code,
                src: addrs.src,
                dst: addrs.dst,
                node: node.ip,
            });
            Verdict::Shot
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::net::Ipv4Addr;

    const ETH_P_ARP: u16 = 0x0806;

    struct FakeSkb {
        frame: Vec<u8>,
        fail_with: Option<i64>,
        applied: Vec<TunnelParams>,
        traces: RefCell<Vec<TunnelFailure>>,
    }

    impl FakeSkb {
        fn new(frame: Vec<u8>) -> Self {
            Self {
                frame,
                fail_with: None,
                applied: Vec::new(),
                traces: RefCell::new(Vec::new()),
            }
        }

        fn failing(frame: Vec<u8>, code: i64) -> Self {
            Self {
                fail_with: Some(code),
                ..Self::new(frame)
            }
        }
    }

    unsafe impl EgressContext for FakeSkb {
        fn data(&self) -> usize {
            self.frame.as_ptr() as usize
        }

        fn data_end(&self) -> usize {
            self.frame.as_ptr() as usize + self.frame.len()
        }

        fn set_tunnel_key(&mut self, params: &TunnelParams) -> Result<(), i64> {
            self.applied.push(*params);
            match self.fail_with {
                Some(code) => Err(code),
                None => Ok(()),
            }
        }

        fn trace_tunnel_failure(&self, failure: &TunnelFailure) {
            self.traces.borrow_mut().push(*failure);
        }
    }

    #[derive(Default)]
    struct PodTable {
        entries: HashMap<u32, u32>,
        lookups: Cell<usize>,
    }

    impl PodTable {
        fn with(pod: Ipv4Addr, node: Ipv4Addr) -> Self {
            let mut table = Self::default();
            table.entries.insert(u32::from(pod), u32::from(node));
            table
        }
    }

    impl PodNodeLookup for PodTable {
        fn node_of(&self, key: &PodNodeKey) -> Option<PodNodeValue> {
            self.lookups.set(self.lookups.get() + 1);
            self.entries.get(&key.ip).map(|ip| PodNodeValue { ip: *ip })
        }
    }

    fn frame(ethertype: u16, src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
        let mut buf = vec![0u8; ETH_HDR_LEN + IPV4_HDR_LEN + 8];
        buf[0..6].copy_from_slice(&[0x02, 0, 0, 0, 0, 0x02]);
        buf[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0, 0x01]);
        buf[12..14].copy_from_slice(&ethertype.to_be_bytes());
        let ip = &mut buf[ETH_HDR_LEN..];
        ip[0] = 0x45;
        ip[8] = 64;
        ip[9] = 17;
        ip[12..16].copy_from_slice(&src.octets());
        ip[16..20].copy_from_slice(&dst.octets());
        buf
    }

    fn pod_table() -> PodTable {
        PodTable::with(Ipv4Addr::new(10, 0, 2, 5), Ipv4Addr::new(192, 168, 1, 10))
    }

    #[test]
    fn known_pod_gets_tunnel_towards_its_node() {
        let pods = pod_table();
        let mut skb = FakeSkb::new(frame(
            ETH_P_IP,
            Ipv4Addr::new(10, 0, 1, 7),
            Ipv4Addr::new(10, 0, 2, 5),
        ));

        let verdict = classify(&mut skb, &pods);

        assert_eq!(verdict, Verdict::Ok);
        assert_eq!(
            skb.applied,
            vec![TunnelParams {
                remote_ipv4: u32::from(Ipv4Addr::new(192, 168, 1, 10)),
                tunnel_id: 13190,
                tos: 0,
                ttl: 64,
                zero_csum_tx: true,
            }]
        );
        assert!(skb.traces.borrow().is_empty());
    }

    #[test]
    fn unknown_destination_passes_without_tunnel() {
        let pods = pod_table();
        let mut skb = FakeSkb::new(frame(
            ETH_P_IP,
            Ipv4Addr::new(10, 0, 1, 7),
            Ipv4Addr::new(10, 0, 3, 9),
        ));

        assert_eq!(classify(&mut skb, &pods), Verdict::Ok);
        assert!(skb.applied.is_empty());
        assert_eq!(pods.lookups.get(), 1);
    }

    #[test]
    fn arp_is_left_alone_without_lookup() {
        let pods = pod_table();
        let mut skb = FakeSkb::new(frame(
            ETH_P_ARP,
            Ipv4Addr::new(10, 0, 1, 7),
            Ipv4Addr::new(10, 0, 2, 5),
        ));

        let verdict = classify(&mut skb, &pods);

        assert_eq!(verdict, Verdict::Unspec);
        assert!(verdict.is_pass());
        assert_eq!(pods.lookups.get(), 0);
        assert!(skb.applied.is_empty());
    }

    #[test]
    fn truncated_frames_pass_untouched() {
        let pods = pod_table();
        let full = frame(
            ETH_P_IP,
            Ipv4Addr::new(10, 0, 1, 7),
            Ipv4Addr::new(10, 0, 2, 5),
        );
        for len in [0, 1, ETH_HDR_LEN, ETH_HDR_LEN + IPV4_HDR_LEN - 1] {
            let mut skb = FakeSkb::new(full[..len].to_vec());
            assert_eq!(classify(&mut skb, &pods), Verdict::Unspec, "len {len}");
            assert!(skb.applied.is_empty());
            assert!(skb.traces.borrow().is_empty());
        }
        assert_eq!(pods.lookups.get(), 0);
    }

    #[test]
    fn exact_header_length_is_classified() {
        let pods = pod_table();
        let full = frame(
            ETH_P_IP,
            Ipv4Addr::new(10, 0, 1, 7),
            Ipv4Addr::new(10, 0, 2, 5),
        );
        let mut skb = FakeSkb::new(full[..ETH_HDR_LEN + IPV4_HDR_LEN].to_vec());
        assert_eq!(classify(&mut skb, &pods), Verdict::Ok);
        assert_eq!(skb.applied.len(), 1);
    }

    #[test]
    fn tunnel_failure_drops_and_traces_once() {
        let pods = pod_table();
        let src = Ipv4Addr::new(10, 0, 1, 7);
        let dst = Ipv4Addr::new(10, 0, 2, 5);
        let mut skb = FakeSkb::failing(frame(ETH_P_IP, src, dst), -22);

        let verdict = classify(&mut skb, &pods);

        assert_eq!(verdict, Verdict::Shot);
        assert!(!verdict.is_pass());
        assert_eq!(skb.applied.len(), 1);
        assert_eq!(
            *skb.traces.borrow(),
            vec![TunnelFailure {
                code: -22,
                src: u32::from(src),
                dst: u32::from(dst),
                node: u32::from(Ipv4Addr::new(192, 168, 1, 10)),
            }]
        );
    }

    #[test]
    fn same_packet_same_verdict() {
        let pods = pod_table();
        let mut skb = FakeSkb::new(frame(
            ETH_P_IP,
            Ipv4Addr::new(10, 0, 1, 7),
            Ipv4Addr::new(10, 0, 2, 5),
        ));

        let first = classify(&mut skb, &pods);
        let second = classify(&mut skb, &pods);

        assert_eq!(first, second);
        assert_eq!(skb.applied[0], skb.applied[1]);
    }

    #[test]
    fn verdicts_map_to_tc_actions() {
        assert_eq!(Verdict::Unspec.tc_action(), -1);
        assert_eq!(Verdict::Ok.tc_action(), 0);
        assert_eq!(Verdict::Shot.tc_action(), 2);
    }
}
