#![no_std]
#![no_main]

use core::mem;

use aya_ebpf::bindings::{BPF_F_ZERO_CSUM_TX, bpf_tunnel_key};
use aya_ebpf::helpers::bpf_skb_set_tunnel_key;
use aya_ebpf::macros::classifier;
use aya_ebpf::programs::TcContext;
use aya_log_ebpf::error;
use vxlan_egress_common::{EgressContext, TunnelFailure, TunnelParams, classify};

mod maps;

use maps::{POD_NODES, PodNodes};

#[classifier]
pub fn vxlan_egress(ctx: TcContext) -> i32 {
    let mut egress = Egress { ctx };
    classify(&mut egress, &PodNodes(&POD_NODES)).tc_action()
}

struct Egress {
    ctx: TcContext,
}

unsafe impl EgressContext for Egress {
    #[inline(always)]
    fn data(&self) -> usize {
        self.ctx.data()
    }

    #[inline(always)]
    fn data_end(&self) -> usize {
        self.ctx.data_end()
    }

    #[inline(always)]
    fn set_tunnel_key(&mut self, params: &TunnelParams) -> Result<(), i64> {
        let mut key: bpf_tunnel_key = unsafe { mem::zeroed() };
        key.tunnel_id = params.tunnel_id;
        key.__bindgen_anon_1.remote_ipv4 = params.remote_ipv4;
        key.tunnel_tos = params.tos;
        key.tunnel_ttl = params.ttl;
        let flags = if params.zero_csum_tx {
            BPF_F_ZERO_CSUM_TX as u64
        } else {
            0
        };

        let ret = unsafe {
            bpf_skb_set_tunnel_key(
                self.ctx.skb.skb,
                &mut key,
                mem::size_of::<bpf_tunnel_key>() as u32,
                flags,
            )
        };
        if ret < 0 { Err(ret as i64) } else { Ok(()) }
    }

    fn trace_tunnel_failure(&self, failure: &TunnelFailure) {
        error!(
            &self.ctx,
            "bpf_skb_set_tunnel_key failed: {} ({:i} -> {:i} via {:i})",
            failure.code,
            failure.src,
            failure.dst,
            failure.node
        );
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

#[unsafe(link_section = "license")]
#[unsafe(no_mangle)]
static LICENSE: [u8; 4] = *b"GPL\0";
