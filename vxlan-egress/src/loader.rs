use std::{fs, io, path::PathBuf};

use anyhow::{Context, Result, anyhow, ensure};
use aya::programs::tc::{self, SchedClassifier, SchedClassifierLinkId, TcAttachType};
use aya::{Ebpf, EbpfLoader, include_bytes_aligned};
use tokio::signal;
use tracing::{debug, info, warn};

use vxlan_egress_common::{MAP_ENDPOINTS, MAP_LOCAL_NODE, MAP_POD_NODES};

use crate::tables::pin_path;

// Empty when build.rs could not compile the eBPF crate (no bpf-linker on the host).
const EBPF_BYTES: &[u8] = include_bytes_aligned!(concat!(env!("OUT_DIR"), "/vxlan-egress"));
const TC_PROGRAM: &str = "vxlan_egress";
const PINNED_MAPS: [&str; 3] = [MAP_ENDPOINTS, MAP_POD_NODES, MAP_LOCAL_NODE];

#[derive(Clone, Debug)]
pub struct AttachOptions {
    pub iface: String,
    pub pin_dir: PathBuf,
}

pub async fn attach_program(opts: AttachOptions) -> Result<()> {
    validate_attach_options(&opts)?;
    ensure!(
        !EBPF_BYTES.is_empty(),
        "this binary was built without the eBPF object; install bpf-linker and rebuild"
    );

    bump_memlock_rlimit();
    fs::create_dir_all(&opts.pin_dir)
        .with_context(|| format!("failed to create {}", opts.pin_dir.display()))?;

    // Maps pinned by name are reused when the control plane already created them.
    let mut bpf = EbpfLoader::new()
        .map_pin_path(&opts.pin_dir)
        .load(EBPF_BYTES)
        .context("failed to load eBPF object")?;
    for name in PINNED_MAPS {
        let path = pin_path(&opts.pin_dir, name);
        ensure!(path.exists(), "table {name} was not pinned at {}", path.display());
        debug!(table = name, path = %path.display(), "table pinned");
    }

    if let Err(err) = aya_log::EbpfLogger::init(&mut bpf) {
        warn!("failed to initialize eBPF logger: {err}");
    }

    let link = attach_tc(&mut bpf, &opts.iface)?;

    info!(
        iface = %opts.iface,
        pin_dir = %opts.pin_dir.display(),
        "attached {TC_PROGRAM} to tc egress, press Ctrl+C to detach"
    );

    signal::ctrl_c()
        .await
        .context("failed to wait for shutdown signal")?;

    info!(iface = %opts.iface, "detaching {TC_PROGRAM}");
    detach(&mut bpf, link)
}

fn validate_attach_options(opts: &AttachOptions) -> Result<()> {
    ensure!(!opts.iface.is_empty(), "interface name must not be empty");
    ensure!(
        opts.pin_dir.is_absolute(),
        "pin directory must be an absolute path, got {}",
        opts.pin_dir.display()
    );
    Ok(())
}

fn bump_memlock_rlimit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        debug!("remove limit on locked memory failed, ret is: {ret}");
    }
}

fn ensure_clsact(iface: &str) -> Result<()> {
    match tc::qdisc_add_clsact(iface) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(anyhow!("failed to add clsact qdisc on {iface}: {err}")),
    }
}

fn attach_tc(bpf: &mut Ebpf, iface: &str) -> Result<SchedClassifierLinkId> {
    ensure_clsact(iface)?;
    let program: &mut SchedClassifier = bpf
        .program_mut(TC_PROGRAM)
        .with_context(|| format!("program {TC_PROGRAM} not found"))?
        .try_into()
        .context("tc program has wrong type")?;
    program.load().context("failed to load tc program")?;
    program
        .attach(iface, TcAttachType::Egress)
        .with_context(|| format!("failed to attach tc egress on {iface}"))
}

fn detach(bpf: &mut Ebpf, link: SchedClassifierLinkId) -> Result<()> {
    let program: &mut SchedClassifier = bpf
        .program_mut(TC_PROGRAM)
        .with_context(|| format!("program {TC_PROGRAM} not found"))?
        .try_into()
        .context("tc program has wrong type")?;
    program.detach(link).context("failed to detach tc program")
}
