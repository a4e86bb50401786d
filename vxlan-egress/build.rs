use std::{
    env, fs,
    path::PathBuf,
    process::{Command, Stdio},
};

use anyhow::{Context as _, Result, anyhow};
use aya_build::{Package, Toolchain};

const EBPF_PACKAGE: &str = "vxlan-egress-ebpf";
const EBPF_BINARY: &str = "vxlan-egress";

fn main() -> Result<()> {
    if !bpf_linker_available() {
        return embed_empty_object();
    }

    let cargo_metadata::Metadata { packages, .. } = cargo_metadata::MetadataCommand::new()
        .no_deps()
        .exec()
        .context("MetadataCommand::exec")?;
    let ebpf_package = packages
        .into_iter()
        .find(|cargo_metadata::Package { name, .. }| name.as_str() == EBPF_PACKAGE)
        .ok_or_else(|| anyhow!("{EBPF_PACKAGE} package not found"))?;
    let cargo_metadata::Package {
        name,
        manifest_path,
        ..
    } = ebpf_package;
    let ebpf_package = Package {
        name: name.as_str(),
        root_dir: manifest_path
            .parent()
            .ok_or_else(|| anyhow!("no parent for {manifest_path}"))?
            .as_str(),
        ..Default::default()
    };
    aya_build::build_ebpf([ebpf_package], Toolchain::default())
}

fn bpf_linker_available() -> bool {
    println!("cargo:rerun-if-env-changed=PATH");
    Command::new("bpf-linker")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

// Host-only builds (and their tests) still link; the loader refuses to attach
// an empty object.
fn embed_empty_object() -> Result<()> {
    let out_dir = env::var_os("OUT_DIR").ok_or(anyhow!("OUT_DIR not set"))?;
    let dst = PathBuf::from(out_dir).join(EBPF_BINARY);
    println!("cargo:warning=bpf-linker not found, embedding an empty eBPF object");
    fs::write(&dst, b"").with_context(|| format!("failed to write {dst:?}"))
}
