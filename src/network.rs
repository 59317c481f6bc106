//! Host-side veth/netns/bridge wiring and container-side network
//! configuration. Networking is shelled out to `ip`/`brctl`; the
//! contract (veth pair, bridge membership, netns move, address/route/
//! DNS) is what matters, not the means.

use std::ffi::OsStr;
use std::net::Ipv4Addr;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::process::Command;

use log::{info, trace, warn};
use rand::Rng;

use crate::error::{PockyError, PockyResult};
use crate::linux;

pub const BRIDGE_INTERFACE: &str = "bridge0";
const NETNS_DIR: &str = "/var/run/netns";

fn ip_command<I, S>(args: I) -> PockyResult<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string_lossy().into_owned()).collect();
    let output = Command::new("ip").args(&args).output()?;

    if !output.status.success() {
        return Err(PockyError::CommandFailure {
            command: format!("ip {}", args.join(" ")),
            message: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn brctl_show() -> PockyResult<String> {
    let output = Command::new("brctl").arg("show").output()?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Checks whether `bridge0` already exists on the host. The bridge is
/// provisioned by an external one-shot script (out of scope for the
/// runtime); this only performs the existence check the original
/// tooling does before dispatching a command, and logs a hint rather
/// than inventing bridge-provisioning logic here.
pub fn ensure_bridge_exists() -> PockyResult<()> {
    match brctl_show() {
        Ok(output) => {
            if output.lines().any(|line| line.split_whitespace().next() == Some(BRIDGE_INTERFACE)) {
                Ok(())
            } else {
                warn!("bridge '{}' not found; run the network provisioning script before 'run'", BRIDGE_INTERFACE);
                Ok(())
            }
        }
        Err(err) => {
            warn!("could not query bridges via brctl: {}", err);
            Ok(())
        }
    }
}

/// Draws a random netns id in `[1, 50000]` until one is found whose
/// named netns does not already exist. Known limitation (no persisted
/// allocation registry): callers tolerate the retry/birthday risk.
pub fn allocate_netns_id() -> u32 {
    let mut rng = rand::thread_rng();
    loop {
        let candidate = rng.gen_range(1..=50_000u32);
        if !netns_path(candidate).exists() {
            return candidate;
        }
    }
}

fn veth_host(netns_id: u32) -> String {
    format!("veth0_{}", netns_id)
}

fn veth_container(netns_id: u32) -> String {
    format!("veth1_{}", netns_id)
}

fn netns_name(netns_id: u32) -> String {
    format!("netns_{}", netns_id)
}

pub fn netns_path(netns_id: u32) -> std::path::PathBuf {
    Path::new(NETNS_DIR).join(netns_name(netns_id))
}

/// Host-side setup, performed before the first fork: veth pair, attach
/// to the bridge, create the named netns, move one end into it.
pub fn create_host_network(netns_id: u32) -> PockyResult<()> {
    let host_if = veth_host(netns_id);
    let container_if = veth_container(netns_id);
    let netns = netns_name(netns_id);

    trace!("creating veth pair {} / {}", host_if, container_if);
    ip_command(["link", "add", &host_if, "type", "veth", "peer", "name", &container_if])?;
    ip_command(["link", "set", &host_if, "up"])?;
    ip_command(["link", "set", &host_if, "master", BRIDGE_INTERFACE])?;

    ip_command(["netns", "add", &netns])?;
    ip_command(["link", "set", &container_if, "netns", &netns])?;

    info!("host network ready for netns {}", netns_id);
    Ok(())
}

/// Removes the veth pair (which takes `veth1` with it) and the named
/// netns. Tolerates either already being gone.
pub fn teardown_host_network(netns_id: u32) -> PockyResult<()> {
    let host_if = veth_host(netns_id);
    let netns = netns_name(netns_id);

    if let Err(err) = ip_command(["link", "del", &host_if]) {
        trace!("veth {} already gone or failed to remove: {}", host_if, err);
    }
    if let Err(err) = ip_command(["netns", "del", &netns]) {
        trace!("netns {} already gone or failed to remove: {}", netns, err);
    }

    Ok(())
}

fn random_digit_1_9() -> u8 {
    rand::thread_rng().gen_range(1..=9)
}

/// Container-side setup, run inside C2 after `setns` into the netns:
/// loopback up, MAC + IPv4 assignment, link up, default route.
pub fn configure_inside_namespace(netns_id: u32, netns_fd_path: &Path) -> PockyResult<Ipv4Addr> {
    let file = std::fs::File::open(netns_fd_path)?;
    linux::setns(file.as_raw_fd(), linux::CLONE_NEWNET)?;

    ip_command(["link", "set", "lo", "up"])?;

    let container_if = veth_container(netns_id);
    let mac = format!(
        "02:42:ac:11:00{}:{}{}",
        random_digit_1_9(),
        random_digit_1_9(),
        random_digit_1_9()
    );
    ip_command(["link", "set", &container_if, "address", &mac])?;

    let host_octet: u8 = rand::thread_rng().gen_range(2..=254);
    let addr = Ipv4Addr::new(10, 0, 0, host_octet);
    ip_command(["addr", "add", &format!("{}/24", addr), "dev", &container_if])?;
    ip_command(["link", "set", &container_if, "up"])?;

    ip_command(["route", "add", "default", "via", "10.0.0.1"])?;

    Ok(addr)
}

/// Writes `nameserver 8.8.8.8` to the container's `/etc/resolv.conf`.
/// Must be called after chroot so the path resolves inside the
/// container, not on the host.
pub fn write_resolv_conf(new_root: &Path) -> PockyResult<()> {
    let etc = new_root.join("etc");
    if !etc.is_dir() {
        std::fs::create_dir_all(&etc)?;
    }
    std::fs::write(etc.join("resolv.conf"), "nameserver 8.8.8.8\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn veth_names_are_derived_from_netns_id() {
        assert_eq!(veth_host(42), "veth0_42");
        assert_eq!(veth_container(42), "veth1_42");
        assert_eq!(netns_name(42), "netns_42");
    }
}
