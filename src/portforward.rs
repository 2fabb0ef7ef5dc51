//! UPnP port forwarding (spec section 6, `enable_port_forwarding`:
//! "Enables UPnP mapping on start, clearing on stop.").
//!
//! The core never links a UPnP/IGD client library; it shells out to
//! `upnpc` (miniupnpc), the same detect-then-invoke pattern
//! `container.rs` uses for the compose engine. Mapping failures are
//! logged and swallowed — a missing router or a LAN without UPnP must
//! never fail `start`/`stop` for the instance itself.
use std::process::Command;

use crate::instance::model::Instance;
use crate::ports::Proto;

/// Adds one mapping per concrete port named by `instance.ports`. Ranges
/// are expanded up to a bound (spec gives no upper size for a port
/// range and a malformed blueprint could otherwise spawn thousands of
/// `upnpc` calls).
const MAX_PORTS_PER_CALL: u32 = 64;

pub fn map_instance_ports(instance: &Instance) {
    if !instance.enable_port_forwarding {
        return;
    }
    for (port, proto) in expand(&instance.ports) {
        run_upnpc(&["-a", "0.0.0.0", &port.to_string(), &port.to_string(), proto_arg(proto)], &instance.name, "add");
    }
}

pub fn unmap_instance_ports(instance: &Instance) {
    if !instance.enable_port_forwarding {
        return;
    }
    for (port, proto) in expand(&instance.ports) {
        run_upnpc(&["-d", &port.to_string(), proto_arg(proto)], &instance.name, "delete");
    }
}

fn expand(ports: &crate::ports::PortSpec) -> Vec<(u16, Proto)> {
    let mut out = Vec::new();
    'segments: for segment in &ports.segments {
        for port in segment.start..=segment.end {
            if segment.tcp {
                out.push((port, Proto::Tcp));
            }
            if segment.udp {
                out.push((port, Proto::Udp));
            }
            if out.len() as u32 >= MAX_PORTS_PER_CALL {
                break 'segments;
            }
        }
    }
    out
}

fn proto_arg(proto: Proto) -> &'static str {
    match proto {
        Proto::Tcp => "TCP",
        Proto::Udp => "UDP",
    }
}

fn run_upnpc(args: &[&str], instance_name: &str, verb: &str) {
    if which::which("upnpc").is_err() {
        tracing::debug!(instance = instance_name, "upnpc not found, skipping port forwarding");
        return;
    }
    match Command::new("upnpc").args(args).output() {
        Ok(output) if output.status.success() => {}
        Ok(output) => tracing::warn!(
            instance = instance_name,
            verb,
            stderr = %String::from_utf8_lossy(&output.stderr),
            "upnpc mapping call failed"
        ),
        Err(e) => tracing::warn!(instance = instance_name, verb, error = %e, "failed to invoke upnpc"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortSpec;

    #[test]
    fn expand_respects_proto_flags() {
        let spec = PortSpec::parse("7777/udp").unwrap();
        let expanded = expand(&spec);
        assert_eq!(expanded, vec![(7777, Proto::Udp)]);
    }

    #[test]
    fn expand_caps_large_ranges() {
        let spec = PortSpec::parse("1:1000").unwrap();
        let expanded = expand(&spec);
        assert_eq!(expanded.len(), MAX_PORTS_PER_CALL as usize);
    }

    #[test]
    fn map_is_a_no_op_when_forwarding_disabled() {
        use crate::instance::model::{LifecycleManager, Runtime};
        let dir = tempfile::tempdir().unwrap();
        let working_dir = dir.path().join("fac-abc");
        let instance = Instance {
            name: "fac-abc".into(),
            blueprint_file: dir.path().join("factorio.bp"),
            runtime: Runtime::Native,
            backups_dir: working_dir.join("backups"),
            install_dir: working_dir.join("install"),
            saves_dir: working_dir.join("saves"),
            temp_dir: working_dir.join("temp"),
            logs_dir: working_dir.join("logs"),
            management_file: working_dir.join("fac-abc.manage.sh"),
            pid_file: working_dir.join("fac-abc.pid"),
            input_socket: None,
            working_dir,
            lifecycle_manager: LifecycleManager::Standalone,
            enable_firewall: false,
            enable_port_forwarding: false,
            auto_update: false,
            tail_lines_default: 50,
            installed_version: String::new(),
            ports: PortSpec::parse("34197/udp").unwrap(),
            startup_success_regex: None,
            stop_command: None,
            save_command: None,
            systemd_service_file: None,
            systemd_socket_file: None,
            firewall_rule_file: None,
            path_symlink: None,
        };
        map_instance_ports(&instance);
    }
}
