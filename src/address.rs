//! Resolution of the interface Consul binds to and the IP it advertises.

use std::net::{IpAddr, SocketAddrV4, SocketAddrV6};

use log::{debug, info};
use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;

use crate::error::{Error, Result};
use crate::types::BindInfo;

/// One network interface and the addresses assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetInterface {
    pub name: String,
    pub up: bool,
    pub loopback: bool,
    pub addrs: Vec<IpAddr>,
}

impl NetInterface {
    /// The address Consul's `GetInterfaceIP` would pick: the first IPv4
    /// address, else the first IPv6 address that is not link-local.
    pub fn preferred_addr(&self) -> Option<IpAddr> {
        self.addrs
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| {
                self.addrs.iter().find(|ip| match ip {
                    IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) != 0xfe80,
                    IpAddr::V4(_) => false,
                })
            })
            .copied()
    }
}

/// Source of the host's interface table.
pub trait InterfaceSource {
    fn interfaces(&self) -> Result<Vec<NetInterface>>;
}

/// Reads interfaces from the kernel with `getifaddrs(3)`.
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn interfaces(&self) -> Result<Vec<NetInterface>> {
        let addrs = getifaddrs().map_err(|e| Error::Io {
            context: "failed to enumerate network interfaces",
            source: e.into(),
        })?;

        // getifaddrs yields one entry per (interface, address); fold them
        // back together while keeping the kernel's interface order.
        let mut interfaces: Vec<NetInterface> = Vec::new();
        for entry in addrs {
            let ip = entry.address.as_ref().and_then(|addr| {
                if let Some(sin) = addr.as_sockaddr_in() {
                    Some(IpAddr::V4(*SocketAddrV4::from(*sin).ip()))
                } else {
                    addr.as_sockaddr_in6()
                        .map(|sin6| IpAddr::V6(*SocketAddrV6::from(*sin6).ip()))
                }
            });

            let idx = match interfaces.iter().position(|i| i.name == entry.interface_name) {
                Some(idx) => idx,
                None => {
                    interfaces.push(NetInterface {
                        name: entry.interface_name.clone(),
                        up: entry.flags.contains(InterfaceFlags::IFF_UP),
                        loopback: entry.flags.contains(InterfaceFlags::IFF_LOOPBACK),
                        addrs: Vec::new(),
                    });
                    interfaces.len() - 1
                }
            };
            if let Some(ip) = ip {
                interfaces[idx].addrs.push(ip);
            }
        }
        Ok(interfaces)
    }
}

/// Determines the bind interface and advertise IP.
///
/// With an explicit interface name only that interface is considered and a
/// missing or unaddressed interface is fatal.  Otherwise the first
/// interface that is up, not loopback and addressed wins.
pub fn resolve_bind(source: &dyn InterfaceSource, explicit: Option<&str>) -> Result<BindInfo> {
    let interfaces = source.interfaces()?;
    debug!("Found {} network interfaces", interfaces.len());

    match explicit {
        Some(name) => {
            let iface = interfaces
                .iter()
                .find(|i| i.name == name)
                .ok_or_else(|| Error::Interface {
                    name: name.to_string(),
                    reason: "no such interface".into(),
                })?;
            let advertise_ip = iface.preferred_addr().ok_or_else(|| Error::Interface {
                name: name.to_string(),
                reason: "no address assigned".into(),
            })?;
            info!("Using configured interface {} with address {}", name, advertise_ip);
            Ok(BindInfo {
                interface: name.to_string(),
                advertise_ip,
            })
        }
        None => {
            let (iface, advertise_ip) = interfaces
                .iter()
                .filter(|i| i.up && !i.loopback)
                .find_map(|i| i.preferred_addr().map(|ip| (i, ip)))
                .ok_or(Error::NoInterface)?;
            info!(
                "Bind to interface {} with address {}",
                iface.name, advertise_ip
            );
            Ok(BindInfo {
                interface: iface.name.clone(),
                advertise_ip,
            })
        }
    }
}
