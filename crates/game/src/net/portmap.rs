//! Best-effort UPnP port forwarding for the hosting peer.

use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::Duration;

use igd_next::{PortMappingProtocol, SearchOptions};
use log::{info, warn};

const MAPPING_DESCRIPTION: &str = "tandem lockstep host";
const DISCOVERY_TIMEOUT: Duration = Duration::from_millis(1500);
/// Lease in seconds; zero asks the gateway for a permanent mapping.
const LEASE_SECS: u32 = 0;

#[derive(Debug, thiserror::Error)]
pub enum PortMapError {
    #[error("no gateway found: {0}")]
    Search(#[from] igd_next::SearchError),
    #[error("gateway refused mapping: {0}")]
    Add(#[from] igd_next::AddPortError),
    #[error("gateway refused removal: {0}")]
    Remove(#[from] igd_next::RemovePortError),
    #[error("could not determine LAN address: {0}")]
    LocalAddress(#[from] io::Error),
}

pub trait PortMapper: Send {
    /// Forwards external UDP `port` to this machine.
    fn add_mapping(&mut self, port: u16) -> Result<(), PortMapError>;

    fn remove_mapping(&mut self, port: u16) -> Result<(), PortMapError>;
}

/// Talks to the LAN's internet gateway device.
pub struct IgdPortMapper {
    gateway: igd_next::Gateway,
    lan_ip: IpAddr,
}

impl IgdPortMapper {
    pub fn discover(timeout: Duration) -> Result<Self, PortMapError> {
        let gateway = igd_next::search_gateway(SearchOptions {
            timeout: Some(timeout),
            ..Default::default()
        })?;

        // The route toward the gateway tells us which interface it sees us on.
        let route = UdpSocket::bind("0.0.0.0:0")?;
        route.connect(gateway.addr)?;
        let lan_ip = route.local_addr()?.ip();

        Ok(Self { gateway, lan_ip })
    }
}

impl PortMapper for IgdPortMapper {
    fn add_mapping(&mut self, port: u16) -> Result<(), PortMapError> {
        self.gateway.add_port(
            PortMappingProtocol::UDP,
            port,
            SocketAddr::new(self.lan_ip, port),
            LEASE_SECS,
            MAPPING_DESCRIPTION,
        )?;
        Ok(())
    }

    fn remove_mapping(&mut self, port: u16) -> Result<(), PortMapError> {
        self.gateway.remove_port(PortMappingProtocol::UDP, port)?;
        Ok(())
    }
}

/// An active forwarding that is withdrawn when dropped.
pub struct PortMapping {
    mapper: Box<dyn PortMapper>,
    port: u16,
}

impl PortMapping {
    pub fn establish(mut mapper: Box<dyn PortMapper>, port: u16) -> Result<Self, PortMapError> {
        mapper.add_mapping(port)?;
        Ok(Self { mapper, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortMapping {
    fn drop(&mut self) {
        match self.mapper.remove_mapping(self.port) {
            Ok(()) => info!("removed port mapping for UDP {}", self.port),
            Err(e) => warn!("could not remove port mapping for UDP {}: {e}", self.port),
        }
    }
}

impl std::fmt::Debug for PortMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortMapping").field("port", &self.port).finish()
    }
}

/// Tries to forward `port` through the gateway. Failure only costs
/// reachability from outside the LAN, so it is logged and swallowed.
pub fn try_map_port(port: u16) -> Option<PortMapping> {
    let mapped = IgdPortMapper::discover(DISCOVERY_TIMEOUT)
        .and_then(|mapper| PortMapping::establish(Box::new(mapper), port));

    match mapped {
        Ok(mapping) => {
            info!("UPnP port mapping active for UDP {port}");
            Some(mapping)
        }
        Err(e) => {
            warn!("UPnP mapping failed ({e}); forward UDP {port} by hand if peers cannot connect");
            None
        }
    }
}
