//! TCP reachability probe for the discovery fallback
//!
//! A host is probed by attempting a TCP connect on each configured port.
//! Ports are tried concurrently, each bounded by the per-port timeout, and
//! the whole host (connects plus reverse lookup) by the host budget.

use futures_util::future::join_all;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::BTreeSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpSocket;
use tokio::time::{timeout, timeout_at, Instant};

use crate::config::ProbeConfig;
use crate::network::interface;
use crate::source::{SourceKind, SourceRecord};

/// Host octets treated as OBS machines when naming probe results
const OBS_HOST_OCTETS: [u8; 2] = [21, 58];

/// Network scanner bound to one probe configuration
#[derive(Debug, Clone)]
pub struct NetworkProbe {
    config: ProbeConfig,
}

impl NetworkProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Configured override, else the first usable interface address
    pub fn local_address(&self) -> Option<Ipv4Addr> {
        self.config.local_address.or_else(interface::local_address)
    }

    /// Hosts to sweep around `local`
    pub fn candidate_hosts(&self, local: Ipv4Addr) -> Vec<Ipv4Addr> {
        candidate_hosts(local, &self.config.curated_octets, self.config.neighbour_span)
    }

    pub async fn probe_host(&self, host: Ipv4Addr) -> Vec<SourceRecord> {
        probe_host(
            host,
            &self.config.ports,
            self.config.port_timeout(),
            self.config.host_budget(),
        )
        .await
    }
}

/// Curated octets plus the neighbours of `local` within `span`, on the
/// local /24, without the local address itself. Sorted and distinct, and
/// never the network or broadcast address.
pub fn candidate_hosts(local: Ipv4Addr, curated: &[u8], span: u8) -> Vec<Ipv4Addr> {
    let [a, b, c, own] = local.octets();
    let mut octets: BTreeSet<u8> = curated
        .iter()
        .copied()
        .filter(|octet| (1..=254).contains(octet))
        .collect();

    let low = own.saturating_sub(span).max(1);
    let high = own.saturating_add(span).min(254);
    octets.extend(low..=high);
    octets.remove(&own);

    octets
        .into_iter()
        .map(|d| Ipv4Addr::new(a, b, c, d))
        .collect()
}

/// Probe one host and describe every open port as a source.
///
/// Unreachable hosts, refused ports and an exhausted budget all yield an
/// empty list; nothing here is an error.
pub async fn probe_host(
    host: Ipv4Addr,
    ports: &[u16],
    per_port: Duration,
    budget: Duration,
) -> Vec<SourceRecord> {
    let deadline = Instant::now() + budget;

    let attempts = ports.iter().map(|&port| async move {
        let open = port_open(SocketAddr::new(IpAddr::V4(host), port), per_port).await;
        (port, open)
    });

    let open_ports: Vec<u16> = match timeout_at(deadline, join_all(attempts)).await {
        Ok(results) => results
            .into_iter()
            .filter_map(|(port, open)| open.then_some(port))
            .collect(),
        Err(_) => {
            tracing::debug!("Probe of {} ran out of budget", host);
            return Vec::new();
        }
    };

    if open_ports.is_empty() {
        return Vec::new();
    }

    let machine = reverse_lookup(host, deadline).await;
    let now = Instant::now();

    tracing::debug!("{} has open ports {:?}", host, open_ports);

    open_ports
        .into_iter()
        .map(|port| {
            SourceRecord::new(
                source_name(host, port, machine.as_deref()),
                machine.clone().unwrap_or_else(|| host.to_string()),
                format!("{}:{}", host, port),
                SourceKind::from_port(port),
                now,
            )
            .with_description("Found by network probe")
        })
        .collect()
}

/// Display name for a port found open on `host`
pub(crate) fn source_name(host: Ipv4Addr, port: u16, machine: Option<&str>) -> String {
    if OBS_HOST_OCTETS.contains(&host.octets()[3]) {
        return match port {
            5960 => format!("OBS PGM @ {}", host),
            5961 => format!("OBS PREVIEW @ {}", host),
            5962 => format!("OBS AUX 1 @ {}", host),
            5963 => format!("OBS AUX 2 @ {}", host),
            80 => format!("OBS Web @ {}", host),
            8080 => format!("OBS HTTP Stream @ {}", host),
            _ => format!("OBS Output @ {}:{}", host, port),
        };
    }

    match (port, machine) {
        (5960, _) => format!("Program Output @ {}", host),
        (5961, _) => format!("Preview Output @ {}", host),
        (5962, _) => format!("Aux Output 1 @ {}", host),
        (5963, _) => format!("Aux Output 2 @ {}", host),
        (80, _) => format!("Web Service @ {}", host),
        (8080, _) => format!("HTTP Stream @ {}", host),
        (_, Some(machine)) => format!("Source ({}:{})", machine, port),
        (_, None) => format!("Source @ {}:{}", host, port),
    }
}

/// Reverse DNS within what is left of the host budget
async fn reverse_lookup(host: Ipv4Addr, deadline: Instant) -> Option<String> {
    let ip = IpAddr::V4(host);
    let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip));

    match timeout_at(deadline, lookup).await {
        Ok(Ok(Ok(name))) if name != host.to_string() => Some(name),
        Ok(Ok(Ok(_))) => None,
        Ok(Ok(Err(e))) => {
            tracing::trace!("Reverse lookup of {} failed: {}", host, e);
            None
        }
        Ok(Err(e)) => {
            tracing::warn!("Reverse lookup task for {} failed: {}", host, e);
            None
        }
        Err(_) => None,
    }
}

async fn port_open(addr: SocketAddr, per_port: Duration) -> bool {
    let socket = match probe_socket(addr) {
        Ok(socket) => socket,
        Err(e) => {
            tracing::trace!("Could not create probe socket for {}: {}", addr, e);
            return false;
        }
    };

    matches!(timeout(per_port, socket.connect(addr)).await, Ok(Ok(_)))
}

/// Non-blocking TCP socket that resets instead of lingering on close
fn probe_socket(addr: SocketAddr) -> io::Result<TcpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    socket.set_nodelay(true)?;
    socket.set_linger(Some(Duration::ZERO))?;

    let stream: std::net::TcpStream = socket.into();
    Ok(TcpSocket::from_std_stream(stream))
}
