//! UDP discovery broadcaster
//!
//! Announces a service over the LAN so desktop clients can find the gateway
//! without knowing its address. The datagram is a plain UTF-8 string of four
//! `||`-separated fields: service name, host label, IP address, TCP port.

use crate::error::{Error, Result};
use crate::registry::Controller;
use parking_lot::Mutex;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Sleep step inside the announce interval so stop() is never waiting out
/// the full interval
const INTERVAL_STEP: Duration = Duration::from_millis(100);

/// Builds the discovery datagram payload.
///
/// The host label is the machine hostname with a `-Server` suffix, matching
/// what the desktop clients display in their connection picker.
pub fn discovery_message(service: &str, host: &str, ip: &str, port: u16) -> String {
    format!("{}||{}-Server||{}||{}", service, host, ip, port)
}

/// Periodically broadcasts one service announcement datagram.
pub struct UdpBroadcaster {
    name: String,
    service: String,
    advertised_port: u16,
    broadcast_port: u16,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl UdpBroadcaster {
    pub fn new(
        service: &str,
        advertised_port: u16,
        broadcast_port: u16,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: format!("discovery-{}", service.to_lowercase()),
            service: service.to_string(),
            advertised_port,
            broadcast_port,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        })
    }

    /// Local IPv4 addresses worth announcing; loopback and link-local
    /// interfaces are filtered out.
    fn usable_addresses() -> Vec<String> {
        match local_ip_address::list_afinet_netifas() {
            Ok(interfaces) => interfaces
                .into_iter()
                .filter_map(|(_, ip)| match ip {
                    std::net::IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_link_local() => {
                        Some(v4.to_string())
                    }
                    _ => None,
                })
                .collect(),
            Err(e) => {
                log::warn!("interface enumeration failed: {}", e);
                Vec::new()
            }
        }
    }

    fn broadcast_loop(&self) {
        let socket = match UdpSocket::bind("0.0.0.0:0") {
            Ok(s) => s,
            Err(e) => {
                log::error!("{}: bind failed: {}", self.name, e);
                return;
            }
        };
        if let Err(e) = socket.set_broadcast(true) {
            log::error!("{}: enabling broadcast failed: {}", self.name, e);
            return;
        }
        let target = format!("255.255.255.255:{}", self.broadcast_port);

        let host = match hostname::get() {
            Ok(h) => h.to_string_lossy().into_owned(),
            Err(e) => {
                log::warn!("{}: hostname lookup failed: {}", self.name, e);
                "setuio".to_string()
            }
        };

        while !self.shutdown.load(Ordering::Relaxed) {
            // Enumerated each round: addresses can change under us (DHCP
            // renewal, interface flap) without a restart.
            for addr in Self::usable_addresses() {
                let message = discovery_message(&self.service, &host, &addr, self.advertised_port);
                log::trace!("{}: announcing \"{}\"", self.name, message);
                if let Err(e) = socket.send_to(message.as_bytes(), &target) {
                    log::warn!("{}: announce failed: {}", self.name, e);
                }
                thread::sleep(INTERVAL_STEP);
            }

            let mut slept = Duration::ZERO;
            while slept < self.interval && !self.shutdown.load(Ordering::Relaxed) {
                thread::sleep(INTERVAL_STEP);
                slept += INTERVAL_STEP;
            }
        }

        log::debug!("{}: broadcast loop terminated", self.name);
    }
}

impl Controller for UdpBroadcaster {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> Result<()> {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return Err(Error::AlreadyStarted(self.name.clone()));
        }

        self.shutdown.store(false, Ordering::Relaxed);

        // The loop only needs the shared fields, so hand the thread its own
        // lightweight copy instead of an Arc back-reference.
        let worker = UdpBroadcaster {
            name: self.name.clone(),
            service: self.service.clone(),
            advertised_port: self.advertised_port,
            broadcast_port: self.broadcast_port,
            interval: self.interval,
            shutdown: Arc::clone(&self.shutdown),
            thread: Mutex::new(None),
        };
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || worker.broadcast_loop())?;
        *thread = Some(handle);

        log::info!(
            "{}: announcing \"{}\" port {} on UDP {} every {:?}",
            self.name,
            self.service,
            self.advertised_port,
            self.broadcast_port,
            self.interval
        );
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Drop for UdpBroadcaster {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_has_four_fields_with_server_suffix() {
        let msg = discovery_message("EZ-B", "bench", "192.168.1.20", 10023);
        assert_eq!(msg, "EZ-B||bench-Server||192.168.1.20||10023");
        assert_eq!(msg.split("||").count(), 4);
    }

    #[test]
    fn stop_without_start_is_harmless() {
        let b = UdpBroadcaster::new("Camera", 10024, 4242, Duration::from_secs(3));
        assert!(b.stop().is_ok());
    }

    #[test]
    fn announcements_reach_a_local_listener() {
        // Needs a routable interface; skip on hosts with only loopback
        if UdpBroadcaster::usable_addresses().is_empty() {
            return;
        }

        let receiver = UdpSocket::bind("0.0.0.0:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let b = UdpBroadcaster::new("EZ-B", 10023, port, Duration::from_millis(200));
        b.start().unwrap();

        let mut buf = [0u8; 512];
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        b.stop().unwrap();

        let msg = std::str::from_utf8(&buf[..len]).unwrap();
        let fields: Vec<&str> = msg.split("||").collect();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[0], "EZ-B");
        assert!(fields[1].ends_with("-Server"));
        assert_eq!(fields[3], "10023");
    }
}
