//! Assembly of a clock and its ports from configuration

use std::sync::Arc;

use tracing::info;

use crate::{
    clock::{Clock, IpcSink},
    config::{Config, PortConfig},
    datastructures::common::ClockIdentity,
    media::MediaPort,
    network::{MacAddress, NetworkError},
    port::{Event, Port, PortError},
    timer::EventScheduler,
};

/// An opened link for one configured port
pub struct Link {
    pub media: Box<dyn MediaPort>,
    pub address: MacAddress,
}

/// Opens the link of a configured port on the platform
pub trait LinkFactory {
    fn open(&mut self, config: &PortConfig) -> Result<Link, NetworkError>;
}

impl<F> LinkFactory for F
where
    F: FnMut(&PortConfig) -> Result<Link, NetworkError>,
{
    fn open(&mut self, config: &PortConfig) -> Result<Link, NetworkError> {
        self(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    #[error("no ports configured")]
    NoPorts,
    #[error("could not open link on {interface}: {source}")]
    Link {
        interface: String,
        source: NetworkError,
    },
    #[error("could not start port {port_number}: {source}")]
    Start { port_number: u16, source: PortError },
}

/// A running time-aware system
pub struct Instance {
    clock: Arc<Clock>,
    ports: Vec<Arc<Port>>,
}

impl Instance {
    /// Open every configured link and build the clock and its ports. Ports
    /// are numbered from 1 in configuration order. Without a configured
    /// identity, the clock identity derives from the first link's address.
    pub fn from_config(
        config: &Config,
        scheduler: Arc<dyn EventScheduler>,
        ipc: Option<Box<dyn IpcSink>>,
        links: &mut dyn LinkFactory,
    ) -> Result<Self, InstanceError> {
        let mut opened = Vec::with_capacity(config.ports.len());
        for port_config in &config.ports {
            let link = links
                .open(port_config)
                .map_err(|source| InstanceError::Link {
                    interface: port_config.interface.clone(),
                    source,
                })?;
            opened.push((port_config, link));
        }

        let fallback = match opened.first() {
            Some((_, link)) => ClockIdentity::from_mac(link.address),
            None => return Err(InstanceError::NoPorts),
        };
        let default_ds = config.default_ds(fallback);
        let clock = Clock::new(default_ds, scheduler, ipc);
        info!(identity = %clock.identity(), ports = opened.len(), "clock created");

        let ports = opened
            .into_iter()
            .zip(1u16..)
            .map(|((port_config, link), port_number)| {
                Port::new(
                    clock.clone(),
                    port_number,
                    link.media,
                    port_config.settings(config),
                )
            })
            .collect();

        Ok(Instance { clock, ports })
    }

    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }

    pub fn ports(&self) -> &[Arc<Port>] {
        &self.ports
    }

    /// Power up every port, which opens the links and starts the timers
    pub fn start(&self) -> Result<(), InstanceError> {
        for port in &self.ports {
            port.handle_event(Event::Powerup)
                .map_err(|source| InstanceError::Start {
                    port_number: port.port_number(),
                    source,
                })?;
        }
        info!("all ports started");
        Ok(())
    }

    pub fn stop(&self) {
        for port in &self.ports {
            port.stop();
        }
    }
}
