//! Port event loop.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::port::{AdminCommand, Port, PortError, PortEvent};
use crate::transport::{LinkDriver, LinkEventRx, TransportError};

/// Wall-clock milliseconds used for deadlines.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl<D: LinkDriver> Port<D> {
    /// Run the port until shutdown.
    ///
    /// Consumes link events from the driver and administrative commands,
    /// and polls the timer queue on a periodic tick. Port events are
    /// forwarded to `events` after every step. Returns when a `Shutdown`
    /// command arrives or the admin channel closes; a closed link channel
    /// shuts the port down and is reported as an error.
    pub async fn run(
        &mut self,
        mut link_rx: LinkEventRx,
        mut admin_rx: mpsc::Receiver<AdminCommand>,
        events: mpsc::Sender<PortEvent>,
    ) -> Result<(), PortError> {
        let mut tick = tokio::time::interval(Duration::from_millis(self.config.timers.tick_ms));

        info!(wwpn = %self.wwpn, "Port event loop started");

        let result = loop {
            tokio::select! {
                event = link_rx.recv() => {
                    match event {
                        Some(event) => self.handle_link_event(event, now_ms()),
                        None => {
                            warn!("Link event channel closed");
                            self.shutdown(now_ms());
                            break Err(PortError::Transport(TransportError::ChannelClosed));
                        }
                    }
                }
                command = admin_rx.recv() => {
                    match command {
                        Some(AdminCommand::Shutdown) | None => {
                            self.shutdown(now_ms());
                            break Ok(());
                        }
                        Some(command) => {
                            if let Err(e) = self.handle_admin(command, now_ms()) {
                                warn!(error = %e, "Admin command failed");
                            }
                        }
                    }
                }
                _ = tick.tick() => {
                    self.poll_timers(now_ms());
                }
            }
            self.forward_events(&events);
        };

        self.forward_events(&events);
        info!("Port event loop stopped");
        result
    }

    fn forward_events(&mut self, events: &mpsc::Sender<PortEvent>) {
        for event in self.take_events() {
            if let Err(e) = events.try_send(event) {
                warn!(error = %e, "Port event dropped");
            }
        }
    }
}
