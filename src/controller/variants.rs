//! Built-in headless controller variants

use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, trace};

use super::ControllerVariant;
use crate::handle::{GatewayHandle, SendOutcome};
use crate::protocol::{CommandRgbLed, PayloadBody, ProtocolHeader, ProtocolPayload};
use crate::settings::ControllerSettings;
use crate::types::format_address;
use crate::{GatewayError, Result};

/// Destination addressing every robot in the swarm.
const BROADCAST_ADDRESS: u64 = u64::MAX;

/// Colours cycled by [`LedCycleController`].
pub const LED_PALETTE: [CommandRgbLed; 4] = [
    CommandRgbLed { red: 255, green: 0, blue: 0 },
    CommandRgbLed { red: 0, green: 255, blue: 0 },
    CommandRgbLed { red: 0, green: 0, blue: 255 },
    CommandRgbLed { red: 0, green: 0, blue: 0 },
];

/// Tracks the fleet and observers only, sends nothing.
#[derive(Debug, Default)]
pub struct IdleController;

impl IdleController {
    pub const NAME: &'static str = "idle";
}

#[async_trait::async_trait]
impl ControllerVariant for IdleController {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn start(&mut self, _gateway: GatewayHandle) -> Result<()> {
        debug!("Idle controller started");
        Ok(())
    }
}

/// Cycles the LED of the configured robot through [`LED_PALETTE`].
///
/// With the broadcast address configured, every robot currently in the fleet
/// receives the colour.
#[derive(Debug)]
pub struct LedCycleController {
    header: ProtocolHeader,
    period: Duration,
    step: usize,
}

impl LedCycleController {
    pub const NAME: &'static str = "led-cycle";

    pub fn new(settings: &ControllerSettings) -> Self {
        Self { header: settings.header(), period: settings.led_cycle_interval(), step: 0 }
    }

    async fn send_colour(&self, gateway: &GatewayHandle, colour: CommandRgbLed) -> Result<usize> {
        let destinations = if self.header.destination == BROADCAST_ADDRESS {
            gateway
                .snapshot()
                .await?
                .into_iter()
                .filter_map(|device| u64::from_str_radix(&device.address, 16).ok())
                .collect()
        } else {
            vec![self.header.destination]
        };

        let mut written = 0;
        for destination in destinations {
            let payload = ProtocolPayload::new(
                self.header.with_destination(destination),
                PayloadBody::CmdRgbLed(colour),
            );
            match gateway.send(payload).await? {
                SendOutcome::Written => written += 1,
                SendOutcome::Discarded => {
                    trace!(address = %format_address(destination), "Robot not in fleet")
                }
            }
        }
        Ok(written)
    }
}

#[async_trait::async_trait]
impl ControllerVariant for LedCycleController {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn start(&mut self, gateway: GatewayHandle) -> Result<()> {
        info!(
            destination = %format_address(self.header.destination),
            period_ms = self.period.as_millis() as u64,
            "LED cycle started"
        );
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let colour = LED_PALETTE[self.step % LED_PALETTE.len()];
            self.step = self.step.wrapping_add(1);

            match self.send_colour(&gateway, colour).await {
                Ok(written) => trace!(written, ?colour, "LED colour sent"),
                // The run is over, nothing left to drive
                Err(GatewayError::Stopped) => return Ok(()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => debug!("LED colour not sent: {}", e),
            }
        }
    }
}
