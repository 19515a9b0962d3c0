//! Battery state readings from UPower.

use anyhow::{Context, Result};
use std::time::Duration;
use upower_dbus::UPowerProxy;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

const DISPLAY_DEVICE_PATH: &str = "/org/freedesktop/UPower/devices/DisplayDevice";

/// One live reading of the hardware battery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryReading {
    pub plugged: bool,
    pub percent: f64,
}

pub struct BatteryReader {
    upower: UPowerProxy<'static>,
    display_device: zbus::Proxy<'static>,
}

impl BatteryReader {
    pub async fn new(connection: &zbus::Connection) -> Result<BatteryReader> {
        let upower = UPowerProxy::new(connection)
            .await
            .context("couldn't create UPower proxy")?;
        let display_device = zbus::Proxy::new(
            connection,
            "org.freedesktop.UPower",
            DISPLAY_DEVICE_PATH,
            "org.freedesktop.UPower.Device",
        )
        .await
        .context("couldn't create UPower display device proxy")?;
        Ok(BatteryReader {
            upower,
            display_device,
        })
    }

    /// Read the current battery state. An error here latches the battery as
    /// absent in the caller, so it's only returned when UPower genuinely
    /// can't answer.
    pub async fn read(&self) -> Result<BatteryReading> {
        let reading = tokio::time::timeout(READ_TIMEOUT, self.read_inner())
            .await
            .context("UPower query timed out")??;
        Ok(reading)
    }

    async fn read_inner(&self) -> Result<BatteryReading> {
        let on_battery = self.upower.on_battery().await?;
        let percent: f64 = self.display_device.get_property("Percentage").await?;
        Ok(BatteryReading {
            plugged: !on_battery,
            percent: (percent * 10.0).round() / 10.0,
        })
    }
}
