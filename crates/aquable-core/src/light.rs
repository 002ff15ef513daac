//! LED light handle.

use std::collections::BTreeMap;

use tracing::info;

use aquable_types::{ClockTime, LightStatus, Weekday};

use crate::codec;
use crate::error::{Error, Result};
use crate::handle::HandleCore;
use crate::util::local_now;

/// Highest manual or auto brightness level.
pub const MAX_BRIGHTNESS: u8 = 100;

/// Manual brightness for a light.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Brightness {
    /// The same level on every channel.
    Uniform(u8),
    /// One level per channel, in ascending channel-id order.
    PerChannel(Vec<u8>),
}

/// Brightness of an auto program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AutoBrightness {
    /// 100 on every channel.
    #[default]
    Full,
    Uniform(u8),
    /// One level per channel, in ascending channel-id order.
    PerChannel(Vec<u8>),
    /// Levels keyed by channel index; unlisted channels get 100.
    ByChannel(BTreeMap<u8, u8>),
}

/// One sunrise/sunset program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoSetting {
    pub sunrise: ClockTime,
    pub sunset: ClockTime,
    pub brightness: AutoBrightness,
    pub ramp_minutes: u8,
    /// Active days; `None` or empty means every day.
    pub weekdays: Option<Vec<Weekday>>,
}

/// Handle for an LED light.
#[derive(Debug)]
pub struct Light {
    core: HandleCore,
}

impl Light {
    pub(crate) fn from_core(core: HandleCore) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &HandleCore {
        &self.core
    }

    /// Distinct channel ids, ascending.
    #[must_use]
    pub fn channel_ids(&self) -> Vec<u8> {
        self.core.model().channel_ids()
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.core.model().channel_count()
    }

    /// Latest decoded light status.
    #[must_use]
    pub fn status(&self) -> Option<LightStatus> {
        self.core.last_status().and_then(|s| s.as_light().cloned())
    }

    /// Set manual brightness.
    #[tracing::instrument(level = "info", skip(self), fields(address = %self.core.address()))]
    pub async fn set_brightness(&self, brightness: &Brightness) -> Result<()> {
        let ids = self.channel_ids();
        let levels: Vec<(u8, u8)> = match brightness {
            Brightness::Uniform(level) => ids.iter().map(|id| (*id, *level)).collect(),
            Brightness::PerChannel(levels) => {
                if levels.len() > ids.len() {
                    return Err(Error::validation(format!(
                        "{} levels given for {} channels",
                        levels.len(),
                        ids.len()
                    )));
                }
                ids.iter().copied().zip(levels.iter().copied()).collect()
            }
        };
        check_levels(levels.iter().map(|(_, level)| *level))?;

        for (channel, level) in levels {
            self.core
                .send("manual_brightness", |id| {
                    codec::manual_brightness(id, channel, level)
                })
                .await?;
        }
        Ok(())
    }

    /// Put `level` on one channel (by index) and switch the others off.
    pub async fn set_channel_brightness(&self, level: u8, channel: usize) -> Result<()> {
        let count = self.channel_count();
        if channel >= count {
            return Err(Error::validation(format!(
                "channel index {channel} out of range, device has {count} channels"
            )));
        }
        let levels = (0..count)
            .map(|i| if i == channel { level } else { 0 })
            .collect();
        self.set_brightness(&Brightness::PerChannel(levels)).await
    }

    pub async fn turn_on(&self) -> Result<()> {
        self.set_brightness(&Brightness::Uniform(MAX_BRIGHTNESS)).await
    }

    pub async fn turn_off(&self) -> Result<()> {
        self.set_brightness(&Brightness::Uniform(0)).await
    }

    /// Manual mode is entered by setting a manual level.
    pub async fn set_manual_mode(&self) -> Result<()> {
        self.set_brightness(&Brightness::Uniform(0)).await
    }

    /// Resolve an auto brightness into one level per channel.
    pub fn auto_levels(&self, brightness: &AutoBrightness) -> Result<Vec<u8>> {
        let count = self.channel_count();
        let levels = match brightness {
            AutoBrightness::Full => vec![MAX_BRIGHTNESS; count],
            AutoBrightness::Uniform(level) => vec![*level; count],
            AutoBrightness::PerChannel(levels) => levels.clone(),
            AutoBrightness::ByChannel(map) => {
                if let Some(index) = map.keys().find(|i| usize::from(**i) >= count) {
                    return Err(Error::validation(format!(
                        "channel index {index} out of range, device has {count} channels"
                    )));
                }
                (0..count)
                    .map(|i| {
                        u8::try_from(i)
                            .ok()
                            .and_then(|i| map.get(&i).copied())
                            .unwrap_or(MAX_BRIGHTNESS)
                    })
                    .collect()
            }
        };
        check_levels(levels.iter().copied())?;
        Ok(levels)
    }

    /// Store an auto program on the device.
    #[tracing::instrument(
        level = "info",
        skip(self, setting),
        fields(address = %self.core.address(), sunrise = %setting.sunrise, sunset = %setting.sunset)
    )]
    pub async fn add_auto_setting(&self, setting: &AutoSetting) -> Result<()> {
        let levels = self.auto_levels(&setting.brightness)?;
        let mask = codec::encode_weekdays(setting.weekdays.as_deref());
        self.core
            .send("add_auto_setting", |id| {
                codec::add_auto_setting(
                    id,
                    setting.sunrise,
                    setting.sunset,
                    &levels,
                    setting.ramp_minutes,
                    mask,
                )
            })
            .await?;
        info!("Auto setting added");
        Ok(())
    }

    /// Remove the auto program with the given timing.
    pub async fn remove_auto_setting(
        &self,
        sunrise: ClockTime,
        sunset: ClockTime,
        ramp_minutes: u8,
        weekdays: Option<&[Weekday]>,
    ) -> Result<()> {
        let mask = codec::encode_weekdays(weekdays);
        self.core
            .send("delete_auto_setting", |id| {
                codec::delete_auto_setting(id, sunrise, sunset, ramp_minutes, mask)
            })
            .await
    }

    /// Clear every auto program.
    pub async fn reset_settings(&self) -> Result<()> {
        self.core
            .send("reset_auto_settings", codec::reset_auto_settings)
            .await
    }

    /// Switch to the stored auto programs and sync the clock they run on.
    pub async fn enable_auto_mode(&self) -> Result<()> {
        self.core.send("switch_to_auto", codec::switch_to_auto).await?;
        self.core
            .send("set_time", |id| codec::set_time(id, local_now()))
            .await
    }
}

fn check_levels(levels: impl IntoIterator<Item = u8>) -> Result<()> {
    match levels.into_iter().find(|level| *level > MAX_BRIGHTNESS) {
        Some(level) => Err(Error::validation(format!(
            "brightness must be 0-{MAX_BRIGHTNESS}, got {level}"
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use aquable_types::DeviceModel;

    use crate::commands::*;
    use crate::handle::{Device, HandleConfig};
    use crate::mock::MockTransport;

    fn light(code: &str, transport: Arc<MockTransport>) -> Device {
        Device::new(
            format!("{code}0123456789AB"),
            DeviceModel::from_code(code).unwrap(),
            transport,
            HandleConfig::default().settle_delay(Duration::ZERO),
        )
    }

    fn manual_params(frames: &[Vec<u8>]) -> Vec<(u8, u8)> {
        frames
            .iter()
            .filter(|f| f[5] == MODE_MANUAL_BRIGHTNESS)
            .map(|f| (f[6], f[7]))
            .collect()
    }

    #[tokio::test]
    async fn test_uniform_brightness_per_channel() {
        let transport = Arc::new(MockTransport::new("AA:00:00:00:01:01"));
        let device = light("DYCOM", transport.clone());
        device.light().unwrap().turn_on().await.unwrap();
        // White and red share channel 0.
        assert_eq!(manual_params(&transport.frames()), vec![(0, 100), (1, 100), (2, 100)]);
    }

    #[tokio::test]
    async fn test_per_channel_brightness() {
        let transport = Arc::new(MockTransport::new("AA:00:00:00:01:02"));
        let device = light("DYWPRO30", transport.clone());
        let light = device.light().unwrap();

        light
            .set_brightness(&Brightness::PerChannel(vec![10, 20]))
            .await
            .unwrap();
        assert_eq!(manual_params(&transport.frames()), vec![(0, 10), (1, 20)]);

        let err = light
            .set_brightness(&Brightness::PerChannel(vec![1, 2, 3, 4, 5]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ValidationError);

        let err = light.set_brightness(&Brightness::Uniform(101)).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ValidationError);
    }

    #[tokio::test]
    async fn test_channel_brightness() {
        let transport = Arc::new(MockTransport::new("AA:00:00:00:01:03"));
        let device = light("DYNWRGB", transport.clone());
        let light = device.light().unwrap();

        light.set_channel_brightness(60, 1).await.unwrap();
        assert_eq!(manual_params(&transport.frames()), vec![(0, 0), (1, 60), (2, 0)]);
        assert!(light.set_channel_brightness(60, 3).await.is_err());
    }

    #[tokio::test]
    async fn test_auto_levels() {
        let transport = Arc::new(MockTransport::new("AA:00:00:00:01:04"));
        let device = light("DYNWRGB", transport);
        let light = device.light().unwrap();

        assert_eq!(light.auto_levels(&AutoBrightness::Full).unwrap(), vec![100, 100, 100]);
        assert_eq!(light.auto_levels(&AutoBrightness::Uniform(80)).unwrap(), vec![80, 80, 80]);
        let map = BTreeMap::from([(1, 40)]);
        assert_eq!(
            light.auto_levels(&AutoBrightness::ByChannel(map)).unwrap(),
            vec![100, 40, 100]
        );
        let map = BTreeMap::from([(5, 40)]);
        assert!(light.auto_levels(&AutoBrightness::ByChannel(map)).is_err());
    }

    #[tokio::test]
    async fn test_add_auto_setting_frame() {
        let transport = Arc::new(MockTransport::new("AA:00:00:00:01:05"));
        let device = light("DYNWRGB", transport.clone());
        let setting = AutoSetting {
            sunrise: ClockTime::new(8, 0).unwrap(),
            sunset: ClockTime::new(20, 0).unwrap(),
            brightness: AutoBrightness::Uniform(80),
            ramp_minutes: 15,
            weekdays: Some(vec![Weekday::Saturday, Weekday::Sunday]),
        };
        device.light().unwrap().add_auto_setting(&setting).await.unwrap();

        let frames = transport.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!((frames[0][0], frames[0][5]), (CMD_CONFIG, MODE_AUTO_SETTING));
        assert_eq!(
            &frames[0][6..19],
            &[8, 0, 20, 0, 15, 0x03, 80, 80, 80, 255, 255, 255, 255]
        );
    }

    #[tokio::test]
    async fn test_mode_switches() {
        let transport = Arc::new(MockTransport::new("AA:00:00:00:01:06"));
        let device = light("DYNA2", transport.clone());
        let light = device.light().unwrap();

        light.enable_auto_mode().await.unwrap();
        light.reset_settings().await.unwrap();
        light
            .remove_auto_setting(
                ClockTime::new(8, 0).unwrap(),
                ClockTime::new(20, 0).unwrap(),
                0,
                None,
            )
            .await
            .unwrap();
        light.set_manual_mode().await.unwrap();

        let frames = transport.frames();
        let summary: Vec<(u8, u8)> = frames.iter().map(|f| (f[5], f[6])).collect();
        assert_eq!(summary[0], (MODE_AUTO_CONTROL, AUTO_ENABLE));
        assert_eq!(summary[1].0, MODE_SET_TIME);
        assert_eq!(summary[2], (MODE_AUTO_CONTROL, AUTO_RESET));
        assert_eq!(summary[3], (MODE_AUTO_SETTING, 8));
        assert_eq!(summary[4], (MODE_MANUAL_BRIGHTNESS, 0));
        assert_eq!(frames[4][7], 0);
    }
}
