//! Dosing pump handle.

use std::time::Duration;

use tracing::info;

use aquable_types::{ClockTime, DeviceStatus, DoserStatus, Weekday};

use crate::codec;
use crate::commands::{PREPARE_STAGE_ONE, PREPARE_STAGE_TWO};
use crate::error::{Error, Result};
use crate::handle::HandleCore;
use crate::util::local_now;

/// Heads on a dosing pump.
pub const HEAD_COUNT: u8 = 4;

/// Daily dose for one head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoseSchedule {
    /// Head number, 1 to 4.
    pub head: u8,
    /// Daily volume in tenths of a millilitre.
    pub volume_tenths_ml: u16,
    pub time: ClockTime,
    /// Dosing days; `None` or empty means every day.
    pub weekdays: Option<Vec<Weekday>>,
}

impl DoseSchedule {
    fn validate(&self) -> Result<()> {
        if !(1..=HEAD_COUNT).contains(&self.head) {
            return Err(Error::validation(format!(
                "head must be 1-{HEAD_COUNT}, got {}",
                self.head
            )));
        }
        Ok(())
    }
}

/// Handle for a dosing pump.
#[derive(Debug)]
pub struct Doser {
    core: HandleCore,
}

impl Doser {
    pub(crate) fn from_core(core: HandleCore) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &HandleCore {
        &self.core
    }

    /// Configure a head's daily dose.
    ///
    /// Sends, in order: handshake, two clock syncs, both prepare stages, head
    /// select, head dose and head schedule. Any failure aborts the remaining
    /// frames. With `confirm`, requests a status afterwards and waits up to
    /// `wait` for it.
    #[tracing::instrument(
        level = "info",
        skip(self, schedule),
        fields(address = %self.core.address(), head = schedule.head, volume = schedule.volume_tenths_ml)
    )]
    pub async fn set_daily_dose(
        &self,
        schedule: &DoseSchedule,
        confirm: bool,
        wait: Duration,
    ) -> Result<Option<DoserStatus>> {
        schedule.validate()?;
        let head = schedule.head - 1;
        let mask = codec::encode_weekdays(schedule.weekdays.as_deref());
        let (hour, minute) = (schedule.time.hour(), schedule.time.minute());

        self.core.send("handshake", codec::handshake).await?;
        self.core
            .send("set_time", |id| codec::set_time(id, local_now()))
            .await?;
        self.core
            .send("set_time", |id| codec::set_time(id, local_now()))
            .await?;
        self.core
            .send("prepare", |id| codec::prepare(id, PREPARE_STAGE_ONE))
            .await?;
        self.core
            .send("prepare", |id| codec::prepare(id, PREPARE_STAGE_TWO))
            .await?;
        self.core
            .send("head_select", |id| codec::head_select(id, head))
            .await?;
        self.core
            .send("head_dose", |id| {
                codec::head_dose(id, head, schedule.volume_tenths_ml, mask)
            })
            .await?;
        self.core
            .send("head_schedule", |id| codec::head_schedule(id, head, hour, minute))
            .await?;
        info!("Dose configuration sent");

        let status = if confirm {
            self.core.refresh_status(wait).await?
        } else {
            self.core.last_status()
        };
        Ok(status.and_then(|s| match s {
            DeviceStatus::Doser(d) => Some(d),
            DeviceStatus::Light(_) => None,
        }))
    }

    /// Latest decoded doser status.
    #[must_use]
    pub fn status(&self) -> Option<DoserStatus> {
        self.core.last_status().and_then(|s| s.as_doser().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use aquable_types::DeviceModel;

    use crate::commands::*;
    use crate::handle::{Device, HandleConfig};
    use crate::mock::MockTransport;

    fn doser(transport: Arc<MockTransport>) -> Device {
        Device::new(
            "DYDOSE0123456789AB",
            DeviceModel::from_code("DYDOSE").unwrap(),
            transport,
            HandleConfig::default().settle_delay(Duration::ZERO),
        )
    }

    fn schedule() -> DoseSchedule {
        DoseSchedule {
            head: 1,
            volume_tenths_ml: 55,
            time: ClockTime::new(10, 30).unwrap(),
            weekdays: Some(vec![Weekday::Monday, Weekday::Wednesday, Weekday::Friday]),
        }
    }

    #[tokio::test]
    async fn test_daily_dose_sequence() {
        let transport = Arc::new(MockTransport::new("AA:00:00:00:00:10"));
        let device = doser(transport.clone());

        device
            .doser()
            .unwrap()
            .set_daily_dose(&schedule(), false, Duration::from_secs(1))
            .await
            .unwrap();

        let frames = transport.frames();
        let modes: Vec<(u8, u8)> = frames.iter().map(|f| (f[0], f[5])).collect();
        assert_eq!(
            modes,
            vec![
                (CMD_STATUS, MODE_STATUS_REQUEST),
                (CMD_STATUS, MODE_SET_TIME),
                (CMD_STATUS, MODE_SET_TIME),
                (CMD_CONFIG, MODE_PREPARE),
                (CMD_CONFIG, MODE_PREPARE),
                (CMD_CONFIG, MODE_HEAD_SELECT),
                (CMD_CONFIG, MODE_HEAD_DOSE),
                (CMD_CONFIG, MODE_HEAD_SCHEDULE),
            ]
        );
        assert_eq!(frames[3][6], PREPARE_STAGE_ONE);
        assert_eq!(frames[4][6], PREPARE_STAGE_TWO);
        assert_eq!(&frames[6][6..12], &[0, 0x54, 1, 1, 0, 55]);
        assert_eq!(&frames[7][6..12], &[0, 0, 10, 30, 0, 0]);

        let mut ids: Vec<(u8, u8)> = frames.iter().map(|f| (f[3], f[4])).collect();
        ids.dedup();
        assert_eq!(ids.len(), 8, "every frame uses its own message id");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_aborts_sequence() {
        let transport = Arc::new(MockTransport::new("AA:00:00:00:00:11"));
        transport.fail_writes_after(4);
        let device = doser(transport.clone());

        let err = device
            .doser()
            .unwrap()
            .set_daily_dose(&schedule(), false, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotReachable);
        assert_eq!(transport.frames().len(), 4);
    }

    #[tokio::test]
    async fn test_invalid_head_sends_nothing() {
        let transport = Arc::new(MockTransport::new("AA:00:00:00:00:12"));
        let device = doser(transport.clone());
        let mut bad = schedule();
        bad.head = 5;

        let err = device
            .doser()
            .unwrap()
            .set_daily_dose(&bad, false, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ValidationError);
        assert!(transport.frames().is_empty());
    }

    #[tokio::test]
    async fn test_confirm_returns_fresh_status() {
        let transport = Arc::new(MockTransport::new("AA:00:00:00:00:13"));
        transport.respond_with(vec![0x5B, 0, 0, 0, 1, 0x1E, 0, 55]);
        let device = doser(transport.clone());

        let status = device
            .doser()
            .unwrap()
            .set_daily_dose(&schedule(), true, Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.lifetime_totals_tenths_ml, vec![55]);
        // Nine frames: the sequence plus the status request.
        assert_eq!(transport.frames().len(), 9);
    }

    #[tokio::test]
    async fn test_wide_volume() {
        let transport = Arc::new(MockTransport::new("AA:00:00:00:00:14"));
        let device = doser(transport.clone());
        let mut big = schedule();
        big.volume_tenths_ml = 1000;
        big.head = 4;

        device
            .doser()
            .unwrap()
            .set_daily_dose(&big, false, Duration::from_secs(1))
            .await
            .unwrap();
        let frames = transport.frames();
        assert_eq!(frames[6][5], MODE_HEAD_DOSE_WIDE);
        assert_eq!(&frames[6][6..13], &[3, 0x54, 1, 1, 0, 0x03, 0xE8]);
    }
}
