//! Decoded status records for dosers and lights.
//!
//! Status records are produced by the decoders in `aquable-core` and are
//! replaced wholesale on every successful decode. Each record keeps the raw
//! notification bytes so that callers can inspect frames the decoder only
//! partially understood.

use bytes::Bytes;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::types::{DeviceKind, MessageId, Weekday};

/// Doser response mode carrying per-head schedule snapshots.
pub const DOSER_MODE_SCHEDULE: u8 = 0xFE;
/// Doser response mode carrying lifetime dosed totals.
pub const DOSER_MODE_TOTALS: u8 = 0x1E;
/// Light response mode carrying the status snapshot.
pub const LIGHT_MODE_STATUS: u8 = 0xFE;
/// Light response mode acknowledging a handshake.
pub const LIGHT_MODE_ACK: u8 = 0x0A;

/// Snapshot of one dosing head.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HeadSnapshot {
    /// Raw head mode byte.
    pub mode: u8,
    pub hour: u8,
    pub minute: u8,
    /// Volume dosed today, in tenths of a millilitre.
    pub dosed_tenths_ml: u16,
    /// Bytes the decoder does not interpret.
    pub extra: [u8; 4],
}

impl HeadSnapshot {
    /// Human-readable label for the head mode.
    #[must_use]
    pub fn mode_label(&self) -> &'static str {
        match self.mode {
            0x00 => "daily",
            0x01 => "24h",
            0x02 => "custom",
            0x03 => "timer",
            0x04 => "disabled",
            _ => "unknown",
        }
    }

    /// Dosed volume in millilitres.
    #[must_use]
    pub fn dosed_ml(&self) -> f32 {
        f32::from(self.dosed_tenths_ml) / 10.0
    }
}

/// Decoded doser status notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DoserStatus {
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub message_id: Option<MessageId>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub response_mode: Option<u8>,
    /// Device-reported weekday (1 = Monday … 7 = Sunday).
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub weekday: Option<u8>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub hour: Option<u8>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub minute: Option<u8>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub heads: Vec<HeadSnapshot>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub tail_targets: Vec<u8>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub tail_flag: Option<u8>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub lifetime_totals_tenths_ml: Vec<u16>,
    #[cfg_attr(feature = "serde", serde(with = "crate::hex::serde_bytes", default))]
    pub raw_payload: Bytes,
}

impl DoserStatus {
    /// A status carrying only the raw notification bytes.
    #[must_use]
    pub fn raw_only(payload: &[u8]) -> Self {
        Self {
            raw_payload: Bytes::copy_from_slice(payload),
            ..Self::default()
        }
    }

    /// Whether nothing beyond the raw payload was decoded.
    #[must_use]
    pub fn is_raw_only(&self) -> bool {
        *self == Self::raw_only(&self.raw_payload)
    }

    /// Lifetime totals converted to millilitres.
    #[must_use]
    pub fn lifetime_totals_ml(&self) -> Vec<f32> {
        self.lifetime_totals_tenths_ml
            .iter()
            .map(|t| f32::from(*t) / 10.0)
            .collect()
    }

    /// Device-reported weekday as a [`Weekday`].
    #[must_use]
    pub fn weekday(&self) -> Option<Weekday> {
        weekday_from_iso(self.weekday?)
    }
}

/// One point of a light's scheduled brightness curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LightKeyframe {
    pub hour: u8,
    pub minute: u8,
    /// Intensity, usually a percentage.
    pub value: u8,
}

impl LightKeyframe {
    /// Minutes since midnight.
    #[must_use]
    pub const fn minutes_of_day(&self) -> u16 {
        self.hour as u16 * 60 + self.minute as u16
    }
}

/// Decoded light status notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LightStatus {
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub message_id: Option<MessageId>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub response_mode: Option<u8>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub weekday: Option<u8>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub hour: Option<u8>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub minute: Option<u8>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub keyframes: Vec<LightKeyframe>,
    /// `(hour, minute)` markers interleaved with the keyframes.
    #[cfg_attr(feature = "serde", serde(default))]
    pub time_markers: Vec<(u8, u8)>,
    #[cfg_attr(feature = "serde", serde(with = "crate::hex::serde_bytes", default))]
    pub tail: Bytes,
    #[cfg_attr(feature = "serde", serde(with = "crate::hex::serde_bytes", default))]
    pub raw_payload: Bytes,
}

impl LightStatus {
    /// A status carrying only the raw notification bytes.
    #[must_use]
    pub fn raw_only(payload: &[u8]) -> Self {
        Self {
            raw_payload: Bytes::copy_from_slice(payload),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_raw_only(&self) -> bool {
        *self == Self::raw_only(&self.raw_payload)
    }

    /// The keyframe in effect at the given minute of the day, if any.
    #[must_use]
    pub fn keyframe_at(&self, minutes_of_day: u16) -> Option<&LightKeyframe> {
        self.keyframes
            .iter()
            .take_while(|k| k.minutes_of_day() <= minutes_of_day)
            .last()
    }
}

/// Status of either device kind.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "lowercase"))]
pub enum DeviceStatus {
    Doser(DoserStatus),
    Light(LightStatus),
}

impl DeviceStatus {
    #[must_use]
    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceStatus::Doser(_) => DeviceKind::Doser,
            DeviceStatus::Light(_) => DeviceKind::Light,
        }
    }

    #[must_use]
    pub fn raw_payload(&self) -> &Bytes {
        match self {
            DeviceStatus::Doser(s) => &s.raw_payload,
            DeviceStatus::Light(s) => &s.raw_payload,
        }
    }

    #[must_use]
    pub fn as_doser(&self) -> Option<&DoserStatus> {
        match self {
            DeviceStatus::Doser(s) => Some(s),
            DeviceStatus::Light(_) => None,
        }
    }

    #[must_use]
    pub fn as_light(&self) -> Option<&LightStatus> {
        match self {
            DeviceStatus::Light(s) => Some(s),
            DeviceStatus::Doser(_) => None,
        }
    }
}

fn weekday_from_iso(n: u8) -> Option<Weekday> {
    Weekday::ALL.into_iter().find(|d| d.iso_number() == n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_mode_labels() {
        let mut head = HeadSnapshot {
            mode: 0,
            hour: 0,
            minute: 0,
            dosed_tenths_ml: 55,
            extra: [0; 4],
        };
        assert_eq!(head.mode_label(), "daily");
        head.mode = 4;
        assert_eq!(head.mode_label(), "disabled");
        head.mode = 9;
        assert_eq!(head.mode_label(), "unknown");
        assert!((head.dosed_ml() - 5.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_raw_only() {
        let status = DoserStatus::raw_only(&[1, 2, 3]);
        assert!(status.is_raw_only());
        assert_eq!(status.raw_payload.as_ref(), &[1, 2, 3]);

        let mut status = LightStatus::raw_only(&[0x5B]);
        assert!(status.is_raw_only());
        status.hour = Some(3);
        assert!(!status.is_raw_only());
    }

    #[test]
    fn test_keyframe_at() {
        let status = LightStatus {
            keyframes: vec![
                LightKeyframe { hour: 8, minute: 0, value: 0 },
                LightKeyframe { hour: 9, minute: 0, value: 80 },
                LightKeyframe { hour: 20, minute: 0, value: 0 },
            ],
            ..LightStatus::default()
        };
        assert!(status.keyframe_at(7 * 60).is_none());
        assert_eq!(status.keyframe_at(12 * 60).map(|k| k.value), Some(80));
    }

    #[test]
    fn test_doser_weekday() {
        let status = DoserStatus {
            weekday: Some(3),
            ..DoserStatus::default()
        };
        assert_eq!(status.weekday(), Some(Weekday::Wednesday));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_device_status_serde() {
        let status = DeviceStatus::Doser(DoserStatus {
            response_mode: Some(DOSER_MODE_TOTALS),
            lifetime_totals_tenths_ml: vec![10, 20],
            raw_payload: Bytes::from_static(&[0x5B, 0x01]),
            ..DoserStatus::default()
        });
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["kind"], "doser");
        assert_eq!(json["raw_payload"], "5b01");

        let back: DeviceStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, status);
    }
}
