//! Status notification decoding.
//!
//! The `parse_*` functions turn a notification into a status record and
//! never fail: anything they cannot make sense of comes back as a record
//! holding only the raw bytes. The `decode_*_notification` functions sit in
//! front of them and drop frames that are not status updates at all.
//!
//! Doser status (`0xFE`):
//!
//! ```text
//! 5B ?? ?? id_hi id_lo FE wd hh mm | head x4 (9 bytes each) | targets x4 flag
//! head = mode hh mm extra[4] dosed_hi dosed_lo
//! ```
//!
//! Status bodies usually open with a copy of the header's `wd hh mm`, often
//! after some filler. Both parsers skip past that copy before reading heads
//! or keyframes. The doser copy may lag the header by a minute.
//!
//! Doser lifetime totals (`0x1E`): `5B ?? ?? id_hi id_lo 1E` then big-endian
//! `u16` pairs, one per head.
//!
//! Light status (`0xFE`): a 9-byte header like the doser's, then keyframes
//! `hh mm value` interleaved with time markers `00 02 hh mm`, then a 5-byte
//! tail.

use bytes::{Buf, Bytes};
use tracing::debug;

use aquable_types::status::{
    DOSER_MODE_SCHEDULE, DOSER_MODE_TOTALS, LIGHT_MODE_ACK, LIGHT_MODE_STATUS,
};
use aquable_types::{
    DeviceKind, DeviceStatus, DoserStatus, HeadSnapshot, LightKeyframe, LightStatus, MessageId,
};

use crate::commands::NOTIFICATION_PREFIX;

/// Smallest frame that carries a mode byte.
pub const MIN_NOTIFICATION_LEN: usize = 6;

/// Length of the header preceding the status body.
pub const STATUS_HEADER_LEN: usize = 9;

/// Length of one head chunk in a doser status.
pub const HEAD_CHUNK_LEN: usize = 9;

/// Length of the trailing block after the heads or keyframes.
pub const TAIL_LEN: usize = 5;

/// Heads on a doser.
pub const MAX_HEADS: usize = 4;

const MODE_OFFSET: usize = 5;

/// How far into a doser body the repeated time header is searched for.
const DOSER_RESYNC_WINDOW: usize = 32;

/// Latest offset at which a light body may repeat the time header.
const LIGHT_RESYNC_MAX_OFFSET: usize = 16;

const MINUTES_PER_DAY: u16 = 24 * 60;

struct Header {
    message_id: Option<MessageId>,
    mode: u8,
    time: [u8; 3],
    weekday: Option<u8>,
    hour: Option<u8>,
    minute: Option<u8>,
}

/// Read the fixed header. The time fields are kept only when plausible.
fn parse_header(payload: &[u8]) -> Option<Header> {
    if payload.len() < STATUS_HEADER_LEN || payload[0] != NOTIFICATION_PREFIX {
        return None;
    }
    let (wd, hh, mm) = (payload[6], payload[7], payload[8]);
    let plausible = plausible_time(wd, hh, mm);
    Some(Header {
        message_id: MessageId::new(payload[3], payload[4]).ok(),
        mode: payload[MODE_OFFSET],
        time: [wd, hh, mm],
        weekday: plausible.then_some(wd),
        hour: plausible.then_some(hh),
        minute: plausible.then_some(mm),
    })
}

fn plausible_time(weekday: u8, hour: u8, minute: u8) -> bool {
    weekday <= 7 && hour <= 23 && minute <= 59
}

/// Distance between two times of day in minutes, wrapping at midnight.
fn minutes_apart(a: (u8, u8), b: (u8, u8)) -> u16 {
    let to_minutes = |(h, m): (u8, u8)| (u16::from(h) * 60 + u16::from(m)) % MINUTES_PER_DAY;
    let diff = to_minutes(a).abs_diff(to_minutes(b));
    diff.min(MINUTES_PER_DAY - diff)
}

/// Skip a doser body past its repeated time header, if one shows up within
/// [`DOSER_RESYNC_WINDOW`] bytes and within a minute of `(hour, minute)`.
fn resync_doser_body(body: &[u8], hour: u8, minute: u8) -> &[u8] {
    let found = body
        .windows(3)
        .take(DOSER_RESYNC_WINDOW)
        .position(|t| {
            plausible_time(t[0], t[1], t[2]) && minutes_apart((hour, minute), (t[1], t[2])) <= 1
        });
    match found {
        Some(offset) => &body[offset + 3..],
        None => body,
    }
}

/// Skip a light body past an exact copy of the header time.
fn resync_light_body<'a>(body: &'a [u8], time: &[u8; 3]) -> &'a [u8] {
    match body.windows(3).position(|t| t == time) {
        Some(offset) if offset <= LIGHT_RESYNC_MAX_OFFSET => &body[offset + 3..],
        _ => body,
    }
}

/// Split `body` into its leading part and a trailing tail of [`TAIL_LEN`] bytes.
fn split_tail(body: &[u8]) -> (&[u8], &[u8]) {
    match body.len().checked_sub(TAIL_LEN) {
        Some(split) => body.split_at(split),
        None => (&[], body),
    }
}

/// Parse a doser notification.
pub fn parse_doser_payload(payload: &[u8]) -> DoserStatus {
    if payload.len() < MIN_NOTIFICATION_LEN || payload[0] != NOTIFICATION_PREFIX {
        return DoserStatus::raw_only(payload);
    }

    let raw_payload = Bytes::copy_from_slice(payload);

    if payload[MODE_OFFSET] == DOSER_MODE_TOTALS {
        let lifetime_totals_tenths_ml = payload[MIN_NOTIFICATION_LEN..]
            .chunks_exact(2)
            .take(MAX_HEADS)
            .map(|mut pair| pair.get_u16())
            .collect();
        return DoserStatus {
            message_id: MessageId::new(payload[3], payload[4]).ok(),
            response_mode: Some(DOSER_MODE_TOTALS),
            lifetime_totals_tenths_ml,
            raw_payload,
            ..DoserStatus::default()
        };
    }

    let Some(header) = parse_header(payload) else {
        return DoserStatus::raw_only(payload);
    };

    let mut status = DoserStatus {
        message_id: header.message_id,
        response_mode: Some(header.mode),
        weekday: header.weekday,
        hour: header.hour,
        minute: header.minute,
        raw_payload,
        ..DoserStatus::default()
    };
    if header.mode != DOSER_MODE_SCHEDULE {
        return status;
    }

    let mut body = &payload[STATUS_HEADER_LEN..];
    if let (Some(hour), Some(minute)) = (header.hour, header.minute) {
        body = resync_doser_body(body, hour, minute);
    }
    let (heads, tail) = split_tail(body);
    status.heads = heads
        .chunks_exact(HEAD_CHUNK_LEN)
        .take(MAX_HEADS)
        .map(|mut chunk| {
            let mode = chunk.get_u8();
            let hour = chunk.get_u8();
            let minute = chunk.get_u8();
            let mut extra = [0u8; 4];
            chunk.copy_to_slice(&mut extra);
            HeadSnapshot {
                mode,
                hour,
                minute,
                extra,
                dosed_tenths_ml: chunk.get_u16(),
            }
        })
        .collect();
    if tail.len() == TAIL_LEN {
        status.tail_targets = tail[..4].to_vec();
        status.tail_flag = Some(tail[4]);
    }
    status
}

/// Parse a light notification.
pub fn parse_light_payload(payload: &[u8]) -> LightStatus {
    let Some(header) = parse_header(payload) else {
        return LightStatus::raw_only(payload);
    };

    let (body, tail) = split_tail(&payload[STATUS_HEADER_LEN..]);
    let mut status = LightStatus {
        message_id: header.message_id,
        response_mode: Some(header.mode),
        weekday: header.weekday,
        hour: header.hour,
        minute: header.minute,
        tail: Bytes::copy_from_slice(tail),
        raw_payload: Bytes::copy_from_slice(payload),
        ..LightStatus::default()
    };

    let mut rest = resync_light_body(body, &header.time);
    let mut last_minutes: Option<u16> = None;
    loop {
        match rest {
            [0x00, 0x02, hour, minute, more @ ..] => {
                status.time_markers.push((*hour, *minute));
                rest = more;
            }
            [0, 0, 0, more @ ..] => rest = more,
            [hour, minute, value, more @ ..] => {
                let keyframe = LightKeyframe {
                    hour: *hour,
                    minute: *minute,
                    value: *value,
                };
                let minutes = keyframe.minutes_of_day();
                if last_minutes.is_some_and(|last| minutes < last) {
                    break;
                }
                last_minutes = Some(minutes);
                status.keyframes.push(keyframe);
                rest = more;
            }
            _ => break,
        }
    }
    status
}

fn gate(kind: DeviceKind, data: &[u8]) -> Option<u8> {
    if data.len() < MIN_NOTIFICATION_LEN || data[0] != NOTIFICATION_PREFIX {
        debug!(%kind, len = data.len(), "Discarding notification without status prefix");
        return None;
    }
    Some(data[MODE_OFFSET])
}

/// Decode a doser notification, or `None` if it is not a status update.
pub fn decode_doser_notification(data: &[u8]) -> Option<DoserStatus> {
    match gate(DeviceKind::Doser, data)? {
        DOSER_MODE_SCHEDULE | DOSER_MODE_TOTALS => Some(parse_doser_payload(data)),
        mode => {
            debug!(mode = format_args!("{mode:#04x}"), "Ignoring doser notification");
            None
        }
    }
}

/// Decode a light notification, or `None` if it is not a status update.
pub fn decode_light_notification(data: &[u8]) -> Option<LightStatus> {
    match gate(DeviceKind::Light, data)? {
        LIGHT_MODE_STATUS => Some(parse_light_payload(data)),
        LIGHT_MODE_ACK => {
            debug!("Light acknowledged handshake");
            None
        }
        mode => {
            debug!(mode = format_args!("{mode:#04x}"), "Ignoring light notification");
            None
        }
    }
}

/// Decode a notification for a device of the given kind.
pub fn decode_notification(kind: DeviceKind, data: &[u8]) -> Option<DeviceStatus> {
    match kind {
        DeviceKind::Doser => decode_doser_notification(data).map(DeviceStatus::Doser),
        DeviceKind::Light => decode_light_notification(data).map(DeviceStatus::Light),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn doser_frame() -> Vec<u8> {
        let mut frame = vec![0x5B, 0x01, 0x30, 0x00, 0x07, 0xFE, 3, 10, 30];
        frame.extend_from_slice(&[3, 10, 30]);
        // Head 1: daily at 10:30, 5.5 mL dosed.
        frame.extend_from_slice(&[0, 10, 30, 1, 2, 3, 4, 0x00, 55]);
        // Head 2: 24h, 300.0 mL dosed.
        frame.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0x0B, 0xB8]);
        frame.extend_from_slice(&[10, 20, 30, 40, 1]);
        frame
    }

    #[test]
    fn test_doser_schedule_frame() {
        let status = parse_doser_payload(&doser_frame());
        assert_eq!(status.message_id, Some(MessageId::new(0, 7).unwrap()));
        assert_eq!(status.response_mode, Some(0xFE));
        assert_eq!((status.weekday, status.hour, status.minute), (Some(3), Some(10), Some(30)));
        assert_eq!(status.heads.len(), 2);
        assert_eq!(status.heads[0].dosed_tenths_ml, 55);
        assert_eq!(status.heads[0].extra, [1, 2, 3, 4]);
        assert_eq!(status.heads[0].mode_label(), "daily");
        assert_eq!(status.heads[1].dosed_tenths_ml, 3000);
        assert_eq!(status.tail_targets, vec![10, 20, 30, 40]);
        assert_eq!(status.tail_flag, Some(1));
        assert!(status.lifetime_totals_tenths_ml.is_empty());
    }

    #[test]
    fn test_doser_resync_tolerates_one_minute_lag() {
        // Header says 12:56, the body repeats 12:55 after twelve filler bytes.
        let mut frame = vec![0x5B, 0x18, 0x30, 0x00, 0x01, 0xFE, 0x04, 0x0C, 0x38];
        frame.extend_from_slice(&[0x00; 12]);
        frame.extend_from_slice(&[0x04, 0x0C, 0x37]);
        frame.extend_from_slice(&[0x00, 0x0C, 0x37, 0x11, 0x22, 0x33, 0x44, 0x01, 0x2C]);
        frame.extend_from_slice(&[0x10, 0x20, 0x30, 0x40, 0x55]);

        let status = parse_doser_payload(&frame);
        assert_eq!((status.weekday, status.hour, status.minute), (Some(4), Some(12), Some(56)));
        assert_eq!(status.heads.len(), 1);
        let head = &status.heads[0];
        assert_eq!((head.mode, head.hour, head.minute), (0, 12, 55));
        assert_eq!(head.extra, [0x11, 0x22, 0x33, 0x44]);
        assert_eq!(head.dosed_tenths_ml, 300);
        assert_eq!(status.tail_targets, vec![0x10, 0x20, 0x30, 0x40]);
        assert_eq!(status.tail_flag, Some(0x55));
    }

    #[test]
    fn test_doser_resync_ignores_distant_times() {
        // 12:58 is two minutes off, so the body is read as-is.
        let mut frame = vec![0x5B, 0x18, 0x30, 0x00, 0x01, 0xFE, 0x04, 0x0C, 0x38];
        frame.extend_from_slice(&[0x00, 0x0C, 0x3A, 0, 0, 0, 0, 0x00, 0x0A]);
        frame.extend_from_slice(&[0; 5]);
        let status = parse_doser_payload(&frame);
        assert_eq!(status.heads.len(), 1);
        assert_eq!(status.heads[0].minute, 0x3A);
        assert_eq!(status.heads[0].dosed_tenths_ml, 10);
    }

    #[test]
    fn test_minutes_apart_wraps_midnight() {
        assert_eq!(minutes_apart((23, 59), (0, 0)), 1);
        assert_eq!(minutes_apart((12, 55), (12, 56)), 1);
        assert_eq!(minutes_apart((6, 0), (18, 0)), 720);
    }

    #[test]
    fn test_doser_heads_capped_at_four() {
        let mut frame = vec![0x5B, 0x01, 0x30, 0x00, 0x07, 0xFE, 3, 10, 30];
        for i in 0..5u8 {
            frame.extend_from_slice(&[0, i, 0, 0, 0, 0, 0, 0, i]);
        }
        frame.extend_from_slice(&[0; 5]);
        let status = parse_doser_payload(&frame);
        assert_eq!(status.heads.len(), 4);
        assert_eq!(status.heads[3].hour, 3);
    }

    #[test]
    fn test_doser_implausible_time_is_dropped() {
        let mut frame = doser_frame();
        frame[7] = 40;
        let status = parse_doser_payload(&frame);
        assert_eq!(status.hour, None);
        assert_eq!(status.weekday, None);
        assert_eq!(status.heads.len(), 2);
    }

    #[test]
    fn test_doser_totals_frame() {
        let frame = [0x5B, 0x01, 0x0E, 0x00, 0x08, 0x1E, 0x00, 0x64, 0x01, 0x00, 0x00, 0x00, 0xFF, 0xFF];
        let status = parse_doser_payload(&frame);
        assert_eq!(status.response_mode, Some(0x1E));
        assert_eq!(status.lifetime_totals_tenths_ml, vec![100, 256, 0, 65535]);
        assert!(status.heads.is_empty());
        assert_eq!(status.hour, None);
        assert_eq!(status.lifetime_totals_ml()[0], 10.0);
    }

    #[test]
    fn test_doser_malformed_is_raw_only() {
        for frame in [&[][..], &[0x5B, 1, 2][..], &[0x00; 20][..], &[0x5B, 1, 2, 3, 4, 0xFE, 1][..]] {
            let status = parse_doser_payload(frame);
            assert!(status.is_raw_only(), "{frame:?}");
            assert_eq!(status.raw_payload.as_ref(), frame);
        }
    }

    #[test]
    fn test_doser_gate() {
        assert!(decode_doser_notification(&doser_frame()).is_some());
        assert!(decode_doser_notification(&[0x5B, 0, 0, 0, 1, 0x0A, 0, 0, 0]).is_none());
        assert!(decode_doser_notification(&[0x5A, 0, 0, 0, 1, 0xFE]).is_none());
        assert!(decode_doser_notification(&[0x5B, 0, 0]).is_none());
        // Short status frame still yields a record.
        let status = decode_doser_notification(&[0x5B, 0, 0, 0, 1, 0xFE, 1]).unwrap();
        assert!(status.is_raw_only());
    }

    fn light_frame(body: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x5B, 0x01, 0x20, 0x00, 0x09, 0xFE, 6, 12, 15];
        frame.extend_from_slice(body);
        frame.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE]);
        frame
    }

    #[test]
    fn test_light_keyframes_and_markers() {
        let frame = light_frame(&[
            8, 0, 0, // 08:00 -> 0
            0, 2, 12, 15, // marker 12:15
            9, 0, 80, // 09:00 -> 80
            0, 0, 0, // padding
            20, 0, 0, // 20:00 -> 0
        ]);
        let status = parse_light_payload(&frame);
        assert_eq!(status.response_mode, Some(0xFE));
        assert_eq!((status.weekday, status.hour, status.minute), (Some(6), Some(12), Some(15)));
        assert_eq!(status.time_markers, vec![(12, 15)]);
        let values: Vec<_> = status.keyframes.iter().map(|k| (k.hour, k.value)).collect();
        assert_eq!(values, vec![(8, 0), (9, 80), (20, 0)]);
        assert_eq!(status.tail.as_ref(), &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE]);
    }

    #[test]
    fn test_light_resync_on_repeated_header() {
        let frame = aquable_types::hex::decode(
            "5b18300001fe031502000000000000150000000000030315020d00000d1e41\
             141e4115000012274100000000000000000000",
        )
        .unwrap();
        let status = parse_light_payload(&frame);
        assert_eq!(status.message_id, Some(MessageId::new(0, 1).unwrap()));
        assert_eq!(status.weekday, Some(3));
        let keyframes: Vec<_> = status.keyframes.iter().map(|k| (k.hour, k.minute, k.value)).collect();
        assert_eq!(keyframes, vec![(13, 0, 0), (13, 30, 65), (20, 30, 65), (21, 0, 0)]);
        assert!(status.time_markers.is_empty());
        assert_eq!(status.tail.as_ref(), &[0; 5]);
    }

    #[test]
    fn test_light_padding_only() {
        let frame = aquable_types::hex::decode("5b18300001fe0301020000000000000000000000000000").unwrap();
        let status = parse_light_payload(&frame);
        assert!(status.keyframes.is_empty());
        assert_eq!(status.tail.len(), TAIL_LEN);
    }

    #[test]
    fn test_light_scan_stops_on_out_of_order() {
        let frame = light_frame(&[9, 0, 50, 10, 0, 60, 7, 0, 10, 11, 0, 20]);
        let status = parse_light_payload(&frame);
        assert_eq!(status.keyframes.len(), 2);
        assert_eq!(status.keyframes[1].hour, 10);
    }

    #[test]
    fn test_light_trailing_partial_group_ignored() {
        let frame = light_frame(&[9, 0, 50, 10, 0]);
        let status = parse_light_payload(&frame);
        assert_eq!(status.keyframes.len(), 1);
    }

    #[test]
    fn test_light_gate() {
        assert!(decode_light_notification(&light_frame(&[])).is_some());
        assert!(decode_light_notification(&[0x5B, 0, 0, 0, 1, 0x0A, 0, 0, 0]).is_none());
        assert!(decode_light_notification(&[0x5B, 0, 0, 0, 1, 0x11, 0, 0, 0]).is_none());
        let status = decode_light_notification(&[0x5B, 0, 0, 0, 1, 0xFE, 1]).unwrap();
        assert!(status.is_raw_only());
    }

    #[test]
    fn test_decode_notification_by_kind() {
        let status = decode_notification(DeviceKind::Doser, &doser_frame()).unwrap();
        assert_eq!(status.kind(), DeviceKind::Doser);
        let status = decode_notification(DeviceKind::Light, &light_frame(&[])).unwrap();
        assert_eq!(status.kind(), DeviceKind::Light);
    }

    proptest! {
        #[test]
        fn prop_doser_never_panics(data in proptest::collection::vec(any::<u8>(), 0..80)) {
            let status = parse_doser_payload(&data);
            prop_assert_eq!(status.raw_payload.as_ref(), &data[..]);
            prop_assert!(status.heads.len() <= MAX_HEADS);
            prop_assert!(status.lifetime_totals_tenths_ml.len() <= MAX_HEADS);
        }

        #[test]
        fn prop_doser_without_prefix_is_raw_only(mut data in proptest::collection::vec(any::<u8>(), 0..80)) {
            if let Some(first) = data.first_mut() {
                if *first == NOTIFICATION_PREFIX {
                    *first = 0;
                }
            }
            prop_assert!(parse_doser_payload(&data).is_raw_only());
        }

        #[test]
        fn prop_light_never_panics(data in proptest::collection::vec(any::<u8>(), 0..80)) {
            let status = parse_light_payload(&data);
            prop_assert_eq!(status.raw_payload.as_ref(), &data[..]);
            for pair in status.keyframes.windows(2) {
                prop_assert!(pair[0].minutes_of_day() <= pair[1].minutes_of_day());
            }
        }
    }
}
