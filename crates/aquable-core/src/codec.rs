//! Outbound frame encoding.
//!
//! Every frame is built by [`encode_frame`]; the remaining functions are thin
//! parameter tables on top of it. Nothing here performs I/O.

use time::OffsetDateTime;

use aquable_types::{ClockTime, MessageId, RESERVED_BYTE, Weekday};

use crate::commands::*;
use crate::error::{Error, Result};

/// Upper bound on message-id advances while avoiding a reserved checksum.
pub const MAX_ENCODE_ATTEMPTS: usize = 256;

/// Largest parameter list that still fits the one-byte length field.
pub const MAX_PARAMS: usize = u8::MAX as usize - FRAME_OVERHEAD as usize;

/// Encode a command frame.
///
/// Parameter bytes equal to 0x5A are replaced with 0x59. The checksum is the
/// XOR of every byte after `cmd_id`. When it comes out as 0x5A the frame is
/// rebuilt with the next message id, so the id in the returned frame may be
/// later than `msg_id`.
///
/// # Errors
///
/// Returns [`Error::Validation`] when `params` does not fit the length byte.
///
/// ```
/// use aquable_core::codec::encode_frame;
/// use aquable_types::MessageId;
///
/// let frame = encode_frame(0x5A, 0x04, MessageId::INITIAL, &[0x01]).unwrap();
/// assert_eq!(frame, vec![0x5A, 0x01, 0x06, 0x00, 0x01, 0x04, 0x01, 0x02]);
/// ```
pub fn encode_frame(cmd_id: u8, mode: u8, msg_id: MessageId, params: &[u8]) -> Result<Vec<u8>> {
    if params.len() > MAX_PARAMS {
        return Err(Error::validation(format!(
            "frame carries {} parameters, at most {MAX_PARAMS} fit",
            params.len()
        )));
    }

    let mut id = msg_id;
    for _ in 0..MAX_ENCODE_ATTEMPTS {
        let mut frame = Vec::with_capacity(params.len() + 7);
        frame.extend_from_slice(&[
            cmd_id,
            FRAME_VERSION,
            params.len() as u8 + FRAME_OVERHEAD,
            id.hi(),
            id.lo(),
            mode,
        ]);
        frame.extend(
            params
                .iter()
                .map(|&b| if b == RESERVED_BYTE { SANITIZED_BYTE } else { b }),
        );
        let checksum = frame[1..].iter().fold(0u8, |acc, b| acc ^ b);
        if checksum != RESERVED_BYTE {
            frame.push(checksum);
            return Ok(frame);
        }
        id = id.next();
    }

    Err(Error::Internal(format!(
        "no message id after {msg_id} avoids a reserved checksum"
    )))
}

/// Successor of a raw `(hi, lo)` message id.
///
/// # Errors
///
/// Fails when either byte is the reserved value 0x5A.
pub fn next_message_id(hi: u8, lo: u8) -> Result<MessageId> {
    Ok(MessageId::new(hi, lo)?.next())
}

/// Build a weekday mask. `None` and the empty set both select every day.
#[must_use]
pub fn encode_weekdays(days: Option<&[Weekday]>) -> u8 {
    match days {
        None | Some([]) => EVERYDAY_MASK,
        Some(days) => days.iter().fold(0, |mask, day| mask | day.bit()),
    }
}

/// Expand a weekday mask into days, Monday first.
#[must_use]
pub fn decode_weekday_mask(mask: u8) -> Vec<Weekday> {
    Weekday::ALL
        .into_iter()
        .filter(|day| mask & day.bit() != 0)
        .collect()
}

// --- Shared frames ---

/// Status request. Dosers also use it as the handshake frame.
pub fn status_request(id: MessageId) -> Result<Vec<u8>> {
    encode_frame(CMD_STATUS, MODE_STATUS_REQUEST, id, &[0x01])
}

/// Handshake preceding a dose configuration.
pub fn handshake(id: MessageId) -> Result<Vec<u8>> {
    status_request(id)
}

/// Set the device clock.
pub fn set_time(id: MessageId, now: OffsetDateTime) -> Result<Vec<u8>> {
    let year = u8::try_from(now.year() - 2000)
        .map_err(|_| Error::validation(format!("year {} cannot be encoded", now.year())))?;
    let params = [
        year,
        u8::from(now.month()),
        now.weekday().number_from_monday(),
        now.hour(),
        now.minute(),
        now.second(),
    ];
    encode_frame(CMD_STATUS, MODE_SET_TIME, id, &params)
}

// --- Light frames ---

/// Set one channel's manual brightness.
pub fn manual_brightness(id: MessageId, channel: u8, brightness: u8) -> Result<Vec<u8>> {
    encode_frame(CMD_STATUS, MODE_MANUAL_BRIGHTNESS, id, &[channel, brightness])
}

/// Add an auto program with 1 to 4 brightness levels (0-100 each).
pub fn add_auto_setting(
    id: MessageId,
    sunrise: ClockTime,
    sunset: ClockTime,
    brightness: &[u8],
    ramp_minutes: u8,
    weekday_mask: u8,
) -> Result<Vec<u8>> {
    if brightness.is_empty() || brightness.len() > 4 {
        return Err(Error::validation(format!(
            "auto setting takes 1-4 brightness values, got {}",
            brightness.len()
        )));
    }
    if let Some((i, level)) = brightness.iter().enumerate().find(|(_, b)| **b > 100) {
        return Err(Error::validation(format!(
            "brightness value {i} must be 0-100, got {level}"
        )));
    }
    auto_setting_frame(id, sunrise, sunset, brightness, ramp_minutes, weekday_mask)
}

/// Delete the auto program with the given timing.
pub fn delete_auto_setting(
    id: MessageId,
    sunrise: ClockTime,
    sunset: ClockTime,
    ramp_minutes: u8,
    weekday_mask: u8,
) -> Result<Vec<u8>> {
    auto_setting_frame(
        id,
        sunrise,
        sunset,
        &[UNUSED_SLOT; 3],
        ramp_minutes,
        weekday_mask,
    )
}

fn auto_setting_frame(
    id: MessageId,
    sunrise: ClockTime,
    sunset: ClockTime,
    levels: &[u8],
    ramp_minutes: u8,
    weekday_mask: u8,
) -> Result<Vec<u8>> {
    let mut params = vec![
        sunrise.hour(),
        sunrise.minute(),
        sunset.hour(),
        sunset.minute(),
        ramp_minutes,
        weekday_mask,
    ];
    params.extend_from_slice(levels);
    params.resize(6 + AUTO_SETTING_SLOTS, UNUSED_SLOT);
    encode_frame(CMD_CONFIG, MODE_AUTO_SETTING, id, &params)
}

/// Clear every stored auto program.
pub fn reset_auto_settings(id: MessageId) -> Result<Vec<u8>> {
    encode_frame(CMD_STATUS, MODE_AUTO_CONTROL, id, &[AUTO_RESET, 0xFF, 0xFF])
}

/// Switch the light to its auto programs.
pub fn switch_to_auto(id: MessageId) -> Result<Vec<u8>> {
    encode_frame(CMD_STATUS, MODE_AUTO_CONTROL, id, &[AUTO_ENABLE, 0xFF, 0xFF])
}

// --- Doser frames ---

/// Prepare stage; `stage` must be [`PREPARE_STAGE_ONE`] or [`PREPARE_STAGE_TWO`].
pub fn prepare(id: MessageId, stage: u8) -> Result<Vec<u8>> {
    if stage != PREPARE_STAGE_ONE && stage != PREPARE_STAGE_TWO {
        return Err(Error::validation(format!(
            "prepare stage must be 0x04 or 0x05, got {stage:#04x}"
        )));
    }
    encode_frame(CMD_CONFIG, MODE_PREPARE, id, &[stage])
}

/// Select a head (0-based).
pub fn head_select(id: MessageId, head: u8) -> Result<Vec<u8>> {
    check_head(head)?;
    encode_frame(CMD_CONFIG, MODE_HEAD_SELECT, id, &[head, 0, 1])
}

/// Set a head's daily volume in tenths of a millilitre.
///
/// Volumes up to 255 use the single-byte legacy mode; larger volumes switch
/// to the two-byte big-endian mode.
pub fn head_dose(id: MessageId, head: u8, volume_tenths: u16, weekday_mask: u8) -> Result<Vec<u8>> {
    check_head(head)?;
    if weekday_mask > EVERYDAY_MASK {
        return Err(Error::validation(format!(
            "weekday mask {weekday_mask:#04x} has bits above 0x7F"
        )));
    }
    let mut params = vec![head, weekday_mask, 1, 1, 0];
    let mode = match u8::try_from(volume_tenths) {
        Ok(volume) => {
            params.push(volume);
            MODE_HEAD_DOSE
        }
        Err(_) => {
            params.extend_from_slice(&volume_tenths.to_be_bytes());
            MODE_HEAD_DOSE_WIDE
        }
    };
    encode_frame(CMD_CONFIG, mode, id, &params)
}

/// Set a head's dosing time.
pub fn head_schedule(id: MessageId, head: u8, hour: u8, minute: u8) -> Result<Vec<u8>> {
    check_head(head)?;
    let time = ClockTime::new(hour, minute)?;
    encode_frame(
        CMD_CONFIG,
        MODE_HEAD_SCHEDULE,
        id,
        &[head, 0, time.hour(), time.minute(), 0, 0],
    )
}

fn check_head(head: u8) -> Result<()> {
    if head > 3 {
        return Err(Error::validation(format!("head index must be 0-3, got {head}")));
    }
    Ok(())
}
