//! Wire constants for the UART command protocol.
//!
//! Every outbound frame has the layout
//! `[cmd_id, FRAME_VERSION, len, msg_hi, msg_lo, mode, params..., checksum]`.

/// Command id for status requests, handshakes and light control frames.
pub const CMD_STATUS: u8 = 0x5A;

/// Command id for doser configuration and light auto-setting frames.
pub const CMD_CONFIG: u8 = 0xA5;

/// Second byte of every frame.
pub const FRAME_VERSION: u8 = 0x01;

/// First byte of every notification frame.
pub const NOTIFICATION_PREFIX: u8 = 0x5B;

/// Bytes a frame carries in addition to its parameters, not counting `cmd_id`.
/// Equals the `len` field minus the number of parameters.
pub const FRAME_OVERHEAD: u8 = 5;

/// Replacement for parameter bytes equal to the reserved sentinel.
pub const SANITIZED_BYTE: u8 = 0x59;

// --- Modes under CMD_STATUS ---

/// Status request / handshake. Params: `[0x01]`.
pub const MODE_STATUS_REQUEST: u8 = 0x04;

/// Auto-mode control. Params: `[sub_command, 0xFF, 0xFF]`.
pub const MODE_AUTO_CONTROL: u8 = 0x05;

/// Manual brightness. Params: `[channel, brightness]`.
pub const MODE_MANUAL_BRIGHTNESS: u8 = 0x07;

/// Set device clock. Params: `[year-2000, month, iso_weekday, hour, minute, second]`.
pub const MODE_SET_TIME: u8 = 0x09;

/// Auto-control sub-command clearing all auto settings.
pub const AUTO_RESET: u8 = 5;

/// Auto-control sub-command switching the light to its auto program.
pub const AUTO_ENABLE: u8 = 18;

// --- Modes under CMD_CONFIG ---

/// Prepare stage. Params: `[stage]`.
pub const MODE_PREPARE: u8 = 0x04;

/// Head schedule. Params: `[head, 0, hour, minute, 0, 0]`.
pub const MODE_HEAD_SCHEDULE: u8 = 0x15;

/// Light auto setting. Params: `[sr_h, sr_m, ss_h, ss_m, ramp, weekdays, levels x7]`.
pub const MODE_AUTO_SETTING: u8 = 0x19;

/// Head dose with a single-byte volume.
pub const MODE_HEAD_DOSE: u8 = 0x1B;

/// Head dose with a two-byte big-endian volume.
pub const MODE_HEAD_DOSE_WIDE: u8 = 0x1C;

/// Head select. Params: `[head, 0, 1]`.
pub const MODE_HEAD_SELECT: u8 = 0x20;

/// First prepare stage of a dose configuration.
pub const PREPARE_STAGE_ONE: u8 = 0x04;

/// Second prepare stage of a dose configuration.
pub const PREPARE_STAGE_TWO: u8 = 0x05;

/// Number of brightness slots in an auto-setting frame.
pub const AUTO_SETTING_SLOTS: usize = 7;

/// Padding used for unused brightness slots, and as the delete marker.
pub const UNUSED_SLOT: u8 = 0xFF;

/// Weekday mask selecting every day.
pub const EVERYDAY_MASK: u8 = 0x7F;
