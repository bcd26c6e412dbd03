//! Wire-level classification of MIDI status bytes.
//!
//! Everything here is pure data and pure functions: given a status byte, which category of
//! message does it introduce and how many bytes (status included) make up that message? The
//! [`parser`][crate::parser] consults these tables on every byte; nothing in this module holds
//! state of its own.

use bitmask_enum::bitmask;

/// Note Off channel voice status (high nibble; low nibble carries the channel).
pub const NOTE_OFF: u8 = 0x80;
/// Note On channel voice status.
pub const NOTE_ON: u8 = 0x90;
/// Polyphonic Key Pressure channel voice status.
pub const POLY_KEY_PRESSURE: u8 = 0xA0;
/// Control Change channel voice status.
pub const CONTROL_CHANGE: u8 = 0xB0;
/// Program Change channel voice status.
pub const PROGRAM_CHANGE: u8 = 0xC0;
/// Channel Pressure channel voice status.
pub const CHANNEL_PRESSURE: u8 = 0xD0;
/// Pitch Bend channel voice status.
pub const PITCH_BEND: u8 = 0xE0;
/// Start of a System Exclusive byte stream.
pub const SYSEX_START: u8 = 0xF0;
/// MIDI Time Code Quarter Frame system common status.
pub const MTC_QUARTER_FRAME: u8 = 0xF1;
/// Song Position Pointer system common status.
pub const SONG_POSITION: u8 = 0xF2;
/// Song Select system common status.
pub const SONG_SELECT: u8 = 0xF3;
/// Tune Request system common status.
pub const TUNE_REQUEST: u8 = 0xF6;
/// End of a System Exclusive byte stream.
pub const SYSEX_END: u8 = 0xF7;
/// Timing Clock, the first of the single-byte real-time statuses (0xF8–0xFF).
pub const TIMING_CLOCK: u8 = 0xF8;

/// Categories of MIDI messages.
///
/// A single parsed message belongs to exactly one category, but the type is a set: the
/// [`parser`][crate::parser]'s message filter is expressed as a union of the categories it
/// lets through.
#[bitmask(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageKind {
    /// Channel voice messages (status 0x80–0xEF).
    ChannelVoice,
    /// System common messages (status 0xF1–0xF6).
    SystemCommon,
    /// Single-byte system real-time messages (status 0xF8–0xFF).
    RealTime,
    /// System Exclusive byte streams, bracketed by 0xF0…0xF7.
    SysEx,
}

/// Returns true when `byte` is a status byte rather than a data byte.
pub const fn is_status(byte: u8) -> bool {
    byte & 0x80 != 0
}

/// Returns true when `byte` is a single-byte system real-time status.
pub const fn is_realtime(byte: u8) -> bool {
    byte >= TIMING_CLOCK
}

/// Classifies a status byte into its [`MessageKind`] category.
///
/// Passing a data byte (< 0x80) is a caller contract violation; every byte ≥ 0x80 is a valid
/// status by definition of the wire format.
pub fn kind_of(status: u8) -> MessageKind {
    debug_assert!(is_status(status));
    match status {
        SYSEX_START | SYSEX_END => MessageKind::SysEx,
        s if is_realtime(s) => MessageKind::RealTime,
        s if s >= 0xF0 => MessageKind::SystemCommon,
        _ => MessageKind::ChannelVoice,
    }
}

/// Expected total length in bytes of the message introduced by `status`.
///
/// Program Change and Channel Pressure carry a single data byte; the remaining channel voice
/// statuses carry two. Real-time statuses and Tune Request are complete on their own. The
/// undefined system common statuses (0xF4, 0xF5) and End-of-Exclusive report a length of 1;
/// the parser consumes them without surfacing a message.
pub fn expected_len(status: u8) -> usize {
    debug_assert!(is_status(status));
    match status & 0xF0 {
        PROGRAM_CHANGE | CHANNEL_PRESSURE => 2,
        0xF0 => match status {
            MTC_QUARTER_FRAME | SONG_SELECT => 2,
            SONG_POSITION => 3,
            _ => 1,
        },
        _ => 3,
    }
}
