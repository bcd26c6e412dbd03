//! User-configurable settings and the trait that advances them from a pushbutton.

use crate::status::MessageKind;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};

/// A setting whose variants can be stepped through indefinitely.
///
/// Suits pushbutton user interfaces: each press advances to the next variant, wrapping back
/// to the first once every variant has been visited.
pub trait CycleSetting {
    /// Returns the variant after this one, wrapping past the end.
    fn cycle(self) -> Self
    where
        Self: FromPrimitive + ToPrimitive + Sized,
    {
        let index = self
            .to_u8()
            .expect("setting variants should fit in a u8");
        match <Self as FromPrimitive>::from_u8(index + 1) {
            Some(next) => next,
            None => FromPrimitive::from_u8(0).expect("settings should have at least one variant"),
        }
    }
}

/// Which categories of parsed DIN-input messages the bridge surfaces to the host.
///
/// The presets exist because a hardware button can only step through a list; the underlying
/// parser filter accepts any [`MessageKind`] union.
#[derive(Clone, Copy, Debug, Default, PartialEq, ToPrimitive, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterSelection {
    /// Every category passes.
    #[default]
    Everything,
    /// Channel voice plus real-time, for live playing against a clock.
    Performance,
    /// Channel voice only.
    VoiceOnly,
    /// System Exclusive and system common only, for patch librarian transfers.
    BulkDump,
}

impl CycleSetting for FilterSelection {}

impl FilterSelection {
    /// The parser filter mask this selection stands for.
    pub fn mask(self) -> MessageKind {
        match self {
            Self::Everything => MessageKind::all(),
            Self::Performance => MessageKind::ChannelVoice | MessageKind::RealTime,
            Self::VoiceOnly => MessageKind::ChannelVoice,
            Self::BulkDump => MessageKind::SysEx | MessageKind::SystemCommon,
        }
    }
}
