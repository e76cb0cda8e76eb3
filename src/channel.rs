use crate::constants::{CHANNELS, DEEP_CHANNEL, INFRARED_CHANNEL};
use crate::error::{Error, Result};

/// One of the nine digitized return channels recorded for each shot: seven
/// shallow-water channels arranged around a central channel, one infrared
/// channel, and one deep-water channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Channel {
    /// A shallow-water channel, numbered 0 through 6.
    Shallow(u8),
    /// The infrared channel.
    Infrared,
    /// The deep-water channel.
    Deep,
}

impl Channel {
    /// Returns the channel for a given zero-based index, `0..CHANNELS`.
    ///
    /// # Examples
    ///
    /// ```
    /// use czmil::Channel;
    /// assert_eq!(Channel::from_index(0).unwrap(), Channel::Shallow(0));
    /// assert_eq!(Channel::from_index(7).unwrap(), Channel::Infrared);
    /// assert_eq!(Channel::from_index(8).unwrap(), Channel::Deep);
    /// ```
    pub fn from_index(index: usize) -> Result<Channel> {
        match index {
            i if i < INFRARED_CHANNEL => Ok(Channel::Shallow(i as u8)),
            i if i == INFRARED_CHANNEL => Ok(Channel::Infrared),
            i if i == DEEP_CHANNEL => Ok(Channel::Deep),
            i => Err(Error::Inconsistent(format!(
                "channel index {i} is out of range, expected 0..{CHANNELS}"
            ))),
        }
    }

    /// Returns this channel's zero-based index.
    ///
    /// # Examples
    ///
    /// ```
    /// use czmil::Channel;
    /// assert_eq!(Channel::Deep.as_index(), 8);
    /// ```
    pub fn as_index(self) -> usize {
        match self {
            Channel::Shallow(n) => n as usize,
            Channel::Infrared => INFRARED_CHANNEL,
            Channel::Deep => DEEP_CHANNEL,
        }
    }

    /// An iterator over all nine channels, in file order.
    pub fn all() -> impl Iterator<Item = Channel> {
        (0..CHANNELS).map(|i| Channel::from_index(i).expect("0..CHANNELS is always valid"))
    }

    /// True for the seven shallow-water channels.
    pub fn is_shallow(self) -> bool {
        matches!(self, Channel::Shallow(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_indices() {
        for i in 0..CHANNELS {
            let channel = Channel::from_index(i).unwrap();
            assert_eq!(channel.as_index(), i);
        }
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(Channel::from_index(9).is_err());
    }

    #[test]
    fn all_yields_nine_channels() {
        assert_eq!(Channel::all().count(), CHANNELS);
    }
}
