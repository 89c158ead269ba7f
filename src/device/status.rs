use std::fmt;

/// Regulation mode of a channel, reported by the `STATUS?` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    ConstantCurrent,
    ConstantVoltage,
}

impl ChannelMode {
    fn from_bit(bit: bool) -> ChannelMode {
        if bit { ChannelMode::ConstantVoltage } else { ChannelMode::ConstantCurrent }
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            ChannelMode::ConstantCurrent => "CC",
            ChannelMode::ConstantVoltage => "CV",
        };

        write!(f, "{}", result)
    }
}

/// Tracking mode of a multi-channel supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tracking {
    Independent,
    Series,
    Parallel,
}

impl Tracking {
    /// Decodes bits 2-3 of the status byte. The firmware documents the
    /// values 0, 1 and 3; the pattern 2 is never emitted by a healthy
    /// device.
    fn from_bits(bits: u8) -> Option<Tracking> {
        match bits {
            0 => Some(Tracking::Independent),
            1 => Some(Tracking::Series),
            3 => Some(Tracking::Parallel),
            _ => None,
        }
    }
}

/// Decoded `STATUS?` byte.
///
/// Layout, least significant bit first:
/// bit 0-1 channel 1/2 mode (0=CC, 1=CV), bit 2-3 tracking, bit 4 beep,
/// bit 5 OCP, bit 6 output, bit 7 OVP.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusFlags {
    pub raw: u8,
    pub channel1: ChannelMode,
    pub channel2: ChannelMode,
    pub tracking: Tracking,
    pub beep: bool,
    pub ocp: bool,
    pub output: bool,
    pub ovp: bool,
}

impl StatusFlags {
    /// Returns `None` when the byte carries the undocumented tracking
    /// pattern, which means the reply got corrupted.
    pub fn decode(raw: u8) -> Option<StatusFlags> {
        Some(StatusFlags {
            raw,
            channel1: ChannelMode::from_bit(raw & 1 != 0),
            channel2: ChannelMode::from_bit(raw >> 1 & 1 != 0),
            tracking: Tracking::from_bits(raw >> 2 & 3)?,
            beep: raw >> 4 & 1 != 0,
            ocp: raw >> 5 & 1 != 0,
            output: raw >> 6 & 1 != 0,
            ovp: raw >> 7 & 1 != 0,
        })
    }
}

/// One complete, consistent readback of the live output state.
///
/// Captured wholesale by a successful poll and never patched piecemeal;
/// a failed poll leaves the previous snapshot in place and marks it stale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusSnapshot {
    /// Measured output voltage (volts)
    pub voltage: f64,
    /// Measured output current (amperes)
    pub current: f64,
    /// Whether the output stage is switched on
    pub output: bool,
    /// Active regulation mode of the polled channel
    pub mode: ChannelMode,
    pub beep: bool,
    pub ocp: bool,
    pub ovp: bool,
}

impl StatusSnapshot {
    pub fn from_parts(voltage: f64, current: f64, flags: &StatusFlags, channel: u8) -> StatusSnapshot {
        StatusSnapshot {
            voltage,
            current,
            output: flags.output,
            mode: if channel == 2 { flags.channel2 } else { flags.channel1 },
            beep: flags.beep,
            ocp: flags.ocp,
            ovp: flags.ovp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_output_on_constant_voltage() {
        // ch1 CV, independent, output on
        let flags = StatusFlags::decode(0b0100_0001).unwrap();
        assert_eq!(flags.channel1, ChannelMode::ConstantVoltage);
        assert_eq!(flags.channel2, ChannelMode::ConstantCurrent);
        assert_eq!(flags.tracking, Tracking::Independent);
        assert!(flags.output);
        assert!(!flags.beep);
        assert!(!flags.ocp);
        assert!(!flags.ovp);
    }

    #[test]
    fn decodes_protection_and_tracking_bits() {
        // ch1 CC, series tracking, beep, OCP, OVP, output off
        let flags = StatusFlags::decode(0b1011_0100).unwrap();
        assert_eq!(flags.channel1, ChannelMode::ConstantCurrent);
        assert_eq!(flags.tracking, Tracking::Series);
        assert!(flags.beep);
        assert!(flags.ocp);
        assert!(flags.ovp);
        assert!(!flags.output);

        let flags = StatusFlags::decode(0b0000_1100).unwrap();
        assert_eq!(flags.tracking, Tracking::Parallel);
    }

    #[test]
    fn rejects_undocumented_tracking_pattern() {
        assert!(StatusFlags::decode(0b0000_1000).is_none());
    }

    #[test]
    fn snapshot_takes_mode_from_the_polled_channel() {
        // ch1 CV, ch2 CC
        let flags = StatusFlags::decode(0b0100_0001).unwrap();
        let snapshot = StatusSnapshot::from_parts(4.98, 0.5, &flags, 1);
        assert_eq!(snapshot.mode, ChannelMode::ConstantVoltage);
        assert!(snapshot.output);

        let snapshot = StatusSnapshot::from_parts(4.98, 0.5, &flags, 2);
        assert_eq!(snapshot.mode, ChannelMode::ConstantCurrent);
    }
}
