use std::fmt;

use crate::device::status::Tracking;

/// A single command in the Korad ASCII protocol.
///
/// The wire encoding is produced by the `Display` implementation and must
/// match the vendor command table byte-for-byte. Set-point values are
/// rendered in the fixed-point layout the firmware expects: voltage as a
/// zero padded `dd.dd`, current as `d.ddd`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// `VSET{ch}:{dd.dd}`
    SetVoltage { channel: u8, volts: f64 },
    /// `ISET{ch}:{d.ddd}`
    SetCurrent { channel: u8, amps: f64 },
    /// `VSET{ch}?`, replies with the programmed voltage
    ReadVoltageSetting(u8),
    /// `ISET{ch}?`, replies with the programmed current
    ReadCurrentSetting(u8),
    /// `VOUT{ch}?\rIOUT{ch}?`, a single exchange replying with both live
    /// output values separated by a linefeed
    ReadOutputPair(u8),
    /// `OUT1` / `OUT0`
    Output(bool),
    /// `LOCK1` / `LOCK0`, locks out the front panel
    Lock(bool),
    /// `BEEP1` / `BEEP0`
    Beep(bool),
    /// `OCP1` / `OCP0`
    OverCurrentProtection(bool),
    /// `OVP1` / `OVP0`
    OverVoltageProtection(bool),
    /// `STATUS?`, replies with one raw status byte
    Status,
    /// `*IDN?`, replies with the model string
    Identify,
    /// `RCL{n}`, recall a front panel memory preset
    RecallMemory(u8),
    /// `SAV{n}`, save the active set-points to a memory preset
    SaveMemory(u8),
    /// `TRACK{n}`, no effect on single-channel supplies
    Track(Tracking),
}

fn digit(on: bool) -> char {
    if on { '1' } else { '0' }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetVoltage { channel, volts } => write!(f, "VSET{}:{:05.2}", channel, volts),
            Command::SetCurrent { channel, amps } => write!(f, "ISET{}:{:05.3}", channel, amps),
            Command::ReadVoltageSetting(channel) => write!(f, "VSET{}?", channel),
            Command::ReadCurrentSetting(channel) => write!(f, "ISET{}?", channel),
            Command::ReadOutputPair(channel) => write!(f, "VOUT{0}?\rIOUT{0}?", channel),
            Command::Output(on) => write!(f, "OUT{}", digit(*on)),
            Command::Lock(on) => write!(f, "LOCK{}", digit(*on)),
            Command::Beep(on) => write!(f, "BEEP{}", digit(*on)),
            Command::OverCurrentProtection(on) => write!(f, "OCP{}", digit(*on)),
            Command::OverVoltageProtection(on) => write!(f, "OVP{}", digit(*on)),
            Command::Status => write!(f, "STATUS?"),
            Command::Identify => write!(f, "*IDN?"),
            Command::RecallMemory(slot) => write!(f, "RCL{}", slot),
            Command::SaveMemory(slot) => write!(f, "SAV{}", slot),
            Command::Track(tracking) => write!(
                f,
                "TRACK{}",
                match tracking {
                    Tracking::Independent => '0',
                    Tracking::Series => '1',
                    Tracking::Parallel => '2',
                }
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_voltage_is_zero_padded_fixed_point() {
        let cmd = Command::SetVoltage { channel: 1, volts: 5.0 };
        assert_eq!(cmd.to_string(), "VSET1:05.00");

        let cmd = Command::SetVoltage { channel: 2, volts: 12.34 };
        assert_eq!(cmd.to_string(), "VSET2:12.34");

        let cmd = Command::SetVoltage { channel: 1, volts: 30.0 };
        assert_eq!(cmd.to_string(), "VSET1:30.00");
    }

    #[test]
    fn set_current_uses_three_decimals() {
        let cmd = Command::SetCurrent { channel: 1, amps: 0.5 };
        assert_eq!(cmd.to_string(), "ISET1:0.500");

        let cmd = Command::SetCurrent { channel: 1, amps: 5.1 };
        assert_eq!(cmd.to_string(), "ISET1:5.100");
    }

    #[test]
    fn toggles_and_queries() {
        assert_eq!(Command::Output(true).to_string(), "OUT1");
        assert_eq!(Command::Output(false).to_string(), "OUT0");
        assert_eq!(Command::Lock(true).to_string(), "LOCK1");
        assert_eq!(Command::OverCurrentProtection(false).to_string(), "OCP0");
        assert_eq!(Command::OverVoltageProtection(true).to_string(), "OVP1");
        assert_eq!(Command::Status.to_string(), "STATUS?");
        assert_eq!(Command::Identify.to_string(), "*IDN?");
        assert_eq!(Command::ReadVoltageSetting(1).to_string(), "VSET1?");
        assert_eq!(Command::ReadCurrentSetting(1).to_string(), "ISET1?");
        assert_eq!(Command::RecallMemory(3).to_string(), "RCL3");
        assert_eq!(Command::SaveMemory(5).to_string(), "SAV5");
        assert_eq!(Command::Track(Tracking::Series).to_string(), "TRACK1");
    }

    #[test]
    fn output_pair_is_a_single_exchange() {
        assert_eq!(Command::ReadOutputPair(1).to_string(), "VOUT1?\rIOUT1?");
    }
}
