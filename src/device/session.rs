use std::io::{self, Read, Write};
use std::thread::sleep;
use std::time::Duration;
use log::{debug, info, warn};
use serialport::{SerialPort, SerialPortType};

use crate::device::command::Command;
use crate::device::constants::{
    CHANNEL_MAX, CHANNEL_MIN, CURRENT_MAX, CURRENT_REPLY_LEN, IDENT_REPLY_MAX, MEMORY_MAX,
    MEMORY_MIN, OUTPUT_PAIR_REPLY_LEN, READ_TIMEOUT, USB_PID, USB_VID, VOLTAGE_MAX,
    VOLTAGE_REPLY_LEN, WRITE_GAP,
};
use crate::device::status::{StatusFlags, StatusSnapshot, Tracking};
use crate::error::DeviceError;

/// Session over a real serial port, as used by the GUI.
pub type SerialSession = Session<Box<dyn SerialPort>>;

/// Synchronous request/response session with a Korad supply.
///
/// Owns the transport exclusively. Every exchange is one write followed by
/// one bounded read; a reply that does not arrive before the timeout fails
/// the operation, retrying is up to the caller. The session keeps the last
/// successfully parsed [`StatusSnapshot`] and marks it stale when a newer
/// poll fails.
pub struct Session<T> {
    transport: Option<T>,
    model: Option<String>,
    last_status: Option<StatusSnapshot>,
    stale: bool,
}

/// Lists serial ports whose USB ids match the Korad USB-serial bridge.
pub fn scan_ports() -> Vec<String> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(err) => {
            warn!("Failed to enumerate serial ports: {}", err);
            return Vec::new();
        },
    };

    ports
        .into_iter()
        .filter(|port| match &port.port_type {
            SerialPortType::UsbPort(usb) => usb.vid == USB_VID && usb.pid == USB_PID,
            _ => false,
        })
        .map(|port| port.port_name)
        .collect()
}

impl SerialSession {
    /// Opens the serial port and verifies the device answers the
    /// identification query.
    pub fn connect(port: &str, baud: u32) -> Result<SerialSession, DeviceError> {
        let transport = serialport::new(port, baud)
            .timeout(Duration::from_millis(READ_TIMEOUT))
            .open()?;

        info!("Serial port {} opened at {} baud", port, baud);

        let mut session = Session::over(transport);
        session.identify()?;
        Ok(session)
    }
}

fn check_channel(channel: u8) -> Result<(), DeviceError> {
    if (CHANNEL_MIN..=CHANNEL_MAX).contains(&channel) {
        return Ok(());
    }

    Err(DeviceError::Range {
        quantity: "channel",
        value: channel as f64,
        max: CHANNEL_MAX as f64,
    })
}

fn parse_number(reply: &str, quantity: &str) -> Result<f64, DeviceError> {
    reply.trim().parse::<f64>().map_err(|_| DeviceError::Protocol {
        reason: format!("unparseable {} readback: {:?}", quantity, reply),
    })
}

impl<T: Read + Write> Session<T> {
    /// Wraps an already-open transport without identifying the device.
    pub fn over(transport: T) -> Session<T> {
        Session {
            transport: Some(transport),
            model: None,
            last_status: None,
            stale: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Model string reported by the device during identification.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// The most recent successfully parsed snapshot, if any.
    pub fn last_status(&self) -> Option<&StatusSnapshot> {
        self.last_status.as_ref()
    }

    /// True when the snapshot survived a failed poll and no longer reflects
    /// the live device state.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    fn transport(&mut self) -> Result<&mut T, DeviceError> {
        self.transport.as_mut().ok_or(DeviceError::NotConnected)
    }

    fn send(&mut self, command: Command) -> Result<(), DeviceError> {
        // the firmware needs a quiet gap before each command, and every
        // command is prefixed with a bare carriage return
        let line = format!("\r{}", command);

        self.transport()?;
        sleep(Duration::from_millis(WRITE_GAP));

        let transport = self.transport()?;
        transport
            .write_all(line.as_bytes())
            .map_err(|source| DeviceError::Disconnected { source })?;
        transport
            .flush()
            .map_err(|source| DeviceError::Disconnected { source })?;

        debug!("sent: {}", command);
        Ok(())
    }

    /// Reads a NUL-terminated reply, stopping early at `fixed_length`.
    /// Strips the stray linefeeds the firmware sometimes wraps replies in.
    fn read_reply(&mut self, fixed_length: usize) -> Result<String, DeviceError> {
        let transport = self.transport()?;
        let mut raw: Vec<u8> = Vec::with_capacity(fixed_length);
        let mut byte = [0u8; 1];

        while raw.len() < fixed_length {
            match transport.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    if byte[0] == 0 {
                        break;
                    }
                    raw.push(byte[0]);
                },
                Err(err) if err.kind() == io::ErrorKind::TimedOut => break,
                Err(source) => return Err(DeviceError::Disconnected { source }),
            }
        }

        if raw.is_empty() {
            return Err(DeviceError::Protocol {
                reason: "reply timed out".to_string(),
            });
        }

        // the protocol is plain ASCII; anything else is line garbage, and
        // later fixed-length slicing relies on one byte per character
        if !raw.is_ascii() {
            return Err(DeviceError::Protocol {
                reason: "reply is not valid ascii".to_string(),
            });
        }

        let reply = String::from_utf8_lossy(&raw);
        debug!("received: {:?}", reply);
        Ok(reply.trim_matches('\n').to_string())
    }

    fn send_receive(&mut self, command: Command, fixed_length: usize) -> Result<String, DeviceError> {
        self.send(command)?;
        self.read_reply(fixed_length)
    }

    /// Sends `*IDN?` and records the model string. An empty or absent reply
    /// means whatever is on the other end is not a supply we can talk to.
    pub fn identify(&mut self) -> Result<String, DeviceError> {
        self.send(Command::Identify)?;

        let model = match self.read_reply(IDENT_REPLY_MAX) {
            Ok(model) => model,
            Err(DeviceError::Protocol { .. }) => return Err(DeviceError::Unresponsive),
            Err(err) => return Err(err),
        };

        info!("Identified device: {}", model);
        self.model = Some(model.clone());
        Ok(model)
    }

    /// Programs the voltage set-point. Values outside the device range are
    /// rejected before anything is written.
    pub fn set_voltage(&mut self, channel: u8, volts: f64) -> Result<(), DeviceError> {
        check_channel(channel)?;
        if !(0.0..=VOLTAGE_MAX).contains(&volts) {
            return Err(DeviceError::Range { quantity: "voltage", value: volts, max: VOLTAGE_MAX });
        }

        self.send(Command::SetVoltage { channel, volts })
    }

    /// Programs the current limit. Values outside the device range are
    /// rejected before anything is written.
    pub fn set_current(&mut self, channel: u8, amps: f64) -> Result<(), DeviceError> {
        check_channel(channel)?;
        if !(0.0..=CURRENT_MAX).contains(&amps) {
            return Err(DeviceError::Range { quantity: "current", value: amps, max: CURRENT_MAX });
        }

        self.send(Command::SetCurrent { channel, amps })
    }

    /// Programs both set-points in one go, voltage first. Both values are
    /// validated before the first write, so an invalid pair changes nothing.
    pub fn set_setpoints(&mut self, channel: u8, volts: f64, amps: f64) -> Result<(), DeviceError> {
        check_channel(channel)?;
        if !(0.0..=VOLTAGE_MAX).contains(&volts) {
            return Err(DeviceError::Range { quantity: "voltage", value: volts, max: VOLTAGE_MAX });
        }
        if !(0.0..=CURRENT_MAX).contains(&amps) {
            return Err(DeviceError::Range { quantity: "current", value: amps, max: CURRENT_MAX });
        }

        self.set_voltage(channel, volts)?;
        self.set_current(channel, amps)
    }

    pub fn set_output(&mut self, on: bool) -> Result<(), DeviceError> {
        self.send(Command::Output(on))
    }

    pub fn set_lock(&mut self, on: bool) -> Result<(), DeviceError> {
        self.send(Command::Lock(on))
    }

    pub fn set_beep(&mut self, on: bool) -> Result<(), DeviceError> {
        self.send(Command::Beep(on))
    }

    pub fn set_ocp(&mut self, on: bool) -> Result<(), DeviceError> {
        self.send(Command::OverCurrentProtection(on))
    }

    pub fn set_ovp(&mut self, on: bool) -> Result<(), DeviceError> {
        self.send(Command::OverVoltageProtection(on))
    }

    pub fn set_tracking(&mut self, tracking: Tracking) -> Result<(), DeviceError> {
        self.send(Command::Track(tracking))
    }

    pub fn recall_memory(&mut self, slot: u8) -> Result<(), DeviceError> {
        check_memory_slot(slot)?;
        self.send(Command::RecallMemory(slot))
    }

    pub fn save_memory(&mut self, slot: u8) -> Result<(), DeviceError> {
        check_memory_slot(slot)?;
        self.send(Command::SaveMemory(slot))
    }

    /// Reads back the programmed (not measured) voltage and current, so the
    /// GUI can seed its inputs from whatever the device already holds.
    pub fn read_setpoints(&mut self, channel: u8) -> Result<(f64, f64), DeviceError> {
        check_channel(channel)?;

        let reply = self.send_receive(Command::ReadVoltageSetting(channel), VOLTAGE_REPLY_LEN)?;
        let volts = parse_number(&reply, "voltage")?;

        // the ISET reply is read one character longer; the trailing junk
        // character would otherwise prepend itself to the next reply
        let reply = self.send_receive(Command::ReadCurrentSetting(channel), CURRENT_REPLY_LEN)?;
        let reply = if reply.len() > VOLTAGE_REPLY_LEN { &reply[..VOLTAGE_REPLY_LEN] } else { &reply[..] };
        let amps = parse_number(reply, "current")?;

        Ok((volts, amps))
    }

    /// Queries the live output values and the status byte, and replaces the
    /// cached snapshot wholesale. On any failure the previous snapshot is
    /// kept and flagged stale.
    pub fn poll_status(&mut self, channel: u8) -> Result<StatusSnapshot, DeviceError> {
        check_channel(channel)?;

        match self.poll_status_exchange(channel) {
            Ok(snapshot) => {
                self.last_status = Some(snapshot);
                self.stale = false;
                Ok(snapshot)
            },
            Err(err) => {
                self.stale = self.last_status.is_some();
                Err(err)
            },
        }
    }

    fn poll_status_exchange(&mut self, channel: u8) -> Result<StatusSnapshot, DeviceError> {
        let pair = self.send_receive(Command::ReadOutputPair(channel), OUTPUT_PAIR_REPLY_LEN)?;
        let (volts, amps) = pair.split_once('\n').ok_or_else(|| DeviceError::Protocol {
            reason: format!("malformed output readback: {:?}", pair),
        })?;
        let voltage = parse_number(volts, "voltage")?;
        let current = parse_number(amps, "current")?;

        self.send(Command::Status)?;
        let raw = self.read_status_byte()?;
        let flags = StatusFlags::decode(raw).ok_or_else(|| DeviceError::Protocol {
            reason: format!("invalid status byte 0x{:02x}", raw),
        })?;

        Ok(StatusSnapshot::from_parts(voltage, current, &flags, channel))
    }

    // the STATUS? reply is a single raw byte, not an ASCII string
    fn read_status_byte(&mut self) -> Result<u8, DeviceError> {
        let transport = self.transport()?;
        let mut byte = [0u8; 1];

        match transport.read(&mut byte) {
            Ok(1) => Ok(byte[0]),
            Ok(_) => Err(DeviceError::Protocol { reason: "reply timed out".to_string() }),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                Err(DeviceError::Protocol { reason: "reply timed out".to_string() })
            },
            Err(source) => Err(DeviceError::Disconnected { source }),
        }
    }

    /// Closes the serial channel and forgets all cached device state.
    /// Safe to call more than once.
    pub fn disconnect(&mut self) {
        if self.transport.take().is_some() {
            info!("Serial connection closed");
        }

        self.model = None;
        self.last_status = None;
        self.stale = false;
    }
}

fn check_memory_slot(slot: u8) -> Result<(), DeviceError> {
    if (MEMORY_MIN..=MEMORY_MAX).contains(&slot) {
        return Ok(());
    }

    Err(DeviceError::Range {
        quantity: "memory slot",
        value: slot as f64,
        max: MEMORY_MAX as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::status::ChannelMode;

    /// Scripted replies, captured writes. Reads past the end of the script
    /// behave like a serial read timeout.
    struct MockPort {
        replies: io::Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl MockPort {
        fn with_replies(replies: &[u8]) -> MockPort {
            MockPort {
                replies: io::Cursor::new(replies.to_vec()),
                written: Vec::new(),
            }
        }

        fn silent() -> MockPort {
            MockPort::with_replies(&[])
        }
    }

    impl Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.replies.read(buf)? {
                0 => Err(io::Error::from(io::ErrorKind::TimedOut)),
                n => Ok(n),
            }
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn written(session: &Session<MockPort>) -> &[u8] {
        &session.transport.as_ref().unwrap().written
    }

    // ch1 CV, independent, output on
    const STATUS_ON_CV: u8 = 0b0100_0001;

    fn status_reply(voltage: f64, current: f64, status: u8) -> Vec<u8> {
        let mut reply = format!("{:05.2}\n{:05.3}", voltage, current).into_bytes();
        reply.push(status);
        reply
    }

    #[test]
    fn set_voltage_writes_the_documented_command() {
        let mut session = Session::over(MockPort::silent());
        session.set_voltage(1, 5.0).unwrap();
        assert_eq!(written(&session), b"\rVSET1:05.00");
    }

    #[test]
    fn set_current_writes_the_documented_command() {
        let mut session = Session::over(MockPort::silent());
        session.set_current(1, 0.5).unwrap();
        assert_eq!(written(&session), b"\rISET1:0.500");
    }

    #[test]
    fn out_of_range_setpoints_write_nothing() {
        let mut session = Session::over(MockPort::silent());

        assert!(matches!(
            session.set_voltage(1, 30.01),
            Err(DeviceError::Range { quantity: "voltage", .. })
        ));
        assert!(matches!(
            session.set_voltage(1, -0.5),
            Err(DeviceError::Range { .. })
        ));
        assert!(matches!(
            session.set_current(1, 5.2),
            Err(DeviceError::Range { quantity: "current", .. })
        ));
        assert!(matches!(
            session.set_voltage(3, 1.0),
            Err(DeviceError::Range { quantity: "channel", .. })
        ));
        assert!(matches!(
            session.set_voltage(1, f64::NAN),
            Err(DeviceError::Range { .. })
        ));

        assert!(written(&session).is_empty());
    }

    #[test]
    fn boundary_setpoints_are_accepted() {
        let mut session = Session::over(MockPort::silent());
        session.set_voltage(1, 0.0).unwrap();
        session.set_voltage(1, 30.0).unwrap();
        session.set_current(1, 5.1).unwrap();
    }

    #[test]
    fn output_toggle_commands() {
        let mut session = Session::over(MockPort::silent());
        session.set_output(true).unwrap();
        session.set_output(false).unwrap();
        assert_eq!(written(&session), b"\rOUT1\rOUT0");
    }

    #[test]
    fn memory_presets_and_tracking() {
        let mut session = Session::over(MockPort::silent());
        session.recall_memory(1).unwrap();
        session.save_memory(5).unwrap();
        session.set_tracking(Tracking::Independent).unwrap();
        assert_eq!(written(&session), b"\rRCL1\rSAV5\rTRACK0");

        assert!(matches!(
            session.recall_memory(0),
            Err(DeviceError::Range { quantity: "memory slot", .. })
        ));
        assert!(matches!(
            session.save_memory(6),
            Err(DeviceError::Range { quantity: "memory slot", .. })
        ));
    }

    #[test]
    fn poll_parses_a_well_formed_reply() {
        let mut session = Session::over(MockPort::with_replies(&status_reply(4.98, 0.5, STATUS_ON_CV)));

        let snapshot = session.poll_status(1).unwrap();
        assert_eq!(snapshot.voltage, 4.98);
        assert_eq!(snapshot.current, 0.5);
        assert!(snapshot.output);
        assert_eq!(snapshot.mode, ChannelMode::ConstantVoltage);
        assert!(!session.is_stale());
        assert_eq!(session.last_status(), Some(&snapshot));
    }

    #[test]
    fn snapshot_round_trips_through_the_wire_format() {
        let expected = StatusSnapshot {
            voltage: 12.34,
            current: 1.25,
            output: true,
            mode: ChannelMode::ConstantVoltage,
            beep: false,
            ocp: false,
            ovp: false,
        };

        let mut session = Session::over(MockPort::with_replies(&status_reply(
            expected.voltage,
            expected.current,
            STATUS_ON_CV,
        )));

        assert_eq!(session.poll_status(1).unwrap(), expected);
    }

    #[test]
    fn poll_timeout_keeps_the_cached_snapshot() {
        let mut session = Session::over(MockPort::with_replies(&status_reply(4.98, 0.5, STATUS_ON_CV)));
        let snapshot = session.poll_status(1).unwrap();

        // the script is exhausted now, further reads time out
        assert!(matches!(
            session.poll_status(1),
            Err(DeviceError::Protocol { .. })
        ));
        assert_eq!(session.last_status(), Some(&snapshot));
        assert!(session.is_stale());
    }

    #[test]
    fn malformed_replies_are_protocol_errors() {
        let mut session = Session::over(MockPort::with_replies(b"garbage-bytes"));
        assert!(matches!(
            session.poll_status(1),
            Err(DeviceError::Protocol { .. })
        ));

        // status byte carrying the undocumented tracking pattern
        let mut session = Session::over(MockPort::with_replies(&status_reply(1.0, 0.1, 0b0000_1000)));
        assert!(matches!(
            session.poll_status(1),
            Err(DeviceError::Protocol { .. })
        ));
    }

    #[test]
    fn identify_records_the_model_string() {
        let mut session = Session::over(MockPort::with_replies(b"KORAD KA3005P V2.0\0"));
        assert_eq!(session.identify().unwrap(), "KORAD KA3005P V2.0");
        assert_eq!(session.model(), Some("KORAD KA3005P V2.0"));
    }

    #[test]
    fn silent_device_is_unresponsive() {
        let mut session = Session::over(MockPort::silent());
        assert!(matches!(session.identify(), Err(DeviceError::Unresponsive)));
    }

    #[test]
    fn read_setpoints_discards_the_junk_character() {
        // "0.501" followed by the firmware's stray sixth character
        let mut session = Session::over(MockPort::with_replies(b"05.000.501M"));
        let (volts, amps) = session.read_setpoints(1).unwrap();
        assert_eq!(volts, 5.0);
        assert_eq!(amps, 0.501);
    }

    #[test]
    fn non_ascii_reply_is_a_protocol_error() {
        // garbled ISET reply with a multibyte character straddling the
        // fixed-length cut-off; must fail cleanly, not panic
        let mut session = Session::over(MockPort::with_replies(b"05.000.50\xc3\xa9"));
        assert!(matches!(
            session.read_setpoints(1),
            Err(DeviceError::Protocol { .. })
        ));
    }

    #[test]
    fn set_setpoints_programs_voltage_then_current() {
        let mut session = Session::over(MockPort::silent());
        session.set_setpoints(1, 5.0, 0.5).unwrap();
        assert_eq!(written(&session), b"\rVSET1:05.00\rISET1:0.500");
    }

    #[test]
    fn set_setpoints_rejects_an_invalid_pair_before_writing() {
        let mut session = Session::over(MockPort::silent());
        assert!(matches!(
            session.set_setpoints(1, 5.0, 9.9),
            Err(DeviceError::Range { quantity: "current", .. })
        ));
        assert!(written(&session).is_empty());
    }

    #[test]
    fn disconnect_is_idempotent_and_clears_state() {
        let mut session = Session::over(MockPort::with_replies(&status_reply(4.98, 0.5, STATUS_ON_CV)));
        session.poll_status(1).unwrap();

        session.disconnect();
        session.disconnect();

        assert!(!session.is_connected());
        assert!(session.last_status().is_none());
        assert!(!session.is_stale());
        assert!(matches!(session.set_output(false), Err(DeviceError::NotConnected)));

        // a fresh session starts with an empty status state
        let session = Session::over(MockPort::silent());
        assert!(session.last_status().is_none());
    }
}
