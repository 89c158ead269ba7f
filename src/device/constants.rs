/**
 * Baud rate the KA3xxxP series ships with; the firmware does not negotiate.
 */
pub const DEFAULT_BAUD: u32 = 9600;

/**
 * How long (milliseconds) to wait for reply bytes before giving up.
 */
pub const READ_TIMEOUT: u64 = 1000;

/**
 * Gap (milliseconds) to leave before every write. The firmware drops
 * commands that arrive back-to-back.
 */
pub const WRITE_GAP: u64 = 10;

/**
 * How often (milliseconds) the GUI polls the device for fresh readback.
 */
pub const POLL_INTERVAL: u64 = 500;

/**
 * USB vendor/product id reported by the supply's USB-serial bridge.
 */
pub const USB_VID: u16 = 0x0416;
pub const USB_PID: u16 = 0x5011;

/**
 * Channels addressable over the wire. Single-channel supplies answer for
 * channel 1 only.
 */
pub const CHANNEL_MIN: u8 = 1;
pub const CHANNEL_MAX: u8 = 2;

/**
 * Documented set-point limits for the KA3005P family.
 */
pub const VOLTAGE_MAX: f64 = 30.0;
pub const CURRENT_MAX: f64 = 5.1;

/**
 * Front panel memory preset slots.
 */
pub const MEMORY_MIN: u8 = 1;
pub const MEMORY_MAX: u8 = 5;

/**
 * Fixed reply lengths. String replies are NUL-terminated, but the firmware
 * is unreliable about it, so known replies are read at a fixed length.
 * The ISET reply carries a sixth junk character (a leftover from a previous
 * reply) that must be read and discarded.
 */
pub const VOLTAGE_REPLY_LEN: usize = 5;
pub const CURRENT_REPLY_LEN: usize = 6;
pub const OUTPUT_PAIR_REPLY_LEN: usize = 11;

/**
 * Upper bound on the `*IDN?` model string, which is the one reply that is
 * genuinely NUL-terminated and has no fixed length.
 */
pub const IDENT_REPLY_MAX: usize = 64;
