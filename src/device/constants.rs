use uuid::{uuid, Uuid};

/**
 * How long (milliseconds) a single scan for an advertised name may take.
 */
pub const SCAN_TIMEOUT: u64 = 3000;

/**
 * How long (milliseconds) to wait before scanning again after a scan found nothing.
 */
pub const SCAN_RETRY_DELAY: u64 = 2000;

/**
 * Extra time (milliseconds) the scanner grants the transport on top of the scan window
 * before declaring the scan hung.
 */
pub const SCAN_GRACE: u64 = 1000;

/**
 * How often (milliseconds) the transport polls the adapters for peripherals while scanning.
 */
pub const SCAN_POLL_DELAY: u64 = 250;

/**
 * How long (milliseconds) connecting to a peripheral may take.
 */
pub const CONNECT_TIMEOUT: u64 = 10000;

/**
 * How long (milliseconds) enabling notifications may take.
 */
pub const SUBSCRIBE_TIMEOUT: u64 = 5000;

/**
 * How long (milliseconds) to wait before rescanning after a failed or lost connection.
 */
pub const COOLDOWN_DELAY: u64 = 5000;

/**
 * How often (milliseconds) to check that a subscribed peripheral is still connected.
 */
pub const LINK_CHECK_INTERVAL: u64 = 1000;

/**
 * How long (milliseconds) checking if the peripheral is still connected may take.
 */
pub const IS_CONNECTED_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) each best-effort teardown step (unsubscribe, disconnect, stopping the
 * scan) may take.
 */
pub const TEARDOWN_TIMEOUT: u64 = 500;

/**
 * How long (milliseconds) `stop()` waits for the bluetooth thread before detaching it. Must stay
 * above the three teardown steps together.
 */
pub const JOIN_TIMEOUT: u64 = 1750;

/**
 * Resting position of an analog stick axis (the middle of the u16 range).
 */
pub const AXIS_CENTER: u16 = 32768;

/**
 * Button value reported while the button is not held (active-low).
 */
pub const BUTTON_RELEASED: u8 = 1;

/**
 * The GATT service and advertised name of the single-board joystick firmware.
 */
pub const JOYSTICK_DEVICE_NAME: &str = "PicoJoystick-AIO";
pub const JOYSTICK_SERVICE: Uuid = uuid!("f7ac806d-5c15-45de-979c-1b0773062530");
pub const JOYSTICK_CHARACTERISTIC: Uuid = uuid!("b3a16388-795d-4f31-8bc5-f387994090e2");

/**
 * The split firmware: one board reports the Y axis and the button, the other only the X axis.
 * Both advertise the same service as the single-board firmware.
 */
pub const Y_BUTTON_DEVICE_NAME: &str = "PicoYButton";
pub const Y_BUTTON_CHARACTERISTIC: Uuid = uuid!("b3a16388-795d-4f31-8bc5-f387994090e3");
pub const X_AXIS_DEVICE_NAME: &str = "PicoXAxisOnly";
pub const X_AXIS_CHARACTERISTIC: Uuid = uuid!("b3a16388-795d-4f31-8bc5-f387994090e4");
