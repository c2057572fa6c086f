//! USB descriptors: a boot keyboard on interface 0 and the debug HID
//! interface on interface 1.

use matrixkb_core::usb::{DescriptorMap, UsbDescriptor};
use matrixkb_core::{PRODUCT_ID, VENDOR_ID};

pub const ENDPOINT0_SIZE: u8 = 32;

pub const KEYBOARD_INTERFACE: u8 = 0;
pub const KEYBOARD_ENDPOINT: u8 = 3;
pub const KEYBOARD_SIZE: u8 = 8;

pub const DEBUG_INTERFACE: u8 = 1;
pub const DEBUG_ENDPOINT: u8 = 4;
pub const DEBUG_SIZE: u8 = 32;

const LANG_ENGLISH_US: u16 = 0x0409;

/// HID report descriptor for a standard boot keyboard.
const KEYBOARD_REPORT_LEN: usize = 61;
static KEYBOARD_REPORT: [u8; KEYBOARD_REPORT_LEN] = [
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x06, // Usage (Keyboard)
    0xA1, 0x01, // Collection (Application)
    // Modifier keys (8 bits)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x08, //   Report Count (8)
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0xE0, //   Usage Minimum (224) - LCtrl
    0x29, 0xE7, //   Usage Maximum (231) - RGui
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    // Reserved byte
    0x95, 0x01, //   Report Count (1)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x03, //   Input (Constant)
    // LEDs (5 bits)
    0x95, 0x05, //   Report Count (5)
    0x75, 0x01, //   Report Size (1)
    0x05, 0x08, //   Usage Page (LEDs)
    0x19, 0x01, //   Usage Minimum (1)
    0x29, 0x05, //   Usage Maximum (5)
    0x91, 0x02, //   Output (Data, Variable, Absolute)
    // LED padding (3 bits)
    0x95, 0x01, //   Report Count (1)
    0x75, 0x03, //   Report Size (3)
    0x91, 0x03, //   Output (Constant)
    // Keycodes (6 bytes)
    0x95, 0x06, //   Report Count (6)
    0x75, 0x08, //   Report Size (8)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x68, //   Logical Maximum (104)
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0x00, //   Usage Minimum (0)
    0x29, 0x68, //   Usage Maximum (104)
    0x81, 0x00, //   Input (Data, Array)
    0xC0, // End Collection
];

/// Vendor-defined report carrying log text (the page and usages
/// `hid_listen` looks for).
const DEBUG_REPORT_LEN: usize = 21;
static DEBUG_REPORT: [u8; DEBUG_REPORT_LEN] = [
    0x06, 0x31, 0xFF, // Usage Page (0xFF31, vendor defined)
    0x09, 0x74, // Usage (0x74)
    0xA1, 0x53, // Collection (0x53)
    0x75, 0x08, //   Report Size (8)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x95, DEBUG_SIZE, // Report Count
    0x09, 0x75, //   Usage (0x75)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    0xC0, // End Collection
];

static DEVICE: [u8; 18] = [
    18,   // bLength
    1,    // bDescriptorType (Device)
    0x00, 0x02, // bcdUSB (2.0)
    0,    // bDeviceClass (defined at interface level)
    0,    // bDeviceSubClass
    0,    // bDeviceProtocol
    ENDPOINT0_SIZE, // bMaxPacketSize0
    VENDOR_ID as u8, (VENDOR_ID >> 8) as u8,
    PRODUCT_ID as u8, (PRODUCT_ID >> 8) as u8,
    0x00, 0x01, // bcdDevice (1.0)
    1,    // iManufacturer
    2,    // iProduct
    3,    // iSerialNumber
    1,    // bNumConfigurations
];

const CONFIG_LEN: usize = 9 + 2 * (9 + 9 + 7);

static CONFIG: [u8; CONFIG_LEN] = [
    // Configuration descriptor
    9,    // bLength
    2,    // bDescriptorType (Configuration)
    CONFIG_LEN as u8, 0, // wTotalLength
    2,    // bNumInterfaces
    1,    // bConfigurationValue
    0,    // iConfiguration
    0x80, // bmAttributes (bus powered)
    20,   // bMaxPower (40mA)
    // Keyboard interface
    9, 4, KEYBOARD_INTERFACE, 0, 1,
    3,    // bInterfaceClass (HID)
    1,    // bInterfaceSubClass (Boot)
    1,    // bInterfaceProtocol (Keyboard)
    0,
    // HID descriptor
    9, 0x21, 0x11, 0x01, 0, 1, 0x22, KEYBOARD_REPORT_LEN as u8, 0,
    // Endpoint descriptor (interrupt IN, 1ms)
    7, 5, 0x80 | KEYBOARD_ENDPOINT, 0x03, KEYBOARD_SIZE, 0, 1,
    // Debug interface
    9, 4, DEBUG_INTERFACE, 0, 1,
    3,    // bInterfaceClass (HID)
    0,    // no subclass
    0,    // no protocol
    0,
    // HID descriptor
    9, 0x21, 0x11, 0x01, 0, 1, 0x22, DEBUG_REPORT_LEN as u8, 0,
    // Endpoint descriptor (interrupt IN, 1ms)
    7, 5, 0x80 | DEBUG_ENDPOINT, 0x03, DEBUG_SIZE, 0, 1,
];

/// Encode an ASCII string as a USB string descriptor.
const fn string_descriptor<const N: usize>(s: &str) -> [u8; N] {
    let bytes = s.as_bytes();
    assert!(N == 2 + 2 * bytes.len());
    let mut out = [0u8; N];
    out[0] = N as u8;
    out[1] = 3;
    let mut i = 0;
    while i < bytes.len() {
        out[2 + 2 * i] = bytes[i];
        i += 1;
    }
    out
}

static LANGUAGES: [u8; 4] = [4, 3, LANG_ENGLISH_US as u8, (LANG_ENGLISH_US >> 8) as u8];
static MANUFACTURER: [u8; 18] = string_descriptor("matrixkb");
static PRODUCT: [u8; 18] = string_descriptor("Keyboard");
static SERIAL: [u8; 18] = string_descriptor("MKB-0001");

static TABLE: [UsbDescriptor; 8] = [
    UsbDescriptor::new(0x0100, 0, &DEVICE),
    UsbDescriptor::new(0x0200, 0, &CONFIG),
    UsbDescriptor::new(0x0300, 0, &LANGUAGES),
    UsbDescriptor::new(0x0301, LANG_ENGLISH_US, &MANUFACTURER),
    UsbDescriptor::new(0x0302, LANG_ENGLISH_US, &PRODUCT),
    UsbDescriptor::new(0x0303, LANG_ENGLISH_US, &SERIAL),
    UsbDescriptor::new(0x2200, KEYBOARD_INTERFACE as u16, &KEYBOARD_REPORT),
    UsbDescriptor::new(0x2200, DEBUG_INTERFACE as u16, &DEBUG_REPORT),
];

pub fn descriptors() -> DescriptorMap {
    DescriptorMap::new(&TABLE)
}
