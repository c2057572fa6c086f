//! Talking to the running keyboard through its debug HID interface.

use anyhow::{bail, Context, Result};
use matrixkb_core::{DEBUG_CMD_BOOTLOADER, DEBUG_CMD_RESET};
use rusb::{Device, DeviceHandle, GlobalContext};
use std::io::Write;
use std::time::Duration;

const USB_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

const CLASS_HID: u8 = 0x03;

/// The debug interface as found in the active configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugInterface {
    pub number: u8,
    pub endpoint: u8,
    pub packet_size: u16,
}

/// The debug interface is the non-boot HID interface with one endpoint.
fn is_debug_interface(class: u8, subclass: u8, protocol: u8, num_endpoints: u8) -> bool {
    class == CLASS_HID && subclass == 0 && protocol == 0 && num_endpoints == 1
}

/// Feature report value asking the firmware to reboot.
fn reboot_command(halfkay: bool) -> u8 {
    if halfkay {
        DEBUG_CMD_BOOTLOADER
    } else {
        DEBUG_CMD_RESET
    }
}

/// Log packets are padded with NUL bytes.
fn strip_padding(buf: &[u8]) -> Vec<u8> {
    buf.iter().copied().filter(|&b| b != 0).collect()
}

pub fn find_device(vid: u16, pid: u16) -> Result<Option<Device<GlobalContext>>> {
    let devices = rusb::devices().context("failed to enumerate USB devices")?;
    for device in devices.iter() {
        let desc = device
            .device_descriptor()
            .context("failed to read device descriptor")?;
        if desc.vendor_id() == vid && desc.product_id() == pid {
            return Ok(Some(device));
        }
    }
    Ok(None)
}

fn require_device(vid: u16, pid: u16) -> Result<Device<GlobalContext>> {
    match find_device(vid, pid)? {
        Some(device) => Ok(device),
        None => bail!("keyboard {:04x}:{:04x} not found", vid, pid),
    }
}

/// Block until a device with the given IDs enumerates.
fn wait_for_device(vid: u16, pid: u16) -> Result<Device<GlobalContext>> {
    let mut first = true;
    let mut polls = 0;
    loop {
        if let Some(device) = find_device(vid, pid)? {
            if !first {
                println!();
            }
            return Ok(device);
        }
        if first {
            print!("Waiting for device...");
            first = false;
        } else if polls % 30 == 0 {
            print!(".");
        }
        let _ = std::io::stdout().flush();
        polls += 1;
        std::thread::sleep(POLL_INTERVAL);
    }
}

pub fn debug_interface(device: &Device<GlobalContext>) -> Result<DebugInterface> {
    let config = device
        .active_config_descriptor()
        .context("failed to read configuration descriptor")?;
    for interface in config.interfaces() {
        let Some(setting) = interface.descriptors().next() else {
            continue;
        };
        if !is_debug_interface(
            setting.class_code(),
            setting.sub_class_code(),
            setting.protocol_code(),
            setting.num_endpoints(),
        ) {
            continue;
        }
        if let Some(endpoint) = setting.endpoint_descriptors().next() {
            return Ok(DebugInterface {
                number: setting.interface_number(),
                endpoint: endpoint.address(),
                packet_size: endpoint.max_packet_size(),
            });
        }
    }
    bail!("no debug interface found");
}

/// Open the device and claim its debug interface, detaching any kernel
/// driver bound to it.
fn claim_debug(
    device: &Device<GlobalContext>,
) -> Result<(DeviceHandle<GlobalContext>, DebugInterface)> {
    let iface = debug_interface(device)?;
    let handle = device
        .open()
        .context("failed to open keyboard (may need root/sudo or udev rules)")?;
    // Not supported on every platform
    let _ = handle.set_auto_detach_kernel_driver(true);
    handle
        .claim_interface(iface.number)
        .with_context(|| format!("failed to claim interface {}", iface.number))?;
    Ok((handle, iface))
}

/// Ask the firmware to reset, optionally into the HalfKay bootloader.
pub fn reboot(vid: u16, pid: u16, halfkay: bool) -> Result<()> {
    let device = require_device(vid, pid)?;
    let (handle, iface) = claim_debug(&device)?;

    // HID SET_REPORT, feature report ID 0
    let value = [reboot_command(halfkay)];
    let result = handle.write_control(
        0x21,
        0x09,
        0x0300,
        iface.number as u16,
        &value,
        USB_TIMEOUT,
    );
    match result {
        // The device may drop off the bus before completing the status stage
        Ok(_) | Err(rusb::Error::NoDevice | rusb::Error::Io | rusb::Error::Pipe) => Ok(()),
        Err(e) => Err(e).context("failed to send reset request"),
    }
}

/// Stream the debug log until interrupted, reconnecting when the
/// keyboard disappears.
pub fn stream_log(vid: u16, pid: u16, raw: bool) -> Result<()> {
    loop {
        let device = wait_for_device(vid, pid)?;
        let (handle, iface) = match claim_debug(&device) {
            Ok(claimed) => claimed,
            Err(e) => {
                println!("-- Error: {:#}", e);
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }
        };

        println!("-- Reading log:");
        let mut buf = vec![0u8; iface.packet_size as usize];
        let mut out = std::io::stdout();
        loop {
            match handle.read_interrupt(iface.endpoint, &mut buf, USB_TIMEOUT) {
                Ok(n) => {
                    if raw {
                        println!("msg: {:02x?}", &buf[..n]);
                    } else {
                        let text = strip_padding(&buf[..n]);
                        out.write_all(String::from_utf8_lossy(&text).as_bytes())?;
                        out.flush()?;
                    }
                }
                Err(rusb::Error::Timeout) => continue,
                Err(rusb::Error::Io) => {
                    // Reported for a while before the disconnect completes
                    println!("-- I/O error");
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(rusb::Error::NoDevice) => {
                    println!("\n-- Device disconnected");
                    break;
                }
                Err(e) => return Err(e).context("failed to read debug endpoint"),
            }
        }
    }
}

fn string_or_index(handle: Option<&DeviceHandle<GlobalContext>>, index: Option<u8>) -> String {
    match (handle, index) {
        (Some(handle), Some(i)) => handle
            .read_string_descriptor_ascii(i)
            .map(|s| format!("{} ({:?})", i, s))
            .unwrap_or_else(|_| i.to_string()),
        (None, Some(i)) => i.to_string(),
        (_, None) => "0".to_string(),
    }
}

/// Print the device, configuration, interface and endpoint descriptors.
pub fn show_descriptors(vid: u16, pid: u16) -> Result<()> {
    let device = require_device(vid, pid)?;
    let handle = device.open().ok();
    let desc = device
        .device_descriptor()
        .context("failed to read device descriptor")?;

    let usb = desc.usb_version();
    let dev = desc.device_version();
    println!("Device Descriptor");
    println!("  bcdUSB: {}.{}.{}", usb.major(), usb.minor(), usb.sub_minor());
    println!("  bDeviceClass: {}", desc.class_code());
    println!("  bDeviceSubClass: {}", desc.sub_class_code());
    println!("  bDeviceProtocol: {}", desc.protocol_code());
    println!("  bMaxPacketSize0: {}", desc.max_packet_size());
    println!("  idVendor: {:#06x}", desc.vendor_id());
    println!("  idProduct: {:#06x}", desc.product_id());
    println!("  bcdDevice: {}.{}.{}", dev.major(), dev.minor(), dev.sub_minor());
    println!(
        "  iManufacturer: {}",
        string_or_index(handle.as_ref(), desc.manufacturer_string_index())
    );
    println!(
        "  iProduct: {}",
        string_or_index(handle.as_ref(), desc.product_string_index())
    );
    println!(
        "  iSerialNumber: {}",
        string_or_index(handle.as_ref(), desc.serial_number_string_index())
    );
    println!("  bNumConfigurations: {}", desc.num_configurations());

    let config = device
        .active_config_descriptor()
        .context("failed to read configuration descriptor")?;
    println!("Config Descriptor");
    println!("  bNumInterfaces: {}", config.num_interfaces());
    println!("  bConfigurationValue: {}", config.number());
    println!(
        "  iConfiguration: {}",
        string_or_index(handle.as_ref(), config.description_string_index())
    );
    println!("  self powered: {}", config.self_powered());
    println!("  remote wakeup: {}", config.remote_wakeup());
    println!("  MaxPower: {} mA", config.max_power());
    println!("  extra: {:02x?}", config.extra());

    for interface in config.interfaces() {
        println!("  Interface {}", interface.number());
        for setting in interface.descriptors() {
            println!("    Setting {}", setting.setting_number());
            println!("      bInterfaceNumber: {}", setting.interface_number());
            println!("      bNumEndpoints: {}", setting.num_endpoints());
            println!("      bInterfaceClass: {}", setting.class_code());
            println!("      bInterfaceSubClass: {}", setting.sub_class_code());
            println!("      bInterfaceProtocol: {}", setting.protocol_code());
            println!(
                "      iInterface: {}",
                string_or_index(handle.as_ref(), setting.description_string_index())
            );
            println!("      extra: {:02x?}", setting.extra());
            for (idx, endpoint) in setting.endpoint_descriptors().enumerate() {
                println!("    Endpoint {}", idx);
                println!("      bEndpointAddress: {:#04x}", endpoint.address());
                println!("      transfer type: {:?}", endpoint.transfer_type());
                println!("      direction: {:?}", endpoint.direction());
                println!("      wMaxPacketSize: {}", endpoint.max_packet_size());
                println!("      bInterval: {}", endpoint.interval());
            }
        }
    }
    Ok(())
}
