use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use matrixkb_core::{HALFKAY_PRODUCT_ID, HALFKAY_VENDOR_ID};
use rusb::{DeviceHandle, GlobalContext};
use std::time::{Duration, Instant};

/// ATmega32U4 flash page size in bytes.
const PAGE_SIZE: usize = 128;

/// Application flash of the ATmega32U4; the top 512 bytes hold HalfKay.
const FLASH_SIZE: usize = 32768 - 512;

/// USB control transfer timeout.
const USB_TIMEOUT: Duration = Duration::from_secs(2);

/// Delay after each page write to allow flash programming.
const PAGE_WRITE_DELAY: Duration = Duration::from_millis(5);

/// Block address that makes HalfKay leave the bootloader.
const REBOOT_ADDRESS: u16 = 0xFFFF;

/// One 128-byte HalfKay write: little-endian address followed by the page.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Block {
    address: u16,
    data: [u8; PAGE_SIZE],
}

impl Block {
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + PAGE_SIZE);
        buf.extend_from_slice(&self.address.to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }
}

/// Split an image into the blocks HalfKay must receive.
///
/// Block 0 is always written so the reset vector is replaced even when
/// the image does not start at address 0. Other blank (all 0xFF) blocks
/// are skipped.
fn plan_blocks(base_address: u32, data: &[u8]) -> Result<Vec<Block>> {
    let end_address = base_address as usize + data.len();
    if end_address > FLASH_SIZE {
        bail!(
            "firmware too large: {} bytes at offset 0x{:04X} exceeds {} byte flash",
            data.len(),
            base_address,
            FLASH_SIZE
        );
    }

    let mut image = vec![0xFFu8; end_address];
    image[base_address as usize..].copy_from_slice(data);

    let blocks = image
        .chunks(PAGE_SIZE)
        .enumerate()
        .filter(|(idx, chunk)| *idx == 0 || chunk.iter().any(|&b| b != 0xFF))
        .map(|(idx, chunk)| {
            // Remaining bytes stay 0xFF if chunk is shorter than PAGE_SIZE
            let mut page = [0xFFu8; PAGE_SIZE];
            page[..chunk.len()].copy_from_slice(chunk);
            Block {
                address: (idx * PAGE_SIZE) as u16,
                data: page,
            }
        })
        .collect();
    Ok(blocks)
}

/// Detect whether a Teensy in HalfKay bootloader mode is connected.
pub fn detect() -> Result<bool> {
    let devices = rusb::devices().context("failed to enumerate USB devices")?;
    for device in devices.iter() {
        let desc = device
            .device_descriptor()
            .context("failed to read device descriptor")?;
        if desc.vendor_id() == HALFKAY_VENDOR_ID && desc.product_id() == HALFKAY_PRODUCT_ID {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Poll until the bootloader enumerates or `timeout` elapses.
pub fn wait_for_bootloader(timeout: Duration) -> Result<bool> {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if detect()? {
            return Ok(true);
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    Ok(false)
}

/// Open the Teensy HalfKay bootloader device.
fn open_device() -> Result<DeviceHandle<GlobalContext>> {
    rusb::open_device_with_vid_pid(HALFKAY_VENDOR_ID, HALFKAY_PRODUCT_ID).context(
        "Teensy bootloader not found or not accessible (may need root/sudo or udev rules)",
    )
}

/// Flash firmware data to the Teensy via HalfKay protocol.
///
/// `base_address` is the starting address of the firmware image.
pub fn flash(base_address: u32, data: &[u8]) -> Result<()> {
    let blocks = plan_blocks(base_address, data)?;
    let handle = open_device()?;

    let pb = ProgressBar::new(blocks.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} blocks")
            .context("invalid progress template")?
            .progress_chars("=> "),
    );
    pb.set_message("Flashing");

    for block in &blocks {
        write_block(&handle, &block.to_bytes())
            .with_context(|| format!("failed to write block at address 0x{:04X}", block.address))?;
        std::thread::sleep(PAGE_WRITE_DELAY);
        pb.inc(1);
    }

    pb.finish_with_message("Flashed");

    reboot(&handle);
    println!("Teensy rebooted. Firmware should be running.");

    Ok(())
}

/// Write a single block via HalfKay USB control transfer.
fn write_block(handle: &DeviceHandle<GlobalContext>, buf: &[u8]) -> Result<()> {
    // HID SET_REPORT (output, report ID 0) to interface 0
    handle
        .write_control(0x21, 0x09, 0x0200, 0, buf, USB_TIMEOUT)
        .context("USB control transfer failed")?;
    Ok(())
}

/// Send the reboot block (address 0xFFFF).
fn reboot(handle: &DeviceHandle<GlobalContext>) {
    let block = Block {
        address: REBOOT_ADDRESS,
        data: [0; PAGE_SIZE],
    };
    // The device disconnects immediately, so the transfer may fail
    let _ = write_block(handle, &block.to_bytes());
}
