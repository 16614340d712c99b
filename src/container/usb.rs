//! USB device node discovery through sysfs.
//!
//! Only nodes matching the sensor's vendor/product identifiers are exposed to
//! the environment, never the whole `/dev` tree.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default sysfs directory listing USB devices.
pub const SYSFS_USB_DEVICES: &str = "/sys/bus/usb/devices";

/// Sensor vendor id.
pub const DEFAULT_VENDOR_ID: &str = "045e";

/// Product ids of the sensor's depth, color, audio and hub functions.
pub const DEFAULT_PRODUCT_IDS: [&str; 5] = ["097a", "097b", "097c", "097d", "097e"];

/// Vendor/product filter applied to USB devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbFilter {
    pub vendor_id: String,
    /// Empty means any product of `vendor_id`
    pub product_ids: Vec<String>,
}

impl Default for UsbFilter {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID.to_string(),
            product_ids: DEFAULT_PRODUCT_IDS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl UsbFilter {
    pub fn matches(&self, vendor_id: &str, product_id: &str) -> bool {
        if !vendor_id.trim().eq_ignore_ascii_case(self.vendor_id.trim()) {
            return false;
        }
        self.product_ids.is_empty()
            || self
                .product_ids
                .iter()
                .any(|p| p.trim().eq_ignore_ascii_case(product_id.trim()))
    }
}

/// A matched USB device and the device node to pass through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDevice {
    pub vendor_id: String,
    pub product_id: String,
    pub node: PathBuf,
}

fn read_attr(dir: &Path, name: &str) -> Option<String> {
    fs::read_to_string(dir.join(name))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Matching devices under the system sysfs tree.
pub fn find_devices(filter: &UsbFilter) -> Vec<UsbDevice> {
    find_devices_in(Path::new(SYSFS_USB_DEVICES), filter)
}

/// Matching devices under `root`, sorted by device node.
///
/// Entries without the expected attributes (interfaces, hubs without
/// `busnum`) are skipped. A missing `root` yields no devices.
pub fn find_devices_in(root: &Path, filter: &UsbFilter) -> Vec<UsbDevice> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            log::debug!("Cannot read {}: {}", root.display(), e);
            return Vec::new();
        }
    };

    let mut devices: Vec<UsbDevice> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let dir = entry.path();
            let vendor_id = read_attr(&dir, "idVendor")?;
            let product_id = read_attr(&dir, "idProduct")?;
            if !filter.matches(&vendor_id, &product_id) {
                return None;
            }
            let bus: u32 = read_attr(&dir, "busnum")?.parse().ok()?;
            let dev: u32 = read_attr(&dir, "devnum")?.parse().ok()?;
            Some(UsbDevice {
                vendor_id,
                product_id,
                node: PathBuf::from(format!("/dev/bus/usb/{:03}/{:03}", bus, dev)),
            })
        })
        .collect();

    devices.sort_by(|a, b| a.node.cmp(&b.node));
    devices.dedup_by(|a, b| a.node == b.node);
    devices
}
