//! Linux transport over i2c-dev, with udev based display enumeration.

use i2cdev::core::{I2CMessage, I2CTransfer};
use i2cdev::linux::{LinuxI2CBus, LinuxI2CMessage};
use std::{ffi::OsStr, fs::File, io::Read, path::Path};
use udev::Device;

use super::edid::{parse_edid, Edid, EDDC_SEGMENT_POINTER_ADDR, EDID_ADDRESS, EDID_LENGTH};
use super::{Functionality, Transport};

const RECEIVE_EDID_RETRIES: u8 = 3;

/// Read the first EDID block over the bus. Only the first 128 bytes are
/// requested, which every display device carries.
pub fn receive_edid(i2c_bus: &mut LinuxI2CBus) -> Result<Edid, anyhow::Error> {
    // reset the eddc segment pointer; displays without eddc on the active
    // input nack this, which is fine
    let _ = i2c_bus.transfer(&mut [
        LinuxI2CMessage::write(&[0x00]).with_address(EDDC_SEGMENT_POINTER_ADDR.into())
    ]);

    let mut last_err = None;
    for _ in 0..RECEIVE_EDID_RETRIES {
        let set_offset = || LinuxI2CMessage::write(&[0x00]).with_address(EDID_ADDRESS.into());
        i2c_bus
            .transfer(&mut [set_offset()])
            .map_err(anyhow::Error::new)?;
        let mut data = [0u8; EDID_LENGTH];
        i2c_bus
            .transfer(&mut [LinuxI2CMessage::read(&mut data).with_address(EDID_ADDRESS.into())])
            .map_err(anyhow::Error::new)?;
        match parse_edid(&data) {
            Ok(edid) => return Ok(edid),
            Err(err) => last_err = Some(anyhow::Error::new(err)),
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("edid read failed")))
}

fn read_sysfs_string(path: &Path) -> Option<String> {
    let mut content = String::new();
    File::open(path)
        .ok()?
        .read_to_string(&mut content)
        .ok()
        .map(|_| content.trim().to_string())
}

// Devices connected via docking stations may appear as two separate i2c
// devices with only one of them working; the dead twin is marked disabled
// and disconnected in sysfs.
fn is_phantom_ddc_device(id: usize) -> bool {
    let device_path = Path::new("/sys/bus/i2c/devices").join(format!("i2c-{id}"));
    if !device_path.exists() {
        // it can not be a valid device if it is not found in the system tree
        return true;
    }
    read_sysfs_string(&device_path.join("device").join("enabled"))
        .is_some_and(|content| content == "disabled")
        && read_sysfs_string(&device_path.join("device").join("status"))
            .is_some_and(|content| content == "disconnected")
}

// bus names that never belong to a display connector
fn ignore_device_by_name(name: &OsStr) -> bool {
    let skip_prefix = ["SMBus", "soc:i2cdsi", "smu", "mac-io", "u4"];

    name.to_str().is_some_and(|name| {
        skip_prefix.iter().any(|prefix| name.starts_with(prefix))
    })
}

// check if the parent device is a graphics device
fn device_is_display(dev: &udev::Device) -> bool {
    dev.parent().is_some_and(|i2c_parent| {
        i2c_parent.parent().is_some_and(|maybe_graphics_device| {
            maybe_graphics_device
                .subsystem()
                .is_some_and(|subsystem| subsystem == "drm")
                || maybe_graphics_device
                    .property_value("ID_PCI_CLASS_FROM_DATABASE")
                    .is_some_and(|class| class == "Display controller")
        })
    })
}

fn drm_edid_block(drm_device: &udev::Device) -> Option<[u8; EDID_LENGTH]> {
    let edid_path = drm_device.syspath().join("edid");
    let mut data = [0u8; EDID_LENGTH];
    File::open(edid_path)
        .ok()?
        .read(&mut data)
        .ok()
        .filter(|size| *size >= EDID_LENGTH)
        .map(|_| data)
}

fn find_parent_drm_device(i2c_dev: &udev::Device) -> Option<Device> {
    let graphics_device = i2c_dev.parent()?.parent()?;
    if graphics_device
        .subsystem()
        .is_some_and(|subsystem| subsystem == "drm")
    {
        // drm display buses are already correctly mapped
        return Some(graphics_device);
    }
    if !graphics_device
        .property_value("ID_PCI_CLASS_FROM_DATABASE")
        .is_some_and(|class| class == "Display controller")
    {
        return None;
    }
    // a display bus without a drm parent needs matching: read the edid over
    // i2c and find the drm connector advertising the same block
    let sysnum = i2c_dev.sysnum()?;
    let mut bus = LinuxI2CBus::new(format!("/dev/i2c-{sysnum}")).ok()?;
    let i2c_edid = receive_edid(&mut bus).ok()?;
    let mut drm_enum = udev::Enumerator::new().ok()?;
    drm_enum.match_subsystem("drm").ok()?;
    drm_enum.scan_devices().ok()?.find(|dev| {
        drm_edid_block(dev)
            .and_then(|block| parse_edid(&block).ok())
            .is_some_and(|drm_edid| drm_edid == i2c_edid)
    })
}

/// One DDC capable display connector, holding its open i2c bus.
pub struct LinuxDdcDevice {
    i2c_sysnum: usize,
    bus: LinuxI2CBus,
    drm_device: udev::Device,
}

impl LinuxDdcDevice {
    pub fn open(i2c_sysnum: usize, drm_device: udev::Device) -> Result<Self, anyhow::Error> {
        let bus =
            LinuxI2CBus::new(format!("/dev/i2c-{i2c_sysnum}")).map_err(anyhow::Error::new)?;
        Ok(LinuxDdcDevice {
            i2c_sysnum,
            bus,
            drm_device,
        })
    }

    pub fn sysnum(&self) -> usize {
        self.i2c_sysnum
    }

    /// EDID of the connected display, read from the drm connector.
    pub fn read_edid(&self) -> Result<Edid, anyhow::Error> {
        let block = drm_edid_block(&self.drm_device)
            .ok_or_else(|| anyhow::anyhow!("no edid exposed by drm connector"))?;
        parse_edid(&block).map_err(anyhow::Error::new)
    }
}

impl Transport for LinuxDdcDevice {
    fn name(&self) -> String {
        let sysname = self.drm_device.sysname().to_string_lossy();
        sysname
            .split_once('-')
            .map(|(_, connector)| connector.to_string())
            .unwrap_or_else(|| sysname.to_string())
    }

    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), anyhow::Error> {
        let msg = LinuxI2CMessage::write(bytes).with_address(addr.into());
        self.bus.transfer(&mut [msg]).map_err(anyhow::Error::new)?;
        Ok(())
    }

    fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<usize, anyhow::Error> {
        let len = buf.len();
        let msg = LinuxI2CMessage::read(buf).with_address(addr.into());
        self.bus.transfer(&mut [msg]).map_err(anyhow::Error::new)?;
        Ok(len)
    }

    fn functionality(&self) -> Functionality {
        Functionality {
            i2c: true,
            internal_delay: false,
        }
    }
}

/// Walks the udev i2c buses that belong to display connectors.
pub struct LinuxDdcDeviceEnumerator {
    inner_iter: Box<dyn Iterator<Item = (LinuxDdcDevice, Edid)>>,
}

impl LinuxDdcDeviceEnumerator {
    pub fn iter() -> Self {
        let mut devices = Vec::new();
        if let Ok(mut i2c_enum) = udev::Enumerator::new() {
            if i2c_enum.match_subsystem("i2c-dev").is_ok() {
                if let Ok(scan) = i2c_enum.scan_devices() {
                    devices = scan.collect();
                }
            }
        }

        let filtered: Vec<(LinuxDdcDevice, Edid)> = devices
            .into_iter()
            .filter(|dev| {
                dev.attribute_value("name")
                    .is_some_and(|name| !ignore_device_by_name(name))
            })
            .filter(device_is_display)
            .filter(|dev| dev.sysnum().is_some_and(|id| !is_phantom_ddc_device(id)))
            .filter_map(|i2c_device| {
                let drm_device = find_parent_drm_device(&i2c_device)?;
                let device = LinuxDdcDevice::open(i2c_device.sysnum()?, drm_device).ok()?;
                let edid = device.read_edid().ok()?;
                Some((device, edid))
            })
            .collect();
        Self {
            inner_iter: Box::new(filtered.into_iter()),
        }
    }
}

impl Iterator for LinuxDdcDeviceEnumerator {
    type Item = (LinuxDdcDevice, Edid);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner_iter.next()
    }
}
