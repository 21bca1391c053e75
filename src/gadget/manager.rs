//! Gadget lifecycle: configure, remove, cleanup.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::configfs::{
    create_dir, create_dir_exclusive, find_udc_in, read_attr, remove_file, write_attr, ConfigFs,
    UDC_CLASS_PATH,
};
use super::hid::HidFunction;
use crate::error::{GadgetError, Result};

/// USB Vendor ID (Linux Foundation) identifying gadgets owned by this tool.
pub const VENDOR_ID: u16 = 0x1d6b;

/// USB Product ID identifying gadgets owned by this tool.
///
/// Together with [`VENDOR_ID`] this pair is the ownership tag: configure
/// stamps it onto the gadget and cleanup only ever removes gadgets carrying
/// it. Host-side drivers key on these exact values.
pub const PRODUCT_ID: u16 = 0x0142;

/// Gadget node name under the configfs root.
pub const GADGET_NAME: &str = "g1";

/// Configuration directory name: label `fidati-linux`, index 1.
pub const CONFIG_NAME: &str = "fidati-linux.1";

/// Configuration description string.
pub const CONFIG_STRING: &str = "1xHID";

/// English (US) strings directory used for all USB string descriptors.
const STRINGS_LANG: &str = "strings/0x409";

/// USB device descriptor attributes, fixed for this tool's gadgets.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub bcd_usb: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: u16,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self {
            bcd_usb: 0x0200,
            // Class defined per interface
            device_class: 0x00,
            device_subclass: 0x00,
            device_protocol: 0x00,
            max_packet_size0: 64,
            vendor_id: VENDOR_ID,
            product_id: PRODUCT_ID,
            bcd_device: 0x0001,
        }
    }
}

/// Descriptive USB strings supplied by the caller.
#[derive(Debug, Clone)]
pub struct DeviceStrings {
    pub serial: String,
    pub manufacturer: String,
    pub product: String,
}

/// Gadget lifecycle manager over an open [`ConfigFs`] session.
///
/// Holds no state of its own beyond the borrowed session and the UDC class
/// directory; every operation reads the current configfs tree.
pub struct GadgetManager<'a> {
    session: &'a ConfigFs,
    udc_root: PathBuf,
}

impl<'a> GadgetManager<'a> {
    pub fn new(session: &'a ConfigFs) -> Self {
        Self::with_udc_root(session, PathBuf::from(UDC_CLASS_PATH))
    }

    /// Use a non-default UDC class directory (tests).
    pub fn with_udc_root(session: &'a ConfigFs, udc_root: PathBuf) -> Self {
        Self { session, udc_root }
    }

    /// Check if the managed gadget node exists.
    pub fn gadget_exists(&self) -> bool {
        self.session.gadget_path(GADGET_NAME).exists()
    }

    /// UDC a gadget is currently bound to, if any.
    ///
    /// A missing or empty `UDC` attribute means unbound; a read failure is
    /// reported so callers never treat an unreadable gadget as safe to
    /// remove.
    pub fn bound_udc(&self, gadget_name: &str) -> Result<Option<String>> {
        let udc_file = self.session.gadget_path(gadget_name).join("UDC");
        if !udc_file.exists() {
            return Ok(None);
        }
        let udc = read_attr(&udc_file)?;
        Ok(if udc.is_empty() { None } else { Some(udc) })
    }

    /// Create, configure and enable the U2F HID gadget.
    ///
    /// Strict sequential pipeline; the first failing step aborts the rest.
    /// Partially created configfs objects are left in place on failure (a
    /// later [`cleanup`](Self::cleanup) collects them); only the session
    /// handle itself is guaranteed released, by `Drop` in the caller's scope.
    pub fn configure(&self, strings: &DeviceStrings, report_desc: &[u8]) -> Result<()> {
        info!("Configuring USB gadget {}", GADGET_NAME);

        let gadget_path = self.session.gadget_path(GADGET_NAME);

        // Gadget node; duplicate names fail here
        create_dir_exclusive("gadget", &gadget_path)?;
        self.write_device_descriptor(&gadget_path, &DeviceDescriptor::default())?;
        self.write_device_strings(&gadget_path, strings)?;

        // HID function
        let func = HidFunction::u2f(report_desc);
        func.create(&gadget_path)?;

        // Configuration
        let config_path = gadget_path.join("configs").join(CONFIG_NAME);
        create_dir("config", &config_path)?;
        let config_strings = config_path.join(STRINGS_LANG);
        create_dir("config strings", &config_strings)?;
        write_attr(&config_strings.join("configuration"), CONFIG_STRING)?;

        // Attach function to configuration
        func.link(&config_path, &gadget_path)?;

        // Enable on the first UDC found
        let udc = find_udc_in(&self.udc_root).ok_or(GadgetError::NoUdc)?;
        info!("Binding gadget {} to UDC {}", GADGET_NAME, udc);
        write_attr(&gadget_path.join("UDC"), &udc).map_err(|e| GadgetError::Enable {
            gadget: GADGET_NAME.to_string(),
            reason: e.to_string(),
        })?;

        info!("USB gadget {} configured and enabled", GADGET_NAME);
        Ok(())
    }

    /// Disable a gadget by clearing its `UDC` attribute.
    pub fn disable(&self, gadget_name: &str) -> Result<()> {
        let udc_file = self.session.gadget_path(gadget_name).join("UDC");
        write_attr(&udc_file, "").map_err(|e| GadgetError::Disable {
            gadget: gadget_name.to_string(),
            reason: e.to_string(),
        })?;
        debug!("Unbound gadget {} from UDC", gadget_name);
        Ok(())
    }

    /// Remove a gadget node recursively.
    ///
    /// Removing a still-enabled gadget is undefined per the configfs
    /// contract, so an enabled gadget is disabled first and any failure in
    /// that phase aborts before removal is attempted.
    pub fn remove_gadget(&self, gadget_name: &str) -> Result<()> {
        if self.bound_udc(gadget_name)?.is_some() {
            self.disable(gadget_name)?;
        }

        let gadget_path = self.session.gadget_path(gadget_name);
        remove_recursive(&gadget_path)?;
        info!("Removed gadget {}", gadget_name);
        Ok(())
    }

    /// Remove every gadget carrying this tool's vendor/product tag.
    ///
    /// Gadget names are snapshotted up front, so removing the current entry
    /// never invalidates the traversal. Gadgets with a different tag are left
    /// untouched. The first attribute-read or removal failure aborts, leaving
    /// any remaining matches in place. Returns the number of gadgets removed.
    pub fn cleanup(&self) -> Result<usize> {
        let mut removed = 0;

        for name in self.session.gadget_names()? {
            let gadget_path = self.session.gadget_path(&name);
            let vendor = parse_hex_attr(&gadget_path.join("idVendor"))?;
            let product = parse_hex_attr(&gadget_path.join("idProduct"))?;

            if vendor == VENDOR_ID && product == PRODUCT_ID {
                self.remove_gadget(&name)?;
                removed += 1;
            } else {
                debug!(
                    "Skipping foreign gadget {} ({:#06x}:{:#06x})",
                    name, vendor, product
                );
            }
        }

        if removed == 0 {
            warn!("No matching gadgets found under {}", self.session.root().display());
        }
        Ok(removed)
    }

    fn write_device_descriptor(&self, gadget_path: &Path, desc: &DeviceDescriptor) -> Result<()> {
        write_attr(&gadget_path.join("bcdUSB"), &format!("0x{:04x}", desc.bcd_usb))?;
        write_attr(
            &gadget_path.join("bDeviceClass"),
            &format!("0x{:02x}", desc.device_class),
        )?;
        write_attr(
            &gadget_path.join("bDeviceSubClass"),
            &format!("0x{:02x}", desc.device_subclass),
        )?;
        write_attr(
            &gadget_path.join("bDeviceProtocol"),
            &format!("0x{:02x}", desc.device_protocol),
        )?;
        write_attr(
            &gadget_path.join("bMaxPacketSize0"),
            &desc.max_packet_size0.to_string(),
        )?;
        write_attr(&gadget_path.join("idVendor"), &format!("0x{:04x}", desc.vendor_id))?;
        write_attr(
            &gadget_path.join("idProduct"),
            &format!("0x{:04x}", desc.product_id),
        )?;
        write_attr(
            &gadget_path.join("bcdDevice"),
            &format!("0x{:04x}", desc.bcd_device),
        )?;
        debug!("Set device descriptor attributes");
        Ok(())
    }

    fn write_device_strings(&self, gadget_path: &Path, strings: &DeviceStrings) -> Result<()> {
        let strings_path = gadget_path.join(STRINGS_LANG);
        create_dir("gadget strings", &strings_path)?;

        write_attr(&strings_path.join("serialnumber"), &strings.serial)?;
        write_attr(&strings_path.join("manufacturer"), &strings.manufacturer)?;
        write_attr(&strings_path.join("product"), &strings.product)?;
        debug!("Created USB strings");
        Ok(())
    }
}

/// Remove a gadget directory with its configurations, functions and strings,
/// deepest objects first: config function links, config strings, configs,
/// functions, gadget strings, then the gadget node itself.
fn remove_recursive(gadget_path: &Path) -> Result<()> {
    let configs = gadget_path.join("configs");
    if configs.is_dir() {
        for config in read_dir_paths(&configs)? {
            // Function links must go before the config itself
            for entry in read_dir_paths(&config)? {
                let is_symlink = entry
                    .symlink_metadata()
                    .map(|m| m.file_type().is_symlink())
                    .unwrap_or(false);
                if is_symlink {
                    remove_file(&entry)?;
                }
            }
            remove_node(&config.join(STRINGS_LANG))?;
            remove_node(&config)?;
        }
    }

    let functions = gadget_path.join("functions");
    if functions.is_dir() {
        for func in read_dir_paths(&functions)? {
            remove_node(&func)?;
        }
    }

    remove_node(&gadget_path.join(STRINGS_LANG))?;
    remove_node(gadget_path)
}

/// Remove one configfs object directory.
///
/// On configfs, `rmdir` removes the object along with its kernel-owned
/// attribute files and empty default groups. On a plain filesystem (tests)
/// those entries are ordinary files that block `rmdir`, so fall back to a
/// full recursive removal.
fn remove_node(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    std::fs::remove_dir(path)
        .or_else(|_| std::fs::remove_dir_all(path))
        .map_err(|e| GadgetError::Remove {
            path: path.to_path_buf(),
            source: e,
        })
}

fn read_dir_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| GadgetError::AttributeRead {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| GadgetError::AttributeRead {
            path: dir.to_path_buf(),
            source: e,
        })?;
        paths.push(entry.path());
    }
    Ok(paths)
}

/// Read a `0x`-prefixed hex attribute such as `idVendor`.
fn parse_hex_attr(path: &Path) -> Result<u16> {
    let raw = read_attr(path)?;
    u16::from_str_radix(raw.trim_start_matches("0x"), 16).map_err(|_| {
        GadgetError::AttributeRead {
            path: path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("not a hex attribute: {:?}", raw),
            ),
        }
    })
}

/// Wait for a gadget device node to appear after enabling.
///
/// Exponential backoff starting at 10ms, capped at 100ms, so the caller gets
/// a fast answer without spinning.
pub fn wait_for_device(path: &Path, timeout_ms: u64) -> bool {
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_millis(timeout_ms);

    let mut delay_ms = 10u64;
    const MAX_DELAY_MS: u64 = 100;

    loop {
        if path.exists() {
            return true;
        }

        let remaining = timeout.saturating_sub(start.elapsed());
        let sleep = std::time::Duration::from_millis(delay_ms).min(remaining);
        if sleep.is_zero() {
            return false;
        }

        std::thread::sleep(sleep);
        delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gadget::report_desc::U2F_HID;
    use std::fs;
    use tempfile::TempDir;

    /// Fake configfs mount (with usb_gadget root) plus a UDC class directory
    /// containing one controller entry.
    fn fake_configfs() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("usb_gadget")).unwrap();

        let udc_root = tmp.path().join("udc");
        fs::create_dir(&udc_root).unwrap();
        fs::write(udc_root.join("dummy_udc.0"), "").unwrap();

        (tmp, udc_root)
    }

    fn strings() -> DeviceStrings {
        DeviceStrings {
            serial: "SN1".into(),
            manufacturer: "ACME".into(),
            product: "FIDO Key".into(),
        }
    }

    /// Fabricate a foreign or matching gadget directly in the tree.
    fn fabricate_gadget(session: &ConfigFs, name: &str, vendor: u16, product: u16) {
        let path = session.gadget_path(name);
        fs::create_dir(&path).unwrap();
        fs::write(path.join("idVendor"), format!("0x{:04x}\n", vendor)).unwrap();
        fs::write(path.join("idProduct"), format!("0x{:04x}\n", product)).unwrap();
    }

    #[test]
    fn test_configure_creates_expected_layout() {
        let (tmp, udc_root) = fake_configfs();
        let session = ConfigFs::open(tmp.path()).unwrap();
        let manager = GadgetManager::with_udc_root(&session, udc_root);

        manager.configure(&strings(), U2F_HID).unwrap();

        let gadget = session.gadget_path(GADGET_NAME);
        assert_eq!(fs::read_to_string(gadget.join("idVendor")).unwrap(), "0x1d6b\n");
        assert_eq!(fs::read_to_string(gadget.join("idProduct")).unwrap(), "0x0142\n");
        assert_eq!(fs::read_to_string(gadget.join("bcdUSB")).unwrap(), "0x0200\n");
        assert_eq!(fs::read_to_string(gadget.join("bMaxPacketSize0")).unwrap(), "64\n");
        assert_eq!(
            fs::read_to_string(gadget.join("strings/0x409/serialnumber")).unwrap(),
            "SN1\n"
        );
        assert_eq!(
            fs::read_to_string(gadget.join("strings/0x409/manufacturer")).unwrap(),
            "ACME\n"
        );

        assert!(gadget.join("functions/hid.usb0/report_desc").exists());
        assert_eq!(
            fs::read_to_string(gadget.join("configs/fidati-linux.1/strings/0x409/configuration"))
                .unwrap(),
            "1xHID\n"
        );
        assert!(gadget
            .join("configs/fidati-linux.1/u2fhid")
            .symlink_metadata()
            .unwrap()
            .file_type()
            .is_symlink());

        // Enabled on the fake controller
        assert_eq!(
            manager.bound_udc(GADGET_NAME).unwrap().as_deref(),
            Some("dummy_udc.0")
        );
    }

    #[test]
    fn test_configure_twice_fails_on_duplicate_gadget() {
        let (tmp, udc_root) = fake_configfs();
        let session = ConfigFs::open(tmp.path()).unwrap();
        let manager = GadgetManager::with_udc_root(&session, udc_root);

        manager.configure(&strings(), U2F_HID).unwrap();
        let err = manager.configure(&strings(), U2F_HID).unwrap_err();
        assert!(matches!(err, GadgetError::Create { kind: "gadget", .. }));

        // Exactly one gadget present after the failed second attempt
        assert_eq!(session.gadget_names().unwrap(), vec![GADGET_NAME.to_string()]);
    }

    #[test]
    fn test_configure_fails_without_udc() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("usb_gadget")).unwrap();
        let empty_udc_root = tmp.path().join("udc");
        fs::create_dir(&empty_udc_root).unwrap();

        let session = ConfigFs::open(tmp.path()).unwrap();
        let manager = GadgetManager::with_udc_root(&session, empty_udc_root);

        let err = manager.configure(&strings(), U2F_HID).unwrap_err();
        assert!(matches!(err, GadgetError::NoUdc));

        // Partially created objects stay behind, as documented
        assert!(manager.gadget_exists());
    }

    #[test]
    fn test_configure_then_cleanup_leaves_nothing() {
        let (tmp, udc_root) = fake_configfs();
        let session = ConfigFs::open(tmp.path()).unwrap();
        let manager = GadgetManager::with_udc_root(&session, udc_root);

        manager.configure(&strings(), U2F_HID).unwrap();
        assert_eq!(manager.cleanup().unwrap(), 1);

        assert!(!manager.gadget_exists());
        assert!(session.gadget_names().unwrap().is_empty());
    }

    #[test]
    fn test_remove_disables_bound_gadget_first() {
        let (tmp, udc_root) = fake_configfs();
        let session = ConfigFs::open(tmp.path()).unwrap();
        let manager = GadgetManager::with_udc_root(&session, udc_root);

        manager.configure(&strings(), U2F_HID).unwrap();
        assert!(manager.bound_udc(GADGET_NAME).unwrap().is_some());

        manager.remove_gadget(GADGET_NAME).unwrap();
        assert!(!manager.gadget_exists());
    }

    #[test]
    fn test_unreadable_udc_state_prevents_removal() {
        let (tmp, udc_root) = fake_configfs();
        let session = ConfigFs::open(tmp.path()).unwrap();
        let manager = GadgetManager::with_udc_root(&session, udc_root);

        // Gadget whose UDC attribute cannot be read as a file
        fabricate_gadget(&session, GADGET_NAME, VENDOR_ID, PRODUCT_ID);
        fs::create_dir(session.gadget_path(GADGET_NAME).join("UDC")).unwrap();

        let err = manager.remove_gadget(GADGET_NAME).unwrap_err();
        assert!(matches!(err, GadgetError::AttributeRead { .. }));

        // Removal was never attempted
        assert!(manager.gadget_exists());
    }

    #[test]
    fn test_disable_failure_prevents_removal() {
        let (tmp, udc_root) = fake_configfs();
        let session = ConfigFs::open(tmp.path()).unwrap();
        let manager = GadgetManager::with_udc_root(&session, udc_root);

        manager.configure(&strings(), U2F_HID).unwrap();

        // Bound gadget whose UDC attribute rejects the disabling write
        let udc_file = session.gadget_path(GADGET_NAME).join("UDC");
        let mut perms = fs::metadata(&udc_file).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&udc_file, perms).unwrap();

        // Root bypasses permission checks; nothing to inject in that case
        if fs::OpenOptions::new().write(true).open(&udc_file).is_ok() {
            return;
        }

        let err = manager.remove_gadget(GADGET_NAME).unwrap_err();
        assert!(matches!(err, GadgetError::Disable { .. }));

        // Removal was never attempted: gadget still present and still bound
        assert!(manager.gadget_exists());
        assert_eq!(
            manager.bound_udc(GADGET_NAME).unwrap().as_deref(),
            Some("dummy_udc.0")
        );
    }

    #[test]
    fn test_cleanup_skips_foreign_gadgets() {
        let (tmp, _udc_root) = fake_configfs();
        let session = ConfigFs::open(tmp.path()).unwrap();
        let manager = GadgetManager::new(&session);

        fabricate_gadget(&session, "foreign", 0x1234, 0x5678);
        // Same vendor, different product: still foreign
        fabricate_gadget(&session, "half-match", VENDOR_ID, 0x9999);

        assert_eq!(manager.cleanup().unwrap(), 0);
        let mut names = session.gadget_names().unwrap();
        names.sort();
        assert_eq!(names, vec!["foreign".to_string(), "half-match".to_string()]);
    }

    #[test]
    fn test_cleanup_interleaved_ownership() {
        let (tmp, _udc_root) = fake_configfs();
        let session = ConfigFs::open(tmp.path()).unwrap();
        let manager = GadgetManager::new(&session);

        // Interleave 3 matching and 2 foreign gadgets
        fabricate_gadget(&session, "a-ours", VENDOR_ID, PRODUCT_ID);
        fabricate_gadget(&session, "b-theirs", 0x046d, 0xc52b);
        fabricate_gadget(&session, "c-ours", VENDOR_ID, PRODUCT_ID);
        fabricate_gadget(&session, "d-theirs", 0x8087, 0x0024);
        fabricate_gadget(&session, "e-ours", VENDOR_ID, PRODUCT_ID);

        assert_eq!(manager.cleanup().unwrap(), 3);

        let mut names = session.gadget_names().unwrap();
        names.sort();
        assert_eq!(names, vec!["b-theirs".to_string(), "d-theirs".to_string()]);
    }

    #[test]
    fn test_cleanup_aborts_on_unreadable_attrs() {
        let (tmp, _udc_root) = fake_configfs();
        let session = ConfigFs::open(tmp.path()).unwrap();
        let manager = GadgetManager::new(&session);

        // Gadget directory without idVendor/idProduct attributes
        fs::create_dir(session.gadget_path("broken")).unwrap();

        assert!(matches!(
            manager.cleanup().unwrap_err(),
            GadgetError::AttributeRead { .. }
        ));
        assert!(session.gadget_path("broken").exists());
    }

    #[test]
    fn test_parse_hex_attr() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("idVendor");

        fs::write(&path, "0x1d6b\n").unwrap();
        assert_eq!(parse_hex_attr(&path).unwrap(), 0x1d6b);

        fs::write(&path, "garbage\n").unwrap();
        assert!(parse_hex_attr(&path).is_err());
    }

    #[test]
    fn test_wait_for_device() {
        let tmp = TempDir::new().unwrap();
        let node = tmp.path().join("hidg0");

        assert!(!wait_for_device(&node, 50));

        fs::write(&node, "").unwrap();
        assert!(wait_for_device(&node, 50));
    }
}
