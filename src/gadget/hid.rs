//! HID function materialization for the U2F gadget.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::configfs::{create_dir, create_symlink, write_attr, write_attr_bytes};
use crate::error::Result;

/// Function instance name; the configfs directory becomes `hid.usb0`.
pub const FUNCTION_INSTANCE: &str = "usb0";

/// Name of the function link inside the configuration directory.
pub const FUNCTION_LINK: &str = "u2fhid";

/// HID function attributes written under `functions/hid.usb0`.
///
/// The report descriptor is an opaque blob here; its semantics belong to the
/// HID transport layer that will speak through `/dev/hidgN`.
#[derive(Debug, Clone)]
pub struct HidFunction<'a> {
    /// HID interface protocol. U2F authenticators reuse 0x21.
    pub protocol: u8,
    /// HID interface subclass (0, no boot interface).
    pub subclass: u8,
    /// Fixed report size in bytes.
    pub report_length: u8,
    /// Raw HID report descriptor.
    pub report_desc: &'a [u8],
}

impl<'a> HidFunction<'a> {
    /// U2F HID function carrying the given report descriptor.
    pub fn u2f(report_desc: &'a [u8]) -> Self {
        Self {
            protocol: 0x21,
            subclass: 0,
            report_length: 64,
            report_desc,
        }
    }

    /// Configfs directory name of this function.
    pub fn name(&self) -> String {
        format!("hid.{}", FUNCTION_INSTANCE)
    }

    /// Function path inside a gadget directory.
    pub fn function_path(&self, gadget_path: &Path) -> PathBuf {
        gadget_path.join("functions").join(self.name())
    }

    /// Create the function directory and write its attributes.
    pub fn create(&self, gadget_path: &Path) -> Result<()> {
        let func_path = self.function_path(gadget_path);
        create_dir("function", &func_path)?;

        write_attr(&func_path.join("protocol"), &self.protocol.to_string())?;
        write_attr(&func_path.join("subclass"), &self.subclass.to_string())?;
        write_attr(
            &func_path.join("report_length"),
            &self.report_length.to_string(),
        )?;
        write_attr_bytes(&func_path.join("report_desc"), self.report_desc)?;

        debug!("Created HID function {} at {}", self.name(), func_path.display());
        Ok(())
    }

    /// Attach the function to a configuration via symlink.
    pub fn link(&self, config_path: &Path, gadget_path: &Path) -> Result<()> {
        let func_path = self.function_path(gadget_path);
        let link_path = config_path.join(FUNCTION_LINK);

        if !link_path.exists() {
            create_symlink(&func_path, &link_path)?;
            debug!("Linked HID function {} into config as {}", self.name(), FUNCTION_LINK);
        }

        Ok(())
    }
}
