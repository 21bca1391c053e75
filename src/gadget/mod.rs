//! USB gadget lifecycle management over configfs.
//!
//! The kernel's configfs USB gadget subsystem is driven directly with
//! filesystem operations:
//!
//! ```text
//! ConfigFs (session over <mount>/usb_gadget)
//!     └── GadgetManager (configure / remove / cleanup)
//!             └── HidFunction (U2F HID function materialization)
//! ```
//!
//! A `configure` creates exactly one gadget `g1` carrying one HID function
//! in one configuration and binds it to the first UDC found; `cleanup`
//! removes every gadget stamped with this tool's vendor/product pair and
//! nothing else.

pub mod configfs;
pub mod hid;
pub mod manager;
pub mod report_desc;

pub use configfs::{find_udc, is_configfs_available, ConfigFs, CONFIGFS_MOUNT};
pub use hid::HidFunction;
pub use manager::{
    wait_for_device, DeviceDescriptor, DeviceStrings, GadgetManager, GADGET_NAME, PRODUCT_ID,
    VENDOR_ID,
};
pub use report_desc::U2F_HID;
