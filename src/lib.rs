//! fidati-gadget - Linux USB gadget configuration for a FIDO/U2F HID
//! authenticator.
//!
//! This crate sets up a USB HID gadget through the kernel's configfs
//! subsystem so that a U2F transport layer can serve FIDO requests through
//! `/dev/hidgN`, and tears matching gadgets down again on request. The
//! U2F/CTAP protocol itself lives elsewhere; this crate only manages the
//! gadget's lifecycle.

pub mod error;
pub mod gadget;

pub use error::{GadgetError, Result};
