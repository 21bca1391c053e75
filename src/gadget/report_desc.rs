//! HID Report Descriptors

/// U2F HID Report Descriptor (64-byte input and output reports)
///
/// Standard descriptor for a FIDO/U2F HID authenticator, per the FIDO
/// Alliance HID usage page (0xF1D0).
pub const U2F_HID: &[u8] = &[
    0x06, 0xD0, 0xF1, // Usage Page (FIDO Alliance)
    0x09, 0x01, // Usage (U2F HID Authenticator Device)
    0xA1, 0x01, // Collection (Application)
    0x09, 0x20, //   Usage (Input Report Data)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x75, 0x08, //   Report Size (8)
    0x95, 0x40, //   Report Count (64)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    0x09, 0x21, //   Usage (Output Report Data)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x75, 0x08, //   Report Size (8)
    0x95, 0x40, //   Report Count (64)
    0x91, 0x02, //   Output (Data, Variable, Absolute)
    0xC0, // End Collection
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u2f_descriptor_framing() {
        assert_eq!(U2F_HID.len(), 34);
        // FIDO Alliance usage page prefix and closed application collection
        assert_eq!(&U2F_HID[..3], &[0x06, 0xD0, 0xF1]);
        assert_eq!(*U2F_HID.last().unwrap(), 0xC0);
    }
}
