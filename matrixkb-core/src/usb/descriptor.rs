//! Static descriptor table consulted by `GET_DESCRIPTOR`.

/// One descriptor, keyed by the `wValue`/`wIndex` pair the host asks for.
#[derive(Debug, Clone, Copy)]
pub struct UsbDescriptor {
    pub value: u16,
    pub index: u16,
    pub data: &'static [u8],
}

impl UsbDescriptor {
    pub const fn new(value: u16, index: u16, data: &'static [u8]) -> Self {
        Self { value, index, data }
    }
}

/// Read-only descriptor table. The table's length ends the lookup.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorMap {
    entries: &'static [UsbDescriptor],
}

impl DescriptorMap {
    pub const fn new(entries: &'static [UsbDescriptor]) -> Self {
        Self { entries }
    }

    pub const fn empty() -> Self {
        Self { entries: &[] }
    }

    pub fn find(&self, value: u16, index: u16) -> Option<&'static [u8]> {
        self.entries
            .iter()
            .find(|d| d.value == value && d.index == index)
            .map(|d| d.data)
    }

    pub fn entries(&self) -> &'static [UsbDescriptor] {
        self.entries
    }
}
