/// Size of every page in the database file.
pub const PAGE_SIZE: usize = 4096;

/// Identifier of a page inside the database file. Page 0 is reserved for the
/// catalog directory page and page 1 for the index roots table, so 0 doubles
/// as a "no page" sentinel in chained structures.
pub type PageId = u32;

/// A single 4 KiB page of data.
pub struct Page {
    pub data: [u8; PAGE_SIZE],
}

impl Page {
    pub fn new() -> Self {
        Page { data: [0; PAGE_SIZE] }
    }

    /// Zero the byte range `[from..PAGE_SIZE)`, typically the body below a
    /// fixed header before a full rewrite.
    pub fn zero_from(&mut self, from: usize) {
        self.data[from..].fill(0);
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::new()
    }
}
