//! Page - the fundamental 4KB unit of storage.
//!
//! A [`Page`] is a raw 4KB byte array that serves as the unit of I/O
//! between disk and memory. Pages live inside buffer pool frames; upper
//! layers cast the bytes into typed layouts (B+tree nodes, table pages,
//! the index-root directory) through zero-copy views while holding a pin.

use crate::common::config::PAGE_SIZE;

use super::page_header::PageHeader;

/// A page of data (4KB, 4KB-aligned).
///
/// Alignment matches the OS page size so the buffer is ready for Direct
/// I/O. `Page` does not implement `Clone` in production code: copying 4KB
/// should be explicit. A `#[cfg(test)]` Clone is provided for tests.
#[repr(align(4096))]
pub struct Page {
    data: [u8; PAGE_SIZE],
}

impl Page {
    /// Create a new zeroed page.
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0u8; PAGE_SIZE],
        }
    }

    /// Get immutable slice of page data.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable slice of page data.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Zero out the entire page.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    /// Get the size of a page.
    #[inline]
    pub const fn size() -> usize {
        PAGE_SIZE
    }

    /// Read the page header.
    pub fn header(&self) -> PageHeader {
        PageHeader::from_bytes(&self.data)
    }

    /// Write a page header.
    pub fn set_header(&mut self, header: &PageHeader) {
        header.write_to(&mut self.data);
    }

    /// Compute and store the CRC32 checksum in the header.
    ///
    /// The buffer pool calls this on every write-back so pages on disk
    /// always carry a checksum matching their content.
    pub fn update_checksum(&mut self) {
        let checksum = PageHeader::compute_checksum(&self.data);
        self.data[PageHeader::OFFSET_CHECKSUM..PageHeader::OFFSET_CHECKSUM + 4]
            .copy_from_slice(&checksum.to_le_bytes());
    }

    /// Verify the stored checksum against the page content.
    ///
    /// A stored checksum of zero means the page was never stamped (e.g. a
    /// freshly allocated page that has only ever been zero-filled) and is
    /// accepted as valid.
    pub fn verify_checksum(&self) -> bool {
        let header = self.header();
        header.checksum == 0 || header.verify_checksum(&self.data)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

// Clone only available in tests - forces explicit copying in production
#[cfg(test)]
impl Clone for Page {
    fn clone(&self) -> Self {
        let mut new_page = Page::new();
        new_page.data.copy_from_slice(&self.data);
        new_page
    }
}

#[cfg(test)]
mod tests {
    use super::super::page_header::PageType;
    use super::*;

    #[test]
    fn test_page_size_and_alignment() {
        assert_eq!(std::mem::size_of::<Page>(), PAGE_SIZE);
        assert_eq!(std::mem::align_of::<Page>(), 4096);
    }

    #[test]
    fn test_page_read_write() {
        let mut page = Page::new();

        page.as_mut_slice()[0] = 0xFF;
        page.as_mut_slice()[100] = 0xAB;
        page.as_mut_slice()[4095] = 0xCD;

        assert_eq!(page.as_slice()[0], 0xFF);
        assert_eq!(page.as_slice()[100], 0xAB);
        assert_eq!(page.as_slice()[4095], 0xCD);
    }

    #[test]
    fn test_page_reset() {
        let mut page = Page::new();
        page.as_mut_slice()[0] = 0xFF;
        page.reset();
        assert_eq!(page.as_slice()[0], 0);
    }

    #[test]
    fn test_checksum_round_trip() {
        let mut page = Page::new();
        page.set_header(&PageHeader::new(PageType::Data));
        page.as_mut_slice()[100] = 0x42;
        page.update_checksum();
        assert!(page.verify_checksum());

        // Corrupt a byte - verification must fail.
        page.as_mut_slice()[100] = 0x43;
        assert!(!page.verify_checksum());
    }

    #[test]
    fn test_unstamped_page_verifies() {
        // Zero checksum means "never stamped" and is accepted.
        let mut page = Page::new();
        page.as_mut_slice()[200] = 0x01;
        assert!(page.verify_checksum());
    }
}
