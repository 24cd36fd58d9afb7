//! In-memory page representations.
//!
//! A page is a fixed-size unit of on-disk storage identified by a [`PageId`].
//! Every kind is backed by a [`Buffer`] with its own header type, and every
//! header starts with a `kind` tag so a raw image read from the device is
//! self-describing. The cache and pager only rely on the capability surface
//! exposed by [`MemPage`]: kind classification, overflow classification,
//! serialization and deserialization.
//!
//! Kind changes reuse the allocation through [`Buffer::cast`]; the
//! conversions are explicit per target kind and total over the enum.

use std::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::buffer::Buffer;
use crate::error::{StorageError, StorageResult};

/// Magic number stored in page zero ("pcor").
pub const MAGIC: u32 = 0x70636F72;

/// On-disk format version stored in page zero.
pub const FORMAT_VERSION: u32 = 1;

/// Logical page identifier. Unique while the page is live; recycled through
/// the pager's free list once released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub u32);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Page kind tag. Stored as the first 4 bytes of every page header, so a
/// zeroed image is a plain tree page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PageKind {
    Tree = 0,
    Zero = 1,
    Overflow = 2,
}

/// Shared prefix of every page header, used to dispatch on the kind tag of
/// a raw image without assuming a concrete kind.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
struct KindPrefix {
    kind: u32,
}

/// Header of a B-tree page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct TreeHeader {
    pub kind: u32,
    /// Number of occupied slots.
    pub num_slots: u16,
    /// Free bytes left in the content area.
    pub free_space: u16,
    /// Page number of the rightmost child, 0 when this is a leaf.
    pub right_child: u32,
}

/// Header of an overflow page: a link in a chain of oversized content
/// hanging off a primary page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct OverflowHeader {
    pub kind: u32,
    /// Next page in the overflow chain, 0 terminates it.
    pub next: u32,
    /// Bytes of payload stored in this page's content area.
    pub num_bytes: u32,
    reserved: u32,
}

/// Header of page zero, the database metadata page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct ZeroHeader {
    pub kind: u32,
    pub magic: u32,
    pub version: u32,
    pub page_size: u32,
    pub total_pages: u32,
    pub first_free_page: u32,
}

/// B-tree page: slotted content area addressed through [`TreeHeader`].
#[derive(Debug, Clone, PartialEq)]
pub struct TreePage {
    buffer: Buffer<TreeHeader>,
}

impl TreePage {
    pub fn alloc(size: usize) -> Self {
        let mut page = TreePage {
            buffer: Buffer::new(size),
        };
        let free_space = page.buffer.usable_space();
        let header = page.buffer.header_mut();
        header.kind = PageKind::Tree as u32;
        header.free_space = free_space;
        page
    }

    fn from_buffer(buffer: Buffer<TreeHeader>) -> Self {
        TreePage { buffer }
    }

    fn into_buffer(self) -> Buffer<TreeHeader> {
        self.buffer
    }

    pub fn header(&self) -> &TreeHeader {
        self.buffer.header()
    }

    pub fn header_mut(&mut self) -> &mut TreeHeader {
        self.buffer.header_mut()
    }

    pub fn content(&self) -> &[u8] {
        self.buffer.content()
    }

    pub fn content_mut(&mut self) -> &mut [u8] {
        self.buffer.content_mut()
    }

    pub fn usable_space(&self) -> u16 {
        self.buffer.usable_space()
    }
}

/// Overflow page. Never evicted by the cache's replacement policy.
#[derive(Debug, Clone, PartialEq)]
pub struct OverflowPage {
    buffer: Buffer<OverflowHeader>,
}

impl OverflowPage {
    pub fn alloc(size: usize) -> Self {
        let mut page = OverflowPage {
            buffer: Buffer::new(size),
        };
        page.buffer.header_mut().kind = PageKind::Overflow as u32;
        page
    }

    fn from_buffer(buffer: Buffer<OverflowHeader>) -> Self {
        OverflowPage { buffer }
    }

    fn into_buffer(self) -> Buffer<OverflowHeader> {
        self.buffer
    }

    pub fn header(&self) -> &OverflowHeader {
        self.buffer.header()
    }

    pub fn header_mut(&mut self) -> &mut OverflowHeader {
        self.buffer.header_mut()
    }

    /// Stores `payload` in the content area. Panics if it does not fit.
    pub fn set_payload(&mut self, payload: &[u8]) {
        assert!(
            payload.len() <= self.buffer.usable_space() as usize,
            "overflow payload of {} bytes does not fit in {} usable bytes",
            payload.len(),
            self.buffer.usable_space()
        );
        self.buffer.header_mut().num_bytes = payload.len() as u32;
        self.buffer.content_mut()[..payload.len()].copy_from_slice(payload);
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.content()[..self.header().num_bytes as usize]
    }
}

/// Page zero: database-wide metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct PageZero {
    buffer: Buffer<ZeroHeader>,
}

impl PageZero {
    pub fn alloc(size: usize) -> Self {
        let mut page = PageZero {
            buffer: Buffer::new(size),
        };
        let header = page.buffer.header_mut();
        header.kind = PageKind::Zero as u32;
        header.magic = MAGIC;
        header.version = FORMAT_VERSION;
        header.page_size = size as u32;
        page
    }

    fn from_buffer(buffer: Buffer<ZeroHeader>) -> Self {
        PageZero { buffer }
    }

    fn into_buffer(self) -> Buffer<ZeroHeader> {
        self.buffer
    }

    pub fn header(&self) -> &ZeroHeader {
        self.buffer.header()
    }

    pub fn header_mut(&mut self) -> &mut ZeroHeader {
        self.buffer.header_mut()
    }

    /// Whether the header carries the expected magic and version.
    pub fn is_valid(&self) -> bool {
        let header = self.header();
        header.magic == MAGIC && header.version == FORMAT_VERSION
    }
}

/// In-memory representation of any page kind.
#[derive(Debug, Clone, PartialEq)]
pub enum MemPage {
    Tree(TreePage),
    Zero(PageZero),
    Overflow(OverflowPage),
}

impl MemPage {
    /// A fresh page with zeroed content. New pages start life as tree pages
    /// and change kind through the `into_*` conversions.
    pub fn alloc(size: usize) -> Self {
        MemPage::Tree(TreePage::alloc(size))
    }

    pub fn kind(&self) -> PageKind {
        match self {
            MemPage::Tree(_) => PageKind::Tree,
            MemPage::Zero(_) => PageKind::Zero,
            MemPage::Overflow(_) => PageKind::Overflow,
        }
    }

    /// Overflow pages are excluded from normal eviction.
    pub fn is_overflow(&self) -> bool {
        matches!(self, MemPage::Overflow(_))
    }

    /// Total size of the backing region in bytes.
    pub fn size(&self) -> usize {
        self.as_slice().len()
    }

    /// The raw byte image, header included. This is exactly what is
    /// persisted at `page_number × page_size` on the device.
    pub fn as_slice(&self) -> &[u8] {
        match self {
            MemPage::Tree(page) => page.buffer.as_slice(),
            MemPage::Zero(page) => page.buffer.as_slice(),
            MemPage::Overflow(page) => page.buffer.as_slice(),
        }
    }

    /// Serializes the page for persistence.
    ///
    /// The byte image is the on-disk format, so this only validates that the
    /// image is consistent with the in-memory kind before exposing it; a
    /// mismatch means the header was corrupted after construction.
    pub fn serialize(&self) -> StorageResult<&[u8]> {
        let tag = self.image_kind_tag();
        if tag != self.kind() as u32 {
            return Err(StorageError::Corrupted {
                reason: format!(
                    "page image is tagged {tag} but the in-memory kind is {:?}",
                    self.kind()
                ),
            });
        }

        Ok(self.as_slice())
    }

    /// Interprets a raw image, dispatching on its kind tag. The image is
    /// adopted, not copied.
    pub fn deserialize(image: Box<[u64]>) -> StorageResult<Self> {
        let tag = Buffer::<KindPrefix>::from_slice(image.as_bytes()).0.kind;

        match tag {
            tag if tag == PageKind::Tree as u32 => {
                Ok(MemPage::Tree(TreePage::from_buffer(Buffer::from_image(image))))
            }
            tag if tag == PageKind::Zero as u32 => {
                Ok(MemPage::Zero(PageZero::from_buffer(Buffer::from_image(image))))
            }
            tag if tag == PageKind::Overflow as u32 => Ok(MemPage::Overflow(
                OverflowPage::from_buffer(Buffer::from_image(image)),
            )),
            tag => Err(StorageError::Corrupted {
                reason: format!("unknown page kind tag {tag}"),
            }),
        }
    }

    /// Reinitializes the page as a tree page, reusing the allocation.
    pub fn into_tree(self) -> Self {
        if let MemPage::Tree(_) = self {
            return self;
        }

        let buffer = self.into_raw().cast::<TreeHeader>();
        let mut page = TreePage::from_buffer(buffer);
        let free_space = page.buffer.usable_space();
        *page.header_mut() = TreeHeader {
            kind: PageKind::Tree as u32,
            num_slots: 0,
            free_space,
            right_child: 0,
        };
        MemPage::Tree(page)
    }

    /// Reinitializes the page as an overflow page, reusing the allocation.
    pub fn into_overflow(self) -> Self {
        if let MemPage::Overflow(_) = self {
            return self;
        }

        let buffer = self.into_raw().cast::<OverflowHeader>();
        let mut page = OverflowPage::from_buffer(buffer);
        *page.header_mut() = OverflowHeader {
            kind: PageKind::Overflow as u32,
            next: 0,
            num_bytes: 0,
            reserved: 0,
        };
        MemPage::Overflow(page)
    }

    /// Reinitializes the page as page zero, reusing the allocation.
    pub fn into_zero(self) -> Self {
        if let MemPage::Zero(_) = self {
            return self;
        }

        let size = self.size();
        let buffer = self.into_raw().cast::<ZeroHeader>();
        let mut page = PageZero::from_buffer(buffer);
        *page.header_mut() = ZeroHeader {
            kind: PageKind::Zero as u32,
            magic: MAGIC,
            version: FORMAT_VERSION,
            page_size: size as u32,
            total_pages: 0,
            first_free_page: 0,
        };
        MemPage::Zero(page)
    }

    /// Strips the kind wrapper down to a kind-agnostic buffer.
    fn into_raw(self) -> Buffer<KindPrefix> {
        match self {
            MemPage::Tree(page) => page.into_buffer().cast(),
            MemPage::Zero(page) => page.into_buffer().cast(),
            MemPage::Overflow(page) => page.into_buffer().cast(),
        }
    }

    fn image_kind_tag(&self) -> u32 {
        let (prefix, _) = Buffer::<KindPrefix>::from_slice(self.as_slice());
        prefix.kind
    }
}
