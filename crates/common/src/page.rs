//! Fixed-size page layout shared by the disk manager, buffer pool, record
//! store and vector store (§3 "Page").

/// Logical page identifier. `0` is reserved to mean "invalid".
pub type PageId = u64;

/// Monotonically increasing log sequence number (1-based; 0 means "no LSN").
pub type Lsn = u64;

pub const NULL_PAGE_ID: PageId = 0;

/// Default page size. Chosen to match the spec's stated default.
pub const PAGE_SIZE: usize = 4096;

/// `page_id(8) | lsn(8) | checksum(4) | kind(1) | reserved(3)`
pub const PAGE_HEADER_SIZE: usize = 24;

pub const PAGE_PAYLOAD_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

const OFF_PAGE_ID: usize = 0;
const OFF_LSN: usize = 8;
const OFF_CHECKSUM: usize = 16;
const OFF_KIND: usize = 20;

/// The closed set of page types this engine ever writes (§9 design notes:
/// no virtual inheritance, a flat enum instead).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Data = 0,
    Overflow = 1,
    VectorRecord = 2,
    Manifest = 3,
    Free = 255,
}

impl PageKind {
    fn from_u8(b: u8) -> PageKind {
        match b {
            0 => PageKind::Data,
            1 => PageKind::Overflow,
            2 => PageKind::VectorRecord,
            3 => PageKind::Manifest,
            _ => PageKind::Free,
        }
    }
}

/// A fixed-size page image: a small header followed by an opaque payload.
///
/// The disk manager never interprets the payload; record store, vector
/// store and recovery each impose their own layout on it.
#[derive(Clone)]
pub struct Page {
    bytes: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    /// A freshly zeroed page of the given kind, with page_id and lsn unset.
    pub fn new_zeroed(page_id: PageId, kind: PageKind) -> Page {
        let mut page = Page {
            bytes: Box::new([0u8; PAGE_SIZE]),
        };
        page.set_page_id(page_id);
        page.set_kind(kind);
        page.set_lsn(0);
        page.recompute_checksum();
        page
    }

    /// Wrap a raw page-sized byte buffer read from disk (no validation).
    pub fn from_bytes(bytes: [u8; PAGE_SIZE]) -> Page {
        Page {
            bytes: Box::new(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.bytes
    }

    pub fn page_id(&self) -> PageId {
        u64::from_le_bytes(self.bytes[OFF_PAGE_ID..OFF_PAGE_ID + 8].try_into().unwrap())
    }

    pub fn set_page_id(&mut self, id: PageId) {
        self.bytes[OFF_PAGE_ID..OFF_PAGE_ID + 8].copy_from_slice(&id.to_le_bytes());
    }

    pub fn lsn(&self) -> Lsn {
        u64::from_le_bytes(self.bytes[OFF_LSN..OFF_LSN + 8].try_into().unwrap())
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.bytes[OFF_LSN..OFF_LSN + 8].copy_from_slice(&lsn.to_le_bytes());
    }

    pub fn kind(&self) -> PageKind {
        PageKind::from_u8(self.bytes[OFF_KIND])
    }

    pub fn set_kind(&mut self, kind: PageKind) {
        self.bytes[OFF_KIND] = kind as u8;
    }

    pub fn stored_checksum(&self) -> u32 {
        u32::from_le_bytes(self.bytes[OFF_CHECKSUM..OFF_CHECKSUM + 4].try_into().unwrap())
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[PAGE_HEADER_SIZE..]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[PAGE_HEADER_SIZE..]
    }

    /// Recompute and store the checksum over the payload region. Must be
    /// called after any payload mutation, before the page is handed to the
    /// disk manager for a write.
    pub fn recompute_checksum(&mut self) {
        let checksum = crc32fast::hash(&self.bytes[PAGE_HEADER_SIZE..]);
        self.bytes[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&checksum.to_le_bytes());
    }

    /// `true` iff the stored checksum matches the payload as currently held.
    pub fn verify_checksum(&self) -> bool {
        crc32fast::hash(&self.bytes[PAGE_HEADER_SIZE..]) == self.stored_checksum()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("page_id", &self.page_id())
            .field("lsn", &self.lsn())
            .field("kind", &self.kind())
            .field("checksum_ok", &self.verify_checksum())
            .finish()
    }
}
