//! Bulk DMA reachability.
//!
//! Bulk transfers are carried out by the host controller's DMA engine, and on some
//! hosts that engine only targets one arena of physical memory at cache-line
//! alignment. A class driver asks its [`DmaPolicy`] whether a caller's buffer can be
//! handed to a bulk pipe directly; buffers that fail the test are bounced through a
//! driver-owned [`AlignedBuf`] in chunks.

/// Decides whether a buffer may be targeted directly by bulk DMA.
pub trait DmaPolicy {
    /// Returns true when a buffer at `addr` spanning `len` bytes can be handed to a
    /// bulk pipe without staging.
    fn eligible(&self, addr: usize, len: usize) -> bool;

    /// Cache maintenance after the CPU copies staged IN data into a caller buffer.
    ///
    /// The DMA engine deposits bulk IN data beneath the cache, so once a driver
    /// copies it out of staging the destination region must be written back for
    /// cache-bypassing agents to observe the same bytes. Coherent hosts leave this
    /// as the no-op default.
    fn writeback(&self, buf: &[u8]) {
        let _ = buf;
    }
}

/// One contiguous DMA-reachable window with an alignment requirement.
///
/// Eligibility is a pure predicate of the buffer's address and length; the window
/// knows nothing about how memory inside it is allocated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DmaWindow {
    /// First address inside the window.
    pub start: usize,
    /// First address past the window.
    pub end: usize,
    /// Required buffer alignment, a power of two (typically the cache line).
    pub alignment: usize,
}

impl DmaWindow {
    pub fn new(start: usize, end: usize, alignment: usize) -> Self {
        debug_assert!(alignment.is_power_of_two());
        debug_assert!(start <= end);
        Self {
            start,
            end,
            alignment,
        }
    }
}

impl DmaPolicy for DmaWindow {
    fn eligible(&self, addr: usize, len: usize) -> bool {
        if addr % self.alignment != 0 {
            return false;
        }
        let Some(end) = addr.checked_add(len) else {
            return false;
        };
        addr >= self.start && end <= self.end
    }
}

/// Policy for hosts whose bulk DMA engine reaches all memory coherently.
#[derive(Clone, Copy, Debug, Default)]
pub struct CoherentDma;

impl DmaPolicy for CoherentDma {
    fn eligible(&self, _addr: usize, _len: usize) -> bool {
        true
    }
}

const CELL_SIZE: usize = 64;

#[repr(C, align(64))]
#[derive(Clone, Copy)]
struct AlignedCell([u8; CELL_SIZE]);

/// Fixed-capacity heap buffer aligned to 64 bytes.
///
/// Backs a driver's staging area: 64-byte alignment satisfies every cache-line
/// granularity bulk pipes are known to require, so the buffer itself always passes
/// an alignment check that any caller buffer might fail.
pub struct AlignedBuf {
    cells: Vec<AlignedCell>,
    len: usize,
}

impl AlignedBuf {
    /// Allocates a zeroed buffer of exactly `len` bytes.
    pub fn new(len: usize) -> Self {
        let cells = vec![AlignedCell([0; CELL_SIZE]); len.div_ceil(CELL_SIZE)];
        Self { cells, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `cells` owns at least `len.div_ceil(64)` contiguous initialized
        // 64-byte cells, so the first `len` bytes are initialized and in bounds, and
        // `u8` has no alignment requirement.
        unsafe { core::slice::from_raw_parts(self.cells.as_ptr().cast::<u8>(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: same bounds argument as `as_slice`; `&mut self` guarantees the
        // view is unique.
        unsafe { core::slice::from_raw_parts_mut(self.cells.as_mut_ptr().cast::<u8>(), self.len) }
    }
}

impl std::fmt::Debug for AlignedBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuf").field("len", &self.len).finish()
    }
}
