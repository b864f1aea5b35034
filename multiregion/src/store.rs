//! Persistent session store
//!
//! All region sessions live in one image at a fixed flash page:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | magic `0xDEADBEEF` |
//! | 4 | 1 | version |
//! | 5 | 1 | active slot (0xFF = none) |
//! | 6 | 1 | number of valid contexts |
//! | 7 | 1 | reserved |
//! | 8 | 6 × 80 | session records |
//! | 488 | 4 | CRC-32 over bytes 0..488 |
//!
//! A commit erases the page and programs it again. Power loss in between
//! leaves an erased page, which loads as "no store".

use embedded_storage::nor_flash::{NorFlash, NorFlashError};

use crate::{
    context::{RegionContext, RECORD_SIZE},
    error::StoreError,
    integrity,
    lorawan::region::Region,
};

/// Store image magic
pub const MAGIC: u32 = 0xDEAD_BEEF;
/// Current image version
pub const VERSION: u8 = 1;
/// Number of session slots
pub const MAX_CONTEXTS: usize = 6;
/// Stored active slot value meaning "none"
pub const NO_ACTIVE_SLOT: u8 = 0xFF;
/// Size of the flash page reserved for the store
pub const PAGE_SIZE: usize = 2048;

const HEADER_SIZE: usize = 8;
const CONTEXTS_OFFSET: usize = HEADER_SIZE;
const CRC_OFFSET: usize = CONTEXTS_OFFSET + MAX_CONTEXTS * RECORD_SIZE;
/// Bytes programmed on commit, padded with the erased value
pub const IMAGE_SIZE: usize = 512;

/// Flash image buffer, aligned for drivers that program 8 bytes at a time
#[repr(C, align(8))]
pub struct AlignedImage(pub [u8; IMAGE_SIZE]);

impl AlignedImage {
    /// An erased image
    pub const fn erased() -> Self {
        Self([0xFF; IMAGE_SIZE])
    }
}

/// How a store image was recovered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// Image CRC matched
    Intact,
    /// Image CRC mismatched; individually valid records were kept
    Salvaged {
        /// Populated records that failed their own CRC and were cleared
        dropped: usize,
    },
}

/// In-memory session store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStore {
    active_slot: Option<usize>,
    contexts: [RegionContext; MAX_CONTEXTS],
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// A fresh store with every slot empty and no active slot
    pub const fn new() -> Self {
        const EMPTY: RegionContext = RegionContext::empty();
        Self {
            active_slot: None,
            contexts: [EMPTY; MAX_CONTEXTS],
        }
    }

    /// Index of the active slot
    pub fn active_slot(&self) -> Option<usize> {
        self.active_slot
    }

    /// Make `slot` active. Only a valid slot can become active; returns
    /// whether the change was applied.
    pub fn set_active_slot(&mut self, slot: Option<usize>) -> bool {
        match slot {
            None => {
                self.active_slot = None;
                true
            }
            Some(i) if self.contexts.get(i).is_some_and(RegionContext::is_valid) => {
                self.active_slot = Some(i);
                true
            }
            Some(_) => false,
        }
    }

    /// Region of the active slot
    pub fn active_region(&self) -> Option<Region> {
        self.active_slot
            .and_then(|i| self.contexts.get(i))
            .and_then(|ctx| ctx.region)
    }

    /// Number of valid records
    pub fn num_valid(&self) -> usize {
        self.contexts.iter().filter(|c| c.is_valid()).count()
    }

    /// Record in `slot`
    pub fn context(&self, slot: usize) -> Option<&RegionContext> {
        self.contexts.get(slot)
    }

    /// Mutable record in `slot`
    pub fn context_mut(&mut self, slot: usize) -> Option<&mut RegionContext> {
        self.contexts.get_mut(slot)
    }

    /// All slots
    pub fn contexts(&self) -> &[RegionContext] {
        &self.contexts
    }

    /// Slot holding a populated session for `region`
    pub fn find_slot(&self, region: Region) -> Option<usize> {
        self.contexts
            .iter()
            .position(|c| c.region == Some(region) && c.is_populated())
    }

    /// Slot to write `region`'s session into.
    ///
    /// Reuses the region's own slot, then the first empty one. A full store
    /// only happens with sessions of regions that are no longer managed, e.g.
    /// a store written by firmware with a different region set. Then an
    /// inactive slot is cleared and returned: unmanaged regions go first,
    /// oldest by `now` within each group.
    pub fn allocate_slot(&mut self, region: Region, now: u32) -> Option<usize> {
        if let Some(i) = self.contexts.iter().position(|c| c.region == Some(region)) {
            return Some(i);
        }
        if let Some(i) = self.contexts.iter().position(|c| !c.is_populated()) {
            return Some(i);
        }

        // ticks wrap, so age is measured back from `now`
        let victim = self
            .contexts
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != self.active_slot)
            .max_by_key(|(_, c)| {
                let unmanaged = !c.region.is_some_and(Region::is_managed);
                (unmanaged, now.wrapping_sub(c.last_used))
            })
            .map(|(i, _)| i)?;
        if let Some(evicted) = self.contexts[victim].region {
            info!("Evicting {} session from slot {}", evicted.name(), victim);
        }
        self.contexts[victim] = RegionContext::empty();
        Some(victim)
    }

    /// Empty every slot and clear the active slot
    pub fn clear_all(&mut self) {
        *self = Self::new();
    }

    /// Encode into a flash image with the image CRC embedded
    pub fn encode(&self, image: &mut [u8; IMAGE_SIZE]) {
        image.fill(0xFF);
        image[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        image[4] = VERSION;
        image[5] = self.active_slot.map_or(NO_ACTIVE_SLOT, |i| i as u8);
        image[6] = self.num_valid() as u8;
        image[7] = 0;
        for (i, ctx) in self.contexts.iter().enumerate() {
            let at = CONTEXTS_OFFSET + i * RECORD_SIZE;
            image[at..at + RECORD_SIZE].copy_from_slice(&ctx.encode());
        }
        integrity::seal_crc32(image, CRC_OFFSET);
    }

    /// Decode a flash image.
    ///
    /// Returns `None` when the magic or version does not match. An image
    /// CRC mismatch keeps every record that passes its own CRC and clears
    /// the rest.
    pub fn decode(image: &[u8; IMAGE_SIZE]) -> Option<(Self, LoadStatus)> {
        let magic = u32::from_le_bytes([image[0], image[1], image[2], image[3]]);
        if magic != MAGIC {
            debug!("No session store (magic {:X})", magic);
            return None;
        }
        if image[4] != VERSION {
            warn!("Session store version {} unsupported", image[4]);
            return None;
        }

        let mut store = Self::new();
        for (i, ctx) in store.contexts.iter_mut().enumerate() {
            let at = CONTEXTS_OFFSET + i * RECORD_SIZE;
            let mut record = [0u8; RECORD_SIZE];
            record.copy_from_slice(&image[at..at + RECORD_SIZE]);
            *ctx = RegionContext::decode(&record);
        }

        let status = if integrity::check_crc32(image, CRC_OFFSET) {
            LoadStatus::Intact
        } else {
            let mut dropped = 0;
            for ctx in store.contexts.iter_mut() {
                if ctx.is_populated() && !ctx.crc_valid() {
                    dropped += 1;
                }
                if !ctx.is_valid() {
                    *ctx = RegionContext::empty();
                }
            }
            warn!("Session store CRC mismatch, dropped {} records", dropped);
            LoadStatus::Salvaged { dropped }
        };

        store.drop_duplicates();

        store.active_slot = match image[5] {
            NO_ACTIVE_SLOT => None,
            slot => Some(slot as usize),
        };
        if let Some(slot) = store.active_slot {
            if !store.contexts.get(slot).is_some_and(RegionContext::is_valid) {
                warn!("Active slot {} invalid, clearing", slot);
                store.active_slot = None;
            }
        }

        Some((store, status))
    }

    /// Keep at most one populated slot per region, preferring the most
    /// recently used.
    fn drop_duplicates(&mut self) {
        for i in 0..MAX_CONTEXTS {
            for j in (i + 1)..MAX_CONTEXTS {
                let (a, b) = (&self.contexts[i], &self.contexts[j]);
                if a.region.is_none() || a.region != b.region || !a.is_populated() || !b.is_populated() {
                    continue;
                }
                let stale = if b.last_used > a.last_used { i } else { j };
                warn!("Duplicate session slots {} and {}, dropping {}", i, j, stale);
                self.contexts[stale] = RegionContext::empty();
            }
        }
    }
}

/// Session store persisted to a NOR flash page
pub struct FlashStore<F: NorFlash> {
    flash: F,
    offset: u32,
    image: AlignedImage,
}

impl<F: NorFlash> FlashStore<F> {
    /// Bind the store to the page at `offset`
    pub fn new(flash: F, offset: u32) -> Result<Self, StoreError> {
        let start = offset as usize;
        if start % F::READ_SIZE != 0 || start % F::WRITE_SIZE != 0 || start % F::ERASE_SIZE != 0 {
            return Err(StoreError::Misaligned);
        }
        if IMAGE_SIZE % F::READ_SIZE != 0 || IMAGE_SIZE % F::WRITE_SIZE != 0 {
            return Err(StoreError::Misaligned);
        }
        let end = start
            .checked_add(erase_span::<F>())
            .ok_or(StoreError::OutOfBounds)?;
        if end > flash.capacity() {
            return Err(StoreError::OutOfBounds);
        }
        Ok(Self {
            flash,
            offset,
            image: AlignedImage::erased(),
        })
    }

    /// Flash address of the store page
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Read and decode the stored image, `None` if there is no usable store
    pub fn load(&mut self) -> Result<Option<(SessionStore, LoadStatus)>, StoreError> {
        self.flash
            .read(self.offset, &mut self.image.0)
            .map_err(|e| StoreError::Flash(e.kind()))?;
        Ok(SessionStore::decode(&self.image.0))
    }

    /// Erase the page and program `store` into it
    pub fn commit(&mut self, store: &SessionStore) -> Result<(), StoreError> {
        store.encode(&mut self.image.0);
        let end = self.offset + erase_span::<F>() as u32;
        self.flash
            .erase(self.offset, end)
            .map_err(|e| StoreError::Flash(e.kind()))?;
        self.flash
            .write(self.offset, &self.image.0)
            .map_err(|e| StoreError::Flash(e.kind()))?;
        trace!("Session store committed at {:X}", self.offset);
        Ok(())
    }

    /// Underlying flash
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Give the flash back
    pub fn release(self) -> F {
        self.flash
    }
}

fn erase_span<F: NorFlash>() -> usize {
    PAGE_SIZE.div_ceil(F::ERASE_SIZE) * F::ERASE_SIZE
}
