// Swap manager: a bitmap of page-sized slots over the block device with
// the swap role. Slots are handed out by eviction and reclaimed by demand
// load or by descriptor teardown.
use alloc::boxed::Box;
use alloc::vec::Vec;
use spin::Mutex;
use x86_64::PhysAddr;

use crate::drivers::disk::{DiskDriver, SECTOR_SIZE};

use super::{frame_ptr, PAGE_SIZE};

pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

struct SwapState {
    device: Box<dyn DiskDriver>,
    bitmap: Vec<u64>,
    slots: usize,
    used: usize,
}

impl SwapState {
    fn bit(&self, slot: usize) -> bool {
        self.bitmap[slot / 64] & (1 << (slot % 64)) != 0
    }

    fn set_bit(&mut self, slot: usize) {
        self.bitmap[slot / 64] |= 1 << (slot % 64);
    }

    fn clear_bit(&mut self, slot: usize) {
        self.bitmap[slot / 64] &= !(1 << (slot % 64));
    }

    fn find_free(&self) -> Option<usize> {
        (0..self.slots).find(|&slot| !self.bit(slot))
    }
}

pub struct SwapTable {
    state: Mutex<SwapState>,
}

impl SwapTable {
    pub fn new(device: Box<dyn DiskDriver>) -> Self {
        let slots = device.total_sectors() as usize / SECTORS_PER_PAGE;
        let words = (slots + 63) / 64;
        let mut bitmap = Vec::with_capacity(words);
        bitmap.resize(words, 0);
        Self {
            state: Mutex::new(SwapState {
                device,
                bitmap,
                slots,
                used: 0,
            }),
        }
    }

    // Write the page at `kpage` out to a fresh slot. Swap exhaustion is a
    // capacity failure and panics.
    pub fn write_page(&self, kpage: PhysAddr) -> usize {
        let mut state = self.state.lock();
        let slot = state
            .find_free()
            .unwrap_or_else(|| panic!("out of swap slots"));
        state.set_bit(slot);
        state.used += 1;

        // SAFETY: the caller owns the frame for the duration of the write.
        let data = unsafe { core::slice::from_raw_parts(frame_ptr(kpage), PAGE_SIZE) };
        state
            .device
            .write_sectors(
                (slot * SECTORS_PER_PAGE) as u64,
                SECTORS_PER_PAGE as u32,
                data,
            )
            .expect("swap device write failed");
        slot
    }

    // Read `slot` back into `kpage`. Returns false if the slot index is out
    // of range or not in use. The bit is cleared only after the read
    // completes so the slot cannot be recycled under a reader.
    pub fn load_page(&self, slot: usize, kpage: PhysAddr) -> bool {
        let mut state = self.state.lock();
        if slot >= state.slots || !state.bit(slot) {
            return false;
        }

        // SAFETY: the caller owns the frame for the duration of the read.
        let buf = unsafe { core::slice::from_raw_parts_mut(frame_ptr(kpage), PAGE_SIZE) };
        state
            .device
            .read_sectors(
                (slot * SECTORS_PER_PAGE) as u64,
                SECTORS_PER_PAGE as u32,
                buf,
            )
            .expect("swap device read failed");

        state.clear_bit(slot);
        state.used -= 1;
        true
    }

    // Free a slot without reading it, for descriptor teardown.
    pub fn release(&self, slot: usize) {
        let mut state = self.state.lock();
        if slot < state.slots && state.bit(slot) {
            state.clear_bit(slot);
            state.used -= 1;
        }
    }

    // (used, total)
    pub fn stats(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.used, state.slots)
    }

    pub fn used_slots(&self) -> Vec<usize> {
        let state = self.state.lock();
        (0..state.slots).filter(|&slot| state.bit(slot)).collect()
    }
}
