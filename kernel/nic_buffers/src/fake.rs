//! An in-memory [`DmaAllocator`] for exercising drivers on a host.
//!
//! Regions are backed by heap memory and given synthetic physical addresses.
//! The allocator remembers every live region, so a simulated device can
//! read and write "physical" memory the way a bus master would.

use alloc::{boxed::Box, collections::BTreeMap, sync::Arc, vec, vec::Vec};
use spin::Mutex;
use zerocopy::AsBytes;
use crate::{BufferError, DmaAllocator, DmaMemory, PhysicalAddress, Result};

/// Where fake physical addresses start.
pub const FAKE_PHYS_BASE: usize = 0x1000_0000;
/// Where fake physical addresses start when the allocator hands out memory above 4 GiB.
pub const FAKE_HIGH_PHYS_BASE: usize = 0x1_0000_0000;

struct Region {
    /// Host address of the backing storage.
    host_addr: usize,
    size: usize,
}

struct FakeState {
    next_phys: usize,
    regions: BTreeMap<usize, Region>,
    /// How many more allocations may succeed; `None` means unlimited.
    remaining_successes: Option<usize>,
    /// How many upcoming allocations fail before normal service resumes.
    pending_failures: usize,
    total_allocations: usize,
}

/// A cloneable handle to a shared pool of fake DMA memory.
#[derive(Clone)]
pub struct FakeDmaAllocator {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDmaAllocator {
    pub fn new() -> FakeDmaAllocator {
        FakeDmaAllocator::with_phys_base(FAKE_PHYS_BASE)
    }

    /// Creates an allocator whose regions start at `phys_base`.
    pub fn with_phys_base(phys_base: usize) -> FakeDmaAllocator {
        FakeDmaAllocator {
            state: Arc::new(Mutex::new(FakeState {
                next_phys: phys_base,
                regions: BTreeMap::new(),
                remaining_successes: None,
                pending_failures: 0,
                total_allocations: 0,
            })),
        }
    }

    /// Lets the next `count` allocations succeed and fails every one after that.
    /// `None` removes the limit.
    pub fn fail_after(&self, count: Option<usize>) {
        self.state.lock().remaining_successes = count;
    }

    /// Fails the next `count` allocations, then behaves normally again.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().pending_failures = count;
    }

    /// The number of regions that have been allocated and not yet dropped.
    pub fn live_regions(&self) -> usize {
        self.state.lock().regions.len()
    }

    pub fn total_allocations(&self) -> usize {
        self.state.lock().total_allocations
    }

    /// Copies `out.len()` bytes starting at physical address `phys` into `out`.
    /// Returns false if the range is not inside a single live region.
    pub fn read_phys(&self, phys: usize, out: &mut [u8]) -> bool {
        match self.host_range(phys, out.len()) {
            Some(host) => {
                // SAFETY: the range lies within a live region's backing storage.
                unsafe { core::ptr::copy_nonoverlapping(host as *const u8, out.as_mut_ptr(), out.len()) };
                true
            }
            None => false,
        }
    }

    /// Copies `data` into memory starting at physical address `phys`.
    /// Returns false if the range is not inside a single live region.
    pub fn write_phys(&self, phys: usize, data: &[u8]) -> bool {
        match self.host_range(phys, data.len()) {
            Some(host) => {
                // SAFETY: the range lies within a live region's backing storage.
                unsafe { core::ptr::copy_nonoverlapping(data.as_ptr(), host as *mut u8, data.len()) };
                true
            }
            None => false,
        }
    }

    pub fn read_phys_u32(&self, phys: usize) -> Option<u32> {
        let mut bytes = [0u8; 4];
        self.read_phys(phys, &mut bytes).then(|| u32::from_le_bytes(bytes))
    }

    pub fn write_phys_u32(&self, phys: usize, value: u32) -> bool {
        self.write_phys(phys, &value.to_le_bytes())
    }

    fn host_range(&self, phys: usize, len: usize) -> Option<usize> {
        let state = self.state.lock();
        let (&start, region) = state.regions.range(..=phys).next_back()?;
        let offset = phys - start;
        (offset + len <= region.size).then(|| region.host_addr + offset)
    }
}

impl Default for FakeDmaAllocator {
    fn default() -> Self {
        FakeDmaAllocator::new()
    }
}

impl DmaAllocator for FakeDmaAllocator {
    fn allocate(&self, size_in_bytes: usize, alignment: usize) -> Result<Box<dyn DmaMemory>> {
        if size_in_bytes == 0 || !alignment.is_power_of_two() {
            return Err(BufferError::InvalidSize);
        }
        let mut state = self.state.lock();
        if state.pending_failures > 0 {
            state.pending_failures -= 1;
            return Err(BufferError::OutOfMemory);
        }
        match state.remaining_successes {
            Some(0) => return Err(BufferError::OutOfMemory),
            Some(ref mut n) => *n -= 1,
            None => { }
        }

        // u64 storage keeps the host-side view suitably aligned for descriptor casts.
        let mut words = vec![0u64; (size_in_bytes + 7) / 8];
        let phys = (state.next_phys + alignment - 1) & !(alignment - 1);
        state.next_phys = phys + words.len() * 8;
        state.total_allocations += 1;
        state.regions.insert(phys, Region { host_addr: words.as_mut_ptr() as usize, size: size_in_bytes });

        Ok(Box::new(FakeDmaMemory {
            words,
            size: size_in_bytes,
            phys: PhysicalAddress::new(phys),
            state: self.state.clone(),
        }))
    }
}

/// A region handed out by [`FakeDmaAllocator`].
pub struct FakeDmaMemory {
    words: Vec<u64>,
    size: usize,
    phys: PhysicalAddress,
    state: Arc<Mutex<FakeState>>,
}

impl DmaMemory for FakeDmaMemory {
    fn phys_addr(&self) -> PhysicalAddress {
        self.phys
    }

    fn as_slice(&self) -> &[u8] {
        &self.words.as_bytes()[..self.size]
    }

    fn as_slice_mut(&mut self) -> &mut [u8] {
        &mut self.words.as_bytes_mut()[..self.size]
    }
}

impl Drop for FakeDmaMemory {
    fn drop(&mut self) {
        self.state.lock().regions.remove(&self.phys.value());
    }
}
