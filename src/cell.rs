// Copyright 2025 The Axvisor Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use axerrno::{ax_err, AxResult};
use memory_addr::PhysAddr;

use crate::pcpu::MAX_CPUS;

/// Index of a cell in the cell arena.
pub type CellId = usize;

/// The root cell. Always exists and owns every CPU not assigned elsewhere.
pub const ROOT_CELL: CellId = 0;

/// Maximum number of cells, the root cell included.
pub const MAX_CELLS: usize = 16;

/// Maximum number of memory regions per cell.
pub const MAX_MEM_REGIONS: usize = 32;

/// A set of physical CPUs, iterated in ascending id order.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuSet(u64);

impl CpuSet {
    /// The empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// The set `0..num_cpus`.
    pub const fn first(num_cpus: usize) -> Self {
        if num_cpus >= MAX_CPUS {
            Self(u64::MAX)
        } else {
            Self((1u64 << num_cpus) - 1)
        }
    }

    /// Builds a set from a raw bitmap, bit `n` standing for CPU `n`.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Get the raw bitmap.
    pub const fn bits(&self) -> u64 {
        self.0
    }

    pub const fn contains(&self, cpu: usize) -> bool {
        cpu < MAX_CPUS && self.0 & (1u64 << cpu) != 0
    }

    pub fn insert(&mut self, cpu: usize) {
        if cpu < MAX_CPUS {
            self.0 |= 1u64 << cpu;
        }
    }

    pub fn remove(&mut self, cpu: usize) {
        if cpu < MAX_CPUS {
            self.0 &= !(1u64 << cpu);
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Whether every member of `self` is also in `other`.
    pub const fn is_subset(&self, other: &CpuSet) -> bool {
        self.0 & !other.0 == 0
    }

    /// Iterate over the members in ascending order.
    pub fn iter(&self) -> CpuSetIter {
        CpuSetIter(self.0)
    }
}

impl FromIterator<usize> for CpuSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = Self::empty();
        for cpu in iter {
            set.insert(cpu);
        }
        set
    }
}

impl core::fmt::Debug for CpuSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Ascending iterator over a [`CpuSet`].
pub struct CpuSetIter(u64);

impl Iterator for CpuSetIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.0 == 0 {
            return None;
        }
        let cpu = self.0.trailing_zeros() as usize;
        self.0 &= self.0 - 1;
        Some(cpu)
    }
}

/// A physical memory region assigned to a cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemRegion {
    pub phys_start: PhysAddr,
    pub size: usize,
}

impl MemRegion {
    pub const fn new(phys_start: PhysAddr, size: usize) -> Self {
        Self { phys_start, size }
    }
}

/// What the configuration loader hands over for a new cell.
#[derive(Clone, Copy, Debug)]
pub struct CellConfig<'a> {
    pub cpu_set: CpuSet,
    pub mem_regions: &'a [MemRegion],
}

/// A partition.
///
/// The cell only refers to its CPUs by id; the CPUs outlive it. The address translation and
/// interrupt contexts belong to the collaborators and are keyed by [`Cell::id`].
#[derive(Clone, Debug)]
pub struct Cell {
    id: CellId,
    cpu_set: CpuSet,
    mem_regions: [MemRegion; MAX_MEM_REGIONS],
    num_mem_regions: usize,
    /// Highest virtual CPU id handed out in this cell.
    last_virt_id: usize,
}

impl Cell {
    pub(crate) fn new(id: CellId, config: &CellConfig) -> AxResult<Self> {
        if config.mem_regions.len() > MAX_MEM_REGIONS {
            return ax_err!(InvalidInput, "too many memory regions");
        }
        let mut mem_regions = [MemRegion::new(PhysAddr::from(0), 0); MAX_MEM_REGIONS];
        mem_regions[..config.mem_regions.len()].copy_from_slice(config.mem_regions);
        Ok(Self {
            id,
            cpu_set: config.cpu_set,
            mem_regions,
            num_mem_regions: config.mem_regions.len(),
            last_virt_id: config.cpu_set.len().saturating_sub(1),
        })
    }

    /// Get the id of the cell.
    pub const fn id(&self) -> CellId {
        self.id
    }

    /// Whether this is the root cell.
    pub const fn is_root(&self) -> bool {
        self.id == ROOT_CELL
    }

    /// Get the CPUs of the cell.
    pub const fn cpu_set(&self) -> CpuSet {
        self.cpu_set
    }

    pub(crate) fn cpu_set_mut(&mut self) -> &mut CpuSet {
        &mut self.cpu_set
    }

    /// Get the memory regions of the cell.
    pub fn mem_regions(&self) -> &[MemRegion] {
        &self.mem_regions[..self.num_mem_regions]
    }

    /// Get the highest virtual CPU id of the cell.
    pub const fn last_virt_id(&self) -> usize {
        self.last_virt_id
    }

    pub(crate) fn set_last_virt_id(&mut self, virt_id: usize) {
        self.last_virt_id = virt_id;
    }
}
