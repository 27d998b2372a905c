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

use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicU8, AtomicUsize, Ordering};

use axerrno::{ax_err, AxResult};
use spin::Mutex;

use crate::cell::{CellId, ROOT_CELL};
use crate::exit::GuestPhysAddr;

/// Maximum number of physical CPUs the arenas are sized for.
pub const MAX_CPUS: usize = 64;

/// The lifecycle state of a physical CPU.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuState {
    /// The CPU executes partition code.
    Running = 0,
    /// A stop was requested, firmware has not confirmed it yet.
    Stopping = 1,
    /// The CPU sits in the firmware idle loop.
    Stopped = 2,
    /// Powered on at the reset entry, guest state not rebuilt yet.
    Resetting = 3,
    /// Quiescent after its cell was torn down, waiting for an explicit reset.
    Parked = 4,
}

impl CpuState {
    const fn from_u8(val: u8) -> Self {
        match val {
            0 => Self::Running,
            1 => Self::Stopping,
            2 => Self::Stopped,
            3 => Self::Resetting,
            _ => Self::Parked,
        }
    }

    /// Whether the CPU is known not to execute partition code.
    pub const fn is_quiescent(self) -> bool {
        matches!(self, Self::Stopped | Self::Parked)
    }
}

/// Per-CPU exit counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuStat {
    VmExitsTotal = 0,
    VmExitsManagement = 1,
    VmExitsMaintenance = 2,
    VmExitsVirq = 3,
}

const NUM_CPU_STATS: usize = 4;

/// The slot of one physical CPU.
///
/// All fields except the lifecycle state and the flush-pending flag are only written by the
/// CPU itself, or by the cell manager while the CPU is quiescent. Those two are the only fields
/// another CPU may write at any time.
pub struct PhysicalCpu {
    /// The id of the CPU. Fixed for the lifetime of the system.
    id: usize,
    /// Partition-local CPU index, `0..n` within the owning cell.
    virt_id: AtomicUsize,
    /// The owning cell. A back-reference resolved through the cell arena.
    cell: AtomicUsize,
    state: AtomicU8,
    stats: [AtomicU32; NUM_CPU_STATS],
    /// Set by a remote configuration commit, serviced on the next wake-up.
    flush_pending: AtomicBool,
    /// Entry address supplied by a driver CPU_ON request while the CPU spins in reset.
    entry: Mutex<Option<GuestPhysAddr>>,
    /// The control plane this slot belongs to, published before every power-on.
    plane: AtomicPtr<()>,
}

impl PhysicalCpu {
    /// Creates the slot of CPU `id`, running in the root cell with an identity virtual id.
    pub fn new(id: usize) -> Self {
        Self {
            id,
            virt_id: AtomicUsize::new(id),
            cell: AtomicUsize::new(ROOT_CELL),
            state: AtomicU8::new(CpuState::Running as u8),
            stats: [const { AtomicU32::new(0) }; NUM_CPU_STATS],
            flush_pending: AtomicBool::new(false),
            entry: Mutex::new(None),
            plane: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    /// Get the physical id of the CPU.
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Get the virtual id of the CPU within its cell.
    pub fn virt_id(&self) -> usize {
        self.virt_id.load(Ordering::Acquire)
    }

    pub(crate) fn set_virt_id(&self, virt_id: usize) {
        self.virt_id.store(virt_id, Ordering::Release);
    }

    /// Get the id of the owning cell.
    pub fn cell(&self) -> CellId {
        self.cell.load(Ordering::Acquire)
    }

    pub(crate) fn set_cell(&self, cell: CellId) {
        self.cell.store(cell, Ordering::Release);
    }

    /// Get the lifecycle state of the CPU.
    pub fn state(&self) -> CpuState {
        CpuState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Transition the state of the CPU. If the current state is not `from`, return an error.
    pub(crate) fn transition_state(&self, from: CpuState, to: CpuState) -> AxResult {
        if self.try_transition(from, to) {
            Ok(())
        } else {
            ax_err!(BadState, "unexpected CPU lifecycle state")
        }
    }

    /// Like [`PhysicalCpu::transition_state`], for callers that expect to lose the race.
    pub(crate) fn try_transition(&self, from: CpuState, to: CpuState) -> bool {
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            debug!("CPU{}: {:?} -> {:?}", self.id, from, to);
        }
        moved
    }

    /// Unconditionally set the state of the CPU.
    ///
    /// Only the CPU itself may call this, for the transitions it owns.
    pub(crate) fn set_state(&self, state: CpuState) {
        let prev = CpuState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        if prev != state {
            debug!("CPU{}: {:?} -> {:?}", self.id, prev, state);
        }
    }

    /// Read one of the exit counters.
    pub fn stat(&self, stat: CpuStat) -> u32 {
        self.stats[stat as usize].load(Ordering::Relaxed)
    }

    pub(crate) fn count(&self, stat: CpuStat) {
        self.stats[stat as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn clear_stats(&self) {
        for stat in &self.stats {
            stat.store(0, Ordering::Relaxed);
        }
    }

    /// Whether a deferred TLB flush is owed before the CPU runs partition code again.
    pub fn flush_pending(&self) -> bool {
        self.flush_pending.load(Ordering::Acquire)
    }

    pub(crate) fn request_flush(&self) {
        self.flush_pending.store(true, Ordering::Release);
    }

    pub(crate) fn flush_done(&self) {
        self.flush_pending.store(false, Ordering::Release);
    }

    pub(crate) fn post_entry(&self, entry: GuestPhysAddr) {
        *self.entry.lock() = Some(entry);
    }

    pub(crate) fn take_entry(&self) -> Option<GuestPhysAddr> {
        self.entry.lock().take()
    }

    pub(crate) fn set_plane(&self, plane: *const ()) {
        self.plane.store(plane as *mut (), Ordering::Release);
    }

    pub(crate) fn plane(&self) -> *const () {
        self.plane.load(Ordering::Acquire)
    }
}

impl core::fmt::Debug for PhysicalCpu {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PhysicalCpu")
            .field("id", &self.id)
            .field("virt_id", &self.virt_id())
            .field("cell", &self.cell())
            .field("state", &self.state())
            .field("flush_pending", &self.flush_pending())
            .finish()
    }
}
