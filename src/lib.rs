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

//! AxCell - Partition and physical CPU control plane for ARM partitioning hypervisors.
//!
//! This crate owns every physical CPU's virtualization context, dispatches trapped guest
//! events, coordinates CPU power-state transitions through PSCI firmware, and manages the
//! lifecycle of isolated partitions ("cells") that share a fixed pool of CPUs and memory.
//!
//! The interrupt controller, the stage-2 translation tables, the firmware power interface and
//! the diagnostics console are provided by the host through the traits in [`AxCellHal`].
//!
//! # Features
//!
//! - Per-CPU lifecycle state machine (Running → Stopping → Stopped → Resetting / Parked)
//! - Exhaustive exit dispatch with a fatal default arm
//! - Cell create/destroy/reset with full unwinding on collaborator failure
//! - Deferred, per-CPU TLB flushing on configuration commits
//! - No heap allocation: fixed arenas indexed by CPU id and cell id

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;

// Core modules
mod cell; // Cell, CPU set and memory region types
mod dispatch; // Exit dispatcher and management signal handling
mod exit; // Exit reasons and the per-trap register snapshot
mod flush; // Cache/TLB flush coordinator
mod hal; // Collaborator interfaces the host must implement
mod lifecycle; // Physical CPU lifecycle controller
mod manager; // Cell lifecycle manager
mod pcpu; // Per physical CPU slot
mod plane; // The control plane object and its arenas
mod power; // PSCI power coordinator
mod regs; // Architectural register lists wiped on reset

// Public API exports
pub use cell::{Cell, CellConfig, CellId, CpuSet, MemRegion, MAX_CELLS, MAX_MEM_REGIONS, ROOT_CELL};
pub use dispatch::{ManagementSignal, MAINTENANCE_IRQ, SGI_CPU_OFF, SGI_INJECT};
pub use exit::{ExitContext, ExitReason, GuestPhysAddr, GuestRegs, NUM_USR_REGS};
pub use hal::{
    AddrTranslation, ArchRegs, AxCellHal, CpuEntry, DiagnosticSink, IrqChip, PowerBridge, Sgi,
    TrapEmulator, TrapOutcome,
};
pub use pcpu::{CpuStat, CpuState, PhysicalCpu, MAX_CPUS};
pub use plane::ControlPlane;
pub use power::PowerCoordinator;
pub use regs::{BankedReg, Psr, Sctlr, SysReg, BANKED_RESET_LIST, MPIDR_MP_BIT, SYSREG_RESET_LIST};
