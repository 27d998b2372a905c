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

//! Physical CPU lifecycle controller.
//!
//! ```text
//!            suspend / CPU-off SGI             park
//! Running ───────────────────────▶ Stopping ──▶ Stopped ──────▶ Parked
//!    ▲                                           │   │             │
//!    └───────────────── resume ──────────────────┘   └── reset ────┤
//!    ▲                                                             ▼
//!    └──────────────── entry address posted ───────────────── Resetting
//! ```
//!
//! A CPU only moves itself out of `Stopping` and out of `Resetting`; the transitions out of
//! `Stopped` and `Parked` are made by the CPU driving the operation.

use axerrno::{ax_err, AxResult};

use crate::dispatch::SGI_CPU_OFF;
use crate::exit::GuestRegs;
use crate::hal::{AddrTranslation, ArchRegs, AxCellHal, IrqChip, Sgi};
use crate::pcpu::{CpuState, PhysicalCpu};
use crate::plane::ControlPlane;
use crate::regs::{self, BankedReg, Psr, SysReg, MPIDR_MP_BIT};

/// Power-on entry of a CPU being reset. `arg` is the address of its [`PhysicalCpu`] slot.
fn reset_entry<H: AxCellHal>(arg: usize) -> ! {
    // SAFETY: `reset` passes the address of a slot inside the control plane and publishes the
    // plane's address in that slot before powering the CPU on. The plane never moves or goes
    // away after boot.
    let cpu = unsafe { &*(arg as *const PhysicalCpu) };
    let plane = unsafe { &*(cpu.plane() as *const ControlPlane<H>) };
    plane.self_reset(cpu.id())
}

impl<H: AxCellHal> ControlPlane<H> {
    /// Wake a stopped CPU from the firmware idle loop. Register state is left untouched.
    ///
    /// Does nothing if the CPU is not `Stopped`, e.g. because a reset already took it out of
    /// the idle loop. A CPU recorded as `Stopped` may not have reached the idle loop yet; it is
    /// waited for. If the firmware never reports it idle the CPU stays `Stopped`.
    pub fn resume(&self, cpu_id: usize) {
        let Some(cpu) = self.cpu(cpu_id) else {
            warn!("resume: no CPU{}", cpu_id);
            return;
        };
        if !cpu.try_transition(CpuState::Stopped, CpuState::Running) {
            return;
        }
        let power = self.power();
        if !power.is_stopped(cpu) && !power.wait_stopped(cpu) {
            error!("CPU{} is recorded as stopped but does not idle in firmware", cpu_id);
            cpu.try_transition(CpuState::Running, CpuState::Stopped);
            return;
        }
        power.resume(cpu);
    }

    /// Wait until a CPU whose stop was already requested is stopped, then mark it parked.
    ///
    /// A failed wait means the firmware and this crate disagree about the CPU. That is
    /// reported, but does not affect the calling CPU.
    pub fn park(&self, cpu_id: usize) -> AxResult {
        let cpu = self.pcpu(cpu_id)?;
        if cpu.state() == CpuState::Parked {
            return Ok(());
        }
        if !self.power().wait_stopped(cpu) {
            error!("CPU{} is supposed to be stopped", cpu_id);
            return ax_err!(BadState, "CPU did not stop");
        }
        cpu.transition_state(CpuState::Stopped, CpuState::Parked)
    }

    /// Power a stopped or parked CPU on at the reset routine.
    ///
    /// Returns as soon as the firmware accepted the request. The CPU then runs
    /// [`ControlPlane::self_reset`] on its own.
    pub fn reset(&self, cpu_id: usize) -> AxResult {
        let cpu = self.pcpu(cpu_id)?;
        let prev = cpu.state();
        if !prev.is_quiescent() {
            error!("refusing to reset CPU{} in state {:?}", cpu_id, prev);
            return ax_err!(BadState, "CPU must be stopped before reset");
        }
        cpu.transition_state(prev, CpuState::Resetting)?;

        // Only an entry posted after this reset may start the CPU.
        cpu.take_entry();
        cpu.set_plane(self as *const Self as *const ());
        let arg = cpu as *const PhysicalCpu as usize;
        if !self.power().cpu_on(cpu, reset_entry::<H>, arg) {
            error!("unable to reset CPU{} (was running)", cpu_id);
            cpu.try_transition(CpuState::Resetting, prev);
            return ax_err!(BadState, "firmware refused to power on CPU");
        }
        Ok(())
    }

    /// Stop another CPU and wait until it sits in the firmware idle loop.
    ///
    /// A CPU in partition code is sent the CPU-off SGI; a CPU still waiting in the reset
    /// routine notices the request by itself. Does nothing if the CPU is already stopped.
    pub fn suspend(&self, cpu_id: usize) -> AxResult {
        let cpu = self.pcpu(cpu_id)?;
        if cpu.state().is_quiescent() {
            return Ok(());
        }
        if self.power().is_stopped(cpu) {
            let state = cpu.state();
            if state != CpuState::Stopping {
                warn!("CPU{} idles in firmware but is recorded as {:?}", cpu_id, state);
            }
            cpu.try_transition(state, CpuState::Stopped);
            return Ok(());
        }

        let signal = loop {
            match cpu.state() {
                CpuState::Stopped | CpuState::Parked => return Ok(()),
                CpuState::Stopping => break false,
                state @ (CpuState::Running | CpuState::Resetting) => {
                    if cpu.try_transition(state, CpuState::Stopping) {
                        break state == CpuState::Running;
                    }
                }
            }
        };

        if signal {
            self.hal.irqchip().send_sgi(Sgi {
                routing_mode: 0,
                aff1: 0,
                aff2: 0,
                aff3: 0,
                targets: 1 << cpu_id,
                id: SGI_CPU_OFF,
            });
        }

        if !self.power().wait_stopped(cpu) {
            error!("CPU{} did not stop", cpu_id);
            return ax_err!(BadState, "CPU did not stop");
        }
        Ok(())
    }

    /// Reset routine of the calling CPU, entered from the firmware after [`ControlPlane::reset`].
    ///
    /// Waits for the cell's driver to post an entry address, rebuilds an empty guest context
    /// and enters the guest there. Only reached through the power-on entry, with the id of the
    /// CPU it runs on.
    pub fn self_reset(&self, cpu_id: usize) -> ! {
        let cpu = &self.cpus[cpu_id];
        let irqchip = self.hal.irqchip();

        self.hal.paging().vcpu_init(cpu);
        self.service_pending_flush(cpu);

        // We come from the SGI handler but never return there.
        irqchip.eoi_irq(SGI_CPU_OFF, true);
        irqchip.cpu_reset(cpu);

        let power = self.power();
        let entry = power.spin_until(|| {
            if cpu.state() == CpuState::Stopping {
                power.suspend_self(cpu);
                cpu.set_state(CpuState::Resetting);
            }
            cpu.take_entry()
        });

        let arch = self.hal.regs();
        arch.write_sysreg(SysReg::Vmpidr, cpu.virt_id() as u64 | MPIDR_MP_BIT);

        let guest = GuestRegs::default();
        regs::reset_el1(arch);
        arch.write_banked(BankedReg::ElrHyp, entry.as_usize());
        arch.write_banked(BankedReg::SpsrHyp, Psr::RESET.bits() as usize);

        info!("CPU{} (virtual {}) starts at {:#x}", cpu_id, cpu.virt_id(), entry.as_usize());
        cpu.set_state(CpuState::Running);
        arch.vm_return(&guest)
    }

    /// Handle the CPU-off SGI on the calling CPU: sit in the firmware idle loop until resumed.
    ///
    /// A flush requested while the CPU was away is performed before returning to the guest.
    pub(crate) fn self_suspend(&self, cpu: &PhysicalCpu) {
        // Already `Stopping` when requested through `suspend`.
        cpu.try_transition(CpuState::Running, CpuState::Stopping);
        self.power().suspend_self(cpu);
        self.service_pending_flush(cpu);
    }

    /// Take the calling CPU offline after a fatal condition elsewhere. Other CPUs are left
    /// alone.
    ///
    /// Panics if `cpu_id` is not below [`MAX_CPUS`](crate::MAX_CPUS).
    pub fn panic_park(&self, cpu_id: usize) -> ! {
        let cpu = &self.cpus[cpu_id];
        error!("parking CPU{}", cpu_id);
        cpu.set_state(CpuState::Parked);
        self.power().cpu_off(cpu)
    }
}
