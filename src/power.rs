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

use crate::hal::{CpuEntry, PowerBridge};
use crate::pcpu::{CpuState, PhysicalCpu};

/// Synchronous power-state primitives on top of the PSCI bridge.
///
/// The coordinator keeps each CPU's lifecycle field in step with what the firmware reports:
/// a CPU is recorded as [`CpuState::Stopped`] exactly when it enters the firmware idle loop or
/// when the firmware confirms that it did.
pub struct PowerCoordinator<'a, P: PowerBridge> {
    bridge: &'a P,
}

impl<'a, P: PowerBridge> PowerCoordinator<'a, P> {
    /// Wrap a firmware bridge.
    pub const fn new(bridge: &'a P) -> Self {
        Self { bridge }
    }

    /// Whether the firmware reports `cpu` as idle.
    pub fn is_stopped(&self, cpu: &PhysicalCpu) -> bool {
        self.bridge.is_stopped(cpu.id())
    }

    /// Block until `cpu` has entered the firmware idle loop.
    ///
    /// A `Stopping` CPU is recorded as `Stopped` once the firmware confirms it. Returns
    /// `false` if the firmware could not confirm the stop.
    pub fn wait_stopped(&self, cpu: &PhysicalCpu) -> bool {
        if !self.bridge.wait_stopped(cpu.id()) {
            return false;
        }
        // The target may already have recorded this itself.
        cpu.try_transition(CpuState::Stopping, CpuState::Stopped);
        true
    }

    /// Power on `cpu` at `entry` with `arg`. Returns `false` if the CPU was not off.
    pub fn cpu_on(&self, cpu: &PhysicalCpu, entry: CpuEntry, arg: usize) -> bool {
        self.bridge.cpu_on(cpu.id(), entry, arg)
    }

    /// Release `cpu` from the firmware idle loop.
    pub fn resume(&self, cpu: &PhysicalCpu) {
        self.bridge.resume(cpu.id());
    }

    /// Enter the firmware idle loop on the calling CPU. Returns once woken up.
    pub fn suspend_self(&self, cpu: &PhysicalCpu) {
        cpu.set_state(CpuState::Stopped);
        self.bridge.suspend(cpu);
    }

    /// Power off the calling CPU.
    pub fn cpu_off(&self, cpu: &PhysicalCpu) -> ! {
        self.bridge.cpu_off(cpu)
    }

    /// Spin until `poll` yields a value, giving the firmware a chance to idle the core
    /// between polls.
    ///
    /// There is no timeout: whoever is expected to produce the value bounds the wait.
    pub fn spin_until<T>(&self, mut poll: impl FnMut() -> Option<T>) -> T {
        loop {
            if let Some(val) = poll() {
                return val;
            }
            self.bridge.idle();
        }
    }
}
