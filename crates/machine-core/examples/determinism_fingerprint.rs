//! Deterministic replay fingerprint generator used by CI cross-host comparison.
//!
//! Runs a small two-device machine, saves it halfway, restores the image into
//! a fresh machine and prints an FNV-1a hash of the final save image. Any
//! host that prints a different value schedules differently.

use machine_core::{
    Access, AccessWidth, Attotime, Declarations, Device, DeviceContext, DeviceType, Endianness,
    Executor, Machine, MachineConfig, MapRange, SpaceConfig, StateIo, TimerDevice,
};
use log as _;
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

/// Executor that stores a running checksum into its own RAM every eight cycles.
#[derive(Debug, Default)]
struct Scribbler {
    cursor: u64,
    sum: u32,
}

impl Executor for Scribbler {
    fn execute(&mut self, ctx: &mut DeviceContext<'_>, cycles: u64) -> u64 {
        let Some(space) = ctx.own_space(0) else {
            return cycles;
        };
        let steps = cycles.div_ceil(8);
        for _ in 0..steps {
            self.sum = self.sum.rotate_left(5) ^ u32::try_from(self.cursor).unwrap_or(0);
            ctx.write(space, self.cursor & 0x0FFF, AccessWidth::Word, u64::from(self.sum));
            self.cursor = (self.cursor + 2) & 0x0FFF;
        }
        steps * 8
    }

    fn max_step_cycles(&self) -> u64 {
        7
    }
}

impl Device for Scribbler {
    fn device_type(&self) -> DeviceType {
        DeviceType::new("Scribbler", "scribbler")
    }

    fn declare(&self, decl: &mut Declarations) {
        decl.address_space(SpaceConfig::new("program", AccessWidth::Word, 16, Endianness::Big));
    }

    fn state(&mut self, io: &mut StateIo<'_>) {
        io.item("cursor", &mut self.cursor);
        io.item("sum", &mut self.sum);
    }

    fn executor(&mut self) -> Option<&mut dyn Executor> {
        Some(self)
    }
}

fn build() -> Machine {
    let mut config = MachineConfig::default();
    config
        .device("cpu", 3_579_545, Scribbler::default)
        .device("vblank", 0, || TimerDevice::new(Attotime::from_hz(60)));
    let mut machine = Machine::new(config).expect("configuration should be valid");
    machine.start().expect("machine should start");
    let space = machine.space_id("cpu", 0).expect("program space");
    machine
        .space_mut(space)
        .expect("space")
        .install_ram(Access::ReadWrite, MapRange::new(0x0000, 0x0FFF))
        .expect("ram install");
    machine
}

fn hash_bytes(hash: &mut u64, bytes: &[u8]) {
    for byte in bytes {
        *hash ^= u64::from(*byte);
        *hash = hash.wrapping_mul(0x1000_0000_01B3);
    }
}

fn fingerprint() -> String {
    let mut first = build();
    first
        .run_until(Attotime::from_msec(50))
        .expect("run should succeed");
    let image = first.save_state().expect("save should succeed").to_bytes();

    let mut second = build();
    second.restore_bytes(&image).expect("restore should succeed");
    second
        .run_until(Attotime::from_msec(100))
        .expect("run should succeed");

    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    hash_bytes(&mut hash, &second.save_state().expect("save should succeed").to_bytes());
    let pulses = second
        .device_by_tag::<TimerDevice>("vblank")
        .map_or(0, TimerDevice::pulses);
    hash_bytes(&mut hash, &pulses.to_le_bytes());
    format!("{hash:016x}")
}

fn main() {
    println!("{}", fingerprint());
}
