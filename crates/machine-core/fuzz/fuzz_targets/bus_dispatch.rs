#![no_main]

use libfuzzer_sys::fuzz_target;
use machine_core::{
    Access, AccessWidth, Declarations, Device, DeviceContext, DeviceType, Endianness, Machine,
    MachineConfig, MapRange, MemoryDevice, SpaceConfig,
};

/// Register file that echoes the last write.
#[derive(Default)]
struct Echo {
    last: u64,
}

impl MemoryDevice for Echo {
    fn read(&mut self, _ctx: &mut DeviceContext<'_>, _map: u32, offset: u64, _mask: u64) -> u64 {
        self.last ^ offset
    }

    fn write(
        &mut self,
        _ctx: &mut DeviceContext<'_>,
        _map: u32,
        _offset: u64,
        data: u64,
        mem_mask: u64,
    ) {
        self.last = data & mem_mask;
    }
}

impl Device for Echo {
    fn device_type(&self) -> DeviceType {
        DeviceType::new("Echo", "echo")
    }

    fn declare(&self, decl: &mut Declarations) {
        decl.address_space(SpaceConfig::new("program", AccessWidth::Dword, 16, Endianness::Big));
    }

    fn memory(&mut self) -> Option<&mut dyn MemoryDevice> {
        Some(self)
    }
}

const WIDTHS: [AccessWidth; 4] = [
    AccessWidth::Byte,
    AccessWidth::Word,
    AccessWidth::Dword,
    AccessWidth::Qword,
];

fuzz_target!(|data: &[u8]| {
    let mut config = MachineConfig::default();
    config.device("echo", 0, Echo::default);
    let Ok(mut machine) = Machine::new(config) else {
        return;
    };
    if machine.start().is_err() {
        return;
    }
    let Some(space) = machine.space_id("echo", 0) else {
        return;
    };
    let Some(echo) = machine.find("echo") else {
        return;
    };

    for chunk in data.chunks_exact(6) {
        let op = chunk[0];
        let addr = u64::from(u16::from_le_bytes([chunk[1], chunk[2]]));
        let end = addr | u64::from(u16::from_le_bytes([chunk[3], chunk[4]]));
        let width = WIDTHS[usize::from(chunk[5] & 3)];
        let value = u64::from_le_bytes([chunk[5]; 8]);
        match op % 6 {
            0 => {
                if let Some(bus) = machine.space_mut(space) {
                    let _ = bus.install_ram(Access::ReadWrite, MapRange::new(addr, end));
                }
            }
            1 => {
                if let Some(bus) = machine.space_mut(space) {
                    let _ = bus.install_device(
                        Access::ReadWrite,
                        MapRange::new(addr, end).mirror(u64::from(chunk[4]) << 8),
                        echo,
                        0,
                        width,
                    );
                }
            }
            2 => {
                if let Some(bus) = machine.space_mut(space) {
                    let _ = bus.unmap(Access::Write, MapRange::new(addr, end));
                }
            }
            3 => {
                let _ = machine.read(space, addr, width);
            }
            4 => machine.write(space, addr, width, value),
            _ => {
                let _ = machine.read_debug(space, addr, width);
            }
        }
    }
    let _ = machine.dump_map(space, Access::Read);
});
