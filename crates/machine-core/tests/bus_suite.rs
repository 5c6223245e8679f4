//! Address space dispatch through a running machine.

mod common;

use common::{latch_machine_config, Board, Latch, Mapper};
use machine_core::memory::{BankId, HandlerKind};
use machine_core::{
    Access, AccessWidth, Device, DeviceContext, DeviceType, Endianness, FaultReason, Machine,
    MachineConfig, MapRange, MemoryDevice, SpaceId,
};
use proptest::prelude::*;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use log as _;
use thiserror as _;

fn started(config: MachineConfig) -> Machine {
    let mut machine = Machine::new(config).expect("configuration should be valid");
    machine.start().expect("machine should start");
    machine
}

fn program(machine: &Machine) -> SpaceId {
    machine.space_id("board", 0).expect("board declares a program space")
}

fn install_latch(machine: &mut Machine, start: u64, end: u64, width: AccessWidth) {
    let space = program(machine);
    let latch = machine.find("latch").expect("latch");
    machine
        .space_mut(space)
        .expect("space")
        .install_device(Access::ReadWrite, MapRange::new(start, end), latch, 0, width)
        .expect("install should succeed");
}

#[test]
fn unmapped_reads_return_open_bus() {
    let mut machine = started(latch_machine_config());
    install_latch(&mut machine, 0x1000, 0x1FFF, AccessWidth::Byte);
    let space = program(&machine);

    assert_eq!(machine.read(space, 0x1000, AccessWidth::Byte), 0xAA);
    assert_eq!(machine.read(space, 0x2000, AccessWidth::Byte), 0xFF);
    assert_eq!(machine.diagnostics().unmapped_reads, 1);
    assert_eq!(machine.device_by_tag::<Latch>("latch").expect("latch").reads, 1);
}

#[test]
fn open_bus_value_is_configurable() {
    let mut config = MachineConfig::default();
    config.device("board", 0, || {
        Board::new(AccessWidth::Word, Endianness::Little).with_open_bus(0x5A5A)
    });
    let mut machine = started(config);
    let space = program(&machine);
    assert_eq!(machine.read(space, 0x40, AccessWidth::Word), 0x5A5A);
    assert_eq!(machine.read(space, 0x41, AccessWidth::Byte), 0x5A);
}

#[test]
fn handlers_installed_during_an_access_only_affect_later_accesses() {
    let mut config = latch_machine_config();
    config.device("mapper", 0, Mapper::new);
    let mut machine = started(config);
    let space = program(&machine);
    let mapper = machine.find("mapper").expect("mapper");
    let latch = machine.find("latch").expect("latch");
    machine
        .device_mut::<Latch>(latch)
        .expect("latch")
        .regs = vec![0x77];
    {
        let bus = machine.space_mut(space).expect("space");
        bus.install_device(
            Access::ReadWrite,
            MapRange::new(0x1F00, 0x1FFF),
            mapper,
            0,
            AccessWidth::Byte,
        )
        .expect("mapper install");
        bus.install_device(
            Access::ReadWrite,
            MapRange::new(0x2000, 0x20FF),
            latch,
            0,
            AccessWidth::Byte,
        )
        .expect("latch install");
    }

    assert_eq!(machine.read(space, 0x1FFF, AccessWidth::Word), 0x7711);
    assert_eq!(machine.diagnostics().split_accesses, 1);
    assert_eq!(machine.read(space, 0x2000, AccessWidth::Byte), 0x5A);
    assert_eq!(machine.handler_name(space, Access::Read, 0x2000), "rom");
    assert_eq!(machine.handler_name(space, Access::Write, 0x2000), "device");
}

#[rstest]
#[case::little(Endianness::Little, [0xCD, 0xAB])]
#[case::big(Endianness::Big, [0xAB, 0xCD])]
fn byte_handlers_on_a_word_bus_follow_lane_order(
    #[case] endianness: Endianness,
    #[case] expected: [u64; 2],
) {
    let mut config = MachineConfig::default();
    config
        .device("board", 0, move || Board::new(AccessWidth::Word, endianness))
        .device("latch", 0, Latch::default);
    let mut machine = started(config);
    install_latch(&mut machine, 0x0000, 0x00FF, AccessWidth::Byte);
    let space = program(&machine);

    machine.write(space, 0x10, AccessWidth::Word, 0xABCD);

    let latch = machine.device_by_tag::<Latch>("latch").expect("latch");
    assert_eq!(latch.regs[16], expected[0]);
    assert_eq!(latch.regs[17], expected[1]);
    assert_eq!(machine.read(space, 0x10, AccessWidth::Word), 0xABCD);
}

#[rstest]
fn ram_round_trips_every_width(
    #[values(AccessWidth::Byte, AccessWidth::Word, AccessWidth::Dword, AccessWidth::Qword)]
    width: AccessWidth,
    #[values(Endianness::Little, Endianness::Big)] endianness: Endianness,
) {
    let mut config = MachineConfig::default();
    config.device("board", 0, move || Board::new(AccessWidth::Dword, endianness));
    let mut machine = started(config);
    let space = program(&machine);
    machine
        .space_mut(space)
        .expect("space")
        .install_ram(Access::ReadWrite, MapRange::new(0x0000, 0x0FFF))
        .expect("ram install");

    let value = 0x0123_4567_89AB_CDEF & width.mask();
    machine.write(space, 0x100, width, value);
    assert_eq!(machine.read(space, 0x100, width), value);
    assert_eq!(machine.read(space, 0x200, width), 0);
}

#[test]
fn lane_masked_handler_leaves_other_lanes_open() {
    let mut config = MachineConfig::default();
    config
        .device("board", 0, || Board::new(AccessWidth::Word, Endianness::Little))
        .device("latch", 0, || Latch::with_regs(&[0x42]));
    let mut machine = started(config);
    let space = program(&machine);
    let latch = machine.find("latch").expect("latch");
    machine
        .space_mut(space)
        .expect("space")
        .install_device_lanes(
            Access::ReadWrite,
            MapRange::new(0x0000, 0x00FF),
            latch,
            0,
            AccessWidth::Byte,
            0x00FF,
        )
        .expect("install");

    assert_eq!(machine.read(space, 0x0000, AccessWidth::Word), 0xFF42);
}

#[test]
fn debug_reads_have_no_side_effects() {
    let mut machine = started(latch_machine_config());
    install_latch(&mut machine, 0x1000, 0x1FFF, AccessWidth::Byte);
    let space = program(&machine);

    assert_eq!(machine.read_debug(space, 0x1003, AccessWidth::Byte), 0xAA);
    assert_eq!(machine.read_debug(space, 0x3000, AccessWidth::Byte), 0xFF);
    assert_eq!(machine.device_by_tag::<Latch>("latch").expect("latch").reads, 0);
    assert_eq!(machine.diagnostics().unmapped_reads, 0);
    assert!(!machine.side_effects_disabled());
}

#[test]
fn handler_reaching_its_own_range_faults() {
    let mut config = latch_machine_config();
    config.device("mapper", 0, Mapper::new);
    let mut machine = started(config);
    let space = program(&machine);
    let mapper = machine.find("mapper").expect("mapper");
    machine
        .space_mut(space)
        .expect("space")
        .install_device(
            Access::ReadWrite,
            MapRange::new(0x1F00, 0x1FFF),
            mapper,
            0,
            AccessWidth::Byte,
        )
        .expect("install");

    machine.write(space, 0x1F00, AccessWidth::Byte, 1);

    let fault = machine.latched_fault().expect("fault latched");
    assert_eq!(fault.tag, ":mapper");
    assert_eq!(fault.reason, FaultReason::Reentrant);
}

#[test]
fn mirrored_and_masked_ranges_share_one_handler() {
    let mut machine = started(latch_machine_config());
    let space = program(&machine);
    let latch = machine.find("latch").expect("latch");
    machine
        .space_mut(space)
        .expect("space")
        .install_device(
            Access::Read,
            MapRange::new(0x4000, 0x400F).mirror(0x0100).mask(0x3),
            latch,
            0,
            AccessWidth::Byte,
        )
        .expect("install");
    machine
        .device_mut::<Latch>(latch)
        .expect("latch")
        .regs = vec![1, 2, 3, 4];

    assert_eq!(machine.read(space, 0x4001, AccessWidth::Byte), 2);
    assert_eq!(machine.read(space, 0x4105, AccessWidth::Byte), 2);
    assert_eq!(machine.read(space, 0x400B, AccessWidth::Byte), 4);
}

#[test]
fn later_installs_shadow_earlier_ones() {
    let mut machine = started(latch_machine_config());
    install_latch(&mut machine, 0x1000, 0x1FFF, AccessWidth::Byte);
    let space = program(&machine);
    {
        let bus = machine.space_mut(space).expect("space");
        bus.install_nop(Access::ReadWrite, MapRange::new(0x1800, 0x18FF))
            .expect("nop install");
        bus.unmap(Access::Write, MapRange::new(0x1900, 0x19FF))
            .expect("unmap");
    }

    let spans = machine.dump_map(space, Access::Read);
    let kinds: Vec<(u64, u64, &str)> = spans
        .iter()
        .map(|span| (span.start, span.end, span.entry.kind.name()))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (0x0000, 0x0FFF, "unmapped"),
            (0x1000, 0x17FF, "device"),
            (0x1800, 0x18FF, "nop"),
            (0x1900, 0x1FFF, "device"),
            (0x2000, 0xFFFF, "unmapped"),
        ]
    );
    assert_eq!(machine.handler_name(space, Access::Write, 0x1950), "unmapped");
    assert_eq!(machine.handler_name(space, Access::Read, 0x1950), "device");

    assert_eq!(machine.read(space, 0x1800, AccessWidth::Byte), 0xFF);
    machine.write(space, 0x1900, AccessWidth::Byte, 1);
    let diag = machine.diagnostics();
    assert_eq!(diag.unmapped_reads, 0);
    assert_eq!(diag.unmapped_writes, 1);
}

#[test]
fn bank_switch_changes_the_visible_entry() {
    let mut machine = started(latch_machine_config());
    let space = program(&machine);
    {
        let bus = machine.space_mut(space).expect("space");
        let bank = bus.add_bank("rombank").expect("bank");
        let data: Vec<u8> = (0..4_u8).flat_map(|page| [page; 0x100]).collect();
        bus.configure_bank_entries(bank, data, 4, 0x100, false)
            .expect("entries");
        bus.install_bank(Access::Read, MapRange::new(0x8000, 0x80FF), bank)
            .expect("bank install");
        bus.set_bank_entry(bank, 2).expect("select");
        assert!(bus.set_bank_entry(bank, 9).is_err());
    }
    assert_eq!(machine.read(space, 0x8010, AccessWidth::Byte), 2);
    let spans = machine.dump_map(space, Access::Read);
    assert!(spans
        .iter()
        .any(|span| span.start == 0x8000 && matches!(span.entry.kind, HandlerKind::Bank(_))));
    assert_eq!(machine.handler_name(space, Access::Read, 0x8010), "bank");
}

/// Read handler that selects entry 1 of a bank while servicing the read.
#[derive(Debug, Default)]
struct Switcher {
    bank: Option<(SpaceId, BankId)>,
}

impl MemoryDevice for Switcher {
    fn read(&mut self, ctx: &mut DeviceContext<'_>, _map: u32, _offset: u64, _mask: u64) -> u64 {
        if let Some((space, bank)) = self.bank {
            if let Some(bus) = ctx.space_mut(space) {
                let _ = bus.set_bank_entry(bank, 1);
            }
        }
        0x11
    }

    fn write(
        &mut self,
        _ctx: &mut DeviceContext<'_>,
        _map: u32,
        _offset: u64,
        _data: u64,
        _mask: u64,
    ) {
    }
}

impl Device for Switcher {
    fn device_type(&self) -> DeviceType {
        DeviceType::new("Bank Switcher", "switcher")
    }

    fn memory(&mut self) -> Option<&mut dyn MemoryDevice> {
        Some(self)
    }
}

#[test]
fn bank_switch_during_a_split_access_applies_to_the_next_access() {
    let mut config = MachineConfig::default();
    config
        .device("board", 0, || Board::new(AccessWidth::Byte, Endianness::Little))
        .device("switcher", 0, Switcher::default);
    let mut machine = started(config);
    let space = program(&machine);
    let switcher = machine.find("switcher").expect("switcher");
    let bank = {
        let bus = machine.space_mut(space).expect("space");
        let bank = bus.add_bank("b").expect("bank");
        bus.configure_bank_entries(bank, vec![0xA0, 0xB0], 2, 1, false)
            .expect("entries");
        bus.install_bank(Access::Read, MapRange::new(0x0001, 0x0001), bank)
            .expect("bank install");
        bus.install_device(
            Access::Read,
            MapRange::new(0x0000, 0x0000),
            switcher,
            0,
            AccessWidth::Byte,
        )
        .expect("switcher install");
        bank
    };
    machine
        .device_mut::<Switcher>(switcher)
        .expect("switcher")
        .bank = Some((space, bank));

    assert_eq!(machine.read(space, 0x0000, AccessWidth::Word), 0xA011);
    assert_eq!(machine.diagnostics().split_accesses, 1);
    assert_eq!(machine.read(space, 0x0001, AccessWidth::Byte), 0xB0);
}

#[test]
fn malformed_ranges_are_rejected() {
    let mut machine = started(latch_machine_config());
    let space = program(&machine);
    let bus = machine.space_mut(space).expect("space");
    assert!(bus
        .install_nop(Access::Read, MapRange::new(0x2000, 0x1000))
        .is_err());
    assert!(bus
        .install_nop(Access::Read, MapRange::new(0x0000, 0x1_0000))
        .is_err());
}

proptest! {
    #[test]
    fn open_bus_reads_are_stable(addr in 0x2000_u64..0x1_0000, repeat in 1_usize..4) {
        let mut machine = started(latch_machine_config());
        install_latch(&mut machine, 0x1000, 0x1FFF, AccessWidth::Byte);
        let space = program(&machine);
        for _ in 0..repeat {
            prop_assert_eq!(machine.read(space, addr, AccessWidth::Byte), 0xFF);
        }
        let latch = machine.device_by_tag::<Latch>("latch").expect("latch");
        prop_assert_eq!(latch.reads, 0);
        prop_assert_eq!(machine.diagnostics().unmapped_reads, repeat as u64);
    }
}
