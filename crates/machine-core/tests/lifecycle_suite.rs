//! Configuration, start ordering, clocks and teardown.

mod common;

use common::{journal, Card, Journal, Latch, Probe, Ticker};
use machine_core::{
    Attotime, Capability, ConfigError, Machine, MachineConfig, MachineError, Phase,
    RegionFinder, ResourceKind, SuspendReason,
};
use proptest as _;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use log as _;
use thiserror as _;

fn entries(log: &Journal) -> Vec<String> {
    log.borrow().clone()
}

fn probe(config: &mut MachineConfig, tag: &str, name: &'static str, log: &Journal) {
    let log = log.clone();
    config.device(tag, 0, move || Probe::new(name, &log));
}

#[test]
fn devices_waiting_on_others_start_after_them() {
    let log = journal();
    let mut config = MachineConfig::default();
    let waiting = log.clone();
    config.device("a", 0, move || Probe::new("a", &waiting).waiting_for("^b"));
    probe(&mut config, "b", "b", &log);
    let mut machine = Machine::new(config).expect("configuration should be valid");
    machine.start().expect("machine should start");

    assert_eq!(
        entries(&log),
        ["a:deferred", "b:start", "a:start", "a:reset", "b:reset"]
    );
    assert_eq!(machine.phase(), Phase::Started);
    let a = machine.find("a").expect("a");
    assert!(machine.tree().is_started(a));
}

#[test]
fn circular_waits_fail_start() {
    let log = journal();
    let (first, second) = (log.clone(), log.clone());
    let mut config = MachineConfig::default();
    config
        .device("a", 0, move || Probe::new("a", &first).waiting_for("^b"))
        .device("b", 0, move || Probe::new("b", &second).waiting_for("^a"));
    let mut machine = Machine::new(config).expect("configuration should be valid");

    assert_eq!(
        machine.start(),
        Err(MachineError::Config(ConfigError::UnresolvedDependencies {
            tags: vec![":a".to_owned(), ":b".to_owned()]
        }))
    );
    // The first pass still starts the root, so only the second one stalls.
    assert_eq!(
        entries(&log),
        ["a:deferred", "b:deferred", "a:deferred", "b:deferred"]
    );
}

#[test]
fn missing_required_region_names_device_and_region() {
    let log = journal();
    let mut config = MachineConfig::default();
    let probe_log = log.clone();
    config.device("p", 0, move || {
        Probe::new("p", &probe_log).needing_region(RegionFinder::required("rom"))
    });
    let mut machine = Machine::new(config).expect("configuration should be valid");

    assert_eq!(
        machine.start(),
        Err(MachineError::Config(ConfigError::MissingRequired {
            device: ":p".to_owned(),
            kind: ResourceKind::Region,
            resource: ":p:rom".to_owned(),
        }))
    );
}

#[rstest]
#[case::required(RegionFinder::required("rom"))]
#[case::optional(RegionFinder::optional("rom"))]
fn present_region_is_visible_in_start(#[case] finder: RegionFinder) {
    let log = journal();
    let mut config = MachineConfig::default();
    let probe_log = log.clone();
    config
        .device("p", 0, move || Probe::new("p", &probe_log).needing_region(finder))
        .region("p:rom", vec![1, 2, 3]);
    let mut machine = Machine::new(config).expect("configuration should be valid");
    machine.start().expect("machine should start");

    assert_eq!(machine.device_by_tag::<Probe>("p").expect("probe").rom, [1, 2, 3]);
    assert_eq!(machine.region("p:rom").expect("region").data(), [1, 2, 3]);
}

#[test]
fn optional_region_may_stay_missing() {
    let log = journal();
    let mut config = MachineConfig::default();
    let probe_log = log.clone();
    config.device("p", 0, move || {
        Probe::new("p", &probe_log).needing_region(RegionFinder::optional("rom"))
    });
    let mut machine = Machine::new(config).expect("configuration should be valid");
    machine.start().expect("machine should start");
    assert!(machine.device_by_tag::<Probe>("p").expect("probe").rom.is_empty());
}

#[test]
fn duplicate_names_are_rejected() {
    let mut devices = MachineConfig::default();
    devices
        .device("x", 0, Latch::default)
        .device(":x", 0, Latch::default);
    assert!(matches!(
        Machine::new(devices),
        Err(ConfigError::DuplicateTag { tag }) if tag == ":x"
    ));

    let mut regions = MachineConfig::default();
    regions.region("rom", vec![0]).region(":rom", vec![1]);
    assert!(matches!(
        Machine::new(regions),
        Err(ConfigError::DuplicateRegion { .. })
    ));
}

#[test]
fn lifecycle_calls_out_of_phase_are_rejected() {
    let log = journal();
    let mut config = MachineConfig::default();
    probe(&mut config, "a", "a", &log);
    let mut machine = Machine::new(config).expect("configuration should be valid");
    assert!(matches!(
        machine.reset(),
        Err(MachineError::Config(ConfigError::WrongPhase { phase: "configured" }))
    ));
    assert_eq!(
        machine.stop(),
        Err(ConfigError::WrongPhase { phase: "configured" })
    );

    machine.start().expect("machine should start");
    assert!(matches!(
        machine.start(),
        Err(MachineError::Config(ConfigError::WrongPhase { phase: "started" }))
    ));
}

#[test]
fn stop_runs_in_reverse_order_and_ends_the_machine() {
    let log = journal();
    let mut config = MachineConfig::default();
    probe(&mut config, "a", "a", &log);
    probe(&mut config, "b", "b", &log);
    config.device("c", 0, || IdleTimer);
    let mut machine = Machine::new(config).expect("configuration should be valid");
    machine.start().expect("machine should start");
    log.borrow_mut().clear();

    machine.stop().expect("stop");
    assert_eq!(entries(&log), ["b:stop", "a:stop"]);
    assert_eq!(machine.phase(), Phase::Stopped);
    assert_eq!(machine.scheduler().timers().pending(), 0);
    assert!(matches!(
        machine.run_until(Attotime::from_msec(1)),
        Err(MachineError::Config(ConfigError::WrongPhase { phase: "stopped" }))
    ));
}

/// Keeps one periodic timer alive so teardown has something to free.
#[derive(Debug)]
struct IdleTimer;

impl machine_core::Device for IdleTimer {
    fn device_type(&self) -> machine_core::DeviceType {
        machine_core::DeviceType::new("Idle Timer", "idle_timer")
    }

    fn start(
        &mut self,
        ctx: &mut machine_core::DeviceContext<'_>,
    ) -> Result<(), machine_core::DeviceError> {
        let period = Attotime::from_usec(10);
        ctx.add_timer(0, period, 0, Some(period))?;
        Ok(())
    }
}

#[test]
fn derived_clocks_follow_their_parent() {
    let log = journal();
    let mut config = MachineConfig::default();
    let (main_log, sub_log) = (log.clone(), log.clone());
    config
        .device("main", 8_000_000, move || Probe::new("main", &main_log))
        .derived_device("main:sub", 1, 4, move || Probe::new("sub", &sub_log));
    let mut machine = Machine::new(config).expect("configuration should be valid");
    machine.start().expect("machine should start");
    let main = machine.find("main").expect("main");
    let sub = machine.find("main:sub").expect("sub");
    assert_eq!(machine.clock(sub).expect("clock").clock(), 2_000_000);
    log.borrow_mut().clear();

    machine.set_clock_scale(main, 1, 2);
    assert_eq!(machine.clock(main).expect("clock").clock(), 4_000_000);
    assert_eq!(machine.clock(main).expect("clock").unscaled(), 8_000_000);
    assert_eq!(machine.clock(sub).expect("clock").clock(), 1_000_000);
    assert_eq!(entries(&log), ["main:clock=4000000", "sub:clock=1000000"]);
    log.borrow_mut().clear();

    machine.set_clock(main, 8_000_000);
    assert!(entries(&log).is_empty());

    machine.hard_reset().expect("hard reset");
    assert_eq!(machine.clock(main).expect("clock").clock(), 8_000_000);
    assert_eq!(machine.clock(sub).expect("clock").clock(), 2_000_000);
    assert_eq!(
        entries(&log),
        [
            "main:clock=8000000",
            "sub:clock=2000000",
            "main:reset",
            "sub:reset"
        ]
    );
}

#[test]
fn hard_reset_lifts_host_suspension() {
    let mut config = MachineConfig::default();
    config.device("cpu", 1_000_000, Ticker::new);
    let mut machine = Machine::new(config).expect("configuration should be valid");
    machine.start().expect("machine should start");
    let cpu = machine.find("cpu").expect("cpu");
    machine.suspend(cpu, SuspendReason::HOST);
    machine
        .run_until(Attotime::from_msec(1))
        .expect("run should succeed");
    assert_eq!(machine.total_cycles(cpu), 0);

    machine.hard_reset().expect("hard reset");
    machine
        .run_until(Attotime::from_msec(2))
        .expect("run should succeed");
    assert_eq!(machine.total_cycles(cpu), 1_000);
    assert_eq!(machine.device_by_tag::<Ticker>("cpu").expect("cpu").executed, 1_000);
}

#[test]
fn capabilities_are_discovered_from_the_device() {
    let mut config = MachineConfig::default();
    config
        .device("cpu", 1_000_000, Ticker::new)
        .device("latch", 0, Latch::default)
        .device("card", 0, || Card { value: 0 });
    let machine = Machine::new(config).expect("configuration should be valid");
    let cpu = machine.find("cpu").expect("cpu");
    let latch = machine.find("latch").expect("latch");
    let card = machine.find("card").expect("card");

    assert!(machine.has_capability(cpu, Capability::Execute));
    assert!(!machine.has_capability(cpu, Capability::Memory));
    assert!(machine.has_capability(latch, Capability::Memory));
    assert!(machine.has_capability(card, Capability::Card("expansion")));
    assert!(!machine.has_capability(card, Capability::Card("other")));
    assert_eq!(machine.devices_with(Capability::Memory), [latch]);
    assert_eq!(machine.scheduler().executor_count(), 1);
    assert_eq!(machine.tag(cpu), ":cpu");
}
