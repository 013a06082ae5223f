use super::registers::{GPR_BASE, REGISTER_COUNT, SRR0};
use super::*;
use crate::error::ErrorCode;
use crate::gecko::commands::{CMD_BREAKPOINT, CMD_BREAKPOINT_EXEC, CMD_CANCEL_BREAKPOINT};
use crate::gecko::{shared, BreakpointKind, GeckoClient, SharedClient, TargetStatus};
use crate::sim::SimTarget;
use crate::transport::Transport;
use std::time::Duration;

const CONTEXT: u32 = 0x1040_0000;
const CODE: u32 = 0x0E30_0100;
const DATA: u32 = 0x1000_1000;
const WAIT: Duration = Duration::from_secs(2);

fn setup() -> (SharedClient, SimTarget) {
    let sim = SimTarget::new();
    sim.set_context_address(CONTEXT);
    let mut client = GeckoClient::new(Box::new(sim.clone()));
    client.connect().unwrap();
    (shared(client), sim)
}

fn engine(client: &SharedClient) -> BreakpointEngine {
    BreakpointEngine::new(client.clone(), CONTEXT).with_poll_interval(Duration::from_millis(2))
}

fn context(pc: u32, gprs: &[(usize, u32)]) -> Vec<u32> {
    let mut values = vec![0u32; REGISTER_COUNT];
    values[SRR0] = pc;
    for &(n, value) in gprs {
        values[GPR_BASE + n] = value;
    }
    values
}

fn disassembler(_address: u32, word: u32) -> Option<String> {
    match word {
        0x4800_0101 => Some("bl 0x0E300200".into()),
        0x807F_0010 => Some("lwz r3,16(r31)".into()),
        0x9064_0000 => Some("stw r3,0(r4)".into()),
        _ => None,
    }
}

fn expect_hit(engine: &BreakpointEngine) -> BreakpointHit {
    loop {
        match engine.next_event(WAIT) {
            Some(BreakpointEvent::Hit(hit)) => return *hit,
            Some(BreakpointEvent::Skipped { .. }) => continue,
            other => panic!("expected a hit, got {:?}", other),
        }
    }
}

#[test]
fn test_unconditional_hit_and_resume() {
    let (client, sim) = setup();
    let mut engine = engine(&client);
    engine.set_breakpoint(BreakpointSpec::new(DATA, BreakpointKind::Write)).unwrap();
    assert_eq!(engine.state(), EngineState::Armed);
    let armed = sim.armed_breakpoint().unwrap();
    assert_eq!(armed.command, CMD_BREAKPOINT);
    assert_eq!(armed.flagged, DATA | 6);

    sim.queue_hit(&context(CODE, &[(3, 0x2A)]));
    let hit = expect_hit(&engine);
    assert_eq!(hit.registers.pc(), CODE);
    assert_eq!(hit.registers.gpr(3), 0x2A);
    assert_eq!(hit.skipped, 0);
    assert_eq!(engine.state(), EngineState::Hit);
    assert_eq!(engine.last_hit(), Some(hit));

    engine.resume().unwrap();
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(sim.status(), TargetStatus::Running);
    assert!(engine.last_hit().is_none());
}

#[test]
fn test_condition_groups_filter_hits() {
    let (client, sim) = setup();
    let mut engine = engine(&client);
    let conditions = parse_conditions("1: r3 == 5\n1: r4 == 6\n2: r3 == 7\n");
    sim.queue_hit(&context(CODE, &[(3, 9)]));
    sim.queue_hit(&context(CODE, &[(3, 5), (4, 0)]));
    sim.queue_hit(&context(CODE, &[(3, 7)]));
    engine
        .set_breakpoint(BreakpointSpec::new(DATA, BreakpointKind::ReadWrite).with_conditions(conditions))
        .unwrap();

    assert!(matches!(engine.next_event(WAIT), Some(BreakpointEvent::Skipped { count: 1 })));
    assert!(matches!(engine.next_event(WAIT), Some(BreakpointEvent::Skipped { count: 2 })));
    let hit = expect_hit(&engine);
    assert_eq!(hit.registers.gpr(3), 7);
    assert_eq!(hit.skipped, 2);
    assert_eq!(engine.skipped(), 2);
    // armed once, re-armed after each filtered hit
    assert_eq!(sim.breakpoint_log().len(), 3);
    assert_eq!(sim.steps(), 0);
}

#[test]
fn test_filtered_instruction_breakpoint_steps_before_rearming() {
    let (client, sim) = setup();
    let mut engine = engine(&client);
    let never = parse_conditions("0: r3 == 1");
    sim.queue_hit(&context(CODE, &[]));
    engine
        .set_breakpoint(BreakpointSpec::new(CODE, BreakpointKind::Execute).with_conditions(never))
        .unwrap();
    assert!(matches!(engine.next_event(WAIT), Some(BreakpointEvent::Skipped { count: 1 })));
    engine.cancel().unwrap();
    assert_eq!(sim.steps(), 1);
    let log = sim.breakpoint_log();
    assert_eq!(log.len(), 2);
    assert!(log.iter().all(|b| b.command == CMD_BREAKPOINT_EXEC && b.flagged == CODE | 3));
}

#[test]
fn test_cancel_disarms_target() {
    let (client, sim) = setup();
    let mut engine = engine(&client);
    engine.set_breakpoint(BreakpointSpec::new(DATA, BreakpointKind::Read).exact()).unwrap();
    assert_eq!(sim.armed_breakpoint().unwrap().exact, Some(DATA));
    assert!(matches!(
        engine.set_breakpoint(BreakpointSpec::new(DATA, BreakpointKind::Read)),
        Err(BreakpointError::AlreadyArmed)
    ));

    engine.cancel().unwrap();
    assert_eq!(engine.state(), EngineState::Cancelled);
    assert!(sim.armed_breakpoint().is_none());
    assert!(sim.commands().contains(&CMD_CANCEL_BREAKPOINT));
    assert!(matches!(engine.next_event(WAIT), Some(BreakpointEvent::Cancelled)));

    // a cancelled engine can be armed again
    engine.set_breakpoint(BreakpointSpec::new(DATA, BreakpointKind::Read)).unwrap();
    assert_eq!(engine.state(), EngineState::Armed);
}

#[test]
fn test_operations_need_a_stopped_thread() {
    let (client, _sim) = setup();
    let mut engine = engine(&client);
    assert!(matches!(engine.step(), Err(BreakpointError::NotStopped)));
    assert!(matches!(engine.step_over(), Err(BreakpointError::NotStopped)));
    assert!(matches!(engine.resume(), Err(BreakpointError::NotStopped)));
    assert!(matches!(engine.call_stack(), Err(BreakpointError::NotStopped)));
    engine.cancel().unwrap();
    assert_eq!(engine.state(), EngineState::Idle);
}

#[test]
fn test_step_over_call_and_step() {
    let (client, sim) = setup();
    let mut engine = engine(&client).with_disassembler(disassembler);
    sim.write_u32(CODE, 0x4800_0101);
    sim.write_u32(CODE + 8, 0x807F_0010);
    sim.write_u32(DATA + 0x10, 0xDEAD);

    sim.queue_hit(&context(CODE, &[]));
    engine.set_breakpoint(BreakpointSpec::new(CODE, BreakpointKind::Execute)).unwrap();
    let hit = expect_hit(&engine);
    assert!(hit.analysis.as_ref().unwrap().is_call);

    sim.queue_hit(&context(CODE + 4, &[]));
    assert_eq!(engine.step_over().unwrap(), None);
    let hit = expect_hit(&engine);
    assert_eq!(hit.registers.pc(), CODE + 4);
    let temporary = *sim.breakpoint_log().last().unwrap();
    assert_eq!(temporary.command, CMD_BREAKPOINT_EXEC);
    assert_eq!(temporary.flagged, (CODE + 4) | 3);

    sim.queue_step(&context(CODE + 8, &[(31, DATA)]));
    let stepped = engine.step_over().unwrap().unwrap();
    assert_eq!(stepped.registers.pc(), CODE + 8);
    let analysis = stepped.analysis.as_ref().unwrap();
    assert_eq!(analysis.effective_address, Some(DATA + 0x10));
    assert_eq!(stepped.value_at_address, Some(0xDEAD));
    assert_eq!(engine.last_hit(), Some(stepped));
    assert_eq!(sim.steps(), 1);
}

#[test]
fn test_value_at_address_condition() {
    let (client, sim) = setup();
    let mut engine = engine(&client).with_disassembler(disassembler);
    sim.write_u32(CODE, 0x9064_0000);
    sim.write_u32(DATA + 0x300, 0x1234);
    sim.queue_hit(&context(CODE, &[(4, DATA + 0x200)]));
    sim.queue_hit(&context(CODE, &[(4, DATA + 0x300)]));

    let conditions = parse_conditions("0: VoA == 1234");
    engine
        .set_breakpoint(BreakpointSpec::new(DATA, BreakpointKind::Write).with_conditions(conditions))
        .unwrap();
    let hit = expect_hit(&engine);
    assert_eq!(hit.value_at_address, Some(0x1234));
    assert_eq!(hit.skipped, 1);
}

#[test]
fn test_call_stack_from_hit() {
    let (client, sim) = setup();
    let mut engine = engine(&client);
    let sp = 0x1050_0000;
    sim.write_u32(sp, sp + 0x20);
    sim.write_u32(sp + 0x24, CODE + 0x40);
    sim.queue_hit(&context(CODE, &[(1, sp)]));
    engine.set_breakpoint(BreakpointSpec::new(CODE, BreakpointKind::Execute)).unwrap();
    expect_hit(&engine);

    let frames = engine.call_stack().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].return_address, CODE + 0x40);
}

#[test]
fn test_link_failure_stops_waiter() {
    let (client, sim) = setup();
    let mut engine = engine(&client);
    engine.set_breakpoint(BreakpointSpec::new(DATA, BreakpointKind::Write)).unwrap();
    let mut link = sim.clone();
    link.disconnect();

    match engine.next_event(WAIT) {
        Some(BreakpointEvent::Failed(e)) => assert_eq!(e.code(), ErrorCode::CommandSendError),
        other => panic!("expected a failure, got {:?}", other),
    }
    assert_eq!(engine.state(), EngineState::Idle);
    assert!(!client.lock().unwrap().is_connected());
}
