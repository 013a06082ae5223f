//! Breakpoint Engine
//!
//! Arms one hardware breakpoint at a time and watches for the hit on a
//! background thread:
//!
//! ```text
//! Idle --set_breakpoint--> Armed --hit, conditions hold--> Hit --resume--> Idle
//!                            |  \--hit, no group holds--> re-arm, resume, Armed
//!                            \--cancel--> Cancelled
//! ```
//!
//! Results arrive as [`BreakpointEvent`]s on a channel. The waiter takes the
//! client lock only for the length of one exchange, so other users of the
//! shared client keep working while a breakpoint is armed.

use super::condition::{evaluate_groups, BreakpointCondition};
use super::instruction::{analyze, Disassembler, InstructionAnalysis};
use super::registers::{RegisterSnapshot, CONTEXT_BLOCK_SIZE};
use super::stack::{self, StackFrame};
use super::BreakpointError;
use crate::config::Config;
use crate::error::GeckoError;
use crate::gecko::{BreakpointKind, GeckoClient, SharedClient, TargetStatus};
use crate::memory::ValidationPolicy;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Armed,
    Hit,
    Cancelled,
}

/// A breakpoint and the conditions filtering its hits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointSpec {
    pub address: u32,
    pub kind: BreakpointKind,
    pub exact: bool,
    pub conditions: Vec<BreakpointCondition>,
}

impl BreakpointSpec {
    pub fn new(address: u32, kind: BreakpointKind) -> Self {
        Self {
            address,
            kind,
            exact: false,
            conditions: Vec::new(),
        }
    }

    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<BreakpointCondition>) -> Self {
        self.conditions = conditions;
        self
    }
}

/// The stopped thread as seen at a reported hit or after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointHit {
    pub registers: RegisterSnapshot,
    pub analysis: Option<InstructionAnalysis>,
    /// Long at the instruction's memory operand, when it has one
    pub value_at_address: Option<u32>,
    /// Hits filtered out by the conditions before this one
    pub skipped: u32,
}

#[derive(Debug)]
pub enum BreakpointEvent {
    Skipped { count: u32 },
    Hit(Box<BreakpointHit>),
    Cancelled,
    Failed(GeckoError),
}

type SharedDisassembler = Arc<Mutex<Option<Box<dyn Disassembler>>>>;

struct Shared {
    state: Mutex<EngineState>,
    cancel: AtomicBool,
    skipped: AtomicU32,
    last_hit: Mutex<Option<BreakpointHit>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn last_hit(&self) -> MutexGuard<'_, Option<BreakpointHit>> {
        self.last_hit.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn lock(client: &SharedClient) -> MutexGuard<'_, GeckoClient> {
    client.lock().unwrap_or_else(|e| e.into_inner())
}

/// Read the context block and look at the instruction it stopped on.
fn capture(
    client: &mut GeckoClient,
    context_address: u32,
    disassembler: &SharedDisassembler,
    skipped: u32,
) -> Result<BreakpointHit, GeckoError> {
    let block = client.dump_range(context_address, context_address.wrapping_add(CONTEXT_BLOCK_SIZE))?;
    let registers = RegisterSnapshot::from_context_block(block.data())?;

    let mut analysis = None;
    let mut disassembler = disassembler.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(disassembler) = disassembler.as_mut() {
        let pc = registers.pc();
        if let Some(word) = client.peek_checked(pc, ValidationPolicy::Strict)? {
            analysis = analyze(&mut **disassembler, pc, word, &registers);
        }
    }
    let value_at_address = match analysis.as_ref().and_then(|a| a.effective_address) {
        Some(address) => client.peek_checked(address, ValidationPolicy::Strict)?,
        None => None,
    };

    Ok(BreakpointHit {
        registers,
        analysis,
        value_at_address,
        skipped,
    })
}

/// Body of the background thread watching one armed breakpoint.
struct Waiter {
    client: SharedClient,
    shared: Arc<Shared>,
    events: Sender<BreakpointEvent>,
    disassembler: SharedDisassembler,
    context_address: u32,
    poll_interval: Duration,
    spec: BreakpointSpec,
}

impl Waiter {
    fn run(self) {
        loop {
            if self.shared.cancel.load(Ordering::SeqCst) {
                return;
            }
            std::thread::sleep(self.poll_interval);
            if self.shared.cancel.load(Ordering::SeqCst) {
                return;
            }

            let outcome = {
                let mut client = lock(&self.client);
                self.poll(&mut client)
            };
            match outcome {
                Ok(None) => {}
                Ok(Some(hit)) => {
                    log::debug!("breakpoint hit at {:08X}", hit.registers.pc());
                    *self.shared.last_hit() = Some(hit.clone());
                    *self.shared.state() = EngineState::Hit;
                    let _ = self.events.send(BreakpointEvent::Hit(Box::new(hit)));
                    return;
                }
                Err(e) => {
                    log::warn!("breakpoint waiter stopped: {}", e);
                    *self.shared.state() = EngineState::Idle;
                    let _ = self.events.send(BreakpointEvent::Failed(e));
                    return;
                }
            }
        }
    }

    /// One status poll. A hit no condition group accepts is counted, the
    /// breakpoint re-armed and the target resumed.
    fn poll(&self, client: &mut GeckoClient) -> Result<Option<BreakpointHit>, GeckoError> {
        if client.status()? != TargetStatus::Breakpoint {
            return Ok(None);
        }
        let skipped = self.shared.skipped.load(Ordering::SeqCst);
        let hit = capture(client, self.context_address, &self.disassembler, skipped)?;
        if evaluate_groups(&self.spec.conditions, &hit.registers, hit.value_at_address) {
            return Ok(Some(hit));
        }

        let count = self.shared.skipped.fetch_add(1, Ordering::SeqCst) + 1;
        log::trace!("hit at {:08X} filtered ({} skipped)", hit.registers.pc(), count);
        let _ = self.events.send(BreakpointEvent::Skipped { count });

        // An instruction breakpoint would fire again on the same word
        if self.spec.kind == BreakpointKind::Execute {
            client.step()?;
        }
        client.set_breakpoint(self.spec.address, self.spec.kind, self.spec.exact)?;
        client.resume()?;
        Ok(None)
    }
}

pub struct BreakpointEngine {
    client: SharedClient,
    context_address: u32,
    poll_interval: Duration,
    disassembler: SharedDisassembler,
    shared: Arc<Shared>,
    sender: Sender<BreakpointEvent>,
    receiver: Receiver<BreakpointEvent>,
    waiter: Option<JoinHandle<()>>,
    armed: Option<BreakpointSpec>,
}

impl BreakpointEngine {
    /// `context_address` is where the stub saves the register file on a hit.
    pub fn new(client: SharedClient, context_address: u32) -> Self {
        let poll_interval = lock(&client).poll_interval();
        let (sender, receiver) = mpsc::channel();
        Self {
            client,
            context_address,
            poll_interval,
            disassembler: Arc::new(Mutex::new(None)),
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState::Idle),
                cancel: AtomicBool::new(false),
                skipped: AtomicU32::new(0),
                last_hit: Mutex::new(None),
            }),
            sender,
            receiver,
            waiter: None,
            armed: None,
        }
    }

    pub fn from_config(client: SharedClient, config: &Config) -> Self {
        Self::new(client, config.context_address).with_poll_interval(config.poll_interval())
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_disassembler(self, disassembler: impl Disassembler + 'static) -> Self {
        *self.disassembler.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(disassembler));
        self
    }

    pub fn state(&self) -> EngineState {
        *self.shared.state()
    }

    /// Hits filtered out since the breakpoint was armed.
    pub fn skipped(&self) -> u32 {
        self.shared.skipped.load(Ordering::SeqCst)
    }

    pub fn armed(&self) -> Option<&BreakpointSpec> {
        self.armed.as_ref()
    }

    /// The stopped thread, while in `Hit`.
    pub fn last_hit(&self) -> Option<BreakpointHit> {
        if self.state() != EngineState::Hit {
            return None;
        }
        self.shared.last_hit().clone()
    }

    pub fn events(&self) -> &Receiver<BreakpointEvent> {
        &self.receiver
    }

    pub fn next_event(&self, timeout: Duration) -> Option<BreakpointEvent> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Arm `spec` and start waiting for it. Arming while stopped at a hit
    /// also resumes the target.
    pub fn set_breakpoint(&mut self, spec: BreakpointSpec) -> Result<(), BreakpointError> {
        let resume = match self.state() {
            EngineState::Armed => return Err(BreakpointError::AlreadyArmed),
            EngineState::Hit => true,
            EngineState::Idle | EngineState::Cancelled => false,
        };
        self.join_waiter();
        self.shared.skipped.store(0, Ordering::SeqCst);
        {
            let mut client = lock(&self.client);
            client.set_breakpoint(spec.address, spec.kind, spec.exact)?;
            if resume {
                client.resume()?;
            }
        }
        self.arm(spec.clone())?;
        self.armed = Some(spec);
        Ok(())
    }

    fn arm(&mut self, spec: BreakpointSpec) -> Result<(), BreakpointError> {
        self.shared.cancel.store(false, Ordering::SeqCst);
        *self.shared.state() = EngineState::Armed;
        let waiter = Waiter {
            client: Arc::clone(&self.client),
            shared: Arc::clone(&self.shared),
            events: self.sender.clone(),
            disassembler: Arc::clone(&self.disassembler),
            context_address: self.context_address,
            poll_interval: self.poll_interval,
            spec,
        };
        let handle = std::thread::Builder::new()
            .name("breakpoint-waiter".into())
            .spawn(move || waiter.run())
            .map_err(|e| {
                *self.shared.state() = EngineState::Idle;
                BreakpointError::Spawn(e)
            })?;
        self.waiter = Some(handle);
        Ok(())
    }

    fn join_waiter(&mut self) {
        if let Some(handle) = self.waiter.take() {
            if handle.join().is_err() {
                log::warn!("breakpoint waiter panicked");
            }
        }
    }

    fn require_hit(&self) -> Result<BreakpointHit, BreakpointError> {
        self.last_hit().ok_or(BreakpointError::NotStopped)
    }

    /// Execute one instruction and report where the thread stopped.
    pub fn step(&mut self) -> Result<BreakpointHit, BreakpointError> {
        let previous = self.require_hit()?;
        let hit = {
            let mut client = lock(&self.client);
            client.step()?;
            capture(&mut client, self.context_address, &self.disassembler, previous.skipped)?
        };
        *self.shared.last_hit() = Some(hit.clone());
        Ok(hit)
    }

    /// Step, running over calls: on a call a temporary instruction breakpoint
    /// is placed on the following word and the target resumed. Returns the
    /// new stop for a plain step; after a call the stop arrives as a `Hit`
    /// event.
    pub fn step_over(&mut self) -> Result<Option<BreakpointHit>, BreakpointError> {
        let current = self.require_hit()?;
        if !current.analysis.as_ref().is_some_and(|a| a.is_call) {
            return self.step().map(Some);
        }

        let return_address = current.registers.pc().wrapping_add(4);
        log::debug!("stepping over call at {:08X}", current.registers.pc());
        self.join_waiter();
        self.shared.skipped.store(0, Ordering::SeqCst);
        {
            let mut client = lock(&self.client);
            client.set_breakpoint(return_address, BreakpointKind::Execute, false)?;
            client.resume()?;
        }
        self.arm(BreakpointSpec::new(return_address, BreakpointKind::Execute))?;
        Ok(None)
    }

    /// Let the stopped thread run on.
    pub fn resume(&mut self) -> Result<(), BreakpointError> {
        self.require_hit()?;
        lock(&self.client).resume()?;
        *self.shared.state() = EngineState::Idle;
        Ok(())
    }

    /// Stop waiting: the waiter is joined and the target told to drop the
    /// breakpoint. A hit that lands first is kept.
    pub fn cancel(&mut self) -> Result<(), BreakpointError> {
        self.shared.cancel.store(true, Ordering::SeqCst);
        self.join_waiter();
        if self.state() != EngineState::Armed {
            return Ok(());
        }
        lock(&self.client).cancel_breakpoint()?;
        *self.shared.state() = EngineState::Cancelled;
        let _ = self.sender.send(BreakpointEvent::Cancelled);
        log::debug!("breakpoint cancelled");
        Ok(())
    }

    pub fn call_stack(&self) -> Result<Vec<StackFrame>, BreakpointError> {
        let hit = self.require_hit()?;
        Ok(stack::walk(&mut lock(&self.client), &hit.registers)?)
    }
}

impl Drop for BreakpointEngine {
    fn drop(&mut self) {
        self.shared.cancel.store(true, Ordering::SeqCst);
        self.join_waiter();
    }
}
