//! Simulated Target
//!
//! [`SimTarget`] answers the target side of the Gecko protocol in process,
//! behind the [`Transport`] trait. Clones share one target: hand one clone
//! to a [`GeckoClient`](crate::gecko::GeckoClient) and keep another to
//! script the target and inspect what the client did to it.
//!
//! Memory is sparse; unwritten bytes read as zero. Replies are queued
//! synchronously while the client sends, so a read that finds too few queued
//! bytes fails straight away with `TimedOut`, the same way a stalled link
//! would.

use crate::codec::{byte_utils::read_be_u32, decode_rpc, RPC_MAX_ARGS};
use crate::error::{ErrorCode, GeckoError, Result};
use crate::gecko::commands::*;
use crate::transport::Transport;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

const PAGE_BITS: u32 = 12;
const PAGE_SIZE: usize = 1 << PAGE_BITS;

type RpcHandler = Box<dyn FnMut(u32, &[u32; RPC_MAX_ARGS]) -> u64 + Send>;

/// A breakpoint as the target received it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedBreakpoint {
    pub command: u8,
    pub flagged: u32,
    /// Second word of an exact data breakpoint
    pub exact: Option<u32>,
}

enum Mode {
    Idle,
    Dumping { next: u32, end: u32 },
    Uploading { next: u32, end: u32 },
    ReceivingCheats { remaining: usize, stream: Vec<u8> },
}

struct SimState {
    connected: bool,
    refuse_connections: bool,
    memory: HashMap<u32, Box<[u8; PAGE_SIZE]>>,
    kernel: HashMap<u32, u32>,
    inbox: Vec<u8>,
    outbox: VecDeque<u8>,
    mode: Mode,
    status: TargetStatus,
    version: u8,
    os_version: u32,
    context_address: u32,
    armed: Option<ArmedBreakpoint>,
    breakpoint_log: Vec<ArmedBreakpoint>,
    pending_hits: VecDeque<Vec<u32>>,
    step_contexts: VecDeque<Vec<u32>>,
    steps: u32,
    garbled_chunks: u32,
    ignored_pauses: u32,
    ignored_resumes: u32,
    rpc_handler: Option<RpcHandler>,
    rpc_calls: Vec<(u32, [u32; RPC_MAX_ARGS])>,
    cheats: Option<Vec<u8>>,
    hook: Option<u8>,
    exec_cheats: u32,
    commands: Vec<u8>,
    chunks_sent: u32,
    retries_seen: u32,
}

impl SimState {
    fn new() -> Self {
        Self {
            connected: false,
            refuse_connections: false,
            memory: HashMap::new(),
            kernel: HashMap::new(),
            inbox: Vec::new(),
            outbox: VecDeque::new(),
            mode: Mode::Idle,
            status: TargetStatus::Running,
            version: 0x80,
            os_version: 0,
            context_address: 0,
            armed: None,
            breakpoint_log: Vec::new(),
            pending_hits: VecDeque::new(),
            step_contexts: VecDeque::new(),
            steps: 0,
            garbled_chunks: 0,
            ignored_pauses: 0,
            ignored_resumes: 0,
            rpc_handler: None,
            rpc_calls: Vec::new(),
            cheats: None,
            hook: None,
            exec_cheats: 0,
            commands: Vec::new(),
            chunks_sent: 0,
            retries_seen: 0,
        }
    }

    fn read_byte(&self, address: u32) -> u8 {
        let offset = (address as usize) & (PAGE_SIZE - 1);
        self.memory
            .get(&(address >> PAGE_BITS))
            .map_or(0, |page| page[offset])
    }

    fn write_byte(&mut self, address: u32, value: u8) {
        let offset = (address as usize) & (PAGE_SIZE - 1);
        let page = self
            .memory
            .entry(address >> PAGE_BITS)
            .or_insert_with(|| Box::new([0; PAGE_SIZE]));
        page[offset] = value;
    }

    fn read_bytes(&self, address: u32, len: u32) -> Vec<u8> {
        (0..len).map(|i| self.read_byte(address.wrapping_add(i))).collect()
    }

    fn write_bytes(&mut self, address: u32, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            self.write_byte(address.wrapping_add(i as u32), b);
        }
    }

    fn reply(&mut self, bytes: &[u8]) {
        self.outbox.extend(bytes.iter().copied());
    }

    fn write_context(&mut self, registers: &[u32]) {
        let block: Vec<u8> = registers.iter().flat_map(|r| r.to_be_bytes()).collect();
        let address = self.context_address;
        self.write_bytes(address, &block);
    }

    fn receive(&mut self, data: &[u8]) {
        let expects_single_byte = match &self.mode {
            Mode::Uploading { next, end } => end - next == 1,
            Mode::ReceivingCheats { remaining, .. } => *remaining == 1,
            _ => true,
        };
        if data == [FAIL] && self.inbox.is_empty() && !expects_single_byte {
            log::debug!("sim: transfer aborted by client");
            self.mode = Mode::Idle;
            return;
        }
        self.inbox.extend_from_slice(data);
        while self.advance() {}
    }

    /// Consume one unit of input if a complete one is buffered.
    fn advance(&mut self) -> bool {
        match std::mem::replace(&mut self.mode, Mode::Idle) {
            Mode::Idle => self.advance_command(),
            Mode::Dumping { next, end } => {
                if self.inbox.is_empty() {
                    self.mode = Mode::Dumping { next, end };
                    return false;
                }
                let size = MAX_CHUNK.min(end - next);
                match self.inbox.remove(0) {
                    ACK if next + size < end => {
                        self.mode = Mode::Dumping { next: next + size, end };
                        self.queue_chunk(next + size, end);
                    }
                    ACK | FAIL => {}
                    RETRY => {
                        self.retries_seen += 1;
                        self.mode = Mode::Dumping { next, end };
                        self.queue_chunk(next, end);
                    }
                    other => {
                        log::warn!("sim: unexpected {:#04x} during dump", other);
                        self.mode = Mode::Dumping { next, end };
                    }
                }
                true
            }
            Mode::Uploading { next, end } => {
                let size = MAX_CHUNK.min(end - next) as usize;
                if self.inbox.len() < size {
                    self.mode = Mode::Uploading { next, end };
                    return false;
                }
                let chunk: Vec<u8> = self.inbox.drain(..size).collect();
                self.write_bytes(next, &chunk);
                let next = next + size as u32;
                if next < end {
                    self.mode = Mode::Uploading { next, end };
                } else {
                    self.reply(&[ACK]);
                }
                true
            }
            Mode::ReceivingCheats {
                remaining,
                mut stream,
            } => {
                let size = (MAX_CHUNK as usize).min(remaining);
                if self.inbox.len() < size {
                    self.mode = Mode::ReceivingCheats { remaining, stream };
                    return false;
                }
                let chunk: Vec<u8> = self.inbox.drain(..size).collect();
                if self.garbled_chunks > 0 {
                    self.garbled_chunks -= 1;
                    self.retries_seen += 1;
                    self.reply(&[RETRY]);
                    self.mode = Mode::ReceivingCheats { remaining, stream };
                    return true;
                }
                stream.extend_from_slice(&chunk);
                self.reply(&[ACK]);
                if remaining == size {
                    self.cheats = Some(stream);
                } else {
                    self.mode = Mode::ReceivingCheats {
                        remaining: remaining - size,
                        stream,
                    };
                }
                true
            }
        }
    }

    fn advance_command(&mut self) -> bool {
        let Some(&command) = self.inbox.first() else {
            return false;
        };
        let Some(need) = payload_len(command) else {
            log::trace!("sim: dropping stray byte {:#04x}", command);
            self.inbox.remove(0);
            return true;
        };
        if self.inbox.len() < 1 + need {
            return false;
        }
        let frame: Vec<u8> = self.inbox.drain(..1 + need).collect();
        self.commands.push(command);
        self.execute(command, &frame[1..]);
        true
    }

    fn queue_chunk(&mut self, next: u32, end: u32) {
        let size = MAX_CHUNK.min(end - next);
        let data = self.read_bytes(next, size);
        self.chunks_sent += 1;
        if self.garbled_chunks > 0 {
            self.garbled_chunks -= 1;
            self.outbox.push_back(DATA_BLOCK);
            self.reply(&data[..data.len() / 2]);
        } else if data.iter().all(|&b| b == 0) {
            self.outbox.push_back(ZERO_BLOCK);
        } else {
            self.outbox.push_back(DATA_BLOCK);
            self.reply(&data);
        }
    }

    fn arm(&mut self, breakpoint: ArmedBreakpoint) {
        self.armed = Some(breakpoint);
        self.breakpoint_log.push(breakpoint);
    }

    fn execute(&mut self, command: u8, payload: &[u8]) {
        let word = |offset| read_be_u32(payload, offset).unwrap_or(0);
        match command {
            CMD_POKE08 => self.write_bytes(word(0), &[word(4) as u8]),
            CMD_POKE16 => self.write_bytes(word(0), &(word(4) as u16).to_be_bytes()),
            CMD_POKEMEM32 => self.write_bytes(word(0), &word(4).to_be_bytes()),
            CMD_DUMP => {
                let (start, end) = (word(0), word(4));
                if start < end {
                    self.mode = Mode::Dumping { next: start, end };
                    self.queue_chunk(start, end);
                }
            }
            CMD_UPLOAD => {
                let (start, end) = (word(0), word(4));
                if start < end {
                    self.mode = Mode::Uploading { next: start, end };
                } else {
                    self.reply(&[ACK]);
                }
            }
            CMD_SEND_CHEATS => {
                let remaining = word(0) as usize;
                if remaining > 0 {
                    self.mode = Mode::ReceivingCheats {
                        remaining,
                        stream: Vec::with_capacity(remaining),
                    };
                }
            }
            CMD_PAUSE => {
                if self.ignored_pauses > 0 {
                    self.ignored_pauses -= 1;
                } else if self.status == TargetStatus::Running {
                    self.status = TargetStatus::Paused;
                }
            }
            CMD_RESUME => {
                if self.ignored_resumes > 0 {
                    self.ignored_resumes -= 1;
                } else {
                    self.status = TargetStatus::Running;
                }
            }
            CMD_BREAKPOINT | CMD_BREAKPOINT_EXEC => self.arm(ArmedBreakpoint {
                command,
                flagged: word(0),
                exact: None,
            }),
            CMD_BREAKPOINT_EXACT => self.arm(ArmedBreakpoint {
                command,
                flagged: word(0),
                exact: Some(word(4)),
            }),
            CMD_CANCEL_BREAKPOINT => self.armed = None,
            CMD_WRITE_KERNEL => {
                self.kernel.insert(word(0), word(4));
            }
            CMD_READ_KERNEL => {
                let value = self.kernel.get(&word(0)).copied().unwrap_or(0);
                self.reply(&value.to_be_bytes());
            }
            CMD_STEP => {
                self.steps += 1;
                if self.status == TargetStatus::Breakpoint {
                    if let Some(registers) = self.step_contexts.pop_front() {
                        self.write_context(&registers);
                    }
                }
            }
            CMD_STATUS => {
                if self.status == TargetStatus::Running && self.armed.is_some() {
                    if let Some(registers) = self.pending_hits.pop_front() {
                        self.write_context(&registers);
                        self.status = TargetStatus::Breakpoint;
                        self.armed = None;
                    }
                }
                let status = self.status.to_byte();
                self.reply(&[status]);
            }
            CMD_EXEC_CHEATS => self.exec_cheats += 1,
            CMD_RPC => {
                let Some((address, args)) = decode_rpc(payload) else {
                    return;
                };
                let result = match self.rpc_handler.as_mut() {
                    Some(handler) => handler(address, &args),
                    None => 0,
                };
                self.rpc_calls.push((address, args));
                self.reply(&result.to_be_bytes());
            }
            CMD_VERSION => {
                let version = self.version;
                self.reply(&[version]);
            }
            CMD_OS_VERSION => {
                let version = self.os_version;
                self.reply(&version.to_be_bytes());
            }
            hook => self.hook = Some(hook - CMD_HOOK),
        }
    }
}

fn payload_len(command: u8) -> Option<usize> {
    match command {
        CMD_POKE08 | CMD_POKE16 | CMD_POKEMEM32 | CMD_DUMP | CMD_UPLOAD
        | CMD_BREAKPOINT_EXACT | CMD_WRITE_KERNEL => Some(8),
        CMD_BREAKPOINT | CMD_BREAKPOINT_EXEC | CMD_READ_KERNEL | CMD_SEND_CHEATS => Some(4),
        CMD_RPC => Some(4 + 4 * RPC_MAX_ARGS),
        CMD_PAUSE | CMD_RESUME | CMD_CANCEL_BREAKPOINT | CMD_STEP | CMD_STATUS
        | CMD_EXEC_CHEATS | CMD_VERSION | CMD_OS_VERSION => Some(0),
        c if (CMD_HOOK..=CMD_HOOK + 1).contains(&c) => Some(0),
        _ => None,
    }
}

/// Handle to a simulated target.
#[derive(Clone)]
pub struct SimTarget {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTarget {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new())),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn write_memory(&self, address: u32, bytes: &[u8]) {
        self.state().write_bytes(address, bytes);
    }

    pub fn write_u32(&self, address: u32, value: u32) {
        self.write_memory(address, &value.to_be_bytes());
    }

    pub fn read_memory(&self, address: u32, len: u32) -> Vec<u8> {
        self.state().read_bytes(address, len)
    }

    pub fn read_u32(&self, address: u32) -> u32 {
        let bytes = self.read_memory(address, 4);
        read_be_u32(&bytes, 0).unwrap_or(0)
    }

    pub fn set_kernel_word(&self, address: u32, value: u32) {
        self.state().kernel.insert(address, value);
    }

    pub fn kernel_word(&self, address: u32) -> Option<u32> {
        self.state().kernel.get(&address).copied()
    }

    pub fn set_version(&self, version: u8) {
        self.state().version = version;
    }

    pub fn set_os_version(&self, version: u32) {
        self.state().os_version = version;
    }

    /// Where register files of scripted hits are written.
    pub fn set_context_address(&self, address: u32) {
        self.state().context_address = address;
    }

    pub fn set_status(&self, status: TargetStatus) {
        self.state().status = status;
    }

    pub fn status(&self) -> TargetStatus {
        self.state().status
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state().refuse_connections = refuse;
    }

    /// Queue a breakpoint hit. It fires on the first status query while a
    /// breakpoint is armed and the target runs.
    pub fn queue_hit(&self, registers: &[u32]) {
        self.state().pending_hits.push_back(registers.to_vec());
    }

    /// Queue the register file the next single step leaves behind.
    pub fn queue_step(&self, registers: &[u32]) {
        self.state().step_contexts.push_back(registers.to_vec());
    }

    pub fn steps(&self) -> u32 {
        self.state().steps
    }

    pub fn pending_hits(&self) -> usize {
        self.state().pending_hits.len()
    }

    /// Truncate the next `count` dump chunks and reject the next `count`
    /// code chunks.
    pub fn garble_next_chunks(&self, count: u32) {
        self.state().garbled_chunks = count;
    }

    pub fn ignore_pauses(&self, count: u32) {
        self.state().ignored_pauses = count;
    }

    pub fn ignore_resumes(&self, count: u32) {
        self.state().ignored_resumes = count;
    }

    pub fn set_rpc_handler<F>(&self, handler: F)
    where
        F: FnMut(u32, &[u32; RPC_MAX_ARGS]) -> u64 + Send + 'static,
    {
        self.state().rpc_handler = Some(Box::new(handler));
    }

    pub fn rpc_calls(&self) -> Vec<(u32, [u32; RPC_MAX_ARGS])> {
        self.state().rpc_calls.clone()
    }

    /// The last complete code stream received.
    pub fn cheats(&self) -> Option<Vec<u8>> {
        self.state().cheats.clone()
    }

    pub fn hook(&self) -> Option<u8> {
        self.state().hook
    }

    pub fn exec_cheats_count(&self) -> u32 {
        self.state().exec_cheats
    }

    pub fn armed_breakpoint(&self) -> Option<ArmedBreakpoint> {
        self.state().armed
    }

    pub fn breakpoint_log(&self) -> Vec<ArmedBreakpoint> {
        self.state().breakpoint_log.clone()
    }

    /// Every command byte received, in order.
    pub fn commands(&self) -> Vec<u8> {
        self.state().commands.clone()
    }

    pub fn chunks_sent(&self) -> u32 {
        self.state().chunks_sent
    }

    pub fn retries_seen(&self) -> u32 {
        self.state().retries_seen
    }

    /// Push a raw byte towards the client, e.g. a breakpoint notification.
    pub fn push_byte(&self, byte: u8) {
        self.state().outbox.push_back(byte);
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "simulated target not connected")
}

impl Transport for SimTarget {
    fn connect(&mut self) -> Result<()> {
        let mut state = self.state();
        if state.refuse_connections {
            return Err(GeckoError::with_detail(
                ErrorCode::NoTransportFound,
                "simulated target refused the connection",
            ));
        }
        state.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = self.state();
        state.connected = false;
        state.inbox.clear();
        state.outbox.clear();
        state.mode = Mode::Idle;
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state();
        if !state.connected {
            return Err(not_connected());
        }
        state.receive(data);
        Ok(())
    }

    fn send_partial(&mut self, data: &[u8]) -> io::Result<usize> {
        self.send(data).map(|()| data.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut state = self.state();
        if !state.connected {
            return Err(not_connected());
        }
        if state.outbox.len() < buf.len() {
            state.outbox.clear();
            return Err(io::Error::new(io::ErrorKind::TimedOut, "short reply"));
        }
        for slot in buf.iter_mut() {
            *slot = state.outbox.pop_front().unwrap_or(0);
        }
        Ok(())
    }

    fn try_recv_byte(&mut self) -> io::Result<Option<u8>> {
        let mut state = self.state();
        if !state.connected {
            return Err(not_connected());
        }
        Ok(state.outbox.pop_front())
    }

    fn purge(&mut self) -> Result<()> {
        self.state().outbox.clear();
        Ok(())
    }
}
