//! Gecko protocol client.
//!
//! Frames commands over a [`Transport`]. The link carries one command at a
//! time; the chunked transfers (dump, upload, cheat upload) drive the
//! ACK/RETRY/FAIL handshake themselves and are the only place where a
//! transfer is retried.

use super::cheats::frame_cheat_stream;
use super::commands::*;
use super::progress::{CancelToken, Progress, TransferStatus};
use super::video::{Screenshot, VideoMode, VI_BASE, VI_REGISTERS_LEN};
use crate::codec::{self, byte_utils::join_u64};
use crate::config::Config;
use crate::error::{ErrorCode, GeckoError, Result};
use crate::memory::{MemoryRegionTable, MemorySnapshot, ValidationPolicy};
use crate::transport::{is_transient, TcpTransport, Transport};
use std::time::Duration;

/// Retries allowed per chunk before a transfer gives up
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Resume attempts made by [`GeckoClient::safe_resume`]
pub const SAFE_RESUME_ATTEMPTS: u32 = 10;

pub struct GeckoClient {
    transport: Box<dyn Transport>,
    regions: MemoryRegionTable,
    cancel: CancelToken,
    max_retries: u32,
    poll_interval: Duration,
}

impl GeckoClient {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            regions: MemoryRegionTable::default(),
            cancel: CancelToken::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Client over TCP using the configured host, port and timeouts.
    pub fn from_config(config: &Config) -> Self {
        let transport = TcpTransport::new(config.host.clone(), config.port)
            .with_timeouts(config.connect_timeout(), config.io_timeout());
        let mut client = Self::new(Box::new(transport));
        client.max_retries = config.max_retries;
        client.poll_interval = config.poll_interval();
        client
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn regions(&self) -> &MemoryRegionTable {
        &self.regions
    }

    pub fn set_regions(&mut self, regions: MemoryRegionTable) {
        self.regions = regions;
    }

    /// Handle that cancels the transfer in progress from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Drop a cancel request left over from an earlier operation.
    pub fn clear_cancel(&self) {
        self.cancel.reset();
    }

    pub fn connect(&mut self) -> Result<()> {
        self.transport.connect()?;
        self.transport.purge()
    }

    pub fn disconnect(&mut self) {
        self.transport.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.transport.send(data).map_err(|e| {
            log::warn!("send failed, dropping link: {}", e);
            self.transport.disconnect();
            GeckoError::io(ErrorCode::CommandSendError, e)
        })
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<()> {
        self.transport.recv(buf).map_err(|e| {
            log::warn!("read failed, dropping link: {}", e);
            self.transport.disconnect();
            GeckoError::io(ErrorCode::ReadDataError, e)
        })
    }

    fn recv_u8(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.recv(&mut byte)?;
        Ok(byte[0])
    }

    fn recv_u32(&mut self) -> Result<u32> {
        let mut word = [0u8; 4];
        self.recv(&mut word)?;
        Ok(u32::from_be_bytes(word))
    }

    fn command(&mut self, code: u8) -> Result<()> {
        log::trace!("command {:#04x}", code);
        self.send(&[code])
    }

    fn command_with(&mut self, code: u8, payload: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(1 + payload.len());
        frame.push(code);
        frame.extend_from_slice(payload);
        log::trace!("command {:#04x} ({} byte payload)", code, payload.len());
        self.send(&frame)
    }

    /// Read the rest of `snapshot` (from its completion cursor to its end).
    ///
    /// Clears an earlier cancel request first. On cancellation the target is
    /// told to stop and the snapshot keeps everything received so far;
    /// calling `dump` again resumes it.
    pub fn dump(
        &mut self,
        snapshot: &mut MemorySnapshot,
        progress: &mut dyn FnMut(&Progress),
    ) -> Result<TransferStatus> {
        self.cancel.reset();
        self.dump_part(snapshot, progress)
    }

    /// Like [`dump`](Self::dump), as one piece of a larger transfer: a cancel
    /// request raised before the call, or during an earlier piece, stops it.
    pub fn dump_part(
        &mut self,
        snapshot: &mut MemorySnapshot,
        progress: &mut dyn FnMut(&Progress),
    ) -> Result<TransferStatus> {
        let start = snapshot.read_completed();
        let end = snapshot.end();
        let length = end.saturating_sub(start);
        let full_chunks = length / MAX_CHUNK;
        let last_chunk = length % MAX_CHUNK;
        let total_chunks = full_chunks + u32::from(last_chunk > 0);

        if length > 0 {
            if self.cancel.is_cancelled() {
                return Ok(TransferStatus::Cancelled);
            }
            log::debug!("dump {:08X}-{:08X} in {} chunks", start, end, total_chunks);
            self.command_with(CMD_DUMP, &codec::encode_range(start, end))?;
        }

        let mut buffer = vec![0u8; MAX_CHUNK.min(length) as usize];
        for chunk in 0..total_chunks {
            let address = start + chunk * MAX_CHUNK;
            let size = if chunk < full_chunks { MAX_CHUNK } else { last_chunk };
            let payload = &mut buffer[..size as usize];

            let mut retries = 0;
            loop {
                match self.read_chunk(payload) {
                    Ok(()) => break,
                    Err(e) if is_transient(&e) => {
                        retries += 1;
                        progress(&Progress {
                            address,
                            chunk,
                            total_chunks,
                            transferred: address - start,
                            length,
                            ok: false,
                            is_dump: true,
                        });
                        if retries > self.max_retries {
                            log::warn!("chunk at {:08X} failed {} times", address, retries);
                            self.send(&[FAIL])?;
                            return Err(GeckoError::with_detail(
                                ErrorCode::TooManyRetries,
                                format!("dump chunk at {:08X}", address),
                            ));
                        }
                        log::debug!("retrying chunk at {:08X} ({})", address, e);
                        self.transport.purge()?;
                        self.send(&[RETRY])?;
                    }
                    Err(e) => {
                        self.transport.disconnect();
                        return Err(GeckoError::io(ErrorCode::ReadDataError, e));
                    }
                }
            }

            snapshot.commit_chunk(address, payload);
            progress(&Progress {
                address,
                chunk,
                total_chunks,
                transferred: address + size - start,
                length,
                ok: true,
                is_dump: true,
            });

            if chunk + 1 < total_chunks && self.cancel.is_cancelled() {
                log::debug!("dump cancelled at {:08X}", snapshot.read_completed());
                self.send(&[FAIL])?;
                return Ok(TransferStatus::Cancelled);
            }
            self.send(&[ACK])?;
        }

        progress(&Progress {
            address: end,
            chunk: total_chunks,
            total_chunks,
            transferred: length,
            length,
            ok: true,
            is_dump: true,
        });
        Ok(TransferStatus::Complete)
    }

    fn read_chunk(&mut self, payload: &mut [u8]) -> std::io::Result<()> {
        let mut status = [0u8; 1];
        self.transport.recv(&mut status)?;
        if status[0] == ZERO_BLOCK {
            payload.fill(0);
            return Ok(());
        }
        self.transport.recv(payload)
    }

    /// Dump `[start, end)` into a fresh snapshot, without progress reports.
    pub fn dump_range(&mut self, start: u32, end: u32) -> Result<MemorySnapshot> {
        let mut snapshot = MemorySnapshot::new(start, end);
        self.dump(&mut snapshot, &mut |_| {})?;
        Ok(snapshot)
    }

    /// Capture the frame the video interface is scanning out.
    ///
    /// `None` when the framebuffer transfer was cancelled.
    pub fn screenshot(&mut self, progress: &mut dyn FnMut(&Progress)) -> Result<Option<Screenshot>> {
        let registers = self.dump_range(VI_BASE, VI_BASE + VI_REGISTERS_LEN)?;
        let mode = VideoMode::from_registers(&registers)?;
        let end = mode.framebuffer.saturating_add(mode.frame_len());
        if !self.regions.valid_range(mode.framebuffer, end, ValidationPolicy::Strict) {
            return Err(GeckoError::with_detail(
                ErrorCode::InvalidReply,
                format!("framebuffer {:08X}-{:08X} is not mapped", mode.framebuffer, end),
            ));
        }
        log::debug!("screenshot {}x{} at {:08X}", mode.width, mode.height, mode.framebuffer);

        let mut frame = MemorySnapshot::new(mode.framebuffer, end);
        if self.dump(&mut frame, progress)? == TransferStatus::Cancelled {
            return Ok(None);
        }
        Ok(Some(Screenshot {
            mode,
            data: frame.data().to_vec(),
        }))
    }

    /// Write `data` to target memory at `start`.
    pub fn upload(
        &mut self,
        start: u32,
        data: &[u8],
        progress: &mut dyn FnMut(&Progress),
    ) -> Result<TransferStatus> {
        let length = data.len() as u32;
        let end = start.wrapping_add(length);
        let chunks: Vec<&[u8]> = data.chunks(MAX_CHUNK as usize).collect();
        let total_chunks = chunks.len() as u32;

        self.cancel.reset();
        log::debug!("upload {:08X}-{:08X} in {} chunks", start, end, total_chunks);
        self.command_with(CMD_UPLOAD, &codec::encode_range(start, end))?;

        let mut transferred = 0u32;
        for (chunk, payload) in chunks.iter().enumerate() {
            let chunk = chunk as u32;
            let address = start + transferred;
            // A stalled write may have delivered part of the chunk already;
            // only the rest is sent again.
            let mut sent = 0;
            let mut retries = 0;
            while sent < payload.len() {
                match self.transport.send_partial(&payload[sent..]) {
                    Ok(0) => {
                        self.transport.disconnect();
                        return Err(GeckoError::with_detail(
                            ErrorCode::CommandSendError,
                            format!("upload chunk at {:08X}: link accepted no data", address),
                        ));
                    }
                    Ok(n) => sent += n,
                    Err(e) if is_transient(&e) => {
                        retries += 1;
                        progress(&Progress {
                            address,
                            chunk,
                            total_chunks,
                            transferred: transferred + sent as u32,
                            length,
                            ok: false,
                            is_dump: false,
                        });
                        if retries > self.max_retries {
                            // The target is mid-chunk and would read FAIL as data
                            log::warn!("upload chunk at {:08X} stalled {} times", address, retries);
                            self.transport.disconnect();
                            return Err(GeckoError::with_detail(
                                ErrorCode::TooManyRetries,
                                format!("upload chunk at {:08X}", address),
                            ));
                        }
                        log::debug!("resending {} bytes at {:08X} ({})", payload.len() - sent, address, e);
                    }
                    Err(e) => {
                        self.transport.disconnect();
                        return Err(GeckoError::io(ErrorCode::CommandSendError, e));
                    }
                }
            }
            transferred += payload.len() as u32;
            progress(&Progress {
                address,
                chunk,
                total_chunks,
                transferred,
                length,
                ok: true,
                is_dump: false,
            });

            if chunk + 1 < total_chunks && self.cancel.is_cancelled() {
                self.send(&[FAIL])?;
                return Ok(TransferStatus::Cancelled);
            }
        }

        let reply = self.recv_u8()?;
        if reply != ACK {
            return Err(GeckoError::with_detail(
                ErrorCode::InvalidReply,
                format!("upload finished with {:#04x}", reply),
            ));
        }
        progress(&Progress {
            address: end,
            chunk: total_chunks,
            total_chunks,
            transferred: length,
            length,
            ok: true,
            is_dump: false,
        });
        Ok(TransferStatus::Complete)
    }

    /// Upload a code handler stream, each chunk acknowledged before the next.
    pub fn send_cheats(&mut self, stream: &[u8]) -> Result<()> {
        let framed = frame_cheat_stream(stream)?;
        log::debug!("sending {} bytes of codes", framed.len());
        self.command_with(CMD_SEND_CHEATS, &(framed.len() as u32).to_be_bytes())?;

        for (index, payload) in framed.chunks(MAX_CHUNK as usize).enumerate() {
            let mut retries = 0;
            loop {
                self.send(payload)?;
                let mut reply = [0u8; 1];
                let reply = match self.transport.recv(&mut reply) {
                    Ok(()) => reply[0],
                    Err(e) if is_transient(&e) => RETRY,
                    Err(e) => {
                        self.transport.disconnect();
                        return Err(GeckoError::io(ErrorCode::ReadDataError, e));
                    }
                };
                match reply {
                    ACK => break,
                    RETRY => {
                        retries += 1;
                        if retries > self.max_retries {
                            self.send(&[FAIL])?;
                            return Err(GeckoError::with_detail(
                                ErrorCode::TooManyRetries,
                                format!("code chunk {}", index),
                            ));
                        }
                    }
                    other => {
                        self.send(&[FAIL])?;
                        return Err(GeckoError::with_detail(
                            ErrorCode::InvalidReply,
                            format!("code chunk {} answered {:#04x}", index, other),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Read a long, or 0 when the address is not mapped.
    ///
    /// The zero is indistinguishable from real data; use
    /// [`peek_checked`](Self::peek_checked) when that matters.
    pub fn peek(&mut self, address: u32, policy: ValidationPolicy) -> Result<u32> {
        Ok(self.peek_checked(address, policy)?.unwrap_or(0))
    }

    /// Read a long, or `None` when the address is not mapped.
    pub fn peek_checked(&mut self, address: u32, policy: ValidationPolicy) -> Result<Option<u32>> {
        if !self.regions.valid_address(address, policy) {
            return Ok(None);
        }
        let snapshot = self.dump_range(address, address.saturating_add(4))?;
        Ok(Some(snapshot.read_u32(address)))
    }

    pub fn poke08(&mut self, address: u32, value: u8) -> Result<()> {
        self.command_with(CMD_POKE08, &codec::encode_pair(address, value as u32))
    }

    pub fn poke16(&mut self, address: u32, value: u16) -> Result<()> {
        self.command_with(CMD_POKE16, &codec::encode_pair(address, value as u32))
    }

    pub fn poke32(&mut self, address: u32, value: u32) -> Result<()> {
        self.command_with(CMD_POKEMEM32, &codec::encode_pair(address, value))
    }

    pub fn read_kernel(&mut self, address: u32) -> Result<u32> {
        self.command_with(CMD_READ_KERNEL, &address.to_be_bytes())?;
        self.recv_u32()
    }

    pub fn write_kernel(&mut self, address: u32, value: u32) -> Result<()> {
        self.command_with(CMD_WRITE_KERNEL, &codec::encode_pair(address, value))
    }

    pub fn pause(&mut self) -> Result<()> {
        self.command(CMD_PAUSE)
    }

    pub fn resume(&mut self) -> Result<()> {
        self.command(CMD_RESUME)
    }

    /// Pause and keep pausing until the target stops reporting `Running`.
    pub fn safe_pause(&mut self) -> Result<()> {
        loop {
            self.pause()?;
            std::thread::sleep(self.poll_interval);
            if self.status()? != TargetStatus::Running {
                return Ok(());
            }
        }
    }

    /// Resume until the target reports `Running`; `false` after
    /// [`SAFE_RESUME_ATTEMPTS`] failed attempts.
    pub fn safe_resume(&mut self) -> Result<bool> {
        for attempt in 0..SAFE_RESUME_ATTEMPTS {
            self.resume()?;
            std::thread::sleep(self.poll_interval);
            if self.status()? == TargetStatus::Running {
                return Ok(true);
            }
            log::debug!("resume attempt {} did not take", attempt + 1);
        }
        Ok(false)
    }

    pub fn status(&mut self) -> Result<TargetStatus> {
        self.command(CMD_STATUS)?;
        Ok(TargetStatus::from(self.recv_u8()?))
    }

    pub fn step(&mut self) -> Result<()> {
        self.command(CMD_STEP)
    }

    /// Arm a hardware breakpoint.
    ///
    /// `exact` data breakpoints only report accesses to `address` itself
    /// instead of its whole 8-byte granule.
    pub fn set_breakpoint(&mut self, address: u32, kind: BreakpointKind, exact: bool) -> Result<()> {
        let flagged = kind.flagged_address(address);
        log::debug!("breakpoint {:?} at {:08X} (exact: {})", kind, address, exact);
        match kind {
            BreakpointKind::Execute => self.command_with(CMD_BREAKPOINT_EXEC, &flagged.to_be_bytes()),
            _ if exact => {
                self.command_with(CMD_BREAKPOINT_EXACT, &codec::encode_pair(flagged, address))
            }
            _ => self.command_with(CMD_BREAKPOINT, &flagged.to_be_bytes()),
        }
    }

    pub fn cancel_breakpoint(&mut self) -> Result<()> {
        self.command(CMD_CANCEL_BREAKPOINT)
    }

    /// Whether the target has pushed a breakpoint-hit notification.
    pub fn breakpoint_hit(&mut self) -> Result<bool> {
        match self.transport.try_recv_byte() {
            Ok(byte) => Ok(byte == Some(BREAKPOINT_HIT)),
            Err(e) => {
                self.transport.disconnect();
                Err(GeckoError::io(ErrorCode::ReadDataError, e))
            }
        }
    }

    pub fn hook(&mut self, hook: HookType) -> Result<()> {
        self.command(hook.command())
    }

    pub fn exec_cheats(&mut self) -> Result<()> {
        self.command(CMD_EXEC_CHEATS)
    }

    pub fn version(&mut self) -> Result<u8> {
        self.command(CMD_VERSION)?;
        self.recv_u8()
    }

    pub fn os_version(&mut self) -> Result<u32> {
        self.command(CMD_OS_VERSION)?;
        self.recv_u32()
    }

    /// Call the function at `address` with up to eight register arguments
    /// and return the high long of its 64-bit result.
    pub fn rpc(&mut self, address: u32, args: &[u32]) -> Result<u32> {
        if args.len() > codec::RPC_MAX_ARGS {
            log::warn!("rpc to {:08X}: {} arguments, only 8 are passed", address, args.len());
        }
        self.command_with(CMD_RPC, &codec::encode_rpc(address, args))?;
        let high = self.recv_u32()?;
        let low = self.recv_u32()?;
        Ok((join_u64(high, low) >> 32) as u32)
    }
}
