use super::client::SAFE_RESUME_ATTEMPTS;
use super::commands::*;
use super::*;
use crate::error::ErrorCode;
use crate::memory::{MemorySnapshot, ValidationPolicy};
use crate::sim::SimTarget;
use crate::transport::Transport;
use std::time::Duration;

fn setup() -> (GeckoClient, SimTarget) {
    let sim = SimTarget::new();
    let mut client =
        GeckoClient::new(Box::new(sim.clone())).with_poll_interval(Duration::from_millis(1));
    client.connect().unwrap();
    (client, sim)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 + 1).collect()
}

#[test]
fn test_dump_chunk_accounting() {
    let (mut client, sim) = setup();
    let data = pattern(0x5000 * 2 + 0x123);
    sim.write_memory(0x1000_0000, &data);

    let mut reports = Vec::new();
    let mut snapshot = MemorySnapshot::new(0x1000_0000, 0x1000_0000 + data.len() as u32);
    let status = client
        .dump(&mut snapshot, &mut |p| reports.push(*p))
        .unwrap();

    assert_eq!(status, TransferStatus::Complete);
    assert_eq!(snapshot.data(), &data[..]);
    assert_eq!(sim.chunks_sent(), 3);
    assert_eq!(reports.len(), 4);
    assert!(reports.iter().all(|p| p.total_chunks == 3 && p.ok));
    assert!(reports.windows(2).all(|w| w[0].transferred <= w[1].transferred));
    let last = reports.last().unwrap();
    assert_eq!(last.transferred, last.length);
}

#[test]
fn test_dump_zero_chunks_are_synthesized() {
    let (mut client, sim) = setup();
    sim.write_u32(0x1000_A000, 0xCAFEBABE);
    let snapshot = client.dump_range(0x1000_0000, 0x1000_F000).unwrap();
    assert!(snapshot.data()[..0x5000].iter().all(|&b| b == 0));
    assert_eq!(snapshot.read_u32(0x1000_A000), 0xCAFEBABE);
}

#[test]
fn test_dump_retries_garbled_chunk() {
    let (mut client, sim) = setup();
    let data = pattern(0x6000);
    sim.write_memory(0x1000_0000, &data);
    sim.garble_next_chunks(2);

    let mut failed = 0;
    let mut snapshot = MemorySnapshot::new(0x1000_0000, 0x1000_6000);
    let status = client
        .dump(&mut snapshot, &mut |p| {
            if !p.ok {
                failed += 1;
            }
        })
        .unwrap();
    assert_eq!(status, TransferStatus::Complete);
    assert_eq!(failed, 2);
    assert_eq!(sim.retries_seen(), 2);
    assert_eq!(snapshot.data(), &data[..]);
}

#[test]
fn test_dump_gives_up_after_three_retries() {
    let (mut client, sim) = setup();
    sim.write_memory(0x1000_0000, &pattern(0x100));
    sim.garble_next_chunks(4);

    let err = client.dump_range(0x1000_0000, 0x1000_0100).unwrap_err();
    assert_eq!(err.code(), ErrorCode::TooManyRetries);
    assert_eq!(sim.retries_seen(), 3);
    // The link stays usable after the target was told to stop
    assert_eq!(client.status().unwrap(), TargetStatus::Running);
}

#[test]
fn test_cancelled_dump_resumes() {
    let (mut client, sim) = setup();
    let data = pattern(0x5000 * 4);
    sim.write_memory(0x1000_0000, &data);
    let token = client.cancel_token();

    let mut snapshot = MemorySnapshot::new(0x1000_0000, 0x1001_4000);
    let status = client
        .dump(&mut snapshot, &mut |p| {
            if p.ok && p.chunk == 1 {
                token.cancel();
            }
        })
        .unwrap();
    assert_eq!(status, TransferStatus::Cancelled);
    assert_eq!(snapshot.read_completed(), 0x1000_A000);

    let status = client.dump(&mut snapshot, &mut no_progress).unwrap();
    assert_eq!(status, TransferStatus::Complete);
    assert!(snapshot.is_complete());
    assert_eq!(snapshot.data(), &data[..]);
    assert_eq!(sim.chunks_sent(), 4);
}

#[test]
fn test_upload_writes_memory() {
    let (mut client, sim) = setup();
    let data = pattern(0x5000 + 0x10);
    let mut reports = 0;
    let status = client
        .upload(0x1100_0000, &data, &mut |_| reports += 1)
        .unwrap();
    assert_eq!(status, TransferStatus::Complete);
    assert_eq!(reports, 3);
    assert_eq!(sim.read_memory(0x1100_0000, data.len() as u32), data);
}

#[test]
fn test_upload_cancel_leaves_link_in_sync() {
    let (mut client, sim) = setup();
    let data = pattern(0x5000 * 3);
    let token = client.cancel_token();
    let status = client
        .upload(0x1100_0000, &data, &mut |p| {
            if p.ok {
                token.cancel();
            }
        })
        .unwrap();
    assert_eq!(status, TransferStatus::Cancelled);
    assert_eq!(sim.read_memory(0x1100_0000, 0x5000), data[..0x5000].to_vec());
    assert_eq!(sim.read_u32(0x1100_5000), 0);
    assert_eq!(client.version().unwrap(), 0x80);
}

/// Link whose first large write delivers half its bytes, then stalls once.
struct StallingLink {
    inner: SimTarget,
    stall: Option<bool>,
}

impl Transport for StallingLink {
    fn connect(&mut self) -> crate::error::Result<()> {
        self.inner.connect()
    }

    fn disconnect(&mut self) {
        self.inner.disconnect()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.inner.send(data)
    }

    fn send_partial(&mut self, data: &[u8]) -> std::io::Result<usize> {
        match self.stall {
            Some(false) if data.len() > 0x100 => {
                self.stall = Some(true);
                self.inner.send_partial(&data[..data.len() / 2])
            }
            Some(true) => {
                self.stall = None;
                Err(std::io::ErrorKind::TimedOut.into())
            }
            _ => self.inner.send_partial(data),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        self.inner.recv(buf)
    }

    fn try_recv_byte(&mut self) -> std::io::Result<Option<u8>> {
        self.inner.try_recv_byte()
    }

    fn purge(&mut self) -> crate::error::Result<()> {
        self.inner.purge()
    }
}

#[test]
fn test_upload_resumes_after_partial_write() {
    let sim = SimTarget::new();
    let link = StallingLink {
        inner: sim.clone(),
        stall: Some(false),
    };
    let mut client = GeckoClient::new(Box::new(link));
    client.connect().unwrap();

    let data = pattern(0x200);
    let mut stalls = Vec::new();
    let status = client
        .upload(0x1000_0000, &data, &mut |p| {
            if !p.ok {
                stalls.push(p.transferred);
            }
        })
        .unwrap();
    assert_eq!(status, TransferStatus::Complete);
    assert_eq!(stalls, vec![0x100]);
    assert_eq!(sim.read_memory(0x1000_0000, 0x200), data);
    assert_eq!(client.version().unwrap(), 0x80);
}

#[test]
fn test_dump_part_honours_earlier_cancel() {
    let (mut client, sim) = setup();
    sim.write_u32(0x1000_0000, 0x1234_5678);
    client.cancel_token().cancel();

    let mut snapshot = MemorySnapshot::new(0x1000_0000, 0x1000_0010);
    let status = client.dump_part(&mut snapshot, &mut no_progress).unwrap();
    assert_eq!(status, TransferStatus::Cancelled);
    assert_eq!(sim.chunks_sent(), 0);
    assert_eq!(snapshot.read_completed(), 0x1000_0000);

    // a standalone dump starts over with the request cleared
    let status = client.dump(&mut snapshot, &mut no_progress).unwrap();
    assert_eq!(status, TransferStatus::Complete);
    assert_eq!(snapshot.read_u32(0x1000_0000), 0x1234_5678);
}

/// Program an interlaced mode scanning out of `framebuffer`.
fn program_video(sim: &SimTarget, framebuffer: u32, width: u32, height: u32) {
    use super::video::*;
    sim.write_memory(VI_VTR, &(((height / 2) << 4) as u16).to_be_bytes());
    sim.write_memory(VI_DCR, &0u16.to_be_bytes());
    sim.write_u32(VI_TFBL, (1 << 28) | (framebuffer >> 5));
    sim.write_memory(VI_HSW, &(((width / 16) << 8) as u16).to_be_bytes());
}

#[test]
fn test_screenshot_reads_programmed_framebuffer() {
    let (mut client, sim) = setup();
    let frame = pattern(320 * 240 * 2);
    program_video(&sim, 0x1080_0000, 320, 240);
    sim.write_memory(0x1080_0000, &frame);

    let shot = client.screenshot(&mut no_progress).unwrap().unwrap();
    assert_eq!((shot.mode.width, shot.mode.height), (320, 240));
    assert_eq!(shot.mode.framebuffer, 0x1080_0000);
    assert_eq!(shot.data, frame);
    assert_eq!(shot.pixel_pair(1, 0), Some([frame[0], frame[1], frame[2], frame[3]]));
}

#[test]
fn test_screenshot_rejects_unmapped_framebuffer() {
    let (mut client, sim) = setup();
    program_video(&sim, 0x0080_0000, 320, 240);
    let err = client.screenshot(&mut no_progress).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidReply);

    let (mut client, _) = setup();
    let err = client.screenshot(&mut no_progress).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidReply);
}

#[test]
fn test_send_cheats_frames_and_retries() {
    let (mut client, sim) = setup();
    let list = CheatList::parse("04123456 00000063").unwrap();
    sim.garble_next_chunks(1);
    client.send_cheats(&list.encode()).unwrap();
    assert_eq!(sim.cheats().unwrap(), list.encode());
    assert_eq!(sim.retries_seen(), 1);

    let raw = [0x04, 0x12, 0x34, 0x56, 0x00, 0x00, 0x00, 0x63];
    client.send_cheats(&raw).unwrap();
    assert_eq!(sim.cheats().unwrap(), list.encode());
}

#[test]
fn test_send_cheats_rejects_size_before_io() {
    let (mut client, sim) = setup();
    let err = client.send_cheats(&[0; 10]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CheatStreamSizeInvalid);
    assert!(sim.commands().is_empty());
}

#[test]
fn test_send_cheats_too_many_retries() {
    let (mut client, sim) = setup();
    sim.garble_next_chunks(4);
    let err = client.send_cheats(&[]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::TooManyRetries);
    assert!(sim.cheats().is_none());
}

#[test]
fn test_peek_and_poke() {
    let (mut client, sim) = setup();
    client.poke32(0x1000_0100, 0x1122_3344).unwrap();
    client.poke16(0x1000_0104, 0xAABB).unwrap();
    client.poke08(0x1000_0106, 0xCC).unwrap();
    assert_eq!(sim.read_u32(0x1000_0100), 0x1122_3344);
    assert_eq!(
        client.peek(0x1000_0104, ValidationPolicy::Strict).unwrap(),
        0xAABB_CC00
    );

    sim.write_u32(0x0000_1000, 0x5555_5555);
    assert_eq!(client.peek(0x0000_1000, ValidationPolicy::Strict).unwrap(), 0);
    assert_eq!(
        client.peek_checked(0x0000_1000, ValidationPolicy::Strict).unwrap(),
        None
    );
    assert_eq!(
        client.peek_checked(0x0000_1000, ValidationPolicy::Permissive).unwrap(),
        Some(0x5555_5555)
    );
}

#[test]
fn test_kernel_and_versions() {
    let (mut client, sim) = setup();
    sim.set_os_version(0x0000_0226);
    sim.set_version(0x82);
    client.write_kernel(0xFFE8_0000, 0xABCD_0001).unwrap();
    assert_eq!(sim.kernel_word(0xFFE8_0000), Some(0xABCD_0001));
    assert_eq!(client.read_kernel(0xFFE8_0000).unwrap(), 0xABCD_0001);
    assert_eq!(client.os_version().unwrap(), 0x226);
    assert_eq!(client.version().unwrap(), 0x82);
}

#[test]
fn test_pause_resume_status() {
    let (mut client, sim) = setup();
    client.pause().unwrap();
    assert_eq!(client.status().unwrap(), TargetStatus::Paused);
    client.resume().unwrap();
    assert_eq!(client.status().unwrap(), TargetStatus::Running);

    sim.ignore_pauses(2);
    client.safe_pause().unwrap();
    assert_eq!(sim.status(), TargetStatus::Paused);

    sim.ignore_resumes(3);
    assert!(client.safe_resume().unwrap());

    client.pause().unwrap();
    sim.ignore_resumes(SAFE_RESUME_ATTEMPTS);
    assert!(!client.safe_resume().unwrap());
}

#[test]
fn test_breakpoint_payloads() {
    let (mut client, sim) = setup();
    client
        .set_breakpoint(0x1000_0013, BreakpointKind::Write, false)
        .unwrap();
    client
        .set_breakpoint(0x1000_0013, BreakpointKind::Read, true)
        .unwrap();
    client
        .set_breakpoint(0x0200_0006, BreakpointKind::Execute, false)
        .unwrap();

    let log = sim.breakpoint_log();
    assert_eq!(log[0].command, CMD_BREAKPOINT);
    assert_eq!(log[0].flagged, 0x1000_0016);
    assert_eq!(log[1].command, CMD_BREAKPOINT_EXACT);
    assert_eq!(log[1].flagged, 0x1000_0015);
    assert_eq!(log[1].exact, Some(0x1000_0013));
    assert_eq!(log[2].command, CMD_BREAKPOINT_EXEC);
    assert_eq!(log[2].flagged, 0x0200_0007);

    client.cancel_breakpoint().unwrap();
    assert!(sim.armed_breakpoint().is_none());
}

#[test]
fn test_breakpoint_hit_notification() {
    let (mut client, sim) = setup();
    assert!(!client.breakpoint_hit().unwrap());
    sim.push_byte(BREAKPOINT_HIT);
    assert!(client.breakpoint_hit().unwrap());
}

#[test]
fn test_rpc_returns_high_word() {
    let (mut client, sim) = setup();
    sim.set_rpc_handler(|address, args| ((address as u64 + args[0] as u64) << 32) | 0xFFFF);
    assert_eq!(client.rpc(0x0200_0000, &[5, 6]).unwrap(), 0x0200_0005);
    let calls = sim.rpc_calls();
    assert_eq!(calls[0].1[1], 6);
    assert_eq!(calls[0].1[2], crate::codec::RPC_ARG_PADDING);
}

#[test]
fn test_hook_and_exec() {
    let (mut client, sim) = setup();
    client.hook(HookType::Controller).unwrap();
    client.exec_cheats().unwrap();
    assert_eq!(sim.hook(), Some(1));
    assert_eq!(sim.exec_cheats_count(), 1);
}

#[test]
fn test_transport_failure_disconnects() {
    let (mut client, mut sim) = setup();
    sim.disconnect();
    let err = client.status().unwrap_err();
    assert_eq!(err.code(), ErrorCode::CommandSendError);
    assert!(!client.is_connected());
    client.disconnect();
    client.disconnect();
}

#[test]
fn test_connect_failure() {
    let sim = SimTarget::new();
    sim.refuse_connections(true);
    let mut client = GeckoClient::new(Box::new(sim));
    assert_eq!(client.connect().unwrap_err().code(), ErrorCode::NoTransportFound);
}
