#![no_main]
use libfuzzer_sys::fuzz_target;
use geckolink::memory::MemorySnapshot;

fuzz_target!(|input: (u32, u16, Vec<(u32, u8, Vec<u8>)>)| {
    let (start, len, ops) = input;
    let end = start.saturating_add(len as u32);
    let mut snapshot = MemorySnapshot::new(start, end);

    for (address, op, bytes) in ops {
        let before = snapshot.read_completed();
        match op % 5 {
            0 => { snapshot.read_u8(address); }
            1 => { snapshot.read_u16(address); }
            2 => { snapshot.read_u32(address); }
            3 => { snapshot.read_sized(address, (bytes.len() % 5) as u32); }
            4 => snapshot.commit_chunk(address, &bytes),
            _ => unreachable!(),
        }
        // The completion cursor never rewinds
        assert!(snapshot.read_completed() >= before);
        assert!(snapshot.read_completed() <= end);
    }
});
