use super::region::{AddressClass, MemoryRegionTable, ValidationPolicy};
use super::snapshot::MemorySnapshot;
use proptest::prelude::*;

proptest! {
    // Sized reads must agree with each other regardless of where they land
    #[test]
    fn prop_snapshot_read_consistency(offset in 0..60u32, bytes in proptest::collection::vec(any::<u8>(), 64)) {
        let snap = MemorySnapshot::from_bytes(0x1000_0000, bytes);
        let addr = 0x1000_0000 + offset;

        let b0 = snap.read_u8(addr) as u32;
        let b1 = snap.read_u8(addr + 1) as u32;
        let word = snap.read_u16(addr) as u32;
        prop_assert_eq!(word, (b0 << 8) | b1);

        let long = snap.read_u32(addr);
        prop_assert_eq!(long >> 16, word);
    }

    // Chunks committed in order always leave the cursor at the last chunk boundary
    #[test]
    fn prop_commit_cursor_tracks_chunks(chunks in 1..16usize, chunk_len in 1..64u32) {
        let len = chunks as u32 * chunk_len;
        let mut snap = MemorySnapshot::new(0x100, 0x100 + len);
        for k in 0..chunks as u32 {
            let addr = 0x100 + k * chunk_len;
            snap.commit_chunk(addr, &vec![k as u8; chunk_len as usize]);
            prop_assert_eq!(snap.read_completed(), addr + chunk_len);
        }
        prop_assert!(snap.is_complete());
    }

    // Classification and strict validity agree everywhere
    #[test]
    fn prop_classify_agrees_with_validity(addr in any::<u32>()) {
        let table = MemoryRegionTable::default();
        let valid = table.valid_address(addr, ValidationPolicy::Strict);
        prop_assert_eq!(valid, table.classify(addr) != AddressClass::Unknown);
        prop_assert!(table.valid_address(addr, ValidationPolicy::Permissive));
    }
}
