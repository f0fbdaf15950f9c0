use proptest::prelude::*;
use scp_wire::constants::HEADER_BASE;
use scp_wire::{Header, RwUnit, pack, rw_unit, unpack, unpack_seq};

proptest! {
    #[test]
    fn test_pack_unpack_roundtrip(
        dest_addr in any::<u16>(),
        dest_cpu in 0u8..=0x1F,
        cmd_rc in any::<u16>(),
        seq in any::<u16>(),
        n_args in 0u8..=3,
        args in any::<[u32; 3]>(),
        payload in prop::collection::vec(any::<u8>(), 0..300),
        framed in any::<bool>(),
        data_limit in 1usize..=256,
    ) {
        let header = Header { dest_addr, dest_cpu, cmd_rc, seq, n_args, args };
        let mut buf = Vec::new();
        let written = pack(&mut buf, framed, &header, &payload, data_limit);
        let expect_payload = &payload[..payload.len().min(data_limit)];

        let frame = if framed { 2 } else { 0 };
        prop_assert_eq!(
            written,
            frame + HEADER_BASE + 4 * n_args as usize + expect_payload.len()
        );

        prop_assert_eq!(unpack_seq(&buf, framed), Some(seq));

        let resp = unpack(&buf, framed, n_args).unwrap();
        prop_assert_eq!(resp.cmd_rc, cmd_rc);
        prop_assert_eq!(resp.seq, seq);
        prop_assert_eq!(resp.n_args, n_args);
        for i in 0..n_args as usize {
            prop_assert_eq!(resp.args[i], args[i]);
        }
        prop_assert_eq!(resp.payload, expect_payload);
    }

    #[test]
    fn test_rw_unit_alignment_law(address in any::<u32>(), length in any::<u32>()) {
        let unit = rw_unit(address, length);
        let expected = if address % 4 == 0 && length % 4 == 0 {
            RwUnit::Word
        } else if address % 2 == 0 && length % 2 == 0 {
            RwUnit::Short
        } else {
            RwUnit::Byte
        };
        prop_assert_eq!(unit, expected);
        // The chosen unit always divides both operands.
        prop_assert_eq!(address as usize % unit.bytes(), 0);
        prop_assert_eq!(length as usize % unit.bytes(), 0);
    }

    #[test]
    fn test_unpack_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..64), framed in any::<bool>(), max_args in 0u8..=5) {
        let _ = unpack_seq(&bytes, framed);
        if let Some(resp) = unpack(&bytes, framed, max_args) {
            prop_assert!(resp.n_args <= 3);
            prop_assert!(resp.payload.len() <= bytes.len());
        }
    }
}
