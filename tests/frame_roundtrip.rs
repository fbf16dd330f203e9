//! Property-based coverage of the frame codec (§4.1/§8): round-trip for
//! arbitrary payloads, and single-bit mutation never silently corrupts.

use proptest::prelude::*;

use franklin_link::frame::{self, MAX_PAYLOAD_LEN};

proptest! {
    #[test]
    fn roundtrip(payload in prop::collection::vec(any::<u8>(), 1..=MAX_PAYLOAD_LEN)) {
        let framed = frame::encode(&payload);
        prop_assert_eq!(frame::decode(&framed).unwrap(), payload);
    }

    #[test]
    fn single_bit_flip_never_silently_corrupts(
        payload in prop::collection::vec(any::<u8>(), 1..=MAX_PAYLOAD_LEN),
        byte_idx in any::<usize>(),
        bit in 0u8..8,
    ) {
        let framed = frame::encode(&payload);
        let idx = byte_idx % framed.len();
        let mut mutated = framed.clone();
        mutated[idx] ^= 1 << bit;
        match frame::decode(&mutated) {
            Ok(got) => prop_assert_eq!(got, payload),
            Err(_) => {}
        }
    }
}
