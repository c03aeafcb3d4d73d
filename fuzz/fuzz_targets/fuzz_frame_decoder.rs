//! Fuzz target: `FrameDecoder::feed`
//!
//! Drives arbitrary byte sequences into the streaming MBAP decoder and
//! asserts that it never panics, always makes progress and only yields
//! frames whose PDU matches the header length.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use smartplug::modbus::codec::{FrameDecoder, MAX_PDU_SIZE};

fuzz_target!(|data: &[u8]| {
    let mut decoder = FrameDecoder::new();

    let mut rest = data;
    while !rest.is_empty() {
        let (used, frame) = decoder.feed(rest);
        if let Some(frame) = frame {
            assert_eq!(frame.header.protocol_id, 0);
            assert!(!frame.pdu.is_empty() && frame.pdu.len() <= MAX_PDU_SIZE);
            assert_eq!(usize::from(frame.header.length), frame.pdu.len() + 1);
        }
        assert!(used > 0, "decoder must consume input");
        rest = &rest[used..];
    }

    // After a reset the decoder must accept bytes cleanly again.
    decoder.reset();
    let _ = decoder.feed(data);
});
