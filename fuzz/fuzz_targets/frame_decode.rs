//! Fuzz target for InboundFrame::decode
//!
//! Arbitrary bytes off the realtime channel must never panic the decoder.
//! Anything that decodes must survive a re-encode and decode unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_proto::InboundFrame;

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = InboundFrame::decode(data) else {
        return;
    };

    // Unknown frames drop their payload, so only known kinds round-trip
    if matches!(frame, InboundFrame::Unknown) {
        return;
    }

    let bytes = serde_json::to_vec(&frame).unwrap();
    assert_eq!(InboundFrame::decode(&bytes).unwrap(), frame);
});
