#![no_main]
use libfuzzer_sys::fuzz_target;
use tracebin::{MemoryStream, Record};

// The resynchronizing header scan and record framing must never panic or
// loop forever, whatever bytes the stream contains.
fuzz_target!(|data: &[u8]| {
    let stream = MemoryStream::from_vec(data.to_vec());
    for _ in 0..8 {
        match Record::read(&stream) {
            Ok(_) => {}
            Err(_) => break,
        }
    }
});
