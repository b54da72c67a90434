#![no_main]
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use tracebin::{ContainerConfig, MemoryStream, TraceFile};

// A whole container image from arbitrary bytes: opening and draining
// must terminate cleanly (records, end of stream, or a typed error).
fuzz_target!(|data: &[u8]| {
    let stream = Arc::new(MemoryStream::from_vec(data.to_vec()));
    let mut file = match TraceFile::open_on(stream, ContainerConfig::default()) {
        Ok(file) => file,
        Err(_) => return,
    };
    for _ in 0..64 {
        match file.read() {
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => break,
        }
    }
    let _ = file.close();
});
