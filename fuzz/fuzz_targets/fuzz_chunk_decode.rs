#![no_main]
use libfuzzer_sys::fuzz_target;
use tracebin::{Chunk, MemoryStream};

// Framed chunk parsing plus strict decompression: corrupt declared
// sizes and mangled deflate streams must error, never crash or return
// truncated data.
fuzz_target!(|data: &[u8]| {
    let stream = MemoryStream::from_vec(data.to_vec());
    if let Ok(chunk) = Chunk::read(&stream) {
        if let Ok(payload) = chunk.uncompress() {
            assert_eq!(payload.len(), chunk.uncompressed_size as usize);
        }
    }
});
