#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as a record stream must never panic: either a record
    // decodes, or a framing/size/EOF error comes back.
    let mut cursor = std::io::Cursor::new(data);
    let mut buf = Vec::new();
    loop {
        match diskqueue::codec::read_record(&mut cursor, &mut buf, 0, 1024) {
            Ok(_) => continue,
            Err(_) => break,
        }
    }
});
