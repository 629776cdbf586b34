#![no_main]

use diskqueue::store::FileStore;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes in the metadata file must never panic the loader.
    let tmp = tempfile::tempdir().unwrap();
    let store = FileStore::new("fuzz", tmp.path());
    std::fs::write(store.metadata_path(), data).unwrap();
    let _ = store.load_metadata();
});
