#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Loading a record should never panic, whatever it references.
    if let Ok(record) = serde_json::from_slice::<tgraph_ir::ProgramRecord>(data) {
        let _ = tgraph_ir::Program::from_record(&record);
    }
});
