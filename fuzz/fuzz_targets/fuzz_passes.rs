#![no_main]

use libfuzzer_sys::fuzz_target;
use tgraph_opt::{OptLevel, optimize};

fuzz_target!(|data: &[u8]| {
    let Ok(record) = serde_json::from_slice::<tgraph_ir::ProgramRecord>(data) else {
        return;
    };
    let Ok(mut program) = tgraph_ir::Program::from_record(&record) else {
        return;
    };
    // Any program that loads must optimize into a valid one.
    optimize(&mut program, OptLevel::O2).expect("optimization failed on a valid program");
});
