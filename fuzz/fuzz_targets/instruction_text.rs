#![no_main]
use libfuzzer_sys::fuzz_target;
use geckolink::breakpoint::{Instruction, InstructionAnalysis, RegisterSnapshot};

fuzz_target!(|input: (String, [u32; 8])| {
    let (text, seed) = input;
    let mut values = [0u32; 72];
    for (i, value) in values.iter_mut().enumerate() {
        *value = seed[i % 8].rotate_left(i as u32);
    }
    let registers = RegisterSnapshot::from_values(values);

    if let Some(instruction) = Instruction::parse(registers.pc(), seed[0], &text) {
        let analysis = InstructionAnalysis::new(instruction, &registers);
        if analysis.is_call {
            assert!(analysis.branch_taken.is_none());
        }
    }
});
