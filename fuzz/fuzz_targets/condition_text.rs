#![no_main]
use libfuzzer_sys::fuzz_target;
use geckolink::breakpoint::{conditions_to_text, evaluate_groups, parse_conditions, RegisterSnapshot};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let conditions = parse_conditions(text);

    // Whatever parsed must print and parse back identically
    let again = parse_conditions(&conditions_to_text(&conditions));
    assert_eq!(again, conditions);

    let registers = RegisterSnapshot::default();
    evaluate_groups(&conditions, &registers, None);
    evaluate_groups(&conditions, &registers, Some(0));
});
