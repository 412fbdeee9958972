#![no_main]

use libfuzzer_sys::fuzz_target;
use vellum_core::ot::TextOperation;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let Ok(op) = TextOperation::from_raw(&raw) else {
        return;
    };
    let wire = op.to_raw();
    let reparsed = TextOperation::from_raw(&wire).expect("own wire form parses");
    assert_eq!(reparsed.to_raw(), wire);
    assert_eq!(op.apply_to_length(op.base_length()), Ok(op.target_length()));
});
