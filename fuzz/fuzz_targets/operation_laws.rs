#![no_main]

use libfuzzer_sys::fuzz_target;
use vellum_core::ot::TextOperation;

/// Build an operation over `len` characters from a byte script.
fn build(script: &[u8], len: usize) -> TextOperation {
    let mut op = TextOperation::new();
    let mut remaining = len;
    for pair in script.chunks(2) {
        let (kind, arg) = (pair[0] % 3, usize::from(*pair.get(1).unwrap_or(&1) % 8) + 1);
        op = match kind {
            0 => {
                let n = arg.min(remaining);
                remaining -= n;
                op.retain(n)
            }
            1 => {
                let n = arg.min(remaining);
                remaining -= n;
                op.remove(n)
            }
            _ => op.insert("xé中".chars().cycle().take(arg).collect::<String>()),
        };
    }
    op.retain(remaining)
}

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let cut = usize::from(split).min(rest.len());
    let (text_bytes, script) = rest.split_at(cut);
    let text = String::from_utf8_lossy(text_bytes).into_owned();
    let len = text.chars().count();
    let (left, right) = script.split_at(script.len() / 2);

    let a = build(left, len);
    let b = build(right, len);

    let after_a = a.apply_to_string(&text).expect("a fits");
    let after_b = b.apply_to_string(&text).expect("b fits");

    let (a_prime, b_prime) = TextOperation::transform(&a, &b).expect("same base");
    assert_eq!(
        b_prime.apply_to_string(&after_a).expect("b'"),
        a_prime.apply_to_string(&after_b).expect("a'")
    );

    let follow = build(right, a.target_length());
    let composed = a.compose(&follow).expect("compose");
    assert_eq!(
        composed.apply_to_string(&text).expect("composed"),
        follow.apply_to_string(&after_a).expect("follow")
    );
});
