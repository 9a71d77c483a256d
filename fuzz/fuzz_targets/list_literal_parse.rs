#![no_main]

use libfuzzer_sys::fuzz_target;
use relay_config::{is_truthy_str, parse_list_literal, split_comma_list};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    if let Ok(items) = parse_list_literal(&raw) {
        let encoded = encode_list_literal(&items);
        assert_eq!(parse_list_literal(&encoded).ok(), Some(items));
    }
    for entry in split_comma_list(&raw) {
        assert!(!entry.is_empty());
        assert_eq!(entry, entry.trim());
    }
    let _ = is_truthy_str(&raw);
});

fn encode_list_literal(items: &[String]) -> String {
    let quoted = items
        .iter()
        .map(|item| {
            let escaped = item
                .replace('\\', "\\\\")
                .replace('"', "\\\"")
                .replace('\n', "\\n")
                .replace('\t', "\\t");
            format!("\"{escaped}\"")
        })
        .collect::<Vec<_>>();
    format!("[{}]", quoted.join(", "))
}
