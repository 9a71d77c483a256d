#![no_main]

use libfuzzer_sys::fuzz_target;
use relay_pool::{parse_bulk_rows, TABLE_ARITY};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let rows = parse_bulk_rows(&raw);
    assert!(rows.len() <= raw.split('\n').count());
    for row in rows {
        for index in 0..TABLE_ARITY {
            let field = row.column(index);
            assert!(!field.contains(','));
            assert!(!field.contains('\n'));
            assert_eq!(field, field.trim());
        }
    }
});
