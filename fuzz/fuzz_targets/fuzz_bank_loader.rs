#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // A bank that passes validation must also have consistent matrix sizes,
    // so indexing every declared entry must never go out of range.
    if let Ok(bank) = dropctl_config::bank::parse_bank(data) {
        for (_, entry) in bank.controllers() {
            for (_, m) in entry.matrices() {
                for r in 0..m.rows {
                    for c in 0..m.cols {
                        assert!(m.get(r, c).is_some());
                    }
                }
            }
        }
    }
});
