//! Fuzz target for bounding-box CSV parsing.
//!
//! Header matching and row conversion both run on the input, so malformed
//! headers and malformed rows are exercised.

#![no_main]

use detnorm::formats::io_csv::fuzz_parse_csv;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    let _ = fuzz_parse_csv(data);
});
