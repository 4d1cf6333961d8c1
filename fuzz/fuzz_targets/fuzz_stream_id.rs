//! Fuzz target for log position comparison.
//!
//! Positions come straight from the store, so comparison must never panic
//! and must stay antisymmetric on arbitrary input.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::cmp::Ordering;
use store_replication::store::compare_stream_ids;

fuzz_target!(|data: (&str, &str)| {
    let (a, b) = data;

    let ab = compare_stream_ids(a, b);
    let ba = compare_stream_ids(b, a);

    match ab {
        Ordering::Less => assert_eq!(ba, Ordering::Greater),
        Ordering::Greater => assert_eq!(ba, Ordering::Less),
        Ordering::Equal => assert_eq!(ba, Ordering::Equal),
    }

    assert_eq!(compare_stream_ids(a, a), Ordering::Equal);
});
