//! Fuzz target for lag calculation.
//!
//! `calculate_lag_ms` and `parse_stream_id_timestamp` must never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use store_replication::store::{calculate_lag_ms, parse_stream_id_timestamp};

fuzz_target!(|data: (&str, &str)| {
    let (cursor, latest) = data;

    let _ = parse_stream_id_timestamp(cursor);
    let _ = parse_stream_id_timestamp(latest);

    if let Some(lag) = calculate_lag_ms(cursor, latest) {
        // Saturating: a cursor ahead of the tip reports zero
        if let (Some(c), Some(l)) = (
            parse_stream_id_timestamp(cursor),
            parse_stream_id_timestamp(latest),
        ) {
            assert_eq!(lag, l.saturating_sub(c));
        }
    }
});
