//! Fuzz target for decoding records written by a point of sale.
//!
//! Log entries and record documents are untrusted. Decoding must never
//! panic; bad input becomes a `Malformed` entry or an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::collections::HashMap;
use store_replication::store::{EntryBody, LogEntry};
use store_replication::TransactionRecord;

fuzz_target!(|data: (Vec<(String, String)>, &str)| {
    let (pairs, document) = data;

    let fields: HashMap<String, String> = pairs.into_iter().collect();
    let entry = LogEntry::from_fields("1-0", &fields);
    if let EntryBody::Record(record) = &entry.body {
        // Anything that decodes must re-encode to fields that decode the same
        let reencoded: HashMap<String, String> = record
            .to_stream_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert!(TransactionRecord::from_stream_fields(&reencoded).is_ok());
    }

    let _ = TransactionRecord::from_json(document);
});
