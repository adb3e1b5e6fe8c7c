//! Fuzz target for node page decoding.
//!
//! Feeds arbitrary bytes to `decode_node` as the content of a page. Decoding
//! must never panic, and any node it accepts must encode back into a page of
//! the same size.

#![no_main]

use libfuzzer_sys::fuzz_target;
use starmap_index::{CellId, decode_node, encode_node};
use starmap_store::Page;

const PAGE_SIZE: usize = 4096;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    // First byte picks the expected cell, second the expected generation.
    let Some(cell) = CellId::base(data[0] % 12) else {
        return;
    };
    let generation = u64::from(data[1]);

    let mut bytes = data[2..].to_vec();
    bytes.truncate(PAGE_SIZE);
    let page = Page::from_bytes(7, bytes);

    if let Ok(node) = decode_node(cell, &page, generation) {
        let encoded = encode_node(cell, &node, generation, 7, PAGE_SIZE);
        assert!(encoded.is_ok(), "decoded node failed to re-encode: {encoded:?}");
    }
});
