//! Fuzz target for bundle header parsing.
//!
//! Arbitrary bytes in the header page must be rejected with an error, never a
//! panic. A header that parses must serialize back to bytes that parse to the
//! same header.

#![no_main]

use libfuzzer_sys::fuzz_target;
use starmap_store::BundleHeader;

fuzz_target!(|data: &[u8]| {
    if let Ok(header) = BundleHeader::from_bytes(data) {
        let bytes = header.to_bytes();
        let reparsed = BundleHeader::from_bytes(&bytes);
        assert!(reparsed.is_ok(), "re-parse failed after serialize");
    }
});
