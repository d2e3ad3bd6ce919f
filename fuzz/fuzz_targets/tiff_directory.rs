#![no_main]

use libfuzzer_sys::fuzz_target;
use pagefeed::inspect_tiff;

// Walks the IFD chain and every directory of arbitrary bytes.
// Loops, truncated entries and wild offsets must surface as errors, never panics.
fuzz_target!(|data: &[u8]| {
    if let Ok(pages) = inspect_tiff(data) {
        assert!(!pages.is_empty());
        for (index, page) in pages.iter().enumerate() {
            assert_eq!(page.page, index);
        }
    }
});
