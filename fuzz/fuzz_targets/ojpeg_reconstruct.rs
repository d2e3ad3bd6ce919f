#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pagefeed::codecs::{ojpeg, TiffDirectory};

/// A minimal one-page OJPEG file whose location tags are fuzzer-chosen.
#[derive(Debug, Arbitrary)]
struct OjpegInput {
    big_endian: bool,
    tables_offset: u32,
    tables_len: u32,
    strips: Vec<(u32, u32)>,
    extra_counts: u8,
    payload: Vec<u8>,
}

fn put16(out: &mut Vec<u8>, v: u16, be: bool) {
    out.extend_from_slice(&if be { v.to_be_bytes() } else { v.to_le_bytes() });
}

fn put32(out: &mut Vec<u8>, v: u32, be: bool) {
    out.extend_from_slice(&if be { v.to_be_bytes() } else { v.to_le_bytes() });
}

fn build(input: &OjpegInput) -> Vec<u8> {
    let be = input.big_endian;
    let strips = &input.strips[..input.strips.len().min(64)];
    let counts = strips.len() + (input.extra_counts % 2) as usize;

    let mut out = Vec::new();
    out.extend_from_slice(if be { b"MM" } else { b"II" });
    put16(&mut out, 42, be);
    put32(&mut out, 0, be);
    out.extend_from_slice(&input.payload);

    // Out-of-line strip arrays.
    let offsets_at = out.len() as u32;
    for (offset, _) in strips {
        put32(&mut out, *offset, be);
    }
    let counts_at = out.len() as u32;
    for i in 0..counts {
        put32(&mut out, strips.get(i).map_or(0, |s| s.1), be);
    }

    let ifd_at = out.len() as u32;
    out[4..8].copy_from_slice(&if be { ifd_at.to_be_bytes() } else { ifd_at.to_le_bytes() });
    let entries: [(u16, u32, u32); 5] = [
        (259, 1, 6),
        (273, strips.len() as u32, if strips.len() == 1 { strips[0].0 } else { offsets_at }),
        (279, counts as u32, if counts == 1 { strips.first().map_or(0, |s| s.1) } else { counts_at }),
        (513, 1, input.tables_offset),
        (514, 1, input.tables_len),
    ];
    put16(&mut out, entries.len() as u16, be);
    for (tag, count, value) in entries {
        put16(&mut out, tag, be);
        put16(&mut out, 4, be);
        put32(&mut out, count, be);
        put32(&mut out, value, be);
    }
    put32(&mut out, 0, be);
    out
}

// The rebuilt stream is always the tables region followed by every strip.
fuzz_target!(|input: OjpegInput| {
    let data = build(&input);
    let Ok(directory) = TiffDirectory::parse(&data) else {
        return;
    };
    let Ok(ifd) = directory.read_ifd(&data, 0) else {
        return;
    };
    if let Ok(stream) = ojpeg::reconstruct(&data, &ifd) {
        let expected: u64 = input.tables_len as u64
            + ifd
                .strip_byte_counts()
                .unwrap_or_default()
                .iter()
                .map(|&c| c as u64)
                .sum::<u64>();
        assert_eq!(stream.len() as u64, expected);
    }
});
