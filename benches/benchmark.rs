use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use pagefeed::codecs::{ojpeg, TiffDirectory};
use pagefeed::engine::{chunk_pages, DecodeEngine, DecodeSettings};
use pagefeed::model::{Epoch, JobTicket, WorkerJob};
use pagefeed::{PipelineConfig, SourceBytes};
use std::hint::black_box;

#[path = "../src/testing.rs"]
mod testing;

use testing::{sample_jpeg, PageSpec, TiffBuilder};

fn many_pages(pages: usize) -> Vec<u8> {
    let mut builder = TiffBuilder::new();
    for p in 0..pages {
        builder = builder.page(PageSpec::rgb(8, 8, move |x, y| [p as u8, x as u8, y as u8]));
    }
    builder.build()
}

fn job(data: &SourceBytes, pages: usize) -> WorkerJob {
    WorkerJob {
        ticket: JobTicket {
            id: 0,
            epoch: Epoch(0),
            file_extension: "tif".to_string(),
            file_index: 0,
            page_start_index: 0,
            pages_involved: pages,
            all_pages_starting_index: 0,
            source_url: "bench.tif".to_string(),
        },
        bytes: Some(data.clone()),
    }
}

fn bench_directory(c: &mut Criterion) {
    let data = many_pages(256);
    c.bench_function("ifd_chain_256_pages", |b| {
        b.iter(|| TiffDirectory::parse(black_box(&data)).unwrap().page_count())
    });

    let directory = TiffDirectory::parse(&data).unwrap();
    c.bench_function("page_weights_256_pages", |b| {
        b.iter(|| {
            let weights: Vec<u64> = (0..directory.page_count())
                .map(|p| directory.read_ifd(&data, p).unwrap().strip_bytes_total())
                .collect();
            chunk_pages(black_box(&weights), 8, 32 * 1024 * 1024).len()
        })
    });
}

fn bench_ojpeg(c: &mut Criterion) {
    let jpeg = sample_jpeg(512, 512);
    let data = TiffBuilder::new()
        .page(PageSpec::ojpeg_from_jpeg(512, 512, &jpeg, 32))
        .build();
    let directory = TiffDirectory::parse(&data).unwrap();
    let ifd = directory.read_ifd(&data, 0).unwrap();
    c.bench_function("ojpeg_reconstruct_32_strips", |b| {
        b.iter(|| ojpeg::reconstruct(black_box(&data), &ifd).unwrap().len())
    });
}

fn bench_engine(c: &mut Criterion) {
    let data = SourceBytes::from_vec(
        TiffBuilder::new()
            .page(PageSpec::lzw(256, 256, |x, y| [x as u8, y as u8, 128]))
            .page(PageSpec::rgb(256, 256, |x, y| [y as u8, x as u8, 64]))
            .build(),
    );
    let mut engine = DecodeEngine::new(0, DecodeSettings::for_workers(&PipelineConfig::default()));
    c.bench_function("engine_two_page_job_to_png", |b| {
        b.iter_batched(
            || job(&data, 2),
            |job| engine.process(job),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_directory, bench_ojpeg, bench_engine);
criterion_main!(benches);
