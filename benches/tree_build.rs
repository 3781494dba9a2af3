use archfs::archive;
use archfs::common::{ArchiveFormat, EntryDescriptor, LinkPolicy};
use archfs::export::{ArchiveWriter, EntryContent, WriterOptions};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::Read;
use std::path::Path;

const PAYLOAD: &[u8] = b"0123456789abcdef";

// Spread entries over a few levels so directory synthesis does real work.
fn write_fixture(path: &Path, format: ArchiveFormat, entries: usize) {
    let opts = WriterOptions::new(format, LinkPolicy::Skip);
    let mut writer = ArchiveWriter::create(path, &opts).unwrap();
    for i in 0..entries {
        let name = format!("d{}/s{}/file_{i}.txt", i % 16, i % 7);
        writer
            .write_entry(&EntryDescriptor::file(name).with_mtime(1_600_000_000), EntryContent::Bytes(PAYLOAD))
            .unwrap();
    }
    writer.finish().unwrap();
}

fn bench_tree_build(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let mut group = c.benchmark_group("tree_build");

    for &entries in &[100usize, 1_000, 10_000] {
        for (format, ext) in [(ArchiveFormat::Tar, "tar"), (ArchiveFormat::Zip, "zip")] {
            let path = dir.path().join(format!("fixture_{entries}.{ext}"));
            write_fixture(&path, format, entries);

            group.throughput(Throughput::Elements(entries as u64));
            group.bench_with_input(BenchmarkId::new(ext, entries), &path, |b, path| {
                b.iter(|| {
                    let mut tree = archive::open(path).unwrap();
                    let nodes = tree.walk();
                    black_box(nodes.len());
                    tree.close();
                });
            });
        }
    }
    group.finish();
}

fn bench_random_content(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.tar");
    write_fixture(&path, ArchiveFormat::Tar, 2_000);

    let mut tree = archive::open(&path).unwrap();
    let leaves: Vec<_> = tree.walk().into_iter().filter(|n| !tree.is_directory(*n)).collect();

    c.bench_function("tree_content/tar_backward_reads", |b| {
        b.iter(|| {
            for node in leaves.iter().rev().step_by(97) {
                let mut reader = tree.content(*node).unwrap();
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf).unwrap();
                black_box(buf.len());
            }
        });
    });
}

criterion_group!(benches, bench_tree_build, bench_random_content);
criterion_main!(benches);
