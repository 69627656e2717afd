//! dpkg status 벤치마크
//!
//! 통합 status 분할과 Debian 버전 비교 성능을 측정합니다.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use layerfix_pkgmgr::dpkg::status::{installed_versions, split_status};
use layerfix_pkgmgr::dpkg::version::compare;

/// `count`개의 패키지 블록을 가진 status 파일
fn synthetic_status(count: usize) -> String {
    (0..count)
        .map(|i| {
            format!(
                "Package: lib{i}\nStatus: install ok installed\nArchitecture: amd64\n\
                 Version: 1:{i}.2.3-4+deb12u{}\nDescription: synthetic package {i}\n \
                 long description line\n\n",
                i % 9
            )
        })
        .collect()
}

fn bench_split_status(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_status");

    for count in [50usize, 500, 5000] {
        let status = synthetic_status(count);
        group.throughput(Throughput::Bytes(status.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &status, |b, data| {
            b.iter(|| split_status(black_box(data)))
        });
    }

    group.finish();
}

fn bench_installed_versions(c: &mut Criterion) {
    let status = synthetic_status(500);
    c.bench_function("installed_versions_500", |b| {
        b.iter(|| installed_versions(black_box(&status)))
    });
}

fn bench_version_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("deb_version_compare");
    group.throughput(Throughput::Elements(1));

    group.bench_function("revision", |b| {
        b.iter(|| compare(black_box("3.0.11-1~deb12u2"), black_box("3.0.13-1~deb12u1")))
    });
    group.bench_function("epoch", |b| {
        b.iter(|| compare(black_box("1:1.2.13.dfsg-1"), black_box("1.2.13.dfsg-3")))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_split_status,
    bench_installed_versions,
    bench_version_compare
);
criterion_main!(benches);
