use criterion::{Criterion, black_box, criterion_group, criterion_main};
use quarry_query_parser::{GrepConfig, QueryParser};

fn bench_parse(c: &mut Criterion) {
    let file_parser = QueryParser::default();
    let grep_parser = QueryParser::new(GrepConfig);

    c.bench_function("parse_plain_token", |b| {
        b.iter(|| file_parser.parse(black_box("main")))
    });

    c.bench_function("parse_with_constraints", |b| {
        b.iter(|| file_parser.parse(black_box("src name *.rs !test /lib/ status:modified")))
    });

    c.bench_function("parse_with_location", |b| {
        b.iter(|| file_parser.parse(black_box("src/main.rs:120:4")))
    });

    c.bench_function("parse_grep_query", |b| {
        b.iter(|| grep_parser.parse(black_box("fn main *.rs !/target/")))
    });
}

criterion_group!(benches, bench_parse);
criterion_main!(benches);
