//! Guard Performance Benchmarks
//!
//! Measures validation cost for the shapes the pipeline sees most: plain
//! selects, wide joins, stacked queries and parse failures.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sqlsentry::{SqlDialect, SqlGuard};

const CASES: [(&str, &str); 5] = [
    ("simple_select", "SELECT * FROM Products"),
    (
        "join_aggregate",
        "SELECT DISTINCT p.Name, SUM(o.Quantity) AS sold FROM Products p \
         JOIN Orders o ON o.ProductId = p.Id WHERE p.Region LIKE 'Milano' \
         GROUP BY p.Name HAVING SUM(o.Quantity) > 10 ORDER BY sold DESC LIMIT 20",
    ),
    ("stacked", "SELECT * FROM Products; DELETE FROM Orders;"),
    ("drop", "DROP TABLE Products"),
    ("syntax_error", "SELEC * FORM Products WHERE"),
];

fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("guard_validate");
    let guard = SqlGuard::default();

    for (name, sql) in CASES {
        group.bench_with_input(BenchmarkId::from_parameter(name), sql, |b, sql| {
            b.iter(|| guard.validate(black_box(sql)));
        });
    }

    group.finish();
}

fn bench_dialects(c: &mut Criterion) {
    let mut group = c.benchmark_group("guard_dialect");
    let sql = CASES[1].1;

    for dialect in SqlDialect::ALL {
        let guard = SqlGuard::new(dialect);
        group.bench_function(dialect.as_str(), |b| {
            b.iter(|| guard.validate(black_box(sql)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_validate, bench_dialects);
criterion_main!(benches);
