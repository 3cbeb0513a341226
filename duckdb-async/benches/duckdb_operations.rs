//! Benchmarks for the async DuckDB facade.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use duckdb_async::adapter::{promisify, Callback};
use duckdb_async::{params, Database, OPEN_READWRITE};
use futures::StreamExt;
use tokio::runtime::Runtime;

fn create_runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn setup_database() -> Database {
    let db = Database::create(":memory:", OPEN_READWRITE).await.unwrap();

    db.exec(
        r#"
        CREATE TABLE users (
            id INTEGER PRIMARY KEY,
            name VARCHAR NOT NULL,
            email VARCHAR NOT NULL,
            age INTEGER,
            active BOOLEAN DEFAULT true
        );

        CREATE TABLE orders (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            total DECIMAL(10,2) NOT NULL,
            status VARCHAR DEFAULT 'pending'
        );

        INSERT INTO users (id, name, email, age, active)
        SELECT
            i,
            'User ' || i,
            'user' || i || '@example.com',
            20 + (i % 50),
            i % 2 = 0
        FROM generate_series(1, 10000) AS t(i);

        INSERT INTO orders (id, user_id, total, status)
        SELECT
            i,
            (i % 10000) + 1,
            (random() * 1000)::DECIMAL(10,2),
            CASE i % 4
                WHEN 0 THEN 'completed'
                WHEN 1 THEN 'pending'
                WHEN 2 THEN 'shipped'
                ELSE 'cancelled'
            END
        FROM generate_series(1, 50000) AS t(i);
        "#,
        (),
    )
    .await
    .unwrap();

    db
}

fn bench_adapter(c: &mut Criterion) {
    let rt = create_runtime();

    c.bench_function("promisify_immediate", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                promisify(|done: Callback<u64>| done(Ok(1)))
                    .await
                    .unwrap(),
            )
        })
    });
}

fn bench_simple_select(c: &mut Criterion) {
    let rt = create_runtime();
    let db = rt.block_on(setup_database());
    let stmt = rt
        .block_on(db.prepare("SELECT * FROM users WHERE id = ?", ()))
        .unwrap();

    let mut group = c.benchmark_group("duckdb_select_by_id");

    group.bench_function("ad_hoc", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                db.all("SELECT * FROM users WHERE id = ?", params![500])
                    .await
                    .unwrap(),
            )
        })
    });

    group.bench_function("prepared", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(stmt.all(params![500]).await.unwrap()) })
    });

    group.finish();
}

fn bench_aggregation(c: &mut Criterion) {
    let rt = create_runtime();
    let db = rt.block_on(setup_database());

    let mut group = c.benchmark_group("duckdb_aggregation");

    group.bench_function("sum_with_groupby", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                db.all(
                    "SELECT status, COUNT(*), SUM(total) FROM orders GROUP BY status",
                    (),
                )
                .await
                .unwrap(),
            )
        })
    });

    group.bench_function("left_join_with_agg", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                db.all(
                    r#"
                    SELECT u.name, COUNT(o.id) as order_count, SUM(o.total) as total_spent
                    FROM users u
                    LEFT JOIN orders o ON u.id = o.user_id
                    WHERE u.id <= 1000
                    GROUP BY u.id, u.name
                    "#,
                    (),
                )
                .await
                .unwrap(),
            )
        })
    });

    group.finish();
}

fn bench_result_shapes(c: &mut Criterion) {
    let rt = create_runtime();
    let db = rt.block_on(setup_database());
    let sql = "SELECT id, user_id, status FROM orders WHERE id <= 10000";

    let mut group = c.benchmark_group("duckdb_result_shapes");
    group.throughput(Throughput::Elements(10000));

    group.bench_function("rows", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(db.all(sql, ()).await.unwrap().len()) })
    });

    group.bench_function("record_batches", |b| {
        b.to_async(&rt).iter(|| async {
            let batches = db.arrow_ipc_all(sql, ()).await.unwrap();
            black_box(batches.iter().map(|b| b.num_rows()).sum::<usize>())
        })
    });

    group.bench_function("row_stream", |b| {
        b.to_async(&rt).iter(|| async {
            let stream = db.stream(sql, ()).unwrap();
            black_box(stream.count().await)
        })
    });

    group.finish();
}

fn bench_parallel_fan_out(c: &mut Criterion) {
    let rt = create_runtime();
    let db = rt.block_on(setup_database());
    let sql = "SELECT AVG(total) FROM orders WHERE user_id % 16 = ?";

    let mut group = c.benchmark_group("duckdb_fan_out_16");
    group.throughput(Throughput::Elements(16));

    group.bench_function("serialized", |b| {
        b.to_async(&rt).iter(|| async {
            let queries: Vec<_> = (0..16).map(|n| db.all(sql, params![n])).collect();
            black_box(futures::future::join_all(queries).await)
        })
    });

    rt.block_on(db.parallelize()).unwrap();
    group.bench_function("parallelized", |b| {
        b.to_async(&rt).iter(|| async {
            let queries: Vec<_> = (0..16).map(|n| db.all(sql, params![n])).collect();
            black_box(futures::future::join_all(queries).await)
        })
    });

    group.finish();
}

fn bench_lifecycle(c: &mut Criterion) {
    let rt = create_runtime();

    c.bench_function("duckdb_open_close", |b| {
        b.to_async(&rt).iter(|| async {
            let db = Database::create(":memory:", OPEN_READWRITE).await.unwrap();
            let conn = db.connect().await.unwrap();
            conn.close().await.unwrap();
            db.close().await.unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_adapter,
    bench_simple_select,
    bench_aggregation,
    bench_result_shapes,
    bench_parallel_fan_out,
    bench_lifecycle,
);

criterion_main!(benches);
