use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ferrous_scope::*;
use std::sync::Arc;

// ===== Micro Benchmarks =====

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

fn bench_scoped_hit(c: &mut Criterion) {
    let rt = runtime();
    let store = ScopeInstanceStore::new();
    let scope = ScopeKey::new("bench");

    // Prime the slot
    rt.block_on(store.get_or_create(&scope, "", || async { Ok(42u64) })).unwrap();

    c.bench_function("scoped_hit_u64", |b| {
        b.iter(|| {
            let v = rt
                .block_on(store.get_or_create(&scope, "", || async { Ok(0u64) }))
                .unwrap();
            black_box(v);
        })
    });
}

fn bench_scoped_cold(c: &mut Criterion) {
    let rt = runtime();

    c.bench_function("scoped_cold_then_invalidate", |b| {
        let store = ScopeInstanceStore::new();
        let scope = ScopeKey::new("cold");
        b.iter(|| {
            let v = rt
                .block_on(store.get_or_create(&scope, "", || async { Ok(vec![0u64; 64]) }))
                .unwrap();
            black_box(v);
            store.invalidate(&scope);
        })
    });
}

fn bench_bean_context_in_scope(c: &mut Criterion) {
    let rt = runtime();
    let mut beans = BeanCollection::new();
    beans.add_scoped(|_: &InvocationData| async { Ok(String::from("session")) });
    let ctx = beans.build();
    let scope = ctx.lifecycle().enter(ScopeKey::new("req"));

    c.bench_function("bean_context_get_in_scope", |b| {
        b.iter(|| {
            let v = rt.block_on(scope.clone().scope(ctx.get::<String>())).unwrap();
            black_box(v);
        })
    });
}

// ===== Chain Benchmarks =====

struct PassThrough;

#[async_trait]
impl Interceptor<u64> for PassThrough {
    async fn intercept(&self, invocation: &mut Invocation<'_, u64>) -> ScopeResult<u64> {
        invocation.proceed().await
    }
}

fn bench_chain_depth(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("chain_depth");

    for depth in [0usize, 1, 4, 16] {
        let mut builder = ChainBuilder::<u64>::around_invoke();
        for i in 0..depth {
            builder = builder.with(InterceptorBinding::around_invoke("pass", i as i32), PassThrough);
        }
        let chain = builder.build().unwrap();
        let target = |_: &InvocationData| async { Ok(1u64) };

        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| {
                let v = rt.block_on(chain.invoke(&target)).unwrap();
                black_box(v);
            })
        });
    }

    group.finish();
}

fn bench_registry_cached_chain(c: &mut Criterion) {
    struct Service;

    let mut registry = InterceptionRegistry::new();
    let id = TargetId::method::<Service>("call");
    for i in 0..4 {
        registry.register::<u64, _>(id.clone(), InterceptorBinding::around_invoke("pass", i), PassThrough);
    }
    let _ = registry.chain_for::<u64>(&id, InterceptionKind::AroundInvoke).unwrap();

    c.bench_function("registry_chain_for_cached", |b| {
        b.iter(|| {
            let chain = registry.chain_for::<u64>(&id, InterceptionKind::AroundInvoke).unwrap();
            black_box(chain);
        })
    });
}

// ===== Concurrent Benchmarks =====

fn bench_concurrent_scopes(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    c.bench_function("concurrent_64_scopes", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = Arc::new(ScopeInstanceStore::new());
                let mut handles = Vec::with_capacity(64);
                for i in 0..64u64 {
                    let store = store.clone();
                    handles.push(tokio::spawn(async move {
                        let key = ScopeKey::new(format!("s{i}"));
                        store.get_or_create(&key, "", || async move { Ok(i) }).await.unwrap()
                    }));
                }
                for handle in handles {
                    black_box(handle.await.unwrap());
                }
            })
        })
    });
}

criterion_group!(
    benches,
    bench_scoped_hit,
    bench_scoped_cold,
    bench_bean_context_in_scope,
    bench_chain_depth,
    bench_registry_cached_chain,
    bench_concurrent_scopes
);
criterion_main!(benches);
