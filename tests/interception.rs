/// Interceptor chain integration tests
///
/// These tests verify link ordering, result wrapping, construction staging,
/// short-circuiting and failure propagation through complete chains.

use async_trait::async_trait;
use ferrous_scope::{
    BeanCollection, ChainBuilder, ChainState, Interceptor, InterceptorBinding, Invocation, InvocationData,
    ScopeError, ScopeKey, ScopeResult, Target,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ===== Test Types =====

#[derive(Debug, Default)]
struct Rocket {
    stages: Vec<String>,
}

impl Rocket {
    fn fire(&self) -> String {
        let mut parts = self.stages.clone();
        parts.push("all check ready, fire".to_string());
        parts.join(" -> ")
    }
}

/// Stages a label before construction; optionally wires the staged labels
/// into the constructed rocket afterwards.
struct ConstructStage {
    label: &'static str,
    inject: bool,
}

#[async_trait]
impl Interceptor<Rocket> for ConstructStage {
    async fn intercept(&self, invocation: &mut Invocation<'_, Rocket>) -> ScopeResult<Rocket> {
        invocation.data_mut().push("stages", self.label.to_string());
        let mut rocket = invocation.proceed().await?;
        if self.inject {
            if let Some(stages) = invocation.data().get::<Vec<String>>("stages") {
                rocket.stages = stages.clone();
            }
        }
        Ok(rocket)
    }
}

/// Prefixes the downstream result with a label.
struct InvokeStage(&'static str);

#[async_trait]
impl Interceptor<String> for InvokeStage {
    async fn intercept(&self, invocation: &mut Invocation<'_, String>) -> ScopeResult<String> {
        let inner = invocation.proceed().await?;
        Ok(format!("{} -> {}", self.0, inner))
    }
}

struct Recorder {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Interceptor<String> for Recorder {
    async fn intercept(&self, invocation: &mut Invocation<'_, String>) -> ScopeResult<String> {
        self.log.lock().unwrap().push(format!("enter {}", self.name));
        let result = invocation.proceed().await;
        self.log.lock().unwrap().push(format!("exit {}", self.name));
        result
    }
}

struct Guard;

#[async_trait]
impl Interceptor<String> for Guard {
    async fn intercept(&self, _invocation: &mut Invocation<'_, String>) -> ScopeResult<String> {
        Ok("denied".to_string())
    }
}

#[derive(Debug)]
struct LaunchAbort(u32);

impl std::fmt::Display for LaunchAbort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "launch aborted with code {}", self.0)
    }
}

impl std::error::Error for LaunchAbort {}

struct Launcher;

fn launch_target() -> impl Fn(&InvocationData) -> std::future::Ready<ScopeResult<String>> + Send + Sync {
    |_: &InvocationData| std::future::ready(Ok("launch".to_string()))
}

// ===== Ordering =====

#[tokio::test]
async fn test_around_invoke_wraps_results_in_priority_order() {
    let chain = ChainBuilder::<String>::around_invoke()
        .with(InterceptorBinding::around_invoke("second", 1), InvokeStage("second stage fired"))
        .with(InterceptorBinding::around_invoke("first", 0), InvokeStage("first stage fired"))
        .build()
        .unwrap();

    let result = chain.invoke(&launch_target()).await.unwrap();
    assert_eq!(result, "first stage fired -> second stage fired -> launch");
}

#[tokio::test]
async fn test_entry_order_is_ascending_priority() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let chain = ChainBuilder::<String>::around_invoke()
        .with(InterceptorBinding::around_invoke("p1", 1), Recorder { name: "p1", log: log.clone() })
        .with(InterceptorBinding::around_invoke("p0", 0), Recorder { name: "p0", log: log.clone() })
        .build()
        .unwrap();

    chain.invoke(&launch_target()).await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["enter p0", "enter p1", "exit p1", "exit p0"]);
}

#[tokio::test]
async fn test_order_is_identical_across_executions() {
    let chain = ChainBuilder::<String>::around_invoke()
        .with(InterceptorBinding::around_invoke("c", 3), InvokeStage("c"))
        .with(InterceptorBinding::around_invoke("a", 1), InvokeStage("a"))
        .with(InterceptorBinding::around_invoke("b", 2), InvokeStage("b"))
        .build()
        .unwrap();

    for _ in 0..5 {
        assert_eq!(chain.invoke(&launch_target()).await.unwrap(), "a -> b -> c -> launch");
    }
}

// ===== Construction =====

#[tokio::test]
async fn test_around_construct_stages_and_injects() {
    let chain = ChainBuilder::<Rocket>::around_construct()
        .with(
            InterceptorBinding::around_construct("second", 1),
            ConstructStage { label: "second stage ready", inject: true },
        )
        .with(
            InterceptorBinding::around_construct("first", 0),
            ConstructStage { label: "first stage ready", inject: false },
        )
        .build()
        .unwrap();

    let constructor = |_: &InvocationData| async { Ok(Rocket::default()) };
    let rocket = chain.invoke(&constructor).await.unwrap();

    assert_eq!(rocket.fire(), "first stage ready -> second stage ready -> all check ready, fire");
}

#[tokio::test]
async fn test_bean_context_runs_construct_chain_once_per_scope() {
    let constructions = Arc::new(AtomicUsize::new(0));
    let counter = constructions.clone();

    let mut beans = BeanCollection::new();
    beans
        .add_scoped(move |_: &InvocationData| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Rocket::default()) }
        })
        .intercept_construct::<Rocket, _>("first", 0, ConstructStage { label: "first stage ready", inject: false })
        .intercept_construct::<Rocket, _>("second", 1, ConstructStage { label: "second stage ready", inject: true });
    let ctx = beans.build();

    let (a, b) = ctx
        .lifecycle()
        .run_scoped(ScopeKey::new("launch-pad"), async {
            (ctx.get::<Rocket>().await.unwrap(), ctx.get::<Rocket>().await.unwrap())
        })
        .await;

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.fire(), "first stage ready -> second stage ready -> all check ready, fire");
    assert_eq!(constructions.load(Ordering::SeqCst), 1);
}

// ===== Short-circuit and failures =====

#[tokio::test]
async fn test_short_circuit_skips_later_links_and_target() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let target_calls = Arc::new(AtomicUsize::new(0));
    let calls = target_calls.clone();

    let chain = ChainBuilder::<String>::around_invoke()
        .with(InterceptorBinding::around_invoke("outer", 0), Recorder { name: "outer", log: log.clone() })
        .with(InterceptorBinding::around_invoke("guard", 1), Guard)
        .with(InterceptorBinding::around_invoke("inner", 2), Recorder { name: "inner", log: log.clone() })
        .build()
        .unwrap();

    let target = move |_: &InvocationData| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok("launch".to_string()) }
    };
    let mut data = InvocationData::for_method("launch");
    let (result, report) = chain.execute_reported(&target, &mut data).await;

    assert_eq!(result.unwrap(), "denied");
    assert_eq!(report.resolution(), ChainState::ShortCircuited);
    assert_eq!(target_calls.load(Ordering::SeqCst), 0);
    assert_eq!(*log.lock().unwrap(), vec!["enter outer", "exit outer"]);
}

#[tokio::test]
async fn test_target_failure_propagates_unmodified() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let chain = ChainBuilder::<String>::around_invoke()
        .with(InterceptorBinding::around_invoke("outer", 0), Recorder { name: "outer", log: log.clone() })
        .with(InterceptorBinding::around_invoke("stage", 1), InvokeStage("never"))
        .build()
        .unwrap();

    let target = |_: &InvocationData| async { Err::<String, _>(ScopeError::failed(LaunchAbort(7))) };
    let err = chain.invoke(&target).await.unwrap_err();

    match err {
        ScopeError::Failed(source) => {
            let abort = source.downcast_ref::<LaunchAbort>().expect("original error type");
            assert_eq!(abort.0, 7);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(*log.lock().unwrap(), vec!["enter outer", "exit outer"]);
}

#[tokio::test]
async fn test_empty_chain_matches_direct_call() {
    let chain = ChainBuilder::<String>::around_invoke().build().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let counted = {
        let calls = calls.clone();
        move |data: &InvocationData| {
            calls.fetch_add(1, Ordering::SeqCst);
            let method = data.method().unwrap_or("none").to_string();
            async move { Ok(format!("called {method}")) }
        }
    };

    let mut direct_data = InvocationData::for_method("launch");
    let direct = Target::<String>::call(&counted, &direct_data).await.unwrap();
    let via_chain = chain.execute(&counted, &mut direct_data).await.unwrap();

    assert_eq!(direct, via_chain);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(direct_data.is_empty());
}

#[tokio::test]
async fn test_bean_context_invoke_uses_registered_chain() {
    let mut beans = BeanCollection::new();
    beans
        .intercept_invoke::<Launcher, String, _>("launch", "second", 1, InvokeStage("second stage fired"))
        .intercept_invoke::<Launcher, String, _>("launch", "first", 0, InvokeStage("first stage fired"));
    let ctx = beans.build();

    let out = ctx.invoke::<Launcher, String>("launch", &launch_target()).await.unwrap();
    assert_eq!(out, "first stage fired -> second stage fired -> launch");

    // Other methods of the same type are not intercepted.
    let plain = ctx.invoke::<Launcher, String>("abort", &launch_target()).await.unwrap();
    assert_eq!(plain, "launch");
}
