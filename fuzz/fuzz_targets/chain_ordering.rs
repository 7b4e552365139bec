#![no_main]

use async_trait::async_trait;
use ferrous_scope::{ChainBuilder, Interceptor, InterceptorBinding, Invocation, InvocationData, ScopeResult};
use libfuzzer_sys::fuzz_target;

struct Mark {
    index: usize,
    halt: bool,
}

#[async_trait]
impl Interceptor<usize> for Mark {
    async fn intercept(&self, invocation: &mut Invocation<'_, usize>) -> ScopeResult<usize> {
        invocation.data_mut().push("entered", self.index);
        if self.halt {
            return Ok(usize::MAX);
        }
        invocation.proceed().await
    }
}

fuzz_target!(|data: &[u8]| {
    // Each byte is one link: low 7 bits are the priority, the high bit halts the chain.
    let links: Vec<(i32, bool)> = data
        .iter()
        .take(64)
        .map(|b| ((b & 0x7f) as i32 - 64, b & 0x80 != 0))
        .collect();

    let mut builder = ChainBuilder::<usize>::around_invoke();
    for (index, (priority, halt)) in links.iter().enumerate() {
        builder = builder.with(
            InterceptorBinding::around_invoke("mark", *priority),
            Mark { index, halt: *halt },
        );
    }
    let chain = builder.build().expect("single kind");

    let mut order: Vec<usize> = (0..links.len()).collect();
    order.sort_by_key(|&i| links[i].0);
    let halt_at = order.iter().position(|&i| links[i].1);

    let mut data = InvocationData::new();
    let target = |_: &InvocationData| async { Ok(7usize) };
    let (result, report) = futures::executor::block_on(chain.execute_reported(&target, &mut data));
    let result = result.expect("no link fails");

    let entered = data.take::<Vec<usize>>("entered").unwrap_or_default();
    match halt_at {
        Some(stop) => {
            assert_eq!(result, usize::MAX);
            assert!(!report.target_reached);
            assert_eq!(entered, order[..=stop].to_vec());
        }
        None => {
            assert_eq!(result, 7);
            assert!(report.target_reached);
            assert_eq!(entered, order);
        }
    }
});
