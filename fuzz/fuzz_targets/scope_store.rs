#![no_main]

use ferrous_scope::{ScopeInstanceStore, ScopeKey};
use libfuzzer_sys::fuzz_target;
use std::collections::HashMap;
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    let store = ScopeInstanceStore::new();
    let mut expected: HashMap<(u8, u8), Arc<u32>> = HashMap::new();

    for chunk in data.chunks(3).take(256) {
        let [op, scope, qualifier] = match chunk {
            [a, b, c] => [*a, *b % 8, *c % 4],
            _ => return,
        };
        let key = ScopeKey::new(format!("s{scope}"));
        let name = format!("q{qualifier}");

        match op % 3 {
            0 => {
                let got = futures::executor::block_on(
                    store.get_or_create(&key, name.as_str(), || async move { Ok(u32::from(op)) }),
                )
                .expect("supplier never fails");
                let known = expected.entry((scope, qualifier)).or_insert_with(|| got.clone());
                assert!(Arc::ptr_eq(known, &got));
            }
            1 => {
                let installed = store.replace(&key, name.as_str(), Arc::new(u32::from(op)));
                expected.insert((scope, qualifier), installed);
            }
            _ => {
                let had = expected.keys().any(|(s, _)| *s == scope);
                expected.retain(|(s, _), _| *s != scope);
                assert!(!had || store.invalidate(&key));
                assert!(!store.contains_scope(&key));
            }
        }
    }
});
