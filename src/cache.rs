//! Thread-local compile cache.
//!
//! Compiling the same text twice yields the same descriptor tree, so the
//! analyzer reuses the previous result. Entries are keyed by the xxh3 digest
//! of the source and confirmed by comparing the text. The cache is capped at
//! 64 entries; when full it is cleared and rebuilt on demand.

use crate::compiler::{self, CompileError, CompiledScript};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64;

const MAX_CACHE_ENTRIES: usize = 64;

thread_local! {
    static COMPILE_CACHE: RefCell<HashMap<u64, (Arc<str>, Arc<CompiledScript>)>> =
        RefCell::new(HashMap::new());
}

/// Get a compiled script from cache, or compile and cache it.
///
/// Failed compiles are not cached.
pub fn get_or_compile(source: &str) -> Result<Arc<CompiledScript>, CompileError> {
    let key = xxh3_64(source.as_bytes());

    let hit = COMPILE_CACHE.with(|cache| {
        cache
            .borrow()
            .get(&key)
            .filter(|(text, _)| text.as_ref() == source)
            .map(|(_, script)| Arc::clone(script))
    });
    if let Some(script) = hit {
        return Ok(script);
    }

    let compiled = Arc::new(compiler::compile(source)?);
    COMPILE_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        if cache.len() >= MAX_CACHE_ENTRIES {
            cache.clear();
        }
        cache.insert(key, (Arc::from(source), Arc::clone(&compiled)));
    });
    Ok(compiled)
}

/// Clear the compile cache (mainly for testing).
pub fn clear_cache() {
    COMPILE_CACHE.with(|cache| {
        cache.borrow_mut().clear();
    });
}

/// Get cache statistics for monitoring.
pub fn cache_size() -> usize {
    COMPILE_CACHE.with(|cache| cache.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_compile_hits_cache() {
        clear_cache();
        let a = get_or_compile("function f() { return 1; }").unwrap();
        let b = get_or_compile("function f() { return 1; }").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache_size(), 1);
    }

    #[test]
    fn errors_are_not_cached() {
        clear_cache();
        assert!(get_or_compile("function (").is_err());
        assert_eq!(cache_size(), 0);
    }
}
