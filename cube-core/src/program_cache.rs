// Copyright 2026 the Cube authors. MIT license.
//
// The compiled-program cache (§4.B). Grounded in `internal/worker.go`'s
// `Cache.Modules` map and its accompanying comment: "this should not cache
// the module directly, because the module depends on the current vm
// instance... it would cause a runtime transition error." We keep the same
// separation: a `CompiledProgram` is a V8 `UnboundScript` (via its code
// cache bytes) plus the wrapped source text — never a `v8::Local` bound to
// one isolate, so the identical entry can be re-instantiated in every
// Worker's isolate.

use dashmap::DashMap;
use std::sync::Arc;

/// An immutable, reentrant compiled form, keyed by canonical import id
/// (§4.B, §4.C). `wrapped_source` is the CommonJS-style wrapper applied in
/// `§4.C` step 3 (`(function(exports, require, module) { <src>\n})`);
/// `code_cache` is V8's serialized compile cache for that source, used to
/// skip re-parsing when the identical program is instantiated in a
/// different Worker's isolate. `code_cache` is produced lazily: the first
/// Worker to compile a given program's V8 code in a given process
/// contributes it back via `offer_code_cache`; future hits use it as a
/// hint (V8 silently ignores a stale/mismatched cache, it never makes
/// compilation *incorrect* — the bytes are purely an accelerator).
#[derive(Clone)]
pub struct CompiledProgram {
    pub canonical_id: String,
    pub wrapped_source: Arc<str>,
    pub code_cache: Arc<parking_lot::RwLock<Option<Vec<u8>>>>,
}

impl CompiledProgram {
    pub fn new(canonical_id: String, wrapped_source: String) -> Self {
        Self {
            canonical_id,
            wrapped_source: Arc::from(wrapped_source),
            code_cache: Arc::new(parking_lot::RwLock::new(None)),
        }
    }

    pub fn code_cache_bytes(&self) -> Option<Vec<u8>> {
        self.code_cache.read().clone()
    }

    pub fn offer_code_cache(&self, bytes: Vec<u8>) {
        let mut slot = self.code_cache.write();
        if slot.is_none() {
            *slot = Some(bytes);
        }
    }
}

/// Process-wide, shared by every Worker (§3 "Ownership rules": "Compiled
/// programs are shared by all Workers"). Invalidation is coarse per §4.B:
/// either the whole map is cleared (bulk import, any patch) or a single
/// key is removed (single update) — callers choose which with `clear_all`
/// / `invalidate`.
#[derive(Default)]
pub struct ProgramCache {
    programs: DashMap<String, CompiledProgram>,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, canonical_id: &str) -> Option<CompiledProgram> {
        self.programs.get(canonical_id).map(|e| e.clone())
    }

    pub fn insert(&self, program: CompiledProgram) {
        self.programs.insert(program.canonical_id.clone(), program);
    }

    pub fn invalidate(&self, canonical_id: &str) {
        self.programs.remove(canonical_id);
    }

    pub fn clear_all(&self) {
        self.programs.clear();
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_round_trips() {
        let cache = ProgramCache::new();
        let program = CompiledProgram::new("./foo".into(), "(function(){})".into());
        cache.insert(program);
        assert!(cache.get("./foo").is_some());
        assert!(cache.get("./bar").is_none());
    }

    #[test]
    fn invalidate_removes_single_key() {
        let cache = ProgramCache::new();
        cache.insert(CompiledProgram::new("./a".into(), "".into()));
        cache.insert(CompiledProgram::new("./b".into(), "".into()));
        cache.invalidate("./a");
        assert!(cache.get("./a").is_none());
        assert!(cache.get("./b").is_some());
    }

    #[test]
    fn clear_all_drops_everything() {
        let cache = ProgramCache::new();
        cache.insert(CompiledProgram::new("./a".into(), "".into()));
        cache.clear_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn code_cache_first_writer_wins() {
        let program = CompiledProgram::new("./a".into(), "".into());
        program.offer_code_cache(vec![1, 2, 3]);
        program.offer_code_cache(vec![9, 9, 9]);
        assert_eq!(program.code_cache_bytes(), Some(vec![1, 2, 3]));
    }
}
