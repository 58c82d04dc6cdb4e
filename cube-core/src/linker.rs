// Copyright 2026 the Cube authors. MIT license.
//
// The module linker (§4.C). Grounded line-for-line in
// `internal/worker.go`'s `require` closure: resolve the import id to an
// artifact, consult the compiled-program cache, fall back to the store,
// wrap as a CommonJS-style factory, compile, execute to obtain the
// factory, then call it with fresh `exports`/`module` objects.

use std::cell::RefCell;
use std::rc::Rc;

use crate::artifact::ArtifactType;
use crate::error::{CubeError, CubeResult};
use crate::program_cache::CompiledProgram;
use crate::vm::WorkerState;

/// Table from §4.C: maps an import-id prefix to an artifact type and the
/// stored name to look up.
pub fn resolve_import(id: &str) -> (String, ArtifactType) {
    if let Some(rest) = id.strip_prefix("./controller/") {
        (rest.to_string(), ArtifactType::Controller)
    } else if let Some(rest) = id.strip_prefix("./daemon/") {
        (rest.to_string(), ArtifactType::Daemon)
    } else if let Some(rest) = id.strip_prefix("./crontab/") {
        (rest.to_string(), ArtifactType::Crontab)
    } else if let Some(rest) = id.strip_prefix("./") {
        (canonicalize_path(rest), ArtifactType::Module)
    } else {
        (format!("node_modules/{id}"), ArtifactType::Module)
    }
}

/// `path.Clean`-equivalent canonicalisation for local module ids, so
/// `./a/../b` and `./b` hit the same cache entry.
fn canonicalize_path(p: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for seg in p.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            seg => parts.push(seg),
        }
    }
    parts.join("/")
}

/// §4.C step 1-6, executed synchronously from the `require` native
/// callback. `id` is the raw argument the script passed.
pub fn require<'s>(
    scope: &mut v8::HandleScope<'s>,
    state: &Rc<RefCell<WorkerState>>,
    id: &str,
) -> CubeResult<v8::Local<'s, v8::Value>> {
    let (name, kind) = resolve_import(id);
    let canonical_id = canonical_cache_key(id, &name, kind);

    let program = {
        let borrowed = state.borrow();
        borrowed.program_cache.get(&canonical_id)
    };

    let program = match program {
        Some(program) => program,
        None => {
            let source = {
                let borrowed = state.borrow();
                borrowed.store.get_compiled(&name, kind)?
            };
            let wrapped = format!("(function(exports, require, module) {{{source}\n}})");
            let program = CompiledProgram::new(canonical_id.clone(), wrapped);
            state.borrow().program_cache.insert(program.clone());
            program
        }
    };

    // §4.C step 4: execute the compiled program to obtain the factory.
    // This re-runs on every call, by contract (§8 "require(id) called
    // twice... re-runs on every call, not memoised per Worker").
    let factory_value = run_compiled(scope, &program)
        .ok_or_else(|| CubeError::ScriptException {
            code: "1".to_string(),
            message: format!("failed to compile module {canonical_id}"),
        })?;
    let factory: v8::Local<v8::Function> = factory_value
        .try_into()
        .map_err(|_| CubeError::ScriptException {
            code: "1".to_string(),
            message: format!("module {canonical_id} did not compile to a function"),
        })?;

    // §4.C step 5: fresh exports/module objects.
    let exports = v8::Object::new(scope);
    let module = v8::Object::new(scope);
    let exports_key = v8::String::new(scope, "exports").unwrap();
    module.set(scope, exports_key.into(), exports.into());

    let require_fn = lookup_global_require(scope)?;

    let undefined = v8::undefined(scope);
    let args = [exports.into(), require_fn.into(), module.into()];
    let this: v8::Local<v8::Value> = exports.into();
    let _ = undefined;
    let result = factory
        .call(scope, this, &args)
        .ok_or_else(|| CubeError::ScriptException {
            code: "1".to_string(),
            message: format!("module {canonical_id} threw during factory invocation"),
        })?;
    let _ = result;

    let exports_out = module
        .get(scope, exports_key.into())
        .ok_or_else(|| CubeError::ScriptException {
            code: "1".to_string(),
            message: "module.exports missing after factory call".to_string(),
        })?;
    Ok(exports_out)
}

/// The canonical cache key is the resolved `(type, name)` pair rather than
/// the raw argument, so `require("foo")` and a hypothetical
/// `require("node_modules/foo")` share one cache entry; `id` is kept only
/// for diagnostics.
fn canonical_cache_key(_id: &str, name: &str, kind: ArtifactType) -> String {
    match kind {
        ArtifactType::Controller => format!("./controller/{name}"),
        ArtifactType::Daemon => format!("./daemon/{name}"),
        ArtifactType::Crontab => format!("./crontab/{name}"),
        ArtifactType::Module => format!("./{name}"),
        _ => format!("./{name}"),
    }
}

fn lookup_global_require<'s>(scope: &mut v8::HandleScope<'s>) -> CubeResult<v8::Local<'s, v8::Function>> {
    let global = scope.get_current_context().global(scope);
    let key = v8::String::new(scope, "require").unwrap();
    let value = global.get(scope, key.into()).ok_or_else(|| CubeError::ScriptException {
        code: "1".to_string(),
        message: "global require is missing".to_string(),
    })?;
    value.try_into().map_err(|_| CubeError::ScriptException {
        code: "1".to_string(),
        message: "global require is not a function".to_string(),
    })
}

/// Compiles (or reuses a V8 code-cache hint for) the wrapped source and
/// runs it once to obtain its completion value — the module factory
/// (§4.B "a program that, when executed inside a VM, *produces* the
/// module factory"). The code-cache bytes are purely an accelerator: a
/// stale or isolate-mismatched cache is rejected by V8 and we silently
/// fall back to a plain compile, never a correctness hazard (§4.B
/// rationale).
fn run_compiled<'s>(scope: &mut v8::HandleScope<'s>, program: &CompiledProgram) -> Option<v8::Local<'s, v8::Value>> {
    let source_str = v8::String::new(scope, &program.wrapped_source)?;
    let name = v8::String::new(scope, &program.canonical_id)?;
    let origin = v8::ScriptOrigin::new(
        scope,
        name.into(),
        0,
        0,
        false,
        0,
        None,
        false,
        false,
        false,
        None,
    );

    let script = if let Some(bytes) = program.code_cache_bytes() {
        let cached = v8::script_compiler::CachedData::new(&bytes);
        let mut src = v8::script_compiler::Source::new_with_cached_data(source_str, Some(&origin), cached);
        v8::script_compiler::compile(
            scope,
            &mut src,
            v8::script_compiler::CompileOptions::ConsumeCodeCache,
            v8::script_compiler::NoCacheReason::NoReason,
        )
        .or_else(|| v8::Script::compile(scope, source_str, Some(&origin)))
    } else {
        let compiled = v8::Script::compile(scope, source_str, Some(&origin));
        if let Some(script) = compiled {
            if let Some(unbound) = script.get_unbound_script(scope) {
                if let Some(cache) = unbound.create_code_cache() {
                    program.offer_code_cache(cache.to_vec());
                }
            }
            Some(script)
        } else {
            None
        }
    };

    script.and_then(|s| s.run(scope))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_controller_prefix() {
        let (name, kind) = resolve_import("./controller/hello");
        assert_eq!(name, "hello");
        assert!(matches!(kind, ArtifactType::Controller));
    }

    #[test]
    fn resolves_bare_id_as_node_modules() {
        let (name, kind) = resolve_import("lodash");
        assert_eq!(name, "node_modules/lodash");
        assert!(matches!(kind, ArtifactType::Module));
    }

    #[test]
    fn resolves_local_module_and_canonicalises() {
        let (name, kind) = resolve_import("./utils/../helpers");
        assert_eq!(name, "helpers");
        assert!(matches!(kind, ArtifactType::Module));
    }
}
