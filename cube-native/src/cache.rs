// Copyright 2026 the Cube authors. MIT license.
//
// `$native("cache")` (§4.G, §5 "Cache module: a concurrent map + per-key
// expiry timer"). Grounded in `internal/module/cache.go`'s process-wide
// `CacheClient`: `set(key, value, ttlSeconds)`, `get(key)`, `del(key)`,
// each key independently expiring. A global singleton (§9 "Global
// singletons... process-wide cache"), guarded by `DashMap`'s own
// per-shard locking rather than one coarse mutex, since every Worker
// reaches this concurrently.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use once_cell::sync::Lazy;

use cube_core::vm::WorkerState;

use crate::support::{arg_i64, arg_string, make_json, read_json, set_method, throw};

struct Entry {
    value: serde_json::Value,
    expires_at: Option<Instant>,
}

static CACHE: Lazy<DashMap<String, Entry>> = Lazy::new(DashMap::new);

pub fn factory<'s>(scope: &mut v8::HandleScope<'s>, _state: &Rc<RefCell<WorkerState>>) -> v8::Local<'s, v8::Value> {
    let obj = v8::Object::new(scope);
    set_method(scope, obj, "set", set);
    set_method(scope, obj, "get", get);
    set_method(scope, obj, "del", del);
    set_method(scope, obj, "has", has);
    obj.into()
}

fn set(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let Some(key) = arg_string(scope, &args, 0) else {
        throw(scope, "cache.set(key, value, ttlSeconds?): key must be a string");
        return;
    };
    let value = read_json(scope, args.get(1));
    let ttl = arg_i64(scope, &args, 2).filter(|t| *t > 0);
    let expires_at = ttl.map(|t| Instant::now() + Duration::from_secs(t as u64));
    CACHE.insert(key, Entry { value, expires_at });
}

fn live_entry(key: &str) -> Option<serde_json::Value> {
    let expired = match CACHE.get(key) {
        Some(entry) => entry.expires_at.map(|at| Instant::now() >= at).unwrap_or(false),
        None => return None,
    };
    if expired {
        CACHE.remove(key);
        return None;
    }
    CACHE.get(key).map(|e| e.value.clone())
}

fn get(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(key) = arg_string(scope, &args, 0) else {
        throw(scope, "cache.get(key): key must be a string");
        return;
    };
    match live_entry(&key) {
        Some(value) => rv.set(make_json(scope, &value)),
        None => rv.set(v8::null(scope).into()),
    }
}

fn has(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(key) = arg_string(scope, &args, 0) else {
        throw(scope, "cache.has(key): key must be a string");
        return;
    };
    rv.set(v8::Boolean::new(scope, live_entry(&key).is_some()).into());
}

fn del(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let Some(key) = arg_string(scope, &args, 0) else {
        throw(scope, "cache.del(key): key must be a string");
        return;
    };
    CACHE.remove(&key);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_entries_are_treated_as_absent() {
        CACHE.insert(
            "expired-test-key".to_string(),
            Entry {
                value: serde_json::json!(1),
                expires_at: Some(Instant::now() - Duration::from_secs(1)),
            },
        );
        assert!(live_entry("expired-test-key").is_none());
        assert!(CACHE.get("expired-test-key").is_none());
    }
}
