// Copyright 2026 the Cube authors. MIT license.
//
// `$native("db")` (§4.G, §5 "DB transactions"). Grounded in
// `internal/module/db.go`'s `DatabaseClient`/`DatabaseTransaction`: plain
// parameterised `query`/`exec` against the process's single database
// connection, plus a transaction scope. The original's `BeginTx` returns
// a `*sql.Tx` the script holds onto and later calls `.Commit()`/
// `.Rollback()` on directly; we instead take the spec's own framing of
// the same capability at face value (§4.G "transaction scope taking a
// callback") and expose `db.transaction(fn)`, which is the shape every
// other native here already uses for scoped resources (§4.G "lock |
// named mutex, auto-released on worker defer").
//
// Script values and SQL parameters cross via the same
// `serde_json::Value` round-trip the rest of this crate uses
// (`support::read_json`/`make_json`).

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;

use cube_core::vm::{state_from_scope, WorkerState};

use crate::support::{arg_string, make_json, read_json, set_method, throw, throw_on_err};

pub fn factory<'s>(scope: &mut v8::HandleScope<'s>, _state: &Rc<RefCell<WorkerState>>) -> v8::Local<'s, v8::Value> {
    let obj = v8::Object::new(scope);
    set_method(scope, obj, "query", query);
    set_method(scope, obj, "exec", exec);
    set_method(scope, obj, "transaction", transaction);
    obj.into()
}

fn connection(scope: &mut v8::HandleScope) -> Arc<parking_lot::Mutex<Connection>> {
    state_from_scope(scope).borrow().store.raw_connection()
}

fn json_to_sql(value: serde_json::Value) -> SqlValue {
    match value {
        serde_json::Value::Null => SqlValue::Null,
        serde_json::Value::Bool(b) => SqlValue::Integer(b as i64),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        serde_json::Value::String(s) => SqlValue::Text(s),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_json(value: ValueRef) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::json!(i),
        ValueRef::Real(f) => serde_json::json!(f),
        ValueRef::Text(t) => serde_json::json!(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => {
            use base64::Engine;
            serde_json::json!(base64::engine::general_purpose::STANDARD.encode(b))
        }
    }
}

fn bound_params(scope: &mut v8::HandleScope, args: &v8::FunctionCallbackArguments, index: i32) -> Vec<SqlValue> {
    let value = args.get(index);
    if value.is_undefined() {
        return Vec::new();
    }
    match read_json(scope, value) {
        serde_json::Value::Array(items) => items.into_iter().map(json_to_sql).collect(),
        serde_json::Value::Null => Vec::new(),
        other => vec![json_to_sql(other)],
    }
}

fn run_query(conn: &Connection, stmt: &str, params: &[SqlValue]) -> rusqlite::Result<serde_json::Value> {
    let mut prepared = conn.prepare(stmt)?;
    let column_names: Vec<String> = prepared.column_names().iter().map(|s| s.to_string()).collect();
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
    let rows = prepared.query_map(param_refs.as_slice(), |row| {
        let mut record = serde_json::Map::new();
        for (i, name) in column_names.iter().enumerate() {
            record.insert(name.clone(), sql_to_json(row.get_ref(i)?));
        }
        Ok(serde_json::Value::Object(record))
    })?;
    let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(serde_json::Value::Array(records))
}

fn query(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(stmt) = arg_string(scope, &args, 0) else {
        throw(scope, "db.query(stmt, params?): stmt must be a string");
        return;
    };
    let params = bound_params(scope, &args, 1);
    let conn = connection(scope);
    let result = {
        let guard = conn.lock();
        run_query(&guard, &stmt, &params)
    };
    let Some(rows) = throw_on_err(scope, result) else {
        return;
    };
    rv.set(make_json(scope, &rows));
}

fn exec(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(stmt) = arg_string(scope, &args, 0) else {
        throw(scope, "db.exec(stmt, params?): stmt must be a string");
        return;
    };
    let params = bound_params(scope, &args, 1);
    let conn = connection(scope);
    let result = {
        let guard = conn.lock();
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
        guard.execute(&stmt, param_refs.as_slice())
    };
    if let Some(changed) = throw_on_err(scope, result) {
        rv.set(v8::Number::new(scope, changed as f64).into());
    }
}

/// §4.G "transaction scope taking a callback"; §5 "a transaction is tied
/// to the Worker that opened it; on interrupt, the defer rolls it back."
/// The rollback defer is registered before the callback runs, the same
/// inversion `lock.rs`/`pipe.rs` use: the guard exists to *cause*
/// cleanup on interrupt, not merely to run after a normal return.
fn transaction(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Ok(callback): Result<v8::Local<v8::Function>, _> = args.get(0).try_into() else {
        throw(scope, "db.transaction(fn): fn must be a function");
        return;
    };
    let conn = connection(scope);

    {
        let guard = conn.lock();
        if throw_on_err(scope, guard.execute_batch("begin")).is_none() {
            return;
        }
    }

    let resolved = Arc::new(AtomicBool::new(false));
    {
        let conn = conn.clone();
        let resolved = resolved.clone();
        state_from_scope(scope).borrow_mut().add_defer(move || {
            if !resolved.swap(true, Ordering::SeqCst) {
                let guard = conn.lock();
                let _ = guard.execute_batch("rollback");
            }
        });
    }

    let undefined = v8::undefined(scope).into();
    let outcome = callback.call(scope, undefined, &[]);

    match outcome {
        Some(value) => {
            let guard = conn.lock();
            let committed = guard.execute_batch("commit");
            drop(guard);
            resolved.store(true, Ordering::SeqCst);
            if throw_on_err(scope, committed).is_some() {
                rv.set(value);
            }
        }
        None => {
            // The callback already threw; the pending defer above rolls
            // back on Worker reset/interrupt, but we also roll back
            // immediately so the connection is free for the next query
            // within the same run.
            let guard = conn.lock();
            let _ = guard.execute_batch("rollback");
            drop(guard);
            resolved.store(true, Ordering::SeqCst);
        }
    }
}
