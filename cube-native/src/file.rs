// Copyright 2026 the Cube authors. MIT license.
//
// `$native("file")` (§4.G "file | sandboxed filesystem rooted at
// files/"). Grounded in `internal/module/file.go`'s `FileClient`:
// `read`/`readRange`/`write`/`writeRange`/`stat`/`list`, every path first
// passed through `getPath`, which `path.Clean`s `"files/" + name` and
// rejects anything that climbs back out of the `files/` root — the same
// traversal guard, expressed with `std::path::Path` instead of Go's
// `path.Clean` + prefix check.

use std::cell::RefCell;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use cube_core::vm::WorkerState;

use crate::support::{arg_bytes, arg_i64, arg_string, make_bytes, make_json, set_method, throw, throw_on_err};

const ROOT: &str = "files";

pub fn factory<'s>(scope: &mut v8::HandleScope<'s>, _state: &Rc<RefCell<WorkerState>>) -> v8::Local<'s, v8::Value> {
    let obj = v8::Object::new(scope);
    set_method(scope, obj, "read", read);
    set_method(scope, obj, "readRange", read_range);
    set_method(scope, obj, "write", write);
    set_method(scope, obj, "writeRange", write_range);
    set_method(scope, obj, "stat", stat);
    set_method(scope, obj, "list", list);
    obj.into()
}

/// `path.Clean("files/" + name)` plus the `strings.HasPrefix(fp+"/",
/// "files/")` traversal check, ported to `Path` components: any `..`
/// component that would climb above `files/` is rejected outright rather
/// than relying on string-prefix comparison of a cleaned path.
fn sandboxed_path(name: &str) -> Result<PathBuf, &'static str> {
    let mut resolved = PathBuf::from(ROOT);
    for component in Path::new(name).components() {
        use std::path::Component;
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err("permission denial"),
            Component::RootDir | Component::Prefix(_) => return Err("permission denial"),
        }
    }
    Ok(resolved)
}

fn resolve(scope: &mut v8::HandleScope, name: &str) -> Option<PathBuf> {
    match sandboxed_path(name) {
        Ok(path) => Some(path),
        Err(message) => {
            throw(scope, message);
            None
        }
    }
}

fn read(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(name) = arg_string(scope, &args, 0) else {
        throw(scope, "file.read(name): name must be a string");
        return;
    };
    let Some(path) = resolve(scope, &name) else { return };
    if let Some(bytes) = throw_on_err(scope, fs::read(path)) {
        rv.set(make_bytes(scope, &bytes));
    }
}

fn read_range(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(name) = arg_string(scope, &args, 0) else {
        throw(scope, "file.readRange(name, offset, length): name must be a string");
        return;
    };
    let offset = arg_i64(scope, &args, 1).unwrap_or(0);
    let length = arg_i64(scope, &args, 2).unwrap_or(0).max(0) as usize;
    let Some(path) = resolve(scope, &name) else { return };

    let result = (|| -> std::io::Result<Vec<u8>> {
        let mut file = fs::File::open(&path)?;
        file.seek(SeekFrom::Start(offset.max(0) as u64))?;
        let mut buf = vec![0u8; length];
        let read = file.read(&mut buf)?;
        buf.truncate(read);
        Ok(buf)
    })();

    if let Some(bytes) = throw_on_err(scope, result) {
        rv.set(make_bytes(scope, &bytes));
    }
}

fn write(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let Some(name) = arg_string(scope, &args, 0) else {
        throw(scope, "file.write(name, data): name must be a string");
        return;
    };
    let Some(bytes) = arg_bytes(scope, &args, 1) else {
        throw(scope, "file.write(name, data): data must be a string or buffer");
        return;
    };
    let Some(path) = resolve(scope, &name) else { return };

    let result = (|| -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)
    })();
    throw_on_err(scope, result);
}

fn write_range(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let Some(name) = arg_string(scope, &args, 0) else {
        throw(scope, "file.writeRange(name, offset, data): name must be a string");
        return;
    };
    let offset = arg_i64(scope, &args, 1).unwrap_or(0);
    let Some(bytes) = arg_bytes(scope, &args, 2) else {
        throw(scope, "file.writeRange(name, offset, data): data must be a string or buffer");
        return;
    };
    let Some(path) = resolve(scope, &name) else { return };

    let result = (|| -> std::io::Result<()> {
        let mut file = OpenOptions::new().write(true).open(&path)?;
        file.seek(SeekFrom::Start(offset.max(0) as u64))?;
        file.write_all(&bytes)
    })();
    throw_on_err(scope, result);
}

fn stat(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(name) = arg_string(scope, &args, 0) else {
        throw(scope, "file.stat(name): name must be a string");
        return;
    };
    let Some(path) = resolve(scope, &name) else { return };
    let Some(metadata) = throw_on_err(scope, fs::metadata(&path)) else {
        return;
    };
    let modified = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let info = serde_json::json!({
        "name": path.file_name().map(|n| n.to_string_lossy().into_owned()),
        "size": metadata.len(),
        "isDir": metadata.is_dir(),
        "modifiedAt": modified,
    });
    rv.set(make_json(scope, &info));
}

fn list(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let name = arg_string(scope, &args, 0).unwrap_or_default();
    let Some(path) = resolve(scope, &name) else { return };
    let Some(entries) = throw_on_err(scope, fs::read_dir(&path)) else {
        return;
    };
    let names: Vec<serde_json::Value> = entries
        .filter_map(|e| e.ok())
        .map(|e| serde_json::json!(e.file_name().to_string_lossy().into_owned()))
        .collect();
    rv.set(make_json(scope, &serde_json::Value::Array(names)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandboxed_path_rejects_parent_traversal() {
        assert!(sandboxed_path("../../etc/passwd").is_err());
        assert!(sandboxed_path("a/../../b").is_err());
    }

    #[test]
    fn sandboxed_path_stays_rooted() {
        let path = sandboxed_path("reports/2026.json").unwrap();
        assert_eq!(path, PathBuf::from("files/reports/2026.json"));
    }
}
