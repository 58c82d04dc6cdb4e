// Copyright 2026 the Cube authors. MIT license.
//
// `$native("zip")` (§4.G "zip | in-memory archive read/write"). Grounded
// in `internal/module/zip.go`'s `ZipClient`/`ZipReader`/`ZipFile`:
// `write(entries)` builds an archive in memory from a name→content map
// (string or bytes), `read(data)` opens an archive and exposes
// `getFiles()`, each with `getName()`/`getData()`.

use std::cell::RefCell;
use std::io::{Cursor, Read, Write};
use std::rc::Rc;
use std::sync::Arc;

use zip::write::SimpleFileOptions;
use zip::ZipArchive;

use cube_core::vm::WorkerState;

use crate::support::{arg_bytes, make_bytes, make_string, set_method, throw, throw_on_err};

pub fn factory<'s>(scope: &mut v8::HandleScope<'s>, _state: &Rc<RefCell<WorkerState>>) -> v8::Local<'s, v8::Value> {
    let obj = v8::Object::new(scope);
    set_method(scope, obj, "write", write);
    set_method(scope, obj, "read", read);
    obj.into()
}

fn write(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Ok(entries): Result<v8::Local<v8::Object>, _> = args.get(0).try_into() else {
        throw(scope, "zip.write(entries): entries must be an object of name -> string|buffer");
        return;
    };

    let buffer = Cursor::new(Vec::new());
    let mut writer = zip::ZipWriter::new(buffer);
    let options = SimpleFileOptions::default();

    let Some(names) = entries.get_own_property_names(scope, Default::default()) else {
        throw(scope, "zip.write(entries): entries must be an object");
        return;
    };

    for i in 0..names.length() {
        let Some(name_value) = names.get_index(scope, i) else { continue };
        let name = name_value.to_rust_string_lossy(scope);
        let Some(value) = entries.get(scope, name_value) else { continue };
        let Some(bytes) = arg_bytes_from_value(scope, value) else {
            throw(scope, &format!("zip.write: entry {name} is not a string or buffer"));
            return;
        };
        if throw_on_err(scope, writer.start_file(&name, options)).is_none() {
            return;
        }
        if throw_on_err(scope, writer.write_all(&bytes)).is_none() {
            return;
        }
    }

    let Some(cursor) = throw_on_err(scope, writer.finish()) else {
        return;
    };
    rv.set(make_bytes(scope, cursor.get_ref()));
}

fn arg_bytes_from_value(scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> Option<Vec<u8>> {
    if value.is_string() {
        return Some(value.to_rust_string_lossy(scope).into_bytes());
    }
    if let Ok(view) = v8::Local::<v8::ArrayBufferView>::try_from(value) {
        let len = view.byte_length();
        let mut bytes = vec![0u8; len];
        view.copy_contents(&mut bytes);
        return Some(bytes);
    }
    None
}

fn read(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(bytes) = arg_bytes(scope, &args, 0) else {
        throw(scope, "zip.read(data): data must be a string or buffer");
        return;
    };
    let archive = match ZipArchive::new(Cursor::new(bytes)) {
        Ok(archive) => archive,
        Err(err) => {
            throw(scope, &err.to_string());
            return;
        }
    };
    rv.set(bind_reader(scope, Arc::new(parking_lot::Mutex::new(archive))).into());
}

type Archive = ZipArchive<Cursor<Vec<u8>>>;

fn bind_reader<'s>(scope: &mut v8::HandleScope<'s>, archive: Arc<parking_lot::Mutex<Archive>>) -> v8::Local<'s, v8::Object> {
    let obj = v8::Object::new(scope);
    let external = v8::External::new(scope, Arc::into_raw(archive) as *mut std::ffi::c_void);
    let key = v8::String::new(scope, "__archive").unwrap();
    obj.set(scope, key.into(), external.into());
    set_method(scope, obj, "getFiles", get_files);
    obj
}

fn archive_of(scope: &mut v8::HandleScope, this: v8::Local<v8::Value>) -> Option<Arc<parking_lot::Mutex<Archive>>> {
    let object: v8::Local<v8::Object> = this.try_into().ok()?;
    let key = v8::String::new(scope, "__archive")?;
    let value = object.get(scope, key.into())?;
    let external: v8::Local<v8::External> = value.try_into().ok()?;
    let ptr = external.value() as *const parking_lot::Mutex<Archive>;
    // SAFETY: leaked at construction, stays valid for the object's life.
    let borrowed = unsafe { Arc::from_raw(ptr) };
    let clone = borrowed.clone();
    std::mem::forget(borrowed);
    Some(clone)
}

fn get_files(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(archive) = archive_of(scope, args.this().into()) else {
        throw(scope, "zipReader.getFiles: not a zip reader");
        return;
    };
    let mut guard = archive.lock();
    let count = guard.len();
    let mut files = Vec::with_capacity(count);
    for i in 0..count {
        let Some(mut file) = throw_on_err(scope, guard.by_index(i)) else {
            return;
        };
        let name = file.name().to_string();
        let mut data = Vec::new();
        if throw_on_err(scope, file.read_to_end(&mut data)).is_none() {
            return;
        }
        files.push((name, data));
    }
    drop(guard);

    let array = v8::Array::new(scope, files.len() as i32);
    for (i, (name, data)) in files.into_iter().enumerate() {
        let entry = v8::Object::new(scope);
        let name_key = v8::String::new(scope, "name").unwrap();
        let name_value = make_string(scope, &name);
        entry.set(scope, name_key.into(), name_value);
        let data_key = v8::String::new(scope, "data").unwrap();
        let data_value = make_bytes(scope, &data);
        entry.set(scope, data_key.into(), data_value);
        array.set_index(scope, i as u32, entry.into());
    }
    rv.set(array.into());
}
