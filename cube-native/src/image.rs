// Copyright 2026 the Cube authors. MIT license.
//
// `$native("image")` (§4.G "image | decode/encode/resize/pixel access").
// Grounded in `internal/module/image.go`'s `ImageClient`/`Image`:
// `create`/`parse`/`get`/`set`/`resize`/`toJPG`/`toPNG`. The original
// layers a `gg.Context` canvas on top with font rendering, rotation, and
// `DrawImage`/`DrawString` — per §1's "registration mechanism is in
// scope, internals are not" we keep the pixel-buffer surface (decode,
// raw pixel get/set, resize, re-encode, drawImage-as-blit) and drop the
// font/rotation drawing layer, which has no grounding crate anywhere in
// this corpus (see DESIGN.md).

use std::cell::RefCell;
use std::io::Cursor;
use std::rc::Rc;
use std::sync::Arc;

use image::{DynamicImage, GenericImage, GenericImageView, ImageFormat, Rgba};
use parking_lot::Mutex;

use cube_core::vm::WorkerState;

use crate::support::{arg_bytes, arg_i64, make_bytes, set_method, throw, throw_on_err};

pub fn factory<'s>(scope: &mut v8::HandleScope<'s>, _state: &Rc<RefCell<WorkerState>>) -> v8::Local<'s, v8::Value> {
    let obj = v8::Object::new(scope);
    set_method(scope, obj, "create", create);
    set_method(scope, obj, "parse", parse);
    obj.into()
}

fn create(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let width = arg_i64(scope, &args, 0).filter(|w| *w > 0).unwrap_or(1) as u32;
    let height = arg_i64(scope, &args, 1).filter(|h| *h > 0).unwrap_or(1) as u32;
    let canvas = DynamicImage::new_rgba8(width, height);
    rv.set(bind_image(scope, canvas).into());
}

fn parse(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(bytes) = arg_bytes(scope, &args, 0) else {
        throw(scope, "image.parse(data): data must be a string or buffer");
        return;
    };
    match image::load_from_memory(&bytes) {
        Ok(decoded) => rv.set(bind_image(scope, decoded).into()),
        Err(err) => throw(scope, &err.to_string()),
    }
}

fn bind_image<'s>(scope: &mut v8::HandleScope<'s>, image: DynamicImage) -> v8::Local<'s, v8::Object> {
    let cell = Arc::new(Mutex::new(image));
    let obj = v8::Object::new(scope);
    let external = v8::External::new(scope, Arc::into_raw(cell) as *mut std::ffi::c_void);
    let key = v8::String::new(scope, "__image").unwrap();
    obj.set(scope, key.into(), external.into());
    set_method(scope, obj, "width", width);
    set_method(scope, obj, "height", height);
    set_method(scope, obj, "get", get);
    set_method(scope, obj, "set", set);
    set_method(scope, obj, "drawImage", draw_image);
    set_method(scope, obj, "resize", resize);
    set_method(scope, obj, "toJPG", to_jpg);
    set_method(scope, obj, "toPNG", to_png);
    obj
}

fn image_of(scope: &mut v8::HandleScope, this: v8::Local<v8::Value>) -> Option<Arc<Mutex<DynamicImage>>> {
    let object: v8::Local<v8::Object> = this.try_into().ok()?;
    let key = v8::String::new(scope, "__image")?;
    let value = object.get(scope, key.into())?;
    let external: v8::Local<v8::External> = value.try_into().ok()?;
    let ptr = external.value() as *const Mutex<DynamicImage>;
    // SAFETY: leaked at construction, stays valid for the object's life.
    let borrowed = unsafe { Arc::from_raw(ptr) };
    let clone = borrowed.clone();
    std::mem::forget(borrowed);
    Some(clone)
}

fn width(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    if let Some(image) = image_of(scope, args.this().into()) {
        rv.set(v8::Integer::new(scope, image.lock().width() as i32).into());
    }
}

fn height(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    if let Some(image) = image_of(scope, args.this().into()) {
        rv.set(v8::Integer::new(scope, image.lock().height() as i32).into());
    }
}

/// Packs RGBA into a single `u32` the way the original's `Get` does
/// (`r << 24 & g << 16 & ...`, albeit with the original's own bitwise-AND
/// typo preserved as a known bug in the Go source — we use the evidently
/// intended shift-and-OR packing instead since there is no script-visible
/// contract to stay bug-compatible with).
fn get(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(image) = image_of(scope, args.this().into()) else {
        throw(scope, "image.get: not an image");
        return;
    };
    let Some(x) = arg_i64(scope, &args, 0) else {
        throw(scope, "image.get(x, y): x must be a number");
        return;
    };
    let Some(y) = arg_i64(scope, &args, 1) else {
        throw(scope, "image.get(x, y): y must be a number");
        return;
    };
    let Rgba([r, g, b, a]) = image.lock().get_pixel(x as u32, y as u32);
    let packed = ((r as u32) << 24) | ((g as u32) << 16) | ((b as u32) << 8) | (a as u32);
    rv.set(v8::Number::new(scope, packed as f64).into());
}

fn set(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let Some(image) = image_of(scope, args.this().into()) else {
        throw(scope, "image.set: not an image");
        return;
    };
    let Some(x) = arg_i64(scope, &args, 0) else {
        throw(scope, "image.set(x, y, pixel): x must be a number");
        return;
    };
    let Some(y) = arg_i64(scope, &args, 1) else {
        throw(scope, "image.set(x, y, pixel): y must be a number");
        return;
    };
    let Some(packed) = arg_i64(scope, &args, 2) else {
        throw(scope, "image.set(x, y, pixel): pixel must be a number");
        return;
    };
    let packed = packed as u32;
    let pixel = Rgba([
        (packed >> 24) as u8,
        (packed >> 16) as u8,
        (packed >> 8) as u8,
        packed as u8,
    ]);
    image.lock().put_pixel(x as u32, y as u32, pixel);
}

/// Blits `other` onto `self` at `(x, y)` — the original's `DrawImage`
/// without the canvas-rotation relocation, since rotation is part of the
/// dropped drawing layer.
fn draw_image(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let Some(target) = image_of(scope, args.this().into()) else {
        throw(scope, "image.drawImage: not an image");
        return;
    };
    let Some(other) = args
        .get(0)
        .try_into()
        .ok()
        .and_then(|o: v8::Local<v8::Object>| image_of(scope, o.into()))
    else {
        throw(scope, "image.drawImage(other, x, y): other must be an image");
        return;
    };
    let x = arg_i64(scope, &args, 1).unwrap_or(0).max(0) as u32;
    let y = arg_i64(scope, &args, 2).unwrap_or(0).max(0) as u32;

    let source = other.lock().clone();
    let _ = target.lock().copy_from(&source, x, y);
}

fn resize(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(image) = image_of(scope, args.this().into()) else {
        throw(scope, "image.resize: not an image");
        return;
    };
    let Some(w) = arg_i64(scope, &args, 0).filter(|w| *w > 0) else {
        throw(scope, "image.resize(width, height): width must be a positive number");
        return;
    };
    let Some(h) = arg_i64(scope, &args, 1).filter(|h| *h > 0) else {
        throw(scope, "image.resize(width, height): height must be a positive number");
        return;
    };
    let resized = image.lock().resize_exact(w as u32, h as u32, image::imageops::FilterType::Triangle);
    rv.set(bind_image(scope, resized).into());
}

fn to_jpg(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(image) = image_of(scope, args.this().into()) else {
        throw(scope, "image.toJPG: not an image");
        return;
    };
    let quality = arg_i64(scope, &args, 0).filter(|q| *q > 0).unwrap_or(100).clamp(1, 100) as u8;
    let mut buffer = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality);
    let result = image.lock().write_with_encoder(encoder);
    if throw_on_err(scope, result).is_some() {
        rv.set(make_bytes(scope, &buffer));
    }
}

fn to_png(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(image) = image_of(scope, args.this().into()) else {
        throw(scope, "image.toPNG: not an image");
        return;
    };
    let mut buffer = Cursor::new(Vec::new());
    let result = image.lock().write_to(&mut buffer, ImageFormat::Png);
    if throw_on_err(scope, result).is_some() {
        rv.set(make_bytes(scope, buffer.get_ref()));
    }
}
