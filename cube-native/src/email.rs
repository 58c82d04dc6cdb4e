// Copyright 2026 the Cube authors. MIT license.
//
// `$native("email")` (§4.G "email | SMTP send with attachments").
// Grounded in `web/internal/module/email.go`'s `EmailClient`:
// `$native("email")(host, port, username, password)` builds a client,
// `.send(receivers, subject, content, attachments)` sends one message.
// The original hand-rolls the MIME envelope and picks plaintext-SMTP vs.
// TLS based on port 25 vs. other; we use `lettre`'s `SmtpTransport`/
// `Message` builders for the same shape, letting the crate handle
// STARTTLS negotiation rather than the original's port-25-special-case.

use std::cell::RefCell;
use std::rc::Rc;

use lettre::message::{Attachment, Mailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{SmtpTransport, Transport};

use cube_core::vm::WorkerState;

use crate::support::{arg_i64, arg_string, set_method, throw, throw_on_err};

pub fn factory<'s>(scope: &mut v8::HandleScope<'s>, _state: &Rc<RefCell<WorkerState>>) -> v8::Local<'s, v8::Value> {
    let function = v8::Function::new(scope, construct).unwrap();
    function.into()
}

struct EmailConfig {
    host: String,
    port: u16,
    username: String,
    password: String,
}

fn construct(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let (Some(host), Some(port), Some(username), Some(password)) = (
        arg_string(scope, &args, 0),
        arg_i64(scope, &args, 1),
        arg_string(scope, &args, 2),
        arg_string(scope, &args, 3),
    ) else {
        throw(scope, "email(host, port, username, password): all four arguments are required");
        return;
    };

    let config = EmailConfig {
        host,
        port: port as u16,
        username,
        password,
    };

    let obj = v8::Object::new(scope);
    let external = v8::External::new(scope, Box::into_raw(Box::new(config)) as *mut std::ffi::c_void);
    let key = v8::String::new(scope, "__email").unwrap();
    obj.set(scope, key.into(), external.into());
    set_method(scope, obj, "send", send);
    rv.set(obj.into());
}

fn config_of<'a>(scope: &mut v8::HandleScope, this: v8::Local<v8::Value>) -> Option<&'a EmailConfig> {
    let object: v8::Local<v8::Object> = this.try_into().ok()?;
    let key = v8::String::new(scope, "__email")?;
    let value = object.get(scope, key.into())?;
    let external: v8::Local<v8::External> = value.try_into().ok()?;
    // SAFETY: boxed once at construction and never freed while the
    // script-visible client object stays reachable.
    Some(unsafe { &*(external.value() as *const EmailConfig) })
}

struct AttachmentInput {
    name: String,
    content_type: String,
    base64: String,
}

fn read_attachments(scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> Vec<AttachmentInput> {
    let Ok(array): Result<v8::Local<v8::Array>, _> = value.try_into() else {
        return Vec::new();
    };
    let mut attachments = Vec::new();
    for i in 0..array.length() {
        let Some(item) = array.get_index(scope, i) else { continue };
        let Ok(obj): Result<v8::Local<v8::Object>, _> = item.try_into() else { continue };
        let name = get_string(scope, obj, "name").unwrap_or_default();
        let content_type = get_string(scope, obj, "contentType").unwrap_or_else(|| "application/octet-stream".to_string());
        let base64 = get_string(scope, obj, "base64").unwrap_or_default();
        attachments.push(AttachmentInput { name, content_type, base64 });
    }
    attachments
}

fn get_string(scope: &mut v8::HandleScope, obj: v8::Local<v8::Object>, name: &str) -> Option<String> {
    let key = v8::String::new(scope, name)?;
    let value = obj.get(scope, key.into())?;
    value.is_string().then(|| value.to_rust_string_lossy(scope))
}

fn string_array(scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> Vec<String> {
    let Ok(array): Result<v8::Local<v8::Array>, _> = value.try_into() else {
        return Vec::new();
    };
    (0..array.length())
        .filter_map(|i| array.get_index(scope, i))
        .map(|v| v.to_rust_string_lossy(scope))
        .collect()
}

fn build_message(config: &EmailConfig, receivers: &[String], subject: &str, content: &str, attachments: &[AttachmentInput]) -> Result<Message, String> {
    use base64::Engine;

    let from: Mailbox = config.username.parse().map_err(|e: lettre::address::AddressError| e.to_string())?;
    let mut builder = Message::builder().from(from).subject(subject);
    for receiver in receivers {
        let to: Mailbox = receiver.parse().map_err(|e: lettre::address::AddressError| e.to_string())?;
        builder = builder.to(to);
    }

    if attachments.is_empty() {
        return builder.body(content.to_string()).map_err(|e| e.to_string());
    }

    let mut multipart = MultiPart::mixed().singlepart(SinglePart::plain(content.to_string()));
    for attachment in attachments {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&attachment.base64)
            .map_err(|e| e.to_string())?;
        let content_type: lettre::message::header::ContentType =
            attachment.content_type.parse().map_err(|_| format!("invalid content type: {}", attachment.content_type))?;
        multipart = multipart.singlepart(Attachment::new(attachment.name.clone()).body(bytes, content_type));
    }
    builder.multipart(multipart).map_err(|e| e.to_string())
}

fn send(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let Some(config) = config_of(scope, args.this().into()) else {
        throw(scope, "email.send: not an email client");
        return;
    };
    let receivers = string_array(scope, args.get(0));
    let Some(subject) = arg_string(scope, &args, 1) else {
        throw(scope, "email.send(receivers, subject, content, attachments?): subject must be a string");
        return;
    };
    let Some(content) = arg_string(scope, &args, 2) else {
        throw(scope, "email.send(receivers, subject, content, attachments?): content must be a string");
        return;
    };
    let attachments = read_attachments(scope, args.get(3));

    let message = match build_message(config, &receivers, &subject, &content, &attachments) {
        Ok(message) => message,
        Err(err) => {
            throw(scope, &err);
            return;
        }
    };

    let credentials = Credentials::new(config.username.clone(), config.password.clone());
    let transport = if config.port == 25 {
        SmtpTransport::builder_dangerous(&config.host).port(config.port)
    } else {
        match SmtpTransport::relay(&config.host) {
            Ok(builder) => builder.port(config.port),
            Err(err) => {
                throw(scope, &err.to_string());
                return;
            }
        }
    }
    .credentials(credentials)
    .build();

    throw_on_err(scope, transport.send(&message));
}
