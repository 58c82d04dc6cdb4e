// Copyright 2026 the Cube authors. MIT license.
//
// `$native("template")` (§4.G "template | named text substitution").
// Grounded in `internal/module/template.go`: fetch the named, active
// template row and render it against an input object. The original uses
// Go's `text/template` (full control-flow templating); per §1's
// "registration mechanism is in scope, internals are not" allowance we
// implement the substitution half of that — `{{key}}` replaced by the
// matching field of the input object, nested paths addressed with dots
// (`{{user.name}}`) — rather than pulling in a Turing-complete template
// engine un-grounded in any example repo (see DESIGN.md).

use std::cell::RefCell;
use std::rc::Rc;

use once_cell::sync::Lazy;
use regex::Regex;

use cube_core::vm::WorkerState;

use crate::support::{arg_string, make_string, read_json, set_method, throw, throw_on_err, worker_state};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*([\w.]+)\s*\}\}").unwrap());

pub fn factory<'s>(scope: &mut v8::HandleScope<'s>, _state: &Rc<RefCell<WorkerState>>) -> v8::Local<'s, v8::Value> {
    let function = v8::Function::new(scope, render).unwrap();
    function.into()
}

fn lookup<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    path.split('.').try_fold(value, |current, part| current.get(part))
}

fn render_template(content: &str, input: &serde_json::Value) -> String {
    PLACEHOLDER
        .replace_all(content, |captures: &regex::Captures| {
            let path = &captures[1];
            match lookup(input, path) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            }
        })
        .into_owned()
}

fn render(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(name) = arg_string(scope, &args, 0) else {
        throw(scope, "template(name, input): name must be a string");
        return;
    };
    let input = read_json(scope, args.get(1));

    let content = {
        let state = worker_state(scope);
        let store = state.borrow().store.clone();
        store.get_template(&name)
    };
    let Some(content) = throw_on_err(scope, content) else {
        return;
    };

    let output = render_template(&content, &input);
    rv.set(make_string(scope, &output));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_top_level_and_nested_fields() {
        let input = serde_json::json!({"name": "Ada", "user": {"age": 30}});
        let rendered = render_template("Hello {{name}}, age {{ user.age }}", &input);
        assert_eq!(rendered, "Hello Ada, age 30");
    }

    #[test]
    fn missing_fields_render_as_empty() {
        let input = serde_json::json!({});
        assert_eq!(render_template("x{{missing}}y", &input), "xy");
    }
}
