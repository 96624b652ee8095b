//! QuickJS Environment
//!
//! [`ScriptEnvironment`] on top of QuickJS. One instance is one runtime with
//! one global context; it must stay on the thread that created it.

use std::cell::RefCell;
use std::rc::Rc;

use rquickjs::context::EvalOptions;
use rquickjs::function::{Constructor, Rest, This};
use rquickjs::{
    Array, Context, Ctx, Exception, Function, Object, Persistent, Runtime, Type, Value as JsValue,
};

use super::{
    CallbackHandle, CallbackTable, NativeFn, PatternSource, ScriptArg, ScriptEnvironment,
    ScriptError, ScriptResult, ScriptValue,
};

type SharedCallbacks = Rc<RefCell<CallbackTable<Persistent<Function<'static>>>>>;

// ─────────────────────────────────────────────────────────────────────────────
// QuickJS Environment
// ─────────────────────────────────────────────────────────────────────────────

/// A QuickJS runtime and context owned by one module
pub struct QuickJsEnvironment {
    /// Functions held by the host, released before the runtime goes away
    callbacks: SharedCallbacks,
    context: Context,
    runtime: Runtime,
}

impl QuickJsEnvironment {
    /// Create a new runtime with a full standard context
    pub fn new() -> ScriptResult<Self> {
        let runtime = Runtime::new().map_err(|e| ScriptError::RuntimeCreation(e.to_string()))?;
        let context =
            Context::full(&runtime).map_err(|e| ScriptError::RuntimeCreation(e.to_string()))?;

        Ok(Self {
            callbacks: Rc::new(RefCell::new(CallbackTable::new())),
            context,
            runtime,
        })
    }

    /// Number of script functions currently referenced by the host
    pub fn callback_count(&self) -> usize {
        self.callbacks.borrow().len()
    }

    /// Run queued promise jobs until none are left
    fn drain_jobs(&self) {
        loop {
            match self.runtime.execute_pending_job() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(_) => tracing::error!(target: "gonk.js", "Pending promise job threw"),
            }
        }
    }

    fn restore_callback<'js>(
        &self,
        ctx: &Ctx<'js>,
        callback: &CallbackHandle,
    ) -> ScriptResult<Function<'js>> {
        let persistent = self
            .callbacks
            .borrow()
            .get(callback)
            .cloned()
            .ok_or(ScriptError::StaleCallback(callback.id()))?;

        persistent
            .restore(ctx)
            .map_err(|e| ScriptError::Js(describe_error(ctx, e)))
    }

    fn resolve_args<'js>(
        &self,
        ctx: &Ctx<'js>,
        args: Vec<ScriptArg>,
    ) -> ScriptResult<Vec<JsValue<'js>>> {
        args.into_iter()
            .map(|arg| match arg {
                ScriptArg::Value(value) => to_js(ctx, &value, &self.callbacks),
                ScriptArg::Global(name) => ctx.globals().get(name.as_str()),
            })
            .collect::<rquickjs::Result<Vec<_>>>()
            .map_err(|e| ScriptError::Js(describe_error(ctx, e)))
    }

    fn finish_call<'js>(
        &self,
        ctx: &Ctx<'js>,
        result: rquickjs::Result<JsValue<'js>>,
    ) -> ScriptResult<ScriptValue> {
        let value = result.map_err(|e| ScriptError::Js(describe_error(ctx, e)))?;
        from_js(ctx, value, &self.callbacks).map_err(|e| ScriptError::Js(describe_error(ctx, e)))
    }
}

impl ScriptEnvironment for QuickJsEnvironment {
    fn eval_source(&self, name: &str, source: &str) -> ScriptResult<ScriptValue> {
        let result = self.context.with(|ctx| {
            let value = eval_global(&ctx, name, source)?;
            from_js(&ctx, value, &self.callbacks).map_err(|e| ScriptError::Eval {
                name: name.to_string(),
                message: describe_error(&ctx, e),
            })
        });

        self.drain_jobs();
        result
    }

    fn run_source(&self, name: &str, source: &str) -> ScriptResult<()> {
        let result = self.context.with(|ctx| eval_global(&ctx, name, source).map(drop));

        self.drain_jobs();
        result
    }

    fn register_native(&self, name: &str, function: NativeFn) -> ScriptResult<()> {
        self.context.with(|ctx| {
            bind_native(&ctx, name, function, self.callbacks.clone())
                .map_err(|e| ScriptError::Js(describe_error(&ctx, e)))
        })
    }

    fn call_exported(&self, path: &str, args: Vec<ScriptArg>) -> ScriptResult<ScriptValue> {
        let result = self.context.with(|ctx| {
            let (this, function) = resolve_path(&ctx, path)
                .map_err(|e| ScriptError::Js(describe_error(&ctx, e)))?
                .ok_or_else(|| ScriptError::FunctionNotFound(path.to_string()))?;

            let args = self.resolve_args(&ctx, args)?;
            let result = function.call((This(this), Rest(args)));
            self.finish_call(&ctx, result)
        });

        self.drain_jobs();
        result
    }

    fn set_global(&self, name: &str, value: ScriptValue) -> ScriptResult<()> {
        self.context.with(|ctx| {
            let value = to_js(&ctx, &value, &self.callbacks)
                .map_err(|e| ScriptError::Js(describe_error(&ctx, e)))?;
            ctx.globals()
                .set(name, value)
                .map_err(|e| ScriptError::Js(describe_error(&ctx, e)))
        })
    }

    fn call_callback(
        &self,
        callback: &CallbackHandle,
        args: Vec<ScriptArg>,
    ) -> ScriptResult<ScriptValue> {
        let result = self.context.with(|ctx| {
            let function = self.restore_callback(&ctx, callback)?;
            let args = self.resolve_args(&ctx, args)?;
            let result = function.call((Rest(args),));
            self.finish_call(&ctx, result)
        });

        self.drain_jobs();
        result
    }

    fn run_callback(&self, callback: &CallbackHandle, args: Vec<ScriptArg>) -> ScriptResult<()> {
        let result = self.context.with(|ctx| {
            let function = self.restore_callback(&ctx, callback)?;
            let args = self.resolve_args(&ctx, args)?;
            function
                .call::<_, JsValue>((Rest(args),))
                .map(drop)
                .map_err(|e| ScriptError::Js(describe_error(&ctx, e)))
        });

        self.drain_jobs();
        result
    }
}

impl Drop for QuickJsEnvironment {
    fn drop(&mut self) {
        // Persistent functions must be freed while the runtime is alive.
        self.callbacks.borrow_mut().clear();
        self.runtime.run_gc();
    }
}

/// Evaluate sloppy-mode global code
fn eval_global<'js>(ctx: &Ctx<'js>, name: &str, source: &str) -> ScriptResult<JsValue<'js>> {
    let mut options = EvalOptions::default();
    options.global = true;
    // Module scripts assign undeclared globals.
    options.strict = false;
    options.backtrace_barrier = true;

    ctx.eval_with_options(source, options)
        .map_err(|e| ScriptError::Eval {
            name: name.to_string(),
            message: describe_error(ctx, e),
        })
}

// ─────────────────────────────────────────────────────────────────────────────
// Native Functions
// ─────────────────────────────────────────────────────────────────────────────

fn bind_native<'js>(
    ctx: &Ctx<'js>,
    name: &str,
    function: NativeFn,
    callbacks: SharedCallbacks,
) -> rquickjs::Result<()> {
    let label = name.to_string();

    let native = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<JsValue<'js>>| -> rquickjs::Result<JsValue<'js>> {
            let mut values = Vec::with_capacity(args.0.len());
            for arg in args.0 {
                values.push(from_js(&ctx, arg, &callbacks)?);
            }

            match function(values) {
                Ok(result) => to_js(&ctx, &result, &callbacks),
                Err(e) => Err(Exception::throw_message(&ctx, &format!("{}: {}", label, e))),
            }
        },
    )?;

    ctx.globals().set(name, native)
}

/// Walk a dotted path from the global object to a function and its receiver
fn resolve_path<'js>(
    ctx: &Ctx<'js>,
    path: &str,
) -> rquickjs::Result<Option<(Object<'js>, Function<'js>)>> {
    let mut receiver = ctx.globals();
    let mut current = receiver.clone().into_value();

    for part in path.split('.') {
        let Some(object) = current.as_object() else {
            return Ok(None);
        };
        receiver = object.clone();
        current = object.get(part)?;
    }

    Ok(current.into_function().map(|function| (receiver, function)))
}

/// Render a failed call as the exception message plus stack
fn describe_error(ctx: &Ctx<'_>, error: rquickjs::Error) -> String {
    if !matches!(error, rquickjs::Error::Exception) {
        return error.to_string();
    }

    let thrown = ctx.catch();
    if let Some(object) = thrown.as_object() {
        let message: Option<String> = object.get("message").ok().flatten();
        let stack: Option<String> = object.get("stack").ok().flatten();

        if let Some(message) = message {
            return match stack {
                Some(stack) if !stack.trim().is_empty() => {
                    format!("{}\n{}", message, stack.trim_end())
                }
                _ => message,
            };
        }
    }

    match thrown.type_of() {
        Type::String => thrown.get::<String>().unwrap_or_default(),
        Type::Int | Type::Float | Type::Bool => format!("{:?}", thrown),
        _ => "uncaught exception".to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value Conversion
// ─────────────────────────────────────────────────────────────────────────────

/// Objects nested deeper than this are not expanded
const MAX_DEPTH: usize = 64;

/// Convert a JavaScript value to a [`ScriptValue`].
///
/// Functions are pinned in the callback table; RegExp objects become patterns.
/// An object reached again through its own fields becomes `"[Circular]"`.
fn from_js<'js>(
    ctx: &Ctx<'js>,
    js: JsValue<'js>,
    callbacks: &SharedCallbacks,
) -> rquickjs::Result<ScriptValue> {
    convert(ctx, js, callbacks, &mut Vec::new())
}

fn convert<'js>(
    ctx: &Ctx<'js>,
    js: JsValue<'js>,
    callbacks: &SharedCallbacks,
    parents: &mut Vec<JsValue<'js>>,
) -> rquickjs::Result<ScriptValue> {
    if js.is_function() {
        let function: Function = js.get()?;
        let persistent = Persistent::save(ctx, function);
        return Ok(ScriptValue::Callback(callbacks.borrow_mut().insert(persistent)));
    }

    match js.type_of() {
        Type::Undefined => return Ok(ScriptValue::Undefined),
        Type::Null => return Ok(ScriptValue::Null),
        Type::Bool => return Ok(ScriptValue::Bool(js.get()?)),
        Type::Int => return Ok(ScriptValue::Number(js.get::<i32>()? as f64)),
        Type::Float => return Ok(ScriptValue::Number(js.get()?)),
        Type::String => return Ok(ScriptValue::String(js.get()?)),
        _ => {}
    }

    if !js.is_object() {
        return Ok(ScriptValue::Undefined);
    }
    if parents.contains(&js) {
        return Ok(ScriptValue::String("[Circular]".to_string()));
    }
    if parents.len() >= MAX_DEPTH {
        return Ok(ScriptValue::String("[Nested]".to_string()));
    }

    parents.push(js.clone());
    let result = convert_object(ctx, js, callbacks, parents);
    parents.pop();
    result
}

fn convert_object<'js>(
    ctx: &Ctx<'js>,
    js: JsValue<'js>,
    callbacks: &SharedCallbacks,
    parents: &mut Vec<JsValue<'js>>,
) -> rquickjs::Result<ScriptValue> {
    if js.is_array() {
        let arr: Array = js.get()?;
        let mut values = Vec::with_capacity(arr.len());
        for i in 0..arr.len() {
            let item: JsValue = arr.get(i)?;
            values.push(convert(ctx, item, callbacks, parents)?);
        }
        return Ok(ScriptValue::Array(values));
    }

    let Some(obj) = js.as_object() else {
        return Ok(ScriptValue::Undefined);
    };

    if let Some(pattern) = regexp_source(obj)? {
        return Ok(ScriptValue::Pattern(pattern));
    }

    // Error objects keep their fields non-enumerable
    let message: Option<String> = obj.get("message").ok().flatten();
    let stack: Option<String> = obj.get("stack").ok().flatten();
    if let (Some(message), Some(_)) = (message, stack) {
        return Ok(ScriptValue::String(message));
    }

    let mut fields = std::collections::BTreeMap::new();
    for prop in obj.props::<String, JsValue>() {
        let (key, val) = prop?;
        fields.insert(key, convert(ctx, val, callbacks, parents)?);
    }
    Ok(ScriptValue::Object(fields))
}

/// RegExp instances carry `source`, `flags` and an own numeric `lastIndex`
fn regexp_source(obj: &Object<'_>) -> rquickjs::Result<Option<PatternSource>> {
    let last_index: JsValue = obj.get("lastIndex")?;
    if !matches!(last_index.type_of(), Type::Int | Type::Float) {
        return Ok(None);
    }

    let source: Option<String> = obj.get("source").ok().flatten();
    let flags: Option<String> = obj.get("flags").ok().flatten();

    Ok(match (source, flags) {
        (Some(source), Some(flags)) => Some(PatternSource { source, flags }),
        _ => None,
    })
}

/// Convert a [`ScriptValue`] into a fresh JavaScript value
fn to_js<'js>(
    ctx: &Ctx<'js>,
    value: &ScriptValue,
    callbacks: &SharedCallbacks,
) -> rquickjs::Result<JsValue<'js>> {
    match value {
        ScriptValue::Undefined => Ok(JsValue::new_undefined(ctx.clone())),
        ScriptValue::Null => Ok(JsValue::new_null(ctx.clone())),
        ScriptValue::Bool(b) => Ok(JsValue::new_bool(ctx.clone(), *b)),
        ScriptValue::Number(n) => {
            if n.fract() == 0.0 && *n >= i32::MIN as f64 && *n <= i32::MAX as f64 {
                Ok(JsValue::new_int(ctx.clone(), *n as i32))
            } else {
                Ok(JsValue::new_float(ctx.clone(), *n))
            }
        }
        ScriptValue::String(s) => Ok(rquickjs::String::from_str(ctx.clone(), s)?.into_value()),
        ScriptValue::Array(items) => {
            let js_arr = Array::new(ctx.clone())?;
            for (i, item) in items.iter().enumerate() {
                js_arr.set(i, to_js(ctx, item, callbacks)?)?;
            }
            Ok(js_arr.into_value())
        }
        ScriptValue::Object(fields) => {
            let js_obj = Object::new(ctx.clone())?;
            for (key, val) in fields {
                js_obj.set(key.as_str(), to_js(ctx, val, callbacks)?)?;
            }
            Ok(js_obj.into_value())
        }
        ScriptValue::Pattern(pattern) => {
            let regexp: Constructor = ctx.globals().get("RegExp")?;
            regexp.construct((pattern.source.as_str(), pattern.flags.as_str()))
        }
        ScriptValue::Callback(handle) => {
            let persistent = callbacks.borrow().get(handle).cloned();
            match persistent {
                Some(persistent) => Ok(persistent.restore(ctx)?.into_value()),
                None => Err(Exception::throw_message(
                    ctx,
                    &format!("callback {} is no longer registered", handle.id()),
                )),
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
