use std::{cell::RefCell, path::PathBuf, sync::Arc};

use smallvec::smallvec;

use crate::{
    ast::{BinaryOp, Expr, ExprKind, Stmt, StmtKind, UnaryOp},
    builtins::{os, seq},
    context::RuntimeCtx,
    env::{BindError, EnvRef, Environment},
    exception::{ExcKind, Exception, RunResult, Unwind},
    function::Function,
    modules,
    object::{Object, ObjectTemplate},
    signal, sync, task,
    value::{ArgValues, CoerceFailure, TypeTag, Value, promote},
};

/// One task's evaluator: walks AST nodes against an environment and the
/// shared execution context.
///
/// The context (module cache, FFI registry, type registry, signal table,
/// print sink) is shared across tasks; the defer stack and the unwinding
/// exception state are per-task — defers live here, exceptions ride the
/// `Result` channel.
#[derive(Debug)]
pub(crate) struct Interp {
    pub ctx: Arc<RuntimeCtx>,
    /// Source file for diagnostics.
    pub file: String,
    /// Directory relative imports resolve against.
    pub dir: PathBuf,
    /// The module exports environment, when executing a module top level.
    pub exports: Option<EnvRef>,
    /// Only the main task services OS signal handlers.
    is_main: bool,
    /// LIFO defer stacks, one frame per active function call (plus one for
    /// the program/module top level).
    defer_frames: RefCell<Vec<Vec<(Expr, EnvRef)>>>,
}

impl Interp {
    pub fn new_main(ctx: Arc<RuntimeCtx>, file: String, dir: PathBuf) -> Self {
        Self {
            ctx,
            file,
            dir,
            exports: None,
            is_main: true,
            defer_frames: RefCell::new(Vec::new()),
        }
    }

    pub fn for_module(ctx: Arc<RuntimeCtx>, file: String, dir: PathBuf, exports: EnvRef) -> Self {
        Self {
            ctx,
            file,
            dir,
            exports: Some(exports),
            is_main: false,
            defer_frames: RefCell::new(Vec::new()),
        }
    }

    pub fn for_task(ctx: Arc<RuntimeCtx>, file: String) -> Self {
        let dir = PathBuf::from(&file)
            .parent()
            .map_or_else(|| PathBuf::from("."), std::path::Path::to_path_buf);
        Self {
            ctx,
            file,
            dir,
            exports: None,
            is_main: false,
            defer_frames: RefCell::new(Vec::new()),
        }
    }

    /// Runs a program's top level, returning the value of the final
    /// expression statement (the REPL-style result).
    pub fn run_main(&self, stmts: &[Stmt], env: &EnvRef) -> Result<Value, Exception> {
        self.run_frame(stmts, env).map_err(|unwind| self.top_level_error(unwind))
    }

    /// Runs a module's top level; the result value is discarded.
    pub fn run_top_level(&self, stmts: &[Stmt], env: &EnvRef) -> Result<(), Exception> {
        self.run_frame(stmts, env)
            .map(|_| ())
            .map_err(|unwind| self.top_level_error(unwind))
    }

    fn top_level_error(&self, unwind: Unwind) -> Exception {
        match unwind {
            Unwind::Throw(exc) => exc,
            Unwind::Return(_) => Exception::new(ExcKind::TypeError, "return outside function"),
            Unwind::Break => Exception::new(ExcKind::TypeError, "break outside loop"),
            Unwind::Continue => Exception::new(ExcKind::TypeError, "continue outside loop"),
        }
    }

    /// Statement sequence with its own defer frame, flushed on every exit.
    fn run_frame(&self, stmts: &[Stmt], env: &EnvRef) -> RunResult<Value> {
        self.defer_frames.borrow_mut().push(Vec::new());
        let mut result = self.exec_stmts(stmts, env);
        result = self.flush_defers(result);
        result
    }

    fn exec_stmts(&self, stmts: &[Stmt], env: &EnvRef) -> RunResult<Value> {
        let mut last = Value::Null;
        for stmt in stmts {
            self.service_signals()?;
            let value = self.exec_stmt(stmt, env)?;
            if matches!(stmt.kind, StmtKind::Expr(_)) {
                last = value;
            }
        }
        Ok(last)
    }

    /// Runs pending OS signal handlers; a statement boundary on the main
    /// task is the safe point.
    fn service_signals(&self) -> RunResult<()> {
        if !self.is_main {
            return Ok(());
        }
        while let Some(sig) = signal::take_pending() {
            let handler = sync::lock(&self.ctx.signals).get(&sig).cloned();
            if let Some(Value::Function(func)) = handler {
                self.call_function(&func, smallvec![Value::I64(i64::from(sig))], None, 0)?;
            }
        }
        Ok(())
    }

    /// Pops the current defer frame and evaluates its entries LIFO.
    ///
    /// An unwind already in flight wins over any error a defer raises; when
    /// the frame exits normally, the first defer error propagates (remaining
    /// defers still run).
    fn flush_defers(&self, result: RunResult<Value>) -> RunResult<Value> {
        let frame = self.defer_frames.borrow_mut().pop().unwrap_or_default();
        let mut pending = result;
        for (expr, env) in frame.into_iter().rev() {
            match self.eval_expr(&expr, &env) {
                Ok(_) => {}
                Err(unwind) => {
                    if pending.is_ok() {
                        pending = Err(unwind);
                    }
                }
            }
        }
        pending
    }

    // === Statements ===

    pub fn exec_stmt(&self, stmt: &Stmt, env: &EnvRef) -> RunResult<Value> {
        let result = self.exec_stmt_inner(stmt, env);
        result.map_err(|unwind| unwind.at(&self.file, stmt.line))
    }

    fn exec_stmt_inner(&self, stmt: &Stmt, env: &EnvRef) -> RunResult<Value> {
        match &stmt.kind {
            StmtKind::Let {
                name,
                tag,
                init,
                is_const,
            } => {
                let value = match init {
                    Some(init) => self.eval_expr(init, env)?,
                    None => Value::Null,
                };
                let value = match tag {
                    Some(tag) => value.coerce(*tag).map_err(|failure| coerce_exc(&value, *tag, failure))?,
                    None => value,
                };
                env.define_typed(name, value, *is_const, *tag);
                Ok(Value::Null)
            }
            StmtKind::Expr(expr) => self.eval_expr(expr, env),
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                if self.eval_expr(cond, env)?.is_truthy() {
                    self.exec_block(then_body, env)
                } else if let Some(else_body) = else_body {
                    self.exec_block(else_body, env)
                } else {
                    Ok(Value::Null)
                }
            }
            StmtKind::While { cond, body } => {
                while self.eval_expr(cond, env)?.is_truthy() {
                    match self.exec_block(body, env) {
                        Ok(_) => {}
                        Err(Unwind::Break) => break,
                        Err(Unwind::Continue) => {}
                        Err(other) => return Err(other),
                    }
                }
                Ok(Value::Null)
            }
            StmtKind::For { var, iter, body } => self.exec_for(var, iter, body, env),
            StmtKind::Break => Err(Unwind::Break),
            StmtKind::Continue => Err(Unwind::Continue),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(value) => self.eval_expr(value, env)?,
                    None => Value::Null,
                };
                Err(Unwind::Return(value))
            }
            StmtKind::Throw(value) => {
                let value = self.eval_expr(value, env)?;
                Err(Exception::thrown(value).at(&self.file, stmt.line).into())
            }
            StmtKind::Try { body, catch, finally } => self.exec_try(body, catch.as_ref(), finally.as_ref(), env),
            StmtKind::Defer(expr) => {
                let mut frames = self.defer_frames.borrow_mut();
                match frames.last_mut() {
                    Some(frame) => {
                        frame.push((expr.clone(), env.clone()));
                        Ok(Value::Null)
                    }
                    None => Err(Exception::new(ExcKind::TypeError, "defer outside executable frame").into()),
                }
            }
            StmtKind::Switch { subject, cases, default } => {
                let subject = self.eval_expr(subject, env)?;
                for (case_value, case_body) in cases {
                    let case_value = self.eval_expr(case_value, env)?;
                    if subject.eq_value(&case_value) {
                        return self.exec_block(case_body, env);
                    }
                }
                match default {
                    Some(default) => self.exec_block(default, env),
                    None => Ok(Value::Null),
                }
            }
            StmtKind::DefineObject { name, fields } => {
                let (value_fields, method_defs) = ObjectTemplate::partition_fields(fields.clone());
                let mut methods = ahash::AHashMap::new();
                for (method_name, expr) in method_defs {
                    methods.insert(method_name, self.eval_expr(&expr, env)?);
                }
                self.ctx.register_type(Arc::new(ObjectTemplate {
                    name: name.clone(),
                    fields: value_fields,
                    methods,
                    env: env.clone(),
                }));
                Ok(Value::Null)
            }
            StmtKind::DefineEnum { name, variants } => {
                let mut object = Object::new(Some(name.clone()));
                for (i, variant) in variants.iter().enumerate() {
                    object.set(variant, Value::I64(i as i64));
                }
                env.define(name, Value::new_object(object), true);
                Ok(Value::Null)
            }
            StmtKind::Import(spec) => {
                modules::exec_import(self, env, spec, stmt.line)?;
                Ok(Value::Null)
            }
            StmtKind::Export(spec) => {
                modules::exec_export(self, env, spec, stmt.line)?;
                Ok(Value::Null)
            }
            StmtKind::ExternFn { name, lib, params, ret } => {
                let param_tags = params.iter().map(|p| p.tag.unwrap_or(TypeTag::I64)).collect();
                let func = crate::ffi::FfiFunction::new(name.clone(), lib.clone(), param_tags, *ret);
                env.define(name, Value::FfiFunction(func), true);
                Ok(Value::Null)
            }
        }
    }

    /// A statement list in a fresh child scope (blocks, loop bodies, case
    /// bodies).
    fn exec_block(&self, stmts: &[Stmt], env: &EnvRef) -> RunResult<Value> {
        let child = Environment::child(env);
        self.exec_stmts(stmts, &child)
    }

    fn exec_for(&self, var: &str, iter: &Expr, body: &[Stmt], env: &EnvRef) -> RunResult<Value> {
        let iterable = self.eval_expr(iter, env)?;
        match &iterable {
            Value::Channel(channel) => {
                // Reads until the channel closes and drains.
                while let Some(item) = channel.recv() {
                    match self.run_loop_body(var, item, body, env) {
                        Ok(()) => {}
                        Err(Unwind::Break) => break,
                        Err(other) => return Err(other),
                    }
                }
                Ok(Value::Null)
            }
            _ => {
                let items = seq::iter_items(&iterable, "for")?;
                for item in items {
                    match self.run_loop_body(var, item, body, env) {
                        Ok(()) => {}
                        Err(Unwind::Break) => break,
                        Err(other) => return Err(other),
                    }
                }
                Ok(Value::Null)
            }
        }
    }

    fn run_loop_body(&self, var: &str, item: Value, body: &[Stmt], env: &EnvRef) -> Result<(), Unwind> {
        let child = Environment::child(env);
        child.define(var, item, false);
        match self.exec_stmts(body, &child) {
            Ok(_) | Err(Unwind::Continue) => Ok(()),
            Err(other) => Err(other),
        }
    }

    fn exec_try(
        &self,
        body: &[Stmt],
        catch: Option<&(String, Vec<Stmt>)>,
        finally: Option<&Vec<Stmt>>,
        env: &EnvRef,
    ) -> RunResult<Value> {
        let mut result = self.exec_block(body, env);
        if let Err(Unwind::Throw(exc)) = &result
            && let Some((name, catch_body)) = catch
        {
            let payload = exc.payload();
            let catch_env = Environment::child(env);
            catch_env.define(name, payload, false);
            result = self.exec_stmts(catch_body, &catch_env);
        }
        if let Some(finally_body) = finally {
            // `finally` runs on every exit; its own unwind wins.
            match self.exec_block(finally_body, env) {
                Ok(_) => {}
                Err(unwind) => return Err(unwind),
            }
        }
        result
    }

    // === Expressions ===

    pub fn eval_expr(&self, expr: &Expr, env: &EnvRef) -> RunResult<Value> {
        let result = self.eval_expr_inner(expr, env);
        result.map_err(|unwind| unwind.at(&self.file, expr.line))
    }

    fn eval_expr_inner(&self, expr: &Expr, env: &EnvRef) -> RunResult<Value> {
        match &expr.kind {
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Int { value, tag } => int_literal(*value, *tag).map_err(Unwind::from),
            ExprKind::Float { value, tag } => Ok(match tag {
                Some(TypeTag::F32) => Value::F32(*value as f32),
                _ => Value::F64(*value),
            }),
            ExprKind::Str(s) => Ok(Value::new_str(s.clone())),
            ExprKind::Rune(c) => Ok(Value::Rune(*c)),
            ExprKind::Ident(name) => env
                .get(name)
                .ok_or_else(|| Exception::new(ExcKind::NameError, format!("undefined identifier `{name}`")).into()),
            ExprKind::SelfRef => env
                .get("self")
                .ok_or_else(|| Exception::new(ExcKind::TypeError, "`self` used outside a method").into()),
            ExprKind::TypeName(tag) => Ok(Value::Type(*tag)),
            ExprKind::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item, env)?);
                }
                Ok(Value::new_array(values, None))
            }
            ExprKind::ObjectLit { type_name, fields } => {
                let mut values = Vec::with_capacity(fields.len());
                for (name, field_expr) in fields {
                    values.push((name.clone(), self.eval_expr(field_expr, env)?));
                }
                match type_name {
                    Some(type_name) => self.instantiate(type_name, values),
                    None => {
                        let mut object = Object::new(None);
                        for (name, value) in values {
                            object.set(&name, value);
                        }
                        Ok(Value::new_object(object))
                    }
                }
            }
            ExprKind::FnLit(lit) => Ok(Value::Function(Function::from_literal(lit, env))),
            ExprKind::Unary { op, expr: inner } => {
                let value = self.eval_expr(inner, env)?;
                unary_value(*op, &value).map_err(Unwind::from)
            }
            ExprKind::Binary { op, lhs, rhs } => match op {
                BinaryOp::And => {
                    let lhs = self.eval_expr(lhs, env)?;
                    if !lhs.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                    let rhs = self.eval_expr(rhs, env)?;
                    Ok(Value::Bool(rhs.is_truthy()))
                }
                BinaryOp::Or => {
                    let lhs = self.eval_expr(lhs, env)?;
                    if lhs.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                    let rhs = self.eval_expr(rhs, env)?;
                    Ok(Value::Bool(rhs.is_truthy()))
                }
                BinaryOp::Coalesce => {
                    let lhs = self.eval_expr(lhs, env)?;
                    if matches!(lhs, Value::Null) {
                        self.eval_expr(rhs, env)
                    } else {
                        Ok(lhs)
                    }
                }
                _ => {
                    let lhs = self.eval_expr(lhs, env)?;
                    let rhs = self.eval_expr(rhs, env)?;
                    binary_values(*op, &lhs, &rhs).map_err(Unwind::from)
                }
            },
            ExprKind::Assign { target, op, value } => self.eval_assign(target, *op, value, env),
            ExprKind::Call { callee, args } => self.eval_call(callee, args, env),
            ExprKind::Index { obj, index } => {
                let container = self.eval_expr(obj, env)?;
                let index = self.eval_expr(index, env)?;
                index_get(&container, &index).map_err(Unwind::from)
            }
            ExprKind::Property { obj, name, optional } => {
                let receiver = self.eval_expr(obj, env)?;
                if matches!(receiver, Value::Null) {
                    return if *optional {
                        Ok(Value::Null)
                    } else {
                        Err(Exception::new(ExcKind::NullAccess, format!("property `{name}` of null")).into())
                    };
                }
                self.property_get(&receiver, name)
            }
            ExprKind::Await(inner) => {
                let value = self.eval_expr(inner, env)?;
                match value {
                    Value::Task(handle) => handle.join().map_err(Unwind::from),
                    other => Err(Exception::new(
                        ExcKind::TypeError,
                        format!("await expects a task, got {}", other.type_name()),
                    )
                    .into()),
                }
            }
        }
    }

    fn eval_assign(&self, target: &Expr, op: Option<BinaryOp>, value: &Expr, env: &EnvRef) -> RunResult<Value> {
        match &target.kind {
            ExprKind::Ident(name) => {
                let new_value = match op {
                    Some(op) => {
                        let current = env.get(name).ok_or_else(|| {
                            Exception::new(ExcKind::NameError, format!("undefined identifier `{name}`"))
                        })?;
                        let rhs = self.eval_expr(value, env)?;
                        binary_values(op, &current, &rhs)?
                    }
                    None => self.eval_expr(value, env)?,
                };
                let candidate = new_value.clone();
                env.set(name, new_value).map_err(|err| match err {
                    BindError::Undefined => {
                        Exception::new(ExcKind::NameError, format!("undefined identifier `{name}`"))
                    }
                    BindError::Const => {
                        Exception::new(ExcKind::ConstReassignment, format!("cannot reassign const `{name}`"))
                    }
                    BindError::Coerce(failure, tag) => coerce_exc(&candidate, tag, failure),
                })?;
                Ok(candidate)
            }
            ExprKind::Index { obj, index } => {
                let container = self.eval_expr(obj, env)?;
                let index = self.eval_expr(index, env)?;
                let new_value = match op {
                    Some(op) => {
                        let current = index_get(&container, &index)?;
                        let rhs = self.eval_expr(value, env)?;
                        binary_values(op, &current, &rhs)?
                    }
                    None => self.eval_expr(value, env)?,
                };
                index_set(&container, &index, new_value.clone())?;
                Ok(new_value)
            }
            ExprKind::Property { obj, name, .. } => {
                let receiver = self.eval_expr(obj, env)?;
                let new_value = match op {
                    Some(op) => {
                        let current = self.property_get(&receiver, name)?;
                        let rhs = self.eval_expr(value, env)?;
                        binary_values(op, &current, &rhs)?
                    }
                    None => self.eval_expr(value, env)?,
                };
                match &receiver {
                    Value::Object(object) => {
                        sync::lock(object).set(name, new_value.clone());
                        Ok(new_value)
                    }
                    Value::Null => {
                        Err(Exception::new(ExcKind::NullAccess, format!("property `{name}` of null")).into())
                    }
                    other => Err(Exception::new(
                        ExcKind::TypeError,
                        format!("cannot assign property `{name}` on {}", other.type_name()),
                    )
                    .into()),
                }
            }
            _ => Err(Exception::new(ExcKind::TypeError, "invalid assignment target").into()),
        }
    }

    fn eval_call(&self, callee: &Expr, args: &[Expr], env: &EnvRef) -> RunResult<Value> {
        // `obj.m(args)` dispatches as a method call with `obj` bound to
        // `self`; a bare callee is an ordinary call.
        if let ExprKind::Property { obj, name, optional } = &callee.kind {
            let receiver = self.eval_expr(obj, env)?;
            if matches!(receiver, Value::Null) {
                return if *optional {
                    Ok(Value::Null)
                } else {
                    Err(Exception::new(ExcKind::NullAccess, format!("method `{name}` of null")).into())
                };
            }
            let arg_values = self.eval_args(args, env)?;
            return self.method_call(&receiver, name, arg_values, callee.line);
        }
        let callee_value = self.eval_expr(callee, env)?;
        let arg_values = self.eval_args(args, env)?;
        self.call_callable(&callee_value, arg_values, callee.line)
    }

    fn eval_args(&self, args: &[Expr], env: &EnvRef) -> RunResult<ArgValues> {
        let mut values = ArgValues::with_capacity(args.len());
        for arg in args {
            values.push(self.eval_expr(arg, env)?);
        }
        Ok(values)
    }

    /// Calls any callable value: user function, builtin, or FFI function.
    pub fn call_callable(&self, callee: &Value, args: ArgValues, line: u32) -> RunResult<Value> {
        match callee {
            Value::Function(func) => self.invoke_function(func, args, None, line),
            Value::Builtin(builtin) => builtin.call(self, args, line),
            Value::FfiFunction(func) => self.ctx.ffi.call(func, &args).map_err(Unwind::from),
            other => Err(Exception::new(
                ExcKind::TypeError,
                format!("{} is not callable", other.type_name()),
            )
            .into()),
        }
    }

    /// Function dispatch: async functions start a task and return its
    /// handle, sync functions run inline.
    fn invoke_function(
        &self,
        func: &Arc<Function>,
        args: ArgValues,
        self_val: Option<Value>,
        line: u32,
    ) -> RunResult<Value> {
        if func.is_async {
            let handle = task::spawn_function(&self.ctx, func.clone(), args, self_val, &self.file)?;
            return Ok(Value::Task(handle));
        }
        self.call_function(func, args, self_val, line)
    }

    /// Runs a function body synchronously.
    ///
    /// The call environment's parent is the function's captured closure
    /// environment (not the caller's scope); parameters bind with range
    /// checking for typed ones, and `self` binds when the call came through
    /// method dispatch. The body's defer frame flushes on every exit.
    pub fn call_function(
        &self,
        func: &Arc<Function>,
        args: ArgValues,
        self_val: Option<Value>,
        _line: u32,
    ) -> RunResult<Value> {
        if args.len() != func.params.len() {
            return Err(Exception::new(
                ExcKind::TypeError,
                format!(
                    "{} expects {} arguments, got {}",
                    func.describe(),
                    func.params.len(),
                    args.len()
                ),
            )
            .into());
        }
        let parent = func.captured().unwrap_or_else(|| self.ctx.globals.clone());
        let call_env = Environment::child(&parent);
        if let Some(self_val) = self_val {
            call_env.define("self", self_val, false);
        }
        for (param, arg) in func.params.iter().zip(args) {
            let value = match param.tag {
                Some(tag) => arg.coerce(tag).map_err(|failure| coerce_exc(&arg, tag, failure))?,
                None => arg,
            };
            call_env.define_typed(&param.name, value, false, param.tag);
        }

        self.defer_frames.borrow_mut().push(Vec::new());
        let result = self.exec_stmts(&func.body, &call_env);
        let result = self.flush_defers(result);
        let value = match result {
            Ok(_) => Value::Null,
            Err(Unwind::Return(value)) => value,
            Err(Unwind::Break) => {
                return Err(Exception::new(ExcKind::TypeError, "break outside loop").into());
            }
            Err(Unwind::Continue) => {
                return Err(Exception::new(ExcKind::TypeError, "continue outside loop").into());
            }
            Err(other) => return Err(other),
        };
        match func.ret {
            Some(tag) => Ok(value.coerce(tag).map_err(|failure| coerce_exc(&value, tag, failure))?),
            None => Ok(value),
        }
    }

    /// `receiver.name(args)`: object fields first, then the nominal method
    /// table, then the built-in methods of the primitive kinds.
    fn method_call(&self, receiver: &Value, name: &str, args: ArgValues, line: u32) -> RunResult<Value> {
        match receiver {
            Value::Object(object) => {
                let field = sync::lock(object).get(name);
                if let Some(field) = field {
                    return match field {
                        Value::Function(func) => self.invoke_function(&func, args, Some(receiver.clone()), line),
                        callable @ (Value::Builtin(_) | Value::FfiFunction(_)) => {
                            self.call_callable(&callable, args, line)
                        }
                        other => Err(Exception::new(
                            ExcKind::TypeError,
                            format!("field `{name}` is {} and is not callable", other.type_name()),
                        )
                        .into()),
                    };
                }
                let type_name = sync::lock(object).type_name.clone();
                if let Some(type_name) = type_name
                    && let Some(template) = self.ctx.lookup_type(&type_name)
                    && let Some(method) = template.method(name)
                {
                    return match method {
                        Value::Function(func) => self.invoke_function(&func, args, Some(receiver.clone()), line),
                        other => self.call_callable(&other, args, line),
                    };
                }
                Err(Exception::new(ExcKind::NameError, format!("no method `{name}` on object")).into())
            }
            Value::Array(array) => match name {
                "len" => seq::len(&[receiver.clone()]),
                "push" => {
                    if args.len() != 1 {
                        return Err(arity_exc("push", 1, args.len()).into());
                    }
                    let mut guard = sync::lock(array);
                    let value = match guard.elem_tag {
                        Some(tag) => args[0]
                            .coerce(tag)
                            .map_err(|failure| coerce_exc(&args[0], tag, failure))?,
                        None => args[0].clone(),
                    };
                    guard.items.push(value);
                    Ok(Value::I64(guard.items.len() as i64))
                }
                "pop" => Ok(sync::lock(array).items.pop().unwrap_or(Value::Null)),
                "map" | "filter" | "reduce" => self.seq_method(receiver, name, args, line),
                _ => Err(unknown_method(name, "array").into()),
            },
            Value::Str(s) => match name {
                "len" => Ok(Value::I64(s.char_len() as i64)),
                "byte_len" => Ok(Value::I64(s.byte_len() as i64)),
                "byte_at" => {
                    if args.len() != 1 {
                        return Err(arity_exc("byte_at", 1, args.len()).into());
                    }
                    let idx = index_usize(&args[0])?;
                    s.byte_at(idx)
                        .map(Value::U8)
                        .ok_or_else(|| out_of_bounds(idx, s.byte_len()).into())
                }
                "char_at" => {
                    if args.len() != 1 {
                        return Err(arity_exc("char_at", 1, args.len()).into());
                    }
                    let idx = index_usize(&args[0])?;
                    s.char_at(idx)
                        .map(Value::Rune)
                        .ok_or_else(|| out_of_bounds(idx, s.char_len()).into())
                }
                "substring" => {
                    if args.len() != 2 {
                        return Err(arity_exc("substring", 2, args.len()).into());
                    }
                    let start = index_usize(&args[0])?;
                    let end = index_usize(&args[1])?;
                    s.substring(start, end)
                        .map(Value::new_str)
                        .ok_or_else(|| out_of_bounds(end, s.char_len()).into())
                }
                "chars" => Ok(Value::new_array(s.as_str().chars().map(Value::Rune).collect(), None)),
                "bytes" => Ok(Value::new_buffer(crate::value::Buffer::from_vec(
                    s.as_str().as_bytes().to_vec(),
                ))),
                "map" | "filter" | "reduce" => self.seq_method(receiver, name, args, line),
                _ => Err(unknown_method(name, "string").into()),
            },
            Value::Channel(channel) => match name {
                "send" => {
                    if args.len() != 1 {
                        return Err(arity_exc("send", 1, args.len()).into());
                    }
                    channel.send(args[0].clone()).map_err(Unwind::from)?;
                    Ok(Value::Null)
                }
                "recv" => Ok(channel.recv().unwrap_or(Value::Null)),
                "recv_ok" => {
                    let (value, ok) = match channel.recv() {
                        Some(value) => (value, true),
                        None => (Value::Null, false),
                    };
                    Ok(Value::new_array(vec![value, Value::Bool(ok)], None))
                }
                "close" => {
                    channel.close();
                    Ok(Value::Null)
                }
                _ => Err(unknown_method(name, "channel").into()),
            },
            Value::Task(handle) => match name {
                "join" => handle.join().map_err(Unwind::from),
                "detach" => {
                    handle.detach();
                    Ok(Value::Null)
                }
                _ => Err(unknown_method(name, "task").into()),
            },
            Value::Buffer(buffer) => match name {
                "len" => Ok(Value::I64(sync::lock(buffer).len() as i64)),
                "capacity" => Ok(Value::I64(sync::lock(buffer).capacity() as i64)),
                _ => Err(unknown_method(name, "buffer").into()),
            },
            Value::File(handle) => match name {
                "read" => os::file_read(handle, &args),
                "write" => os::file_write(handle, &args),
                "seek" => os::file_seek(handle, &args),
                "close" => os::file_close(handle),
                _ => Err(unknown_method(name, "file").into()),
            },
            other => Err(Exception::new(
                ExcKind::TypeError,
                format!("cannot call method `{name}` on {}", other.type_name()),
            )
            .into()),
        }
    }

    fn seq_method(&self, receiver: &Value, name: &str, args: ArgValues, line: u32) -> RunResult<Value> {
        match name {
            "map" => {
                if args.len() != 1 {
                    return Err(arity_exc("map", 1, args.len()).into());
                }
                seq::map(self, receiver, &args[0], line)
            }
            "filter" => {
                if args.len() != 1 {
                    return Err(arity_exc("filter", 1, args.len()).into());
                }
                seq::filter(self, receiver, &args[0], line)
            }
            _ => {
                if args.is_empty() || args.len() > 2 {
                    return Err(arity_exc("reduce", 2, args.len()).into());
                }
                let init = args.get(1).cloned();
                seq::reduce(self, receiver, &args[0], init, line)
            }
        }
    }

    /// Non-call property read.
    fn property_get(&self, receiver: &Value, name: &str) -> RunResult<Value> {
        match receiver {
            Value::Object(object) => {
                if let Some(value) = sync::lock(object).get(name) {
                    return Ok(value);
                }
                let type_name = sync::lock(object).type_name.clone();
                if let Some(type_name) = type_name
                    && let Some(template) = self.ctx.lookup_type(&type_name)
                    && let Some(method) = template.method(name)
                {
                    return Ok(method);
                }
                Err(Exception::new(ExcKind::NameError, format!("object has no field `{name}`")).into())
            }
            other => Err(Exception::new(
                ExcKind::TypeError,
                format!("no property `{name}` on {} (methods must be called)", other.type_name()),
            )
            .into()),
        }
    }

    /// Instantiates a nominal `define object` template.
    fn instantiate(&self, type_name: &str, provided: Vec<(String, Value)>) -> RunResult<Value> {
        let template = self
            .ctx
            .lookup_type(type_name)
            .ok_or_else(|| Exception::new(ExcKind::NameError, format!("unknown object type `{type_name}`")))?;
        for (name, _) in &provided {
            if !template.fields.iter().any(|f| &f.name == name) {
                let message = if template.methods.contains_key(name) {
                    format!("`{name}` is a method of `{type_name}` and cannot be supplied as a field")
                } else {
                    format!("unknown field `{name}` for `{type_name}`")
                };
                return Err(Exception::new(ExcKind::TypeError, message).into());
            }
        }
        let mut object = Object::new(Some(template.name.clone()));
        for field in &template.fields {
            let supplied = provided.iter().find(|(name, _)| *name == field.name).map(|(_, v)| v);
            let value = match supplied {
                Some(value) => value.clone(),
                None => match &field.default {
                    // Defaults evaluate in the definition's scope.
                    Some(default) => self.eval_expr(default, &template.env)?,
                    None if field.optional => Value::Null,
                    None => {
                        return Err(Exception::new(
                            ExcKind::TypeError,
                            format!("missing required field `{}` for `{type_name}`", field.name),
                        )
                        .into());
                    }
                },
            };
            let value = match field.tag {
                Some(tag) => value.coerce(tag).map_err(|failure| coerce_exc(&value, tag, failure))?,
                None => value,
            };
            object.set(&field.name, value);
        }
        Ok(Value::new_object(object))
    }
}

// === Value-level operator helpers ===

fn arity_exc(name: &str, wanted: usize, got: usize) -> Exception {
    Exception::new(ExcKind::TypeError, format!("{name} expects {wanted} arguments, got {got}"))
}

fn unknown_method(name: &str, kind: &str) -> Exception {
    Exception::new(ExcKind::TypeError, format!("unknown method `{name}` on {kind}"))
}

fn out_of_bounds(index: usize, len: usize) -> Exception {
    Exception::new(
        ExcKind::IndexOutOfBounds,
        format!("index {index} out of bounds (length {len})"),
    )
}

fn coerce_exc(value: &Value, tag: TypeTag, failure: CoerceFailure) -> Exception {
    match failure {
        CoerceFailure::Range => Exception::new(ExcKind::RangeError, format!("{value} out of {}", tag.name())),
        CoerceFailure::Kind => Exception::new(
            ExcKind::TypeError,
            format!("cannot use {} as {}", value.type_name(), tag.name()),
        ),
    }
}

/// Materializes an integer literal: suffixed literals range-check against
/// their tag, unsuffixed ones take the producer type `i64` (or `u64` when
/// the magnitude does not fit).
fn int_literal(value: u64, tag: Option<TypeTag>) -> Result<Value, Exception> {
    match tag {
        Some(tag) => {
            let wide = i128::from(value);
            Value::checked_int(wide, tag).ok_or_else(|| {
                Exception::new(ExcKind::RangeError, format!("{value} out of {}", tag.name()))
            })
        }
        None => Ok(match i64::try_from(value) {
            Ok(v) => Value::I64(v),
            Err(_) => Value::U64(value),
        }),
    }
}

fn op_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
        BinaryOp::Coalesce => "??",
        BinaryOp::BitAnd => "&",
        BinaryOp::BitOr => "|",
        BinaryOp::BitXor => "^",
        BinaryOp::Shl => "<<",
        BinaryOp::Shr => ">>",
    }
}

fn operand_exc(op: BinaryOp, lhs: &Value, rhs: &Value) -> Exception {
    Exception::new(
        ExcKind::TypeError,
        format!(
            "unsupported operand types for `{}`: {} and {}",
            op_symbol(op),
            lhs.type_name(),
            rhs.type_name()
        ),
    )
}

/// Non-short-circuiting binary operators over two evaluated values.
pub(crate) fn binary_values(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, Exception> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(lhs.eq_value(rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!lhs.eq_value(rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = lhs.compare(rhs).ok_or_else(|| operand_exc(op, lhs, rhs))?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::Add => match (lhs, rhs) {
            // String + string concatenates into a fresh string; operands are
            // unchanged.
            (Value::Str(a), Value::Str(b)) => {
                let mut out = String::with_capacity(a.byte_len() + b.byte_len());
                out.push_str(a.as_str());
                out.push_str(b.as_str());
                Ok(Value::new_str(out))
            }
            (Value::Ptr(p), other) if other.as_int().is_some() => {
                let offset = other.as_int().unwrap_or(0);
                Ok(Value::Ptr((*p as i128).wrapping_add(offset) as usize))
            }
            (other, Value::Ptr(p)) if other.as_int().is_some() => {
                let offset = other.as_int().unwrap_or(0);
                Ok(Value::Ptr((*p as i128).wrapping_add(offset) as usize))
            }
            _ => numeric_binary(op, lhs, rhs),
        },
        BinaryOp::Sub => match (lhs, rhs) {
            (Value::Ptr(p), other) if other.as_int().is_some() => {
                let offset = other.as_int().unwrap_or(0);
                Ok(Value::Ptr((*p as i128).wrapping_sub(offset) as usize))
            }
            _ => numeric_binary(op, lhs, rhs),
        },
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => numeric_binary(op, lhs, rhs),
        BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr => {
            int_bitwise(op, lhs, rhs)
        }
        BinaryOp::And | BinaryOp::Or | BinaryOp::Coalesce => {
            unreachable!("short-circuit operators are handled before evaluation")
        }
    }
}

/// Arithmetic with numeric promotion: float side wins (wider float),
/// integers widen preserving the wider side's signedness, results wrap
/// two's-complement into the promoted tag.
fn numeric_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, Exception> {
    let result_tag = promote(lhs.tag(), rhs.tag()).ok_or_else(|| operand_exc(op, lhs, rhs))?;
    if result_tag.is_float() {
        let a = lhs.as_numeric_f64().ok_or_else(|| operand_exc(op, lhs, rhs))?;
        let b = rhs.as_numeric_f64().ok_or_else(|| operand_exc(op, lhs, rhs))?;
        // Float division by zero yields IEEE infinity/NaN, not an error.
        let result = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            _ => a % b,
        };
        return Ok(match result_tag {
            TypeTag::F32 => Value::F32(result as f32),
            _ => Value::F64(result),
        });
    }
    let a = lhs.as_int().ok_or_else(|| operand_exc(op, lhs, rhs))?;
    let b = rhs.as_int().ok_or_else(|| operand_exc(op, lhs, rhs))?;
    let result = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div => {
            if b == 0 {
                return Err(Exception::new(ExcKind::DivisionByZero, "integer division by zero"));
            }
            a.wrapping_div(b)
        }
        _ => {
            if b == 0 {
                return Err(Exception::new(ExcKind::DivisionByZero, "integer modulo by zero"));
            }
            a.wrapping_rem(b)
        }
    };
    Ok(Value::wrap_int(result, result_tag))
}

fn int_bitwise(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, Exception> {
    let (Some(a), Some(b)) = (lhs.as_int(), rhs.as_int()) else {
        return Err(operand_exc(op, lhs, rhs));
    };
    let result_tag = promote(lhs.tag(), rhs.tag()).ok_or_else(|| operand_exc(op, lhs, rhs))?;
    // Normalize into the promoted tag's domain first so shifts behave like
    // the tag's width (arithmetic for signed, logical for unsigned).
    let a = Value::wrap_int(a, result_tag).as_int().unwrap_or(0);
    let result = match op {
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        BinaryOp::Shl => a.wrapping_shl((b & 63) as u32),
        _ => a.wrapping_shr((b & 63) as u32),
    };
    Ok(Value::wrap_int(result, result_tag))
}

fn unary_value(op: UnaryOp, value: &Value) -> Result<Value, Exception> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
        UnaryOp::Neg => match value {
            Value::F32(v) => Ok(Value::F32(-v)),
            Value::F64(v) => Ok(Value::F64(-v)),
            _ => match value.as_int() {
                Some(v) => Ok(Value::wrap_int(v.wrapping_neg(), value.tag())),
                None => Err(Exception::new(
                    ExcKind::TypeError,
                    format!("cannot negate {}", value.type_name()),
                )),
            },
        },
        UnaryOp::BitNot => match value.as_int() {
            Some(v) => Ok(Value::wrap_int(!v, value.tag())),
            None => Err(Exception::new(
                ExcKind::TypeError,
                format!("cannot apply `~` to {}", value.type_name()),
            )),
        },
    }
}

fn index_usize(index: &Value) -> Result<usize, Exception> {
    let v = index.as_int().ok_or_else(|| {
        Exception::new(
            ExcKind::TypeError,
            format!("index must be an integer, got {}", index.type_name()),
        )
    })?;
    usize::try_from(v).map_err(|_| Exception::new(ExcKind::IndexOutOfBounds, format!("index {v} out of bounds")))
}

/// `container[index]` reads. String indexing returns a rune (codepoint),
/// not a byte.
fn index_get(container: &Value, index: &Value) -> Result<Value, Exception> {
    match container {
        Value::Array(array) => {
            let idx = index_usize(index)?;
            let guard = sync::lock(array);
            guard
                .items
                .get(idx)
                .cloned()
                .ok_or_else(|| out_of_bounds(idx, guard.items.len()))
        }
        Value::Str(s) => {
            let idx = index_usize(index)?;
            s.char_at(idx).map(Value::Rune).ok_or_else(|| out_of_bounds(idx, s.char_len()))
        }
        Value::Buffer(buffer) => {
            let idx = index_usize(index)?;
            let guard = sync::lock(buffer);
            guard.get(idx).map(Value::U8).ok_or_else(|| out_of_bounds(idx, guard.len()))
        }
        Value::Object(object) => match index {
            Value::Str(name) => sync::lock(object)
                .get(name.as_str())
                .ok_or_else(|| Exception::new(ExcKind::NameError, format!("object has no field `{}`", name.as_str()))),
            other => Err(Exception::new(
                ExcKind::TypeError,
                format!("object index must be a string, got {}", other.type_name()),
            )),
        },
        Value::Null => Err(Exception::new(ExcKind::NullAccess, "index of null")),
        other => Err(Exception::new(
            ExcKind::TypeError,
            format!("{} is not indexable", other.type_name()),
        )),
    }
}

/// `container[index] = value` writes.
fn index_set(container: &Value, index: &Value, value: Value) -> Result<(), Exception> {
    match container {
        Value::Array(array) => {
            let idx = index_usize(index)?;
            let mut guard = sync::lock(array);
            let value = match guard.elem_tag {
                Some(tag) => value.coerce(tag).map_err(|failure| coerce_exc(&value, tag, failure))?,
                None => value,
            };
            let len = guard.items.len();
            match guard.items.get_mut(idx) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(out_of_bounds(idx, len)),
            }
        }
        Value::Buffer(buffer) => {
            let idx = index_usize(index)?;
            let byte = value
                .as_int()
                .and_then(|v| u8::try_from(v).ok())
                .ok_or_else(|| coerce_exc(&value, TypeTag::U8, CoerceFailure::Range))?;
            let mut guard = sync::lock(buffer);
            let len = guard.len();
            if guard.set(idx, byte) {
                Ok(())
            } else {
                Err(out_of_bounds(idx, len))
            }
        }
        Value::Object(object) => match index {
            Value::Str(name) => {
                sync::lock(object).set(name.as_str(), value);
                Ok(())
            }
            other => Err(Exception::new(
                ExcKind::TypeError,
                format!("object index must be a string, got {}", other.type_name()),
            )),
        },
        Value::Str(_) => Err(Exception::new(ExcKind::TypeError, "strings are immutable")),
        Value::Null => Err(Exception::new(ExcKind::NullAccess, "index of null")),
        other => Err(Exception::new(
            ExcKind::TypeError,
            format!("{} is not indexable", other.type_name()),
        )),
    }
}
