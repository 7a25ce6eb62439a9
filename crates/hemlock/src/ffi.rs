use std::{
    ffi::CString,
    sync::{Arc, Mutex, MutexGuard},
};

use ahash::AHashMap;

use crate::{
    exception::{ExcKind, Exception},
    sync,
    value::{Buffer, TypeTag, Value},
};

/// An `extern fn` declaration: name, parameter and return tags, and the
/// resolved symbol address once the first call has looked it up.
#[derive(Debug)]
pub(crate) struct FfiFunction {
    pub name: String,
    /// Library path pinned by `extern "lib" fn ...`; `None` resolves against
    /// the process image (which covers libc and libm).
    pub lib: Option<String>,
    pub params: Vec<TypeTag>,
    pub ret: Option<TypeTag>,
    resolved: Mutex<Option<usize>>,
}

impl FfiFunction {
    pub fn new(name: String, lib: Option<String>, params: Vec<TypeTag>, ret: Option<TypeTag>) -> Arc<Self> {
        Arc::new(Self {
            name,
            lib,
            params,
            ret,
            resolved: Mutex::new(None),
        })
    }
}

/// Loaded dynamic libraries, keyed by path. Libraries are never unloaded —
/// resolved symbol addresses are cached inside `FfiFunction`s and must stay
/// valid for the life of the process.
#[derive(Debug, Default)]
pub(crate) struct FfiRegistry {
    libs: Mutex<AHashMap<String, &'static libloading::Library>>,
}

impl FfiRegistry {
    /// Resolves the function's symbol, caching the address on the
    /// declaration.
    fn resolve(&self, func: &FfiFunction) -> Result<usize, Exception> {
        let mut resolved = sync::lock(&func.resolved);
        if let Some(addr) = *resolved {
            return Ok(addr);
        }
        let addr = match &func.lib {
            Some(path) => {
                let mut libs = sync::lock(&self.libs);
                let lib = match libs.get(path.as_str()) {
                    Some(lib) => *lib,
                    None => {
                        // SAFETY: loading a library runs its initializers;
                        // the user asked for exactly that by naming it in an
                        // extern declaration.
                        let lib = unsafe { libloading::Library::new(path) }.map_err(|err| {
                            Exception::new(ExcKind::FFIError, format!("cannot load library {path:?}: {err}"))
                        })?;
                        let lib: &'static libloading::Library = Box::leak(Box::new(lib));
                        libs.insert(path.clone(), lib);
                        lib
                    }
                };
                // SAFETY: the symbol is used only through `call`, which
                // transmutes to a signature derived from the declaration the
                // user wrote.
                let symbol: libloading::Symbol<'_, *mut std::ffi::c_void> = unsafe { lib.get(func.name.as_bytes()) }
                    .map_err(|err| {
                        Exception::new(
                            ExcKind::FFIError,
                            format!("symbol {} not found in {path:?}: {err}", func.name),
                        )
                    })?;
                *symbol as usize
            }
            None => self_symbol(&func.name)?,
        };
        *resolved = Some(addr);
        Ok(addr)
    }

    /// Calls the foreign function with marshalled arguments.
    ///
    /// Two ABI shapes are supported, which covers libc and libm without a
    /// libffi dependency: all-integer/pointer signatures and all-f64
    /// signatures, each up to six arguments. Anything else fails with
    /// `FFIError` before any native code runs.
    pub fn call(&self, func: &FfiFunction, args: &[Value]) -> Result<Value, Exception> {
        if args.len() != func.params.len() {
            return Err(Exception::new(
                ExcKind::FFIError,
                format!("{} expects {} arguments, got {}", func.name, func.params.len(), args.len()),
            ));
        }
        if args.len() > MAX_FFI_ARGS {
            return Err(Exception::new(
                ExcKind::FFIError,
                format!("{} has too many parameters for the FFI call shapes", func.name),
            ));
        }
        let addr = self.resolve(func)?;
        let float_args = func.params.iter().all(|tag| *tag == TypeTag::F64);
        let float_ret = matches!(func.ret, Some(TypeTag::F64 | TypeTag::F32));
        if float_args && (float_ret || func.params.iter().any(|tag| *tag == TypeTag::F64)) && float_abi_ok(func) {
            let mut floats = Vec::with_capacity(args.len());
            for (value, tag) in args.iter().zip(&func.params) {
                floats.push(marshal_float(value, *tag, &func.name)?);
            }
            // SAFETY: the address came from the dynamic loader and the
            // signature shape (all f64, f64 return) matches the declaration.
            let ret = unsafe { call_float_abi(addr, &floats) };
            return Ok(match func.ret {
                None | Some(TypeTag::Null) => Value::Null,
                Some(TypeTag::F32) => Value::F32(ret as f32),
                _ => Value::F64(ret),
            });
        }
        if float_ret || func.params.iter().any(|tag| tag.is_float()) {
            return Err(Exception::new(
                ExcKind::FFIError,
                format!(
                    "{}: unsupported FFI signature (mix of float and integer parameters)",
                    func.name
                ),
            ));
        }

        let mut keepalive = Keepalive::default();
        let mut words = Vec::with_capacity(args.len());
        for (value, tag) in args.iter().zip(&func.params) {
            words.push(marshal_word(value, *tag, &func.name, &mut keepalive)?);
        }
        // SAFETY: the address came from the dynamic loader; all arguments
        // are passed as machine words which matches the integer/pointer
        // signature declared by the user.
        let ret = unsafe { call_int_abi(addr, &words) };
        drop(keepalive);
        Ok(unmarshal_ret(ret, func.ret))
    }
}

const MAX_FFI_ARGS: usize = 6;

fn float_abi_ok(func: &FfiFunction) -> bool {
    func.params.iter().all(|tag| *tag == TypeTag::F64)
        && matches!(func.ret, None | Some(TypeTag::F64 | TypeTag::F32))
}

/// Temporaries that must outlive the native call: C strings marshalled from
/// Hemlock strings, and buffer locks held so the byte regions cannot move.
#[derive(Default)]
struct Keepalive<'call> {
    cstrings: Vec<CString>,
    buffers: Vec<MutexGuard<'call, Buffer>>,
}

fn marshal_word<'call>(
    value: &'call Value,
    tag: TypeTag,
    fn_name: &str,
    keepalive: &mut Keepalive<'call>,
) -> Result<u64, Exception> {
    let word = match (value, tag) {
        (Value::Bool(b), _) if tag.is_int() => u64::from(*b),
        (Value::Rune(c), _) if tag.is_int() => u64::from(u32::from(*c)),
        (Value::Ptr(p), TypeTag::Ptr) => *p as u64,
        (Value::Str(s), TypeTag::Ptr) => {
            let cstring = CString::new(s.as_str()).map_err(|_| {
                Exception::new(
                    ExcKind::FFIError,
                    format!("{fn_name}: string argument contains an interior NUL byte"),
                )
            })?;
            let addr = cstring.as_ptr() as u64;
            keepalive.cstrings.push(cstring);
            addr
        }
        (Value::Buffer(buffer), TypeTag::Ptr) => {
            let mut guard = sync::lock(buffer);
            let addr = guard.as_mut_ptr() as u64;
            keepalive.buffers.push(guard);
            addr
        }
        (Value::Null, TypeTag::Ptr) => 0,
        _ if tag.is_int() => match value.as_int() {
            Some(v) => v as u64,
            None => {
                return Err(Exception::new(
                    ExcKind::FFIError,
                    format!("{fn_name}: cannot pass {} as {}", value.type_name(), tag.name()),
                ));
            }
        },
        _ => {
            return Err(Exception::new(
                ExcKind::FFIError,
                format!("{fn_name}: cannot pass {} as {}", value.type_name(), tag.name()),
            ));
        }
    };
    Ok(word)
}

fn marshal_float(value: &Value, tag: TypeTag, fn_name: &str) -> Result<f64, Exception> {
    debug_assert_eq!(tag, TypeTag::F64);
    value.as_numeric_f64().ok_or_else(|| {
        Exception::new(
            ExcKind::FFIError,
            format!("{fn_name}: cannot pass {} as f64", value.type_name()),
        )
    })
}

fn unmarshal_ret(ret: u64, tag: Option<TypeTag>) -> Value {
    match tag {
        None | Some(TypeTag::Null) => Value::Null,
        Some(TypeTag::Bool) => Value::Bool(ret != 0),
        Some(TypeTag::Ptr) => Value::Ptr(ret as usize),
        Some(tag) if tag.is_int() => {
            // Only the low bits of the return register are defined for
            // narrow C return types; `wrap_int` truncates accordingly.
            Value::wrap_int(i128::from(ret), tag)
        }
        Some(_) => Value::Ptr(ret as usize),
    }
}

/// Invokes `addr` as an `extern "C"` function of 0-6 machine-word arguments.
///
/// # Safety
/// `addr` must be a valid function of a compatible integer/pointer
/// signature; pointer arguments must stay valid for the duration of the
/// call (the caller's `Keepalive` guarantees this for marshalled values).
unsafe fn call_int_abi(addr: usize, args: &[u64]) -> u64 {
    // SAFETY: deferred to the caller; each arm transmutes to the arity the
    // argument slice actually has.
    unsafe {
        use std::mem::transmute;
        match args {
            [] => transmute::<usize, extern "C" fn() -> u64>(addr)(),
            [a] => transmute::<usize, extern "C" fn(u64) -> u64>(addr)(*a),
            [a, b] => transmute::<usize, extern "C" fn(u64, u64) -> u64>(addr)(*a, *b),
            [a, b, c] => transmute::<usize, extern "C" fn(u64, u64, u64) -> u64>(addr)(*a, *b, *c),
            [a, b, c, d] => transmute::<usize, extern "C" fn(u64, u64, u64, u64) -> u64>(addr)(*a, *b, *c, *d),
            [a, b, c, d, e] => {
                transmute::<usize, extern "C" fn(u64, u64, u64, u64, u64) -> u64>(addr)(*a, *b, *c, *d, *e)
            }
            [a, b, c, d, e, f] => {
                transmute::<usize, extern "C" fn(u64, u64, u64, u64, u64, u64) -> u64>(addr)(*a, *b, *c, *d, *e, *f)
            }
            _ => unreachable!("argument count checked against MAX_FFI_ARGS"),
        }
    }
}

/// Invokes `addr` as an `extern "C"` function of 0-6 `f64` arguments
/// returning `f64`.
///
/// # Safety
/// `addr` must be a valid function of a compatible all-double signature.
unsafe fn call_float_abi(addr: usize, args: &[f64]) -> f64 {
    // SAFETY: deferred to the caller.
    unsafe {
        use std::mem::transmute;
        match args {
            [] => transmute::<usize, extern "C" fn() -> f64>(addr)(),
            [a] => transmute::<usize, extern "C" fn(f64) -> f64>(addr)(*a),
            [a, b] => transmute::<usize, extern "C" fn(f64, f64) -> f64>(addr)(*a, *b),
            [a, b, c] => transmute::<usize, extern "C" fn(f64, f64, f64) -> f64>(addr)(*a, *b, *c),
            [a, b, c, d] => transmute::<usize, extern "C" fn(f64, f64, f64, f64) -> f64>(addr)(*a, *b, *c, *d),
            [a, b, c, d, e] => {
                transmute::<usize, extern "C" fn(f64, f64, f64, f64, f64) -> f64>(addr)(*a, *b, *c, *d, *e)
            }
            [a, b, c, d, e, f] => {
                transmute::<usize, extern "C" fn(f64, f64, f64, f64, f64, f64) -> f64>(addr)(*a, *b, *c, *d, *e, *f)
            }
            _ => unreachable!("argument count checked against MAX_FFI_ARGS"),
        }
    }
}

/// Resolves a symbol against the current process image, which exposes the
/// symbols of every library the interpreter links (libc, libm).
fn self_symbol(name: &str) -> Result<usize, Exception> {
    #[cfg(unix)]
    {
        let this = libloading::os::unix::Library::this();
        // SAFETY: the symbol is only invoked through `call` with a
        // user-declared signature.
        let symbol: Result<libloading::os::unix::Symbol<*mut std::ffi::c_void>, _> =
            unsafe { this.get(name.as_bytes()) };
        match symbol {
            Ok(symbol) => Ok(*symbol as usize),
            Err(err) => Err(Exception::new(
                ExcKind::FFIError,
                format!("symbol {name} not found in process: {err}"),
            )),
        }
    }
    #[cfg(windows)]
    {
        let this = libloading::os::windows::Library::this().map_err(|err| {
            Exception::new(ExcKind::FFIError, format!("cannot open process image: {err}"))
        })?;
        // SAFETY: as above.
        let symbol: Result<libloading::os::windows::Symbol<*mut std::ffi::c_void>, _> =
            unsafe { this.get(name.as_bytes()) };
        match symbol {
            Ok(symbol) => Ok(*symbol as usize),
            Err(err) => Err(Exception::new(
                ExcKind::FFIError,
                format!("symbol {name} not found in process: {err}"),
            )),
        }
    }
}
