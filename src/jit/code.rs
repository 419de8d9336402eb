//! Loaded machine code
//!
//! `LoadedCode` owns the `JITModule` behind one resource handle. Dropping
//! it without `release` leaks the executable memory, which is the safe
//! default for code that might still be referenced.

use cranelift_jit::JITModule;

use super::JitError;

/// Generated functions callable through `call_function` take at most this
/// many arguments.
pub const MAX_CALL_ARGS: usize = 6;

pub(crate) struct LoadedCode {
    module: Option<JITModule>,
}

impl LoadedCode {
    pub(crate) fn new(module: JITModule) -> Self {
        LoadedCode {
            module: Some(module),
        }
    }

    /// Free the executable memory.
    ///
    /// # Safety
    /// No function pointer or data address obtained from this module may be
    /// used afterwards, and none of its code may be on the call stack.
    pub(crate) unsafe fn release(mut self) {
        if let Some(module) = self.module.take() {
            module.free_memory();
        }
    }
}

impl std::fmt::Debug for LoadedCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedCode")
            .field("live", &self.module.is_some())
            .finish()
    }
}

/// Call a generated function.
///
/// # Safety
/// `ptr` must be the address of a finalized generated function taking
/// exactly `args.len()` `i64` parameters, and its module must stay loaded
/// for the duration of the call.
pub unsafe fn call_function(ptr: *const u8, args: &[i64]) -> Result<i64, JitError> {
    type F0 = unsafe extern "C" fn() -> i64;
    type F1 = unsafe extern "C" fn(i64) -> i64;
    type F2 = unsafe extern "C" fn(i64, i64) -> i64;
    type F3 = unsafe extern "C" fn(i64, i64, i64) -> i64;
    type F4 = unsafe extern "C" fn(i64, i64, i64, i64) -> i64;
    type F5 = unsafe extern "C" fn(i64, i64, i64, i64, i64) -> i64;
    type F6 = unsafe extern "C" fn(i64, i64, i64, i64, i64, i64) -> i64;

    let result = match *args {
        [] => std::mem::transmute::<*const u8, F0>(ptr)(),
        [a] => std::mem::transmute::<*const u8, F1>(ptr)(a),
        [a, b] => std::mem::transmute::<*const u8, F2>(ptr)(a, b),
        [a, b, c] => std::mem::transmute::<*const u8, F3>(ptr)(a, b, c),
        [a, b, c, d] => std::mem::transmute::<*const u8, F4>(ptr)(a, b, c, d),
        [a, b, c, d, e] => std::mem::transmute::<*const u8, F5>(ptr)(a, b, c, d, e),
        [a, b, c, d, e, g] => std::mem::transmute::<*const u8, F6>(ptr)(a, b, c, d, e, g),
        _ => return Err(JitError::TooManyArguments(args.len())),
    };
    Ok(result)
}
