//! JIT compilation seam for UDF kernels.
//!
//! A [`JitCompiler`] turns a [`GeneratedKernel`] into something callable per
//! row. [`KernelCache`] keeps compiled kernels keyed by program hash so a UDF
//! is compiled once per input type. [`HostLinker`] is the compiler used when
//! no device toolchain is present: it resolves the UDF symbol against
//! functions registered on the host.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use dashmap::DashMap;
use gpu_olap_core::{Scalar, ValuesRef};
use tracing::{debug, info};

use crate::codegen::GeneratedKernel;

/// One row's reduction: neighborhood values in, one scalar out.
pub trait WindowFunction: Send + Sync {
    fn call(&self, values: ValuesRef<'_>) -> Result<Scalar>;
}

impl<F> WindowFunction for F
where
    F: Fn(ValuesRef<'_>) -> Result<Scalar> + Send + Sync,
{
    fn call(&self, values: ValuesRef<'_>) -> Result<Scalar> {
        self(values)
    }
}

pub trait JitCompiler: Send + Sync {
    fn compile(&self, kernel: &GeneratedKernel) -> Result<Arc<dyn WindowFunction>>;
}

/// Resolves UDF symbols to host functions.
///
/// The generated program text is never executed here. It only identifies
/// the kernel through [`GeneratedKernel::key`] in the cache; the callable is
/// whatever host function was registered under the UDF symbol.
#[derive(Default)]
pub struct HostLinker {
    symbols: DashMap<String, Arc<dyn WindowFunction>>,
}

impl HostLinker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `function` available under `symbol`, replacing any earlier entry.
    pub fn register<F>(&self, symbol: &str, function: F)
    where
        F: WindowFunction + 'static,
    {
        debug!("HostLinker: registered {}", symbol);
        self.symbols.insert(symbol.to_string(), Arc::new(function));
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.contains_key(symbol)
    }
}

impl JitCompiler for HostLinker {
    fn compile(&self, kernel: &GeneratedKernel) -> Result<Arc<dyn WindowFunction>> {
        match self.symbols.get(&kernel.udf_symbol) {
            Some(entry) => Ok(Arc::clone(entry.value())),
            None => bail!(
                "Unresolved UDF symbol '{}' in {} ({} -> {})",
                kernel.udf_symbol,
                kernel.entry,
                kernel.input_type,
                kernel.output_type
            ),
        }
    }
}

/// Compiled kernels by program hash.
pub struct KernelCache {
    compiler: Arc<dyn JitCompiler>,
    kernels: DashMap<u64, Arc<dyn WindowFunction>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl KernelCache {
    pub fn new(compiler: Arc<dyn JitCompiler>) -> Self {
        info!("KernelCache: initialised");
        Self {
            compiler,
            kernels: DashMap::new(),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Fetch the compiled form of `kernel`, compiling on first use.
    pub fn get_or_compile(&self, kernel: &GeneratedKernel) -> Result<Arc<dyn WindowFunction>> {
        if let Some(found) = self.kernels.get(&kernel.key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(found.value()));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!("KernelCache: compiling {} ({:016x})", kernel.udf_symbol, kernel.key);
        let compiled = self.compiler.compile(kernel)?;
        let entry = self.kernels.entry(kernel.key).or_insert(compiled);
        Ok(Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.kernels.clear();
    }
}
