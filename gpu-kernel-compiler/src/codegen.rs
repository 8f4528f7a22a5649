//! Code generator for rolling-window UDF kernels.
//!
//! Wraps the user's device function in a per-row driver kernel. The emitted
//! program text identifies the kernel: its FNV-1a hash is the cache key used
//! by [`crate::jit::KernelCache`].

use anyhow::{bail, Result};
use gpu_olap_core::DataType;
use tracing::debug;

use crate::rolling::UdfAggregator;

/// Name of the driver kernel emitted around every UDF.
pub const ROLLING_ENTRY: &str = "rolling_udf_kernel";

/// Program produced for one UDF and input type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedKernel {
    pub entry: String,
    /// Device function the driver calls once per row.
    pub udf_symbol: String,
    pub input_type: DataType,
    pub output_type: DataType,
    /// Complete program text (CUDA C++ or PTX).
    pub source: String,
    pub key: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct KernelCodegen;

impl KernelCodegen {
    pub fn new() -> Self {
        KernelCodegen
    }

    /// Emit the driver kernel for `udf` over a column of `input_type`.
    pub fn emit_rolling_udf(&self, udf: &UdfAggregator, input_type: DataType) -> Result<GeneratedKernel> {
        let output_type = udf.output_type(input_type);
        let (udf_symbol, source) = match udf {
            UdfAggregator::Cuda { source } => {
                let symbol = extract_cuda_symbol(source)?;
                let program = emit_cuda_driver(source, &symbol, input_type, output_type);
                (symbol, program)
            }
            UdfAggregator::Numba { ptx, .. } => {
                let symbol = extract_ptx_symbol(ptx)?;
                let program = emit_ptx_driver(ptx, &symbol, input_type, output_type);
                (symbol, program)
            }
        };
        let key = fnv1a_hash(source.as_bytes());
        debug!(
            "Codegen rolling udf: symbol={} {} -> {} key={:016x}",
            udf_symbol, input_type, output_type, key
        );
        Ok(GeneratedKernel {
            entry: ROLLING_ENTRY.to_string(),
            udf_symbol,
            input_type,
            output_type,
            source,
            key,
        })
    }
}

impl Default for KernelCodegen {
    fn default() -> Self {
        Self::new()
    }
}

fn emit_cuda_driver(source: &str, symbol: &str, input: DataType, output: DataType) -> String {
    let in_t = input.device_name();
    let out_t = output.device_name();
    format!(
        "#include <cstdint>\n\
         {source}\n\n\
         extern \"C\" __global__ void {entry}(\n\
         \tconst {in_t}* input, {out_t}* output, uint32_t* valid,\n\
         \tconst int32_t* window, const int32_t* forward_window,\n\
         \tint32_t n_rows, int32_t min_periods) {{\n\
         \tint32_t i = blockIdx.x * blockDim.x + threadIdx.x;\n\
         \tif (i >= n_rows) return;\n\
         \tint32_t start = max(0, i - window[i] + 1);\n\
         \tint32_t end = min(n_rows, i + forward_window[i] + 1);\n\
         \tint32_t count = max(0, end - start);\n\
         \tbool ok = count >= min_periods;\n\
         \tif (ok) {symbol}(&output[i], input, start, count);\n\
         \tif (ok) atomicOr(&valid[i / 32], 1u << (i % 32));\n\
         }}\n",
        source = source,
        entry = ROLLING_ENTRY,
        in_t = in_t,
        out_t = out_t,
        symbol = symbol,
    )
}

fn emit_ptx_driver(ptx: &str, symbol: &str, input: DataType, output: DataType) -> String {
    format!(
        ".version 8.0\n.target sm_80\n.address_size 64\n\
         // {entry}: {symbol}({input}) -> {output}\n\
         {ptx}\n\
         .visible .entry {entry}(\n\
         \t.param .u64 input_ptr,\n\
         \t.param .u64 output_ptr,\n\
         \t.param .u64 valid_ptr,\n\
         \t.param .u64 window_ptr,\n\
         \t.param .u64 forward_window_ptr,\n\
         \t.param .u32 n_rows,\n\
         \t.param .u32 min_periods) {{\n\tret;\n}}\n",
        entry = ROLLING_ENTRY,
        symbol = symbol,
        input = input,
        output = output,
        ptx = ptx,
    )
}

/// Name of the first `__device__` function defined in `source`.
pub fn extract_cuda_symbol(source: &str) -> Result<String> {
    let Some(pos) = source.find("__device__") else {
        bail!("CUDA UDF source has no __device__ function");
    };
    let rest = &source[pos + "__device__".len()..];
    let Some(paren) = rest.find('(') else {
        bail!("CUDA UDF __device__ declaration has no parameter list");
    };
    match last_identifier(&rest[..paren]) {
        Some(name) => Ok(name.to_string()),
        None => bail!("CUDA UDF __device__ declaration has no function name"),
    }
}

/// Name of the first `.func` declared in `ptx`.
pub fn extract_ptx_symbol(ptx: &str) -> Result<String> {
    let Some(pos) = ptx.find(".func") else {
        bail!("PTX UDF declares no .func");
    };
    let mut rest = ptx[pos + ".func".len()..].trim_start();
    // optional return parameter list
    if rest.starts_with('(') {
        let Some(close) = rest.find(')') else {
            bail!("PTX .func return list is not closed");
        };
        rest = rest[close + 1..].trim_start();
    }
    let name: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.'))
        .collect();
    if name.is_empty() {
        bail!("PTX .func has no name");
    }
    Ok(name)
}

fn last_identifier(s: &str) -> Option<&str> {
    let s = s.trim_end();
    let start = s
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_alphanumeric() || *c == '_')
        .last()
        .map(|(i, _)| i)?;
    Some(&s[start..])
}

pub fn fnv1a_hash(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 14_695_981_039_346_656_037;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(1_099_511_628_211);
    }
    hash
}
