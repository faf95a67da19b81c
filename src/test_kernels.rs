//! Crate-side wrappers around the shared test kernels.

use std::path::Path;

pub use crate::shared_kernels::*;
use crate::kernel::{KernelBinary, kernel_path};

pub fn kernel_from_wgsl(source: &str) -> KernelBinary {
    KernelBinary::from_words(compile_wgsl(source)).expect("naga emits a SPIR-V header")
}

pub fn write_kernel(root: &Path, effect: &str, index: usize, source: &str) {
    write_spirv(&kernel_path(root, effect, index), source);
}
