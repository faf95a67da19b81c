#![allow(dead_code)]

use std::path::Path;

use effect_forge::kernel::kernel_path;

mod kernels;

pub use kernels::*;

pub fn write_kernel(root: &Path, effect: &str, index: usize, source: &str) {
    write_spirv(&kernel_path(root, effect, index), source);
}

pub fn write_file(root: &Path, name: &str, text: &str) {
    std::fs::write(root.join(name), text).expect("write file");
}
