//! Loading of compiled compute-kernel binaries.
//!
//! Kernels live next to each other in an effects directory and are named
//! `<effect>_pass<N>.spv`, `N` counting up from zero. The first missing index ends an
//! effect's chain.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub const KERNEL_EXTENSION: &str = "spv";
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

const PASS_SEPARATOR: &str = "_pass";

#[derive(Debug, Error)]
pub enum KernelLoadError {
    #[error("kernel binary {} does not exist", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read kernel binary {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("kernel binary is empty")]
    Empty,
    #[error("kernel binary is {0} bytes long, which is not a whole number of SPIR-V words")]
    Misaligned(usize),
    #[error("kernel binary does not start with the SPIR-V magic number (found {0:#010x})")]
    BadMagic(u32),
}

/// Raw SPIR-V instruction words of one compute kernel.
///
/// Only lives for as long as it takes to introspect the kernel and build its pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelBinary {
    words: Vec<u32>,
}

impl KernelBinary {
    pub fn from_words(words: Vec<u32>) -> Result<Self, KernelLoadError> {
        match words.first() {
            None => Err(KernelLoadError::Empty),
            Some(&magic) if magic != SPIRV_MAGIC => Err(KernelLoadError::BadMagic(magic)),
            Some(_) => Ok(Self { words }),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KernelLoadError> {
        if bytes.is_empty() {
            return Err(KernelLoadError::Empty);
        }
        if bytes.len() % 4 != 0 {
            return Err(KernelLoadError::Misaligned(bytes.len()));
        }
        let words = bytes
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();
        Self::from_words(words)
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    pub fn byte_len(&self) -> usize {
        self.words.len() * 4
    }
}

/// Path of subpass `index` of `effect` under `root`.
pub fn kernel_path(root: &Path, effect: &str, index: usize) -> PathBuf {
    root.join(format!("{effect}{PASS_SEPARATOR}{index}.{KERNEL_EXTENSION}"))
}

/// Splits a kernel file name such as `bloom_pass2.spv` into `("bloom", 2)`.
pub fn parse_kernel_file_name(file_name: &str) -> Option<(&str, usize)> {
    let stem = file_name.strip_suffix(KERNEL_EXTENSION)?.strip_suffix('.')?;
    let (effect, index) = stem.rsplit_once(PASS_SEPARATOR)?;
    if effect.is_empty() || index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((effect, index.parse().ok()?))
}

/// Kernel paths of `effect`'s chain: contiguous indices from 0 up to the first missing file.
pub fn discover_chain(root: &Path, effect: &str) -> Vec<PathBuf> {
    (0..)
        .map(|index| kernel_path(root, effect, index))
        .take_while(|path| path.is_file())
        .collect()
}

pub fn load_kernel(path: &Path) -> Result<KernelBinary, KernelLoadError> {
    let bytes = std::fs::read(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            KernelLoadError::NotFound(path.to_path_buf())
        } else {
            KernelLoadError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    let kernel = KernelBinary::from_bytes(&bytes)?;
    log::debug!("loaded kernel {} ({} bytes)", path.display(), kernel.byte_len());
    Ok(kernel)
}
