// Shader module loading
//
// Shaders arrive as precompiled SPIR-V files (see build.rs). They are read
// whole and handed to the driver verbatim; the only checks are the ones that
// catch a missing or truncated file.

use ash::vk;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use super::error::{RendererError, RendererResult, VkResultExt};
use super::VulkanDevice;

const SPIRV_MAGIC: u32 = 0x0723_0203;
/// Magic, version, generator, bound, schema
const SPIRV_HEADER_WORDS: usize = 5;

/// A SPIR-V module read from disk
#[derive(Debug, Clone)]
pub struct ShaderBlob {
    pub path: PathBuf,
    pub words: Vec<u32>,
}

impl ShaderBlob {
    pub fn load<P: AsRef<Path>>(path: P) -> RendererResult<Self> {
        let path = path.as_ref();
        let fail = |reason: String| RendererError::ShaderLoad {
            path: path.to_path_buf(),
            reason,
        };

        let bytes = std::fs::read(path).map_err(|e| fail(e.to_string()))?;
        Self::from_bytes(path, &bytes).map_err(fail)
    }

    fn from_bytes(path: &Path, bytes: &[u8]) -> Result<Self, String> {
        if bytes.is_empty() {
            return Err("file is empty".to_string());
        }
        let Some(magic_bytes) = bytes.first_chunk::<4>() else {
            return Err(format!("truncated: {} bytes, shorter than a SPIR-V header", bytes.len()));
        };

        // Either byte order; read_spv swaps big-endian modules
        let magic = u32::from_le_bytes(*magic_bytes);
        if magic != SPIRV_MAGIC && magic.swap_bytes() != SPIRV_MAGIC {
            return Err(format!("not SPIR-V (magic {:#010x})", magic));
        }

        // Rejects sizes that are not a multiple of 4
        let words = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| e.to_string())?;

        if words.len() < SPIRV_HEADER_WORDS {
            return Err(format!("truncated: {} bytes, shorter than a SPIR-V header", bytes.len()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            words,
        })
    }
}

/// Create a shader module from a loaded blob
pub fn create_shader_module(device: &VulkanDevice, blob: &ShaderBlob) -> RendererResult<vk::ShaderModule> {
    log::debug!("Creating shader module from {:?} ({} words)", blob.path, blob.words.len());
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&blob.words);

    unsafe { device.device.create_shader_module(&create_info, None) }
        .vk_context("Failed to create shader module")
}
