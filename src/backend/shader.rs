// Shader module loading
//
// Shaders arrive as precompiled SPIR-V blobs read from disk; beyond the
// existence and word-size checks the bytes are opaque to the renderer.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;

use super::VulkanDevice;

/// Read a SPIR-V binary from `path` and create a shader module from it.
pub fn load_shader_module(device: &VulkanDevice, path: &Path) -> Result<vk::ShaderModule> {
    let code = read_spirv(path)?;
    create_shader_module(device, &code)
}

/// Read and validate a SPIR-V blob. SPIR-V is a stream of 4-byte words.
pub fn read_spirv(path: &Path) -> Result<Vec<u8>> {
    let code = std::fs::read(path)
        .with_context(|| format!("Failed to read shader binary {:?}", path))?;

    anyhow::ensure!(!code.is_empty(), "Shader binary {:?} is empty", path);
    anyhow::ensure!(
        code.len() % 4 == 0,
        "Shader binary {:?} has size {} which is not a multiple of 4",
        path,
        code.len()
    );

    Ok(code)
}

/// Create a shader module from raw SPIR-V bytes.
pub fn create_shader_module(device: &VulkanDevice, code: &[u8]) -> Result<vk::ShaderModule> {
    // Safety: length was validated to be a whole number of words; Vec<u8>
    // from fs::read is sufficiently aligned on every supported platform
    let code_aligned =
        unsafe { std::slice::from_raw_parts(code.as_ptr() as *const u32, code.len() / 4) };

    let create_info = vk::ShaderModuleCreateInfo::builder().code(code_aligned);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("ember-shader-test-{}-{}", std::process::id(), name))
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = read_spirv(Path::new("does/not/exist.spv")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }

    #[test]
    fn empty_file_is_rejected() {
        let path = temp_path("empty.spv");
        std::fs::File::create(&path).unwrap();
        let err = read_spirv(&path).unwrap_err();
        assert!(err.to_string().contains("empty"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unaligned_size_is_rejected() {
        let path = temp_path("unaligned.spv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&[0u8; 7]).unwrap();
        drop(file);
        let err = read_spirv(&path).unwrap_err();
        assert!(err.to_string().contains("multiple of 4"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn word_aligned_blob_is_accepted() {
        let path = temp_path("ok.spv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&[0u8; 16]).unwrap();
        drop(file);
        assert_eq!(read_spirv(&path).unwrap().len(), 16);
        let _ = std::fs::remove_file(&path);
    }
}
