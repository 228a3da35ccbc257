use anyhow::Result;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device};

/// Pick the compute device: the first GPU when one is compiled in and
/// available, otherwise the CPU.
pub fn select_device(use_gpu: bool) -> Result<Device> {
    if !use_gpu {
        tracing::info!("GPU disabled by configuration, using CPU");
        return Ok(Device::Cpu);
    }
    if cuda_is_available() {
        return Ok(Device::new_cuda(0)?);
    }
    if metal_is_available() {
        return Ok(Device::new_metal(0)?);
    }

    #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
    tracing::warn!("No GPU acceleration available, using CPU (build with `--features metal`)");
    #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
    tracing::warn!("No GPU acceleration available, using CPU (build with `--features cuda`)");

    Ok(Device::Cpu)
}

/// bf16 on accelerators, f32 on CPU where bf16 matmuls are slow.
pub fn select_dtype(device: &Device) -> DType {
    if device.is_cpu() {
        DType::F32
    } else {
        DType::BF16
    }
}

pub fn device_label(device: &Device) -> &'static str {
    if device.is_cuda() {
        "cuda:0"
    } else if device.is_metal() {
        "metal:0"
    } else {
        "cpu"
    }
}
