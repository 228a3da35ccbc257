//! Per-request seeded noise
//!
//! Sampled on the host from a generator owned by the request, not the
//! device-wide one behind `Tensor::randn`, so concurrent requests never
//! share draws.

use anyhow::Result;
use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Standard normal noise of shape (batch, channels, height, width)
pub fn seeded_noise(
    seed: u64,
    shape: (usize, usize, usize, usize),
    device: &Device,
) -> Result<Tensor> {
    let mut rng = StdRng::seed_from_u64(seed);
    let len = shape.0 * shape.1 * shape.2 * shape.3;
    let data: Vec<f32> = (0..len).map(|_| rng.sample(StandardNormal)).collect();
    Ok(Tensor::from_vec(data, shape, &Device::Cpu)?.to_device(device)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_noise() {
        let a = seeded_noise(42, (1, 2, 4, 4), &Device::Cpu).unwrap();
        let b = seeded_noise(42, (1, 2, 4, 4), &Device::Cpu).unwrap();
        assert_eq!(a.dims(), &[1, 2, 4, 4]);
        assert_eq!(
            a.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            b.flatten_all().unwrap().to_vec1::<f32>().unwrap()
        );
    }

    #[test]
    fn different_seed_different_noise() {
        let a = seeded_noise(1, (1, 1, 8, 8), &Device::Cpu).unwrap();
        let b = seeded_noise(2, (1, 1, 8, 8), &Device::Cpu).unwrap();
        assert_ne!(
            a.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            b.flatten_all().unwrap().to_vec1::<f32>().unwrap()
        );
    }

    #[test]
    fn noise_is_roughly_standard_normal() {
        let t = seeded_noise(7, (1, 4, 32, 32), &Device::Cpu).unwrap();
        let v = t.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let mean = v.iter().sum::<f32>() / v.len() as f32;
        let var = v.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / v.len() as f32;
        assert!(mean.abs() < 0.1, "mean {}", mean);
        assert!((var - 1.0).abs() < 0.15, "var {}", var);
    }
}
