//! Attention backend selection

use std::fmt;
use std::str::FromStr;

/// Attention kernel used by the transformer and text encoder.
///
/// candle's Z-Image modules compute attention with plain matmul + softmax,
/// which is what `native` selects. Other names are rejected at load time so a
/// misconfigured `ZIMAGE_ATTENTION` shows up as a failed load instead of a
/// silent fallback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttentionBackend {
    #[default]
    Native,
}

impl AttentionBackend {
    pub const SUPPORTED: &'static [&'static str] = &["native"];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttentionBackend::Native => "native",
        }
    }
}

impl FromStr for AttentionBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "sdpa" => Ok(AttentionBackend::Native),
            other => anyhow::bail!(
                "Unsupported attention backend '{}' (supported: {})",
                other,
                Self::SUPPORTED.join(", ")
            ),
        }
    }
}

impl fmt::Display for AttentionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
