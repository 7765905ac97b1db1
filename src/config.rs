//! Archive tooling configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KaoError, Result};
use crate::formats::px::PXCompLevel;
use crate::graphics::kao::codec::At4pxCodec;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KaoConfig {
    /// PX compression level, 0-3
    pub compression_level: u8,
    /// Try lookback sequences before nibble patterns
    pub search_first: bool,
    /// Run exported PNGs through oxipng
    pub optimise_png: bool,
}

impl Default for KaoConfig {
    fn default() -> Self {
        KaoConfig {
            compression_level: 3,
            search_first: true,
            optimise_png: true,
        }
    }
}

impl KaoConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: KaoConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if PXCompLevel::from_u8(self.compression_level).is_none() {
            return Err(KaoError::InvalidConfig(format!(
                "compression_level must be 0-3, got {}",
                self.compression_level
            )));
        }
        Ok(())
    }

    pub fn codec(&self) -> Result<At4pxCodec> {
        let level = PXCompLevel::from_u8(self.compression_level).ok_or_else(|| {
            KaoError::InvalidConfig(format!(
                "compression_level must be 0-3, got {}",
                self.compression_level
            ))
        })?;
        Ok(At4pxCodec::new(level, self.search_first))
    }
}
