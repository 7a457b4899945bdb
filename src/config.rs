use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_MAX_BYTES;
use crate::error::ConfigError;
use crate::folder::FolderLoaderSettings;
use crate::loader::DEFAULT_VIEW_LONG_SIDE;

/// 파이프라인 설정 (JSON)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 썸네일 캐시 최대 크기 (bytes)
    pub cache_max_bytes: u64,
    /// 디코더 동시 호출 수
    pub decoder_slots: usize,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub throttle_ms: u64,
    pub first_batch_size: usize,
    /// 뷰어 이미지 긴 변 (px)
    pub view_long_side: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let folder = FolderLoaderSettings::default();
        Self {
            cache_max_bytes: DEFAULT_MAX_BYTES,
            decoder_slots: 1,
            batch_size: folder.batch_size,
            flush_interval_ms: folder.flush_interval.as_millis() as u64,
            throttle_ms: folder.throttle.as_millis() as u64,
            first_batch_size: folder.first_batch_size,
            view_long_side: DEFAULT_VIEW_LONG_SIDE,
        }
    }
}

impl PipelineConfig {
    /// 기본 설정 파일 경로
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("photo-pipeline").join("pipeline.json"))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;

        debug!("Loaded pipeline config from {}", path.display());
        Ok(config)
    }

    /// 파일이 없으면 기본값
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decoder_slots == 0 {
            return Err(ConfigError::Invalid("decoder_slots must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".to_string()));
        }
        if self.first_batch_size == 0 {
            return Err(ConfigError::Invalid("first_batch_size must be at least 1".to_string()));
        }
        if self.cache_max_bytes == 0 {
            return Err(ConfigError::Invalid("cache_max_bytes must be greater than 0".to_string()));
        }
        if self.view_long_side == 0 {
            return Err(ConfigError::Invalid("view_long_side must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// 디코더 슬롯 수 (CPU 코어 수를 넘지 않음)
    pub fn effective_decoder_slots(&self) -> usize {
        self.decoder_slots.clamp(1, num_cpus::get().max(1))
    }

    pub fn folder_settings(&self) -> FolderLoaderSettings {
        FolderLoaderSettings {
            batch_size: self.batch_size,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            throttle: Duration::from_millis(self.throttle_ms),
            first_batch_size: self.first_batch_size,
        }
    }
}
