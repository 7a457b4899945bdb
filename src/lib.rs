use std::path::Path;
use std::sync::Arc;

use log::info;

pub mod cache;
pub mod config;
pub mod decoder;
pub mod error;
pub mod folder;
pub mod loader;
pub mod metadata;
pub mod photo;

#[cfg(test)]
mod test_support;

pub use cache::{CacheKey, CacheStats, ThumbnailCache, ThumbnailQuality};
pub use config::PipelineConfig;
pub use decoder::{DecodeRequest, DecodedImage, DecoderGate, FileDecoder, NativeDecoder, PixelFormat, Thumbnail};
pub use error::{ConfigError, DecodeError, FolderError, LoadError, MetadataError, PhotoError};
pub use folder::{FolderLoadEvent, FolderLoaderSettings, PhotoFolderLoader, PhotoItem};
pub use loader::{LoadOutcome, LoadedPhoto, PhotoLoader};
pub use metadata::{ExifInfo, ExifMetadataReader, MetadataReader, PropertyType};
pub use photo::{FileExtensionType, PhotoInfo};

/// 캐시, 디코더 게이트, 로더들을 한 번에 구성하는 진입점
///
/// 호스트 애플리케이션은 이 값 하나를 상태로 들고 있으면 된다.
pub struct PhotoPipeline {
    config: PipelineConfig,
    cache: ThumbnailCache,
    photo_loader: Arc<PhotoLoader>,
    folder_loader: PhotoFolderLoader,
}

impl PhotoPipeline {
    /// 기본 디코더/EXIF 리더로 구성
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        Self::with_collaborators(config, Arc::new(FileDecoder::new()), Arc::new(ExifMetadataReader::new()))
    }

    /// 설정 파일에서 읽어 구성 (파일이 없으면 기본값)
    pub fn from_config_file(path: &Path) -> Result<Self, ConfigError> {
        Self::new(PipelineConfig::load_or_default(path)?)
    }

    pub fn with_collaborators(
        config: PipelineConfig,
        decoder: Arc<dyn NativeDecoder>,
        metadata: Arc<dyn MetadataReader>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let gate = DecoderGate::new(decoder, config.effective_decoder_slots());
        let cache = ThumbnailCache::new(gate.clone(), config.cache_max_bytes);
        let photo_loader = Arc::new(PhotoLoader::new(gate, metadata, config.view_long_side));
        let folder_loader = PhotoFolderLoader::new(cache.clone(), config.folder_settings());

        info!(
            "Photo pipeline ready (cache {} bytes, {} decoder slots)",
            config.cache_max_bytes,
            config.effective_decoder_slots()
        );

        Ok(Self {
            config,
            cache,
            photo_loader,
            folder_loader,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &ThumbnailCache {
        &self.cache
    }

    pub fn photo_loader(&self) -> Arc<PhotoLoader> {
        Arc::clone(&self.photo_loader)
    }

    pub fn folder_loader(&self) -> &PhotoFolderLoader {
        &self.folder_loader
    }
}
