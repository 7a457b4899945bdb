use std::path::PathBuf;

use thiserror::Error;

/// 디코더 어댑터 에러
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode image: {0}")]
    Corrupt(String),

    #[error("Decoder produced an empty image")]
    EmptyImage,

    #[error("Failed to allocate image buffer: {0}")]
    Allocation(String),

    #[error("Decoder task failed: {0}")]
    Task(String),
}

impl From<image::ImageError> for DecodeError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(e) => DecodeError::Io(e),
            image::ImageError::Unsupported(e) => DecodeError::UnsupportedFormat(e.to_string()),
            image::ImageError::Limits(e) => DecodeError::Allocation(e.to_string()),
            other => DecodeError::Corrupt(other.to_string()),
        }
    }
}

/// 메타데이터 읽기 에러
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Metadata extraction cancelled")]
    Cancelled,

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read metadata: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata task failed: {0}")]
    Task(String),
}

/// 사진 레코드 생성 에러
#[derive(Debug, Error)]
pub enum PhotoError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),
}

/// 단일 사진 로드 에러
///
/// 취소는 에러가 아니라 [`crate::loader::LoadOutcome::Cancelled`]로 전달된다.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("No photo selected")]
    NoPhotoSelected,

    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("Failed to load image or EXIF information")]
    EmptyResult,

    #[error("Load task failed: {0}")]
    Task(String),
}

/// 폴더 로더 에러
#[derive(Debug, Error)]
pub enum FolderError {
    #[error("Folder not found: {}", .0.display())]
    NotFound(PathBuf),
}

/// 설정 파일 에러
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}
