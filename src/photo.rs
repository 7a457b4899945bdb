use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::PhotoError;

// 지원하는 이미지 확장자 목록 (폴더 로드 시 이 순서대로 그룹화)
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "jpg",          // JPEG
    "bmp",          // BMP
    "png",          // PNG
    "tiff", "tif",  // TIFF
    "gif",          // GIF
    "dng",          // Adobe DNG (RAW)
    "nef",          // Nikon NEF (RAW)
];

// RAW 확장자 목록
pub const RAW_EXTENSIONS: &[&str] = &["dng", "nef"];

/// 확장자 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FileExtensionType {
    Jpeg,
    Bmp,
    Png,
    Tiff,
    Gif,
    Dng,
    Nef,
    Unknown,
}

impl FileExtensionType {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => FileExtensionType::Jpeg,
            "bmp" => FileExtensionType::Bmp,
            "png" => FileExtensionType::Png,
            "tiff" | "tif" => FileExtensionType::Tiff,
            "gif" => FileExtensionType::Gif,
            "dng" => FileExtensionType::Dng,
            "nef" => FileExtensionType::Nef,
            _ => FileExtensionType::Unknown,
        }
    }
}

/// 소문자 확장자 (점 제외)
pub fn file_extension(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// 확장자가 속한 그룹 인덱스 (`.jpeg`는 `.jpg` 그룹)
pub fn extension_group(path: &Path) -> Option<usize> {
    let ext = file_extension(path);
    let ext = if ext == "jpeg" { "jpg" } else { ext.as_str() };
    SUPPORTED_EXTENSIONS.iter().position(|supported| *supported == ext)
}

pub fn is_supported_image(path: &Path) -> bool {
    extension_group(path).is_some()
}

pub fn is_raw_image(path: &Path) -> bool {
    RAW_EXTENSIONS.contains(&file_extension(path).as_str())
}

/// 파일 이름 자연 정렬 (대소문자 무시, 숫자 인식)
pub fn natural_cmp(a: &Path, b: &Path) -> Ordering {
    let a_name = a.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    let b_name = b.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    natord::compare_ignore_case(&a_name, &b_name)
}

/// 디스크 위의 사진 한 장에 대한 읽기 전용 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhotoInfo {
    path: PathBuf,
    file_name: String,
    extension: String,
}

impl PhotoInfo {
    /// 파일이 존재할 때만 생성된다.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, PhotoError> {
        let path = path.into();
        if !path.is_file() {
            return Err(PhotoError::NotFound(path));
        }

        let file_name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        let extension = file_extension(&path);

        Ok(Self {
            path,
            file_name,
            extension,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 확장자를 제외한 파일 이름
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn is_supported(&self) -> bool {
        is_supported_image(&self.path)
    }

    pub fn is_raw(&self) -> bool {
        RAW_EXTENSIONS.contains(&self.extension.as_str())
    }

    pub fn extension_type(&self) -> FileExtensionType {
        if !self.is_supported() {
            return FileExtensionType::Unknown;
        }
        FileExtensionType::from_extension(&self.extension)
    }

    /// 로드 시점에 파일이 아직 있는지
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}
