//! 테스트 공용 더블과 임시 폴더

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::decoder::{DecodeRequest, DecodedImage, NativeDecoder, PixelFormat};
use crate::error::{DecodeError, MetadataError};
use crate::metadata::{ExifInfo, MetadataReader, PropertyType};
use crate::photo::PhotoInfo;

/// 테스트마다 고유한 임시 폴더 (drop 시 삭제)
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn new(prefix: &str) -> Self {
        let path = std::env::temp_dir().join(format!("photo-pipeline-{}-{}", prefix, uuid::Uuid::new_v4()));
        fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn touch(&self, name: &str) -> PathBuf {
        self.write(name, b"")
    }

    pub fn write(&self, name: &str, data: &[u8]) -> PathBuf {
        let path = self.path.join(name);
        fs::write(&path, data).unwrap();
        path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// 단색 PNG 작성
pub fn write_png(path: &Path, width: u32, height: u32, rgb: [u8; 3]) {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
    img.save(path).unwrap();
}

/// 메모리 위의 JPEG 인코딩
pub fn jpeg_bytes(img: &image::DynamicImage) -> Vec<u8> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)
        .unwrap();
    buf
}

/// JPEG 작성 (`fields`가 있으면 SOI 바로 뒤에 EXIF APP1 삽입)
pub fn write_jpeg(path: &Path, img: &image::DynamicImage, fields: &[exif::Field]) {
    let jpeg = jpeg_bytes(img);
    if fields.is_empty() {
        fs::write(path, jpeg).unwrap();
        return;
    }

    let mut writer = exif::experimental::Writer::new();
    for field in fields {
        writer.push_field(field);
    }
    let mut tiff = Cursor::new(Vec::new());
    writer.write(&mut tiff, false).unwrap();
    let tiff = tiff.into_inner();

    let segment_len = (2 + 6 + tiff.len()) as u16;
    let mut out = Vec::with_capacity(jpeg.len() + tiff.len() + 10);
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(&tiff);
    out.extend_from_slice(&jpeg[2..]);
    fs::write(path, out).unwrap();
}

/// 호출 횟수/동시성을 기록하는 가짜 디코더
pub struct FakeDecoder {
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    requests: Mutex<Vec<DecodeRequest>>,
    sizes: HashMap<PathBuf, (u32, u32)>,
    failing: HashSet<PathBuf>,
    default_size: (u32, u32),
    delay: Duration,
}

impl FakeDecoder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            sizes: HashMap::new(),
            failing: HashSet::new(),
            default_size: (10, 10),
            delay: Duration::ZERO,
        }
    }

    pub fn with_size(mut self, path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        self.sizes.insert(path.into(), (width, height));
        self
    }

    pub fn with_default_size(mut self, width: u32, height: u32) -> Self {
        self.default_size = (width, height);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_on(mut self, path: impl Into<PathBuf>) -> Self {
        self.failing.insert(path.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<DecodeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl NativeDecoder for FakeDecoder {
    fn decode(&self, request: &DecodeRequest) -> Result<DecodedImage, DecodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let name = request
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let result = if self.failing.contains(&request.path) || name.contains("corrupt") {
            Err(DecodeError::Corrupt(format!("fake failure for {}", name)))
        } else {
            let (width, height) = self
                .sizes
                .get(&request.path)
                .copied()
                .unwrap_or(self.default_size);
            let stride = width as usize * 3;
            Ok(DecodedImage {
                pixels: vec![0; stride * height as usize],
                width,
                height,
                stride,
                format: PixelFormat::Bgr24,
            })
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// 고정된 EXIF 목록을 돌려주는 가짜 메타데이터 리더
pub struct FakeMetadata {
    delay: Duration,
    empty: bool,
    failing: bool,
}

impl FakeMetadata {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            empty: false,
            failing: false,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn empty(mut self) -> Self {
        self.empty = true;
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }
}

impl MetadataReader for FakeMetadata {
    fn read(&self, photo: &PhotoInfo, cancel: &CancellationToken) -> Result<Vec<ExifInfo>, MetadataError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if cancel.is_cancelled() {
            return Err(MetadataError::Cancelled);
        }
        if self.failing {
            return Err(MetadataError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("fake metadata failure for {}", photo.file_name()),
            )));
        }
        if self.empty {
            return Ok(Vec::new());
        }
        Ok(vec![ExifInfo::new(PropertyType::FileName, photo.file_name())])
    }
}
