use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use exif::{In, Reader, Tag};
use fast_image_resize::images::Image as ResizeImage;
use fast_image_resize::{PixelType, ResizeOptions, Resizer};
use image::{imageops, ImageFormat, RgbImage};
use jpeg_decoder::{Decoder as JpegDecoder, PixelFormat as JpegPixelFormat};
use log::debug;
use tokio::sync::Semaphore;

use crate::error::DecodeError;
use crate::photo::{file_extension, FileExtensionType};

/// 임베디드 JPEG 탐색 시 시도할 최대 후보 수
const MAX_EMBEDDED_CANDIDATES: usize = 8;

/// 디코더 출력 픽셀 포맷
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 24비트 BGR
    Bgr24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgr24 => 3,
        }
    }
}

/// 디코드 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeRequest {
    pub path: PathBuf,
    pub is_raw: bool,
    pub want_thumbnail: bool,
    /// 긴 변 목표 길이 (0이면 원본 크기)
    pub target_long_side: u32,
}

impl DecodeRequest {
    pub fn thumbnail(path: impl Into<PathBuf>, is_raw: bool, target_long_side: u32) -> Self {
        Self {
            path: path.into(),
            is_raw,
            want_thumbnail: true,
            target_long_side,
        }
    }

    pub fn full(path: impl Into<PathBuf>, is_raw: bool, target_long_side: u32) -> Self {
        Self {
            path: path.into(),
            is_raw,
            want_thumbnail: false,
            target_long_side,
        }
    }
}

/// 디코더가 돌려주는 픽셀 버퍼
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub format: PixelFormat,
}

impl DecodedImage {
    /// 크기가 0이거나 버퍼가 모자라면 비어 있는 것으로 본다.
    pub fn is_empty(&self) -> bool {
        self.width == 0
            || self.height == 0
            || self.stride < self.width as usize * self.format.bytes_per_pixel()
            || self.pixels.len() < self.stride * self.height as usize
    }
}

/// 캐시와 로더가 공유하는 불변 이미지
#[derive(Debug, PartialEq, Eq)]
pub struct Thumbnail {
    width: u32,
    height: u32,
    stride: usize,
    bytes_per_pixel: usize,
    pixels: Vec<u8>,
}

impl Thumbnail {
    pub fn new(width: u32, height: u32, stride: usize, bytes_per_pixel: usize, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            stride,
            bytes_per_pixel,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_pixel
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// 메모리 사용량 추정치 (width × height × bytes per pixel)
    pub fn estimated_bytes(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.bytes_per_pixel as u64
    }
}

impl TryFrom<DecodedImage> for Thumbnail {
    type Error = DecodeError;

    fn try_from(decoded: DecodedImage) -> Result<Self, Self::Error> {
        if decoded.is_empty() {
            return Err(DecodeError::EmptyImage);
        }
        Ok(Thumbnail::new(
            decoded.width,
            decoded.height,
            decoded.stride,
            decoded.format.bytes_per_pixel(),
            decoded.pixels,
        ))
    }
}

/// 이미지 디코더 어댑터
///
/// 호출 간 상태를 갖지 않는다. 구현체가 재진입에 안전하지 않을 수 있으므로
/// 항상 [`DecoderGate`]를 통해 호출한다.
pub trait NativeDecoder: Send + Sync {
    fn decode(&self, request: &DecodeRequest) -> Result<DecodedImage, DecodeError>;
}

/// 디코더 동시 호출 수 제한 (프로세스 전체에서 공유)
#[derive(Clone)]
pub struct DecoderGate {
    decoder: Arc<dyn NativeDecoder>,
    permits: Arc<Semaphore>,
    slots: usize,
}

impl DecoderGate {
    pub fn new(decoder: Arc<dyn NativeDecoder>, slots: usize) -> Self {
        let slots = slots.max(1);
        Self {
            decoder,
            permits: Arc::new(Semaphore::new(slots)),
            slots,
        }
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// 슬롯을 얻은 뒤 blocking 풀에서 디코드한다.
    ///
    /// 호출한 future가 중간에 drop되어도 디코드가 끝날 때까지 슬롯은 반환되지 않는다.
    pub async fn decode(&self, request: DecodeRequest) -> Result<DecodedImage, DecodeError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| DecodeError::Task(e.to_string()))?;
        let decoder = Arc::clone(&self.decoder);

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            decoder.decode(&request)
        })
        .await
        .map_err(|e| DecodeError::Task(e.to_string()))?
    }
}

/// `image` 크레이트 기반 기본 디코더
#[derive(Debug, Default, Clone, Copy)]
pub struct FileDecoder;

impl FileDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl NativeDecoder for FileDecoder {
    fn decode(&self, request: &DecodeRequest) -> Result<DecodedImage, DecodeError> {
        let path = request.path.as_path();
        if !path.is_file() {
            return Err(DecodeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )));
        }

        let rgb = if request.is_raw {
            decode_raw(path, request)?
        } else {
            decode_normal(path, request)?
        };

        let rgb = resize_to_long_side(rgb, request.target_long_side)?;
        let rgb = apply_orientation(rgb, read_orientation(path));

        rgb_to_bgr24(&rgb)
    }
}

/// 일반 이미지 디코드 (JPEG 썸네일은 DCT 스케일링)
fn decode_normal(path: &Path, request: &DecodeRequest) -> Result<RgbImage, DecodeError> {
    let extension_type = FileExtensionType::from_extension(&file_extension(path));

    if request.want_thumbnail && extension_type == FileExtensionType::Jpeg && request.target_long_side > 0 {
        match decode_jpeg_scaled(path, request.target_long_side) {
            Ok(Some(rgb)) => return Ok(rgb),
            Ok(None) => {}
            Err(e) => debug!("DCT decode failed for {}, falling back: {}", path.display(), e),
        }
    }

    let img = image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?;

    Ok(img.to_rgb8())
}

/// DCT 스케일링으로 JPEG 디코드
///
/// RGB/그레이스케일이 아닌 JPEG는 `None`을 돌려 일반 경로로 넘긴다.
fn decode_jpeg_scaled(path: &Path, max_size: u32) -> Result<Option<RgbImage>, DecodeError> {
    let file = File::open(path)?;
    let mut decoder = JpegDecoder::new(BufReader::new(file));

    let max_size = max_size.min(u16::MAX as u32) as u16;
    decoder
        .scale(max_size, max_size)
        .map_err(|e| DecodeError::Corrupt(e.to_string()))?;

    let pixels = decoder
        .decode()
        .map_err(|e| DecodeError::Corrupt(e.to_string()))?;

    let info = decoder
        .info()
        .ok_or_else(|| DecodeError::Corrupt("Failed to get JPEG info".to_string()))?;

    let (width, height) = (info.width as u32, info.height as u32);
    let rgb = match info.pixel_format {
        JpegPixelFormat::RGB24 => pixels,
        JpegPixelFormat::L8 => pixels.iter().flat_map(|&l| [l, l, l]).collect(),
        _ => return Ok(None),
    };

    RgbImage::from_raw(width, height, rgb)
        .map(Some)
        .ok_or_else(|| DecodeError::Allocation("Failed to create RGB image buffer".to_string()))
}

/// RAW 디코드: 썸네일은 EXIF 내장 썸네일 우선, 그 외에는 가장 큰 내장 JPEG 프리뷰
fn decode_raw(path: &Path, request: &DecodeRequest) -> Result<RgbImage, DecodeError> {
    if request.want_thumbnail {
        if let Some(jpeg) = extract_exif_thumbnail(path) {
            match image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg) {
                Ok(img) if long_side(img.width(), img.height()) >= request.target_long_side => {
                    return Ok(img.to_rgb8());
                }
                Ok(_) => debug!("EXIF thumbnail too small for {}", path.display()),
                Err(e) => debug!("Failed to decode EXIF thumbnail for {}: {}", path.display(), e),
            }
        }
    }

    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;

    let min_long_side = if request.want_thumbnail {
        request.target_long_side
    } else {
        u32::MAX
    };

    decode_largest_embedded_jpeg(&data, min_long_side).ok_or_else(|| {
        DecodeError::UnsupportedFormat(format!("No embedded preview found in {}", path.display()))
    })
}

/// EXIF 내장 썸네일(IFD1 JPEG) 추출
fn extract_exif_thumbnail(path: &Path) -> Option<Vec<u8>> {
    let file = File::open(path).ok()?;
    let exif = Reader::new()
        .read_from_container(&mut BufReader::new(file))
        .ok()?;

    let offset = exif
        .get_field(Tag::JPEGInterchangeFormat, In::THUMBNAIL)?
        .value
        .get_uint(0)? as usize;
    let length = exif
        .get_field(Tag::JPEGInterchangeFormatLength, In::THUMBNAIL)?
        .value
        .get_uint(0)? as usize;

    // 오프셋은 TIFF 헤더 기준
    let thumbnail = exif.buf().get(offset..offset.checked_add(length)?)?;

    // JPEG 시그니처 확인
    if thumbnail.starts_with(&[0xFF, 0xD8]) {
        Some(thumbnail.to_vec())
    } else {
        None
    }
}

/// 파일 데이터에서 내장 JPEG들을 찾아 가장 큰 것을 디코드
///
/// `min_long_side` 이상인 후보를 찾으면 바로 돌려준다.
fn decode_largest_embedded_jpeg(data: &[u8], min_long_side: u32) -> Option<RgbImage> {
    let starts: Vec<usize> = data
        .windows(3)
        .enumerate()
        .filter(|(_, window)| window.starts_with(&[0xFF, 0xD8, 0xFF]))
        .map(|(i, _)| i)
        .take(MAX_EMBEDDED_CANDIDATES)
        .collect();

    let mut best: Option<RgbImage> = None;
    for start in starts {
        // 디코더는 EOI 이후의 데이터를 무시한다
        let Ok(img) = image::load_from_memory_with_format(&data[start..], ImageFormat::Jpeg) else {
            continue;
        };

        let candidate_long_side = long_side(img.width(), img.height());
        let is_larger = best
            .as_ref()
            .map_or(true, |b| candidate_long_side > long_side(b.width(), b.height()));

        if is_larger {
            best = Some(img.to_rgb8());
        }
        if candidate_long_side >= min_long_side {
            break;
        }
    }

    best
}

fn long_side(width: u32, height: u32) -> u32 {
    width.max(height)
}

/// 긴 변 목표 길이에 맞춘 크기 (확대는 하지 않음)
pub(crate) fn fit_long_side(width: u32, height: u32, target: u32) -> (u32, u32) {
    let long = long_side(width, height);
    if target == 0 || long <= target {
        return (width, height);
    }

    let scale = target as f64 / long as f64;
    let scaled = |v: u32| ((v as f64 * scale).round() as u32).max(1);
    (scaled(width), scaled(height))
}

/// 고속 리사이징
fn resize_to_long_side(rgb: RgbImage, target: u32) -> Result<RgbImage, DecodeError> {
    let (width, height) = rgb.dimensions();
    let (dst_width, dst_height) = fit_long_side(width, height, target);
    if (dst_width, dst_height) == (width, height) {
        return Ok(rgb);
    }

    let src = ResizeImage::from_vec_u8(width, height, rgb.into_raw(), PixelType::U8x3)
        .map_err(|e| DecodeError::Allocation(e.to_string()))?;
    let mut dst = ResizeImage::new(dst_width, dst_height, PixelType::U8x3);

    Resizer::new()
        .resize(&src, &mut dst, &ResizeOptions::new())
        .map_err(|e| DecodeError::Corrupt(e.to_string()))?;

    RgbImage::from_raw(dst_width, dst_height, dst.into_vec())
        .ok_or_else(|| DecodeError::Allocation("Failed to create resized image buffer".to_string()))
}

/// EXIF Orientation 읽기 (없으면 1)
fn read_orientation(path: &Path) -> u32 {
    let Ok(file) = File::open(path) else {
        return 1;
    };

    Reader::new()
        .read_from_container(&mut BufReader::new(file))
        .ok()
        .and_then(|exif| {
            exif.get_field(Tag::Orientation, In::PRIMARY)
                .and_then(|field| field.value.get_uint(0))
        })
        .unwrap_or(1)
}

/// Orientation에 따라 회전/반전
fn apply_orientation(rgb: RgbImage, orientation: u32) -> RgbImage {
    match orientation {
        2 => imageops::flip_horizontal(&rgb),
        3 => imageops::rotate180(&rgb),
        4 => imageops::flip_vertical(&rgb),
        5 => imageops::flip_horizontal(&imageops::rotate90(&rgb)),
        6 => imageops::rotate90(&rgb),
        7 => imageops::flip_horizontal(&imageops::rotate270(&rgb)),
        8 => imageops::rotate270(&rgb),
        _ => rgb,
    }
}

/// RGB → BGR24 (행 단위 4바이트 정렬)
fn rgb_to_bgr24(rgb: &RgbImage) -> Result<DecodedImage, DecodeError> {
    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        return Err(DecodeError::EmptyImage);
    }
    let row_bytes = width as usize * 3;
    let stride = (row_bytes + 3) & !3;

    let mut pixels = vec![0u8; stride * height as usize];
    for (src_row, dst_row) in rgb.as_raw().chunks_exact(row_bytes).zip(pixels.chunks_exact_mut(stride)) {
        for (src, dst) in src_row.chunks_exact(3).zip(dst_row.chunks_exact_mut(3)) {
            dst[0] = src[2];
            dst[1] = src[1];
            dst[2] = src[0];
        }
    }

    Ok(DecodedImage {
        pixels,
        width,
        height,
        stride,
        format: PixelFormat::Bgr24,
    })
}
