use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::NaiveDateTime;
use exif::{Exif, In, Reader, Tag, Value};
use image::ImageDecoder as _;
use log::debug;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::MetadataError;
use crate::photo::{FileExtensionType, PhotoInfo};

/// 표시할 EXIF 프로퍼티 종류 (표시 순서)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PropertyType {
    FileName,
    Date,
    CameraModel,
    CameraManufacturer,
    ImageWidth,
    ImageHeight,
    HorizonResolution,
    VerticalResolution,
    BitDepth,
    ShutterSpeed,
    FNumber,
    Iso,
    FocalLength,
    ExposureProgram,
    WhiteBalance,
    MeteringMode,
}

impl PropertyType {
    pub const ALL: [PropertyType; 16] = [
        PropertyType::FileName,
        PropertyType::Date,
        PropertyType::CameraModel,
        PropertyType::CameraManufacturer,
        PropertyType::ImageWidth,
        PropertyType::ImageHeight,
        PropertyType::HorizonResolution,
        PropertyType::VerticalResolution,
        PropertyType::BitDepth,
        PropertyType::ShutterSpeed,
        PropertyType::FNumber,
        PropertyType::Iso,
        PropertyType::FocalLength,
        PropertyType::ExposureProgram,
        PropertyType::WhiteBalance,
        PropertyType::MeteringMode,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            PropertyType::FileName => "File name",
            PropertyType::Date => "Date",
            PropertyType::CameraModel => "Camera model",
            PropertyType::CameraManufacturer => "Camera manufacturer",
            PropertyType::ImageWidth => "Width",
            PropertyType::ImageHeight => "Height",
            PropertyType::HorizonResolution => "Horizon resolution",
            PropertyType::VerticalResolution => "Vertical resolution",
            PropertyType::BitDepth => "Bit depth",
            PropertyType::ShutterSpeed => "Shutter speed",
            PropertyType::FNumber => "F number",
            PropertyType::Iso => "ISO",
            PropertyType::FocalLength => "Focal length",
            PropertyType::ExposureProgram => "Exposure program",
            PropertyType::WhiteBalance => "White balance",
            PropertyType::MeteringMode => "Metering mode",
        }
    }
}

/// EXIF 표시 항목 하나
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExifInfo {
    pub property: PropertyType,
    pub name: &'static str,
    pub value: String,
}

impl ExifInfo {
    pub fn new(property: PropertyType, value: impl Into<String>) -> Self {
        Self {
            property,
            name: property.display_name(),
            value: value.into(),
        }
    }
}

/// 사진 한 장의 메타데이터 리더
///
/// blocking 풀에서 호출된다. 취소 토큰은 항목 사이마다 확인해야 한다.
pub trait MetadataReader: Send + Sync {
    fn read(&self, photo: &PhotoInfo, cancel: &CancellationToken) -> Result<Vec<ExifInfo>, MetadataError>;
}

/// kamadak-exif 기반 기본 리더
#[derive(Debug, Default, Clone, Copy)]
pub struct ExifMetadataReader;

impl ExifMetadataReader {
    pub fn new() -> Self {
        Self
    }
}

/// 이미지 헤더에서 읽은 정보 (EXIF가 없는 포맷용)
#[derive(Debug, Default, Clone, Copy)]
struct HeaderInfo {
    width: Option<u32>,
    height: Option<u32>,
    bits_per_channel: Option<u16>,
}

impl MetadataReader for ExifMetadataReader {
    fn read(&self, photo: &PhotoInfo, cancel: &CancellationToken) -> Result<Vec<ExifInfo>, MetadataError> {
        if photo.extension_type() == FileExtensionType::Unknown {
            return Err(MetadataError::UnsupportedFormat(photo.extension().to_string()));
        }

        let file = File::open(photo.path())?;
        let exif = match Reader::new().read_from_container(&mut BufReader::new(file)) {
            Ok(exif) => Some(exif),
            Err(e) => {
                debug!("No EXIF in {}: {}", photo.path().display(), e);
                None
            }
        };
        let header = if photo.is_raw() {
            HeaderInfo::default()
        } else {
            read_header_info(photo.path())
        };

        let mut infos = Vec::with_capacity(PropertyType::ALL.len());
        for property in PropertyType::ALL {
            if cancel.is_cancelled() {
                return Err(MetadataError::Cancelled);
            }
            let value = property_value(property, photo, exif.as_ref(), &header);
            infos.push(ExifInfo::new(property, value));
        }

        Ok(infos)
    }
}

fn property_value(property: PropertyType, photo: &PhotoInfo, exif: Option<&Exif>, header: &HeaderInfo) -> String {
    let field = |tag: Tag| exif.and_then(|exif| exif.get_field(tag, In::PRIMARY));
    let uint = |tag: Tag| field(tag).and_then(|f| f.value.get_uint(0));
    let rational = |tag: Tag| field(tag).and_then(|f| first_rational(&f.value));
    let ascii = |tag: Tag| field(tag).and_then(|f| first_ascii(&f.value)).unwrap_or_default();
    let with_unit = |value: Option<String>, unit: &str| value.map(|v| format!("{} {}", v, unit)).unwrap_or_default();

    match property {
        PropertyType::FileName => photo.file_name().to_string(),
        PropertyType::Date => format_datetime(&ascii(Tag::DateTime)),
        PropertyType::CameraModel => ascii(Tag::Model),
        PropertyType::CameraManufacturer => ascii(Tag::Make),
        PropertyType::ImageWidth => {
            let width = if photo.is_raw() {
                uint(Tag::ImageWidth)
            } else {
                uint(Tag::PixelXDimension).or(header.width)
            };
            with_unit(width.map(|w| w.to_string()), "pixel")
        }
        PropertyType::ImageHeight => {
            let height = if photo.is_raw() {
                uint(Tag::ImageLength)
            } else {
                uint(Tag::PixelYDimension).or(header.height)
            };
            with_unit(height.map(|h| h.to_string()), "pixel")
        }
        PropertyType::HorizonResolution => with_unit(rational(Tag::XResolution).map(format_decimal), "dpi"),
        PropertyType::VerticalResolution => with_unit(rational(Tag::YResolution).map(format_decimal), "dpi"),
        PropertyType::BitDepth => {
            let bits = uint(Tag::BitsPerSample).or(header.bits_per_channel.map(u32::from));
            with_unit(bits.map(|b| b.to_string()), "bits")
        }
        PropertyType::ShutterSpeed => {
            let exposure = field(Tag::ExposureTime).and_then(|f| match f.value {
                Value::Rational(ref rationals) => rationals.first().map(|r| format_exposure(r.num, r.denom)),
                _ => None,
            });
            with_unit(exposure, "sec")
        }
        PropertyType::FNumber => rational(Tag::FNumber)
            .map(|f| format!("F/{}", format_decimal(f)))
            .unwrap_or_default(),
        PropertyType::Iso => uint(Tag::PhotographicSensitivity)
            .map(|iso| iso.to_string())
            .unwrap_or_default(),
        PropertyType::FocalLength => {
            let focal = uint(Tag::FocalLengthIn35mmFilm)
                .map(|f| f.to_string())
                .or_else(|| rational(Tag::FocalLength).map(format_decimal));
            with_unit(focal, "mm")
        }
        PropertyType::ExposureProgram => uint(Tag::ExposureProgram)
            .map(|v| exposure_program_name(v).to_string())
            .unwrap_or_default(),
        PropertyType::WhiteBalance => uint(Tag::LightSource)
            .map(|v| light_source_name(v).to_string())
            .unwrap_or_default(),
        PropertyType::MeteringMode => uint(Tag::MeteringMode)
            .map(|v| metering_mode_name(v).to_string())
            .unwrap_or_default(),
    }
}

fn first_ascii(value: &Value) -> Option<String> {
    match value {
        Value::Ascii(vecs) => vecs.first().map(|bytes| {
            String::from_utf8_lossy(bytes)
                .trim_end_matches('\0')
                .trim()
                .to_string()
        }),
        _ => None,
    }
}

fn first_rational(value: &Value) -> Option<f64> {
    match value {
        Value::Rational(rationals) => rationals
            .first()
            .filter(|r| r.denom != 0)
            .map(|r| r.num as f64 / r.denom as f64),
        _ => None,
    }
}

/// 헤더만 읽어 크기/비트 깊이를 얻는다 (디코딩 안함)
fn read_header_info(path: &Path) -> HeaderInfo {
    let decoder = image::ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(image::ImageError::IoError)
        .and_then(|reader| reader.into_decoder());

    match decoder {
        Ok(decoder) => {
            let (width, height) = decoder.dimensions();
            let color = decoder.color_type();
            let bits = color.bits_per_pixel() / color.channel_count().max(1) as u16;
            HeaderInfo {
                width: Some(width),
                height: Some(height),
                bits_per_channel: Some(bits),
            }
        }
        Err(e) => {
            debug!("Failed to read image header of {}: {}", path.display(), e);
            HeaderInfo::default()
        }
    }
}

/// "2024:01:15 12:30:45" → "2024/01/15 12:30:45"
fn format_datetime(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }

    NaiveDateTime::parse_from_str(raw, "%Y:%m:%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .map(|dt| dt.format("%Y/%m/%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// 정수면 소수점 없이, 아니면 소수 둘째 자리까지
fn format_decimal(value: f64) -> String {
    if value.fract().abs() < f64::EPSILON {
        format!("{}", value as i64)
    } else {
        let text = format!("{:.2}", value);
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

/// 노출 시간: 1초 미만은 "1/N"
fn format_exposure(num: u32, denom: u32) -> String {
    if num == 0 || denom == 0 {
        return "0".to_string();
    }
    if num >= denom {
        return format_decimal(num as f64 / denom as f64);
    }
    format!("1/{}", (denom as f64 / num as f64).round() as u32)
}

fn exposure_program_name(value: u32) -> &'static str {
    match value {
        1 => "Manual",
        2 => "Normal",
        3 => "AperturePriority",
        4 => "ShutterPriority",
        5 => "CreativeProgram",
        6 => "ActionProgram",
        7 => "Portrait",
        8 => "LandScape",
        _ => "Unknown",
    }
}

fn light_source_name(value: u32) -> &'static str {
    match value {
        1 => "Daylight",
        2 => "Fluorescent",
        3 => "Tungsten",
        4 => "Flash",
        9 => "FineWeather",
        10 => "CloudyWeather",
        11 => "Shade",
        12 => "DaylightFluorescent",
        13 => "DayWhiteFluorescent",
        14 => "CoolWhiteFluorescent",
        15 => "WhiteFluorescent",
        17 => "StandardLightA",
        18 => "StandardLightB",
        19 => "StandardLightC",
        20 => "D55",
        21 => "D65",
        22 => "D75",
        23 => "D50",
        24 => "IsoStudioTungsten",
        255 => "Other",
        _ => "Unknown",
    }
}

fn metering_mode_name(value: u32) -> &'static str {
    match value {
        1 => "Average",
        2 => "CenterWeightedAverage",
        3 => "Spot",
        4 => "MultiSpot",
        5 => "Pattern",
        6 => "Partial",
        255 => "Other",
        _ => "Unknown",
    }
}
