use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use log::{debug, warn};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::decoder::{DecodeRequest, DecoderGate, Thumbnail};
use crate::photo::is_raw_image;

/// 기본 최대 캐시 크기 (500 MiB)
pub const DEFAULT_MAX_BYTES: u64 = 500 * 1024 * 1024;

/// 썸네일 화질 단계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThumbnailQuality {
    #[default]
    Small,
    Medium,
    Full,
}

impl ThumbnailQuality {
    /// 긴 변 목표 길이 (px)
    pub fn target_long_side(self) -> u32 {
        match self {
            ThumbnailQuality::Small => 100,
            ThumbnailQuality::Medium => 500,
            ThumbnailQuality::Full => 2000,
        }
    }

    /// 숫자 단계 (알 수 없는 값은 Small)
    pub fn from_level(level: i32) -> Self {
        match level {
            1 => ThumbnailQuality::Medium,
            2 => ThumbnailQuality::Full,
            _ => ThumbnailQuality::Small,
        }
    }
}

impl FromStr for ThumbnailQuality {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "medium" => ThumbnailQuality::Medium,
            "full" => ThumbnailQuality::Full,
            _ => ThumbnailQuality::Small,
        })
    }
}

impl fmt::Display for ThumbnailQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThumbnailQuality::Small => "small",
            ThumbnailQuality::Medium => "medium",
            ThumbnailQuality::Full => "full",
        };
        f.write_str(name)
    }
}

/// 캐시 키 (경로, 화질)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: PathBuf,
    pub quality: ThumbnailQuality,
}

impl CacheKey {
    pub fn new(path: impl Into<PathBuf>, quality: ThumbnailQuality) -> Self {
        Self {
            path: path.into(),
            quality,
        }
    }
}

struct CacheEntry {
    thumbnail: Arc<Thumbnail>,
    size: u64,
    last_access: Instant,
}

/// 캐시 상태 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub decode_failures: u64,
}

/// 락 하나로 보호되는 맵과 바이트 합계
struct CacheState {
    entries: LruCache<CacheKey, CacheEntry>,
    total_bytes: u64,
    stats: CacheStats,
}

impl CacheState {
    fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
            total_bytes: 0,
            stats: CacheStats::default(),
        }
    }

    /// 재확인 → 축출 → 삽입
    ///
    /// 다른 태스크가 먼저 넣었다면 그 항목을 돌려준다.
    fn insert(&mut self, key: CacheKey, thumbnail: Thumbnail, max_bytes: u64) -> (Arc<Thumbnail>, bool) {
        if let Some(existing) = self.entries.get_mut(&key) {
            existing.last_access = Instant::now();
            return (Arc::clone(&existing.thumbnail), false);
        }

        let size = thumbnail.estimated_bytes();
        while self.total_bytes + size > max_bytes {
            let Some((evicted_key, evicted)) = self.entries.pop_lru() else {
                break;
            };
            self.total_bytes -= evicted.size;
            self.stats.evictions += 1;
            debug!(
                "Evicted {} ({}, {} bytes)",
                evicted_key.path.display(),
                evicted_key.quality,
                evicted.size
            );
        }

        let thumbnail = Arc::new(thumbnail);
        self.entries.put(
            key,
            CacheEntry {
                thumbnail: Arc::clone(&thumbnail),
                size,
                last_access: Instant::now(),
            },
        );
        self.total_bytes += size;
        self.stats.insertions += 1;

        (thumbnail, true)
    }

    fn remove_where(&mut self, predicate: impl Fn(&CacheKey) -> bool) -> usize {
        let keys: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            if let Some(entry) = self.entries.pop(key) {
                self.total_bytes -= entry.size;
            }
        }
        keys.len()
    }
}

/// 메모리 크기 기반 LRU 썸네일 캐시
///
/// 복제본은 같은 저장소를 공유한다. 디코드는 락 밖에서 [`DecoderGate`]를 통해 수행한다.
#[derive(Clone)]
pub struct ThumbnailCache {
    state: Arc<Mutex<CacheState>>,
    gate: DecoderGate,
    max_bytes: u64,
}

impl ThumbnailCache {
    pub fn new(gate: DecoderGate, max_bytes: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::new())),
            gate,
            max_bytes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 캐시된 썸네일을 돌려주거나 디코드해서 넣는다.
    ///
    /// 실패(파일 없음, 미지원 포맷, 손상 등)는 로그만 남기고 `None`.
    pub async fn get_or_create(&self, path: &Path, quality: ThumbnailQuality) -> Option<Arc<Thumbnail>> {
        let key = CacheKey::new(path, quality);

        {
            let mut state = self.lock();
            if let Some(entry) = state.entries.get_mut(&key) {
                entry.last_access = Instant::now();
                let thumbnail = Arc::clone(&entry.thumbnail);
                state.stats.hits += 1;
                debug!("Cache hit: {} ({})", path.display(), quality);
                return Some(thumbnail);
            }
            state.stats.misses += 1;
        }

        debug!("Cache miss: {} ({})", path.display(), quality);
        let thumbnail = self.decode(path, quality).await?;
        let (thumbnail, _) = self.lock().insert(key, thumbnail, self.max_bytes);

        Some(thumbnail)
    }

    /// 백그라운드 미리 채우기
    ///
    /// 이미 있는 키는 건너뛴다(LRU 순서 유지). 새로 넣은 개수를 돌려준다.
    pub fn prefetch(&self, paths: Vec<PathBuf>, quality: ThumbnailQuality) -> JoinHandle<usize> {
        let cache = self.clone();

        tokio::spawn(async move {
            let mut inserted = 0;
            for path in paths {
                if cache.contains(&path, quality) {
                    continue;
                }
                let Some(thumbnail) = cache.decode(&path, quality).await else {
                    continue;
                };
                let (_, is_new) = cache
                    .lock()
                    .insert(CacheKey::new(&path, quality), thumbnail, cache.max_bytes);
                if is_new {
                    inserted += 1;
                }
            }

            debug!("Prefetch finished: {} new {} thumbnails", inserted, quality);
            inserted
        })
    }

    async fn decode(&self, path: &Path, quality: ThumbnailQuality) -> Option<Thumbnail> {
        let request = DecodeRequest::thumbnail(path, is_raw_image(path), quality.target_long_side());

        let result = self
            .gate
            .decode(request)
            .await
            .and_then(Thumbnail::try_from);

        match result {
            Ok(thumbnail) => Some(thumbnail),
            Err(e) => {
                warn!("Failed to create thumbnail for {}: {}", path.display(), e);
                self.lock().stats.decode_failures += 1;
                None
            }
        }
    }

    /// LRU 순서를 바꾸지 않는 존재 확인
    pub fn contains(&self, path: &Path, quality: ThumbnailQuality) -> bool {
        self.lock().entries.contains(&CacheKey::new(path, quality))
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn current_bytes(&self) -> u64 {
        self.lock().total_bytes
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            bytes: state.total_bytes,
            ..state.stats
        }
    }

    /// 파일 하나의 모든 화질 항목 제거 (디스크에서 파일이 바뀐 경우)
    pub fn remove(&self, path: &Path) -> usize {
        let removed = self.lock().remove_where(|key| key.path == path);
        if removed > 0 {
            debug!("Removed {} cached thumbnails of {}", removed, path.display());
        }
        removed
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.total_bytes = 0;
    }

    /// 마지막 접근 시각 (테스트/진단용)
    pub fn last_access(&self, path: &Path, quality: ThumbnailQuality) -> Option<Instant> {
        self.lock()
            .entries
            .peek(&CacheKey::new(path, quality))
            .map(|entry| entry.last_access)
    }

    #[cfg(test)]
    fn insert_for_test(&self, path: &str, thumbnail: Thumbnail) -> bool {
        self.lock()
            .insert(CacheKey::new(path, ThumbnailQuality::Small), thumbnail, self.max_bytes)
            .1
    }
}
