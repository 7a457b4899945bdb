use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use rayon::prelude::*;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::cache::{ThumbnailCache, ThumbnailQuality};
use crate::decoder::Thumbnail;
use crate::error::FolderError;
use crate::photo::{extension_group, natural_cmp, PhotoInfo, SUPPORTED_EXTENSIONS};

/// 이벤트 채널 용량
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 폴더 로더 동작 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderLoaderSettings {
    /// 이만큼 쌓이면 목록에 반영
    pub batch_size: usize,
    /// 마지막 반영 후 이 시간이 지나면 반영
    pub flush_interval: Duration,
    /// 파일 사이 대기 시간
    pub throttle: Duration,
    /// 첫 반영 크기 (목록이 빨리 보이도록)
    pub first_batch_size: usize,
}

impl Default for FolderLoaderSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_millis(250),
            throttle: Duration::from_millis(2),
            first_batch_size: 5,
        }
    }
}

/// 미디어 목록 항목
#[derive(Debug, Clone, Serialize)]
pub struct PhotoItem {
    pub photo: PhotoInfo,
    #[serde(skip)]
    pub thumbnail: Arc<Thumbnail>,
}

/// 폴더 로드 진행 이벤트
#[derive(Debug, Clone)]
pub enum FolderLoadEvent {
    /// 목록에 새로 반영된 항목들
    Batch(Vec<PhotoItem>),
    FirstImagesLoaded,
    Completed { total: usize },
    Cancelled,
}

/// 배치 버퍼
struct BatchBuffer<T> {
    pending: Vec<T>,
    last_flush: Instant,
    batch_size: usize,
    flush_interval: Duration,
    first_batch_size: usize,
}

impl<T> BatchBuffer<T> {
    fn new(settings: &FolderLoaderSettings, now: Instant) -> Self {
        Self {
            pending: Vec::new(),
            last_flush: now,
            batch_size: settings.batch_size.max(1),
            flush_interval: settings.flush_interval,
            first_batch_size: settings.first_batch_size.max(1),
        }
    }

    fn push(&mut self, item: T) {
        self.pending.push(item);
    }

    /// `published`: 지금까지 반영된 개수
    fn should_flush(&self, published: usize, now: Instant) -> bool {
        if self.pending.is_empty() {
            return false;
        }

        self.pending.len() >= self.batch_size
            || now.duration_since(self.last_flush) >= self.flush_interval
            || (published == 0 && self.pending.len() >= self.first_batch_size)
    }

    fn take(&mut self, now: Instant) -> Vec<T> {
        self.last_flush = now;
        std::mem::take(&mut self.pending)
    }
}

/// 폴더의 지원 이미지 목록 (확장자 그룹 순서, 그룹 내 자연 정렬)
///
/// 하위 폴더는 보지 않는다.
pub fn enumerate_photo_files(folder: &Path) -> Vec<PathBuf> {
    let files: Vec<PathBuf> = WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Failed to read entry in {}: {}", folder.display(), e);
                None
            }
        })
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.into_path())
        .collect();

    // 확장자 그룹별 정렬은 병렬로
    let groups: Vec<Vec<PathBuf>> = (0..SUPPORTED_EXTENSIONS.len())
        .into_par_iter()
        .map(|group| {
            let mut paths: Vec<PathBuf> = files
                .iter()
                .filter(|path| extension_group(path) == Some(group))
                .cloned()
                .collect();
            paths.sort_by(|a, b| natural_cmp(a, b));
            paths
        })
        .collect();

    groups.into_iter().flatten().collect()
}

struct WorkerState {
    token: Option<CancellationToken>,
    reload_pending: bool,
}

struct Inner {
    cache: ThumbnailCache,
    settings: FolderLoaderSettings,
    folder: Mutex<Option<PathBuf>>,
    photos: RwLock<Vec<PhotoItem>>,
    worker: Mutex<WorkerState>,
    busy: watch::Sender<bool>,
    events: broadcast::Sender<FolderLoadEvent>,
    runs_started: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    /// `worker` 락을 잡은 상태에서 호출
    fn start(self: &Arc<Self>, worker: &mut WorkerState) {
        let Some(folder) = lock(&self.folder).clone() else {
            return;
        };

        let token = CancellationToken::new();
        worker.token = Some(token.clone());
        worker.reload_pending = false;

        self.photos
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.busy.send_replace(true);
        self.runs_started.fetch_add(1, Ordering::SeqCst);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let result = inner.run(&folder, &token).await;
            inner.finish(&token, result);
        });
    }

    /// 취소되면 `None`
    async fn run(&self, folder: &Path, token: &CancellationToken) -> Option<usize> {
        info!("Loading folder {}", folder.display());
        let started = Instant::now();

        let files = {
            let folder = folder.to_path_buf();
            match tokio::task::spawn_blocking(move || enumerate_photo_files(&folder)).await {
                Ok(files) => files,
                Err(e) => {
                    error!("Folder enumeration task failed: {}", e);
                    Vec::new()
                }
            }
        };
        debug!("Found {} images in {}", files.len(), folder.display());

        let mut buffer = BatchBuffer::new(&self.settings, Instant::now());
        let mut published = 0;
        let mut first_sent = false;

        for path in files {
            if token.is_cancelled() {
                return None;
            }

            let photo = match PhotoInfo::new(&path) {
                Ok(photo) => photo,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            match self.cache.get_or_create(photo.path(), ThumbnailQuality::Small).await {
                Some(thumbnail) => buffer.push(PhotoItem { photo, thumbnail }),
                None => warn!("Skipping {}: no thumbnail", path.display()),
            }

            let now = Instant::now();
            if buffer.should_flush(published, now) {
                if token.is_cancelled() {
                    return None;
                }
                published += self.flush(buffer.take(now), &mut first_sent);
            }

            if !self.settings.throttle.is_zero() {
                tokio::select! {
                    _ = token.cancelled() => return None,
                    _ = tokio::time::sleep(self.settings.throttle) => {}
                }
            }
        }

        if token.is_cancelled() {
            return None;
        }
        published += self.flush(buffer.take(Instant::now()), &mut first_sent);
        if !first_sent && published > 0 {
            let _ = self.events.send(FolderLoadEvent::FirstImagesLoaded);
        }

        info!(
            "Loaded {} images from {} in {:?}",
            published,
            folder.display(),
            started.elapsed()
        );
        Some(published)
    }

    fn flush(&self, batch: Vec<PhotoItem>, first_sent: &mut bool) -> usize {
        if batch.is_empty() {
            return 0;
        }

        let count = batch.len();
        let total = {
            let mut photos = self.photos.write().unwrap_or_else(PoisonError::into_inner);
            photos.extend(batch.iter().cloned());
            photos.len()
        };
        debug!("Published {} images ({} total)", count, total);

        // 구독자가 없으면 send가 실패하지만 문제 없음
        let _ = self.events.send(FolderLoadEvent::Batch(batch));
        if !*first_sent && total >= self.settings.first_batch_size {
            *first_sent = true;
            let _ = self.events.send(FolderLoadEvent::FirstImagesLoaded);
        }

        count
    }

    fn finish(self: &Arc<Self>, token: &CancellationToken, result: Option<usize>) {
        let mut worker = lock(&self.worker);

        match result {
            Some(total) if !token.is_cancelled() => {
                let _ = self.events.send(FolderLoadEvent::Completed { total });
            }
            _ => {
                info!("Folder load cancelled");
                let _ = self.events.send(FolderLoadEvent::Cancelled);
            }
        }

        if worker.reload_pending {
            debug!("Restarting folder load for pending reload");
            self.start(&mut worker);
        } else {
            worker.token = None;
            self.busy.send_replace(false);
        }
    }
}

/// 폴더 선택 시 목록과 썸네일 캐시를 백그라운드에서 채운다.
///
/// 복제본은 같은 상태를 공유한다. 로드는 tokio 런타임 안에서 시작해야 한다.
#[derive(Clone)]
pub struct PhotoFolderLoader {
    inner: Arc<Inner>,
}

impl PhotoFolderLoader {
    pub fn new(cache: ThumbnailCache, settings: FolderLoaderSettings) -> Self {
        let (busy, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                cache,
                settings,
                folder: Mutex::new(None),
                photos: RwLock::new(Vec::new()),
                worker: Mutex::new(WorkerState {
                    token: None,
                    reload_pending: false,
                }),
                busy,
                events,
                runs_started: AtomicUsize::new(0),
            }),
        }
    }

    pub fn current_folder(&self) -> Option<PathBuf> {
        lock(&self.inner.folder).clone()
    }

    /// 폴더 변경. 같은 폴더면 `false`를 돌려주고 다시 읽지 않는다.
    ///
    /// 파일 경로가 들어오면 그 파일이 있는 폴더를 쓴다.
    pub fn change_folder(&self, path: impl AsRef<Path>) -> Result<bool, FolderError> {
        let path = path.as_ref();
        let folder = if path.is_file() {
            path.parent().unwrap_or(path).to_path_buf()
        } else {
            path.to_path_buf()
        };
        if !folder.is_dir() {
            return Err(FolderError::NotFound(folder));
        }

        {
            let mut current = lock(&self.inner.folder);
            if current.as_deref() == Some(folder.as_path()) {
                return Ok(false);
            }
            *current = Some(folder);
        }

        self.update_photo_list();
        Ok(true)
    }

    /// 목록 다시 읽기
    ///
    /// 로드 중이면 취소를 요청하고 재시작을 예약한다. 여러 번 불려도 재시작은 한 번.
    pub fn update_photo_list(&self) {
        let mut worker = lock(&self.inner.worker);
        if let Some(token) = &worker.token {
            token.cancel();
            worker.reload_pending = true;
            return;
        }
        self.inner.start(&mut worker);
    }

    /// 유휴 상태면 `true`, 아니면 취소를 요청하고 `false`
    pub fn request_stop(&self) -> bool {
        let mut worker = lock(&self.inner.worker);
        worker.reload_pending = false;
        match &worker.token {
            None => true,
            Some(token) => {
                token.cancel();
                false
            }
        }
    }

    /// 진행 중인 로드(자동 재시작 포함)가 끝날 때까지 대기
    pub async fn wait_idle(&self) {
        let mut busy = self.inner.busy.subscribe();
        let _ = busy.wait_for(|busy| !*busy).await;
    }

    pub fn is_loading(&self) -> bool {
        *self.inner.busy.borrow()
    }

    /// 현재 목록 스냅샷
    pub fn photo_list(&self) -> Vec<PhotoItem> {
        self.inner
            .photos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FolderLoadEvent> {
        self.inner.events.subscribe()
    }

    /// 시작된 로드 횟수
    pub fn runs_started(&self) -> usize {
        self.inner.runs_started.load(Ordering::SeqCst)
    }

    pub fn cache(&self) -> &ThumbnailCache {
        &self.inner.cache
    }
}
