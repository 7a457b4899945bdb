use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::decoder::{DecodeRequest, DecoderGate, Thumbnail};
use crate::error::{DecodeError, LoadError, MetadataError};
use crate::metadata::{ExifInfo, MetadataReader};
use crate::photo::PhotoInfo;

/// 뷰어 표시용 긴 변 길이 (px)
pub const DEFAULT_VIEW_LONG_SIDE: u32 = 2200;

/// 선택된 사진의 로드 결과
#[derive(Debug, Clone, Serialize)]
pub struct LoadedPhoto {
    pub photo: PhotoInfo,
    #[serde(skip)]
    pub image: Arc<Thumbnail>,
    pub exif: Vec<ExifInfo>,
}

/// 취소는 에러가 아니다
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    Completed(LoadedPhoto),
    Cancelled,
}

impl LoadOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LoadOutcome::Cancelled)
    }

    pub fn into_loaded(self) -> Option<LoadedPhoto> {
        match self {
            LoadOutcome::Completed(loaded) => Some(loaded),
            LoadOutcome::Cancelled => None,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 선택된 사진 한 장을 로드한다 (동시에 하나만)
///
/// 새 로드가 들어오면 진행 중인 로드를 취소하고, 그 로드가 완전히 끝난 뒤에 시작한다.
pub struct PhotoLoader {
    gate: DecoderGate,
    metadata: Arc<dyn MetadataReader>,
    view_long_side: u32,
    selected: Mutex<Option<PhotoInfo>>,
    current: Mutex<CancellationToken>,
    /// 단일 슬롯 (tokio Mutex는 FIFO)
    slot: Arc<tokio::sync::Mutex<()>>,
}

impl PhotoLoader {
    pub fn new(gate: DecoderGate, metadata: Arc<dyn MetadataReader>, view_long_side: u32) -> Self {
        Self {
            gate,
            metadata,
            view_long_side,
            selected: Mutex::new(None),
            current: Mutex::new(CancellationToken::new()),
            slot: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn select(&self, photo: Option<PhotoInfo>) {
        *lock(&self.selected) = photo;
    }

    pub fn selected(&self) -> Option<PhotoInfo> {
        lock(&self.selected).clone()
    }

    /// 현재 선택된 사진 로드
    pub async fn load_selected(&self) -> Result<LoadOutcome, LoadError> {
        let photo = self.selected().ok_or(LoadError::NoPhotoSelected)?;
        self.load(photo).await
    }

    /// 진행 중인 로드를 취소하고 `photo`를 로드한다.
    ///
    /// 로드 작업은 별도 태스크에서 돌기 때문에 호출한 future가 drop되어도
    /// 슬롯은 작업이 끝날 때 반환된다.
    pub async fn load(&self, photo: PhotoInfo) -> Result<LoadOutcome, LoadError> {
        let token = CancellationToken::new();
        {
            let mut current = lock(&self.current);
            let previous = std::mem::replace(&mut *current, token.clone());
            previous.cancel();
        }

        let slot = Arc::clone(&self.slot);
        let gate = self.gate.clone();
        let metadata = Arc::clone(&self.metadata);
        let view_long_side = self.view_long_side;

        let job = tokio::spawn(async move {
            let _slot = slot.lock_owned().await;
            run_load(photo, token, gate, metadata, view_long_side).await
        });

        job.await.map_err(|e| {
            error!("Photo load task failed: {}", e);
            LoadError::Task(e.to_string())
        })?
    }

    /// 진행 중인 로드 취소
    pub fn cancel(&self) {
        lock(&self.current).cancel();
    }

    pub fn is_loading(&self) -> bool {
        self.slot.try_lock().is_err()
    }
}

async fn run_load(
    photo: PhotoInfo,
    token: CancellationToken,
    gate: DecoderGate,
    metadata: Arc<dyn MetadataReader>,
    view_long_side: u32,
) -> Result<LoadOutcome, LoadError> {
    if token.is_cancelled() {
        debug!("Load of {} superseded before start", photo.path().display());
        return Ok(LoadOutcome::Cancelled);
    }
    if !photo.exists() {
        return Err(LoadError::NotFound(photo.path().to_path_buf()));
    }

    debug!("Loading {}", photo.path().display());
    let request = DecodeRequest::full(photo.path(), photo.is_raw(), view_long_side);

    let exif_task = {
        let photo = photo.clone();
        let token = token.clone();
        tokio::task::spawn_blocking(move || metadata.read(&photo, &token))
    };

    // 이미지와 EXIF를 동시에 읽고 둘 다 끝날 때까지 기다린다
    let (image, exif) = tokio::join!(gate.decode(request), exif_task);

    if token.is_cancelled() {
        debug!("Load of {} cancelled", photo.path().display());
        return Ok(LoadOutcome::Cancelled);
    }

    let image = image?;
    let exif = exif.map_err(|e| {
        error!("Metadata task failed: {}", e);
        LoadError::Task(e.to_string())
    })?;
    let exif = match exif {
        Ok(exif) => exif,
        Err(MetadataError::Cancelled) => return Ok(LoadOutcome::Cancelled),
        Err(e) => return Err(e.into()),
    };

    let image = match Thumbnail::try_from(image) {
        Ok(image) => image,
        Err(DecodeError::EmptyImage) => return Err(LoadError::EmptyResult),
        Err(e) => return Err(e.into()),
    };
    if exif.is_empty() {
        return Err(LoadError::EmptyResult);
    }

    Ok(LoadOutcome::Completed(LoadedPhoto {
        photo,
        image: Arc::new(image),
        exif,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeDecoder, FakeMetadata, TempDir};
    use std::time::Duration;

    fn loader(fake: Arc<FakeDecoder>, metadata: FakeMetadata) -> PhotoLoader {
        PhotoLoader::new(DecoderGate::new(fake, 1), Arc::new(metadata), DEFAULT_VIEW_LONG_SIDE)
    }

    #[tokio::test]
    async fn test_load_completes_with_full_view_request() {
        let dir = TempDir::new("loader-ok");
        let path = dir.touch("DSC_0001.jpg");
        let fake = Arc::new(FakeDecoder::new().with_size(&path, 1200, 800));
        let loader = loader(fake.clone(), FakeMetadata::new());

        let outcome = loader.load(PhotoInfo::new(&path).unwrap()).await.unwrap();
        let loaded = outcome.into_loaded().unwrap();

        assert_eq!((loaded.image.width(), loaded.image.height()), (1200, 800));
        assert_eq!(loaded.exif[0].value, "DSC_0001");

        let requests = fake.requests();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].want_thumbnail);
        assert_eq!(requests[0].target_long_side, DEFAULT_VIEW_LONG_SIDE);
        assert!(!loader.is_loading());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_new_load_supersedes_in_flight_load() {
        let dir = TempDir::new("loader-supersede");
        let x = dir.touch("x.jpg");
        let y = dir.touch("y.jpg");
        let fake = Arc::new(FakeDecoder::new().with_delay(Duration::from_millis(150)));
        let loader = Arc::new(loader(fake.clone(), FakeMetadata::new()));

        let first = {
            let loader = Arc::clone(&loader);
            let photo = PhotoInfo::new(&x).unwrap();
            tokio::spawn(async move { loader.load(photo).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = loader.load(PhotoInfo::new(&y).unwrap()).await.unwrap();

        assert!(first.await.unwrap().unwrap().is_cancelled());
        let loaded = second.into_loaded().unwrap();
        assert_eq!(loaded.photo.file_name(), "y");
        // 두 로드가 디코더를 동시에 쓰지 않음
        assert_eq!(fake.max_concurrent(), 1);
    }

    #[tokio::test]
    async fn test_load_selected_without_selection() {
        let loader = loader(Arc::new(FakeDecoder::new()), FakeMetadata::new());
        assert!(matches!(loader.load_selected().await, Err(LoadError::NoPhotoSelected)));
    }

    #[tokio::test]
    async fn test_load_selected_uses_selection() {
        let dir = TempDir::new("loader-selected");
        let path = dir.touch("a.png");
        let loader = loader(Arc::new(FakeDecoder::new()), FakeMetadata::new());

        loader.select(Some(PhotoInfo::new(&path).unwrap()));
        let outcome = loader.load_selected().await.unwrap();
        assert!(matches!(outcome, LoadOutcome::Completed(_)));

        loader.select(None);
        assert!(loader.selected().is_none());
    }

    #[tokio::test]
    async fn test_deleted_file_is_not_found() {
        let dir = TempDir::new("loader-missing");
        let path = dir.touch("gone.jpg");
        let photo = PhotoInfo::new(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let loader = loader(Arc::new(FakeDecoder::new()), FakeMetadata::new());
        assert!(matches!(loader.load(photo).await, Err(LoadError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_empty_results() {
        let dir = TempDir::new("loader-empty");
        let path = dir.touch("a.jpg");

        let loader_without_exif = loader(Arc::new(FakeDecoder::new()), FakeMetadata::new().empty());
        assert!(matches!(
            loader_without_exif.load(PhotoInfo::new(&path).unwrap()).await,
            Err(LoadError::EmptyResult)
        ));

        let blank = Arc::new(FakeDecoder::new().with_size(&path, 0, 0));
        let loader_without_pixels = loader(blank, FakeMetadata::new());
        assert!(matches!(
            loader_without_pixels.load(PhotoInfo::new(&path).unwrap()).await,
            Err(LoadError::EmptyResult)
        ));
    }

    #[tokio::test]
    async fn test_decode_failure_fails_whole_load() {
        let dir = TempDir::new("loader-corrupt");
        let path = dir.touch("corrupt.jpg");

        let loader = loader(Arc::new(FakeDecoder::new()), FakeMetadata::new());
        assert!(matches!(
            loader.load(PhotoInfo::new(&path).unwrap()).await,
            Err(LoadError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_metadata_failure_fails_whole_load() {
        let dir = TempDir::new("loader-metadata-fail");
        let path = dir.touch("a.jpg");
        let fake = Arc::new(FakeDecoder::new().with_default_size(64, 48));

        let loader = loader(fake.clone(), FakeMetadata::new().failing());
        assert!(matches!(
            loader.load(PhotoInfo::new(&path).unwrap()).await,
            Err(LoadError::Metadata(_))
        ));
        // 이미지 디코드는 끝났지만 결과는 버려짐
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_queued_load_superseded_while_waiting_skips_decode() {
        let dir = TempDir::new("loader-queue");
        let x = dir.touch("x.jpg");
        let y = dir.touch("y.jpg");
        let z = dir.touch("z.jpg");
        let fake = Arc::new(FakeDecoder::new().with_delay(Duration::from_millis(150)));
        let metadata = FakeMetadata::new().with_delay(Duration::from_millis(20));
        let loader = Arc::new(loader(fake.clone(), metadata));

        let spawn_load = |path: &std::path::Path| {
            let loader = Arc::clone(&loader);
            let photo = PhotoInfo::new(path).unwrap();
            tokio::spawn(async move { loader.load(photo).await })
        };

        let first = spawn_load(&x);
        tokio::time::sleep(Duration::from_millis(30)).await;
        // x가 디코드 중이므로 y는 슬롯을 기다린다
        let second = spawn_load(&y);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let third = loader.load(PhotoInfo::new(&z).unwrap()).await.unwrap();

        assert!(first.await.unwrap().unwrap().is_cancelled());
        assert!(second.await.unwrap().unwrap().is_cancelled());
        assert_eq!(third.into_loaded().unwrap().photo.file_name(), "z");

        let decoded: Vec<_> = fake.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(decoded, vec![x.clone(), z.clone()]);
        assert_eq!(fake.calls(), 2);
    }

    #[tokio::test]
    async fn test_cancel_in_flight_load() {
        let dir = TempDir::new("loader-cancel");
        let path = dir.touch("slow.jpg");
        let fake = Arc::new(FakeDecoder::new().with_delay(Duration::from_millis(100)));
        let loader = Arc::new(loader(fake, FakeMetadata::new()));

        let task = {
            let loader = Arc::clone(&loader);
            let photo = PhotoInfo::new(&path).unwrap();
            tokio::spawn(async move { loader.load(photo).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(loader.is_loading());
        loader.cancel();

        assert!(task.await.unwrap().unwrap().is_cancelled());
    }
}
