use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicI32, AtomicI64, Ordering},
    },
    time::SystemTime,
};

use sha2::{Digest, Sha256};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{error, info, instrument, warn};
use utilities::result::Result;

#[derive(Debug, Clone)]
pub struct ChunkMetadata {
    pub chunk_id: String,
    pub size: i64,
    pub checksum: String,
    pub created_at: SystemTime,
    pub last_accessed: SystemTime,
}

/// Durable chunk store for a single node. Chunk bytes live at
/// `<root>/<first-two-chars>/<id>.chunk` with a `.meta` sidecar holding the
/// SHA-256 hex digest and the byte length. The on-disk tree is the source of
/// truth; the in-memory table is rebuilt from it on startup.
pub struct ChunkStorage {
    root: PathBuf,
    total_capacity: AtomicI64,
    used_space: AtomicI64,
    current_load: AtomicI32,
    chunks: Mutex<HashMap<String, ChunkMetadata>>,
}

impl ChunkStorage {
    #[instrument(name = "chunk_storage_open", skip(root))]
    pub async fn open(root: impl AsRef<Path>, capacity_bytes: i64) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        for i in 0..256u32 {
            fs::create_dir_all(root.join(format!("{i:02x}"))).await?;
        }
        let storage = Self {
            root,
            total_capacity: AtomicI64::new(capacity_bytes),
            used_space: AtomicI64::new(0),
            current_load: AtomicI32::new(0),
            chunks: Mutex::new(HashMap::new()),
        };
        storage.load_existing_chunks().await?;
        let chunk_count = storage.chunks.lock().unwrap().len();
        info!(
            root = %storage.root.display(),
            capacity_bytes,
            chunk_count,
            used_bytes = storage.used_space.load(Ordering::SeqCst),
            "Chunk storage initialized"
        );
        Ok(storage)
    }

    // Rebuilds the chunk table from the directory tree. A data file without a
    // sidecar is still registered, with an empty digest, so verification is
    // skipped for it.
    async fn load_existing_chunks(&self) -> Result<()> {
        let mut used: i64 = 0;
        let mut recovered: HashMap<String, ChunkMetadata> = HashMap::new();
        let mut top = fs::read_dir(&self.root).await?;
        while let Some(entry) = top.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let mut sub = fs::read_dir(entry.path()).await?;
            while let Some(chunk_entry) = sub.next_entry().await? {
                let path = chunk_entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("chunk") {
                    continue;
                }
                let Some(chunk_id) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let size = chunk_entry.metadata().await?.len() as i64;
                let checksum = match fs::read_to_string(path.with_extension("meta")).await {
                    Ok(contents) => contents.lines().next().unwrap_or("").to_owned(),
                    Err(_) => String::new(),
                };
                let now = SystemTime::now();
                used += size;
                recovered.insert(
                    chunk_id.to_owned(),
                    ChunkMetadata {
                        chunk_id: chunk_id.to_owned(),
                        size,
                        checksum,
                        created_at: now,
                        last_accessed: now,
                    },
                );
            }
        }
        *self.chunks.lock().unwrap() = recovered;
        self.used_space.store(used, Ordering::SeqCst);
        Ok(())
    }

    fn chunk_path(&self, chunk_id: &str) -> PathBuf {
        let subdir = chunk_id.get(..2).unwrap_or("00");
        self.root.join(subdir).join(format!("{chunk_id}.chunk"))
    }

    #[instrument(name = "chunk_storage_store", skip(self, data), fields(size = data.len()))]
    pub async fn store_chunk(&self, chunk_id: &str, data: &[u8]) -> Result<()> {
        let size = data.len() as i64;
        if self.used_space.load(Ordering::SeqCst) + size > self.total_capacity.load(Ordering::SeqCst)
        {
            return Err(format!("insufficient storage space for chunk {chunk_id}").into());
        }
        let chunk_path = self.chunk_path(chunk_id);
        if let Some(parent) = chunk_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let write_result: std::io::Result<()> = async {
            let mut file = File::create(&chunk_path).await?;
            file.write_all(data).await?;
            file.flush().await?;
            Ok(())
        }
        .await;
        if let Err(e) = write_result {
            let _ = fs::remove_file(&chunk_path).await;
            return Err(format!("failed to write chunk {chunk_id}: {e}").into());
        }
        let checksum = hex::encode(Sha256::digest(data));
        let meta_contents = format!("{checksum}\n{}\n", data.len());
        if let Err(e) = fs::write(chunk_path.with_extension("meta"), meta_contents).await {
            let _ = fs::remove_file(&chunk_path).await;
            return Err(format!("failed to write chunk metadata for {chunk_id}: {e}").into());
        }
        let now = SystemTime::now();
        let metadata = ChunkMetadata {
            chunk_id: chunk_id.to_owned(),
            size,
            checksum: checksum.clone(),
            created_at: now,
            last_accessed: now,
        };
        {
            let mut chunks = self.chunks.lock().unwrap();
            if let Some(old) = chunks.insert(chunk_id.to_owned(), metadata) {
                self.used_space.fetch_sub(old.size, Ordering::SeqCst);
            }
            self.used_space.fetch_add(size, Ordering::SeqCst);
        }
        info!(%chunk_id, size, checksum = %&checksum[..8], "Stored chunk");
        Ok(())
    }

    /// Reads a chunk and verifies it against the stored digest. Returns `None`
    /// when the chunk is absent or the bytes no longer match the digest; the
    /// corrupt file is left in place for inspection.
    #[instrument(name = "chunk_storage_read", skip(self))]
    pub async fn read_chunk(&self, chunk_id: &str) -> Option<Vec<u8>> {
        let data = match fs::read(self.chunk_path(chunk_id)).await {
            Ok(v) => v,
            Err(e) => {
                error!(%chunk_id, error = %e, "Chunk not found");
                return None;
            }
        };
        let expected = {
            let chunks = self.chunks.lock().unwrap();
            chunks.get(chunk_id).map(|m| m.checksum.clone())
        };
        if let Some(expected) = expected {
            if !expected.is_empty() && hex::encode(Sha256::digest(&data)) != expected {
                error!(%chunk_id, "Checksum verification failed");
                return None;
            }
        }
        let mut chunks = self.chunks.lock().unwrap();
        if let Some(metadata) = chunks.get_mut(chunk_id) {
            metadata.last_accessed = SystemTime::now();
        }
        Some(data)
    }

    #[instrument(name = "chunk_storage_delete", skip(self))]
    pub async fn delete_chunk(&self, chunk_id: &str) -> bool {
        let chunk_path = self.chunk_path(chunk_id);
        let removed = fs::remove_file(&chunk_path).await.is_ok();
        let _ = fs::remove_file(chunk_path.with_extension("meta")).await;
        if removed {
            let mut chunks = self.chunks.lock().unwrap();
            if let Some(metadata) = chunks.remove(chunk_id) {
                self.used_space.fetch_sub(metadata.size, Ordering::SeqCst);
            }
            info!(%chunk_id, "Deleted chunk");
        }
        removed
    }

    pub fn has_chunk(&self, chunk_id: &str) -> bool {
        self.chunks.lock().unwrap().contains_key(chunk_id)
    }

    pub fn stored_chunk_ids(&self) -> Vec<String> {
        self.chunks.lock().unwrap().keys().cloned().collect()
    }

    pub fn available_space(&self) -> i64 {
        self.total_capacity.load(Ordering::SeqCst) - self.used_space.load(Ordering::SeqCst)
    }

    pub fn used_space(&self) -> i64 {
        self.used_space.load(Ordering::SeqCst)
    }

    pub fn current_load(&self) -> i32 {
        self.current_load.load(Ordering::SeqCst)
    }

    pub fn increment_load(&self) {
        self.current_load.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement_load(&self) {
        let _ = self
            .current_load
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |load| {
                if load > 0 { Some(load - 1) } else { None }
            });
    }

    /// Checks that every chunk the table knows about still has its data file.
    pub async fn perform_health_check(&self) -> bool {
        let paths: Vec<(String, PathBuf)> = {
            let chunks = self.chunks.lock().unwrap();
            chunks
                .keys()
                .map(|id| (id.clone(), self.chunk_path(id)))
                .collect()
        };
        let mut missing = 0;
        for (chunk_id, path) in paths {
            if !fs::try_exists(&path).await.unwrap_or(false) {
                warn!(%chunk_id, "Missing chunk file");
                missing += 1;
            }
        }
        if missing > 0 {
            warn!(missing, "Health check found issues");
            return false;
        }
        true
    }

    /// Deletes every local chunk not present in `valid_chunks`.
    pub async fn cleanup_orphaned_chunks(&self, valid_chunks: &[String]) {
        let valid: HashSet<&str> = valid_chunks.iter().map(String::as_str).collect();
        let doomed: Vec<String> = {
            let chunks = self.chunks.lock().unwrap();
            chunks
                .keys()
                .filter(|id| !valid.contains(id.as_str()))
                .cloned()
                .collect()
        };
        for chunk_id in doomed {
            if self.delete_chunk(&chunk_id).await {
                info!(%chunk_id, "Cleaned up orphaned chunk");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::future::join_all;
    use tempfile::TempDir;

    use super::*;

    const TEST_CAPACITY: i64 = 10 * 1024 * 1024;

    async fn open_storage(dir: &TempDir) -> ChunkStorage {
        ChunkStorage::open(dir.path(), TEST_CAPACITY).await.unwrap()
    }

    fn test_bytes(len: usize, seed: u8) -> Vec<u8> {
        (0..len)
            .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
            .collect()
    }

    #[tokio::test]
    async fn store_and_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&dir).await;
        let data = b"Hello, MiniDFS!".to_vec();

        storage.store_chunk("test_chunk_1", &data).await.unwrap();
        assert!(storage.has_chunk("test_chunk_1"));
        assert_eq!(storage.read_chunk("test_chunk_1").await.unwrap(), data);
    }

    #[tokio::test]
    async fn store_large_chunk() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&dir).await;
        let data = test_bytes(1024 * 1024, 7);

        storage.store_chunk("large_chunk", &data).await.unwrap();
        assert_eq!(storage.read_chunk("large_chunk").await.unwrap(), data);
        assert_eq!(storage.used_space(), 1024 * 1024);
    }

    #[tokio::test]
    async fn store_zero_size_chunk() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&dir).await;

        storage.store_chunk("empty_chunk", &[]).await.unwrap();
        assert!(storage.has_chunk("empty_chunk"));
        assert_eq!(storage.read_chunk("empty_chunk").await.unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn on_disk_layout_and_checksum() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&dir).await;
        let data = test_bytes(1024 * 1024, 42);

        storage.store_chunk("aabb01", &data).await.unwrap();

        let chunk_path = dir.path().join("aa").join("aabb01.chunk");
        assert!(chunk_path.exists());
        let sidecar = std::fs::read_to_string(dir.path().join("aa").join("aabb01.meta")).unwrap();
        let mut lines = sidecar.lines();
        let digest = lines.next().unwrap();
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, hex::encode(Sha256::digest(&data)));
        assert_eq!(lines.next().unwrap(), format!("{}", data.len()));
        assert_eq!(storage.read_chunk("aabb01").await.unwrap(), data);
    }

    #[tokio::test]
    async fn short_id_lands_in_default_subdir() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&dir).await;

        storage.store_chunk("x", b"tiny").await.unwrap();
        assert!(dir.path().join("00").join("x.chunk").exists());
    }

    #[tokio::test]
    async fn overwrite_updates_used_space() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&dir).await;

        storage.store_chunk("id1", &test_bytes(1024, 1)).await.unwrap();
        assert_eq!(storage.used_space(), 1024);

        storage.store_chunk("id1", &test_bytes(2048, 2)).await.unwrap();
        assert_eq!(storage.used_space(), 2048);

        assert!(storage.delete_chunk("id1").await);
        assert_eq!(storage.used_space(), 0);
    }

    #[tokio::test]
    async fn read_nonexistent_chunk() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&dir).await;
        assert!(storage.read_chunk("nonexistent").await.is_none());
    }

    #[tokio::test]
    async fn delete_missing_chunk_returns_false() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&dir).await;
        assert!(!storage.delete_chunk("nonexistent").await);
    }

    #[tokio::test]
    async fn rejects_store_beyond_capacity() {
        let dir = TempDir::new().unwrap();
        let storage = ChunkStorage::open(dir.path(), 1024).await.unwrap();

        assert!(storage.store_chunk("too_big", &test_bytes(2048, 3)).await.is_err());
        assert!(!storage.has_chunk("too_big"));
        assert_eq!(storage.used_space(), 0);
        assert!(!dir.path().join("to").join("too_big.chunk").exists());
    }

    #[tokio::test]
    async fn recovery_rescans_directory() {
        let dir = TempDir::new().unwrap();
        let data_a = test_bytes(512, 4);
        let data_b = test_bytes(2048, 5);
        {
            let storage = open_storage(&dir).await;
            storage.store_chunk("chunk_a", &data_a).await.unwrap();
            storage.store_chunk("chunk_b", &data_b).await.unwrap();
        }

        let storage = open_storage(&dir).await;
        assert!(storage.has_chunk("chunk_a"));
        assert!(storage.has_chunk("chunk_b"));
        assert_eq!(storage.used_space(), 512 + 2048);
        assert_eq!(storage.read_chunk("chunk_a").await.unwrap(), data_a);
        assert_eq!(storage.read_chunk("chunk_b").await.unwrap(), data_b);
    }

    #[tokio::test]
    async fn corrupted_chunk_fails_verification() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&dir).await;

        storage.store_chunk("fragile", &test_bytes(256, 6)).await.unwrap();
        std::fs::write(dir.path().join("fr").join("fragile.chunk"), b"tampered").unwrap();

        assert!(storage.read_chunk("fragile").await.is_none());
        // the corrupt file stays on disk for inspection
        assert!(dir.path().join("fr").join("fragile.chunk").exists());
    }

    #[tokio::test]
    async fn missing_sidecar_skips_verification() {
        let dir = TempDir::new().unwrap();
        let data = test_bytes(128, 8);
        {
            let storage = open_storage(&dir).await;
            storage.store_chunk("bare", &data).await.unwrap();
        }
        std::fs::remove_file(dir.path().join("ba").join("bare.meta")).unwrap();

        let storage = open_storage(&dir).await;
        assert!(storage.has_chunk("bare"));
        assert_eq!(storage.read_chunk("bare").await.unwrap(), data);
    }

    #[tokio::test]
    async fn health_check_detects_missing_files() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&dir).await;

        storage.store_chunk("healthy", &test_bytes(64, 9)).await.unwrap();
        assert!(storage.perform_health_check().await);

        std::fs::remove_file(dir.path().join("he").join("healthy.chunk")).unwrap();
        assert!(!storage.perform_health_check().await);
    }

    #[tokio::test]
    async fn cleanup_orphaned_chunks_keeps_valid_set() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&dir).await;

        storage.store_chunk("keep", &test_bytes(100, 10)).await.unwrap();
        storage.store_chunk("orphan_1", &test_bytes(200, 11)).await.unwrap();
        storage.store_chunk("orphan_2", &test_bytes(300, 12)).await.unwrap();

        storage.cleanup_orphaned_chunks(&["keep".to_owned()]).await;

        assert!(storage.has_chunk("keep"));
        assert!(!storage.has_chunk("orphan_1"));
        assert!(!storage.has_chunk("orphan_2"));
        assert_eq!(storage.used_space(), 100);
    }

    #[tokio::test]
    async fn load_counter_clamps_at_zero() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&dir).await;

        storage.decrement_load();
        assert_eq!(storage.current_load(), 0);

        storage.increment_load();
        storage.increment_load();
        storage.decrement_load();
        assert_eq!(storage.current_load(), 1);
    }

    #[tokio::test]
    async fn concurrent_stores_account_correctly() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(open_storage(&dir).await);
        let chunk_size = 1024usize;

        let tasks: Vec<_> = (0..8)
            .map(|task| {
                let storage = storage.clone();
                tokio::spawn(async move {
                    for i in 0..16 {
                        let id = format!("chunk_{task}_{i}");
                        storage
                            .store_chunk(&id, &test_bytes(chunk_size, task as u8))
                            .await
                            .unwrap();
                    }
                })
            })
            .collect();
        join_all(tasks).await.into_iter().for_each(|r| r.unwrap());

        assert_eq!(storage.stored_chunk_ids().len(), 8 * 16);
        assert_eq!(storage.used_space(), (8 * 16 * chunk_size) as i64);
    }
}
