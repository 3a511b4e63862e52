use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::PgConnection;
use docshelf::config::AppConfig;
use docshelf::db::{self, PgPool, RetryPolicy};
use docshelf::routes;
use docshelf::state::AppState;
use docshelf::storage::{FileStorage, LocalFileStorage, StoredFile};
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

type StoreHook = Box<dyn FnOnce() + Send>;

/// Local storage whose removals can be switched to fail, and which can run a
/// one-shot hook right after a file has been written.
pub struct FlakyStorage {
    inner: LocalFileStorage,
    fail_removals: AtomicBool,
    after_store: StdMutex<Option<StoreHook>>,
}

impl FlakyStorage {
    fn new(inner: LocalFileStorage) -> Self {
        Self {
            inner,
            fail_removals: AtomicBool::new(false),
            after_store: StdMutex::new(None),
        }
    }

    #[allow(dead_code)]
    pub fn after_next_store(&self, hook: impl FnOnce() + Send + 'static) {
        *self.after_store.lock().expect("hook lock poisoned") = Some(Box::new(hook));
    }

    #[allow(dead_code)]
    pub fn fail_removals(&self, fail: bool) {
        self.fail_removals.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl FileStorage for FlakyStorage {
    async fn store(&self, title: &str, original_name: &str, bytes: &[u8]) -> Result<StoredFile> {
        let stored = self.inner.store(title, original_name, bytes).await?;
        let hook = self.after_store.lock().expect("hook lock poisoned").take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(stored)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.inner.read(path).await
    }

    async fn is_file(&self, path: &str) -> bool {
        self.inner.is_file(path).await
    }

    async fn remove(&self, path: &str) -> Result<bool> {
        if self.fail_removals.load(Ordering::SeqCst) {
            bail!("simulated removal failure for {path}");
        }
        self.inner.remove(path).await
    }

    async fn list(&self) -> Result<Vec<String>> {
        self.inner.list().await
    }
}

/// A file part of a multipart form: (file name, content type, bytes).
pub type FilePart<'a> = (&'a str, &'a str, &'a [u8]);

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FlakyStorage>,
    _upload_root: TempDir,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;
        let upload_root = tempfile::tempdir().context("failed to create upload directory")?;

        let config = AppConfig {
            environment: "test".to_string(),
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            route_prefix: "api".to_string(),
            database_url,
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            database_retry: RetryPolicy {
                attempts: 1,
                delay: Duration::ZERO,
            },
            upload_dir: upload_root.path().join("uploads"),
            cors_allowed_origin: None,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FlakyStorage::new(LocalFileStorage::new(
            config.upload_dir.clone(),
        )));
        let storage_for_state: Arc<dyn FileStorage> = storage.clone();
        let state = AppState::new(pool, config, storage_for_state);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            storage,
            _upload_root: upload_root,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FlakyStorage> {
        self.storage.clone()
    }

    /// Files currently present in the upload directory.
    #[allow(dead_code)]
    pub fn uploaded_files(&self) -> Result<Vec<PathBuf>> {
        let dir = &self.state.config.upload_dir;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    pub async fn get(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::DELETE)
            .uri(path)
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn post_json(
        &self,
        path: &str,
        payload: &serde_json::Value,
    ) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(payload)?))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn post_form(
        &self,
        path: &str,
        title: Option<&str>,
        file: Option<FilePart<'_>>,
    ) -> Result<hyper::Response<Body>> {
        self.send_form(Method::POST, path, title, file).await
    }

    #[allow(dead_code)]
    pub async fn put_form(
        &self,
        path: &str,
        title: Option<&str>,
        file: Option<FilePart<'_>>,
    ) -> Result<hyper::Response<Body>> {
        self.send_form(Method::PUT, path, title, file).await
    }

    async fn send_form(
        &self,
        method: Method,
        path: &str,
        title: Option<&str>,
        file: Option<FilePart<'_>>,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();

        if let Some(title) = title {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(b"Content-Disposition: form-data; name=\"title\"\r\n\r\n");
            body.extend(title.as_bytes());
            body.extend(b"\r\n");
        }

        if let Some((filename, content_type, data)) = file {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!(
                    "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                    filename
                )
                .as_bytes(),
            );
            body.extend(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
            body.extend(data);
            body.extend(b"\r\n");
        }

        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn body_to_json(body: Body) -> Result<serde_json::Value> {
    let bytes = body_to_vec(body).await?;
    serde_json::from_slice(&bytes).context("response body is not JSON")
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        db::run_migrations(&pool)?;
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute("TRUNCATE TABLE \"document\" RESTART IDENTITY;")
        .context("failed to truncate tables")?;
    Ok(())
}
