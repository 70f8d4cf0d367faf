//! Shared fixtures for pipeline integration tests

#![allow(dead_code)]

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use imgpipe_core::application::{PipelineContext, StatsSnapshot, WorkerPoolHandle, WorkerStats};
use imgpipe_core::port::id_provider::UuidProvider;
use imgpipe_core::port::time_provider::SystemTimeProvider;
use imgpipe_core::port::{ImageTranscoder, ResultSink};
use imgpipe_infra_sqlite::{create_pool, run_migrations, NewProduct, SqliteCatalog};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const QUEUE: &str = "image_processing_queue";

/// File-backed catalog so several workers can write results concurrently
pub async fn catalog(dir: &Path) -> Arc<SqliteCatalog> {
    let url = format!("sqlite://{}", dir.join("catalog.db").display());
    let pool = create_pool(&url, 4).await.unwrap();
    run_migrations(&pool).await.unwrap();
    Arc::new(SqliteCatalog::new(pool))
}

pub async fn seed(catalog: &SqliteCatalog, id: i64, images: &[&str]) {
    catalog
        .insert_product(
            &NewProduct::new(id, format!("product {}", id)).with_images(images.iter().copied()),
        )
        .await
        .unwrap();
}

pub fn context(
    transcoder: Arc<dyn ImageTranscoder>,
    sink: Arc<dyn ResultSink>,
    catalog: Arc<SqliteCatalog>,
) -> PipelineContext {
    PipelineContext {
        transcoder,
        sink,
        ledger: catalog,
        time_provider: Arc::new(SystemTimeProvider),
        id_provider: Arc::new(UuidProvider),
        stats: Arc::new(WorkerStats::new()),
    }
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

/// Poll the pool stats until `done` holds, panicking after `timeout`
pub async fn wait_for(
    handle: &WorkerPoolHandle,
    timeout: Duration,
    done: impl Fn(&StatsSnapshot) -> bool,
) -> StatsSnapshot {
    tokio::time::timeout(timeout, async {
        loop {
            let stats = handle.stats();
            if done(&stats) {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out, stats: {:?}", handle.stats()))
}

/// Regular files in `dir`, excluding the catalog database
pub fn written_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| name.ends_with(".jpg"))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
