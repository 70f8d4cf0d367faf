// Work Source & Result Ledger Ports
// Boundary to the catalog store

use crate::domain::{ImageResultRecord, WorkItem};
use crate::error::Result;
use async_trait::async_trait;

/// Row selection for the producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkFilter {
    /// Also return image references that already have a recorded result
    pub include_processed: bool,
}

impl WorkFilter {
    pub fn pending_only() -> Self {
        Self {
            include_processed: false,
        }
    }

    pub fn all() -> Self {
        Self {
            include_processed: true,
        }
    }
}

/// Catalog rows with a non-null image reference
#[async_trait]
pub trait WorkSource: Send + Sync {
    /// One item per image reference, ordered by product id then position
    async fn query(&self, filter: WorkFilter) -> Result<Vec<WorkItem>>;
}

/// Completion markers for processed image references
#[async_trait]
pub trait ResultLedger: Send + Sync {
    /// Insert or replace the record for (product_id, image_url)
    async fn record(&self, record: &ImageResultRecord) -> Result<()>;

    /// Find the record for one image reference
    async fn find(&self, product_id: i64, image_url: &str) -> Result<Option<ImageResultRecord>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// In-memory catalog implementing both ports
    #[derive(Default)]
    pub struct InMemoryCatalog {
        items: Mutex<Vec<WorkItem>>,
        records: Mutex<Vec<ImageResultRecord>>,
        failing: AtomicBool,
    }

    impl InMemoryCatalog {
        pub fn new(items: Vec<WorkItem>) -> Self {
            Self {
                items: Mutex::new(items),
                ..Default::default()
            }
        }

        /// Make subsequent queries fail
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn records(&self) -> Vec<ImageResultRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WorkSource for InMemoryCatalog {
        async fn query(&self, filter: WorkFilter) -> Result<Vec<WorkItem>> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(AppError::Query("catalog unavailable".to_string()));
            }

            let records = self.records.lock().unwrap();
            let mut items: Vec<WorkItem> = self
                .items
                .lock()
                .unwrap()
                .iter()
                .filter(|item| {
                    filter.include_processed
                        || !records
                            .iter()
                            .any(|r| r.product_id == item.id && r.image_url == item.image_url)
                })
                .cloned()
                .collect();
            items.sort_by_key(|item| item.id);
            Ok(items)
        }
    }

    #[async_trait]
    impl ResultLedger for InMemoryCatalog {
        async fn record(&self, record: &ImageResultRecord) -> Result<()> {
            let mut records = self.records.lock().unwrap();
            records.retain(|r| {
                !(r.product_id == record.product_id && r.image_url == record.image_url)
            });
            records.push(record.clone());
            Ok(())
        }

        async fn find(
            &self,
            product_id: i64,
            image_url: &str,
        ) -> Result<Option<ImageResultRecord>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.product_id == product_id && r.image_url == image_url)
                .cloned())
        }
    }
}
