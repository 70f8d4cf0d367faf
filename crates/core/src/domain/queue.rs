// Queue Domain Model

/// Name shared by producer and consumers; stable across deployments.
pub const IMAGE_PROCESSING_QUEUE: &str = "image_processing_queue";

/// Declaration parameters of a broker queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl QueueSpec {
    /// Durable, shared, never auto-deleted queue.
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }

    /// Re-declaring a queue only succeeds when all flags match.
    pub fn is_compatible_with(&self, other: &QueueSpec) -> bool {
        self.name == other.name
            && self.durable == other.durable
            && self.exclusive == other.exclusive
            && self.auto_delete == other.auto_delete
    }
}

impl Default for QueueSpec {
    fn default() -> Self {
        Self::durable(IMAGE_PROCESSING_QUEUE)
    }
}
