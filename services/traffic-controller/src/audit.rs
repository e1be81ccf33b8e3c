//! Fire-and-forget audit trail

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::warn;

use crate::{models::AuditRecord, repositories::AuditSink};

/// Writes audit records off the request path
#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Spawn the write; a failure is logged and dropped
    pub fn record(&self, record: AuditRecord) -> JoinHandle<()> {
        let sink = self.sink.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.append(&record).await {
                warn!("Failed to write audit record for {}: {}", record.phone, e);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::MemoryAuditSink;
    use chrono::Utc;

    fn record() -> AuditRecord {
        AuditRecord {
            phone: "+905321234567".to_string(),
            source: "whatsapp".to_string(),
            message: "merhaba".to_string(),
            response_status: 200,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_record_is_written() {
        let sink = MemoryAuditSink::new();
        let logger = AuditLogger::new(Arc::new(sink.clone()));

        logger.record(record()).await.unwrap();
        assert_eq!(sink.records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_does_not_panic_task() {
        let sink = MemoryAuditSink::new();
        sink.set_failing(true);
        let logger = AuditLogger::new(Arc::new(sink.clone()));

        assert!(logger.record(record()).await.is_ok());
        assert!(sink.records().await.is_empty());
    }
}
