use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use crate::{backend::BackendClient, config::AppConfig, poller::BatchSnapshot};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub backend: Arc<BackendClient>,
    /// Instantánea del lote de subida activo. Solo el sondeador la escribe;
    /// el frontend la lee tal cual desde `/api/batch-status`.
    pub batch: Arc<Mutex<Option<BatchSnapshot>>>,
    /// Generación del lote activo. Un lote nuevo la incrementa y las
    /// instantáneas de generaciones anteriores se descartan al llegar.
    pub batch_seq: Arc<AtomicU64>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}
