//! Sondeo de los jobs de ingesta del backend (el núcleo del panel).
//!
//! Tras una subida, el backend devuelve uno o varios `job_id` y procesa los
//! documentos en segundo plano. Este módulo sondea `GET /job/{id}` por
//! rondas hasta que todos los jobs del lote alcanzan un estado terminal,
//! publicando tras cada ronda una instantánea agregada que el frontend lee.
//!
//! Reglas del bucle:
//!   1. Una ronda lanza en paralelo una consulta por job activo y espera a
//!      que todas resuelvan (join-all). Las rondas entre sí son secuenciales.
//!   2. `complete` y `failed` son terminales: ese job no se vuelve a sondear.
//!   3. Un fallo transitorio de la propia consulta no cambia el estado del
//!      job; se reintenta en la ronda siguiente.
//!   4. El bucle está acotado: agotadas `max_rounds` rondas se emite un
//!      resultado "tardando más de lo esperado" en vez de sondear sin fin.

use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PollConfig;
use crate::models::{JobStatusKind, JobStatusResponse};

/// Estado visible de un fichero dentro de un lote de subida.
///
/// `queued` es el estado inmediatamente posterior a la subida, antes de
/// observar la primera respuesta de estado; pasa a `processing` (o
/// directamente a un terminal) con la primera consulta que resuelve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Queued,
    Processing,
    Complete,
    Failed,
}

impl FileState {
    pub fn is_terminal(self) -> bool {
        matches!(self, FileState::Complete | FileState::Failed)
    }
}

/// Un job de ingesta en seguimiento, etiquetado con el fichero que lo originó.
#[derive(Debug, Clone, Serialize)]
pub struct TrackedJob {
    pub filename: String,
    pub job_id: Option<String>,
    pub doc_id: Option<String>,
    pub state: FileState,
    pub error: Option<String>,
}

impl TrackedJob {
    pub fn new(filename: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            job_id: Some(job_id.into()),
            doc_id: None,
            state: FileState::Queued,
            error: None,
        }
    }

    /// Entrada que el backend ya rechazó en la propia subida: nace terminal
    /// y nunca se sondea.
    pub fn failed_on_submit(filename: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            job_id: None,
            doc_id: None,
            state: FileState::Failed,
            error: Some(error.into()),
        }
    }
}

/// Resultado final del sondeo de un lote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Todos los jobs alcanzaron un estado terminal.
    Finished,
    /// Rondas agotadas con jobs aún en proceso: el backend sigue
    /// trabajando, solo que está tardando más de lo esperado. No es un fallo.
    TimedOut,
    /// Un lote más nuevo sustituyó a este: el sondeo se corta en cuanto se
    /// detecta y el resultado se descarta.
    Superseded,
}

/// Instantánea agregada de un lote. Se publica una inicial (todo `queued`),
/// otra tras cada ronda y una final con `outcome`.
///
/// Invariante: `completed + failed + still_processing == total`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSnapshot {
    pub batch_id: u64,
    pub files: Vec<TrackedJob>,
    pub completed: usize,
    pub failed: usize,
    pub still_processing: usize,
    pub total: usize,
    pub round: u32,
    /// Momento en que arrancó el sondeo del lote.
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: u64,
    pub outcome: Option<BatchOutcome>,
}

/// Reloj del lote: instante monótono para medir y marca absoluta para mostrar.
#[derive(Clone, Copy)]
struct BatchClock {
    started: Instant,
    started_at: DateTime<Utc>,
}

impl BatchClock {
    fn now() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

impl BatchSnapshot {
    fn build(
        batch_id: u64,
        files: &[TrackedJob],
        round: u32,
        clock: BatchClock,
        outcome: Option<BatchOutcome>,
    ) -> Self {
        let completed = files.iter().filter(|f| f.state == FileState::Complete).count();
        let failed = files.iter().filter(|f| f.state == FileState::Failed).count();
        let total = files.len();
        Self {
            batch_id,
            files: files.to_vec(),
            completed,
            failed,
            still_processing: total - completed - failed,
            total,
            round,
            started_at: clock.started_at,
            // Tiempo de reloj real, no `ronda × intervalo`: con retardos
            // transitorios el contador de rondas se desvía del tiempo real.
            elapsed_secs: clock.started.elapsed().as_secs(),
            outcome,
        }
    }

    /// Fracción de jobs completados con éxito, para la barra de progreso.
    pub fn progress(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed as f32 / self.total as f32
    }
}

/// Fuente del estado de un job. `BackendClient` la implementa contra
/// `GET /job/{id}`; los tests la implementan con secuencias predefinidas.
pub trait JobStatusSource {
    fn job_status(&self, job_id: &str) -> impl Future<Output = Result<JobStatusResponse>> + Send;
}

/// Sondea un lote hasta que todos sus jobs son terminales o se agotan las
/// rondas. Emite instantáneas intermedias por `on_round` y devuelve la
/// instantánea final (la única con `outcome`) exactamente una vez; a partir
/// de ahí no se hace ninguna petición más para este lote.
///
/// `on_round` devuelve si el lote sigue siendo el activo. Si devuelve
/// `false` (otro lote lo sustituyó), la ronda en vuelo ya terminó y no se
/// lanza ninguna más: el bucle se corta con `Superseded`.
///
/// La subida simple reutiliza este mismo camino con un lote de tamaño uno.
pub async fn poll_batch<S, F>(
    source: &S,
    cfg: &PollConfig,
    batch_id: u64,
    mut files: Vec<TrackedJob>,
    mut on_round: F,
) -> BatchSnapshot
where
    S: JobStatusSource,
    F: FnMut(BatchSnapshot) -> bool,
{
    let clock = BatchClock::now();
    if !on_round(BatchSnapshot::build(batch_id, &files, 0, clock, None)) {
        return BatchSnapshot::build(batch_id, &files, 0, clock, Some(BatchOutcome::Superseded));
    }

    if files.iter().all(|f| f.state.is_terminal()) {
        // El backend rechazó el lote completo en la subida: nada que sondear.
        return BatchSnapshot::build(batch_id, &files, 0, clock, Some(BatchOutcome::Finished));
    }

    tokio::time::sleep(Duration::from_millis(cfg.initial_delay_ms)).await;

    for round in 1..=cfg.max_rounds {
        run_round(source, &mut files, round).await;

        if files.iter().all(|f| f.state.is_terminal()) {
            let snapshot =
                BatchSnapshot::build(batch_id, &files, round, clock, Some(BatchOutcome::Finished));
            info!(
                "Lote {} terminado en la ronda {}: {} completados, {} fallidos.",
                batch_id, round, snapshot.completed, snapshot.failed
            );
            return snapshot;
        }

        if round == cfg.max_rounds {
            break;
        }

        if !on_round(BatchSnapshot::build(batch_id, &files, round, clock, None)) {
            info!(
                "Lote {} sustituido por otro más nuevo; se corta el sondeo en la ronda {}.",
                batch_id, round
            );
            return BatchSnapshot::build(batch_id, &files, round, clock, Some(BatchOutcome::Superseded));
        }
        tokio::time::sleep(Duration::from_millis(cfg.interval_ms)).await;
    }

    let snapshot = BatchSnapshot::build(
        batch_id,
        &files,
        cfg.max_rounds,
        clock,
        Some(BatchOutcome::TimedOut),
    );
    warn!(
        "Lote {}: agotadas {} rondas con {} jobs aún en proceso; el backend sigue trabajando.",
        batch_id, cfg.max_rounds, snapshot.still_processing
    );
    snapshot
}

/// Una ronda: una consulta en paralelo por cada job activo. La ronda se da
/// por cerrada cuando todas han resuelto, con éxito o con error transitorio.
async fn run_round<S: JobStatusSource>(source: &S, files: &mut [TrackedJob], round: u32) {
    let active: Vec<(usize, String)> = files
        .iter()
        .enumerate()
        .filter_map(|(idx, f)| match &f.job_id {
            Some(id) if !f.state.is_terminal() => Some((idx, id.clone())),
            _ => None,
        })
        .collect();

    let results = join_all(active.iter().map(|(_, id)| source.job_status(id))).await;

    for ((idx, _), result) in active.iter().zip(results) {
        let file = &mut files[*idx];
        match result {
            Ok(status) => apply_status(file, &status),
            Err(err) => {
                // Fallo transitorio del sondeo, no del job: conserva su
                // último estado conocido y se reintenta en la próxima ronda.
                warn!(
                    "Ronda {}: no se pudo consultar el job de '{}': {err}",
                    round, file.filename
                );
            }
        }
    }
}

/// Traduce el estado reportado por el backend al estado visible del fichero.
fn apply_status(file: &mut TrackedJob, status: &JobStatusResponse) {
    match status.status {
        JobStatusKind::Finished => {
            file.state = FileState::Complete;
        }
        JobStatusKind::Failed => {
            file.state = FileState::Failed;
            file.error = Some(
                status
                    .error
                    .clone()
                    .unwrap_or_else(|| "El procesamiento del documento falló.".to_string()),
            );
        }
        JobStatusKind::Queued | JobStatusKind::Started => {
            file.state = FileState::Processing;
        }
        // Estado que no conocemos: desconocido en esta ronda, se reintenta.
        JobStatusKind::Other => {}
    }
}
