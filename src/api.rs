use std::sync::atomic::Ordering;

use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use anyhow::Result;
use serde_json::json;
use tracing::{error, info, warn};

use crate::{
    app_state::AppState,
    config::MAX_BATCH_FILES,
    models::{MetricsSnapshot, QueryRequest, QueryResponse, UploadDetail},
    poller::{self, BatchSnapshot, TrackedJob},
};

/// Límite del cuerpo de las subidas (los planos en PDF pueden ser grandes).
const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/upload", post(upload_handler))
        .route("/api/upload-multiple", post(upload_multiple_handler))
        .route("/api/batch-status", get(batch_status_handler))
        .route("/api/query", post(query_handler))
        .route("/api/metrics", get(metrics_handler))
        .route("/api/health", get(health_handler))
        .route("/api/document/:doc_id", delete(delete_document_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(app_state)
}

// --- Validaciones (antes de tocar la red) ---

/// Valida el tamaño de un lote. Se rechaza aquí, sin hacer ninguna
/// petición al backend.
fn check_batch_size(count: usize) -> Result<(), String> {
    if count == 0 {
        return Err("No se ha incluido ningún fichero en la subida.".to_string());
    }
    if count > MAX_BATCH_FILES {
        return Err(format!(
            "Un lote admite como máximo {MAX_BATCH_FILES} ficheros (recibidos: {count})."
        ));
    }
    Ok(())
}

fn check_question(question: &str) -> Result<(), String> {
    if question.trim().is_empty() {
        return Err("La pregunta no puede estar vacía.".to_string());
    }
    Ok(())
}

// --- Seguimiento de lotes ---

/// Construye las entradas de seguimiento a partir de la respuesta de subida
/// múltiple: las entradas que el backend rechazó nacen ya en estado fallido.
fn batch_from_details(details: &[UploadDetail]) -> Vec<TrackedJob> {
    details
        .iter()
        .map(|d| match &d.job_id {
            Some(job_id) => {
                let mut job = TrackedJob::new(&d.filename, job_id.clone());
                job.doc_id = d.doc_id.clone();
                job
            }
            None => TrackedJob::failed_on_submit(
                &d.filename,
                d.error
                    .clone()
                    .unwrap_or_else(|| "El backend rechazó el fichero.".to_string()),
            ),
        })
        .collect()
}

/// Arranca el sondeo de un lote en segundo plano. Un lote nuevo toma una
/// generación superior; cuando el bucle anterior detecta que su generación
/// ya no es la activa, deja caer la instantánea y se corta: su ronda en
/// vuelo termina sola y no lanza ninguna petición más.
fn start_batch_poll(state: &AppState, files: Vec<TrackedJob>) {
    let generation = state.batch_seq.fetch_add(1, Ordering::SeqCst) + 1;
    let backend = state.backend.clone();
    let shared = state.batch.clone();
    let seq = state.batch_seq.clone();
    let cfg = state.config.poll.clone();

    tokio::spawn(async move {
        let mut apply = |snapshot: BatchSnapshot| {
            let alive = seq.load(Ordering::SeqCst) == generation;
            if alive {
                *shared.lock().unwrap() = Some(snapshot);
            }
            alive
        };
        let final_snapshot =
            poller::poll_batch(backend.as_ref(), &cfg, generation, files, &mut apply).await;
        apply(final_snapshot);
    });
}

// --- Handlers ---

#[axum::debug_handler]
async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let file = read_one_file(&mut multipart, "file").await.map_err(bad_request)?;
    let Some((filename, bytes)) = file else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "No se ha incluido el campo 'file' en la subida."})),
        ));
    };

    let response = state
        .backend
        .upload(&filename, bytes)
        .await
        .map_err(bad_gateway)?;

    info!("📤 Subido '{}' -> job {}", response.filename, response.job_id);

    // La subida simple sigue el mismo camino de sondeo con un lote de uno.
    let mut job = TrackedJob::new(&response.filename, response.job_id.clone());
    job.doc_id = Some(response.doc_id.clone());
    start_batch_poll(&state, vec![job]);

    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[axum::debug_handler]
async fn upload_multiple_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let files = read_files(&mut multipart, "files").await.map_err(bad_request)?;

    if let Err(msg) = check_batch_size(files.len()) {
        return Err((StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))));
    }

    let response = state
        .backend
        .upload_multiple(files)
        .await
        .map_err(bad_gateway)?;

    info!(
        "📤 Lote subido: {} ficheros, {} encolados, {} rechazados.",
        response.total_files, response.successful, response.failed
    );

    start_batch_poll(&state, batch_from_details(&response.details));

    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[axum::debug_handler]
async fn batch_status_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let guard = state.batch.lock().unwrap();
    match guard.as_ref() {
        Some(snapshot) => Json(json!({
            "active": true,
            "progress": snapshot.progress(),
            "batch": snapshot,
        })),
        None => Json(json!({ "active": false })),
    }
}

#[axum::debug_handler]
async fn query_handler(
    State(state): State<AppState>,
    Json(payload): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, (StatusCode, Json<serde_json::Value>)> {
    if let Err(msg) = check_question(&payload.question) {
        return Err((StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))));
    }

    info!("🔍 Consulta: {}", payload.question);

    let response = state.backend.query(&payload).await.map_err(bad_gateway)?;
    Ok(Json(response))
}

#[axum::debug_handler]
async fn metrics_handler(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    // El panel refresca las métricas en intervalo fijo; si el backend no
    // responde se devuelven ceros, como hace el propio backend.
    match state.backend.metrics().await {
        Ok(snapshot) => Json(snapshot),
        Err(e) => {
            warn!("No se pudieron obtener las métricas del backend: {e}");
            Json(MetricsSnapshot::default())
        }
    }
}

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.backend.health().await {
        Ok(payload) => Json(json!({ "status": "ok", "backend": payload })),
        Err(e) => {
            error!("El backend no responde al health check: {e}");
            Json(json!({ "status": "degraded", "error": e.to_string() }))
        }
    }
}

#[axum::debug_handler]
async fn delete_document_handler(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let response = state
        .backend
        .delete_document(&doc_id)
        .await
        .map_err(bad_gateway)?;
    info!("🗑️ Documento eliminado: {}", response.doc_id);
    Ok(Json(response))
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}

// --- Utilidades ---

/// Lee el primer campo con el nombre dado y deja de leer: la subida simple
/// lleva exactamente un fichero y cualquier campo extra se ignora.
async fn read_one_file(
    multipart: &mut Multipart,
    field_name: &str,
) -> Result<Option<(String, Vec<u8>)>> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(field_name) {
            continue;
        }
        let filename = field
            .file_name()
            .unwrap_or("documento.pdf")
            .to_string();
        let bytes = field.bytes().await?.to_vec();
        return Ok(Some((filename, bytes)));
    }
    Ok(None)
}

/// Lee del multipart todos los campos con el nombre dado, como pares
/// (nombre de fichero, contenido).
async fn read_files(multipart: &mut Multipart, field_name: &str) -> Result<Vec<(String, Vec<u8>)>> {
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(field_name) {
            continue;
        }
        let filename = field
            .file_name()
            .unwrap_or("documento.pdf")
            .to_string();
        let bytes = field.bytes().await?.to_vec();
        files.push((filename, bytes));
    }
    Ok(files)
}

fn bad_request(err: anyhow::Error) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() })))
}

fn bad_gateway(err: anyhow::Error) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::BAD_GATEWAY, Json(json!({ "error": err.to_string() })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::FileState;
    use axum::body::Body;
    use axum::extract::FromRequest;
    use axum::http::Request;

    fn multipart_request(boundary: &str, parts: &[(&str, &str, &str)]) -> Request<Body> {
        let mut body = String::new();
        for (name, filename, content) in parts {
            body.push_str(&format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"; \
                 filename=\"{filename}\"\r\nContent-Type: application/pdf\r\n\r\n{content}\r\n"
            ));
        }
        body.push_str(&format!("--{boundary}--\r\n"));
        Request::builder()
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[test]
    fn un_lote_de_veintiuno_se_rechaza() {
        assert!(check_batch_size(21).is_err());
        assert!(check_batch_size(MAX_BATCH_FILES).is_ok());
        assert!(check_batch_size(1).is_ok());
        assert!(check_batch_size(0).is_err());
    }

    #[test]
    fn una_pregunta_en_blanco_se_rechaza() {
        assert!(check_question("").is_err());
        assert!(check_question("   \n\t ").is_err());
        assert!(check_question("¿Qué hormigón pide el pliego?").is_ok());
    }

    #[test]
    fn cada_detalle_produce_una_entrada_con_su_nombre() {
        let details: Vec<UploadDetail> = (1..=5)
            .map(|i| UploadDetail {
                filename: format!("plano-{i}.pdf"),
                status: "queued".to_string(),
                doc_id: Some(format!("doc-{i}")),
                job_id: Some(format!("job-{i}")),
                error: None,
            })
            .collect();

        let jobs = batch_from_details(&details);
        assert_eq!(jobs.len(), 5);
        for (i, job) in jobs.iter().enumerate() {
            assert_eq!(job.filename, format!("plano-{}.pdf", i + 1));
            assert_eq!(job.state, FileState::Queued);
            assert_eq!(job.job_id.as_deref(), Some(format!("job-{}", i + 1).as_str()));
        }
    }

    #[tokio::test]
    async fn la_subida_simple_toma_solo_el_primer_fichero() {
        let req = multipart_request(
            "X",
            &[("file", "memoria.pdf", "AAA"), ("file", "pliego.pdf", "BBB")],
        );
        let mut multipart = Multipart::from_request(req, &()).await.unwrap();

        let file = read_one_file(&mut multipart, "file").await.unwrap();
        let (filename, bytes) = file.expect("debe haber un fichero");
        assert_eq!(filename, "memoria.pdf");
        assert_eq!(bytes, b"AAA".to_vec());
    }

    #[tokio::test]
    async fn la_subida_multiple_lee_todos_los_campos_files() {
        let req = multipart_request(
            "X",
            &[
                ("files", "memoria.pdf", "AAA"),
                ("files", "pliego.pdf", "BBB"),
                ("otro", "extra.pdf", "CCC"),
            ],
        );
        let mut multipart = Multipart::from_request(req, &()).await.unwrap();

        let files = read_files(&mut multipart, "files").await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].0, "memoria.pdf");
        assert_eq!(files[1].0, "pliego.pdf");
    }

    #[test]
    fn un_detalle_rechazado_nace_fallido_con_su_mensaje() {
        let details = vec![
            UploadDetail {
                filename: "memoria.pdf".to_string(),
                status: "queued".to_string(),
                doc_id: Some("doc-1".to_string()),
                job_id: Some("job-1".to_string()),
                error: None,
            },
            UploadDetail {
                filename: "plano.dwg".to_string(),
                status: "error".to_string(),
                doc_id: None,
                job_id: None,
                error: Some("Only PDF files supported".to_string()),
            },
        ];

        let jobs = batch_from_details(&details);
        assert_eq!(jobs[0].state, FileState::Queued);
        assert_eq!(jobs[1].state, FileState::Failed);
        assert_eq!(jobs[1].error.as_deref(), Some("Only PDF files supported"));
        assert!(jobs[1].job_id.is_none());
    }
}
