//! Modelos del contrato REST con el backend Construction GraphRAG.
//!
//! El backend es el dueño de estos datos; aquí solo se reflejan. Los campos
//! que puedan faltar en la respuesta se rellenan con valores por defecto
//! para no romper el panel por una versión distinta del backend.

use serde::{Deserialize, Serialize};

/// Estado de un job tal y como lo reporta `GET /job/{id}`.
///
/// La cola (RQ) puede reportar estados que no conocemos (`deferred`,
/// `scheduled`...); caen en `Other` y el sondeador los trata como
/// desconocidos en esa ronda.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatusKind {
    Queued,
    Started,
    Finished,
    Failed,
    #[serde(other)]
    Other,
}

/// Respuesta de `GET /job/{job_id}`. El backend es la fuente de verdad:
/// el cliente nunca la muta, solo la refresca sondeando.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    #[serde(default)]
    pub job_id: String,
    pub status: JobStatusKind,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Respuesta de `POST /upload` (subida de un único documento).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: String,
    pub doc_id: String,
    pub filename: String,
    pub job_id: String,
    #[serde(default)]
    pub message: String,
}

/// Resultado por fichero dentro de una subida múltiple. Un fichero que el
/// backend rechaza en la propia subida trae `error` y no trae `job_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadDetail {
    pub filename: String,
    pub status: String,
    #[serde(default)]
    pub doc_id: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Respuesta de `POST /upload-multiple`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipleUploadResponse {
    pub total_files: usize,
    pub successful: usize,
    pub failed: usize,
    pub details: Vec<UploadDetail>,
    pub job_ids: Vec<String>,
}

/// Petición de `POST /query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<serde_json::Value>,
}

fn default_max_results() -> u32 {
    10
}

/// Cita de una fuente usada para responder una consulta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    #[serde(default)]
    pub doc_id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub is_diagram: bool,
    #[serde(default)]
    pub section: String,
}

/// Nodo del subgrafo que acompaña (opcionalmente) a una respuesta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub properties: serde_json::Value,
}

/// Arista del subgrafo de la respuesta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub rel_type: String,
}

/// Respuesta de `POST /query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    #[serde(default)]
    pub query_type: String,
    #[serde(default)]
    pub execution_time_ms: f64,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    #[serde(default)]
    pub graph_facts: Option<u64>,
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

/// Respuesta de `GET /metrics`. Todos los campos quedan a cero si el
/// backend no los incluye.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub total_uploads: u64,
    pub total_queries: u64,
    pub total_documents: u64,
    pub total_nodes: u64,
    pub total_relationships: u64,
    pub queue_size: u64,
    pub vectors: u64,
    pub avg_query_time_ms: f64,
    pub ingestion_rate_docs_per_min: f64,
    pub accuracy_score: f64,
}

/// Respuesta de `DELETE /document/{doc_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub status: String,
    pub doc_id: String,
}
