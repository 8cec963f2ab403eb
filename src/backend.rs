//! Cliente HTTP hacia el backend Construction GraphRAG.
//!
//! El backend (ingesta, embeddings, grafo Neo4j, cola Redis/RQ) es un
//! colaborador externo y posiblemente lento: solo se le alcanza por su
//! contrato REST y el estado de sus jobs se consulta sondeando.

use anyhow::{anyhow, Result};
use mime_guess::MimeGuess;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;

use crate::models::{
    DeleteResponse, JobStatusResponse, MetricsSnapshot, MultipleUploadResponse, QueryRequest,
    QueryResponse, UploadResponse,
};
use crate::poller::JobStatusSource;

pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// GET /health — sonda de vida del backend.
    pub async fn health(&self) -> Result<serde_json::Value> {
        let resp = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        parse_json(resp).await
    }

    /// GET /metrics — métricas agregadas. Los campos ausentes quedan a cero.
    pub async fn metrics(&self) -> Result<MetricsSnapshot> {
        let resp = self
            .client
            .get(format!("{}/metrics", self.base_url))
            .send()
            .await?;
        parse_json(resp).await
    }

    /// POST /upload — sube un único documento (campo multipart `file`).
    pub async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<UploadResponse> {
        let form = Form::new().part("file", file_part(filename, bytes)?);
        let resp = self
            .client
            .post(format!("{}/upload", self.base_url))
            .multipart(form)
            .send()
            .await?;
        parse_json(resp).await
    }

    /// POST /upload-multiple — sube un lote (campo multipart repetido `files`).
    /// El tamaño del lote se valida antes de llamar aquí.
    pub async fn upload_multiple(
        &self,
        files: Vec<(String, Vec<u8>)>,
    ) -> Result<MultipleUploadResponse> {
        let mut form = Form::new();
        for (filename, bytes) in files {
            form = form.part("files", file_part(&filename, bytes)?);
        }
        let resp = self
            .client
            .post(format!("{}/upload-multiple", self.base_url))
            .multipart(form)
            .send()
            .await?;
        parse_json(resp).await
    }

    /// POST /query — consulta RAG sobre los documentos ya ingeridos.
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let resp = self
            .client
            .post(format!("{}/query", self.base_url))
            .json(request)
            .send()
            .await?;
        parse_json(resp).await
    }

    /// DELETE /document/{doc_id} — elimina un documento del índice y del grafo.
    pub async fn delete_document(&self, doc_id: &str) -> Result<DeleteResponse> {
        let resp = self
            .client
            .delete(format!("{}/document/{}", self.base_url, doc_id))
            .send()
            .await?;
        parse_json(resp).await
    }
}

impl JobStatusSource for BackendClient {
    /// GET /job/{job_id} — estado actual de un job de ingesta.
    fn job_status(
        &self,
        job_id: &str,
    ) -> impl std::future::Future<Output = Result<JobStatusResponse>> + Send {
        async move {
            let resp = self
                .client
                .get(format!("{}/job/{}", self.base_url, job_id))
                .send()
                .await?;
            parse_json(resp).await
        }
    }
}

/// Parsea una respuesta del backend. Para las no-2xx se devuelve el mensaje
/// que el servidor incluya (`detail` o `error`) y, si no hay, uno genérico
/// con el código de estado.
async fn parse_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(anyhow!(server_error_message(status.as_u16(), &body)));
    }
    resp.json::<T>()
        .await
        .map_err(|e| anyhow!("Respuesta del backend no válida: {e}"))
}

fn server_error_message(status: u16, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["detail", "error"] {
            if let Some(msg) = value.get(key).and_then(|v| v.as_str()) {
                return msg.to_string();
            }
        }
    }
    format!("El backend respondió con HTTP {status}")
}

fn file_part(filename: &str, bytes: Vec<u8>) -> Result<Part> {
    let mime = MimeGuess::from_path(filename).first_or_octet_stream();
    Part::bytes(bytes)
        .file_name(filename.to_string())
        .mime_str(mime.as_ref())
        .map_err(|e| anyhow!("Tipo MIME no válido para '{filename}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mensaje_de_error_con_detail_del_servidor() {
        let msg = server_error_message(400, r#"{"detail": "Only PDF files supported"}"#);
        assert_eq!(msg, "Only PDF files supported");
    }

    #[test]
    fn mensaje_de_error_con_campo_error() {
        let msg = server_error_message(500, r#"{"error": "Neo4j no disponible"}"#);
        assert_eq!(msg, "Neo4j no disponible");
    }

    #[test]
    fn mensaje_generico_si_el_cuerpo_no_es_json() {
        let msg = server_error_message(502, "<html>Bad Gateway</html>");
        assert_eq!(msg, "El backend respondió con HTTP 502");
    }

    #[test]
    fn mensaje_generico_si_el_json_no_trae_mensaje() {
        let msg = server_error_message(404, r#"{"otra_cosa": 1}"#);
        assert_eq!(msg, "El backend respondió con HTTP 404");
    }
}
