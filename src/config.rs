//! Carga y gestión de configuración de la aplicación (backend GraphRAG + sondeo).

use std::env;
use std::str::FromStr;
use anyhow::{anyhow, Result};
use url::Url;

/// Número máximo de ficheros admitidos en un lote de subida.
pub const MAX_BATCH_FILES: usize = 20;

/// Parámetros del bucle de sondeo de jobs.
///
/// El sondeo está acotado a propósito: `max_rounds` rondas separadas por
/// `interval_ms`, tras un retardo inicial de `initial_delay_ms`. Un bucle
/// sin cota contra un backend colgado es un peligro de recursos.
#[derive(Clone, Debug)]
pub struct PollConfig {
    pub initial_delay_ms: u64,
    pub interval_ms: u64,
    pub max_rounds: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 2000,
            interval_ms: 3000,
            max_rounds: 60,
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub backend_url: String,
    pub server_addr: String,
    pub poll: PollConfig,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let backend_url = env::var("BACKEND_URL")
            .map_err(|_| anyhow!("Falta BACKEND_URL en el entorno"))?;
        Url::parse(&backend_url)
            .map_err(|e| anyhow!("BACKEND_URL no es una URL válida: {e}"))?;

        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3323".to_string());

        let defaults = PollConfig::default();
        let poll = PollConfig {
            initial_delay_ms: env_number("POLL_INITIAL_DELAY_MS", defaults.initial_delay_ms)?,
            interval_ms: env_number("POLL_INTERVAL_MS", defaults.interval_ms)?,
            max_rounds: env_number("POLL_MAX_ROUNDS", defaults.max_rounds)?,
        };

        Ok(Self {
            backend_url: backend_url.trim_end_matches('/').to_string(),
            server_addr,
            poll,
        })
    }
}

/// Lee una variable numérica del entorno en el tipo de destino. Un valor
/// fuera de rango es un error de configuración, nunca se trunca.
fn env_number<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => parse_number(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| anyhow!("{key} debe ser un número entero válido, no '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn un_valor_fuera_de_rango_es_un_error() {
        // 5_000_000_000 no cabe en u32: error, no un truncado silencioso.
        assert!(parse_number::<u32>("POLL_MAX_ROUNDS", "5000000000").is_err());
        assert_eq!(parse_number::<u32>("POLL_MAX_ROUNDS", "60").unwrap(), 60);
    }

    #[test]
    fn un_valor_no_numerico_es_un_error() {
        assert!(parse_number::<u64>("POLL_INTERVAL_MS", "tres mil").is_err());
        assert!(parse_number::<u64>("POLL_INTERVAL_MS", "-5").is_err());
        assert_eq!(parse_number::<u64>("POLL_INTERVAL_MS", "3000").unwrap(), 3000);
    }
}
