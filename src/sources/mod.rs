//! # Sources Module
//!
//! External collaborators that turn identifiers and queries into music:
//!
//! - [`StreamProvider`]: resolves a track id into a decodable audio input
//! - [`SearchProvider`]: resolves a query or URL into [`QueueItem`]s
//!
//! Both are traits so the playback core can run against mocks in tests.

pub mod youtube;
pub mod ytdlp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use songbird::input::Input;
use std::{str::FromStr, time::Duration};
use thiserror::Error;

use crate::music::item::QueueItem;

pub use youtube::YouTubeSearcher;
pub use ytdlp::YtDlpProvider;

/// Calidad de audio solicitada al proveedor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioQuality {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Error)]
#[error("calidad de audio desconocida: {0} (low, medium o high)")]
pub struct UnknownQuality(String);

impl FromStr for AudioQuality {
    type Err = UnknownQuality;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(UnknownQuality(value.to_string())),
        }
    }
}

/// Parámetros de negociación del stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    /// Preferir audio ya codificado en Opus para evitar transcodificar
    pub prefer_opus: bool,
    pub audio_quality: AudioQuality,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            prefer_opus: true,
            audio_quality: AudioQuality::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    /// Opus dentro de WebM, sin transcodificar.
    WebmOpus,
    Arbitrary,
}

/// Stream listo para el driver de voz.
pub struct AudioStream {
    pub input: Input,
    pub media_type: MediaType,
}

impl std::fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStream")
            .field("media_type", &self.media_type)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("no se pudo abrir el audio de {id}: {message}")]
    Unavailable { id: String, message: String },
    #[error("timeout abriendo el stream tras {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("error HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("YouTube API respondió {status}: {message}")]
    Api { status: u16, message: String },
    #[error("no hay API keys configuradas")]
    NoKeys,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamProvider: Send + Sync {
    async fn open_audio_stream(
        &self,
        track_id: &str,
        options: &StreamOptions,
    ) -> Result<AudioStream, StreamError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// `multi` pide varios resultados de texto y desactiva la resolución de URLs.
    async fn search(&self, query: &str, multi: bool) -> Result<Vec<QueueItem>, SearchError>;
}
