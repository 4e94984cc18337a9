use anyhow::Result;
use async_trait::async_trait;
use songbird::input::{Compose, Input, YoutubeDl};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{AudioQuality, AudioStream, MediaType, StreamError, StreamOptions, StreamProvider};
use crate::music::item::watch_url;

/// Proveedor de audio que delega en yt-dlp vía songbird.
pub struct YtDlpProvider {
    client: reqwest::Client,
}

impl YtDlpProvider {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self { client })
    }

    /// Comprueba que yt-dlp esté instalado y responda.
    pub async fn verify_available() -> Result<String> {
        let output = async_process::Command::new("yt-dlp")
            .arg("--version")
            .output()
            .await?;

        if !output.status.success() {
            anyhow::bail!("yt-dlp no puede ejecutarse correctamente");
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("✅ yt-dlp versión: {}", version);
        Ok(version)
    }
}

/// Selectores `-f` de yt-dlp en orden de preferencia, con el tipo que garantiza cada uno.
///
/// YouTube sirve Opus dentro de WebM; el último selector admite cualquier formato.
pub fn format_selectors(options: &StreamOptions) -> Vec<(String, MediaType)> {
    let base = match options.audio_quality {
        AudioQuality::Low => "worstaudio",
        AudioQuality::Medium => "bestaudio[abr<=128]",
        AudioQuality::High => "bestaudio",
    };

    let mut selectors = Vec::with_capacity(2);
    if options.prefer_opus {
        selectors.push((format!("{base}[acodec=opus]"), MediaType::WebmOpus));
    }
    selectors.push((format!("{base}/bestaudio/best"), MediaType::Arbitrary));
    selectors
}

#[async_trait]
impl StreamProvider for YtDlpProvider {
    async fn open_audio_stream(
        &self,
        track_id: &str,
        options: &StreamOptions,
    ) -> Result<AudioStream, StreamError> {
        let mut last_error = None;

        for (selector, media_type) in format_selectors(options) {
            debug!("🔍 Abriendo stream de {} con formato '{}'", track_id, selector);

            let mut ytdl = YoutubeDl::new(self.client.clone(), watch_url(track_id))
                .user_args(vec!["-f".into(), selector.clone()]);

            // Un video caído falla aquí y no a mitad de reproducción
            match ytdl.aux_metadata().await {
                Ok(metadata) => {
                    debug!(
                        "✅ Metadatos de {}: {:?} ({:?}, {:?})",
                        track_id, metadata.title, metadata.duration, media_type
                    );
                    return Ok(AudioStream {
                        input: Input::from(ytdl),
                        media_type,
                    });
                }
                Err(e) => {
                    debug!("yt-dlp sin resultado para {} con '{}': {}", track_id, selector, e);
                    last_error = Some(e.to_string());
                }
            }
        }

        let message = last_error.unwrap_or_else(|| "sin selectores de formato".to_string());
        warn!("❌ yt-dlp no pudo resolver {}: {}", track_id, message);
        Err(StreamError::Unavailable {
            id: track_id.to_string(),
            message,
        })
    }
}
