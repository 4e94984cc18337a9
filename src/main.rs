use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info, warn};

mod bot;
mod config;
mod music;
mod sources;
mod ui;
mod voice;

#[cfg(test)]
mod testing;

use crate::bot::MusicBot;
use crate::config::Config;
use crate::music::{GuildRegistry, MusicServices};
use crate::sources::{YouTubeSearcher, YtDlpProvider};
use crate::voice::SongbirdTransport;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("present_mic=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎤 Iniciando Present Mic v{}", env!("CARGO_PKG_VERSION"));

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    if config.gapi_keys.is_empty() {
        warn!("⚠️ No hay GAPI_KEY_n definidas: las búsquedas van a fallar");
    }

    // Servicios de música compartidos por todos los guilds
    let songbird = Songbird::serenity();
    let services = MusicServices {
        transport: Arc::new(SongbirdTransport::new(songbird.clone())),
        provider: Arc::new(YtDlpProvider::new()?),
        searcher: Arc::new(YouTubeSearcher::new(
            config.gapi_keys.clone(),
            config.max_search_results,
        )?),
        settings: config.session_settings(),
        max_queue_items: config.max_queue_items,
    };
    let registry = Arc::new(GuildRegistry::new(services));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    // Crear handler del bot
    let handler = MusicBot::new(config.clone(), registry);

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check() -> Result<()> {
    // Verificar dependencias críticas
    YtDlpProvider::verify_available().await?;

    let ffmpeg = async_process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes: ffmpeg");
    }
}
