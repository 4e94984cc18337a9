//! # Bot Module
//!
//! Discord side of Present Mic: the Serenity [`EventHandler`], slash command
//! registration, per-command handlers and throttling.
//!
//! ## Architecture
//!
//! [`MusicBot`] keeps the [`GuildRegistry`] in sync with the guilds the bot
//! belongs to and hands each interaction to [`handlers::handle_command`],
//! which talks to that guild's [`GuildMusicManager`](crate::music::GuildMusicManager).
//!
//! ```rust,no_run
//! let config = Arc::new(Config::load()?);
//! let registry = Arc::new(GuildRegistry::new(services));
//! let bot = MusicBot::new(config, registry);
//! ```

use anyhow::Result;
use serenity::{
    all::{
        ChannelId, Context, EventHandler, Guild, GuildId, Interaction, Ready, UnavailableGuild,
        VoiceState,
    },
    async_trait,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod handlers;
pub mod ranges;
pub mod throttle;

use crate::{
    config::Config,
    music::{ChannelOccupancy, GuildRegistry},
};
use throttle::Throttle;

/// Cada cuánto se limpian las ventanas de throttling sin uso.
const THROTTLE_PRUNE_INTERVAL: Duration = Duration::from_secs(600);

/// Handler de eventos de Discord.
///
/// Los managers de música viven en el [`GuildRegistry`]; aquí solo se
/// sincroniza su ciclo de vida con el de los guilds.
pub struct MusicBot {
    config: Arc<Config>,
    registry: Arc<GuildRegistry>,
    throttle: Arc<Throttle>,
    maintenance_started: AtomicBool,
}

impl MusicBot {
    pub fn new(config: Arc<Config>, registry: Arc<GuildRegistry>) -> Self {
        Self {
            config,
            registry,
            throttle: Arc::new(Throttle::new()),
            maintenance_started: AtomicBool::new(false),
        }
    }

    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);
                let guild_id = GuildId::new(guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    error!("❌ Error registrando comandos de guild: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

/// Miembros en el canal de voz del bot según la caché.
fn bot_channel_occupancy(
    ctx: &Context,
    guild_id: GuildId,
    manager_channel: ChannelId,
) -> Option<ChannelOccupancy> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    let members = guild
        .voice_states
        .values()
        .filter(|state| state.channel_id == Some(manager_channel))
        .map(|state| state.user_id)
        .collect();

    Some(ChannelOccupancy {
        channel_id: manager_channel,
        members,
    })
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        for guild in &ready.guilds {
            self.registry.register(guild.id);
        }

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        // `ready` se repite en cada reconexión
        if self.maintenance_started.swap(true, Ordering::AcqRel) {
            return;
        }

        let throttle = self.throttle.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(THROTTLE_PRUNE_INTERVAL);
            loop {
                interval.tick().await;
                throttle.prune(THROTTLE_PRUNE_INTERVAL, Instant::now());
                debug!("🧹 Ventanas de throttling activas: {}", throttle.tracked());
            }
        });
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, _is_new: Option<bool>) {
        self.registry.register(guild.id);
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        // Un guild caído sigue siendo nuestro
        if incomplete.unavailable {
            return;
        }
        self.registry.unregister(incomplete.id);
    }

    async fn voice_state_update(&self, ctx: Context, _old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };
        let Some(manager) = self.registry.get(guild_id) else {
            return;
        };
        let Some(channel_id) = manager.voice_channel() else {
            return;
        };

        let bot_id = ctx.cache.current_user().id;
        if let Some(occupancy) = bot_channel_occupancy(&ctx, guild_id, channel_id) {
            manager.handle_voice_state_update(&occupancy, bot_id);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        // Los componentes los atienden los colectores de cada comando
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }
}
