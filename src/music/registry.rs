use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::info;

use super::manager::{GuildMusicManager, MusicServices};

/// Managers de música por guild, ligados a la vida del guild en el bot.
pub struct GuildRegistry {
    managers: DashMap<GuildId, Arc<GuildMusicManager>>,
    services: MusicServices,
}

impl GuildRegistry {
    pub fn new(services: MusicServices) -> Self {
        Self {
            managers: DashMap::new(),
            services,
        }
    }

    /// Crea el manager del guild; si ya existe lo devuelve tal cual.
    pub fn register(&self, guild_id: GuildId) -> Arc<GuildMusicManager> {
        self.managers
            .entry(guild_id)
            .or_insert_with(|| {
                info!("📥 Registrando guild {}", guild_id);
                Arc::new(GuildMusicManager::new(guild_id, self.services.clone()))
            })
            .clone()
    }

    /// Quita el manager y cierra su conexión de voz.
    pub fn unregister(&self, guild_id: GuildId) -> bool {
        match self.managers.remove(&guild_id) {
            Some((_, manager)) => {
                info!("📤 Quitando guild {}", guild_id);
                manager.disconnect();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<GuildMusicManager>> {
        self.managers.get(&guild_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        music::{item::Requester, manager::VoiceChannelRef, session::SessionSettings},
        sources::MockSearchProvider,
        testing::{channel, guild, items, settle, working_provider, FakeTransport},
    };
    use serenity::model::{id::UserId, Permissions};

    fn registry(transport: &Arc<FakeTransport>) -> GuildRegistry {
        GuildRegistry::new(MusicServices {
            transport: transport.clone(),
            provider: working_provider(),
            searcher: Arc::new(MockSearchProvider::new()),
            settings: SessionSettings::default(),
            max_queue_items: 50,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn register_is_idempotent() {
        let transport = FakeTransport::ready();
        let registry = registry(&transport);

        let first = registry.register(guild());
        let second = registry.register(guild());

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(GuildId::new(404)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unregister_drops_connection() {
        let transport = FakeTransport::ready();
        let registry = registry(&transport);
        let manager = registry.register(guild());

        let stage = VoiceChannelRef {
            id: channel(),
            name: "stage".to_string(),
            bot_permissions: Some(Permissions::CONNECT | Permissions::SPEAK),
        };
        manager
            .play(items(&["a"]), Some(&stage), &Requester::new(UserId::new(1), "fan"))
            .await
            .unwrap();

        assert!(registry.unregister(guild()));
        settle().await;

        assert!(registry.is_empty());
        assert!(!registry.unregister(guild()));
        assert_eq!(manager.voice_channel(), None);
    }
}
