use serenity::model::id::GuildId;
use thiserror::Error;

use crate::{sources::SearchError, voice::TransportError};

/// Errores de operar sobre una sesión ya destruida.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("la sesión de guild {0} ya fue destruida")]
    Destroyed(GuildId),
}

/// Motivos por los que una petición de reproducción no llega a la cola.
///
/// `Display` es el mensaje que ve el usuario.
#[derive(Debug, Error)]
pub enum PlayError {
    #[error("The queue already contains `{max}` performances! :fearful:  Use `/remove` or `/clear` if you really want to make space")]
    QueueFull { max: usize },

    #[error("What'cha doin' asking for tunes? :face_with_raised_eyebrow: You're not even in a voice channel!")]
    NotInVoiceChannel,

    #[error("I don't have the right permissions to join `#{channel}`! :scream: Let me in!!!")]
    MissingPermissions { channel: String },

    #[error("I came across an issue queueing up your result{} for playback! :man_shrugging:", plural(.count))]
    Queueing { count: usize },

    #[error("I came across an issue searching for your request! :man_shrugging: Try again in a bit")]
    Search(#[source] SearchError),

    #[error("I couldn't get into the voice channel! :confounded:")]
    Connection(#[source] TransportError),

    #[error("The stage got torn down mid-request! :boom: Try again")]
    Session(#[from] SessionError),
}

fn plural(count: &usize) -> &'static str {
    if *count == 1 {
        ""
    } else {
        "s"
    }
}

impl PlayError {
    /// Errores de capacidad o permisos: no tiene sentido reintentar sin cambios.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::QueueFull { .. } | Self::NotInVoiceChannel | Self::MissingPermissions { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queueing_message_pluralizes() {
        assert_eq!(
            PlayError::Queueing { count: 1 }.to_string(),
            "I came across an issue queueing up your result for playback! :man_shrugging:"
        );
        assert!(PlayError::Queueing { count: 3 }
            .to_string()
            .contains("your results for playback"));
    }

    #[test]
    fn queue_full_mentions_limit() {
        let error = PlayError::QueueFull { max: 50 };
        assert!(error.to_string().contains("`50` performances"));
        assert!(error.is_rejection());
        assert!(!PlayError::Queueing { count: 1 }.is_rejection());
    }
}
