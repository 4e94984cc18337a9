use dashmap::DashMap;
use serenity::model::id::UserId;
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Límite de usos de un comando por usuario dentro de una ventana.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleRule {
    pub usages: usize,
    pub duration: Duration,
}

impl ThrottleRule {
    pub const fn new(usages: usize, duration_secs: u64) -> Self {
        Self {
            usages,
            duration: Duration::from_secs(duration_secs),
        }
    }
}

/// Ventana deslizante por `(usuario, comando)`.
#[derive(Default)]
pub struct Throttle {
    usages: DashMap<(UserId, String), VecDeque<Instant>>,
}

impl Throttle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra un uso si cabe en la ventana. Devuelve cuánto falta si no cabe.
    pub fn check(
        &self,
        user_id: UserId,
        command: &str,
        rule: ThrottleRule,
        now: Instant,
    ) -> Result<(), Duration> {
        let mut window = self
            .usages
            .entry((user_id, command.to_string()))
            .or_default();

        while window
            .front()
            .is_some_and(|used| now.saturating_duration_since(*used) >= rule.duration)
        {
            window.pop_front();
        }

        if window.len() >= rule.usages {
            let oldest = window.front().copied().unwrap_or(now);
            return Err(rule
                .duration
                .saturating_sub(now.saturating_duration_since(oldest)));
        }

        window.push_back(now);
        Ok(())
    }

    /// Quita ventanas sin usos recientes.
    pub fn prune(&self, older_than: Duration, now: Instant) {
        self.usages.retain(|_, window| {
            window
                .back()
                .is_some_and(|used| now.saturating_duration_since(*used) < older_than)
        });
    }

    pub fn tracked(&self) -> usize {
        self.usages.len()
    }
}
