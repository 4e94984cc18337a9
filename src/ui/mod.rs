//! Discord presentation: embeds for play results, the queue and search
//! results, plus pagination and invite components.

pub mod buttons;
pub mod embeds;
