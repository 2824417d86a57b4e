//! Gateway intents
//!
//! Bitmask of the event groups a client asks to receive. Bits without a name
//! here are kept as-is so newer server-side intents can still be requested.

use bitflags::{bitflags, Flags};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GatewayIntents: u64 {
        const GUILDS = 1 << 0;
        /// Privileged
        const GUILD_MEMBERS = 1 << 1;
        const GUILD_MODERATION = 1 << 2;
        const GUILD_EMOJIS_AND_STICKERS = 1 << 3;
        const GUILD_INTEGRATIONS = 1 << 4;
        const GUILD_WEBHOOKS = 1 << 5;
        const GUILD_INVITES = 1 << 6;
        const GUILD_VOICE_STATES = 1 << 7;
        /// Privileged
        const GUILD_PRESENCES = 1 << 8;
        const GUILD_MESSAGES = 1 << 9;
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        const GUILD_MESSAGE_TYPING = 1 << 11;
        const DIRECT_MESSAGES = 1 << 12;
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        const DIRECT_MESSAGE_TYPING = 1 << 14;
        /// Privileged
        const MESSAGE_CONTENT = 1 << 15;
        const GUILD_SCHEDULED_EVENTS = 1 << 16;
        const AUTO_MODERATION_CONFIGURATION = 1 << 20;
        const AUTO_MODERATION_EXECUTION = 1 << 21;

        const _ = !0;
    }
}

impl GatewayIntents {
    /// Intents that must be enabled for the application before use
    #[must_use]
    pub const fn privileged() -> Self {
        Self::GUILD_MEMBERS
            .union(Self::GUILD_PRESENCES)
            .union(Self::MESSAGE_CONTENT)
    }

    /// All named intents except the privileged ones
    #[must_use]
    pub fn non_privileged() -> Self {
        Self::all_named().difference(Self::privileged())
    }

    fn all_named() -> Self {
        Self::FLAGS
            .iter()
            .map(|flag| *flag.value())
            .filter(|flag| flag.bits().count_ones() == 1)
            .fold(Self::empty(), Self::union)
    }

    #[must_use]
    pub fn is_privileged(self) -> bool {
        self.intersects(Self::privileged())
    }
}

impl From<u64> for GatewayIntents {
    fn from(bits: u64) -> Self {
        Self::from_bits_retain(bits)
    }
}

impl From<GatewayIntents> for u64 {
    fn from(intents: GatewayIntents) -> Self {
        intents.bits()
    }
}
