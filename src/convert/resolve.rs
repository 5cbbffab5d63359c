//! Maps Slack identities to Discord mention syntax, falling back to literal
//! display text when no destination identity exists. A mention is never
//! dropped: the worst case is the raw Slack id behind an `@`/`#` sigil.

use crate::transport::Directory;
use std::collections::HashMap;

/// Mass-notification tokens. Slack's `@channel` notifies the members of the
/// current channel, which Discord's `@here` approximates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Broadcast {
    Everyone,
    Here,
}

pub struct Resolver<'a> {
    /// Slack user id → display name (from users.json)
    users: &'a HashMap<String, String>,
    /// Slack channel id → name (from channels.json)
    channels: &'a HashMap<String, String>,
    /// Slack user id → Discord member name (operator-maintained)
    user_map: &'a HashMap<String, String>,
    directory: &'a dyn Directory,
    /// Run-scoped memo of source token → rendered mention
    cache: &'a mut HashMap<String, String>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        users: &'a HashMap<String, String>,
        channels: &'a HashMap<String, String>,
        user_map: &'a HashMap<String, String>,
        directory: &'a dyn Directory,
        cache: &'a mut HashMap<String, String>,
    ) -> Self {
        Self {
            users,
            channels,
            user_map,
            directory,
            cache,
        }
    }

    /// Render a `<@U…>` token. Mapped Discord member → live mention; known
    /// Slack name → `@name` literal; otherwise the raw id.
    pub fn user(&mut self, id: &str) -> String {
        let key = format!("@{id}");
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }

        let slack_name = self.users.get(id);
        let rendered = self
            .mapped_member(id, slack_name)
            .unwrap_or_else(|| match slack_name {
                Some(name) if !name.is_empty() => format!("@{name}"),
                _ => format!("@{id}"),
            });

        self.cache.insert(key, rendered.clone());
        rendered
    }

    fn mapped_member(&self, id: &str, slack_name: Option<&String>) -> Option<String> {
        if let Some(discord_name) = self.user_map.get(id) {
            if let Some(uid) = self.directory.lookup_user(discord_name) {
                return Some(format!("<@{uid}>"));
            }
            tracing::warn!(
                "Mapped user {} → \"{}\" not found on the server; keeping literal mention",
                id,
                discord_name
            );
        } else if let Some(name) = slack_name {
            // No mapping entry: try the Slack name itself
            if let Some(uid) = self.directory.lookup_user(name) {
                return Some(format!("<@{uid}>"));
            }
        }
        None
    }

    /// Render a `<#C…>` token, preferring the export's label when the
    /// channels table has no entry.
    pub fn channel(&mut self, id: &str, label: Option<&str>) -> String {
        let key = format!("#{id}");
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }

        let name = self
            .channels
            .get(id)
            .map(String::as_str)
            .or(label)
            .unwrap_or(id);
        let rendered = match self.directory.lookup_channel(name) {
            Some(cid) => format!("<#{cid}>"),
            None => {
                tracing::warn!("Channel \"{}\" not found on the server; keeping literal", name);
                format!("#{name}")
            }
        };

        self.cache.insert(key, rendered.clone());
        rendered
    }

    /// Render a broadcast token. Without broadcast permission the literal
    /// word is emitted (no `@`), so a replayed archive cannot mass-ping.
    pub fn broadcast(&self, kind: Broadcast) -> String {
        let word = match kind {
            Broadcast::Everyone => "everyone",
            Broadcast::Here => "here",
        };
        if self.directory.can_broadcast() {
            format!("@{word}")
        } else {
            word.to_string()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeDirectory {
        users: HashMap<String, u64>,
        channels: HashMap<String, u64>,
        broadcast: bool,
    }

    impl Directory for FakeDirectory {
        fn lookup_user(&self, name: &str) -> Option<u64> {
            self.users.get(name).copied()
        }
        fn lookup_channel(&self, name: &str) -> Option<u64> {
            self.channels.get(name).copied()
        }
        fn can_broadcast(&self) -> bool {
            self.broadcast
        }
    }

    fn tables() -> (
        HashMap<String, String>,
        HashMap<String, String>,
        HashMap<String, String>,
    ) {
        let users = HashMap::from([
            ("U111".to_string(), "rocky".to_string()),
            ("U222".to_string(), "felix".to_string()),
        ]);
        let channels = HashMap::from([("C1".to_string(), "general".to_string())]);
        let user_map = HashMap::from([("U111".to_string(), "rocky_dc".to_string())]);
        (users, channels, user_map)
    }

    fn directory(broadcast: bool) -> FakeDirectory {
        FakeDirectory {
            users: HashMap::from([("rocky_dc".to_string(), 42), ("felix".to_string(), 43)]),
            channels: HashMap::from([("general".to_string(), 99)]),
            broadcast,
        }
    }

    #[test]
    fn test_user_via_mapping() {
        let (users, channels, user_map) = tables();
        let dir = directory(false);
        let mut cache = HashMap::new();
        let mut resolver = Resolver::new(&users, &channels, &user_map, &dir, &mut cache);
        assert_eq!(resolver.user("U111"), "<@42>");
    }

    #[test]
    fn test_user_via_slack_name() {
        let (users, channels, user_map) = tables();
        let dir = directory(false);
        let mut cache = HashMap::new();
        let mut resolver = Resolver::new(&users, &channels, &user_map, &dir, &mut cache);
        // U222 has no mapping entry but its Slack name matches a member
        assert_eq!(resolver.user("U222"), "<@43>");
    }

    #[test]
    fn test_user_literal_fallback() {
        let (users, channels, user_map) = tables();
        let dir = FakeDirectory {
            users: HashMap::new(),
            channels: HashMap::new(),
            broadcast: false,
        };
        let mut cache = HashMap::new();
        let mut resolver = Resolver::new(&users, &channels, &user_map, &dir, &mut cache);
        assert_eq!(resolver.user("U222"), "@felix");
        assert_eq!(resolver.user("U999"), "@U999");
    }

    #[test]
    fn test_channel_resolution_and_fallback() {
        let (users, channels, user_map) = tables();
        let dir = directory(false);
        let mut cache = HashMap::new();
        let mut resolver = Resolver::new(&users, &channels, &user_map, &dir, &mut cache);
        assert_eq!(resolver.channel("C1", None), "<#99>");
        assert_eq!(resolver.channel("C2", Some("random")), "#random");
        assert_eq!(resolver.channel("C3", None), "#C3");
    }

    #[test]
    fn test_broadcast_permission() {
        let (users, channels, user_map) = tables();
        let mut cache = HashMap::new();

        let allowed = directory(true);
        let resolver = Resolver::new(&users, &channels, &user_map, &allowed, &mut cache);
        assert_eq!(resolver.broadcast(Broadcast::Everyone), "@everyone");
        assert_eq!(resolver.broadcast(Broadcast::Here), "@here");

        let mut cache = HashMap::new();
        let denied = directory(false);
        let resolver = Resolver::new(&users, &channels, &user_map, &denied, &mut cache);
        assert_eq!(resolver.broadcast(Broadcast::Everyone), "everyone");
        assert_eq!(resolver.broadcast(Broadcast::Here), "here");
    }

    #[test]
    fn test_cache_is_keyed_by_kind() {
        let (users, channels, user_map) = tables();
        let dir = directory(false);
        let mut cache = HashMap::new();
        {
            let mut resolver = Resolver::new(&users, &channels, &user_map, &dir, &mut cache);
            resolver.user("U111");
            resolver.channel("C1", None);
        }
        assert_eq!(cache.get("@U111").unwrap(), "<@42>");
        assert_eq!(cache.get("#C1").unwrap(), "<#99>");
    }
}
