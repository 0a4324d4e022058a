use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};
use uuid::Uuid;

use huck_types::models::{Author, Message, MessageRow, Profile};

use crate::remote::RemoteStore;

/// Attaches author display fields to raw message rows from the feed.
///
/// Profiles never change once created, so resolved authors are cached by
/// user id. Lookup failures are never cached.
#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn RemoteStore>,
    authors: Arc<RwLock<HashMap<Uuid, Author>>>,
}

impl Resolver {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            authors: Arc::default(),
        }
    }

    pub fn prime(&self, profile: &Profile) {
        self.remember(profile.id, profile.author());
    }

    pub fn remember(&self, user_id: Uuid, author: Author) {
        self.write().insert(user_id, author);
    }

    pub fn cached(&self, user_id: Uuid) -> Option<Author> {
        self.read().get(&user_id).cloned()
    }

    /// Attach the author without touching the network, if already known.
    pub fn try_enrich(&self, row: MessageRow) -> Result<Message, MessageRow> {
        match self.cached(row.user_id) {
            Some(author) => Ok(row.with_author(author)),
            None => Err(row),
        }
    }

    /// Look the author up and attach it. Never fails: an unknown author or a
    /// failed lookup yields the placeholder author instead.
    pub async fn enrich(&self, row: MessageRow) -> Message {
        let row = match self.try_enrich(row) {
            Ok(message) => return message,
            Err(row) => row,
        };

        match self.store.get_profile(row.user_id).await {
            Ok(Some(profile)) => {
                let author = profile.author();
                self.remember(profile.id, author.clone());
                row.with_author(author)
            }
            Ok(None) => {
                debug!("Author {} of message {} not found", row.user_id, row.id);
                row.with_author(Author::placeholder())
            }
            Err(e) => {
                debug!("Author lookup for message {} failed: {}", row.id, e);
                row.with_author(Author::placeholder())
            }
        }
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    // A panic mid-insert cannot leave the map half-written, so a poisoned
    // lock is recovered rather than turning the cache off.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Author>> {
        self.authors.read().unwrap_or_else(|poisoned| self.recover(poisoned))
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Author>> {
        self.authors.write().unwrap_or_else(|poisoned| self.recover(poisoned))
    }

    fn recover<G>(&self, poisoned: PoisonError<G>) -> G {
        warn!("Author cache lock was poisoned, recovering it");
        self.authors.clear_poison();
        poisoned.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use huck_types::api::SetReactionResponse;
    use huck_types::models::{Channel, MessageWithReactions, NEUTRAL_COLOR, UNKNOWN_USERNAME};

    use crate::error::ClientError;

    const KNOWN: Uuid = Uuid::from_u128(1);
    const GHOST: Uuid = Uuid::from_u128(2);
    const BROKEN: Uuid = Uuid::from_u128(3);

    /// Answers profile lookups only, counting them.
    #[derive(Default)]
    struct Profiles {
        lookups: AtomicUsize,
    }

    fn unused() -> ClientError {
        ClientError::Unavailable("not used in this test".into())
    }

    #[async_trait]
    impl RemoteStore for Profiles {
        async fn lookup_or_create_profile(&self, _: &str) -> Result<Profile, ClientError> {
            Err(unused())
        }

        async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, ClientError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            match id {
                KNOWN => Ok(Some(Profile {
                    id,
                    username: "raoh".into(),
                    color: "text-purple-500".into(),
                })),
                BROKEN => Err(ClientError::Unavailable("lookup timed out".into())),
                _ => Ok(None),
            }
        }

        async fn list_channels(&self) -> Result<Vec<Channel>, ClientError> {
            Err(unused())
        }

        async fn create_channel(&self, _: &str, _: &str) -> Result<Channel, ClientError> {
            Err(unused())
        }

        async fn fetch_messages(&self, _: Uuid) -> Result<Vec<MessageWithReactions>, ClientError> {
            Err(unused())
        }

        async fn insert_message(&self, _: Uuid, _: Uuid, _: &str) -> Result<MessageRow, ClientError> {
            Err(unused())
        }

        async fn set_reaction(
            &self,
            _: Uuid,
            _: Uuid,
            _: &str,
            _: bool,
        ) -> Result<SetReactionResponse, ClientError> {
            Err(unused())
        }
    }

    fn row(user_id: Uuid) -> MessageRow {
        MessageRow {
            id: Uuid::now_v7(),
            channel_id: Uuid::from_u128(0xA),
            user_id,
            content: "hello".into(),
            created_at: Utc::now(),
        }
    }

    fn resolver() -> (Resolver, Arc<Profiles>) {
        let profiles = Arc::new(Profiles::default());
        (Resolver::new(profiles.clone()), profiles)
    }

    #[tokio::test]
    async fn known_author_is_attached_and_cached() {
        let (resolver, profiles) = resolver();

        let message = resolver.enrich(row(KNOWN)).await;
        assert_eq!(message.author.username, "raoh");
        assert_eq!(message.author.color, "text-purple-500");

        resolver.enrich(row(KNOWN)).await;
        assert_eq!(profiles.lookups.load(Ordering::SeqCst), 1);
        assert!(resolver.try_enrich(row(KNOWN)).is_ok());
    }

    #[tokio::test]
    async fn missing_or_failed_lookup_yields_placeholder() {
        let (resolver, profiles) = resolver();

        for user in [GHOST, BROKEN] {
            let message = resolver.enrich(row(user)).await;
            assert_eq!(message.author.username, UNKNOWN_USERNAME);
            assert_eq!(message.author.color, NEUTRAL_COLOR);
            assert_eq!(message.content, "hello");
        }

        // Placeholders are not cached, so a later lookup can still succeed
        assert!(resolver.try_enrich(row(GHOST)).is_err());
        resolver.enrich(row(BROKEN)).await;
        assert_eq!(profiles.lookups.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn primed_profile_needs_no_lookup() {
        let (resolver, profiles) = resolver();
        resolver.prime(&Profile {
            id: GHOST,
            username: "yuria".into(),
            color: "text-blue-500".into(),
        });

        let message = resolver.enrich(row(GHOST)).await;
        assert_eq!(message.author.username, "yuria");
        assert_eq!(profiles.lookups.load(Ordering::SeqCst), 0);

        resolver.clear();
        assert!(resolver.cached(GHOST).is_none());
    }

    #[test]
    fn poisoned_cache_keeps_learning() {
        let (resolver, _) = resolver();
        let authors = resolver.authors.clone();
        let _ = std::thread::spawn(move || {
            let _guard = authors.write().unwrap();
            panic!("writer died holding the cache");
        })
        .join();
        assert!(resolver.authors.is_poisoned());

        let author = Author {
            username: "raoh".into(),
            color: "text-purple-500".into(),
        };
        resolver.remember(KNOWN, author.clone());
        assert_eq!(resolver.cached(KNOWN), Some(author));
        assert!(!resolver.authors.is_poisoned());

        resolver.clear();
        assert!(resolver.cached(KNOWN).is_none());
    }
}
