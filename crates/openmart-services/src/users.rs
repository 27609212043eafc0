//! User directory: cached lookups by primary and secondary keys, profile
//! updates, and the per-user watchlist view.

use std::sync::Arc;
use std::time::Duration;

use openmart_cache::{CacheStore, EntityChange, InvalidationCoordinator, keys};
use openmart_core::{CoreError, Product, Result, User, UserId};
use openmart_storage::{UserStore, WatchlistStore};

pub struct UserDirectory {
    users: Arc<dyn UserStore>,
    watchlists: Arc<dyn WatchlistStore>,
    cache: CacheStore,
    invalidation: InvalidationCoordinator,
    user_ttl: Duration,
    watchlist_ttl: Duration,
}

impl UserDirectory {
    pub fn new(
        users: Arc<dyn UserStore>,
        watchlists: Arc<dyn WatchlistStore>,
        cache: CacheStore,
        invalidation: InvalidationCoordinator,
        user_ttl: Duration,
        watchlist_ttl: Duration,
    ) -> Self {
        Self {
            users,
            watchlists,
            cache,
            invalidation,
            user_ttl,
            watchlist_ttl,
        }
    }

    pub async fn find_by_id(&self, user_id: UserId) -> Result<Option<User>> {
        let key = keys::users::by_id(user_id);
        if let Some(user) = self.cache.get::<User>(&key).await {
            return Ok(Some(user));
        }
        let user = self
            .users
            .find_by_id(user_id)
            .await
            .map_err(CoreError::from)?;
        if let Some(ref user) = user {
            self.cache.set(&key, user, self.user_ttl).await;
        }
        Ok(user)
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let key = keys::users::by_username(username);
        if let Some(user) = self.cache.get::<User>(&key).await {
            return Ok(Some(user));
        }
        let user = self
            .users
            .find_by_username(username)
            .await
            .map_err(CoreError::from)?;
        if let Some(ref user) = user {
            self.cache.set(&key, user, self.user_ttl).await;
            // Warm the primary key too; both views were just read.
            self.cache
                .set(&keys::users::by_id(user.id), user, self.user_ttl)
                .await;
        }
        Ok(user)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let key = keys::users::by_email(email);
        if let Some(user) = self.cache.get::<User>(&key).await {
            return Ok(Some(user));
        }
        let user = self
            .users
            .find_by_email(email)
            .await
            .map_err(CoreError::from)?;
        if let Some(ref user) = user {
            self.cache.set(&key, user, self.user_ttl).await;
            self.cache
                .set(&keys::users::by_id(user.id), user, self.user_ttl)
                .await;
        }
        Ok(user)
    }

    pub async fn find_all(&self) -> Result<Vec<User>> {
        if let Some(users) = self.cache.get_list::<User>(keys::users::ALL).await {
            return Ok(users);
        }
        let users = self.users.find_all().await.map_err(CoreError::from)?;
        self.cache.set(keys::users::ALL, &users, self.user_ttl).await;
        Ok(users)
    }

    /// Update a profile and drop every lookup key that could serve the
    /// old snapshot — including the previous username/email keys, which
    /// would otherwise keep answering until their TTL.
    pub async fn update_profile(&self, updated: User) -> Result<User> {
        let previous = self
            .users
            .find_by_id(updated.id)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::not_found("User", updated.id))?;

        let saved = self.users.update(updated).await.map_err(CoreError::from)?;

        let mut usernames = vec![previous.username];
        if saved.username != usernames[0] {
            usernames.push(saved.username.clone());
        }
        let mut emails = vec![previous.email];
        if saved.email != emails[0] {
            emails.push(saved.email.clone());
        }

        self.invalidation
            .invalidate(&EntityChange::UserUpdated {
                user_id: saved.id,
                usernames,
                emails,
            })
            .await;

        Ok(saved)
    }

    pub async fn watchlist(&self, user_id: UserId) -> Result<Vec<Product>> {
        let key = keys::users::watchlist(user_id);
        if let Some(products) = self.cache.get_list::<Product>(&key).await {
            return Ok(products);
        }
        let products = self
            .watchlists
            .find_products_for_user(user_id)
            .await
            .map_err(CoreError::from)?;
        self.cache.set(&key, &products, self.watchlist_ttl).await;
        Ok(products)
    }

    pub async fn add_to_watchlist(&self, user_id: UserId, product_id: i64) -> Result<()> {
        self.watchlists
            .add(user_id, product_id)
            .await
            .map_err(CoreError::from)?;
        self.invalidation
            .invalidate(&EntityChange::WatchlistChanged { user_id })
            .await;
        Ok(())
    }

    pub async fn remove_from_watchlist(&self, user_id: UserId, product_id: i64) -> Result<()> {
        self.watchlists
            .remove(user_id, product_id)
            .await
            .map_err(CoreError::from)?;
        self.invalidation
            .invalidate(&EntityChange::WatchlistChanged { user_id })
            .await;
        Ok(())
    }
}
