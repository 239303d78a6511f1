//! Registration, login and session management.

use common::{AggregateId, UserId};
use event_store::EventStore;

use crate::command::{CommandHandler, UnitOfWork, apply_committed, retry_on_conflict};
use crate::error::DomainError;
use crate::order::OrderService;

use super::{
    Claim, ClaimKind, Credentials, ProfileUpdate, Registration, SessionToken, User, UserError,
    hash_password, value_objects::validate_phone, verify_password,
};

/// A user together with a freshly issued token.
///
/// The raw token exists only here; it is handed to the client once.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub token: SessionToken,
}

/// Owns user records and the claims that keep their keys unique.
pub struct IdentityService<S: EventStore> {
    users: CommandHandler<S, User>,
    claims: CommandHandler<S, Claim>,
}

impl<S: EventStore + Clone> IdentityService<S> {
    pub fn new(store: S) -> Self {
        Self {
            users: CommandHandler::new(store.clone()),
            claims: CommandHandler::new(store),
        }
    }
}

impl<S: EventStore> IdentityService<S> {
    /// Creates a user and logs them in.
    ///
    /// The phone claim, the session claim and the user stream are written in
    /// one append, so a taken phone number leaves nothing behind.
    #[tracing::instrument(skip(self, registration))]
    pub async fn register(&self, registration: Registration) -> Result<Session, DomainError> {
        let registration = registration.validated()?;
        let password_hash = hash_password(&registration.password)?;
        let user_id = UserId::new();
        let token = SessionToken::generate();
        let digest = token.digest();

        let user = retry_on_conflict(|| {
            self.register_once(user_id, &registration, &password_hash, &digest)
        })
        .await?;

        tracing::info!(user_id = %user_id, "user registered");
        Ok(Session { user, token })
    }

    async fn register_once(
        &self,
        user_id: UserId,
        registration: &Registration,
        password_hash: &str,
        digest: &str,
    ) -> Result<User, DomainError> {
        let phone = &registration.phone_number;
        let phone_id = ClaimKind::Phone.claim_id(phone);
        let phone_claim = self.claims.load(phone_id).await?;
        let phone_events = phone_claim.take(ClaimKind::Phone, phone, user_id)?;

        let session_id = ClaimKind::Session.claim_id(digest);
        let session_claim = self.claims.load(session_id).await?;
        let session_events = session_claim.take(ClaimKind::Session, digest, user_id)?;

        let mut user = self.users.load(user_id.into()).await?;
        let user_events = user.register(user_id, registration, password_hash, digest)?;

        let mut work = UnitOfWork::new();
        work.stage(&self.users, user_id.into(), &user, &user_events)?;
        work.stage(&self.claims, phone_id, &phone_claim, &phone_events)?;
        work.stage(&self.claims, session_id, &session_claim, &session_events)?;
        work.commit(self.users.store()).await?;

        apply_committed(&mut user, user_events);
        Ok(user)
    }

    /// Checks credentials and opens a new session.
    ///
    /// An unknown phone number and a wrong password fail the same way.
    #[tracing::instrument(skip(self, credentials))]
    pub async fn login(&self, credentials: Credentials) -> Result<Session, DomainError> {
        let phone = validate_phone(&credentials.phone_number)
            .map_err(|_| UserError::InvalidCredentials)?;
        let claim = self.claims.load(ClaimKind::Phone.claim_id(&phone)).await?;
        let user_id = claim.owner().ok_or(UserError::InvalidCredentials)?;

        let user = self.users.load(user_id.into()).await?;
        if !user.exists() {
            return Err(UserError::InvalidCredentials.into());
        }
        verify_password(credentials.password.trim(), user.password_hash())?;

        let token = SessionToken::generate();
        let digest = token.digest();
        let user = retry_on_conflict(|| self.open_session_once(user_id, &digest)).await?;

        tracing::info!(user_id = %user_id, "user logged in");
        Ok(Session { user, token })
    }

    async fn open_session_once(&self, user_id: UserId, digest: &str) -> Result<User, DomainError> {
        let session_id = ClaimKind::Session.claim_id(digest);
        let session_claim = self.claims.load(session_id).await?;
        let session_events = session_claim.take(ClaimKind::Session, digest, user_id)?;

        let mut user = self.users.load(user_id.into()).await?;
        let user_events = user.open_session(digest)?;

        let mut work = UnitOfWork::new();
        work.stage(&self.users, user_id.into(), &user, &user_events)?;
        work.stage(&self.claims, session_id, &session_claim, &session_events)?;
        work.commit(self.users.store()).await?;

        apply_committed(&mut user, user_events);
        self.users.snapshot_if_due(user_id.into(), &user).await?;
        Ok(user)
    }

    /// Resolves a bearer token to its user.
    #[tracing::instrument(skip_all)]
    pub async fn authenticate(&self, token: &SessionToken) -> Result<User, DomainError> {
        let digest = token.digest();
        let claim = self
            .claims
            .load(ClaimKind::Session.claim_id(&digest))
            .await?;
        let user_id = claim.owner().ok_or(UserError::Unauthenticated)?;

        let user = self.users.load(user_id.into()).await?;
        if user.exists() && user.has_session(&digest) {
            Ok(user)
        } else {
            Err(UserError::Unauthenticated.into())
        }
    }

    /// Revokes the given session.
    #[tracing::instrument(skip(self, token))]
    pub async fn logout(&self, user_id: UserId, token: &SessionToken) -> Result<User, DomainError> {
        let digest = token.digest();
        retry_on_conflict(|| self.close_sessions_once(user_id, Some(digest.as_str()))).await
    }

    /// Revokes every session of the user.
    #[tracing::instrument(skip(self))]
    pub async fn logout_all(&self, user_id: UserId) -> Result<User, DomainError> {
        retry_on_conflict(|| self.close_sessions_once(user_id, None)).await
    }

    async fn close_sessions_once(
        &self,
        user_id: UserId,
        only: Option<&str>,
    ) -> Result<User, DomainError> {
        let mut user = self.users.load(user_id.into()).await?;
        let user_events = match only {
            Some(digest) => user.close_session(digest)?,
            None => user.close_all_sessions()?,
        };

        let digests: Vec<String> = match only {
            Some(digest) if user.has_session(digest) => vec![digest.to_string()],
            Some(_) => vec![],
            None => user.sessions().to_vec(),
        };

        let mut work = UnitOfWork::new();
        work.stage(&self.users, user_id.into(), &user, &user_events)?;
        self.stage_releases(&mut work, ClaimKind::Session, &digests, user_id)
            .await?;
        work.commit(self.users.store()).await?;

        apply_committed(&mut user, user_events);
        self.users.snapshot_if_due(user_id.into(), &user).await?;
        Ok(user)
    }

    async fn stage_releases(
        &self,
        work: &mut UnitOfWork,
        kind: ClaimKind,
        keys: &[String],
        owner: UserId,
    ) -> Result<(), DomainError> {
        for key in keys {
            let claim_id = kind.claim_id(key);
            let claim = self.claims.load(claim_id).await?;
            work.stage(&self.claims, claim_id, &claim, &claim.release(owner))?;
        }
        Ok(())
    }

    /// Edits name, email or password.
    #[tracing::instrument(skip(self, update))]
    pub async fn update_profile(
        &self,
        user_id: UserId,
        update: ProfileUpdate,
    ) -> Result<User, DomainError> {
        let password_hash = update
            .password
            .as_deref()
            .map(hash_password)
            .transpose()?;

        let result = self
            .users
            .execute_with_snapshot(user_id.into(), |user| {
                user.update_profile(&update, password_hash.as_deref())
            })
            .await?;
        Ok(result.aggregate)
    }

    /// Records that the user's avatar was uploaded.
    #[tracing::instrument(skip(self))]
    pub async fn set_avatar(&self, user_id: UserId) -> Result<User, DomainError> {
        let image_path = format!("/users/{user_id}/profile-pic");
        let result = self
            .users
            .execute_with_snapshot(user_id.into(), |user| user.set_avatar(image_path.as_str()))
            .await?;
        Ok(result.aggregate)
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_avatar(&self, user_id: UserId) -> Result<User, DomainError> {
        let result = self
            .users
            .execute_with_snapshot(user_id.into(), |user| user.remove_avatar())
            .await?;
        Ok(result.aggregate)
    }

    /// Loads a live user.
    pub async fn get(&self, user_id: UserId) -> Result<User, DomainError> {
        let user = self.users.load(user_id.into()).await?;
        if user.exists() {
            Ok(user)
        } else {
            Err(UserError::NotFound.into())
        }
    }

    /// Deletes the account and every order it created.
    ///
    /// The user stream, the claim releases and the order removals commit in
    /// one append: either the account and all its orders are gone, or nothing
    /// changed and the call can be repeated. Returns the deleted user and the
    /// ids of the removed orders.
    #[tracing::instrument(skip(self, orders))]
    pub async fn delete_self(
        &self,
        user_id: UserId,
        orders: &OrderService<S>,
    ) -> Result<(User, Vec<AggregateId>), DomainError> {
        let (user, removed) = retry_on_conflict(|| self.delete_once(user_id, orders)).await?;

        tracing::info!(user_id = %user_id, orders = removed.len(), "user deleted");
        Ok((user, removed))
    }

    async fn delete_once(
        &self,
        user_id: UserId,
        orders: &OrderService<S>,
    ) -> Result<(User, Vec<AggregateId>), DomainError> {
        let user = self.users.load(user_id.into()).await?;
        let user_events = user.delete()?;
        let sessions = user.sessions().to_vec();
        let phone = vec![user.phone_number().to_string()];

        let mut work = UnitOfWork::new();
        work.stage(&self.users, user_id.into(), &user, &user_events)?;
        self.stage_releases(&mut work, ClaimKind::Phone, &phone, user_id)
            .await?;
        self.stage_releases(&mut work, ClaimKind::Session, &sessions, user_id)
            .await?;
        let removed = orders.stage_removal_of_created(&mut work, user_id).await?;
        work.commit(self.users.store()).await?;

        // the pre-deletion view goes back in the response
        Ok((user, removed))
    }
}
