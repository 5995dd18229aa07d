use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use thiserror::Error;
use tracing::warn;

/// Failure reading, storing or discarding a bearer token.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialStoreError {
    /// No bearer token is stored for the `(service, account)` slot.
    #[error("credential not found")]
    NotFound,
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
    #[error("credential store backend failure: {0}")]
    Backend(String),
}

/// Storage for bearer tokens, one per `(service, account)` slot.
///
/// [`BearerCredentials`] reads the slot before every request and deletes it
/// when the backend rejects the token.
pub trait SecretStore: Send + Sync {
    fn set_secret(
        &self,
        service: &str,
        account: &str,
        secret: &str,
    ) -> Result<(), CredentialStoreError>;

    fn get_secret(&self, service: &str, account: &str) -> Result<String, CredentialStoreError>;

    fn delete_secret(&self, service: &str, account: &str) -> Result<(), CredentialStoreError>;
}

/// Process-local token storage. Tokens are lost when the process exits;
/// clones share the same slots.
#[derive(Clone, Default)]
pub struct InMemorySecretStore {
    data: Arc<RwLock<HashMap<(String, String), String>>>,
}

impl SecretStore for InMemorySecretStore {
    fn set_secret(
        &self,
        service: &str,
        account: &str,
        secret: &str,
    ) -> Result<(), CredentialStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| CredentialStoreError::Backend("poisoned lock".to_owned()))?;
        data.insert((service.to_owned(), account.to_owned()), secret.to_owned());
        Ok(())
    }

    fn get_secret(&self, service: &str, account: &str) -> Result<String, CredentialStoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| CredentialStoreError::Backend("poisoned lock".to_owned()))?;
        data.get(&(service.to_owned(), account.to_owned()))
            .cloned()
            .ok_or(CredentialStoreError::NotFound)
    }

    fn delete_secret(&self, service: &str, account: &str) -> Result<(), CredentialStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| CredentialStoreError::Backend("poisoned lock".to_owned()))?;
        if data
            .remove(&(service.to_owned(), account.to_owned()))
            .is_none()
        {
            return Err(CredentialStoreError::NotFound);
        }
        Ok(())
    }
}

/// Token storage in the platform keychain, so a bearer token survives
/// restarts of the host application.
#[cfg(feature = "os-keyring")]
#[derive(Default, Clone, Copy)]
pub struct OsKeyringSecretStore;

#[cfg(feature = "os-keyring")]
impl SecretStore for OsKeyringSecretStore {
    fn set_secret(
        &self,
        service: &str,
        account: &str,
        secret: &str,
    ) -> Result<(), CredentialStoreError> {
        let entry = keyring::Entry::new(service, account)
            .map_err(|err| CredentialStoreError::Backend(err.to_string()))?;
        entry
            .set_password(secret)
            .map_err(|err| CredentialStoreError::Backend(err.to_string()))
    }

    fn get_secret(&self, service: &str, account: &str) -> Result<String, CredentialStoreError> {
        let entry = keyring::Entry::new(service, account)
            .map_err(|err| CredentialStoreError::Backend(err.to_string()))?;
        entry.get_password().map_err(|err| match err {
            keyring::Error::NoEntry => CredentialStoreError::NotFound,
            other => CredentialStoreError::Backend(other.to_string()),
        })
    }

    fn delete_secret(&self, service: &str, account: &str) -> Result<(), CredentialStoreError> {
        let entry = keyring::Entry::new(service, account)
            .map_err(|err| CredentialStoreError::Backend(err.to_string()))?;
        entry.delete_credential().map_err(|err| match err {
            keyring::Error::NoEntry => CredentialStoreError::NotFound,
            other => CredentialStoreError::Backend(other.to_string()),
        })
    }
}

/// Read/discard access to the bearer credential attached to every request.
///
/// Absence of a credential never blocks a request; rejection discards it.
pub trait CredentialProvider: Send + Sync {
    /// Current bearer token, if one is stored.
    fn bearer_token(&self) -> Option<String>;

    /// Forget the stored token after the backend rejected it.
    fn discard(&self);
}

/// Bearer credential stored under a fixed `(service, account)` key.
#[derive(Clone)]
pub struct BearerCredentials<S: SecretStore> {
    inner: S,
    service: String,
    account: String,
}

impl<S: SecretStore> BearerCredentials<S> {
    pub fn new(inner: S, service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            inner,
            service: service.into(),
            account: account.into(),
        }
    }

    /// Store a fresh token, e.g. after the auth subsystem re-authenticated.
    pub fn store(&self, token: &str) -> Result<(), CredentialStoreError> {
        self.inner.set_secret(&self.service, &self.account, token)
    }

    pub fn load(&self) -> Result<Option<String>, CredentialStoreError> {
        match self.inner.get_secret(&self.service, &self.account) {
            Ok(token) => Ok(Some(token)),
            Err(CredentialStoreError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn clear(&self) -> Result<(), CredentialStoreError> {
        match self.inner.delete_secret(&self.service, &self.account) {
            Ok(()) | Err(CredentialStoreError::NotFound) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl<S: SecretStore> CredentialProvider for BearerCredentials<S> {
    fn bearer_token(&self) -> Option<String> {
        match self.load() {
            Ok(token) => token.filter(|token| !token.trim().is_empty()),
            Err(err) => {
                warn!(service = %self.service, error = %err, "failed reading bearer credential");
                None
            }
        }
    }

    fn discard(&self) {
        if let Err(err) = self.clear() {
            warn!(service = %self.service, error = %err, "failed discarding bearer credential");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_then_delete() {
        let store = InMemorySecretStore::default();
        store
            .set_secret("courier", "default", "tok-1")
            .expect("set should work");
        assert_eq!(
            store.get_secret("courier", "default").expect("get"),
            "tok-1"
        );

        store
            .delete_secret("courier", "default")
            .expect("delete should work");
        assert_eq!(
            store.get_secret("courier", "default"),
            Err(CredentialStoreError::NotFound)
        );
    }

    #[test]
    fn bearer_credentials_report_absence_as_none() {
        let creds = BearerCredentials::new(InMemorySecretStore::default(), "courier", "default");
        assert_eq!(creds.load(), Ok(None));
        assert_eq!(creds.bearer_token(), None);

        creds.store("tok-1").expect("store");
        assert_eq!(creds.bearer_token().as_deref(), Some("tok-1"));
    }

    #[test]
    fn discard_is_idempotent() {
        let creds = BearerCredentials::new(InMemorySecretStore::default(), "courier", "default");
        creds.store("tok-1").expect("store");
        creds.discard();
        creds.discard();
        assert_eq!(creds.bearer_token(), None);
    }

    #[test]
    fn credentials_are_scoped_by_service() {
        let base = InMemorySecretStore::default();
        let a = BearerCredentials::new(base.clone(), "courier-a", "default");
        let b = BearerCredentials::new(base.clone(), "courier-b", "default");

        a.store("one").expect("store a");
        b.store("two").expect("store b");
        a.discard();

        assert_eq!(a.bearer_token(), None);
        assert_eq!(b.bearer_token().as_deref(), Some("two"));
    }

    #[derive(Default)]
    struct FailingStore;

    impl SecretStore for FailingStore {
        fn set_secret(
            &self,
            _service: &str,
            _account: &str,
            _secret: &str,
        ) -> Result<(), CredentialStoreError> {
            Err(CredentialStoreError::Unavailable("mock outage".to_owned()))
        }

        fn get_secret(&self, _service: &str, _account: &str) -> Result<String, CredentialStoreError> {
            Err(CredentialStoreError::Unavailable("mock outage".to_owned()))
        }

        fn delete_secret(&self, _service: &str, _account: &str) -> Result<(), CredentialStoreError> {
            Err(CredentialStoreError::Unavailable("mock outage".to_owned()))
        }
    }

    #[test]
    fn store_outage_degrades_to_missing_credential() {
        let creds = BearerCredentials::new(FailingStore, "courier", "default");
        assert_eq!(
            creds.load(),
            Err(CredentialStoreError::Unavailable("mock outage".to_owned()))
        );
        assert_eq!(creds.bearer_token(), None);
        creds.discard();
    }
}
