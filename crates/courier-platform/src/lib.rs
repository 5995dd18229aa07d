//! Host-facing abstractions used by the transport runtime.

/// Bearer credential storage.
pub mod credentials;
/// Injected environment signal source (network, visibility, activity).
pub mod environment;

#[cfg(feature = "os-keyring")]
pub use credentials::OsKeyringSecretStore;
pub use credentials::{
    BearerCredentials, CredentialProvider, CredentialStoreError, InMemorySecretStore, SecretStore,
};
pub use environment::{
    ActivityListener, EnvironmentSignals, HostSignals, ListenerId, NetworkListener,
};
