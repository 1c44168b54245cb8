//! Connection error taxonomy.
//!
//! Every failure that reaches the state machine is one of these variants.
//! The machine only dispatches on [`ErrorClass`], never on individual variants.

use thiserror::Error;

/// Closed set of errors at the tunnel/connection boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Credentials not found")]
    CredentialsNotFound,

    #[error("Server address is missing")]
    MissingRemoteAddress,

    #[error("Invalid server configuration")]
    InvalidServerConfig,

    #[error("Configuration not found")]
    ConfigNotFound,

    #[error("No tunnel driver for this backend")]
    IncorrectVpnManager,

    #[error("Invalid location type")]
    InvalidLocationType,

    #[error("Custom config support is not available")]
    CustomConfigSupportNotAvailable,

    #[error("No valid node found")]
    NoValidNodeFound,

    #[error("Connection timed out")]
    ConnectionTimeout,

    #[error("Authentication failed")]
    AuthFailure,

    #[error("Connectivity test failed")]
    ConnectivityTestFailed,

    #[error("Account expired")]
    AccountExpired,

    #[error("Upgrade required")]
    UpgradeRequired,

    #[error("Account banned")]
    AccountBanned,

    #[error("Network is offline")]
    NetworkIsOffline,

    #[error("Privacy policy not accepted")]
    PrivacyNotAccepted,

    #[error("All protocols failed")]
    AllProtocolFailed,

    #[error("Location not found: {0}")]
    LocationNotFound(String),

    #[error("Custom config is missing credentials: {0}")]
    CustomConfigMissingCredentials(String),

    /// The operation was cancelled by a newer intent.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Unknown(String),
}

/// How the state machine reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad configuration: surfaced once, never retried.
    Configuration,
    /// Transport failure: routed into protocol failover.
    Transport,
    /// Account problem: forced disconnect plus an account trigger.
    Account,
    /// No internet: connect intent abandoned.
    Offline,
    /// Privacy consent missing.
    Consent,
    /// Every automatic-mode candidate failed.
    Exhausted,
    /// Selected location vanished from the catalog.
    Catalog,
    /// A custom config needs credentials from the user.
    CustomConfigCredentials,
    /// Superseded operation; ignored.
    Cancelled,
    /// Anything else.
    Unknown,
}

impl ConnectionError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::CredentialsNotFound
            | Self::MissingRemoteAddress
            | Self::InvalidServerConfig
            | Self::ConfigNotFound
            | Self::IncorrectVpnManager
            | Self::InvalidLocationType
            | Self::CustomConfigSupportNotAvailable
            | Self::NoValidNodeFound => ErrorClass::Configuration,
            Self::ConnectionTimeout | Self::AuthFailure | Self::ConnectivityTestFailed => {
                ErrorClass::Transport
            }
            Self::AccountExpired | Self::UpgradeRequired | Self::AccountBanned => {
                ErrorClass::Account
            }
            Self::NetworkIsOffline => ErrorClass::Offline,
            Self::PrivacyNotAccepted => ErrorClass::Consent,
            Self::AllProtocolFailed => ErrorClass::Exhausted,
            Self::LocationNotFound(_) => ErrorClass::Catalog,
            Self::CustomConfigMissingCredentials(_) => ErrorClass::CustomConfigCredentials,
            Self::Cancelled => ErrorClass::Cancelled,
            Self::Unknown(_) => ErrorClass::Unknown,
        }
    }

    /// Whether automatic mode should move on to the next candidate.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_not_retryable() {
        for err in [
            ConnectionError::CredentialsNotFound,
            ConnectionError::MissingRemoteAddress,
            ConnectionError::InvalidServerConfig,
            ConnectionError::ConfigNotFound,
            ConnectionError::IncorrectVpnManager,
            ConnectionError::InvalidLocationType,
            ConnectionError::CustomConfigSupportNotAvailable,
            ConnectionError::NoValidNodeFound,
        ] {
            assert_eq!(err.class(), ErrorClass::Configuration, "{err}");
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_transport_errors_drive_failover() {
        assert!(ConnectionError::ConnectionTimeout.is_retryable());
        assert!(ConnectionError::AuthFailure.is_retryable());
        assert!(ConnectionError::ConnectivityTestFailed.is_retryable());
    }

    #[test]
    fn test_remaining_classes() {
        assert_eq!(ConnectionError::AccountBanned.class(), ErrorClass::Account);
        assert_eq!(ConnectionError::UpgradeRequired.class(), ErrorClass::Account);
        assert_eq!(ConnectionError::NetworkIsOffline.class(), ErrorClass::Offline);
        assert_eq!(ConnectionError::PrivacyNotAccepted.class(), ErrorClass::Consent);
        assert_eq!(ConnectionError::AllProtocolFailed.class(), ErrorClass::Exhausted);
        assert_eq!(
            ConnectionError::LocationNotFound("12".into()).class(),
            ErrorClass::Catalog
        );
        assert_eq!(
            ConnectionError::Unknown("boom".into()).to_string(),
            "boom".to_string()
        );
    }
}
