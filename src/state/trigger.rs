//! User-visible side effects emitted by the connection machine.

/// One-shot UI trigger. The front end decides how to present each one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UiTrigger {
    /// A connect intent arrived while an attempt was in flight.
    ConnectingInProgress,
    /// Connecting on a trusted network needs confirmation.
    TrustedNetworkPrompt { ssid: String },
    /// Privacy policy must be accepted first.
    PrivacyConsent,
    AccountBanned,
    OutOfData,
    AccountExpired,
    UpgradeRequired,
    /// Premium was lost while on a premium-only location; the selection moved.
    LocationDowngraded { location: String },
    NoInternet,
    /// Every automatic-mode candidate failed; offer manual protocol selection.
    AllProtocolsFailed,
    /// Credentials rejected on a custom config.
    AuthFailure,
    /// The custom config needs credentials entered.
    EditCustomConfigCredentials { config_id: String },
    /// The selected location disappeared; reload the catalog.
    ReloadCatalog { location: String },
    /// Configuration error for this attempt.
    ConfigurationError { message: String },
    /// Fallback for errors outside the taxonomy.
    UnableToReachServer,
    /// Re-read the public IP.
    RefreshIp,
    /// Re-enable latency probing after a disconnect.
    ResumeLatencyProbe,
    /// Ask for a store review.
    RatePrompt,
    /// First successful connection: ask for notification permission.
    NotificationPermission,
}
