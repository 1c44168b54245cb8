//! Session/account gate.
//!
//! Decides whether the account allows a connect attempt, and which account
//! transitions force an active tunnel down.

use crate::constants::CAT_SESSION;
use crate::log_info;
use crate::state::{AccountStatus, SelectedNode, Session, UiTrigger};

/// Why a connect intent is refused before anything is attempted.
///
/// `is_custom` exempts custom configs from the out-of-data check.
#[must_use]
pub fn connect_block(session: &Session, privacy_accepted: bool, is_custom: bool) -> Option<UiTrigger> {
    if !privacy_accepted {
        return Some(UiTrigger::PrivacyConsent);
    }
    match session.status {
        AccountStatus::Banned => Some(UiTrigger::AccountBanned),
        AccountStatus::OutOfData if !is_custom => Some(UiTrigger::OutOfData),
        _ => None,
    }
}

/// An account transition the machine must act on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionChange {
    /// Force a disconnect and surface the trigger.
    ForceDisconnect(UiTrigger),
    /// Premium was lost while a premium-only location is selected.
    PremiumLost,
}

/// Compares two sessions. Each change is reported once, on the transition.
#[must_use]
pub fn evaluate(
    previous: &Session,
    next: &Session,
    selected: Option<&SelectedNode>,
) -> Vec<SessionChange> {
    let mut changes = Vec::new();
    let is_custom = selected.is_some_and(SelectedNode::is_custom_config);

    if next.status != previous.status {
        log_info!(
            CAT_SESSION,
            "Account status {:?} -> {:?}",
            previous.status,
            next.status
        );
        match next.status {
            AccountStatus::Banned => {
                changes.push(SessionChange::ForceDisconnect(UiTrigger::AccountBanned));
            }
            AccountStatus::OutOfData if !is_custom => {
                changes.push(SessionChange::ForceDisconnect(UiTrigger::OutOfData));
            }
            _ => {}
        }
    }

    if previous.is_premium
        && !next.is_premium
        && selected.is_some_and(|node| node.premium_only)
    {
        log_info!(CAT_SESSION, "Premium lost on a premium-only location");
        changes.push(SessionChange::PremiumLost);
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{CustomConfig, LocationId, Protocol};

    fn node(premium_only: bool) -> SelectedNode {
        SelectedNode {
            location: LocationId::Group(12),
            country_code: "CA".into(),
            dns_hostname: "ca.example.net".into(),
            hostname: "yul-1".into(),
            server_address: "10.0.12.1".into(),
            nickname: "Bagel Poutine".into(),
            city_name: "Montreal".into(),
            group_id: Some(12),
            premium_only,
            static_ip_credentials: None,
            custom_config: None,
            wg_public_key: None,
            ovpn_x509: None,
            auto_picked: false,
        }
    }

    fn session(status: AccountStatus, is_premium: bool) -> Session {
        Session {
            status,
            is_premium,
            data_left_bytes: None,
        }
    }

    #[test]
    fn test_connect_block_order() {
        let ok = session(AccountStatus::Ok, false);
        assert_eq!(connect_block(&ok, false, false), Some(UiTrigger::PrivacyConsent));
        assert_eq!(connect_block(&ok, true, false), None);

        let banned = session(AccountStatus::Banned, true);
        assert_eq!(connect_block(&banned, true, true), Some(UiTrigger::AccountBanned));

        let empty = session(AccountStatus::OutOfData, false);
        assert_eq!(connect_block(&empty, true, false), Some(UiTrigger::OutOfData));
        assert_eq!(connect_block(&empty, true, true), None);
    }

    #[test]
    fn test_ban_reported_once() {
        let ok = session(AccountStatus::Ok, true);
        let banned = session(AccountStatus::Banned, true);
        assert_eq!(
            evaluate(&ok, &banned, None),
            vec![SessionChange::ForceDisconnect(UiTrigger::AccountBanned)]
        );
        assert!(evaluate(&banned, &banned, None).is_empty());
    }

    #[test]
    fn test_out_of_data_spares_custom_configs() {
        let ok = session(AccountStatus::Ok, false);
        let empty = session(AccountStatus::OutOfData, false);
        let mut custom = node(false);
        custom.custom_config = Some(CustomConfig {
            id: "c".into(),
            name: "c".into(),
            protocol: Protocol::WireGuard,
            port: 51820,
            server_address: Some("x".into()),
            auth_required: false,
            credentials: None,
        });
        assert!(evaluate(&ok, &empty, Some(&custom)).is_empty());
        assert_eq!(evaluate(&ok, &empty, Some(&node(false))).len(), 1);
    }

    #[test]
    fn test_premium_loss_only_matters_for_premium_locations() {
        let pro = session(AccountStatus::Ok, true);
        let free = session(AccountStatus::Ok, false);
        assert_eq!(
            evaluate(&pro, &free, Some(&node(true))),
            vec![SessionChange::PremiumLost]
        );
        assert!(evaluate(&pro, &free, Some(&node(false))).is_empty());
        assert!(evaluate(&free, &free, Some(&node(true))).is_empty());
    }
}
