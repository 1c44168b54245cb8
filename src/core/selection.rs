//! Location resolution and weighted node selection.
//!
//! Turns a [`LocationId`] into a concrete [`SelectedNode`]. Group nodes and
//! static-IP nodes are drawn with two distinct weighted algorithms:
//!
//! - groups draw from `0..sum` and take the first node whose cumulative
//!   weight exceeds the draw;
//! - static IPs draw from `1..=sum` with the same strict comparison, so a draw
//!   equal to `sum` falls through to the last node.
//!
//! Both fall back to the last node when every weight is zero.

use std::collections::HashSet;

use rand::Rng;

use crate::constants::CAT_SELECTION;
use crate::error::ConnectionError;
use crate::state::{GroupModel, LocationId, NodeModel, SelectedNode, ServerModel, Session};
use crate::store::Catalog;
use crate::{log_debug, log_info, log_warning};

/// Weighted pick over a group's nodes using a `0..sum` draw.
pub fn pick_group_node<'a, R: Rng + ?Sized>(
    nodes: &[&'a NodeModel],
    rng: &mut R,
) -> Option<&'a NodeModel> {
    let sum: u64 = nodes.iter().map(|n| u64::from(n.weight)).sum();
    if sum == 0 {
        return nodes.last().copied();
    }
    let draw = rng.gen_range(0..sum);
    let mut cumulative = 0;
    for node in nodes {
        cumulative += u64::from(node.weight);
        if draw < cumulative {
            return Some(*node);
        }
    }
    nodes.last().copied()
}

/// Weighted pick over a static IP's nodes using a `1..=sum` draw.
pub fn pick_static_node<'a, R: Rng + ?Sized>(
    nodes: &'a [NodeModel],
    rng: &mut R,
) -> Option<&'a NodeModel> {
    let sum: u64 = nodes.iter().map(|n| u64::from(n.weight)).sum();
    if sum == 0 {
        return nodes.last();
    }
    let draw = rng.gen_range(1..=sum);
    let mut cumulative = 0;
    for node in nodes {
        cumulative += u64::from(node.weight);
        if draw < cumulative {
            return Some(node);
        }
    }
    nodes.last()
}

/// Whether `group` is a valid target for the given account.
#[must_use]
pub fn is_eligible(group: &GroupModel, session: &Session) -> bool {
    group.can_connect() && (!group.premium_only || session.is_premium)
}

/// Resolves the best location: the server-provided one when eligible, else
/// the first eligible group in catalog order.
///
/// # Errors
///
/// Returns `NoValidNodeFound` when no group is eligible.
pub fn best_location<'a>(
    catalog: &'a Catalog,
    session: &Session,
) -> Result<(&'a ServerModel, &'a GroupModel), ConnectionError> {
    if let Some((server, group)) = catalog.best_location.and_then(|id| catalog.group(id)) {
        if is_eligible(group, session) {
            return Ok((server, group));
        }
        log_debug!(
            CAT_SELECTION,
            "Best location {} is not eligible, searching catalog",
            group.id
        );
    }
    catalog
        .servers
        .iter()
        .flat_map(|s| s.groups.iter().map(move |g| (s, g)))
        .find(|(_, g)| is_eligible(g, session))
        .ok_or(ConnectionError::NoValidNodeFound)
}

/// Stateful resolver. Remembers nodes that failed during this session.
#[derive(Debug, Default)]
pub struct Selector {
    failed_nodes: HashSet<String>,
}

impl Selector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_failed(&mut self, hostname: &str) {
        self.failed_nodes.insert(hostname.to_string());
    }

    pub fn clear_failed(&mut self) {
        self.failed_nodes.clear();
    }

    /// Resolves `location` into a connection target.
    ///
    /// # Errors
    ///
    /// Returns an error from the connection taxonomy when the location is
    /// missing, premium-locked, unconnectable or lacks credentials.
    pub fn resolve<R: Rng + ?Sized>(
        &mut self,
        catalog: &Catalog,
        location: &LocationId,
        session: &Session,
        forced_node: Option<&str>,
        rng: &mut R,
    ) -> Result<SelectedNode, ConnectionError> {
        match location {
            LocationId::Best => {
                let (server, group) = best_location(catalog, session)?;
                let mut node = self.resolve_group(server, group, forced_node, rng)?;
                node.auto_picked = true;
                Ok(node)
            }
            LocationId::Group(id) => {
                let (server, group) = catalog
                    .group(*id)
                    .ok_or_else(|| ConnectionError::LocationNotFound(location.to_string()))?;
                if group.premium_only && !session.is_premium {
                    return Err(ConnectionError::UpgradeRequired);
                }
                self.resolve_group(server, group, forced_node, rng)
            }
            LocationId::Static(id) => {
                let static_ip = catalog
                    .static_ip(*id)
                    .ok_or_else(|| ConnectionError::LocationNotFound(location.to_string()))?;
                let credentials = static_ip
                    .credentials
                    .clone()
                    .ok_or(ConnectionError::CredentialsNotFound)?;
                let node = pick_static_node(&static_ip.nodes, rng)
                    .ok_or(ConnectionError::NoValidNodeFound)?;
                Ok(SelectedNode {
                    location: location.clone(),
                    country_code: static_ip.country_code.clone(),
                    dns_hostname: node.hostname.clone(),
                    hostname: node.hostname.clone(),
                    server_address: node.ip.clone(),
                    nickname: static_ip.static_ip.clone(),
                    city_name: static_ip.city.clone(),
                    group_id: None,
                    premium_only: false,
                    static_ip_credentials: Some(credentials),
                    custom_config: None,
                    wg_public_key: static_ip.wg_public_key.clone(),
                    ovpn_x509: None,
                    auto_picked: false,
                })
            }
            LocationId::Custom(id) => {
                let config = catalog
                    .custom_config(id)
                    .ok_or_else(|| ConnectionError::LocationNotFound(location.to_string()))?;
                let address = config
                    .server_address
                    .clone()
                    .ok_or(ConnectionError::MissingRemoteAddress)?;
                if config.missing_credentials() {
                    return Err(ConnectionError::CustomConfigMissingCredentials(
                        config.id.clone(),
                    ));
                }
                Ok(SelectedNode {
                    location: location.clone(),
                    country_code: String::new(),
                    dns_hostname: address.clone(),
                    hostname: address.clone(),
                    server_address: address,
                    nickname: String::new(),
                    city_name: config.name.clone(),
                    group_id: None,
                    premium_only: false,
                    static_ip_credentials: None,
                    custom_config: Some(config.clone()),
                    wg_public_key: None,
                    ovpn_x509: None,
                    auto_picked: false,
                })
            }
        }
    }

    /// Picks a different node in the same group as `current`, marking the
    /// current node as failed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLocationType` for targets without a group, and the
    /// resolution errors otherwise.
    pub fn select_another_node<R: Rng + ?Sized>(
        &mut self,
        catalog: &Catalog,
        current: &SelectedNode,
        forced_node: Option<&str>,
        rng: &mut R,
    ) -> Result<SelectedNode, ConnectionError> {
        let group_id = current.group_id.ok_or(ConnectionError::InvalidLocationType)?;
        let (server, group) = catalog
            .group(group_id)
            .ok_or_else(|| ConnectionError::LocationNotFound(group_id.to_string()))?;
        self.mark_failed(&current.hostname);
        let mut node = self.resolve_group(server, group, forced_node, rng)?;
        node.auto_picked = current.auto_picked;
        log_info!(
            CAT_SELECTION,
            "Switched node {} -> {} in group {}",
            current.hostname,
            node.hostname,
            group_id
        );
        Ok(node)
    }

    fn resolve_group<R: Rng + ?Sized>(
        &mut self,
        server: &ServerModel,
        group: &GroupModel,
        forced_node: Option<&str>,
        rng: &mut R,
    ) -> Result<SelectedNode, ConnectionError> {
        if !group.can_connect() {
            return Err(ConnectionError::NoValidNodeFound);
        }
        let available: Vec<&NodeModel> =
            group.nodes.iter().filter(|n| !n.force_disconnect).collect();

        // A forced node that already failed falls back to weighted selection.
        let forced = forced_node
            .filter(|h| !self.failed_nodes.contains(*h))
            .and_then(|h| available.iter().copied().find(|n| n.hostname == h));
        let node = if let Some(forced) = forced {
            log_debug!(CAT_SELECTION, "Using forced node {}", forced.hostname);
            forced
        } else {
            let mut candidates: Vec<&NodeModel> = available
                .iter()
                .copied()
                .filter(|n| !self.failed_nodes.contains(&n.hostname))
                .collect();
            if candidates.is_empty() {
                log_warning!(
                    CAT_SELECTION,
                    "Every node in group {} has failed, starting over",
                    group.id
                );
                self.clear_failed();
                candidates = available;
            }
            pick_group_node(&candidates, rng).ok_or(ConnectionError::NoValidNodeFound)?
        };

        Ok(group_target(server, group, node))
    }

    /// Rebuilds the last connected node from the current catalog.
    ///
    /// Returns `None` when `last` no longer belongs to `location`, was
    /// retired or failed, or its group is locked for this account.
    #[must_use]
    pub fn restore(
        &self,
        catalog: &Catalog,
        location: &LocationId,
        last: &SelectedNode,
        session: &Session,
    ) -> Option<SelectedNode> {
        let group_id = last.group_id?;
        let matches = match location {
            LocationId::Group(id) => *id == group_id,
            LocationId::Best => {
                last.auto_picked
                    && best_location(catalog, session).is_ok_and(|(_, g)| g.id == group_id)
            }
            LocationId::Static(_) | LocationId::Custom(_) => false,
        };
        if !matches {
            return None;
        }
        let (server, group) = catalog.group(group_id)?;
        if group.premium_only && !session.is_premium {
            return None;
        }
        let node = group.nodes.iter().find(|n| {
            n.hostname == last.hostname
                && !n.force_disconnect
                && !self.failed_nodes.contains(&n.hostname)
        })?;
        let mut restored = group_target(server, group, node);
        restored.auto_picked = last.auto_picked;
        Some(restored)
    }
}

fn group_target(server: &ServerModel, group: &GroupModel, node: &NodeModel) -> SelectedNode {
    SelectedNode {
        location: LocationId::Group(group.id),
        country_code: server.country_code.clone(),
        dns_hostname: server.dns_hostname.clone(),
        hostname: node.hostname.clone(),
        server_address: node.ip.clone(),
        nickname: group.nick.clone(),
        city_name: group.city.clone(),
        group_id: Some(group.id),
        premium_only: group.premium_only,
        static_ip_credentials: None,
        custom_config: None,
        wg_public_key: group.wg_public_key.clone(),
        ovpn_x509: group.ovpn_x509.clone(),
        auto_picked: false,
    }
}

/// Where to move a premium-only selection after the account lost premium:
/// another eligible group of the same server, else the best location.
#[must_use]
pub fn relocate_after_downgrade(
    catalog: &Catalog,
    current: &SelectedNode,
    session: &Session,
) -> LocationId {
    let sibling = current.group_id.and_then(|id| {
        let (server, _) = catalog.group(id)?;
        server
            .groups
            .iter()
            .find(|g| g.id != id && is_eligible(g, session))
            .map(|g| LocationId::Group(g.id))
    });
    sibling.unwrap_or(LocationId::Best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Credentials, CustomConfig, Protocol, StaticIp};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn node(hostname: &str, weight: u32) -> NodeModel {
        NodeModel {
            hostname: hostname.to_string(),
            ip: format!("10.0.0.{weight}"),
            ip2: None,
            ip3: None,
            weight,
            force_disconnect: false,
        }
    }

    fn group(id: u32, premium_only: bool, nodes: Vec<NodeModel>) -> GroupModel {
        GroupModel {
            id,
            city: format!("City{id}"),
            nick: format!("Nick{id}"),
            premium_only,
            nodes,
            wg_public_key: None,
            ovpn_x509: None,
        }
    }

    fn catalog(groups: Vec<GroupModel>, best: Option<u32>) -> Catalog {
        Catalog {
            servers: vec![ServerModel {
                id: 1,
                name: "Test".into(),
                country_code: "TS".into(),
                dns_hostname: "ts.example.net".into(),
                groups,
            }],
            best_location: best,
            ..Catalog::default()
        }
    }

    fn free() -> Session {
        Session::default()
    }

    fn premium() -> Session {
        Session {
            is_premium: true,
            ..Session::default()
        }
    }

    #[test]
    fn test_weighted_selection_bounds() {
        let nodes = [node("a", 0), node("b", 5), node("c", 0), node("d", 3)];
        let refs: Vec<&NodeModel> = nodes.iter().collect();
        let mut rng = StdRng::seed_from_u64(7);
        let (mut b, mut d) = (0u32, 0u32);

        for _ in 0..10_000 {
            match pick_group_node(&refs, &mut rng).unwrap().hostname.as_str() {
                "b" => b += 1,
                "d" => d += 1,
                other => panic!("selected zero-weight node {other}"),
            }
        }

        // Expected 6250 / 3750.
        assert!((5_950..=6_550).contains(&b), "b = {b}");
        assert!((3_450..=4_050).contains(&d), "d = {d}");
    }

    #[test]
    fn test_all_zero_weights_fall_back_to_last() {
        let nodes = [node("a", 0), node("b", 0)];
        let refs: Vec<&NodeModel> = nodes.iter().collect();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(pick_group_node(&refs, &mut rng).unwrap().hostname, "b");
        assert_eq!(pick_static_node(&nodes, &mut rng).unwrap().hostname, "b");
        assert!(pick_group_node(&[], &mut rng).is_none());
    }

    #[test]
    fn test_static_draw_is_one_based() {
        // With a single weight-1 node the draw is always 1 and never < 1,
        // so the fallback to the last node is what selects it.
        let nodes = [node("x", 0), node("only", 1)];
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            assert_eq!(pick_static_node(&nodes, &mut rng).unwrap().hostname, "only");
        }
        // Weights [2, 2]: draws 1 -> first, 2..=4 -> second or fallback.
        let nodes = [node("first", 2), node("second", 2)];
        let mut firsts = 0;
        for _ in 0..4_000 {
            if pick_static_node(&nodes, &mut rng).unwrap().hostname == "first" {
                firsts += 1;
            }
        }
        assert!((800..=1_200).contains(&firsts), "firsts = {firsts}");
    }

    #[test]
    fn test_force_disconnected_group_excluded_from_best() {
        let mut blocked = group(1, false, vec![node("a", 1), node("b", 1)]);
        for n in &mut blocked.nodes {
            n.force_disconnect = true;
        }
        let open = group(2, false, vec![node("c", 1)]);
        let catalog = catalog(vec![blocked, open], Some(1));

        assert!(!catalog.group(1).unwrap().1.can_connect());
        let (_, best) = best_location(&catalog, &free()).unwrap();
        assert_eq!(best.id, 2);

        let mut selector = Selector::new();
        let mut rng = StdRng::seed_from_u64(2);
        assert_eq!(
            selector.resolve(&catalog, &LocationId::Group(1), &free(), None, &mut rng),
            Err(ConnectionError::NoValidNodeFound)
        );
        let picked = selector
            .resolve(&catalog, &LocationId::Best, &free(), None, &mut rng)
            .unwrap();
        assert_eq!(picked.group_id, Some(2));
        assert!(picked.auto_picked);
    }

    #[test]
    fn test_best_skips_premium_for_free_accounts() {
        let catalog = catalog(
            vec![group(1, true, vec![node("p", 1)]), group(2, false, vec![node("f", 1)])],
            Some(1),
        );
        assert_eq!(best_location(&catalog, &free()).unwrap().1.id, 2);
        assert_eq!(best_location(&catalog, &premium()).unwrap().1.id, 1);

        let empty = Catalog::default();
        assert_eq!(
            best_location(&empty, &free()).unwrap_err(),
            ConnectionError::NoValidNodeFound
        );
    }

    #[test]
    fn test_premium_group_requires_upgrade() {
        let catalog = catalog(vec![group(1, true, vec![node("p", 1)])], None);
        let mut rng = StdRng::seed_from_u64(4);
        let result = Selector::new().resolve(&catalog, &LocationId::Group(1), &free(), None, &mut rng);
        assert_eq!(result, Err(ConnectionError::UpgradeRequired));
    }

    #[test]
    fn test_forced_node_overrides_weights() {
        let catalog = catalog(vec![group(1, false, vec![node("heavy", 100), node("light", 0)])], None);
        let mut rng = StdRng::seed_from_u64(5);
        let mut selector = Selector::new();
        let picked = selector
            .resolve(&catalog, &LocationId::Group(1), &free(), Some("light"), &mut rng)
            .unwrap();
        assert_eq!(picked.hostname, "light");

        // Not a member: ignored.
        let picked = selector
            .resolve(&catalog, &LocationId::Group(1), &free(), Some("elsewhere"), &mut rng)
            .unwrap();
        assert_eq!(picked.hostname, "heavy");

        // Failed forced nodes are skipped.
        selector.mark_failed("light");
        let picked = selector
            .resolve(&catalog, &LocationId::Group(1), &free(), Some("light"), &mut rng)
            .unwrap();
        assert_eq!(picked.hostname, "heavy");
    }

    #[test]
    fn test_select_another_node_excludes_failed_then_resets() {
        let catalog = catalog(vec![group(1, false, vec![node("a", 1), node("b", 1)])], None);
        let mut rng = StdRng::seed_from_u64(6);
        let mut selector = Selector::new();

        let first = selector
            .resolve(&catalog, &LocationId::Group(1), &free(), None, &mut rng)
            .unwrap();
        let second = selector
            .select_another_node(&catalog, &first, None, &mut rng)
            .unwrap();
        assert_ne!(first.hostname, second.hostname);

        // Both failed now: the list is cleared and selection starts over.
        let third = selector
            .select_another_node(&catalog, &second, None, &mut rng)
            .unwrap();
        assert!(["a", "b"].contains(&third.hostname.as_str()));
        assert!(selector.failed_nodes.is_empty());
    }

    #[test]
    fn test_missing_locations_report_their_id() {
        let catalog = catalog(vec![], None);
        let mut rng = StdRng::seed_from_u64(8);
        let mut selector = Selector::new();
        assert_eq!(
            selector.resolve(&catalog, &LocationId::Group(99), &free(), None, &mut rng),
            Err(ConnectionError::LocationNotFound("99".into()))
        );
        assert_eq!(
            selector.resolve(&catalog, &LocationId::Static(3), &free(), None, &mut rng),
            Err(ConnectionError::LocationNotFound("static_3".into()))
        );
    }

    #[test]
    fn test_static_and_custom_resolution() {
        let mut catalog = catalog(vec![], None);
        catalog.static_ips.push(StaticIp {
            id: 3,
            static_ip: "203.0.113.9".into(),
            country_code: "US".into(),
            city: "Dallas".into(),
            nodes: vec![node("s1", 1)],
            credentials: None,
            wg_public_key: None,
        });
        catalog.custom_configs.push(CustomConfig {
            id: "home".into(),
            name: "Home router".into(),
            protocol: Protocol::Udp,
            port: 1194,
            server_address: Some("vpn.home.lan".into()),
            auth_required: true,
            credentials: None,
        });
        let mut rng = StdRng::seed_from_u64(9);
        let mut selector = Selector::new();

        assert_eq!(
            selector.resolve(&catalog, &LocationId::Static(3), &free(), None, &mut rng),
            Err(ConnectionError::CredentialsNotFound)
        );
        catalog.static_ips[0].credentials = Some(Credentials {
            username: "u".into(),
            password: "p".into(),
        });
        let picked = selector
            .resolve(&catalog, &LocationId::Static(3), &free(), None, &mut rng)
            .unwrap();
        assert_eq!(picked.hostname, "s1");
        assert!(picked.static_ip_credentials.is_some());

        let custom = LocationId::Custom("home".into());
        assert_eq!(
            selector.resolve(&catalog, &custom, &free(), None, &mut rng),
            Err(ConnectionError::CustomConfigMissingCredentials("home".into()))
        );
        catalog.custom_configs[0].auth_required = false;
        let picked = selector.resolve(&catalog, &custom, &free(), None, &mut rng).unwrap();
        assert!(picked.is_custom_config());
        assert_eq!(picked.server_address, "vpn.home.lan");
    }

    #[test]
    fn test_relocate_after_downgrade() {
        let catalog = catalog(
            vec![group(1, true, vec![node("p", 1)]), group(2, false, vec![node("f", 1)])],
            None,
        );
        let mut rng = StdRng::seed_from_u64(10);
        let current = Selector::new()
            .resolve(&catalog, &LocationId::Group(1), &premium(), None, &mut rng)
            .unwrap();
        assert_eq!(
            relocate_after_downgrade(&catalog, &current, &free()),
            LocationId::Group(2)
        );

        let lonely = self::catalog(vec![group(1, true, vec![node("p", 1)])], None);
        assert_eq!(relocate_after_downgrade(&lonely, &current, &free()), LocationId::Best);
    }

    #[test]
    fn test_restore_last_connected_node() {
        let mut catalog = catalog(
            vec![
                group(1, false, vec![node("a", 1), node("b", 1)]),
                group(2, true, vec![node("p", 1)]),
            ],
            Some(1),
        );
        let mut rng = StdRng::seed_from_u64(11);
        let mut selector = Selector::new();
        let last = selector
            .resolve(&catalog, &LocationId::Group(1), &free(), Some("b"), &mut rng)
            .unwrap();

        let restored = selector
            .restore(&catalog, &LocationId::Group(1), &last, &free())
            .unwrap();
        assert_eq!(restored.hostname, "b");
        assert!(!restored.auto_picked);

        // Another location, or best when the node was picked by hand.
        assert!(selector
            .restore(&catalog, &LocationId::Group(2), &last, &free())
            .is_none());
        assert!(selector
            .restore(&catalog, &LocationId::Best, &last, &free())
            .is_none());
        let auto = SelectedNode {
            auto_picked: true,
            ..last.clone()
        };
        assert_eq!(
            selector
                .restore(&catalog, &LocationId::Best, &auto, &free())
                .map(|n| n.hostname),
            Some("b".to_string())
        );

        selector.mark_failed("b");
        assert!(selector
            .restore(&catalog, &LocationId::Group(1), &last, &free())
            .is_none());
        selector.clear_failed();

        catalog.servers[0].groups[0].nodes[1].force_disconnect = true;
        assert!(selector
            .restore(&catalog, &LocationId::Group(1), &last, &free())
            .is_none());

        let premium_node = selector
            .resolve(&catalog, &LocationId::Group(2), &premium(), None, &mut rng)
            .unwrap();
        assert!(selector
            .restore(&catalog, &LocationId::Group(2), &premium_node, &free())
            .is_none());
    }
}
