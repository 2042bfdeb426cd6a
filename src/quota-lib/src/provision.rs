use std::collections::BTreeMap;

use crate::resource::{CommissionAction, OperState, QuotableResource, ResourceKind};

/// Resource name to signed quantity.
pub type ProvisionSet = BTreeMap<String, i64>;

pub const RES_VM: &str = "compute.vm";
pub const RES_TOTAL_CPU: &str = "compute.total_cpu";
pub const RES_CPU: &str = "compute.cpu";
pub const RES_DISK: &str = "compute.disk";
pub const RES_TOTAL_RAM: &str = "compute.total_ram";
pub const RES_RAM: &str = "compute.ram";
pub const RES_PRIVATE_NETWORK: &str = "compute.network.private";
pub const RES_FLOATING_IP: &str = "compute.floating_ip";

pub const ALL_RESOURCES: [&str; 8] = [
    RES_VM,
    RES_TOTAL_CPU,
    RES_CPU,
    RES_DISK,
    RES_TOTAL_RAM,
    RES_RAM,
    RES_PRIVATE_NETWORK,
    RES_FLOATING_IP,
];

pub const MIB: i64 = 1048576;
pub const GIB: i64 = 1073741824;

fn provisions(items: &[(&str, i64)]) -> ProvisionSet {
    items
        .iter()
        .map(|(name, quantity)| (name.to_string(), *quantity))
        .collect()
}

pub fn reverse_quantities(set: ProvisionSet) -> ProvisionSet {
    set.into_iter().map(|(name, q)| (name, -q)).collect()
}

/// Quantities a single-unit resource (network, floating ip) commits.
fn unit_commission(resource: &str, action: &CommissionAction) -> Option<ProvisionSet> {
    let held = provisions(&[(resource, 1)]);
    match action {
        CommissionAction::Build | CommissionAction::Reassign { .. } => Some(held),
        CommissionAction::Destroy => Some(reverse_quantities(held)),
        _ => None,
    }
}

/// The provisions `action` commits for `resource` in its current state.
/// `None` means the action does not change any quota.
pub fn get_commission_info(
    resource: &QuotableResource,
    action: &CommissionAction,
) -> Option<ProvisionSet> {
    match &resource.kind {
        ResourceKind::VirtualMachine { flavor, operstate } => {
            let mut base = provisions(&[
                (RES_VM, 1),
                (RES_TOTAL_CPU, flavor.cpu),
                (RES_DISK, GIB * flavor.disk_gib),
                (RES_TOTAL_RAM, MIB * flavor.ram_mib),
            ]);
            let online = provisions(&[(RES_CPU, flavor.cpu), (RES_RAM, MIB * flavor.ram_mib)]);

            match action {
                CommissionAction::Build => {
                    base.extend(online);
                    Some(base)
                }
                CommissionAction::Start | CommissionAction::Reboot => {
                    if *operstate == OperState::Stopped {
                        Some(online)
                    } else {
                        None
                    }
                }
                CommissionAction::Stop => {
                    if operstate.holds_online_resources() {
                        Some(reverse_quantities(online))
                    } else {
                        None
                    }
                }
                CommissionAction::Destroy => {
                    if operstate.holds_online_resources() {
                        base.extend(online);
                    }
                    Some(reverse_quantities(base))
                }
                CommissionAction::Resize { vcpus, maxmem } => {
                    let cpu = vcpus.unwrap_or(flavor.cpu);
                    let ram = maxmem.unwrap_or(flavor.ram_mib);
                    Some(provisions(&[
                        (RES_TOTAL_CPU, cpu - flavor.cpu),
                        (RES_TOTAL_RAM, MIB * (ram - flavor.ram_mib)),
                    ]))
                }
                CommissionAction::Reassign { .. } => {
                    if operstate.holds_online_resources() {
                        base.extend(online);
                    }
                    Some(base)
                }
                CommissionAction::Connect
                | CommissionAction::Disconnect
                | CommissionAction::SetFirewallProfile => None,
            }
        }
        ResourceKind::Network => unit_commission(RES_PRIVATE_NETWORK, action),
        ResourceKind::IpAddress { floating: true } => unit_commission(RES_FLOATING_IP, action),
        ResourceKind::IpAddress { floating: false } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Flavor;

    fn vm(operstate: OperState) -> QuotableResource {
        QuotableResource {
            id: "42".to_string(),
            kind: ResourceKind::VirtualMachine {
                flavor: Flavor {
                    cpu: 2,
                    ram_mib: 1024,
                    disk_gib: 20,
                },
                operstate,
            },
            user: "user-1".to_string(),
            project: "project-1".to_string(),
        }
    }

    #[test]
    fn test_start_only_from_stopped() {
        let started = get_commission_info(&vm(OperState::Stopped), &CommissionAction::Start);
        assert_eq!(
            started,
            Some(provisions(&[(RES_CPU, 2), (RES_RAM, 1024 * MIB)]))
        );
        assert_eq!(
            get_commission_info(&vm(OperState::Started), &CommissionAction::Start),
            None
        );
        assert_eq!(
            get_commission_info(&vm(OperState::Stopped), &CommissionAction::Reboot),
            started
        );
    }

    #[test]
    fn test_build_commits_everything() {
        let build = get_commission_info(&vm(OperState::Build), &CommissionAction::Build).unwrap();
        assert_eq!(build.len(), 6);
        assert_eq!(build[RES_VM], 1);
        assert_eq!(build[RES_DISK], 20 * GIB);
        assert_eq!(build[RES_TOTAL_RAM], 1024 * MIB);
    }

    #[test]
    fn test_destroy_started_negates_all() {
        let destroy =
            get_commission_info(&vm(OperState::Started), &CommissionAction::Destroy).unwrap();
        assert_eq!(
            destroy,
            provisions(&[
                (RES_VM, -1),
                (RES_TOTAL_CPU, -2),
                (RES_CPU, -2),
                (RES_DISK, -20 * GIB),
                (RES_TOTAL_RAM, -1024 * MIB),
                (RES_RAM, -1024 * MIB),
            ])
        );

        let stopped =
            get_commission_info(&vm(OperState::Stopped), &CommissionAction::Destroy).unwrap();
        assert_eq!(stopped.len(), 4);
        assert!(!stopped.contains_key(RES_CPU));
    }

    #[test]
    fn test_stop_resize_and_noop_actions() {
        assert_eq!(
            get_commission_info(&vm(OperState::Error), &CommissionAction::Stop),
            Some(provisions(&[(RES_CPU, -2), (RES_RAM, -1024 * MIB)]))
        );
        assert_eq!(
            get_commission_info(&vm(OperState::Stopped), &CommissionAction::Stop),
            None
        );
        assert_eq!(
            get_commission_info(
                &vm(OperState::Stopped),
                &CommissionAction::Resize {
                    vcpus: Some(4),
                    maxmem: None
                }
            ),
            Some(provisions(&[(RES_TOTAL_CPU, 2), (RES_TOTAL_RAM, 0)]))
        );
        for action in [
            CommissionAction::Connect,
            CommissionAction::Disconnect,
            CommissionAction::SetFirewallProfile,
        ] {
            assert_eq!(get_commission_info(&vm(OperState::Started), &action), None);
        }
    }

    #[test]
    fn test_network_and_ip_tables() {
        let mut network = vm(OperState::Build);
        network.kind = ResourceKind::Network;
        assert_eq!(
            get_commission_info(&network, &CommissionAction::Destroy),
            Some(provisions(&[(RES_PRIVATE_NETWORK, -1)]))
        );
        assert_eq!(get_commission_info(&network, &CommissionAction::Start), None);

        let mut ip = vm(OperState::Build);
        ip.kind = ResourceKind::IpAddress { floating: true };
        let reassign = CommissionAction::Reassign {
            from_project: "a".to_string(),
            to_project: "b".to_string(),
        };
        assert_eq!(
            get_commission_info(&ip, &reassign),
            Some(provisions(&[(RES_FLOATING_IP, 1)]))
        );
        ip.kind = ResourceKind::IpAddress { floating: false };
        assert_eq!(get_commission_info(&ip, &CommissionAction::Build), None);
    }
}
