use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flavor {
    pub cpu: i64,
    pub ram_mib: i64,
    pub disk_gib: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperState {
    Build,
    Started,
    Stopped,
    Error,
    Destroyed,
}

impl OperState {
    /// States in which the online resources (cpu, ram) are held.
    pub fn holds_online_resources(&self) -> bool {
        matches!(self, OperState::Started | OperState::Build | OperState::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceKind {
    VirtualMachine { flavor: Flavor, operstate: OperState },
    Network,
    IpAddress { floating: bool },
}

impl ResourceKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ResourceKind::VirtualMachine { .. } => "vm",
            ResourceKind::Network => "network",
            ResourceKind::IpAddress { .. } => "ip",
        }
    }
}

/// An entity whose existence is charged against a user's quota in a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotableResource {
    pub id: String,
    pub kind: ResourceKind,
    pub user: String,
    pub project: String,
}

impl fmt::Display for QuotableResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.type_name(), self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommissionAction {
    Build,
    Start,
    Stop,
    Reboot,
    Destroy,
    Resize { vcpus: Option<i64>, maxmem: Option<i64> },
    Reassign { from_project: String, to_project: String },
    Connect,
    Disconnect,
    SetFirewallProfile,
}

impl fmt::Display for CommissionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommissionAction::Build => "BUILD",
            CommissionAction::Start => "START",
            CommissionAction::Stop => "STOP",
            CommissionAction::Reboot => "REBOOT",
            CommissionAction::Destroy => "DESTROY",
            CommissionAction::Resize { .. } => "RESIZE",
            CommissionAction::Reassign { .. } => "REASSIGN",
            CommissionAction::Connect => "CONNECT",
            CommissionAction::Disconnect => "DISCONNECT",
            CommissionAction::SetFirewallProfile => "SET_FIREWALL_PROFILE",
        };
        f.write_str(name)
    }
}
