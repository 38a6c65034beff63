use prost_reflect::DynamicMessage;
use quack_registry::DispatchRegistry;
use quack_transport::{Address, Scope, Timestamp};

/// A discovered dongle. `id` is its position in discovery order.
#[derive(Clone, Debug, PartialEq)]
pub struct Device {
    pub id: usize,
    pub address: Scope,
    pub discovered_at: Timestamp,
}

/// A decoded message other than a command descriptor.
#[derive(Clone, Debug)]
pub struct Reply {
    pub address: Address,
    pub message: DynamicMessage,
    pub received_at: Timestamp,
}

pub(crate) struct SessionState {
    pub devices: Vec<Device>,
    pub active: Option<usize>,
    pub registry: DispatchRegistry,
    pub last_reply: Option<Reply>,
    pub packets: Vec<Reply>,
}

impl SessionState {
    pub fn new(registry: DispatchRegistry) -> Self {
        Self {
            devices: Vec::new(),
            active: None,
            registry,
            last_reply: None,
            packets: Vec::new(),
        }
    }

    pub fn active_device(&self) -> Option<&Device> {
        self.active.and_then(|i| self.devices.get(i))
    }

    pub fn find(&self, address: &Scope) -> Option<&Device> {
        self.devices.iter().find(|d| &d.address == address)
    }

    /// Append `address` if unseen; returns the new device.
    pub fn discover(&mut self, address: &Scope) -> Option<Device> {
        if address.is_any() || self.find(address).is_some() {
            return None;
        }
        let device = Device {
            id: self.devices.len(),
            address: address.clone(),
            discovered_at: Timestamp::now(),
        };
        self.devices.push(device.clone());
        Some(device)
    }

    /// Make `index` the active device and forget the previous device's commands.
    pub fn activate(&mut self, index: usize) -> Option<Device> {
        let device = self.devices.get(index).cloned()?;
        self.registry.clear();
        self.active = Some(index);
        Some(device)
    }
}
