//! Integer-valued boot settings.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingDescriptor {
    pub name: &'static str,
    pub description: &'static str,
}

/// Leave the SAN device registered (and its connection open) after a failed boot.
pub const KEEP_SAN: SettingDescriptor = SettingDescriptor {
    name: "keep-san",
    description: "Preserve SAN connection",
};

/// Every setting known to the boot path.
pub const ALL_SETTINGS: &[SettingDescriptor] = &[KEEP_SAN];

pub fn find_setting(name: &str) -> Option<&'static SettingDescriptor> {
    ALL_SETTINGS.iter().find(|s| s.name == name)
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: BTreeMap<&'static str, i64>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&mut self, setting: &SettingDescriptor, value: i64) {
        self.values.insert(setting.name, value);
    }

    pub fn clear(&mut self, setting: &SettingDescriptor) {
        self.values.remove(setting.name);
    }

    pub fn fetch(&self, setting: &SettingDescriptor) -> Option<i64> {
        self.values.get(setting.name).copied()
    }

    /// Stored value, with an absent setting reading as zero.
    pub fn fetch_or_zero(&self, setting: &SettingDescriptor) -> i64 {
        self.fetch(setting).unwrap_or(0)
    }

    pub fn is_enabled(&self, setting: &SettingDescriptor) -> bool {
        self.fetch_or_zero(setting) != 0
    }
}
