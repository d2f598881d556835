use std::collections::HashMap;

use crate::model::DeviceDescriptor;

/// Maps devices to their extra label values.
///
/// Every declared label name yields a value for every device; names a device
/// does not set resolve to the empty string so each metric keeps a fixed
/// label-key set.
#[derive(Debug, Default)]
pub struct LabelResolver {
    names: Vec<String>,
    by_device: HashMap<String, HashMap<String, String>>,
}

impl LabelResolver {
    /// Creates a resolver for the given declared label names, in order.
    pub fn new(names: Vec<String>) -> Self {
        Self {
            names,
            by_device: HashMap::new(),
        }
    }

    /// Replaces the device → labels mapping.
    pub fn set_devices(&mut self, devices: &[DeviceDescriptor]) {
        self.by_device = devices
            .iter()
            .map(|d| (d.address.clone(), d.labels.clone()))
            .collect();
    }

    /// Extra label values for `device`, aligned with the declared names.
    pub fn values(&self, device: &str) -> Vec<&str> {
        let labels = self.by_device.get(device);
        self.names
            .iter()
            .map(|name| {
                labels
                    .and_then(|l| l.get(name))
                    .map(String::as_str)
                    .unwrap_or("")
            })
            .collect()
    }

    /// Full label vector: `base` followed by the resolved extra values.
    pub fn label_values<'a>(&'a self, base: &[&'a str], device: &str) -> Vec<&'a str> {
        let mut out = Vec::with_capacity(base.len() + self.names.len());
        out.extend_from_slice(base);
        out.extend(self.values(device));
        out
    }
}

/// Label names for a metric: `base` followed by the extra names.
pub fn label_names<'a>(base: &[&'a str], extra: &'a [String]) -> Vec<&'a str> {
    base.iter()
        .copied()
        .chain(extra.iter().map(String::as_str))
        .collect()
}
