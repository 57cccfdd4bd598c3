//! District topology and per-period input series.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::{Carrier, Catalogue};
use crate::error::{HubError, HubResult};

/// A balance node: one building or the central hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Building(usize),
    Hub,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Building(i) => write!(f, "b{i}"),
            NodeId::Hub => write!(f, "hub"),
        }
    }
}

/// Installed capacity in W (Wh for storages).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capacity {
    Fixed(f64),
    /// Decided by the optimizer within the catalogue's sizing bounds.
    /// Only allowed at the hub.
    Sizing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInstance {
    pub abbreviation: String,
    pub capacity: Capacity,
}

impl DeviceInstance {
    pub fn fixed(abbreviation: impl Into<String>, capacity: f64) -> Self {
        Self {
            abbreviation: abbreviation.into(),
            capacity: Capacity::Fixed(capacity),
        }
    }

    pub fn sizing(abbreviation: impl Into<String>) -> Self {
        Self {
            abbreviation: abbreviation.into(),
            capacity: Capacity::Sizing,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Building {
    pub name: String,
    #[serde(default)]
    pub devices: Vec<DeviceInstance>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hub {
    #[serde(default)]
    pub devices: Vec<DeviceInstance>,
}

/// Buildings, the optional hub, and the thermal networks connecting them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct District {
    pub buildings: Vec<Building>,
    #[serde(default)]
    pub hub: Option<Hub>,
    /// Carriers distributed from the hub through a network (heat, cooling)
    #[serde(default)]
    pub networks: BTreeSet<Carrier>,
}

impl District {
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = (0..self.buildings.len()).map(NodeId::Building).collect();
        if self.hub.is_some() {
            nodes.push(NodeId::Hub);
        }
        nodes
    }

    pub fn devices_at(&self, node: NodeId) -> &[DeviceInstance] {
        match node {
            NodeId::Building(i) => self
                .buildings
                .get(i)
                .map(|b| b.devices.as_slice())
                .unwrap_or_default(),
            NodeId::Hub => self
                .hub
                .as_ref()
                .map(|h| h.devices.as_slice())
                .unwrap_or_default(),
        }
    }

    pub fn has_network(&self, carrier: Carrier) -> bool {
        self.networks.contains(&carrier)
    }

    /// Check the topology against the catalogue before any model is built.
    pub fn validate(&self, catalogue: &Catalogue) -> HubResult<()> {
        if self.buildings.is_empty() {
            return Err(HubError::data("district.buildings", "district has no buildings"));
        }
        for carrier in &self.networks {
            if !matches!(carrier, Carrier::Heat | Carrier::Cooling) {
                return Err(HubError::data(
                    format!("district.networks.{carrier}"),
                    "only heat and cooling are distributed through networks",
                ));
            }
            if self.hub.is_none() {
                return Err(HubError::data(
                    format!("district.networks.{carrier}"),
                    "a network needs a hub to supply it",
                ));
            }
        }

        for node in self.nodes() {
            let mut seen = BTreeSet::new();
            for device in self.devices_at(node) {
                let key = format!("{node}.{}", device.abbreviation);
                if !seen.insert(device.abbreviation.as_str()) {
                    return Err(HubError::data(key, "device installed twice at the same node"));
                }
                let spec = catalogue.get(&device.abbreviation)?;
                match (node, device.capacity) {
                    (_, Capacity::Fixed(cap)) if !(cap.is_finite() && cap >= 0.0) => {
                        return Err(HubError::data(key, format!("capacity must be non-negative, got {cap}")));
                    }
                    (NodeId::Building(_), Capacity::Sizing) => {
                        return Err(HubError::data(
                            key,
                            "building capacities are fixed; sizing is only available at the hub",
                        ));
                    }
                    (NodeId::Hub, Capacity::Sizing) if spec.economics.max_cap <= 0.0 => {
                        return Err(HubError::data(key, "sizing requires a positive max_cap"));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

/// Per-carrier external demand and per-device generation of one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSeries {
    #[serde(default)]
    pub demand: BTreeMap<Carrier, Vec<f64>>,
    /// Renewable availability keyed by device abbreviation. Absolute (W) at
    /// buildings, per W of installed capacity at the hub.
    #[serde(default)]
    pub generation: BTreeMap<String, Vec<f64>>,
}

/// Inputs of one representative period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodData {
    pub steps: usize,
    /// Step length in hours
    pub dt_h: f64,
    /// Number of original periods this one stands for
    pub weight: f64,
    #[serde(default)]
    pub ambient_c: Option<Vec<f64>>,
    pub buildings: Vec<NodeSeries>,
    #[serde(default)]
    pub hub: NodeSeries,
    /// Precomputed network losses in W per carrier
    #[serde(default)]
    pub network_losses: BTreeMap<Carrier, Vec<f64>>,
}

impl PeriodData {
    pub fn new(steps: usize, dt_h: f64) -> Self {
        Self {
            steps,
            dt_h,
            weight: 1.0,
            ambient_c: None,
            buildings: Vec::new(),
            hub: NodeSeries::default(),
            network_losses: BTreeMap::new(),
        }
    }

    pub fn node(&self, node: NodeId) -> Option<&NodeSeries> {
        match node {
            NodeId::Building(i) => self.buildings.get(i),
            NodeId::Hub => Some(&self.hub),
        }
    }

    /// Day index of each timestep, for daily peak tracking.
    pub fn day_of(&self, t: usize) -> usize {
        ((t as f64 * self.dt_h) / 24.0 + 1e-9).floor() as usize
    }

    pub fn days(&self) -> usize {
        if self.steps == 0 {
            0
        } else {
            self.day_of(self.steps - 1) + 1
        }
    }

    /// Duration represented by this period in hours, weight included.
    pub fn represented_hours(&self) -> f64 {
        self.weight * self.steps as f64 * self.dt_h
    }

    pub fn validate(&self, district: &District) -> HubResult<()> {
        if self.steps == 0 {
            return Err(HubError::data("period.steps", "period has no timesteps"));
        }
        if !(self.dt_h.is_finite() && self.dt_h > 0.0) {
            return Err(HubError::data("period.dt_h", format!("step length must be positive, got {}", self.dt_h)));
        }
        if !(self.weight.is_finite() && self.weight >= 0.0) {
            return Err(HubError::data("period.weight", format!("weight must be non-negative, got {}", self.weight)));
        }
        if self.buildings.len() != district.buildings.len() {
            return Err(HubError::data(
                "period.buildings",
                format!(
                    "{} building series for {} buildings",
                    self.buildings.len(),
                    district.buildings.len()
                ),
            ));
        }
        if let Some(ambient) = &self.ambient_c {
            check_series("ambient_c", ambient, self.steps, false)?;
        }
        for node in district.nodes() {
            let Some(series) = self.node(node) else { continue };
            for (carrier, values) in &series.demand {
                check_series(&format!("{node}.demand.{carrier}"), values, self.steps, true)?;
            }
            for (abbreviation, values) in &series.generation {
                check_series(&format!("{node}.generation.{abbreviation}"), values, self.steps, true)?;
            }
        }
        for (carrier, values) in &self.network_losses {
            let key = format!("network_losses.{carrier}");
            if !district.has_network(*carrier) {
                return Err(HubError::data(key, "losses given for a carrier without network"));
            }
            check_series(&key, values, self.steps, true)?;
        }
        Ok(())
    }
}

fn check_series(key: &str, values: &[f64], steps: usize, non_negative: bool) -> HubResult<()> {
    if values.len() != steps {
        return Err(HubError::data(key, format!("expected {steps} values, got {}", values.len())));
    }
    if let Some((t, v)) = values
        .iter()
        .enumerate()
        .find(|(_, v)| !v.is_finite() || (non_negative && **v < 0.0))
    {
        return Err(HubError::data(key, format!("invalid value {v} at step {t}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeviceEconomics, DeviceKind, DeviceSpec};

    fn catalogue() -> Catalogue {
        Catalogue::new()
            .with(DeviceSpec {
                abbreviation: "BOI".into(),
                kind: DeviceKind::Boiler {
                    fuel: Carrier::Gas,
                    eta_th: 0.9,
                },
                economics: DeviceEconomics {
                    max_cap: 1e6,
                    ..Default::default()
                },
            })
            .unwrap()
    }

    fn district() -> District {
        District {
            buildings: vec![Building {
                name: "house".into(),
                devices: vec![DeviceInstance::fixed("BOI", 2000.0)],
            }],
            hub: None,
            networks: BTreeSet::new(),
        }
    }

    #[test]
    fn test_node_display_and_order() {
        assert_eq!(NodeId::Building(3).to_string(), "b3");
        assert_eq!(NodeId::Hub.to_string(), "hub");
        assert!(NodeId::Building(10) < NodeId::Hub);
    }

    #[test]
    fn test_building_sizing_rejected() {
        let mut d = district();
        assert!(d.validate(&catalogue()).is_ok());
        d.buildings[0].devices[0] = DeviceInstance::sizing("BOI");
        let err = d.validate(&catalogue()).unwrap_err();
        assert!(matches!(err, HubError::DataInconsistency { ref key, .. } if key == "b0.BOI"));
    }

    #[test]
    fn test_network_needs_hub() {
        let mut d = district();
        d.networks.insert(Carrier::Heat);
        assert!(d.validate(&catalogue()).is_err());
        d.hub = Some(Hub {
            devices: vec![DeviceInstance::sizing("BOI")],
        });
        assert!(d.validate(&catalogue()).is_ok());
        assert_eq!(d.nodes(), vec![NodeId::Building(0), NodeId::Hub]);
    }

    #[test]
    fn test_period_series_length_checked() {
        let d = district();
        let mut period = PeriodData::new(3, 1.0);
        period.buildings.push(NodeSeries::default());
        period.buildings[0].demand.insert(Carrier::Heat, vec![1.0, 2.0]);
        let err = period.validate(&d).unwrap_err();
        assert!(matches!(err, HubError::DataInconsistency { ref key, .. } if key == "b0.demand.heat"));

        period.buildings[0].demand.insert(Carrier::Heat, vec![1.0, -2.0, 3.0]);
        assert!(period.validate(&d).is_err());

        period.buildings[0].demand.insert(Carrier::Heat, vec![1.0, 2.0, 3.0]);
        assert!(period.validate(&d).is_ok());
    }

    #[test]
    fn test_days_of_quarter_hour_period() {
        let period = PeriodData::new(192, 0.25);
        assert_eq!(period.days(), 2);
        assert_eq!(period.day_of(95), 0);
        assert_eq!(period.day_of(96), 1);
        assert_eq!(PeriodData::new(3, 1.0).days(), 1);
    }
}
