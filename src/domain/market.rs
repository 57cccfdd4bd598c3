//! Economic and ecological parameters of the upstream carrier markets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Carrier, District};
use crate::error::{HubError, HubResult};

/// Prices per kWh and CO2 factors in kg per kWh for one carrier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierMarket {
    #[serde(default)]
    pub import_price: f64,
    /// Feed-in revenue
    #[serde(default)]
    pub export_price: f64,
    #[serde(default)]
    pub import_co2: f64,
    /// Emissions credited for fed-in energy
    #[serde(default)]
    pub export_co2: f64,
    /// Maximum import power in W at the grid connection point
    #[serde(default)]
    pub import_limit: Option<f64>,
    #[serde(default)]
    pub export_allowed: bool,
}

impl CarrierMarket {
    pub fn import_only(price: f64, co2: f64) -> Self {
        Self {
            import_price: price,
            export_price: 0.0,
            import_co2: co2,
            export_co2: 0.0,
            import_limit: None,
            export_allowed: false,
        }
    }

    pub fn with_export(mut self, price: f64, co2_credit: f64) -> Self {
        self.export_allowed = true;
        self.export_price = price;
        self.export_co2 = co2_credit;
        self
    }

    pub fn with_import_limit(mut self, limit_w: f64) -> Self {
        self.import_limit = Some(limit_w);
        self
    }
}

/// Markets reachable from the district, keyed by carrier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Market {
    carriers: BTreeMap<Carrier, CarrierMarket>,
}

impl Market {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, carrier: Carrier, market: CarrierMarket) -> Self {
        self.carriers.insert(carrier, market);
        self
    }

    pub fn get(&self, carrier: Carrier) -> Option<&CarrierMarket> {
        self.carriers.get(&carrier)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Carrier, &CarrierMarket)> {
        self.carriers.iter().map(|(c, m)| (*c, m))
    }

    pub fn validate(&self) -> HubResult<()> {
        for (carrier, market) in &self.carriers {
            let fields = [
                ("import_price", market.import_price),
                ("export_price", market.export_price),
                ("import_co2", market.import_co2),
                ("export_co2", market.export_co2),
            ];
            if let Some((name, value)) = fields.iter().find(|(_, v)| !v.is_finite()) {
                return Err(HubError::data(
                    format!("market.{carrier}.{name}"),
                    format!("not a finite number: {value}"),
                ));
            }
            if let Some(limit) = market.import_limit {
                if !(limit.is_finite() && limit >= 0.0) {
                    return Err(HubError::data(
                        format!("market.{carrier}.import_limit"),
                        format!("must be non-negative, got {limit}"),
                    ));
                }
            }
            if matches!(carrier, Carrier::Heat | Carrier::Cooling) {
                return Err(HubError::data(
                    format!("market.{carrier}"),
                    "heat and cooling are not traded upstream",
                ));
            }
            if carrier.is_delivered_fuel() && market.export_allowed {
                return Err(HubError::data(
                    format!("market.{carrier}.export_allowed"),
                    "delivered fuels cannot be fed back",
                ));
            }
        }
        Ok(())
    }
}

/// How a carrier moves between the nodes of a district.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarrierLink {
    /// Shared district bus with an optional grid connection point
    Bus,
    /// Hub-supplied network; buildings withdraw, the hub injects
    Network,
    /// Bought at each node from its market, no exchange between nodes
    Delivered,
    /// Produced and consumed at the same node only
    Local,
}

impl CarrierLink {
    pub fn of(carrier: Carrier, district: &District, market: &Market) -> Self {
        match carrier {
            Carrier::Electricity | Carrier::Gas => CarrierLink::Bus,
            Carrier::Heat | Carrier::Cooling if district.has_network(carrier) => CarrierLink::Network,
            Carrier::Heat | Carrier::Cooling => CarrierLink::Local,
            _ if market.get(carrier).is_some() => CarrierLink::Delivered,
            _ => CarrierLink::Local,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Building, Hub};
    use rstest::rstest;

    fn market() -> Market {
        Market::new()
            .with(Carrier::Electricity, CarrierMarket::import_only(0.3, 0.4).with_export(0.08, 0.4))
            .with(Carrier::Biomass, CarrierMarket::import_only(0.05, 0.02))
    }

    #[rstest]
    #[case(Carrier::Electricity, false, CarrierLink::Bus)]
    #[case(Carrier::Gas, false, CarrierLink::Bus)]
    #[case(Carrier::Heat, false, CarrierLink::Local)]
    #[case(Carrier::Heat, true, CarrierLink::Network)]
    #[case(Carrier::Biomass, false, CarrierLink::Delivered)]
    #[case(Carrier::Waste, false, CarrierLink::Local)]
    fn test_carrier_links(#[case] carrier: Carrier, #[case] network: bool, #[case] expected: CarrierLink) {
        let mut district = District {
            buildings: vec![Building::default()],
            hub: Some(Hub::default()),
            ..Default::default()
        };
        if network {
            district.networks.insert(carrier);
        }
        assert_eq!(CarrierLink::of(carrier, &district, &market()), expected);
    }

    #[test]
    fn test_market_validation() {
        assert!(market().validate().is_ok());
        let bad = Market::new().with(Carrier::Heat, CarrierMarket::import_only(0.1, 0.0));
        assert!(bad.validate().is_err());
        let bad = Market::new().with(
            Carrier::Hydrogen,
            CarrierMarket::import_only(0.1, 0.0).with_export(0.1, 0.0),
        );
        assert!(bad.validate().is_err());
        let bad = Market::new().with(
            Carrier::Gas,
            CarrierMarket::import_only(0.1, 0.0).with_import_limit(-1.0),
        );
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_market_deserializes_by_carrier_name() {
        let market: Market = serde_json::from_str(
            r#"{"electricity": {"import_price": 0.3, "import_co2": 0.4, "export_allowed": true, "export_price": 0.08}}"#,
        )
        .unwrap();
        let el = market.get(Carrier::Electricity).unwrap();
        assert!(el.export_allowed);
        assert_eq!(el.import_limit, None);
        assert!(market.get(Carrier::Gas).is_none());
    }
}
