use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Customer mapping the `clients` table. `nip` is the tax identifier and
/// is unique.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub id: i32,
    pub nip: Option<String>,
    pub nazwa: String,
    pub kod_pocztowy: Option<String>,
    pub miejscowosc: Option<String>,
    pub ulica: Option<String>,
    pub nr_nieruchomosci: Option<String>,
    pub longitude: Option<Decimal>,
    pub latitude: Option<Decimal>,
    pub status_free: bool,
    pub branch: Option<String>,
    pub rep: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInput {
    pub nip: String,
    pub nazwa: String,
    pub kod_pocztowy: Option<String>,
    pub miejscowosc: Option<String>,
    pub ulica: Option<String>,
    pub nr_nieruchomosci: Option<String>,
    pub longitude: Option<Decimal>,
    pub latitude: Option<Decimal>,
    #[serde(default)]
    pub status_free: bool,
    pub branch: Option<String>,
    pub rep: Option<String>,
}

/// Map marker for a geolocated client.
#[derive(Debug, Clone, Serialize)]
pub struct ClientMapPoint {
    pub id: String,
    pub name: String,
    pub address: String,
    pub latitude: Decimal,
    pub longitude: Decimal,
    pub status_free: bool,
    pub branch: Option<String>,
    pub rep: Option<String>,
}

impl Client {
    /// "street number, postcode city" with missing parts left blank.
    pub fn display_address(&self) -> String {
        let part = |p: &Option<String>| p.clone().unwrap_or_default();
        format!(
            "{} {}, {} {}",
            part(&self.ulica),
            part(&self.nr_nieruchomosci),
            part(&self.kod_pocztowy),
            part(&self.miejscowosc)
        )
        .trim()
        .to_string()
    }

    /// `None` unless both coordinates are present.
    pub fn map_point(&self) -> Option<ClientMapPoint> {
        Some(ClientMapPoint {
            id: self.id.to_string(),
            name: self.nazwa.clone(),
            address: self.display_address(),
            latitude: self.latitude?,
            longitude: self.longitude?,
            status_free: self.status_free,
            branch: self.branch.clone(),
            rep: self.rep.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        Client {
            id: 42,
            nip: Some("5250001009".into()),
            nazwa: "Agro-Pol".into(),
            kod_pocztowy: Some("20-001".into()),
            miejscowosc: Some("Lublin".into()),
            ulica: Some("Lipowa".into()),
            nr_nieruchomosci: Some("7".into()),
            longitude: Some(Decimal::new(225684, 4)),
            latitude: Some(Decimal::new(512465, 4)),
            status_free: false,
            branch: Some("Lublin".into()),
            rep: None,
        }
    }

    #[test]
    fn test_display_address() {
        assert_eq!(client().display_address(), "Lipowa 7, 20-001 Lublin");
    }

    #[test]
    fn test_map_point_requires_coordinates() {
        assert!(client().map_point().is_some());

        let mut without = client();
        without.latitude = None;
        assert!(without.map_point().is_none());
    }
}
